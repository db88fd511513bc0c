use std::time::Duration;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::{debug, info};
use url::Url;

use super::error::CatalogError;
use super::models::{AlbumResponse, CatalogEntry, OEmbedResponse, PlaylistResponse, TokenResponse};
use crate::parser::models::UrlKind;

const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const API_BASE: &str = "https://api.spotify.com/v1";
const OEMBED_URL: &str = "https://open.spotify.com/oembed";

const MAX_NAME_LEN: usize = 100;

lazy_static! {
    static ref UNSAFE_CHARS: Regex = Regex::new(r#"[<>:"/\\|?*]"#).unwrap();
}

/// 查询专辑/歌单名称，用于创建下载子目录
#[async_trait]
pub trait CatalogLookup: Send + Sync {
    async fn lookup(&self, kind: UrlKind, id: &str) -> Result<CatalogEntry, CatalogError>;
}

#[derive(Debug, Clone)]
struct Credentials {
    client_id: String,
    client_secret: String,
}

/// Spotify 目录查询。配置了凭据时走 Web API，否则用公开的 oEmbed 接口。
#[derive(Debug, Clone)]
pub struct SpotifyCatalog {
    inner: Client,
    credentials: Option<Credentials>,
}

impl SpotifyCatalog {
    pub fn new() -> Result<Self, CatalogError> {
        let inner = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            inner,
            credentials: None,
        })
    }

    pub fn with_credentials(
        mut self,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        let client_id = client_id.into();
        let client_secret = client_secret.into();
        if !client_id.is_empty() && !client_secret.is_empty() {
            self.credentials = Some(Credentials {
                client_id,
                client_secret,
            });
        }
        self
    }

    // client-credentials 模式获取访问令牌
    async fn access_token(&self, credentials: &Credentials) -> Result<String, CatalogError> {
        let resp = self
            .inner
            .post(TOKEN_URL)
            .basic_auth(&credentials.client_id, Some(&credentials.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;
        let token: TokenResponse = Self::decode(resp).await?;
        debug!("获取到访问令牌，有效期 {}s", token.expires_in);
        Ok(token.access_token)
    }

    async fn lookup_api(
        &self,
        credentials: &Credentials,
        kind: UrlKind,
        id: &str,
    ) -> Result<CatalogEntry, CatalogError> {
        let token = self.access_token(credentials).await?;
        let endpoint = match kind {
            UrlKind::Album => "albums",
            UrlKind::Playlist => "playlists",
            other => return Err(CatalogError::Unsupported(other.to_string())),
        };
        let url = Url::parse(&format!("{}/{}/{}", API_BASE, endpoint, id))?;
        let resp = self.inner.get(url).bearer_auth(token).send().await?;

        let entry = match kind {
            UrlKind::Album => CatalogEntry::from(Self::decode::<AlbumResponse>(resp).await?),
            _ => CatalogEntry::from(Self::decode::<PlaylistResponse>(resp).await?),
        };
        Ok(entry)
    }

    async fn lookup_oembed(&self, kind: UrlKind, id: &str) -> Result<CatalogEntry, CatalogError> {
        let target = format!("https://open.spotify.com/{}/{}", kind.as_str(), id);
        let url = Url::parse_with_params(OEMBED_URL, &[("url", target.as_str())])?;
        let resp = self.inner.get(url).send().await?;
        let embed: OEmbedResponse = Self::decode(resp).await?;
        Ok(embed.into())
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, CatalogError> {
        let status = resp.status();
        if !status.is_success() {
            return Err(CatalogError::Status(status.as_u16()));
        }
        let body = resp.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl CatalogLookup for SpotifyCatalog {
    async fn lookup(&self, kind: UrlKind, id: &str) -> Result<CatalogEntry, CatalogError> {
        if !kind.is_collection() {
            return Err(CatalogError::Unsupported(kind.to_string()));
        }

        let mut entry = match &self.credentials {
            Some(credentials) => self.lookup_api(credentials, kind, id).await?,
            None => self.lookup_oembed(kind, id).await?,
        };
        entry.name = sanitize_name(&entry.name);
        if entry.name.is_empty() {
            return Err(CatalogError::InvalidResponse("empty name".to_string()));
        }

        info!(
            "{}: {} by {}",
            kind,
            entry.name,
            entry.owner.as_deref().unwrap_or("Unknown")
        );
        Ok(entry)
    }
}

/// 去掉首尾引号，替换文件系统不允许的字符，截断到 100 个字符
pub fn sanitize_name(name: &str) -> String {
    let stripped = name.trim().trim_matches(|c: char| c == '"' || c == '\'');
    let replaced = UNSAFE_CHARS.replace_all(stripped, "_");
    replaced.trim().chars().take(MAX_NAME_LEN).collect()
}
