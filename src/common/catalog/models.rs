use serde::Deserialize;

/// 专辑或歌单的展示信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub name: String,
    // 专辑的艺人或歌单的创建者
    pub owner: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: u64,
}

#[derive(Debug, Deserialize)]
pub struct OEmbedResponse {
    pub title: String,
    #[serde(default)]
    pub author_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct NamedRef {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AlbumResponse {
    pub name: String,
    #[serde(default)]
    pub artists: Vec<NamedRef>,
}

#[derive(Debug, Deserialize)]
pub struct PlaylistResponse {
    pub name: String,
    #[serde(default)]
    pub owner: Option<NamedRef>,
}

impl From<AlbumResponse> for CatalogEntry {
    fn from(album: AlbumResponse) -> Self {
        Self {
            name: album.name,
            owner: album.artists.into_iter().next().and_then(|artist| artist.name),
        }
    }
}

impl From<PlaylistResponse> for CatalogEntry {
    fn from(playlist: PlaylistResponse) -> Self {
        Self {
            name: playlist.name,
            owner: playlist.owner.and_then(|owner| owner.display_name.or(owner.name)),
        }
    }
}

impl From<OEmbedResponse> for CatalogEntry {
    fn from(embed: OEmbedResponse) -> Self {
        Self {
            name: embed.title,
            owner: embed.author_name,
        }
    }
}
