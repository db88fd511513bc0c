use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub const SUPPORTED_FORMATS: &[&str] = &["mp3", "flac", "ogg", "opus", "m4a"];
pub const SUPPORTED_QUALITIES: &[&str] = &["128k", "192k", "256k", "320k"];

const APP_DIR_NAME: &str = "grovegrab";
const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported audio format `{0}` (expected one of: mp3, flac, ogg, opus, m4a)")]
    UnsupportedFormat(String),

    #[error("Unsupported audio quality `{0}` (expected one of: 128k, 192k, 256k, 320k)")]
    UnsupportedQuality(String),

    #[error("Cannot determine the user config directory")]
    NoConfigDir,
}

/// 用户配置，保存在 `config.json`。缺失的字段取默认值。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub default_download_path: PathBuf,
    pub audio_format: String,
    pub audio_quality: String,
    /// 下载器程序，`SPOTDL_PATH` 环境变量优先
    pub downloader: String,
    /// 放在链接之前的额外参数
    pub downloader_args: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            redirect_uri: "http://localhost:8888/callback".to_string(),
            default_download_path: default_download_path(),
            audio_format: "mp3".to_string(),
            audio_quality: "320k".to_string(),
            downloader: "spotdl".to_string(),
            downloader_args: Vec::new(),
        }
    }
}

impl AppConfig {
    pub fn has_credentials(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }

    pub fn downloader_program(&self) -> String {
        std::env::var("SPOTDL_PATH")
            .ok()
            .filter(|path| !path.trim().is_empty())
            .unwrap_or_else(|| self.downloader.clone())
    }

    // 应用一组可选修改，先校验再写入
    pub fn apply(&mut self, update: ConfigUpdate) -> Result<(), ConfigError> {
        if let Some(format) = &update.audio_format {
            validate_format(format)?;
        }
        if let Some(quality) = &update.audio_quality {
            validate_quality(quality)?;
        }

        if let Some(client_id) = update.client_id {
            self.client_id = client_id;
        }
        if let Some(client_secret) = update.client_secret {
            self.client_secret = client_secret;
        }
        if let Some(path) = update.default_download_path {
            self.default_download_path = path;
        }
        if let Some(format) = update.audio_format {
            self.audio_format = format;
        }
        if let Some(quality) = update.audio_quality {
            self.audio_quality = quality;
        }
        Ok(())
    }
}

pub fn validate_format(format: &str) -> Result<(), ConfigError> {
    if SUPPORTED_FORMATS.contains(&format) {
        Ok(())
    } else {
        Err(ConfigError::UnsupportedFormat(format.to_string()))
    }
}

pub fn validate_quality(quality: &str) -> Result<(), ConfigError> {
    if SUPPORTED_QUALITIES.contains(&quality) {
        Ok(())
    } else {
        Err(ConfigError::UnsupportedQuality(quality.to_string()))
    }
}

// Termux 下放到共享存储，其他平台放到 ~/Music
fn default_download_path() -> PathBuf {
    let termux = std::env::var("PREFIX")
        .map(|prefix| prefix.contains("com.termux"))
        .unwrap_or(false);
    if termux {
        return PathBuf::from("/storage/emulated/0/Music/GroveGrab");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Music")
        .join("GroveGrab")
}

#[derive(Debug, Clone, Default)]
pub struct ConfigUpdate {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub default_download_path: Option<PathBuf>,
    pub audio_format: Option<String>,
    pub audio_quality: Option<String>,
}

impl ConfigUpdate {
    pub fn is_empty(&self) -> bool {
        self.client_id.is_none()
            && self.client_secret.is_none()
            && self.default_download_path.is_none()
            && self.audio_format.is_none()
            && self.audio_quality.is_none()
    }
}

/// 配置目录：`config.json` 和 `tasks/` 都在这里
#[derive(Debug, Clone)]
pub struct ConfigStore {
    root: PathBuf,
}

impl ConfigStore {
    /// `GROVEGRAB_HOME` 优先，否则使用系统的用户配置目录
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(home) = std::env::var("GROVEGRAB_HOME") {
            if !home.trim().is_empty() {
                return Ok(Self::new(home));
            }
        }
        let base = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(Self::new(base.join(APP_DIR_NAME)))
    }

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE_NAME)
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.root.join("tasks")
    }

    /// 读取配置。文件不存在时写入默认配置，文件损坏时使用默认值（不覆盖原文件）。
    pub fn load(&self) -> AppConfig {
        let path = self.config_file();
        match std::fs::read(&path) {
            Ok(data) => match serde_json::from_slice(&data) {
                Ok(config) => config,
                Err(e) => {
                    warn!("配置文件损坏，使用默认配置 {:?}: {}", path, e);
                    AppConfig::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = AppConfig::default();
                if let Err(e) = self.save(&config) {
                    warn!("写入默认配置失败 {:?}: {}", path, e);
                }
                config
            }
            Err(e) => {
                warn!("读取配置失败，使用默认配置 {:?}: {}", path, e);
                AppConfig::default()
            }
        }
    }

    pub fn save(&self, config: &AppConfig) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.root)?;
        let data = serde_json::to_string_pretty(config)?;
        std::fs::write(self.config_file(), data)?;
        debug!("配置已保存: {:?}", self.config_file());
        Ok(())
    }

    pub fn update(&self, update: ConfigUpdate) -> Result<AppConfig, ConfigError> {
        let mut config = self.load();
        config.apply(update)?;
        self.save(&config)?;
        Ok(config)
    }

    pub fn reset(&self) -> Result<AppConfig, ConfigError> {
        let config = AppConfig::default();
        self.save(&config)?;
        Ok(config)
    }
}
