#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use grovegrab::common::catalog::client::CatalogLookup;
use grovegrab::common::catalog::error::CatalogError;
use grovegrab::common::catalog::models::CatalogEntry;
use grovegrab::common::config::AppConfig;
use grovegrab::common::connectivity::ConnectivityProbe;
use grovegrab::downloader::{Task, TaskManager, TaskRegistry};
use grovegrab::parser::models::UrlKind;
use tempfile::TempDir;

pub const TRACK_URL: &str = "https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC";
pub const ALBUM_URL: &str = "https://open.spotify.com/album/4aawyAB9vmqN3uQ7FjRGTy";
pub const PLAYLIST_URL: &str = "https://open.spotify.com/playlist/37i9dQZF1DXcBWIGoYBM5M";

pub struct StaticProbe(pub bool);

#[async_trait]
impl ConnectivityProbe for StaticProbe {
    async fn is_online(&self) -> bool {
        self.0
    }
}

/// 返回固定名称的目录查询；`None` 表示查询失败
pub struct StaticCatalog {
    pub name: Option<String>,
    pub delay: Duration,
}

impl StaticCatalog {
    pub fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            delay: Duration::ZERO,
        }
    }

    pub fn failing() -> Self {
        Self {
            name: None,
            delay: Duration::ZERO,
        }
    }

    // 模拟较慢的网络查询，给并发操作留出窗口
    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl CatalogLookup for StaticCatalog {
    async fn lookup(&self, _kind: UrlKind, _id: &str) -> Result<CatalogEntry, CatalogError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.name {
            Some(name) => Ok(CatalogEntry {
                name: name.clone(),
                owner: Some("Test Artist".to_string()),
            }),
            None => Err(CatalogError::Status(404)),
        }
    }
}

/// 用 `sh -c` 脚本代替下载器。脚本里 `$1` 是链接，`$3` 是输出目录。
pub fn script_config(root: &Path, script: &str) -> AppConfig {
    AppConfig {
        default_download_path: root.join("music"),
        downloader: "sh".to_string(),
        downloader_args: vec!["-c".to_string(), script.to_string(), "spotdl".to_string()],
        ..AppConfig::default()
    }
}

pub struct Harness {
    pub dir: TempDir,
    pub manager: TaskManager,
}

impl Harness {
    pub fn new(script: &str, online: bool, catalog: StaticCatalog) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(TaskRegistry::open(dir.path().join("tasks")).unwrap());
        let manager = TaskManager::new(
            registry,
            script_config(dir.path(), script),
            Arc::new(StaticProbe(online)),
            Arc::new(catalog),
        );
        Self { dir, manager }
    }

    pub fn online(script: &str) -> Self {
        Self::new(script, true, StaticCatalog::failing())
    }

    pub fn music_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("music")
    }
}

#[cfg(unix)]
pub fn process_alive(pid: i32) -> bool {
    // SAFETY: 信号 0 只检查进程是否存在
    unsafe { libc::kill(pid, 0) == 0 }
}

/// 轮询直到条件成立，最多等 `timeout`
pub async fn wait_until(
    manager: &TaskManager,
    task_id: &str,
    timeout: Duration,
    predicate: impl Fn(&Task) -> bool,
) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if manager.get_task(task_id).is_some_and(|task| predicate(&task)) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

pub fn has_log(task: &Task, needle: &str) -> bool {
    task.logs.iter().any(|line| line.contains(needle))
}
