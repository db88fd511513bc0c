use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

// --------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Running,
    Searching, // 正在获取专辑/歌单信息，仍属于运行中
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Searching)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// 合法的状态迁移：运行中只能向前走，失败的任务只能通过重试回到运行中
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Running, Searching | Completed | Failed | Cancelled)
                | (Searching, Completed | Failed | Cancelled)
                | (Failed, Running)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Searching => "searching",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Queued,
    Searching,
    Downloading,
    Completed,
    Failed,
    Cancelled,
}

impl ItemStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Searching => "searching",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 任务失败的原因分类，网络问题和下载器本身的问题给用户的提示不同
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Network,
    Launch,
    Downloader,
}

impl FailureKind {
    /// 给用户的下一步建议
    pub fn hint(&self) -> &'static str {
        match self {
            Self::Network => "Check your internet connection, then run `grovegrab retry`",
            Self::Launch => "Make sure spotdl is installed, or point SPOTDL_PATH at it",
            Self::Downloader => "The downloader reported an error, see `grovegrab logs` for details",
        }
    }
}

// 单首曲目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub title: String,
    pub status: ItemStatus,
    pub progress: u8,
}

impl Item {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            status: ItemStatus::Queued,
            progress: 0,
        }
    }
}

// --------------------------------------------------------------------

/// 一次下载任务的完整记录，也是落盘的格式。
///
/// 曲目没有稳定的 ID，只能按标题识别：同一任务里标题相同的两首歌会被合并成一条。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub url: String,
    pub status: TaskStatus,
    pub progress: u8,
    pub total_items: usize,
    pub completed_items: usize,
    pub failed_items: usize,
    pub current_item: String,
    pub items: Vec<Item>,
    pub download_path: PathBuf,
    pub logs: Vec<String>,
    pub failed_item_log: Vec<String>,
    pub created_at: DateTime<Local>,
    pub updated_at: DateTime<Local>,
    pub cancel_requested: bool,
    #[serde(default)]
    pub failure: Option<FailureKind>,
}

impl Task {
    pub fn new(id: impl Into<String>, url: impl Into<String>, download_path: PathBuf) -> Self {
        let now = Local::now();
        Self {
            id: id.into(),
            url: url.into(),
            status: TaskStatus::Running,
            progress: 0,
            total_items: 0,
            completed_items: 0,
            failed_items: 0,
            current_item: String::new(),
            items: Vec::new(),
            download_path,
            logs: Vec::new(),
            failed_item_log: Vec::new(),
            created_at: now,
            updated_at: now,
            cancel_requested: false,
            failure: None,
        }
    }

    pub fn is_network_failure(&self) -> bool {
        self.status == TaskStatus::Failed && self.failure == Some(FailureKind::Network)
    }

    pub fn short_id(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }

    pub fn touch(&mut self) {
        self.updated_at = Local::now();
    }

    // 追加一条带时间戳的日志
    pub fn push_log(&mut self, message: impl AsRef<str>) {
        let entry = format!("[{}] {}", Local::now().format("%H:%M:%S"), message.as_ref());
        self.logs.push(entry);
        self.touch();
    }

    pub fn find_item(&self, title: &str) -> Option<usize> {
        let key = title.trim();
        self.items.iter().position(|item| item.title.trim() == key)
    }

    // 按标题查找曲目，不存在时追加到末尾
    pub fn ensure_item(&mut self, title: &str) -> usize {
        match self.find_item(title) {
            Some(index) => index,
            None => {
                self.items.push(Item::new(title.trim()));
                self.items.len() - 1
            }
        }
    }

    /// 总进度 = 各曲目进度的平均值（四舍五入），没有曲目时为 0
    pub fn recompute_progress(&mut self) {
        if self.items.is_empty() {
            self.progress = 0;
            return;
        }
        let sum: u32 = self.items.iter().map(|item| u32::from(item.progress)).sum();
        let mean = f64::from(sum) / self.items.len() as f64;
        self.progress = mean.round().min(100.0) as u8;
        self.total_items = self.items.len();
    }

    // 进程正常退出：下载器不会逐首报告完成，没有失败的都算完成
    pub fn complete_remaining_items(&mut self) {
        for item in self.items.iter_mut() {
            if item.status != ItemStatus::Failed {
                item.status = ItemStatus::Completed;
                item.progress = 100;
            }
        }
        let completed = self
            .items
            .iter()
            .filter(|item| item.status == ItemStatus::Completed)
            .count();
        self.completed_items = self.completed_items.max(completed);
        self.recompute_progress();
        self.touch();
    }

    /// 请求取消；只有运行中的任务可以取消
    pub fn request_cancel(&mut self) -> bool {
        if !self.status.is_active() {
            return false;
        }
        self.cancel_requested = true;
        self.status = TaskStatus::Cancelled;
        for item in self.items.iter_mut() {
            if matches!(item.status, ItemStatus::Queued | ItemStatus::Downloading) {
                item.status = ItemStatus::Cancelled;
            }
        }
        self.current_item.clear();
        self.recompute_progress();
        self.touch();
        true
    }

    /// 重试前的准备：清空失败计数和失败日志，回到运行中。
    /// 返回重新启动所需的链接和下载目录。
    pub fn prepare_retry(&mut self) -> Option<(String, PathBuf)> {
        if self.status != TaskStatus::Failed {
            return None;
        }
        self.failed_items = 0;
        self.failed_item_log.clear();
        self.failure = None;
        self.status = TaskStatus::Running;
        self.touch();
        Some((self.url.clone(), self.download_path.clone()))
    }

    // 新一轮运行开始，清空本轮相关的字段（日志保留）
    pub fn reset_for_run(&mut self) {
        self.items.clear();
        self.total_items = 0;
        self.completed_items = 0;
        self.failed_items = 0;
        self.failed_item_log.clear();
        self.current_item.clear();
        self.progress = 0;
        self.failure = None;
        self.touch();
    }
}
