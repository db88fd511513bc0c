use thiserror::Error;

use super::models::FailureKind;
use crate::parser::errors::ParseError;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error(transparent)]
    InvalidUrl(#[from] ParseError),

    #[error("Invalid task id: {0}")]
    InvalidTaskId(String),

    #[error("No internet connection detected. Please check your network and try again.")]
    NoConnectivity,

    #[error("Network connectivity issues - DNS resolution failed ({0} errors)")]
    DnsFailure(usize),

    #[error("Network error: Cannot resolve Spotify/YouTube domains. Check your internet connection.")]
    NameResolution,

    #[error("Failed to launch `{program}`: {reason}")]
    Launch { program: String, reason: String },

    #[error("Process exited with code {0}")]
    ExitCode(i32),

    #[error("Process was terminated by a signal")]
    Terminated,

    #[error("Cancelled by user")]
    Cancelled,

    #[error("Task is already running: {0}")]
    AlreadyRunning(String),

    #[error("Task {0} has already finished and cannot be restarted")]
    TaskFinished(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task id `{0}` matches multiple tasks")]
    AmbiguousTaskId(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DownloadError {
    /// 网络类错误，调用方可以提示用户检查网络
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            Self::NoConnectivity | Self::DnsFailure(_) | Self::NameResolution
        )
    }

    /// 写入任务记录的失败分类
    pub fn failure_kind(&self) -> FailureKind {
        if self.is_connectivity() {
            FailureKind::Network
        } else if matches!(self, Self::Launch { .. }) {
            FailureKind::Launch
        } else {
            FailureKind::Downloader
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    // 子进程启动或等待时的 IO 错误，域名解析失败改写为更明确的提示
    pub fn from_process_error(program: &str, error: std::io::Error) -> Self {
        let reason = error.to_string();
        if is_name_resolution_message(&reason) {
            return Self::NameResolution;
        }
        let reason = if error.kind() == std::io::ErrorKind::NotFound {
            format!("{} (is it installed and on PATH?)", reason)
        } else {
            reason
        };
        Self::Launch {
            program: program.to_string(),
            reason,
        }
    }
}

pub fn is_name_resolution_message(message: &str) -> bool {
    message.contains("getaddrinfo failed") || message.contains("Failed to resolve")
}
