use colored::*;

use crate::downloader::models::{Task, TaskStatus};

/// 终端输出工具，和 `tracing` 的诊断日志分开
pub struct PrettyLogger;

impl PrettyLogger {
    /// 显示成功消息
    pub fn success(message: impl AsRef<str>) {
        println!("{} {}", "✓".green().bold(), message.as_ref());
    }

    /// 显示信息消息
    pub fn info(message: impl AsRef<str>) {
        println!("{} {}", "ℹ".blue().bold(), message.as_ref());
    }

    /// 显示警告消息
    pub fn warning(message: impl AsRef<str>) {
        println!("{} {}", "⚠".yellow().bold(), message.as_ref());
    }

    // 错误写到 stderr
    pub fn error(message: impl AsRef<str>) {
        eprintln!("{} {}", "✗".red().bold(), message.as_ref());
    }

    pub fn step_start(step: impl AsRef<str>) {
        println!("\n{} {}", "▶".cyan().bold(), step.as_ref().bold());
    }

    pub fn separator() {
        println!("{}", "─".repeat(60).bright_black());
    }

    /// 显示标题
    pub fn title(text: impl AsRef<str>) {
        let text = text.as_ref();
        let width = text.chars().count().min(56);
        let padding = (56 - width) / 2;
        println!(
            "{} {} {}",
            "─".repeat(padding).bright_black(),
            text.bold(),
            "─".repeat(56 - padding - width).bright_black()
        );
    }

    pub fn field(label: impl AsRef<str>, value: impl AsRef<str>) {
        println!("  {:<22} {}", label.as_ref().bold(), value.as_ref());
    }

    /// 带颜色的任务状态
    pub fn status_badge(status: TaskStatus) -> ColoredString {
        match status {
            TaskStatus::Running => status.as_str().cyan().bold(),
            TaskStatus::Searching => status.as_str().blue().bold(),
            TaskStatus::Completed => status.as_str().green().bold(),
            TaskStatus::Failed => status.as_str().red().bold(),
            TaskStatus::Cancelled => status.as_str().yellow().bold(),
        }
    }

    /// 任务列表中的一行：短 ID、状态、进度、曲目计数、链接
    pub fn task_row(task: &Task) {
        println!(
            "{:<10} {:<20} {:>4}%  {:>3}/{:<3} {}",
            task.short_id().bright_black(),
            Self::status_badge(task.status),
            task.progress,
            task.completed_items,
            task.total_items,
            task.url
        );
    }

    /// 任务结束后的总结
    pub fn task_summary(task: &Task) {
        Self::separator();
        Self::field("Task", &task.id);
        println!("  {:<22} {}", "Status".bold(), Self::status_badge(task.status));
        Self::field("Progress", format!("{}%", task.progress));
        Self::field(
            "Tracks",
            format!(
                "{} completed, {} failed, {} total",
                task.completed_items, task.failed_items, task.total_items
            ),
        );
        Self::field("Location", task.download_path.display().to_string());
        if !task.failed_item_log.is_empty() {
            println!("  {}", "Failed tracks:".red().bold());
            for line in &task.failed_item_log {
                println!("    {}", line.bright_black());
            }
        }
        Self::separator();
    }
}

/// 便捷宏用于漂亮的日志输出
#[macro_export]
macro_rules! log_success {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::success(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::info(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warning {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::warning(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::error(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_step {
    ($($arg:tt)*) => {
        $crate::common::logger::PrettyLogger::step_start(format!($($arg)*))
    };
}
