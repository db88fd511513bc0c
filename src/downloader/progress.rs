use std::collections::HashMap;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use super::models::{ItemStatus, Task, TaskStatus};

const MAIN_TEMPLATE: &str =
    "{spinner:.green} {prefix:.bold} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}";
const ITEM_TEMPLATE: &str = "  {prefix:<12.dim} [{bar:30.green/white}] {pos:>3}% {msg}";

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

/// 根据任务快照刷新终端进度条：一条总进度，每首曲目一条
pub struct TaskProgressView {
    multi_pb: MultiProgress,
    main_pb: ProgressBar,
    item_pbs: HashMap<String, ProgressBar>,
}

impl TaskProgressView {
    pub fn new(task: &Task) -> Self {
        let multi_pb = MultiProgress::new();
        let main_pb = multi_pb.add(ProgressBar::new(100));
        main_pb.set_style(style(MAIN_TEMPLATE));
        main_pb.set_prefix(task.short_id().to_string());

        Self {
            multi_pb,
            main_pb,
            item_pbs: HashMap::new(),
        }
    }

    pub fn render(&mut self, task: &Task) {
        self.main_pb.set_position(u64::from(task.progress));
        let message = match task.status {
            TaskStatus::Searching => "fetching track list...".to_string(),
            _ if !task.current_item.is_empty() => task.current_item.clone(),
            _ => task.status.to_string(),
        };
        self.main_pb.set_message(format!(
            "{}/{} {}",
            task.completed_items, task.total_items, message
        ));
        self.main_pb.tick();

        for item in &task.items {
            let pb = self.item_pbs.entry(item.title.clone()).or_insert_with(|| {
                let pb = self.multi_pb.add(ProgressBar::new(100));
                pb.set_style(style(ITEM_TEMPLATE));
                pb.set_message(item.title.clone());
                pb
            });
            pb.set_prefix(item.status.to_string());
            pb.set_position(u64::from(item.progress));
            if item.status.is_terminal() && !pb.is_finished() {
                match item.status {
                    ItemStatus::Completed => pb.finish(),
                    _ => pb.abandon(),
                }
            }
        }
    }

    /// 任务结束：最后刷新一次并停止所有进度条
    pub fn finish(mut self, task: &Task) {
        self.render(task);
        for pb in self.item_pbs.values() {
            if !pb.is_finished() {
                pb.abandon();
            }
        }
        let message = format!("{} ({} tracks)", task.status, task.completed_items);
        match task.status {
            TaskStatus::Completed => self.main_pb.finish_with_message(message),
            _ => self.main_pb.abandon_with_message(message),
        }
    }
}
