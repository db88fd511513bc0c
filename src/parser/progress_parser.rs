use lazy_static::lazy_static;
use regex::Regex;

use crate::downloader::models::{ItemStatus, Task, TaskStatus};

lazy_static! {
    static ref TOTAL_PATTERN: Regex = Regex::new(r"(?i)found\s+(\d+)\s+(?:songs?|tracks?)").unwrap();
    static ref PERCENT_PATTERN: Regex = Regex::new(r"(\d{1,3})%").unwrap();
    static ref BARE_PERCENT: Regex = Regex::new(r"^\d{1,3}%$").unwrap();

    // 标题提取，按顺序尝试，第一个匹配的生效
    static ref TITLE_PATTERNS: Vec<Regex> = vec![
        // 双引号中的内容（最常见）
        Regex::new(r#""([^"\n]+)""#).unwrap(),
        Regex::new(r#"(?i)searching youtube music for "([^"]+)""#).unwrap(),
        Regex::new(r#"(?i)found youtube url for "([^"]+)""#).unwrap(),
        // "Downloading: 标题 45%"，去掉结尾的百分比
        Regex::new(r"(?i)(?:downloading|processing)[:\s]+(.+?)(?:\s+\d{1,3}%.*)?$").unwrap(),
    ];
}

/// 启发式的阶段进度，只用于展示
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InferenceSettings {
    pub searching_progress: u8,
    pub url_found_progress: u8,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            searching_progress: 25,
            url_found_progress: 50,
        }
    }
}

/// 从一行输出中提取出的信息，所有规则共享
#[derive(Debug, Clone)]
pub struct LineFacts<'a> {
    pub line: &'a str,
    pub lowered: String,
    pub title: Option<String>,
    pub percent: Option<u8>,
}

impl<'a> LineFacts<'a> {
    pub fn extract(line: &'a str) -> Self {
        Self {
            line,
            lowered: line.to_lowercase(),
            title: extract_title(line),
            percent: extract_percent(line),
        }
    }

    fn contains_any(&self, needles: &[&str]) -> bool {
        needles.iter().any(|needle| self.lowered.contains(needle))
    }

    // 具体标题优先，否则回退到当前曲目
    fn target_title(&self, task: &Task) -> Option<String> {
        self.title.clone().or_else(|| {
            let current = task.current_item.trim();
            (!current.is_empty()).then(|| current.to_string())
        })
    }
}

pub fn extract_title(line: &str) -> Option<String> {
    TITLE_PATTERNS
        .iter()
        .find_map(|pattern| pattern.captures(line))
        .map(|caps| caps[1].trim().trim_end_matches(':').trim().to_string())
        .filter(|title| !title.is_empty() && !BARE_PERCENT.is_match(title))
}

pub fn extract_percent(line: &str) -> Option<u8> {
    PERCENT_PATTERN
        .captures(line)
        .and_then(|caps| caps[1].parse::<u16>().ok())
        .map(|value| value.min(100) as u8)
}

type PhaseRule = fn(&LineFacts<'_>, &mut Task, &InferenceSettings);

/// 阶段规则表。每一行都会依次经过全部规则，命中的都会执行，
/// 一行可能同时是 "downloading" 行又带百分比。
pub const PHASE_RULES: &[(&str, PhaseRule)] = &[
    ("total_count", apply_total_count),
    ("fetching_collection", apply_fetching_collection),
    ("searching", apply_searching),
    ("downloading", apply_downloading),
    ("url_found", apply_url_found),
    ("completed", apply_completed),
    ("failed", apply_failed),
];

fn apply_total_count(facts: &LineFacts<'_>, task: &mut Task, _: &InferenceSettings) {
    if let Some(caps) = TOTAL_PATTERN.captures(facts.line) {
        if let Ok(total) = caps[1].parse::<usize>() {
            if total > task.total_items {
                task.total_items = total;
            }
        }
    }
}

fn apply_fetching_collection(facts: &LineFacts<'_>, task: &mut Task, _: &InferenceSettings) {
    if facts.contains_any(&["fetching album", "fetching playlist"])
        && task.status == TaskStatus::Running
    {
        task.status = TaskStatus::Searching;
    }
}

fn apply_searching(facts: &LineFacts<'_>, task: &mut Task, settings: &InferenceSettings) {
    if !facts.lowered.contains("searching youtube music") {
        return;
    }
    let Some(title) = &facts.title else { return };

    let index = task.ensure_item(title);
    let item = &mut task.items[index];
    if item.status == ItemStatus::Queued {
        item.status = ItemStatus::Searching;
        item.progress = settings.searching_progress;
    }
    task.current_item = title.clone();
    if task.total_items == 0 {
        task.total_items = task.items.len();
    }
}

fn apply_downloading(facts: &LineFacts<'_>, task: &mut Task, _: &InferenceSettings) {
    if !facts.contains_any(&["downloading", "processing"]) {
        return;
    }
    let Some(title) = &facts.title else { return };

    task.current_item = title.clone();
    let index = task.ensure_item(title);
    let item = &mut task.items[index];
    if item.status.is_terminal() {
        return;
    }
    item.status = ItemStatus::Downloading;
    if let Some(percent) = facts.percent {
        item.progress = percent;
    }
}

fn apply_url_found(facts: &LineFacts<'_>, task: &mut Task, settings: &InferenceSettings) {
    if !facts.lowered.contains("found youtube url") {
        return;
    }
    let Some(title) = &facts.title else { return };

    let index = task.ensure_item(title);
    let item = &mut task.items[index];
    if !item.status.is_terminal() {
        item.status = ItemStatus::Downloading;
        item.progress = settings.url_found_progress;
    }
}

// 已经结束（完成/失败/取消）的曲目不会再被计数，保证重复的行不会重复计数
fn apply_completed(facts: &LineFacts<'_>, task: &mut Task, _: &InferenceSettings) {
    if !facts.contains_any(&["downloaded", "completed"]) {
        return;
    }
    let Some(title) = facts.target_title(task) else { return };

    let index = task.ensure_item(&title);
    let item = &mut task.items[index];
    if item.status.is_terminal() {
        return;
    }
    item.status = ItemStatus::Completed;
    item.progress = 100;
    task.completed_items += 1;
}

fn apply_failed(facts: &LineFacts<'_>, task: &mut Task, _: &InferenceSettings) {
    if !facts.contains_any(&["failed", "error"]) {
        return;
    }
    let Some(title) = facts.target_title(task) else { return };

    let index = task.ensure_item(&title);
    let item = &mut task.items[index];
    if item.status.is_terminal() {
        return;
    }
    item.status = ItemStatus::Failed;
    if facts.percent.is_none() {
        item.progress = 0;
    }
    task.failed_items += 1;
    task.failed_item_log.push(facts.line.to_string());
}

/// 进度推断引擎：把一行自由文本映射为任务状态的变化。
/// 不认识的行不做任何修改（只刷新 `updated_at`），永不报错。
#[derive(Debug, Clone, Default)]
pub struct ProgressParser {
    settings: InferenceSettings,
}

impl ProgressParser {
    pub fn new(settings: InferenceSettings) -> Self {
        Self { settings }
    }

    pub fn apply(&self, task: &mut Task, line: &str) {
        let facts = LineFacts::extract(line);
        for (_name, rule) in PHASE_RULES {
            rule(&facts, task, &self.settings);
        }
        task.recompute_progress();
        task.touch();
    }
}
