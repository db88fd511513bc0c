use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{Level, debug, info};

use grovegrab::common::catalog::client::SpotifyCatalog;
use grovegrab::common::config::{AppConfig, ConfigStore, ConfigUpdate, validate_format};
use grovegrab::common::connectivity::TcpProbe;
use grovegrab::common::logger::PrettyLogger;
use grovegrab::downloader::{
    DownloadError, FailureKind, Task, TaskManager, TaskProgressView, TaskRegistry, TaskStatus, new_task_id,
};
use grovegrab::parser::classify_url;
use grovegrab::{log_error, log_info, log_step, log_success, log_warning};

mod cli;

use cli::{Cli, Command};

const WATCH_INTERVAL: Duration = Duration::from_millis(250);
const FOLLOW_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> ExitCode {
    let args = Cli::parse();

    // 诊断日志写到 stderr，不干扰进度条
    let level = match args.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            log_error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Cli) -> Result<ExitCode> {
    let store = ConfigStore::from_env().context("无法确定配置目录")?;
    debug!("配置目录: {:?}", store.root());

    match args.command {
        Command::Dl {
            url,
            output,
            format,
            plain,
            preload,
        } => download(&store, url, output, format, plain, preload).await,
        Command::Auth {
            client_id,
            client_secret,
            download_path,
            format,
            quality,
        } => {
            let update = ConfigUpdate {
                client_id,
                client_secret,
                default_download_path: download_path,
                audio_format: format,
                audio_quality: quality,
            };
            auth(&store, update)
        }
        Command::Config { show, reset } => config(&store, show, reset),
        Command::List { all } => list(&store, all),
        Command::Cancel { id } => cancel(&store, &id),
        Command::Retry { id, plain } => retry(&store, &id, plain).await,
        Command::Delete { id } => delete(&store, &id),
        Command::Logs { id, follow } => logs(&store, &id, follow).await,
        Command::Batch { file, workers } => batch(&store, file, workers).await,
        Command::Version => {
            println!("{} v{}", "GroveGrab CLI".cyan().bold(), env!("CARGO_PKG_VERSION"));
            println!("Built for music lovers");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn build_manager(store: &ConfigStore, config: AppConfig) -> Result<TaskManager> {
    let registry = TaskRegistry::open(store.tasks_dir())
        .with_context(|| format!("无法打开任务目录 {:?}", store.tasks_dir()))?;
    let catalog = SpotifyCatalog::new()
        .context("无法创建 HTTP 客户端")?
        .with_credentials(&config.client_id, &config.client_secret);

    Ok(TaskManager::new(
        Arc::new(registry),
        config,
        Arc::new(TcpProbe::default()),
        Arc::new(catalog),
    ))
}

// ID 前缀不唯一时列出所有候选
fn resolve_id(manager: &TaskManager, prefix: &str) -> Result<String> {
    match manager.resolve_task_id(prefix) {
        Err(DownloadError::AmbiguousTaskId(prefix)) => {
            log_warning!("Multiple tasks match: {}", prefix);
            for task in manager
                .get_all_tasks()
                .iter()
                .filter(|task| task.id.starts_with(&prefix))
            {
                println!("  - {}", task.short_id());
            }
            Err(DownloadError::AmbiguousTaskId(prefix).into())
        }
        other => Ok(other?),
    }
}

fn exit_code_for(task: &Task) -> ExitCode {
    match task.status {
        TaskStatus::Completed => ExitCode::SUCCESS,
        TaskStatus::Cancelled => ExitCode::from(130),
        _ => ExitCode::FAILURE,
    }
}

async fn download(
    store: &ConfigStore,
    url: String,
    output: Option<PathBuf>,
    format: Option<String>,
    plain: bool,
    preload: bool,
) -> Result<ExitCode> {
    let parsed = classify_url(&url)?;

    let mut config = store.load();
    if let Some(format) = format {
        validate_format(&format)?;
        config.audio_format = format;
    }
    if !config.has_credentials() {
        log_info!("No Spotify API credentials configured, album/playlist names use the public lookup");
        log_info!("Run `grovegrab auth --client-id ... --client-secret ...` to configure them");
    }

    let manager = build_manager(store, config)?.preload_only(preload);
    log_step!("Starting download: {}", parsed.kind);

    let task_id = new_task_id();
    let handle = manager.spawn_start(task_id.clone(), url, output);
    let task = watch(&manager, &task_id, handle, plain).await?;
    Ok(exit_code_for(&task))
}

/// 等待后台任务结束，期间刷新进度条（或逐行打印日志）。Ctrl-C 取消任务。
async fn watch(
    manager: &TaskManager,
    task_id: &str,
    mut handle: JoinHandle<Result<Task, DownloadError>>,
    plain: bool,
) -> Result<Task> {
    let interrupt = {
        let manager = manager.clone();
        let task_id = task_id.to_string();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log_warning!("Interrupted, cancelling task {}", task_id);
                manager.cancel(&task_id);
            }
        })
    };

    let mut view: Option<TaskProgressView> = None;
    let mut printed = 0usize;
    let mut ticker = tokio::time::interval(WATCH_INTERVAL);

    let joined = loop {
        tokio::select! {
            joined = &mut handle => break joined,
            _ = ticker.tick() => {
                let Some(task) = manager.get_task(task_id) else { continue };
                if plain {
                    printed = print_new_logs(&task, printed);
                } else {
                    view.get_or_insert_with(|| TaskProgressView::new(&task)).render(&task);
                }
            }
        }
    };
    interrupt.abort();

    let task = joined.context("下载任务异常退出")??;
    if plain {
        print_new_logs(&task, printed);
    } else {
        view.unwrap_or_else(|| TaskProgressView::new(&task)).finish(&task);
    }
    PrettyLogger::task_summary(&task);

    match task.status {
        TaskStatus::Completed => log_success!("Download completed: {}", task.download_path.display()),
        TaskStatus::Cancelled => log_warning!("Download cancelled"),
        _ if task.is_network_failure() => {
            log_error!("Download failed: network problem");
            log_info!("{}", FailureKind::Network.hint());
        }
        _ => {
            log_error!("Download failed, run `grovegrab logs {}` for details", task.short_id());
            if let Some(hint) = task.failure.map(|kind| kind.hint()) {
                log_info!("{}", hint);
            }
        }
    }
    Ok(task)
}

fn print_new_logs(task: &Task, printed: usize) -> usize {
    for line in task.logs.iter().skip(printed) {
        println!("{}", line);
    }
    task.logs.len().max(printed)
}

fn auth(store: &ConfigStore, update: ConfigUpdate) -> Result<ExitCode> {
    if update.is_empty() {
        log_warning!("Nothing to update");
        log_info!("Get free credentials at https://developer.spotify.com/dashboard");
        log_info!("Then run: grovegrab auth --client-id <ID> --client-secret <SECRET>");
        log_info!("Config location: {}", store.config_file().display());
        return Ok(ExitCode::FAILURE);
    }

    let config = store.update(update).context("保存配置失败")?;
    log_success!("Configuration saved to {}", store.config_file().display());
    if config.has_credentials() {
        log_info!("Spotify API credentials configured");
    }
    Ok(ExitCode::SUCCESS)
}

fn mask(secret: &str) -> String {
    if secret.is_empty() {
        return "(not set)".bright_black().to_string();
    }
    let visible: String = secret.chars().take(4).collect();
    format!("{}****", visible)
}

fn config(store: &ConfigStore, show: bool, reset: bool) -> Result<ExitCode> {
    if reset {
        store.reset().context("重置配置失败")?;
        log_success!("Configuration reset");
        return Ok(ExitCode::SUCCESS);
    }
    if !show {
        log_info!("Use --show to view or run 'grovegrab auth' to configure");
        return Ok(ExitCode::SUCCESS);
    }

    let config = store.load();
    PrettyLogger::title("Configuration");
    PrettyLogger::field("Client ID", mask(&config.client_id));
    PrettyLogger::field("Client Secret", mask(&config.client_secret));
    PrettyLogger::field("Redirect URI", &config.redirect_uri);
    PrettyLogger::field(
        "Download Path",
        config.default_download_path.display().to_string(),
    );
    PrettyLogger::field("Audio Format", &config.audio_format);
    PrettyLogger::field("Audio Quality", &config.audio_quality);
    PrettyLogger::field("Downloader", config.downloader_program());
    PrettyLogger::field("Config File", store.config_file().display().to_string());
    Ok(ExitCode::SUCCESS)
}

fn list(store: &ConfigStore, all: bool) -> Result<ExitCode> {
    let manager = build_manager(store, store.load())?;
    let tasks: Vec<Task> = manager
        .get_all_tasks()
        .into_iter()
        .filter(|task| all || task.status.is_active())
        .collect();

    if tasks.is_empty() {
        log_info!("No {}tasks", if all { "" } else { "running " });
        return Ok(ExitCode::SUCCESS);
    }

    println!(
        "{}",
        format!(
            "{:<10} {:<11} {:>5}  {:>7} {}",
            "ID", "STATUS", "PROG", "TRACKS", "URL"
        )
        .bold()
    );
    for task in &tasks {
        PrettyLogger::task_row(task);
    }
    Ok(ExitCode::SUCCESS)
}

fn cancel(store: &ConfigStore, prefix: &str) -> Result<ExitCode> {
    let manager = build_manager(store, store.load())?;
    let task_id = resolve_id(&manager, prefix)?;
    if manager.cancel(&task_id) {
        log_success!("Task {} cancelled", prefix);
        Ok(ExitCode::SUCCESS)
    } else {
        log_error!("Task not running");
        Ok(ExitCode::FAILURE)
    }
}

async fn retry(store: &ConfigStore, prefix: &str, plain: bool) -> Result<ExitCode> {
    let manager = build_manager(store, store.load())?;
    let task_id = resolve_id(&manager, prefix)?;
    match manager.spawn_retry(&task_id) {
        Some(handle) => {
            log_success!("Task {} restarted", prefix);
            let task = watch(&manager, &task_id, handle, plain).await?;
            Ok(exit_code_for(&task))
        }
        None => {
            log_error!("Task not failed");
            Ok(ExitCode::FAILURE)
        }
    }
}

fn delete(store: &ConfigStore, prefix: &str) -> Result<ExitCode> {
    let manager = build_manager(store, store.load())?;
    let task_id = resolve_id(&manager, prefix)?;
    if manager.delete(&task_id) {
        log_success!("Task {} deleted", prefix);
        Ok(ExitCode::SUCCESS)
    } else {
        log_error!("Task not found: {}", prefix);
        Ok(ExitCode::FAILURE)
    }
}

async fn logs(store: &ConfigStore, prefix: &str, follow: bool) -> Result<ExitCode> {
    let manager = build_manager(store, store.load())?;
    let task_id = resolve_id(&manager, prefix)?;
    let Some(task) = manager.get_task(&task_id) else {
        log_error!("Task not found: {}", prefix);
        return Ok(ExitCode::FAILURE);
    };

    let mut printed = print_new_logs(&task, 0);
    if !follow || task.status.is_terminal() {
        return Ok(ExitCode::SUCCESS);
    }

    // 任务可能由另一个进程在更新，直接轮询任务文件
    info!("跟踪任务日志: {}", task_id);
    let mut ticker = tokio::time::interval(FOLLOW_INTERVAL);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let Some(task) = manager.registry().read_from_disk(&task_id) else { break };
                printed = print_new_logs(&task, printed);
                if task.status.is_terminal() {
                    break;
                }
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn batch(store: &ConfigStore, file: PathBuf, workers: usize) -> Result<ExitCode> {
    let content = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("File not found: {}", file.display()))?;

    let mut urls = Vec::new();
    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match classify_url(line) {
            Ok(_) => urls.push(line.to_string()),
            Err(e) => log_warning!("Skipping {}: {}", line, e),
        }
    }
    if urls.is_empty() {
        log_error!("No URLs found in file");
        return Ok(ExitCode::FAILURE);
    }

    log_step!("Found {} URLs, downloading with {} workers", urls.len(), workers.max(1));
    let manager = build_manager(store, store.load())?;

    let mut failures = 0usize;
    let mut results = Box::pin(manager.batch(urls, workers));
    while let Some((url, result)) = results.next().await {
        match result {
            Ok(task) if task.status == TaskStatus::Completed => log_success!(
                "{} ({} tracks) -> {}",
                url,
                task.completed_items,
                task.download_path.display()
            ),
            Ok(task) => {
                failures += 1;
                log_error!("{} {} (task {})", url, task.status, task.short_id());
            }
            Err(e) => {
                failures += 1;
                log_error!("{}: {}", url, e);
            }
        }
    }

    if failures == 0 {
        Ok(ExitCode::SUCCESS)
    } else {
        log_warning!("{} downloads did not complete", failures);
        Ok(ExitCode::FAILURE)
    }
}
