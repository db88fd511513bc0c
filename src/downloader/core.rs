use std::io::PipeReader;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
#[cfg(unix)]
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::DownloadError;
use super::registry::TaskRegistry;
use crate::common::config::AppConfig;
use crate::parser::{LineBuffer, ProgressParser};

// 下载器自身的无关输出（缓存、弃用警告），直接丢弃
const NOISE_PATTERNS: &[&str] = &[
    "Couldn't read cache",
    "Couldn't write token to cache",
    "pkg_resources is deprecated",
    "import pkg_resources",
    "UserWarning",
    "argument_parser.py",
    "Refrain from using this package",
];

const DNS_PATTERNS: &[&str] = &["getaddrinfo failed", "Failed to resolve"];
const RESET_PATTERNS: &[&str] = &["ConnectionResetError", "Connection broken"];

/// DNS 错误超过这个次数，进程退出后按网络故障处理
pub const DNS_FAILURE_THRESHOLD: usize = 10;

/// SIGTERM 之后等待子进程退出的时间，超时强制杀死
pub const TERMINATION_GRACE: Duration = Duration::from_secs(2);

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x08000000;

/// 一次下载器调用的完整命令行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl DownloadCommand {
    /// `<tool> <url> [--output <dir>] [--output-format <fmt>]`，预加载模式只传链接
    pub fn build(
        config: &AppConfig,
        url: &str,
        download_path: Option<&Path>,
        preload_only: bool,
    ) -> Self {
        let mut args = config.downloader_args.clone();
        args.push(url.to_string());

        if !preload_only {
            if let Some(path) = download_path {
                args.push("--output".to_string());
                args.push(path.to_string_lossy().into_owned());
            }
            args.push("--output-format".to_string());
            args.push(config.audio_format.clone());
        }

        Self {
            program: config.downloader_program(),
            args,
        }
    }

    // 日志里只显示程序名和第一个参数
    pub fn summary(&self) -> String {
        match self.args.first() {
            Some(first) => format!("{} {}", self.program, first),
            None => self.program.clone(),
        }
    }
}

/// 单行输出的分类结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Noise,
    Dns,
    ConnectionReset,
    Output,
}

pub fn classify_line(line: &str) -> LineKind {
    if NOISE_PATTERNS.iter().any(|p| line.contains(p)) {
        LineKind::Noise
    } else if DNS_PATTERNS.iter().any(|p| line.contains(p)) {
        LineKind::Dns
    } else if RESET_PATTERNS.iter().any(|p| line.contains(p)) {
        LineKind::ConnectionReset
    } else {
        LineKind::Output
    }
}

enum LoopExit {
    Drained,
    Cancelled,
}

// 进程结束（无论成功、失败还是 panic 展开）时从活动表中移除
struct ProcessGuard<'a> {
    active: &'a DashMap<String, CancellationToken>,
    task_id: String,
}

impl Drop for ProcessGuard<'_> {
    fn drop(&mut self) {
        self.active.remove(&self.task_id);
        debug!("进程已注销: {}", self.task_id);
    }
}

/// 子进程监管：启动下载器、逐行解析输出、响应取消。
///
/// 每个任务同一时间最多一个活动进程，取消令牌保存在 `active` 中，
/// 子进程长时间没有输出时也能被及时唤醒。
#[derive(Debug)]
pub struct Supervisor {
    registry: Arc<TaskRegistry>,
    parser: ProgressParser,
    active: DashMap<String, CancellationToken>,
}

impl Supervisor {
    pub fn new(registry: Arc<TaskRegistry>, parser: ProgressParser) -> Self {
        Self {
            registry,
            parser,
            active: DashMap::new(),
        }
    }

    pub fn is_running(&self, task_id: &str) -> bool {
        self.active.contains_key(task_id)
    }

    /// 通知正在运行的进程退出，没有活动进程时返回 false
    pub fn signal_termination(&self, task_id: &str) -> bool {
        match self.active.get(task_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn run(&self, task_id: &str, command: &DownloadCommand) -> Result<(), DownloadError> {
        let token = CancellationToken::new();
        match self.active.entry(task_id.to_string()) {
            Entry::Occupied(_) => return Err(DownloadError::AlreadyRunning(task_id.to_string())),
            Entry::Vacant(entry) => {
                entry.insert(token.clone());
            }
        }
        let _guard = ProcessGuard {
            active: &self.active,
            task_id: task_id.to_string(),
        };

        // 注册之前到达的删除或取消只改了记录，这里必须在启动进程前看到
        if !self.registry.contains(task_id) {
            return Err(DownloadError::TaskNotFound(task_id.to_string()));
        }
        if token.is_cancelled() || self.registry.is_cancel_requested(task_id) {
            return Err(DownloadError::Cancelled);
        }

        self.registry
            .append_log(task_id, format!("Executing: {}...", command.summary()));

        let (mut child, output) = spawn_child(command)?;
        info!("下载器已启动: {} (pid {:?})", task_id, child.id());

        let (tx, mut rx) = mpsc::unbounded_channel();
        let pump = spawn_pump(output, tx)?;

        let mut dns_errors = 0usize;
        let exit = loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break LoopExit::Cancelled,
                line = rx.recv() => match line {
                    Some(line) => {
                        if self.registry.is_cancel_requested(task_id) {
                            break LoopExit::Cancelled;
                        }
                        self.handle_line(task_id, &line, &mut dns_errors);
                    }
                    None => break LoopExit::Drained,
                },
            }
        };

        if let LoopExit::Cancelled = exit {
            info!("取消任务，终止下载器: {}", task_id);
            terminate_child(&mut child, TERMINATION_GRACE).await;
            pump.abort();
            return Err(DownloadError::Cancelled);
        }

        // 输出已经读完，但进程可能还没退出
        let waited = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            status = child.wait() => Some(status),
        };
        let Some(status) = waited else {
            terminate_child(&mut child, TERMINATION_GRACE).await;
            pump.abort();
            return Err(DownloadError::Cancelled);
        };
        let status = status.map_err(|e| DownloadError::from_process_error(&command.program, e))?;
        debug!("下载器退出: {} ({})", task_id, status);

        if dns_errors > DNS_FAILURE_THRESHOLD {
            self.registry.append_log(
                task_id,
                "ERROR: Download failed: Network/DNS resolution errors. Please check your internet connection.",
            );
            return Err(DownloadError::DnsFailure(dns_errors));
        }

        if status.success() {
            self.registry.update(task_id, |task| {
                if !task.cancel_requested {
                    task.complete_remaining_items();
                }
            });
            return Ok(());
        }

        match status.code() {
            Some(code) => Err(DownloadError::ExitCode(code)),
            None => Err(DownloadError::Terminated),
        }
    }

    fn handle_line(&self, task_id: &str, line: &str, dns_errors: &mut usize) {
        match classify_line(line) {
            LineKind::Noise => {}
            LineKind::Dns => {
                *dns_errors += 1;
                if *dns_errors == 1 {
                    self.registry
                        .append_log(task_id, "WARNING: Network/DNS error detected. Retrying...");
                }
            }
            LineKind::ConnectionReset => {
                self.registry.append_log(
                    task_id,
                    "WARNING: Connection issue detected. SpotDL will retry automatically...",
                );
            }
            LineKind::Output => {
                self.registry.update(task_id, |task| {
                    task.push_log(line);
                    self.parser.apply(task, line);
                });
            }
        }
    }
}

// stdout 和 stderr 写入同一个管道，读取端看到的就是进程产生输出的顺序
fn spawn_child(command: &DownloadCommand) -> Result<(Child, PipeReader), DownloadError> {
    let launch_error = |e: std::io::Error| {
        error!("启动下载器失败 {}: {}", command.program, e);
        DownloadError::from_process_error(&command.program, e)
    };
    let (reader, writer) = std::io::pipe().map_err(launch_error)?;
    let stderr_writer = writer.try_clone().map_err(launch_error)?;

    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .env("PYTHONWARNINGS", "ignore")
        .stdin(Stdio::null())
        .stdout(writer)
        .stderr(stderr_writer)
        .kill_on_drop(true);

    #[cfg(windows)]
    cmd.creation_flags(CREATE_NO_WINDOW);

    // spawn 之后 cmd 被丢弃，父进程不再持有写端，子进程退出时读取端才能读到 EOF
    let child = cmd.spawn().map_err(launch_error)?;
    Ok((child, reader))
}

#[cfg(unix)]
fn spawn_pump(
    reader: PipeReader,
    tx: mpsc::UnboundedSender<String>,
) -> Result<JoinHandle<()>, DownloadError> {
    let receiver = tokio::net::unix::pipe::Receiver::from_owned_fd(reader.into())?;
    Ok(tokio::spawn(pump_lines(receiver, tx)))
}

#[cfg(not(unix))]
fn spawn_pump(
    reader: PipeReader,
    tx: mpsc::UnboundedSender<String>,
) -> Result<JoinHandle<()>, DownloadError> {
    use std::io::Read;

    Ok(tokio::task::spawn_blocking(move || {
        let mut reader = reader;
        let mut lines = LineBuffer::new();
        let mut buf = [0u8; 4096];
        while let Ok(n) = reader.read(&mut buf) {
            if n == 0 {
                break;
            }
            for line in lines.push(&buf[..n]) {
                if tx.send(line).is_err() {
                    return;
                }
            }
        }
        if let Some(line) = lines.finish() {
            let _ = tx.send(line);
        }
    }))
}

// 按字节读取输出流，切成行后送入通道
#[cfg(unix)]
async fn pump_lines<R>(mut reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = LineBuffer::new();
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                for line in lines.push(&buf[..n]) {
                    if tx.send(line).is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                debug!("读取子进程输出失败: {}", e);
                break;
            }
        }
    }
    if let Some(line) = lines.finish() {
        let _ = tx.send(line);
    }
}

/// 先发 SIGTERM，等待 `grace`，仍未退出则强制杀死
pub async fn terminate_child(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: pid 来自仍被持有、尚未回收的子进程
        let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if rc != 0 {
            warn!("发送 SIGTERM 失败 (pid {}): {}", pid, std::io::Error::last_os_error());
        }
    }

    #[cfg(not(unix))]
    if let Err(e) = child.start_kill() {
        warn!("终止子进程失败: {}", e);
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => debug!("子进程已退出: {}", status),
        Ok(Err(e)) => warn!("等待子进程退出失败: {}", e),
        Err(_) => {
            warn!("子进程在 {:?} 内没有退出，强制终止", grace);
            if let Err(e) = child.kill().await {
                error!("强制终止子进程失败: {}", e);
            }
        }
    }
}
