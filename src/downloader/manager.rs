use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::{Stream, StreamExt, stream};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::core::{DownloadCommand, Supervisor};
use super::error::DownloadError;
use super::models::{FailureKind, Task, TaskStatus};
use super::registry::TaskRegistry;
use crate::common::catalog::client::CatalogLookup;
use crate::common::config::AppConfig;
use crate::common::connectivity::ConnectivityProbe;
use crate::parser::models::ParsedUrl;
use crate::parser::{ProgressParser, classify_url};

const NO_CONNECTION_LOG: &str =
    "ERROR: No internet connection detected. Please check your network and try again.";

pub fn new_task_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 任务生命周期：启动、取消、重试、删除。
///
/// 可以廉价地 clone，所有字段都是共享的；后台任务持有自己的一份。
#[derive(Clone)]
pub struct TaskManager {
    registry: Arc<TaskRegistry>,
    supervisor: Arc<Supervisor>,
    config: Arc<AppConfig>,
    probe: Arc<dyn ConnectivityProbe>,
    catalog: Arc<dyn CatalogLookup>,
    preload_only: bool,
}

impl TaskManager {
    pub fn new(
        registry: Arc<TaskRegistry>,
        config: AppConfig,
        probe: Arc<dyn ConnectivityProbe>,
        catalog: Arc<dyn CatalogLookup>,
    ) -> Self {
        Self::with_parser(registry, config, probe, catalog, ProgressParser::default())
    }

    pub fn with_parser(
        registry: Arc<TaskRegistry>,
        config: AppConfig,
        probe: Arc<dyn ConnectivityProbe>,
        catalog: Arc<dyn CatalogLookup>,
        parser: ProgressParser,
    ) -> Self {
        let supervisor = Arc::new(Supervisor::new(Arc::clone(&registry), parser));
        Self {
            registry,
            supervisor,
            config: Arc::new(config),
            probe,
            catalog,
            preload_only: false,
        }
    }

    /// 预加载模式：只把链接交给下载器，不传输出目录和格式
    pub fn preload_only(mut self, enabled: bool) -> Self {
        self.preload_only = enabled;
        self
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn get_all_tasks(&self) -> Vec<Task> {
        self.registry.all()
    }

    pub fn get_task(&self, task_id: &str) -> Option<Task> {
        self.registry.get(task_id)
    }

    pub fn get_task_logs(&self, task_id: &str) -> Option<Vec<String>> {
        self.registry.logs(task_id)
    }

    pub fn resolve_task_id(&self, prefix: &str) -> Result<String, DownloadError> {
        self.registry.find_by_prefix(prefix)
    }

    pub fn is_running(&self, task_id: &str) -> bool {
        self.supervisor.is_running(task_id)
    }

    /// 启动（或重新启动）一个下载任务，直到进程结束才返回。
    ///
    /// 链接无效时直接返回错误，不会创建记录。其余情况都会留下一条终态记录：
    /// 没有网络时是 `failed`，否则由下载器的结果和取消标志决定。
    pub async fn start(
        &self,
        task_id: &str,
        url: &str,
        download_path: Option<PathBuf>,
    ) -> Result<Task, DownloadError> {
        validate_task_id(task_id)?;
        let parsed = classify_url(url)?;

        if self.supervisor.is_running(task_id) {
            return Err(DownloadError::AlreadyRunning(task_id.to_string()));
        }
        if let Some(existing) = self.registry.get(task_id) {
            if !is_restartable(&existing) {
                return Err(DownloadError::TaskFinished(task_id.to_string()));
            }
        }

        let download_path =
            download_path.unwrap_or_else(|| self.config.default_download_path.clone());

        if !self.probe.is_online().await {
            error!("Task {}: No internet connection", task_id);
            return Ok(self.record_offline(task_id, url, download_path));
        }

        // 已有记录说明是重试：保留日志和创建时间，清空本轮的数据
        let rerun = self.registry.update(task_id, |task| {
            if !is_restartable(task) {
                return Err(DownloadError::TaskFinished(task.id.clone()));
            }
            task.status = TaskStatus::Running;
            task.reset_for_run();
            task.push_log("Retrying download...");
            Ok(())
        });
        match rerun {
            Some(result) => result?,
            None => self
                .registry
                .insert(Task::new(task_id, url, download_path.clone())),
        }

        let download_path = self.resolve_collection_path(task_id, &parsed, download_path).await;

        // 查询名称期间任务可能已被删除或取消
        if !self.registry.contains(task_id) {
            info!("任务在启动前已被删除: {}", task_id);
            return Err(DownloadError::TaskNotFound(task_id.to_string()));
        }
        let result = if self.registry.is_cancel_requested(task_id) {
            Err(DownloadError::Cancelled)
        } else {
            self.run_download(task_id, url, &download_path).await
        };
        self.finish(task_id, result)
    }

    /// 在后台启动任务
    pub fn spawn_start(
        &self,
        task_id: impl Into<String>,
        url: impl Into<String>,
        download_path: Option<PathBuf>,
    ) -> JoinHandle<Result<Task, DownloadError>> {
        let manager = self.clone();
        let task_id = task_id.into();
        let url = url.into();
        tokio::spawn(async move { manager.start(&task_id, &url, download_path).await })
    }

    /// 取消运行中的任务。状态立即变为 `cancelled`，进程在后台被终止。
    pub fn cancel(&self, task_id: &str) -> bool {
        let cancelled = self
            .registry
            .update(task_id, Task::request_cancel)
            .unwrap_or(false);
        if !cancelled {
            debug!("任务不在运行中，忽略取消: {}", task_id);
            return false;
        }

        if !self.supervisor.signal_termination(task_id) {
            debug!("任务没有活动进程: {}", task_id);
        }
        self.registry.append_log(task_id, "Stop requested by user");
        true
    }

    /// 重试失败的任务，返回后台任务的句柄
    pub fn spawn_retry(&self, task_id: &str) -> Option<JoinHandle<Result<Task, DownloadError>>> {
        if self.supervisor.is_running(task_id) {
            warn!("任务的进程仍在运行，不能重试: {}", task_id);
            return None;
        }
        let (url, download_path) = self
            .registry
            .update(task_id, Task::prepare_retry)
            .flatten()?;

        info!("重试任务: {} ({})", task_id, url);
        Some(self.spawn_start(task_id, url, Some(download_path)))
    }

    pub fn retry(&self, task_id: &str) -> bool {
        self.spawn_retry(task_id).is_some()
    }

    /// 删除任务记录和文件，并终止可能还在运行的进程
    pub fn delete(&self, task_id: &str) -> bool {
        let removed = self.registry.remove(task_id).is_some();
        if self.supervisor.signal_termination(task_id) {
            info!("已通知删除任务的进程退出: {}", task_id);
        }
        removed
    }

    /// 批量下载，同时最多运行 `workers` 个任务。结果按完成顺序产出。
    pub fn batch(
        &self,
        urls: Vec<String>,
        workers: usize,
    ) -> impl Stream<Item = (String, Result<Task, DownloadError>)> + use<> {
        let manager = self.clone();
        stream::iter(urls)
            .map(move |url| {
                let manager = manager.clone();
                async move {
                    let task_id = new_task_id();
                    let result = manager.start(&task_id, &url, None).await;
                    (url, result)
                }
            })
            .buffer_unordered(workers.max(1))
    }

    fn record_offline(&self, task_id: &str, url: &str, download_path: PathBuf) -> Task {
        let updated = self.registry.update(task_id, |task| {
            if task.status.can_transition_to(TaskStatus::Failed) {
                task.status = TaskStatus::Failed;
            }
            if task.status == TaskStatus::Failed {
                task.failure = Some(FailureKind::Network);
            }
            task.push_log(NO_CONNECTION_LOG);
            task.clone()
        });
        if let Some(task) = updated {
            return task;
        }

        let mut task = Task::new(task_id, url, download_path);
        task.status = TaskStatus::Failed;
        task.failure = Some(FailureKind::Network);
        task.push_log(NO_CONNECTION_LOG);
        self.registry.insert(task.clone());
        task
    }

    // 歌单和专辑下载到以名称命名的子目录；重试时路径里已经有这一层了
    async fn resolve_collection_path(
        &self,
        task_id: &str,
        parsed: &ParsedUrl,
        download_path: PathBuf,
    ) -> PathBuf {
        if !parsed.kind.is_collection() {
            return download_path;
        }

        self.registry
            .append_log(task_id, format!("Detecting {} name...", parsed.kind));
        let name = match self.catalog.lookup(parsed.kind, &parsed.id).await {
            Ok(entry) => entry.name,
            Err(e) => {
                warn!("获取{}名称失败，使用默认名称: {}", parsed.kind, e);
                parsed.fallback_name()
            }
        };

        if download_path.ends_with(&name) {
            return download_path;
        }
        let download_path = download_path.join(&name);
        self.registry
            .append_log(task_id, format!("Creating folder: {}", name));
        self.registry.update(task_id, |task| {
            task.download_path = download_path.clone();
        });
        download_path
    }

    async fn run_download(
        &self,
        task_id: &str,
        url: &str,
        download_path: &Path,
    ) -> Result<(), DownloadError> {
        tokio::fs::create_dir_all(download_path).await?;

        self.registry
            .append_log(task_id, format!("Starting download for: {}", url));
        self.registry.append_log(
            task_id,
            format!("Download path: {}", download_path.display()),
        );

        let command = DownloadCommand::build(&self.config, url, Some(download_path), self.preload_only);
        self.supervisor.run(task_id, &command).await
    }

    // 取消标志优先于下载器的结果
    fn finish(&self, task_id: &str, result: Result<(), DownloadError>) -> Result<Task, DownloadError> {
        if let Err(e) = &result {
            if !e.is_cancelled() {
                error!("Download error for task {}: {}", task_id, e);
            }
        }

        self.registry
            .update(task_id, |task| {
                let (next, message) = if task.cancel_requested {
                    (TaskStatus::Cancelled, "Download cancelled by user".to_string())
                } else {
                    match &result {
                        Ok(()) => (
                            TaskStatus::Completed,
                            "Download completed successfully!".to_string(),
                        ),
                        Err(e) => (TaskStatus::Failed, format!("Download failed: {}", e)),
                    }
                };
                if task.status.can_transition_to(next) {
                    task.status = next;
                    if let (TaskStatus::Failed, Err(e)) = (next, &result) {
                        task.failure = Some(e.failure_kind());
                    }
                }
                task.current_item.clear();
                task.recompute_progress();
                task.push_log(message);
                task.clone()
            })
            .ok_or_else(|| DownloadError::TaskNotFound(task_id.to_string()))
    }
}

// 只有运行中（重试已准备好）或失败的任务可以再次启动
fn is_restartable(task: &Task) -> bool {
    !task.cancel_requested && (task.status.is_active() || task.status == TaskStatus::Failed)
}

fn validate_task_id(task_id: &str) -> Result<(), DownloadError> {
    let invalid = task_id.trim().is_empty()
        || task_id.contains(['/', '\\'])
        || task_id.contains("..");
    if invalid {
        return Err(DownloadError::InvalidTaskId(task_id.to_string()));
    }
    Ok(())
}
