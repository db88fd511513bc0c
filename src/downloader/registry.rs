use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::error::DownloadError;
use super::models::Task;

/// 任务注册表：内存中的 task_id -> Task，并为每个任务在磁盘上保存一个 JSON 文件。
///
/// 所有读写都经过同一把锁。修改通过闭包在锁内完成，修改后立即落盘，
/// 所以调用方不需要在持锁期间再次加锁。
#[derive(Debug)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<String, Task>>,
    tasks_dir: PathBuf,
}

impl TaskRegistry {
    /// 打开任务目录，并从磁盘恢复所有任务。损坏的文件会被跳过。
    pub fn open(tasks_dir: impl AsRef<Path>) -> Result<Self, DownloadError> {
        let tasks_dir = tasks_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&tasks_dir)?;

        let tasks = load_tasks(&tasks_dir);
        info!("从 {:?} 恢复了 {} 个任务", tasks_dir, tasks.len());

        Ok(Self {
            tasks: Mutex::new(tasks),
            tasks_dir,
        })
    }

    // 插入（或覆盖）任务并立即保存
    pub fn insert(&self, task: Task) {
        let mut tasks = self.tasks.lock();
        self.persist(&task);
        tasks.insert(task.id.clone(), task);
    }

    /// 在锁内修改任务，修改后落盘。任务不存在时返回 `None`。
    pub fn update<R>(&self, task_id: &str, f: impl FnOnce(&mut Task) -> R) -> Option<R> {
        let mut tasks = self.tasks.lock();
        let task = tasks.get_mut(task_id)?;
        let result = f(task);
        self.persist(task);
        Some(result)
    }

    // 追加一条任务日志
    pub fn append_log(&self, task_id: &str, message: impl AsRef<str>) -> bool {
        let message = message.as_ref();
        info!("Task {}: {}", task_id, message);
        self.update(task_id, |task| task.push_log(message)).is_some()
    }

    pub fn get(&self, task_id: &str) -> Option<Task> {
        self.tasks.lock().get(task_id).cloned()
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.tasks.lock().contains_key(task_id)
    }

    /// 所有任务的快照，按创建时间排序
    pub fn all(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.lock().values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        tasks
    }

    pub fn logs(&self, task_id: &str) -> Option<Vec<String>> {
        self.tasks.lock().get(task_id).map(|task| task.logs.clone())
    }

    pub fn is_cancel_requested(&self, task_id: &str) -> bool {
        self.tasks
            .lock()
            .get(task_id)
            .is_some_and(|task| task.cancel_requested)
    }

    // 移除任务并删除对应的文件
    pub fn remove(&self, task_id: &str) -> Option<Task> {
        let mut tasks = self.tasks.lock();
        let task = tasks.remove(task_id)?;
        let path = self.task_file(task_id);
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("删除任务文件失败 {:?}: {}", path, e);
            }
        }
        Some(task)
    }

    /// 按 ID 前缀查找任务，前缀必须唯一
    pub fn find_by_prefix(&self, prefix: &str) -> Result<String, DownloadError> {
        let tasks = self.tasks.lock();
        if tasks.contains_key(prefix) {
            return Ok(prefix.to_string());
        }
        let mut matches = tasks.keys().filter(|id| id.starts_with(prefix));
        match (matches.next(), matches.next()) {
            (Some(id), None) => Ok(id.clone()),
            (None, _) => Err(DownloadError::TaskNotFound(prefix.to_string())),
            (Some(_), Some(_)) => Err(DownloadError::AmbiguousTaskId(prefix.to_string())),
        }
    }

    /// 直接从磁盘读取任务文件（另一个进程正在更新该任务时使用）
    pub fn read_from_disk(&self, task_id: &str) -> Option<Task> {
        match read_task_file(&self.task_file(task_id)) {
            Ok(task) => Some(task),
            Err(e) => {
                debug!("读取任务文件失败 {}: {}", task_id, e);
                None
            }
        }
    }

    fn task_file(&self, task_id: &str) -> PathBuf {
        self.tasks_dir.join(format!("{}.json", task_id))
    }

    // 持久化失败只记录日志，内存中的状态仍然是权威
    fn persist(&self, task: &Task) {
        let path = self.task_file(&task.id);
        if let Err(e) = write_task_file(&path, task) {
            error!("保存任务 {} 失败: {}", task.id, e);
        }
    }
}

fn load_tasks(tasks_dir: &Path) -> HashMap<String, Task> {
    let mut tasks = HashMap::new();

    let entries = match std::fs::read_dir(tasks_dir) {
        Ok(entries) => entries,
        Err(e) => {
            error!("读取任务目录失败 {:?}: {}", tasks_dir, e);
            return tasks;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        match read_task_file(&path) {
            Ok(task) => {
                debug!("加载任务: {} ({})", task.id, task.status);
                tasks.insert(task.id.clone(), task);
            }
            Err(e) => warn!("跳过损坏的任务文件 {:?}: {}", path, e),
        }
    }

    tasks
}

fn read_task_file(path: &Path) -> Result<Task, DownloadError> {
    let data = std::fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}

// 先写临时文件再改名，写到一半崩溃也不会留下半截的任务文件
fn write_task_file(path: &Path, task: &Task) -> Result<(), DownloadError> {
    let data = serde_json::to_vec_pretty(task)?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, data)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}
