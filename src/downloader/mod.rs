pub mod core;
pub mod error;
pub mod manager;
pub mod models;
pub mod progress;
pub mod registry;

pub use core::{DownloadCommand, Supervisor};
pub use error::DownloadError;
pub use manager::{TaskManager, new_task_id};
pub use models::{FailureKind, Item, ItemStatus, Task, TaskStatus};
pub use progress::TaskProgressView;
pub use registry::TaskRegistry;
