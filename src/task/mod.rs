//! Task module - defines tasks, their priorities, and create/update requests.
//!
//! Task records are plain data. The `TaskStore` owns them; nothing else
//! mutates a task directly.

pub mod task;

pub use task::{NewTask, Priority, Task, TaskError, TaskId, TaskPatch};
