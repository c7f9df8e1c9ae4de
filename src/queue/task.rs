//! Task lifecycle types for the queue
//!
//! A task is exclusively owned by the queue while active; on settlement its
//! record moves into the queue's bounded history.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;

/// The state of a task inside the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    /// Enqueued, waiting for a dispatch slot
    Pending,
    /// Currently executing
    Running,
    /// Settled successfully
    Completed,
    /// Settled with an error
    Failed,
}

impl TaskStatus {
    /// Returns true once the task has settled
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{}", label)
    }
}

/// A queued operation: zero-argument, returning a future result
pub type TaskOp<T> = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<T>> + Send>;

/// Wraps an async closure into a [`TaskOp`]
pub fn task_op<T, Fut, F>(f: F) -> TaskOp<T>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    Box::new(move || Box::pin(f()))
}

/// Bookkeeping record for one task, kept while active and then in history
#[derive(Debug, Clone)]
pub struct TaskRecord<T> {
    pub id: String,
    pub priority: i64,
    pub status: TaskStatus,
    pub added_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<T>,
    pub error: Option<String>,
}

impl<T> TaskRecord<T> {
    pub(crate) fn new(id: String, priority: i64) -> Self {
        Self {
            id,
            priority,
            status: TaskStatus::Pending,
            added_at: Utc::now(),
            started_at: None,
            finished_at: None,
            result: None,
            error: None,
        }
    }
}

/// One entry of an [`add_batch`](super::TaskQueue::add_batch) call
pub struct TaskSpec<T> {
    pub id: String,
    pub priority: i64,
    pub op: TaskOp<T>,
}

impl<T> TaskSpec<T> {
    pub fn new(id: impl Into<String>, op: TaskOp<T>) -> Self {
        Self {
            id: id.into(),
            priority: 0,
            op,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_settled() {
        assert!(!TaskStatus::Pending.is_settled());
        assert!(!TaskStatus::Running.is_settled());
        assert!(TaskStatus::Completed.is_settled());
        assert!(TaskStatus::Failed.is_settled());
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", TaskStatus::Pending), "pending");
        assert_eq!(format!("{}", TaskStatus::Failed), "failed");
    }

    #[test]
    fn test_new_record_defaults() {
        let record: TaskRecord<()> = TaskRecord::new("t1".to_string(), 5);
        assert_eq!(record.id, "t1");
        assert_eq!(record.priority, 5);
        assert_eq!(record.status, TaskStatus::Pending);
        assert!(record.started_at.is_none());
        assert!(record.finished_at.is_none());
        assert!(record.error.is_none());
    }

    #[tokio::test]
    async fn test_task_op_wraps_closure() {
        let op = task_op(|| async { Ok::<_, anyhow::Error>(7) });
        let value = op().await.unwrap();
        assert_eq!(value, 7);
    }
}
