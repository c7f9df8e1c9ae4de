//! Concurrency-bounded, rate-limited task dispatch
//!
//! At most `concurrency` tasks run simultaneously, and within any `interval`
//! window at most `interval_cap` tasks may start; the two limits are
//! independent. Ready tasks start in descending priority order, ties broken
//! by enqueue order. Settled tasks move into an insertion-ordered history
//! bounded by `max_task_history`.

use crate::events::{Event, EventBus};
use crate::queue::task::{TaskOp, TaskRecord, TaskSpec, TaskStatus};
use chrono::Utc;
use futures::future::join_all;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{oneshot, watch};

/// Errors observed by a task's caller
#[derive(Debug, Clone, Error)]
pub enum QueueError {
    #[error("task failed: {0}")]
    Failed(String),

    #[error("task timed out")]
    Timeout,

    #[error("task was cleared before completion")]
    Cleared,
}

/// Construction options for [`TaskQueue`]
#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// Maximum number of simultaneously running tasks
    pub concurrency: usize,
    /// Length of the start-rate window; zero disables the rate limit
    pub interval: Duration,
    /// Maximum task starts per window; `usize::MAX` disables the rate limit
    pub interval_cap: usize,
    /// Per-task timeout; `None` disables it
    pub task_timeout: Option<Duration>,
    /// When set, a timed-out task is tallied as failed; otherwise it is
    /// tallied as completed and only logged. The task's handle observes
    /// [`QueueError::Timeout`] either way.
    pub throw_on_timeout: bool,
    /// Settled-task history capacity; zero disables history
    pub max_task_history: usize,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            interval: Duration::ZERO,
            interval_cap: usize::MAX,
            task_timeout: None,
            throw_on_timeout: false,
            max_task_history: 100,
        }
    }
}

/// Point-in-time queue status, merged across active and historical tasks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStatus {
    pub pending: usize,
    pub running: usize,
    pub paused: bool,
    pub completed: usize,
    pub failed: usize,
    pub total_added: usize,
}

/// Awaitable settlement of a single task
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<Result<T, QueueError>>,
}

impl<T> TaskHandle<T> {
    /// Suspends until the task settles
    pub async fn wait(self) -> Result<T, QueueError> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(QueueError::Cleared),
        }
    }
}

struct PendingTask<T> {
    id: String,
    priority: i64,
    seq: u64,
    op: TaskOp<T>,
    tx: oneshot::Sender<Result<T, QueueError>>,
}

impl<T> PartialEq for PendingTask<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<T> Eq for PendingTask<T> {}

impl<T> Ord for PendingTask<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // higher priority pops first; among equals, the earlier enqueue wins
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<T> PartialOrd for PendingTask<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

enum Gate {
    Ready,
    Wait(Duration),
}

enum Settlement<T> {
    Succeeded(T),
    Failed(String),
    TimedOut,
}

struct Inner<T> {
    options: QueueOptions,
    paused: bool,
    pending: BinaryHeap<PendingTask<T>>,
    running: usize,
    active: HashMap<String, TaskRecord<T>>,
    history: HashMap<String, TaskRecord<T>>,
    history_order: VecDeque<String>,
    completed: usize,
    failed: usize,
    total_added: usize,
    seq: u64,
    window_start: Option<Instant>,
    window_count: usize,
    timer_armed: bool,
}

impl<T> Inner<T> {
    fn check_rate_limit(&mut self) -> Gate {
        let cap = self.options.interval_cap;
        if self.options.interval.is_zero() || cap == usize::MAX || cap == 0 {
            return Gate::Ready;
        }
        let now = Instant::now();
        match self.window_start {
            Some(start) if now.duration_since(start) < self.options.interval => {
                if self.window_count < cap {
                    Gate::Ready
                } else {
                    Gate::Wait(self.options.interval - now.duration_since(start))
                }
            }
            _ => {
                self.window_start = Some(now);
                self.window_count = 0;
                Gate::Ready
            }
        }
    }

    fn push_history(&mut self, record: TaskRecord<T>) {
        if self.options.max_task_history == 0 {
            return;
        }
        let id = record.id.clone();
        if self.history.insert(id.clone(), record).is_some() {
            self.history_order.retain(|entry| entry != &id);
        }
        self.history_order.push_back(id);
        while self.history_order.len() > self.options.max_task_history {
            if let Some(oldest) = self.history_order.pop_front() {
                self.history.remove(&oldest);
            }
        }
    }

    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.running == 0
    }
}

/// The concurrency-bounded task queue
pub struct TaskQueue<T> {
    inner: Arc<Mutex<Inner<T>>>,
    events: Arc<EventBus>,
    idle_tx: Arc<watch::Sender<bool>>,
    idle_rx: watch::Receiver<bool>,
}

impl<T> Clone for TaskQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            events: self.events.clone(),
            idle_tx: self.idle_tx.clone(),
            idle_rx: self.idle_rx.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> TaskQueue<T> {
    pub fn new(options: QueueOptions) -> Self {
        let (idle_tx, idle_rx) = watch::channel(true);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                options,
                paused: false,
                pending: BinaryHeap::new(),
                running: 0,
                active: HashMap::new(),
                history: HashMap::new(),
                history_order: VecDeque::new(),
                completed: 0,
                failed: 0,
                total_added: 0,
                seq: 0,
                window_start: None,
                window_count: 0,
                timer_armed: false,
            })),
            events: Arc::new(EventBus::new()),
            idle_tx: Arc::new(idle_tx),
            idle_rx,
        }
    }

    /// The queue's event bus (task-added/completed/succeeded/failed,
    /// active/idle)
    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    /// Enqueues a task under `id` at the given priority
    ///
    /// Re-using an id clears any prior history entry for it first; duplicate
    /// ids are not rejected.
    pub fn add_task<F, Fut>(&self, id: impl Into<String>, priority: i64, f: F) -> TaskHandle<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.add_task_op(id, priority, Box::new(move || Box::pin(f())))
    }

    /// Enqueues an already-boxed task operation
    pub fn add_task_op(&self, id: impl Into<String>, priority: i64, op: TaskOp<T>) -> TaskHandle<T> {
        let id = id.into();
        let (tx, rx) = oneshot::channel();
        {
            let mut inner = self.inner.lock().expect("queue lock poisoned");
            if inner.history.remove(&id).is_some() {
                inner.history_order.retain(|entry| entry != &id);
            }
            let seq = inner.seq;
            inner.seq += 1;
            inner.total_added += 1;
            inner
                .active
                .insert(id.clone(), TaskRecord::new(id.clone(), priority));
            inner.pending.push(PendingTask {
                id: id.clone(),
                priority,
                seq,
                op,
                tx,
            });
        }
        self.events.emit(&Event::TaskAdded { id });
        self.refresh_idle();
        self.dispatch();
        TaskHandle { rx }
    }

    /// Enqueues many tasks and resolves once every one has settled
    ///
    /// Each task's success or failure is captured independently; one failing
    /// task does not fail the batch result for the others.
    pub async fn add_batch(&self, specs: Vec<TaskSpec<T>>) -> Vec<Result<T, QueueError>> {
        let handles: Vec<_> = specs
            .into_iter()
            .map(|spec| self.add_task_op(spec.id, spec.priority, spec.op))
            .collect();
        join_all(handles.into_iter().map(TaskHandle::wait)).await
    }

    /// Suspends the caller until no task is pending or running
    pub async fn wait_for_idle(&self) {
        let mut rx = self.idle_rx.clone();
        // a closed channel cannot happen while self holds the sender
        let _ = rx.wait_for(|idle| *idle).await;
    }

    /// Stops dispatching new tasks; in-flight tasks are not preempted
    pub fn pause(&self) {
        self.inner.lock().expect("queue lock poisoned").paused = true;
        tracing::debug!("task queue paused");
    }

    /// Resumes dispatching
    pub fn resume(&self) {
        self.inner.lock().expect("queue lock poisoned").paused = false;
        tracing::debug!("task queue resumed");
        self.dispatch();
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().expect("queue lock poisoned").paused
    }

    /// Drops all pending tasks and all active + historical bookkeeping
    ///
    /// Handles of dropped pending tasks resolve with [`QueueError::Cleared`].
    /// Already-running tasks finish but leave no record.
    pub fn clear(&self) {
        let dropped = {
            let mut inner = self.inner.lock().expect("queue lock poisoned");
            let dropped = inner.pending.len();
            inner.pending.clear();
            inner.active.clear();
            inner.history.clear();
            inner.history_order.clear();
            inner.completed = 0;
            inner.failed = 0;
            inner.total_added = 0;
            dropped
        };
        if dropped > 0 {
            tracing::debug!("cleared {} pending tasks", dropped);
        }
        self.refresh_idle();
    }

    /// Changes the live concurrency cap
    pub fn set_concurrency(&self, concurrency: usize) {
        {
            let mut inner = self.inner.lock().expect("queue lock poisoned");
            inner.options.concurrency = concurrency;
        }
        self.dispatch();
    }

    /// Reports queue depth, running count, pause state and settled tallies
    pub fn get_status(&self) -> QueueStatus {
        let inner = self.inner.lock().expect("queue lock poisoned");
        QueueStatus {
            pending: inner.pending.len(),
            running: inner.running,
            paused: inner.paused,
            completed: inner.completed,
            failed: inner.failed,
            total_added: inner.total_added,
        }
    }

    /// Retrieves the bookkeeping record of an active or settled task
    pub fn task_record(&self, id: &str) -> Option<TaskRecord<T>> {
        let inner = self.inner.lock().expect("queue lock poisoned");
        inner
            .active
            .get(id)
            .or_else(|| inner.history.get(id))
            .cloned()
    }

    /// Starts as many ready tasks as the concurrency cap and rate window allow
    fn dispatch(&self) {
        loop {
            enum Job<T> {
                Run {
                    task: PendingTask<T>,
                    timeout: Option<Duration>,
                },
                ArmTimer(Duration),
            }

            let job = {
                let mut inner = self.inner.lock().expect("queue lock poisoned");
                if inner.paused
                    || inner.running >= inner.options.concurrency
                    || inner.pending.is_empty()
                {
                    None
                } else {
                    match inner.check_rate_limit() {
                        Gate::Ready => {
                            let task = inner.pending.pop().expect("pending checked non-empty");
                            inner.running += 1;
                            inner.window_count += 1;
                            if let Some(record) = inner.active.get_mut(&task.id) {
                                record.status = TaskStatus::Running;
                                record.started_at = Some(Utc::now());
                            }
                            Some(Job::Run {
                                task,
                                timeout: inner.options.task_timeout,
                            })
                        }
                        Gate::Wait(wait) => {
                            if inner.timer_armed {
                                None
                            } else {
                                inner.timer_armed = true;
                                Some(Job::ArmTimer(wait))
                            }
                        }
                    }
                }
            };

            match job {
                None => break,
                Some(Job::ArmTimer(wait)) => {
                    tracing::trace!("start-rate window full, re-dispatching in {:?}", wait);
                    let queue = self.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(wait).await;
                        queue.inner.lock().expect("queue lock poisoned").timer_armed = false;
                        queue.dispatch();
                    });
                    break;
                }
                Some(Job::Run { task, timeout }) => {
                    self.refresh_idle();
                    let queue = self.clone();
                    tokio::spawn(async move {
                        let PendingTask { id, op, tx, .. } = task;
                        let fut = op();
                        let settlement = match timeout {
                            Some(limit) => match tokio::time::timeout(limit, fut).await {
                                Ok(Ok(value)) => Settlement::Succeeded(value),
                                Ok(Err(err)) => Settlement::Failed(format!("{:#}", err)),
                                Err(_) => Settlement::TimedOut,
                            },
                            None => match fut.await {
                                Ok(value) => Settlement::Succeeded(value),
                                Err(err) => Settlement::Failed(format!("{:#}", err)),
                            },
                        };
                        queue.settle(id, tx, settlement);
                    });
                }
            }
        }
        self.refresh_idle();
    }

    /// Moves a finished task from the active map into history and notifies
    fn settle(
        &self,
        id: String,
        tx: oneshot::Sender<Result<T, QueueError>>,
        settlement: Settlement<T>,
    ) {
        let (result, failure_error) = {
            let mut inner = self.inner.lock().expect("queue lock poisoned");
            inner.running = inner.running.saturating_sub(1);
            // a clear() while the task ran dropped its record; the caller is
            // still notified, but no bookkeeping is reintroduced
            let removed = inner.active.remove(&id);
            let had_record = removed.is_some();
            let mut record = removed.unwrap_or_else(|| TaskRecord::new(id.clone(), 0));
            record.finished_at = Some(Utc::now());

            let (result, failure_error) = match settlement {
                Settlement::Succeeded(value) => {
                    record.status = TaskStatus::Completed;
                    record.result = Some(value.clone());
                    if had_record {
                        inner.completed += 1;
                    }
                    (Ok(value), None)
                }
                Settlement::Failed(message) => {
                    record.status = TaskStatus::Failed;
                    record.error = Some(message.clone());
                    if had_record {
                        inner.failed += 1;
                    }
                    (Err(QueueError::Failed(message.clone())), Some(message))
                }
                Settlement::TimedOut => {
                    record.error = Some("timed out".to_string());
                    if inner.options.throw_on_timeout {
                        record.status = TaskStatus::Failed;
                        if had_record {
                            inner.failed += 1;
                        }
                        (Err(QueueError::Timeout), Some("timed out".to_string()))
                    } else {
                        tracing::warn!("task {} timed out; not counted as failure", id);
                        record.status = TaskStatus::Completed;
                        if had_record {
                            inner.completed += 1;
                        }
                        (Err(QueueError::Timeout), None)
                    }
                }
            };
            if had_record {
                inner.push_history(record);
            }
            (result, failure_error)
        };

        self.events.emit(&Event::TaskCompleted { id: id.clone() });
        match &failure_error {
            None => self.events.emit(&Event::TaskSucceeded { id: id.clone() }),
            Some(error) => self.events.emit(&Event::TaskFailed {
                id: id.clone(),
                error: error.clone(),
            }),
        }

        let _ = tx.send(result);
        self.dispatch();
    }

    fn refresh_idle(&self) {
        let idle = self.inner.lock().expect("queue lock poisoned").is_idle();
        let changed = self.idle_tx.send_if_modified(|current| {
            if *current != idle {
                *current = idle;
                true
            } else {
                false
            }
        });
        if changed {
            self.events
                .emit(if idle { &Event::Idle } else { &Event::Active });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::task::task_op;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    fn queue(options: QueueOptions) -> TaskQueue<u32> {
        TaskQueue::new(options)
    }

    #[tokio::test]
    async fn test_single_task_runs_to_completion() {
        let q = queue(QueueOptions::default());
        let handle = q.add_task("t1", 0, || async { Ok(7) });
        assert_eq!(handle.wait().await.unwrap(), 7);

        let status = q.get_status();
        assert_eq!(status.completed, 1);
        assert_eq!(status.failed, 0);
        assert_eq!(status.total_added, 1);
    }

    #[tokio::test]
    async fn test_concurrency_one_never_overlaps() {
        let q = queue(QueueOptions {
            concurrency: 1,
            ..QueueOptions::default()
        });

        let current = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..5 {
            let current = current.clone();
            let max_seen = max_seen.clone();
            handles.push(q.add_task(format!("t{}", i), 0, move || async move {
                let now = current.fetch_add(1, AtomicOrdering::SeqCst) + 1;
                max_seen.fetch_max(now, AtomicOrdering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                current.fetch_sub(1, AtomicOrdering::SeqCst);
                Ok(i)
            }));
        }

        q.wait_for_idle().await;
        assert_eq!(max_seen.load(AtomicOrdering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_batch_isolates_failures() {
        let q = queue(QueueOptions::default());

        let specs = vec![
            TaskSpec::new("a", task_op(|| async { Ok(1) })),
            TaskSpec::new(
                "b",
                task_op(|| async { Err(anyhow!("navigation exploded")) }),
            ),
            TaskSpec::new("c", task_op(|| async { Ok(3) })),
        ];

        let results = q.add_batch(specs).await;
        assert_eq!(results.len(), 3);
        assert_eq!(*results[0].as_ref().unwrap(), 1);
        assert!(matches!(results[1], Err(QueueError::Failed(_))));
        assert_eq!(*results[2].as_ref().unwrap(), 3);

        let status = q.get_status();
        assert_eq!(status.completed, 2);
        assert_eq!(status.failed, 1);
    }

    #[tokio::test]
    async fn test_priority_order_with_ties_by_insertion() {
        let q = queue(QueueOptions {
            concurrency: 1,
            ..QueueOptions::default()
        });
        q.pause();

        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for (id, priority) in [("low", 0), ("high", 10), ("mid-a", 5), ("mid-b", 5)] {
            let order = order.clone();
            handles.push(q.add_task(id, priority, move || async move {
                order.lock().unwrap().push(id);
                Ok(0)
            }));
        }

        q.resume();
        q.wait_for_idle().await;

        assert_eq!(*order.lock().unwrap(), vec!["high", "mid-a", "mid-b", "low"]);
    }

    #[tokio::test]
    async fn test_history_evicts_oldest_beyond_capacity() {
        let q = queue(QueueOptions {
            concurrency: 1,
            max_task_history: 2,
            ..QueueOptions::default()
        });

        for id in ["t1", "t2", "t3"] {
            q.add_task(id, 0, || async { Ok(0) }).wait().await.unwrap();
        }

        assert!(q.task_record("t1").is_none());
        assert!(q.task_record("t2").is_some());
        assert!(q.task_record("t3").is_some());
    }

    #[tokio::test]
    async fn test_history_capacity_zero_disables_history() {
        let q = queue(QueueOptions {
            max_task_history: 0,
            ..QueueOptions::default()
        });

        q.add_task("t1", 0, || async { Ok(0) }).wait().await.unwrap();
        assert!(q.task_record("t1").is_none());
        // tallies still merge settled tasks
        assert_eq!(q.get_status().completed, 1);
    }

    #[tokio::test]
    async fn test_reused_id_clears_prior_history_entry() {
        let q = queue(QueueOptions {
            concurrency: 1,
            ..QueueOptions::default()
        });

        q.add_task("job", 0, || async { Err(anyhow!("first failed")) })
            .wait()
            .await
            .unwrap_err();
        assert_eq!(q.task_record("job").unwrap().status, TaskStatus::Failed);

        q.add_task("job", 0, || async { Ok(9) }).wait().await.unwrap();
        let record = q.task_record("job").unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.result, Some(9));
    }

    #[tokio::test]
    async fn test_pause_blocks_dispatch_resume_releases() {
        let q = queue(QueueOptions::default());
        q.pause();

        let handle = q.add_task("t1", 0, || async { Ok(1) });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let status = q.get_status();
        assert_eq!(status.running, 0);
        assert_eq!(status.pending, 1);
        assert!(status.paused);

        q.resume();
        assert_eq!(handle.wait().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_clear_drops_pending_tasks() {
        let q = queue(QueueOptions::default());
        q.pause();

        let h1 = q.add_task("t1", 0, || async { Ok(1) });
        let h2 = q.add_task("t2", 0, || async { Ok(2) });
        q.clear();

        assert!(matches!(h1.wait().await, Err(QueueError::Cleared)));
        assert!(matches!(h2.wait().await, Err(QueueError::Cleared)));

        let status = q.get_status();
        assert_eq!(status.pending, 0);
        assert_eq!(status.total_added, 0);
    }

    #[tokio::test]
    async fn test_interval_rate_limit_spreads_starts() {
        let q = queue(QueueOptions {
            concurrency: 10,
            interval: Duration::from_millis(80),
            interval_cap: 2,
            ..QueueOptions::default()
        });

        let begun = std::time::Instant::now();
        let mut handles = Vec::new();
        for i in 0..4 {
            handles.push(q.add_task(format!("t{}", i), 0, || async { Ok(0) }));
        }
        q.wait_for_idle().await;

        // 4 tasks at 2 starts per 80ms window: the second window must open
        // before the last two may start
        assert!(begun.elapsed() >= Duration::from_millis(80));
        assert_eq!(q.get_status().completed, 4);
    }

    #[tokio::test]
    async fn test_set_concurrency_unblocks_waiting_tasks() {
        let q = queue(QueueOptions {
            concurrency: 1,
            ..QueueOptions::default()
        });

        let mut handles = Vec::new();
        for i in 0..3 {
            handles.push(q.add_task(format!("t{}", i), 0, move || async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(i)
            }));
        }
        q.set_concurrency(3);
        q.wait_for_idle().await;
        assert_eq!(q.get_status().completed, 3);
    }

    #[tokio::test]
    async fn test_timeout_fails_task_when_throwing() {
        let q = queue(QueueOptions {
            task_timeout: Some(Duration::from_millis(10)),
            throw_on_timeout: true,
            ..QueueOptions::default()
        });

        let handle = q.add_task("slow", 0, || async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(1)
        });

        assert!(matches!(handle.wait().await, Err(QueueError::Timeout)));
        assert_eq!(q.get_status().failed, 1);
    }

    #[tokio::test]
    async fn test_wait_for_idle_returns_immediately_when_empty() {
        let q = queue(QueueOptions::default());
        // must not hang
        q.wait_for_idle().await;
    }

    #[tokio::test]
    async fn test_queue_events_fire() {
        let q = queue(QueueOptions::default());
        let events = q.events();
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));

        let l = log.clone();
        events.on_any(move |event| {
            l.lock().unwrap().push(event.kind());
        });

        q.add_task("t1", 0, || async { Ok(1) }).wait().await.unwrap();
        q.wait_for_idle().await;

        let log = log.lock().unwrap();
        use crate::events::EventKind;
        assert!(log.contains(&EventKind::TaskAdded));
        assert!(log.contains(&EventKind::Active));
        assert!(log.contains(&EventKind::TaskCompleted));
        assert!(log.contains(&EventKind::TaskSucceeded));
        assert!(log.contains(&EventKind::Idle));
    }
}
