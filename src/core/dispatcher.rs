//! Concurrency-controlled task execution.
//!
//! Three counting semaphores nest around every execution in strict order —
//! global, then per-team, then per-agent — acquired outside-in and released
//! inside-out. Permits are RAII guards, so every exit path (success,
//! timeout, cancellation, panic) releases them. With the default
//! `max_per_agent = 1` an agent is a single-writer resource, which also
//! serialises writes to its runtime state.
//!
//! A priority queue feeds a configurable number of worker loops; `execute`
//! can also be called directly to bypass the queue.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::agents::base::SharedAgent;
use crate::config::ConcurrencySettings;
use crate::core::coordinator::{SharedTask, TaskResult};
use crate::errors::HivemindError;
use crate::observability::Metrics;

/// Future returned by an executor invocation.
pub type ExecutorFuture = BoxFuture<'static, Result<TaskResult, HivemindError>>;

/// The injected execution strategy.
///
/// Agents are uniform; behaviour differences are data (keywords, system
/// prompt), so one polymorphic function serves the whole pool. The
/// subprocess executor kills its engine child when the returned future is
/// dropped, which is how timeout and cancellation reach the child process.
pub type ExecutorFn = Arc<dyn Fn(SharedTask, SharedAgent) -> ExecutorFuture + Send + Sync>;

/// Execution status for queued tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

/// A task waiting in (or drained from) the dispatcher queue.
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub task: SharedTask,
    pub agent: SharedAgent,
    pub priority: u8,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
}

/// Shared handle to a queued task, updated by the worker that drains it.
pub type SharedQueuedTask = Arc<RwLock<QueuedTask>>;

/// Heap entry ordering: priority desc, then queued_at asc, then enqueue
/// sequence asc — fully deterministic dequeue order.
struct QueueEntry {
    queued: SharedQueuedTask,
    priority: u8,
    queued_at: DateTime<Utc>,
    seq: u64,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.queued_at == other.queued_at && self.seq == other.seq
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.queued_at.cmp(&self.queued_at))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Per-layer concurrency snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerStatus {
    pub max: usize,
    pub available: usize,
    pub in_use: usize,
}

/// Snapshot of every concurrency layer plus queue depth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyStatus {
    pub global: LayerStatus,
    pub teams: std::collections::HashMap<String, LayerStatus>,
    pub agents: std::collections::HashMap<String, LayerStatus>,
    pub queue_size: usize,
}

enum Outcome {
    Success(TaskResult),
    Error(HivemindError),
    Timeout,
    Cancelled,
}

/// Dispatcher: layered-semaphore concurrency control with a priority queue.
pub struct Dispatcher {
    max_global_concurrent: usize,
    max_per_team: usize,
    max_per_agent: usize,
    default_timeout: Duration,
    executor_fn: RwLock<Option<ExecutorFn>>,

    global_semaphore: Arc<Semaphore>,
    // Lazily created per id on first use; with a fixed pool these maps
    // stabilise immediately and never need eviction.
    team_semaphores: DashMap<String, Arc<Semaphore>>,
    agent_semaphores: DashMap<String, Arc<Semaphore>>,

    queue: Mutex<BinaryHeap<QueueEntry>>,
    queue_notify: Notify,
    queue_seq: AtomicU64,

    // Cancellation: one watch channel per live task id. Multiple agent
    // executions of the same task share the channel.
    cancellations: DashMap<String, watch::Sender<bool>>,

    metrics: Arc<Metrics>,
    running: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new(concurrency: &ConcurrencySettings, metrics: Arc<Metrics>) -> Self {
        tracing::info!(
            max_global = concurrency.max_global_concurrent,
            max_per_team = concurrency.max_per_team,
            max_per_agent = concurrency.max_per_agent,
            default_timeout = concurrency.default_task_timeout,
            "dispatcher initialized"
        );
        Self {
            max_global_concurrent: concurrency.max_global_concurrent,
            max_per_team: concurrency.max_per_team,
            max_per_agent: concurrency.max_per_agent,
            default_timeout: concurrency.default_timeout(),
            executor_fn: RwLock::new(None),
            global_semaphore: Arc::new(Semaphore::new(concurrency.max_global_concurrent)),
            team_semaphores: DashMap::new(),
            agent_semaphores: DashMap::new(),
            queue: Mutex::new(BinaryHeap::new()),
            queue_notify: Notify::new(),
            queue_seq: AtomicU64::new(0),
            cancellations: DashMap::new(),
            metrics,
            running: AtomicBool::new(false),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Inject the execution strategy. Without one, `execute` produces a
    /// successful placeholder result (useful in tests).
    pub fn set_executor(&self, executor: ExecutorFn) {
        *self.executor_fn.write() = Some(executor);
    }

    fn team_semaphore(&self, team_id: &str) -> Arc<Semaphore> {
        self.team_semaphores
            .entry(team_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.max_per_team)))
            .clone()
    }

    fn agent_semaphore(&self, agent_id: &str) -> Arc<Semaphore> {
        self.agent_semaphores
            .entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.max_per_agent)))
            .clone()
    }

    fn cancel_receiver(&self, task_id: &str) -> watch::Receiver<bool> {
        self.cancellations
            .entry(task_id.to_string())
            .or_insert_with(|| watch::channel(false).0)
            .subscribe()
    }

    /// Submit a task for queued execution.
    pub fn submit(&self, task: SharedTask, agent: SharedAgent, priority: Option<u8>) -> SharedQueuedTask {
        let priority = priority.unwrap_or_else(|| task.read().priority.value());
        let queued_at = Utc::now();

        let queued: SharedQueuedTask = Arc::new(RwLock::new(QueuedTask {
            task: task.clone(),
            agent: agent.clone(),
            priority,
            queued_at,
            started_at: None,
            completed_at: None,
            status: ExecutionStatus::Queued,
        }));

        let seq = self.queue_seq.fetch_add(1, AtomicOrdering::Relaxed);
        self.queue.lock().push(QueueEntry {
            queued: queued.clone(),
            priority,
            queued_at,
            seq,
        });
        self.queue_notify.notify_one();
        self.metrics.queue_size(priority, 1);

        tracing::info!(
            task_id = %task.read().id,
            agent_id = %agent.read().id(),
            team_id = %agent.read().team(),
            priority,
            "task submitted to queue"
        );

        queued
    }

    /// Execute a task immediately, bypassing the queue.
    ///
    /// Acquires global → team → agent permits, runs the executor under the
    /// deadline, and returns a `TaskResult` — executor failures are data,
    /// not errors. `metadata["outcome"]` records which path finished the
    /// execution (`success`, `error`, `timeout`, `cancelled`).
    pub async fn execute(
        &self,
        task: SharedTask,
        agent: SharedAgent,
        timeout: Option<Duration>,
    ) -> TaskResult {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let task_id = task.read().id.to_string();
        let (agent_id, team_id) = {
            let a = agent.read();
            (a.id().to_string(), a.team().to_string())
        };

        // Outside-in acquisition. Guards drop in reverse declaration order,
        // releasing inside-out.
        let _global = self
            .global_semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("global semaphore never closed");
        let _team = self
            .team_semaphore(&team_id)
            .acquire_owned()
            .await
            .expect("team semaphore never closed");
        let _agent = self
            .agent_semaphore(&agent_id)
            .acquire_owned()
            .await
            .expect("agent semaphore never closed");

        {
            let mut a = agent.write();
            a.assign_task(&task_id);
            a.start_execution();
        }
        self.metrics.in_progress(&team_id, &agent_id, 1);
        let mut cancel_rx = self.cancel_receiver(&task_id);
        let start = Instant::now();

        let execution: ExecutorFuture = match self.executor_fn.read().as_ref() {
            Some(executor) => executor(task.clone(), agent.clone()),
            None => {
                let (t, a, tm) = (task_id.clone(), agent_id.clone(), team_id.clone());
                Box::pin(async move {
                    Ok(TaskResult::success(
                        &t,
                        &a,
                        &tm,
                        "Task executed (no executor provided)".to_string(),
                    ))
                })
            }
        };

        // Dropping `execution` on the timeout/cancel arms is what reaps a
        // subprocess executor's child (its kill-on-drop guard fires).
        let outcome = tokio::select! {
            res = tokio::time::timeout(timeout, execution) => match res {
                Ok(Ok(result)) => Outcome::Success(result),
                Ok(Err(e)) => Outcome::Error(e),
                Err(_) => Outcome::Timeout,
            },
            _ = Self::wait_cancelled(&mut cancel_rx) => Outcome::Cancelled,
        };

        let elapsed = start.elapsed().as_secs_f64();
        // Drop the channel only when no sibling execution of the same task
        // still subscribes to it (our own receiver counts for one).
        self.cancellations
            .remove_if(&task_id, |_, tx| tx.receiver_count() <= 1);

        let mut result = match outcome {
            Outcome::Success(mut result) => {
                agent.write().complete_task(true);
                result.execution_time = elapsed;
                self.metrics.record_task("success", &team_id, &agent_id);
                result
                    .metadata
                    .insert("outcome".into(), "success".into());
                tracing::info!(
                    task_id = %task_id,
                    agent_id = %agent_id,
                    execution_time = elapsed,
                    "task executed successfully"
                );
                result
            }
            Outcome::Error(e) => {
                agent.write().complete_task(false);
                self.metrics.record_task("error", &team_id, &agent_id);
                tracing::error!(task_id = %task_id, agent_id = %agent_id, error = %e, "task execution failed");
                let mut result = TaskResult::failure(&task_id, &agent_id, &team_id, e.to_string());
                result.execution_time = elapsed;
                result.metadata.insert("outcome".into(), "error".into());
                result
            }
            Outcome::Timeout => {
                agent.write().complete_task(false);
                self.metrics.record_task("timeout", &team_id, &agent_id);
                let message = HivemindError::ExecutorTimeout {
                    seconds: timeout.as_secs(),
                }
                .to_string();
                tracing::error!(
                    task_id = %task_id,
                    agent_id = %agent_id,
                    timeout_secs = timeout.as_secs(),
                    "task execution timeout"
                );
                let mut result = TaskResult::failure(&task_id, &agent_id, &team_id, message);
                result.execution_time = elapsed;
                result.metadata.insert("outcome".into(), "timeout".into());
                result
            }
            Outcome::Cancelled => {
                agent.write().complete_task(false);
                self.metrics.record_task("cancelled", &team_id, &agent_id);
                tracing::info!(task_id = %task_id, agent_id = %agent_id, "task execution cancelled");
                let mut result = TaskResult::failure(
                    &task_id,
                    &agent_id,
                    &team_id,
                    HivemindError::Cancelled.to_string(),
                );
                result.execution_time = elapsed;
                result
                    .metadata
                    .insert("outcome".into(), "cancelled".into());
                result
            }
        };

        self.metrics.observe_duration(&team_id, &agent_id, elapsed);
        self.metrics.in_progress(&team_id, &agent_id, -1);
        result.task_id = task_id;
        result
    }

    async fn wait_cancelled(rx: &mut watch::Receiver<bool>) {
        if *rx.borrow() {
            return;
        }
        loop {
            if rx.changed().await.is_err() {
                // Sender gone: no cancellation can ever arrive.
                std::future::pending::<()>().await;
            }
            if *rx.borrow() {
                return;
            }
        }
    }

    /// Signal cancellation to every live execution of `task_id`.
    ///
    /// Returns `false` when no execution of that task is currently live.
    /// In that case the channel is pre-armed so an execution that is
    /// between semaphore acquisition and channel registration still
    /// observes the signal.
    pub fn cancel_task(&self, task_id: &str) -> bool {
        match self.cancellations.get(task_id) {
            Some(tx) => {
                let _ = tx.send(true);
                true
            }
            None => {
                // Entry API: if an execution registered its channel in the
                // meantime, signal that one instead of replacing it.
                let tx = self
                    .cancellations
                    .entry(task_id.to_string())
                    .or_insert_with(|| watch::channel(true).0);
                let _ = tx.send(true);
                false
            }
        }
    }

    /// Start `num_workers` queue worker loops.
    pub fn start(self: &Arc<Self>, num_workers: usize) {
        if self.running.swap(true, AtomicOrdering::SeqCst) {
            tracing::warn!("dispatcher already running");
            return;
        }

        let mut workers = self.workers.lock();
        for worker_id in 0..num_workers.max(1) {
            let dispatcher = self.clone();
            workers.push(tokio::spawn(async move {
                dispatcher.worker_loop(worker_id).await;
            }));
        }
        tracing::info!(num_workers = num_workers.max(1), "dispatcher started");
    }

    /// Stop the workers, waiting up to `grace` for them to drain.
    pub async fn stop(&self, grace: Duration) {
        if !self.running.swap(false, AtomicOrdering::SeqCst) {
            tracing::warn!("dispatcher not running");
            return;
        }
        self.queue_notify.notify_waiters();

        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        for mut worker in workers {
            if tokio::time::timeout(grace, &mut worker).await.is_err() {
                tracing::warn!("dispatcher worker did not stop gracefully");
                worker.abort();
            }
        }
        tracing::info!("dispatcher stopped");
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        tracing::info!(worker_id, "dispatcher worker started");

        while self.running.load(AtomicOrdering::SeqCst) {
            let entry = self.queue.lock().pop();
            let Some(entry) = entry else {
                // Re-check `running` at least once a second even if nothing
                // is ever enqueued.
                tokio::select! {
                    _ = self.queue_notify.notified() => {}
                    _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                }
                continue;
            };

            self.metrics.queue_size(entry.priority, -1);
            let (task, agent) = {
                let mut queued = entry.queued.write();
                queued.status = ExecutionStatus::Running;
                queued.started_at = Some(Utc::now());
                (queued.task.clone(), queued.agent.clone())
            };

            let result = self.execute(task, agent, None).await;

            let mut queued = entry.queued.write();
            queued.completed_at = Some(Utc::now());
            queued.status = match result
                .metadata
                .get("outcome")
                .and_then(|v| v.as_str())
                .unwrap_or("error")
            {
                "success" => ExecutionStatus::Completed,
                "timeout" => ExecutionStatus::Timeout,
                "cancelled" => ExecutionStatus::Cancelled,
                _ => ExecutionStatus::Failed,
            };
        }

        tracing::info!(worker_id, "dispatcher worker stopped");
    }

    pub fn queue_size(&self) -> usize {
        self.queue.lock().len()
    }

    /// Snapshot of max/available/in-use for each layer plus queue depth.
    pub fn concurrency_status(&self) -> ConcurrencyStatus {
        let layer = |max: usize, sem: &Semaphore| LayerStatus {
            max,
            available: sem.available_permits(),
            in_use: max.saturating_sub(sem.available_permits()),
        };

        ConcurrencyStatus {
            global: layer(self.max_global_concurrent, &self.global_semaphore),
            teams: self
                .team_semaphores
                .iter()
                .map(|e| (e.key().clone(), layer(self.max_per_team, e.value())))
                .collect(),
            agents: self
                .agent_semaphores
                .iter()
                .map(|e| (e.key().clone(), layer(self.max_per_agent, e.value())))
                .collect(),
            queue_size: self.queue_size(),
        }
    }
}
