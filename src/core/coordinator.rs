//! Central coordination: task lifecycle and the end-to-end pipeline.
//!
//! The coordinator drives one prompt from submission to synthesized
//! response: analyze → route → execute (fan-out through the dispatcher) →
//! synthesize. Task state transitions are monotonic — nothing leaves a
//! terminal state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::agents::teams::TeamId;
use crate::core::dispatcher::Dispatcher;
use crate::core::router::{extract_keywords, Route, Router};
use crate::engine::head::{PlanOutcome, PrimaryHead};
use crate::errors::HivemindError;
use crate::memory::cache::SessionCache;
use crate::memory::repository::Repository;
use crate::observability::Metrics;

/// Task execution states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    /// Terminal states freeze the task.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        }
    }
}

/// Task priority levels. Higher value dispatches first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl TaskPriority {
    pub fn value(&self) -> u8 {
        *self as u8
    }
}

/// Result of one agent execution. One per (task, agent) pair actually run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub agent_id: String,
    pub team_id: String,
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
    pub execution_time: f64,
    #[serde(default)]
    pub metadata: serde_json::Map<String, Value>,
}

impl TaskResult {
    pub fn success(task_id: &str, agent_id: &str, team_id: &str, output: String) -> Self {
        Self {
            task_id: task_id.to_string(),
            agent_id: agent_id.to_string(),
            team_id: team_id.to_string(),
            success: true,
            output,
            error: None,
            execution_time: 0.0,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn failure(task_id: &str, agent_id: &str, team_id: &str, error: String) -> Self {
        Self {
            task_id: task_id.to_string(),
            agent_id: agent_id.to_string(),
            team_id: team_id.to_string(),
            success: false,
            output: String::new(),
            error: Some(error),
            execution_time: 0.0,
            metadata: serde_json::Map::new(),
        }
    }
}

/// A task flowing through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub prompt: String,
    pub state: TaskState,
    pub priority: TaskPriority,

    // Routing information
    pub target_teams: Vec<TeamId>,
    pub target_agents: Vec<String>,
    pub keywords: Vec<String>,

    // Execution metadata
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,

    // Results, appended in arrival order and frozen at terminal transition.
    pub results: Vec<TaskResult>,
    pub synthesized_response: Option<String>,
    pub error: Option<String>,

    pub parent_task_id: Option<Uuid>,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
}

/// Shared handle to a coordinator-owned task.
pub type SharedTask = Arc<RwLock<Task>>;

impl Task {
    pub fn new(prompt: &str, priority: TaskPriority) -> Self {
        Self {
            id: Uuid::new_v4(),
            prompt: prompt.to_string(),
            state: TaskState::Pending,
            priority,
            target_teams: Vec::new(),
            target_agents: Vec::new(),
            keywords: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            results: Vec::new(),
            synthesized_response: None,
            error: None,
            parent_task_id: None,
            session_id: None,
            user_id: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_running(&self) -> bool {
        self.state == TaskState::Running
    }

    /// Wall time between start and completion, when both are set.
    pub fn duration(&self) -> Option<f64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        }
    }

    /// Transition to `new_state`, stamping timestamps.
    ///
    /// Terminal states are frozen: a transition out of one is refused and
    /// returns `false`.
    pub fn transition_to(&mut self, new_state: TaskState) -> bool {
        if self.state.is_terminal() {
            tracing::warn!(
                task_id = %self.id,
                from = self.state.as_str(),
                to = new_state.as_str(),
                "refusing transition out of terminal state"
            );
            return false;
        }

        self.state = new_state;
        match new_state {
            TaskState::Running => {
                if self.started_at.is_none() {
                    self.started_at = Some(Utc::now());
                }
            }
            s if s.is_terminal() => {
                self.completed_at = Some(Utc::now());
            }
            _ => {}
        }
        true
    }

    pub fn add_result(&mut self, result: TaskResult) {
        self.results.push(result);
    }
}

/// Kind of task event published to streaming subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventKind {
    /// State or progress change while the task is live.
    TaskUpdate,
    /// Terminal notification carrying the synthesized response or error.
    TaskResult,
}

/// A task lifecycle event, broadcast to WebSocket subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub kind: TaskEventKind,
    pub task_id: Uuid,
    pub state: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Central coordinator: owns the task table and drives the pipeline.
pub struct Coordinator {
    router: Arc<Router>,
    dispatcher: Arc<Dispatcher>,
    repository: Arc<dyn Repository>,
    metrics: Arc<Metrics>,
    tasks: DashMap<Uuid, SharedTask>,
    events: broadcast::Sender<TaskEvent>,
    /// Consensus planner for the dialogue variant. Without one, every
    /// prompt takes the keyword-routing path.
    head: Option<Arc<PrimaryHead>>,
    /// Best-effort session context store.
    session_cache: Option<Arc<SessionCache>>,
}

impl Coordinator {
    pub fn new(
        router: Arc<Router>,
        dispatcher: Arc<Dispatcher>,
        repository: Arc<dyn Repository>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        tracing::info!("coordinator initialized");
        Self {
            router,
            dispatcher,
            repository,
            metrics,
            tasks: DashMap::new(),
            events,
            head: None,
            session_cache: None,
        }
    }

    /// Attach the consensus planner: complex prompts then go through the
    /// engine dialogue before keyword routing.
    pub fn with_head(mut self, head: Arc<PrimaryHead>) -> Self {
        self.head = Some(head);
        self
    }

    /// Attach the session-context cache.
    pub fn with_session_cache(mut self, session_cache: Arc<SessionCache>) -> Self {
        self.session_cache = Some(session_cache);
        self
    }

    /// Subscribe to task lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: TaskEvent) {
        // No receivers is fine; the stream surface is optional.
        let _ = self.events.send(event);
    }

    fn publish_update(&self, task: &Task, message: Option<String>) {
        self.publish(TaskEvent {
            kind: TaskEventKind::TaskUpdate,
            task_id: task.id,
            state: task.state,
            message,
            response: None,
            error: None,
        });
    }

    fn publish_result(&self, task: &Task) {
        self.publish(TaskEvent {
            kind: TaskEventKind::TaskResult,
            task_id: task.id,
            state: task.state,
            message: None,
            response: task.synthesized_response.clone(),
            error: task.error.clone(),
        });
    }

    /// Persist a status change. Transient repository failures are logged
    /// and never fail the task mid-flight.
    async fn persist_status(&self, task: &Task) {
        if let Err(e) = self
            .repository
            .update_task_status(
                task.id,
                task.state.as_str(),
                task.synthesized_response.as_deref(),
            )
            .await
        {
            tracing::warn!(task_id = %task.id, error = %e, "repository update failed");
        }
    }

    /// Create a new pending task and register it in the task table.
    pub fn create_task(
        &self,
        prompt: &str,
        priority: TaskPriority,
        session_id: Option<String>,
        user_id: Option<String>,
        parent_task_id: Option<Uuid>,
    ) -> SharedTask {
        let mut task = Task::new(prompt, priority);
        task.session_id = session_id.clone();
        task.user_id = user_id;
        task.parent_task_id = parent_task_id;

        let id = task.id;
        let shared: SharedTask = Arc::new(RwLock::new(task));
        self.tasks.insert(id, shared.clone());

        tracing::info!(task_id = %id, priority = ?priority, ?session_id, "task created");
        shared
    }

    /// Extract routing keywords from the prompt and store them on the task.
    pub fn analyze_task(&self, task: &SharedTask) {
        let keywords = extract_keywords(&task.read().prompt);
        tracing::debug!(task_id = %task.read().id, ?keywords, "task analyzed");
        task.write().keywords = keywords;
    }

    /// Record a route list's teams and agents on the task.
    fn record_targets(&self, task: &SharedTask, routes: &[Route]) {
        let mut task = task.write();
        task.target_teams = {
            let mut teams: Vec<TeamId> = Vec::new();
            for (team, _) in routes {
                if !teams.contains(&team.id()) {
                    teams.push(team.id());
                }
            }
            teams
        };
        task.target_agents = routes
            .iter()
            .map(|(_, a)| a.read().id().to_string())
            .collect();
    }

    /// Route the task to (team, agent) pairs and record the targets.
    pub fn route_task(&self, task: &SharedTask) -> Vec<Route> {
        let keywords = task.read().keywords.clone();
        let routes = self.router.route(&keywords, 3, 2);
        self.record_targets(task, &routes);

        tracing::info!(
            task_id = %task.read().id,
            teams = ?task.read().target_teams,
            agents = ?task.read().target_agents,
            "task routed"
        );
        routes
    }

    /// Fan out the task to every routed agent and gather all results.
    ///
    /// Partial failures are retained as data; the task fails if any result
    /// failed. Results become visible to synthesis only after all
    /// executions complete.
    pub async fn execute_task(&self, task: &SharedTask, routes: Vec<Route>) {
        task.write().transition_to(TaskState::Running);
        // Snapshot before awaiting: lock guards must not live across awaits.
        let snapshot = task.read().clone();
        self.publish_update(&snapshot, None);
        self.persist_status(&snapshot).await;

        let executions = routes.into_iter().map(|(_, agent)| {
            let task = task.clone();
            let dispatcher = self.dispatcher.clone();
            async move { dispatcher.execute(task, agent, None).await }
        });
        let results = futures::future::join_all(executions).await;

        let snapshot = {
            let mut task_guard = task.write();
            if task_guard.is_complete() {
                // Cancelled mid-flight: the task is frozen, late results are
                // dropped.
                tracing::debug!(task_id = %task_guard.id, "discarding results for terminal task");
                return;
            }
            for result in results {
                task_guard.add_result(result);
            }

            let any_failed =
                task_guard.error.is_some() || task_guard.results.iter().any(|r| !r.success);
            if any_failed {
                if task_guard.error.is_none() {
                    task_guard.error = Some("one or more agent executions failed".to_string());
                }
                task_guard.transition_to(TaskState::Failed);
            } else {
                task_guard.transition_to(TaskState::Completed);
            }
            task_guard.clone()
        };

        self.persist_status(&snapshot).await;
    }

    /// Merge agent results into one user-facing response.
    ///
    /// A single successful result is returned verbatim. Multiple results
    /// are rendered as `[TEAM] output` sections joined by blank lines, in
    /// arrival order, successful results only. When every result failed —
    /// including the lone-failure case — the fixed all-failed message is
    /// returned and no synthesized response is recorded.
    pub fn synthesize_response(&self, task: &SharedTask) -> String {
        let mut task = task.write();

        if task.results.is_empty() {
            return "No results to synthesize.".to_string();
        }

        if task.results.len() == 1 {
            let result = &task.results[0];
            if !result.success {
                return "All agent executions failed.".to_string();
            }
            let output = result.output.clone();
            task.synthesized_response = Some(output.clone());
            return output;
        }

        let sections: Vec<String> = task
            .results
            .iter()
            .filter(|r| r.success)
            .map(|r| format!("[{}] {}", r.team_id, r.output))
            .collect();

        if sections.is_empty() {
            return "All agent executions failed.".to_string();
        }

        let synthesized = sections.join("\n\n");
        task.synthesized_response = Some(synthesized.clone());
        tracing::info!(
            task_id = %task.id,
            result_count = task.results.len(),
            "response synthesized"
        );
        synthesized
    }

    /// Process a prompt from start to finish. The main entry point.
    ///
    /// Never returns an error: pipeline failures land in the task's state
    /// and the returned message.
    pub async fn process_task(
        &self,
        prompt: &str,
        priority: TaskPriority,
        session_id: Option<String>,
        user_id: Option<String>,
    ) -> (SharedTask, String) {
        let task = self.create_task(prompt, priority, session_id, user_id, None);
        let (task_id, task_session) = {
            let t = task.read();
            (t.id, t.session_id.clone())
        };

        if let Err(e) = self
            .repository
            .create_task(
                task_session.as_deref(),
                prompt,
                None,
                TaskState::Pending.as_str(),
                Some(task_id),
            )
            .await
        {
            tracing::warn!(task_id = %task_id, error = %e, "repository create failed");
        }

        let response = self.process_existing_task(task.clone()).await;
        (task, response)
    }

    /// Run the pipeline on a task already registered in the table. Used by
    /// the background path of the submission surface.
    ///
    /// Complex prompts take the dialogue variant first: the engines reach
    /// consensus on an agent set that replaces keyword routing. Everything
    /// else flows through the Router, as does any prompt when the engines
    /// are unavailable.
    pub async fn process_existing_task(&self, task: SharedTask) -> String {
        let (prompt, session_id) = {
            let t = task.read();
            (t.prompt.clone(), t.session_id.clone())
        };

        if let (Some(cache), Some(session_id)) = (&self.session_cache, &session_id) {
            if let Some(context) = cache.get_context(session_id).await {
                let prior = context
                    .get("messages")
                    .and_then(Value::as_array)
                    .map(Vec::len)
                    .unwrap_or(0);
                tracing::debug!(
                    task_id = %task.read().id,
                    session_id = %session_id,
                    prior_messages = prior,
                    "session context loaded"
                );
            }
        }

        let response = self.run_pipeline(&task, &prompt).await;

        if let (Some(cache), Some(session_id)) = (&self.session_cache, &session_id) {
            cache.append_exchange(session_id, &prompt, &response).await;
        }
        response
    }

    async fn run_pipeline(&self, task: &SharedTask, prompt: &str) -> String {
        self.analyze_task(task);

        if let Some(head) = &self.head {
            match head.plan(prompt).await {
                PlanOutcome::Agents { agents, turns, .. } => {
                    let routes = self.router.routes_for_agents(&agents);
                    if routes.is_empty() {
                        tracing::warn!(
                            task_id = %task.read().id,
                            ?agents,
                            "consensus named no known agents, falling back to keyword routing"
                        );
                    } else {
                        tracing::info!(
                            task_id = %task.read().id,
                            ?agents,
                            turns,
                            "routing via engine consensus"
                        );
                        self.record_targets(task, &routes);
                        self.execute_task(task, routes).await;
                        let response = self.synthesize_response(task);
                        let snapshot = task.read().clone();
                        self.publish_result(&snapshot);
                        return response;
                    }
                }
                PlanOutcome::Answer { response, turns } => {
                    tracing::info!(task_id = %task.read().id, turns, "engines answered without agents");
                    return self.complete_with_response(task, response).await;
                }
                PlanOutcome::NoConsensus { response, turns } => {
                    tracing::info!(
                        task_id = %task.read().id,
                        turns,
                        "no consensus, returning consultant feedback"
                    );
                    return self.complete_with_response(task, response).await;
                }
                PlanOutcome::Unavailable { error } => {
                    tracing::warn!(
                        task_id = %task.read().id,
                        error = %error,
                        "dialogue unavailable, falling back to keyword routing"
                    );
                }
                PlanOutcome::Simple => {}
            }
        }

        let routes = self.route_task(task);

        if routes.is_empty() {
            let message = HivemindError::RoutingEmpty.to_string();
            let snapshot = {
                let mut t = task.write();
                t.error = Some(message.clone());
                t.transition_to(TaskState::Failed);
                t.clone()
            };
            self.metrics.record_task("failed", "none", "none");
            self.publish_result(&snapshot);
            self.persist_status(&snapshot).await;
            return message;
        }

        self.execute_task(task, routes).await;
        let response = self.synthesize_response(task);

        let snapshot = task.read().clone();
        self.publish_result(&snapshot);
        response
    }

    /// Complete a task whose answer came out of the dialogue itself —
    /// no agents were dispatched.
    async fn complete_with_response(&self, task: &SharedTask, response: String) -> String {
        let snapshot = {
            let mut t = task.write();
            t.transition_to(TaskState::Running);
            t.synthesized_response = Some(response.clone());
            t.transition_to(TaskState::Completed);
            t.clone()
        };
        self.publish_result(&snapshot);
        self.persist_status(&snapshot).await;
        response
    }

    pub fn get_task(&self, task_id: Uuid) -> Option<SharedTask> {
        self.tasks.get(&task_id).map(|t| t.value().clone())
    }

    pub fn get_all_tasks(&self) -> Vec<SharedTask> {
        self.tasks.iter().map(|t| t.value().clone()).collect()
    }

    pub fn get_tasks_by_state(&self, state: TaskState) -> Vec<SharedTask> {
        self.tasks
            .iter()
            .filter(|t| t.value().read().state == state)
            .map(|t| t.value().clone())
            .collect()
    }

    pub fn get_tasks_by_session(&self, session_id: &str) -> Vec<SharedTask> {
        self.tasks
            .iter()
            .filter(|t| t.value().read().session_id.as_deref() == Some(session_id))
            .map(|t| t.value().clone())
            .collect()
    }

    /// Cancel a task. Returns `false` when the task is unknown or already
    /// terminal. A running task has its executors signalled through the
    /// dispatcher, which kills any live engine subprocesses.
    pub async fn cancel_task(&self, task_id: Uuid) -> bool {
        let task = match self.get_task(task_id) {
            Some(t) => t,
            None => return false,
        };

        if task.read().is_complete() {
            return false;
        }

        self.dispatcher.cancel_task(&task_id.to_string());
        let snapshot = {
            let mut t = task.write();
            t.transition_to(TaskState::Cancelled);
            t.clone()
        };

        self.publish_result(&snapshot);
        self.persist_status(&snapshot).await;
        tracing::info!(task_id = %task_id, "task cancelled");
        true
    }
}
