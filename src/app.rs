//! Explicit service wiring.
//!
//! Every long-lived service is constructed once here and handed to the
//! components that need it — no process-wide singletons, no ambient state.

use std::sync::Arc;
use std::time::Duration;

use crate::agents::pool::AgentPool;
use crate::config::Settings;
use crate::core::coordinator::{Coordinator, SharedTask};
use crate::core::dispatcher::Dispatcher;
use crate::core::router::Router;
use crate::engine::adapter::{EngineAdapter, StatusCallback};
use crate::engine::consultant::{consultant_executor, Consultant};
use crate::engine::head::PrimaryHead;
use crate::memory::cache::{InMemoryCache, SessionCache};
use crate::memory::repository::{InMemoryRepository, Repository};
use crate::observability::Metrics;

/// The assembled application.
pub struct Application {
    pub settings: Settings,
    pub metrics: Arc<Metrics>,
    pub pool: Arc<AgentPool>,
    pub router: Arc<Router>,
    pub dispatcher: Arc<Dispatcher>,
    pub coordinator: Arc<Coordinator>,
    pub repository: Arc<dyn Repository>,
    pub session_cache: Arc<SessionCache>,
    pub primary: Arc<EngineAdapter>,
    pub consultant: Arc<Consultant>,
    pub head: Arc<PrimaryHead>,
}

impl Application {
    /// Wire every component from settings.
    pub fn new(settings: Settings) -> Self {
        let metrics = Arc::new(Metrics::new());

        let pool = Arc::new(AgentPool::new());
        if let Err(e) = pool.initialize_from_path(settings.agents_config_path.as_deref()) {
            tracing::warn!(error = %e, "configured roster invalid, using built-in roster");
            pool.initialize_default()
                .expect("built-in roster initializes cleanly");
        }

        let router = Arc::new(Router::new(pool.clone()));
        let dispatcher = Arc::new(Dispatcher::new(&settings.concurrency, metrics.clone()));

        // Progress ticks from long engine calls land in the log stream.
        let on_status: StatusCallback =
            Arc::new(|message: &str| tracing::info!(target: "hivemind::engine", "{message}"));

        let primary = Arc::new(
            EngineAdapter::new(settings.primary.clone())
                .with_metrics(metrics.clone())
                .with_status(on_status.clone()),
        );
        let consultant_adapter = Arc::new(
            EngineAdapter::new(settings.consultant.clone())
                .with_metrics(metrics.clone())
                .with_status(on_status),
        );
        let consultant = Arc::new(Consultant::new(consultant_adapter.clone(), pool.clone()));

        // Agents run as consultant-engine calls with the agent role as the
        // system prompt.
        dispatcher.set_executor(consultant_executor(consultant_adapter, pool.clone()));

        let repository: Arc<dyn Repository> = Arc::new(InMemoryRepository::new());
        let session_cache = Arc::new(SessionCache::new(
            Arc::new(InMemoryCache::new()),
            Duration::from_secs(settings.session_ttl),
        ));

        let head = Arc::new(PrimaryHead::new(
            primary.clone(),
            consultant.clone(),
            dispatcher.clone(),
            pool.clone(),
            metrics.clone(),
            settings.max_dialogue_turns,
        ));

        let coordinator = Arc::new(
            Coordinator::new(
                router.clone(),
                dispatcher.clone(),
                repository.clone(),
                metrics.clone(),
            )
            .with_head(head.clone())
            .with_session_cache(session_cache.clone()),
        );

        Self {
            settings,
            metrics,
            pool,
            router,
            dispatcher,
            coordinator,
            repository,
            session_cache,
            primary,
            consultant,
            head,
        }
    }

    /// Wire from the process environment.
    pub fn from_env() -> Self {
        Self::new(Settings::from_env())
    }

    /// Start background services (queue workers).
    pub fn start(&self) {
        self.dispatcher.start(self.settings.concurrency.queue_workers);
    }

    /// Drain background services.
    pub async fn shutdown(&self) {
        self.dispatcher.stop(Duration::from_secs(10)).await;
    }

    /// Background-process a task created through the submission surface.
    pub async fn process_existing_task(&self, task: SharedTask) {
        self.coordinator.process_existing_task(task).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::coordinator::{TaskPriority, TaskResult, TaskState};
    use crate::core::dispatcher::ExecutorFn;
    use crate::memory::repository::InMemoryRepository;

    /// Coordinator over a fresh dispatcher with the given executor (or the
    /// placeholder when `None`).
    fn test_coordinator(executor: Option<ExecutorFn>) -> (Arc<Coordinator>, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        let pool = Arc::new(AgentPool::with_default_roster());
        let router = Arc::new(crate::core::router::Router::new(pool));
        let dispatcher = Arc::new(Dispatcher::new(
            &crate::config::ConcurrencySettings::default(),
            metrics.clone(),
        ));
        if let Some(executor) = executor {
            dispatcher.set_executor(executor);
        }
        let repository: Arc<dyn Repository> = Arc::new(InMemoryRepository::new());
        let coordinator = Arc::new(Coordinator::new(
            router,
            dispatcher,
            repository,
            metrics.clone(),
        ));
        (coordinator, metrics)
    }

    fn echo_executor() -> ExecutorFn {
        Arc::new(|task, agent| {
            let (task_id, agent_id, team_id) = {
                let a = agent.read();
                (
                    task.read().id.to_string(),
                    a.id().to_string(),
                    a.team().to_string(),
                )
            };
            Box::pin(async move {
                Ok(TaskResult::success(
                    &task_id,
                    &agent_id,
                    &team_id,
                    format!("output from {agent_id}"),
                ))
            })
        })
    }

    fn stub_engine(
        dir: &tempfile::TempDir,
        name: &str,
        reply: &str,
    ) -> Arc<crate::engine::adapter::EngineAdapter> {
        use crate::engine::profile::{EngineKind, EngineProfile};

        let stub = dir.path().join(name);
        std::fs::write(
            &stub,
            format!(
                "#!/bin/sh\nprintf '{{\"type\":\"content\",\"content\":\"{reply}\",\"index\":0}}\\n{{\"type\":\"done\"}}\\n'\n"
            ),
        )
        .unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&stub, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        let kind = if name.contains("primary") {
            EngineKind::Primary
        } else {
            EngineKind::Consultant
        };
        let mut profile = EngineProfile::default_for(kind);
        profile.cli_path = stub.to_string_lossy().to_string();
        Arc::new(crate::engine::adapter::EngineAdapter::new(profile))
    }

    /// Coordinator with a consensus planner backed by fixed-reply engine
    /// stubs and the echo executor.
    fn coordinator_with_head(
        dir: &tempfile::TempDir,
        primary_reply: &str,
        consultant_reply: &str,
        max_turns: usize,
    ) -> Arc<Coordinator> {
        let metrics = Arc::new(Metrics::new());
        let pool = Arc::new(AgentPool::with_default_roster());
        let router = Arc::new(Router::new(pool.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            &crate::config::ConcurrencySettings::default(),
            metrics.clone(),
        ));
        dispatcher.set_executor(echo_executor());

        let primary = stub_engine(dir, "primary-stub", primary_reply);
        let consultant_adapter = stub_engine(dir, "consultant-stub", consultant_reply);
        let consultant = Arc::new(Consultant::new(consultant_adapter, pool.clone()));
        let head = Arc::new(PrimaryHead::new(
            primary,
            consultant,
            dispatcher.clone(),
            pool,
            metrics.clone(),
            max_turns,
        ));

        let repository: Arc<dyn Repository> = Arc::new(InMemoryRepository::new());
        Arc::new(
            Coordinator::new(router, dispatcher, repository, metrics).with_head(head),
        )
    }

    fn sleeping_executor(secs: u64) -> ExecutorFn {
        Arc::new(move |task, agent| {
            let (task_id, agent_id, team_id) = {
                let a = agent.read();
                (
                    task.read().id.to_string(),
                    a.id().to_string(),
                    a.team().to_string(),
                )
            };
            Box::pin(async move {
                tokio::time::sleep(std::time::Duration::from_secs(secs)).await;
                Ok(TaskResult::success(&task_id, &agent_id, &team_id, "late".into()))
            })
        })
    }

    #[tokio::test]
    async fn test_application_wires_default_roster() {
        let app = Application::new(Settings::default());
        assert_eq!(app.pool.total_agents(), 24);
        assert_eq!(app.dispatcher.concurrency_status().global.max, 32);
    }

    #[tokio::test]
    async fn test_end_to_end_single_team_completion() {
        // The placeholder executor stands in for the engine, exercising
        // the full pipeline.
        let (coordinator, _) = test_coordinator(None);
        let (task, response) = coordinator
            .process_task(
                "Build and implement a backend api feature",
                TaskPriority::Normal,
                None,
                None,
            )
            .await;

        let task = task.read();
        assert_eq!(task.state, TaskState::Completed);
        assert_eq!(task.target_agents, vec!["DEV-002".to_string()]);
        assert_eq!(task.results.len(), 1);
        // Synthesis identity: one result, returned verbatim.
        assert_eq!(response, task.results[0].output);
        assert_eq!(task.synthesized_response.as_deref(), Some(response.as_str()));
        assert!(task.started_at.unwrap() <= task.completed_at.unwrap());
    }

    #[tokio::test]
    async fn test_end_to_end_multi_team_synthesis_sections() {
        let (coordinator, _) = test_coordinator(None);
        let (task, response) = coordinator
            .process_task(
                "test quality regression performance coverage security vulnerability audit pentest exploit",
                TaskPriority::Normal,
                None,
                None,
            )
            .await;

        let task = task.read();
        assert_eq!(task.state, TaskState::Completed);

        let teams: std::collections::HashSet<String> = task
            .target_teams
            .iter()
            .map(|t| t.to_string())
            .collect();
        assert!(teams.contains("SEC") && teams.contains("QA"), "got {teams:?}");
        assert!(task.results.len() >= 2);

        // Multi-result synthesis renders [TEAM] sections joined by blank
        // lines, in arrival order.
        assert!(response.contains("[SEC]"));
        assert!(response.contains("[QA]"));
        assert!(response.contains("\n\n"));
    }

    #[tokio::test]
    async fn test_cancel_running_task_then_cancel_again() {
        let (coordinator, _) = test_coordinator(Some(sleeping_executor(30)));

        let background = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .process_task(
                        "Build and implement a backend api feature",
                        TaskPriority::Normal,
                        None,
                        None,
                    )
                    .await
            })
        };

        // Wait for the task to appear and reach RUNNING.
        let mut task_id = None;
        for _ in 0..200 {
            if let Some(task) = coordinator
                .get_tasks_by_state(TaskState::Running)
                .into_iter()
                .next()
            {
                task_id = Some(task.read().id);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let task_id = task_id.expect("task never reached RUNNING");

        assert!(coordinator.cancel_task(task_id).await);
        let task = coordinator.get_task(task_id).unwrap();
        assert_eq!(task.read().state, TaskState::Cancelled);

        // A second cancel finds the task terminal.
        assert!(!coordinator.cancel_task(task_id).await);

        // The pipeline drains without flipping the terminal state.
        let (task, _) = background.await.unwrap();
        assert_eq!(task.read().state, TaskState::Cancelled);
        assert!(task.read().results.is_empty());
    }

    #[tokio::test]
    async fn test_dialogue_consensus_routes_named_agents() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator_with_head(
            &dir,
            "plan: build the cache",
            "AGREED. Use DEV-001 and DEV-002.",
            10,
        );

        let (task, response) = coordinator
            .process_task(
                "implement a cache with LRU eviction",
                TaskPriority::Normal,
                None,
                None,
            )
            .await;

        let task = task.read();
        assert_eq!(task.state, TaskState::Completed);
        // The consensus agent set replaced keyword routing.
        assert_eq!(
            task.target_agents,
            vec!["DEV-001".to_string(), "DEV-002".to_string()]
        );
        assert_eq!(task.results.len(), 2);
        assert!(response.contains("output from DEV-001"));
        assert!(response.contains("output from DEV-002"));
    }

    #[tokio::test]
    async fn test_dialogue_no_consensus_returns_feedback() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator_with_head(
            &dir,
            "plan: something",
            "Needs more detail first.",
            2,
        );

        let (task, response) = coordinator
            .process_task("implement a cache with LRU eviction", TaskPriority::Normal, None, None)
            .await;

        // No agents ran; the consultant's last feedback is the response.
        assert_eq!(response, "Needs more detail first.");
        let task = task.read();
        assert_eq!(task.state, TaskState::Completed);
        assert!(task.results.is_empty());
        assert_eq!(task.synthesized_response.as_deref(), Some(response.as_str()));
    }

    #[tokio::test]
    async fn test_dialogue_agreement_without_agents_returns_plan() {
        let dir = tempfile::tempdir().unwrap();
        let coordinator = coordinator_with_head(
            &dir,
            "you can answer this directly",
            "AGREED. No agents needed.",
            10,
        );

        let (task, response) = coordinator
            .process_task("design a naming scheme", TaskPriority::Normal, None, None)
            .await;

        assert_eq!(response, "you can answer this directly");
        let task = task.read();
        assert_eq!(task.state, TaskState::Completed);
        assert!(task.results.is_empty());
    }

    #[tokio::test]
    async fn test_dialogue_unavailable_falls_back_to_keyword_routing() {
        // Default engine profiles point at binaries that do not exist in
        // the test environment, so the dialogue aborts and the Router
        // takes over.
        let app = Application::new(Settings::default());
        let metrics = app.metrics.clone();
        let dispatcher = Arc::new(Dispatcher::new(
            &app.settings.concurrency,
            metrics.clone(),
        ));
        let coordinator = Coordinator::new(
            app.router.clone(),
            dispatcher,
            app.repository.clone(),
            metrics,
        )
        .with_head(app.head.clone());

        let (task, _) = coordinator
            .process_task(
                "Build and implement a backend api feature",
                TaskPriority::Normal,
                None,
                None,
            )
            .await;

        let task = task.read();
        assert_eq!(task.state, TaskState::Completed);
        assert_eq!(task.target_agents, vec!["DEV-002".to_string()]);
    }

    #[tokio::test]
    async fn test_session_context_recorded_after_completion() {
        let session_cache = Arc::new(SessionCache::new(
            Arc::new(InMemoryCache::new()),
            std::time::Duration::from_secs(60),
        ));
        let metrics = Arc::new(Metrics::new());
        let pool = Arc::new(AgentPool::with_default_roster());
        let router = Arc::new(Router::new(pool));
        let dispatcher = Arc::new(Dispatcher::new(
            &crate::config::ConcurrencySettings::default(),
            metrics.clone(),
        ));
        let repository: Arc<dyn Repository> = Arc::new(InMemoryRepository::new());
        let coordinator = Coordinator::new(router, dispatcher, repository, metrics)
            .with_session_cache(session_cache.clone());

        let (_, response) = coordinator
            .process_task(
                "Build and implement a backend api feature",
                TaskPriority::Normal,
                Some("s-1".to_string()),
                None,
            )
            .await;

        let context = session_cache.get_context("s-1").await.unwrap();
        let messages = context["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0]["prompt"],
            "Build and implement a backend api feature"
        );
        assert_eq!(messages[0]["response"], response);
    }

    #[tokio::test]
    async fn test_end_to_end_no_route_fails_without_dispatch() {
        let app = Application::new(Settings::default());
        let (task, response) = app
            .coordinator
            .process_task("asdfghjkl qwertyuiop", TaskPriority::Normal, None, None)
            .await;

        let task = task.read();
        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(response, "No suitable agents found for task");
        assert_eq!(task.error.as_deref(), Some("No suitable agents found for task"));
        assert!(task.results.is_empty());
        assert!(app
            .metrics
            .encode()
            .contains("status=\"failed\""));
    }
}
