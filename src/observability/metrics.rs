//! Prometheus metrics for the orchestration pipeline.
//!
//! ## Metrics Exposed
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `hivemind_tasks_total` | Counter | `status`, `team`, `agent` | Finished executions by outcome |
//! | `hivemind_tasks_in_progress` | Gauge | `team`, `agent` | Executions currently running |
//! | `hivemind_task_duration_seconds` | Histogram | `team`, `agent` | Execution wall time |
//! | `hivemind_task_queue_size` | Gauge | `priority` | Queued tasks by priority band |
//! | `hivemind_engine_invocations_total` | Counter | `engine`, `outcome` | Engine CLI calls |
//! | `hivemind_dialogue_turns` | Histogram | — | Turns taken to reach consensus |
//!
//! All task metrics are labelled per (team, agent) only; aggregate views are
//! a `sum()` at query time. Cancelled executions count under
//! `status="cancelled"`, never under `failed`.

use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;

/// Label set for per-execution outcome counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct TaskLabels {
    pub status: String,
    pub team: String,
    pub agent: String,
}

/// Label set for in-flight and duration metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ExecutionLabels {
    pub team: String,
    pub agent: String,
}

/// Label set for the queue gauge.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct QueueLabels {
    pub priority: String,
}

/// Label set for engine invocation counters.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct EngineLabels {
    pub engine: String,
    pub outcome: String,
}

fn duration_histogram() -> Histogram {
    Histogram::new([0.5, 1.0, 5.0, 15.0, 60.0, 120.0, 300.0, 600.0].into_iter())
}

/// Thread-safe metrics registry for the orchestration pipeline.
///
/// All fields are `Family`-backed and safe to update from any task; the
/// `/metrics` endpoint renders the registry state on each scrape.
pub struct Metrics {
    registry: Registry,
    pub tasks_total: Family<TaskLabels, Counter>,
    pub tasks_in_progress: Family<ExecutionLabels, Gauge>,
    pub task_duration_seconds: Family<ExecutionLabels, Histogram, fn() -> Histogram>,
    pub task_queue_size: Family<QueueLabels, Gauge>,
    pub engine_invocations_total: Family<EngineLabels, Counter>,
    pub dialogue_turns: Histogram,
}

impl Metrics {
    /// Create a registry with every pipeline metric registered.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let tasks_total = Family::<TaskLabels, Counter>::default();
        registry.register(
            "hivemind_tasks_total",
            "Finished agent executions by outcome",
            tasks_total.clone(),
        );

        let tasks_in_progress = Family::<ExecutionLabels, Gauge>::default();
        registry.register(
            "hivemind_tasks_in_progress",
            "Agent executions currently running",
            tasks_in_progress.clone(),
        );

        let task_duration_seconds = Family::<ExecutionLabels, Histogram, fn() -> Histogram>::
            new_with_constructor(duration_histogram);
        registry.register(
            "hivemind_task_duration_seconds",
            "Agent execution wall time in seconds",
            task_duration_seconds.clone(),
        );

        let task_queue_size = Family::<QueueLabels, Gauge>::default();
        registry.register(
            "hivemind_task_queue_size",
            "Queued tasks by priority band",
            task_queue_size.clone(),
        );

        let engine_invocations_total = Family::<EngineLabels, Counter>::default();
        registry.register(
            "hivemind_engine_invocations_total",
            "Engine CLI invocations by outcome",
            engine_invocations_total.clone(),
        );

        let dialogue_turns = Histogram::new([1.0, 2.0, 3.0, 5.0, 8.0, 10.0].into_iter());
        registry.register(
            "hivemind_dialogue_turns",
            "Dialogue turns taken to reach consensus",
            dialogue_turns.clone(),
        );

        Self {
            registry,
            tasks_total,
            tasks_in_progress,
            task_duration_seconds,
            task_queue_size,
            engine_invocations_total,
            dialogue_turns,
        }
    }

    /// Count a finished execution.
    pub fn record_task(&self, status: &str, team: &str, agent: &str) {
        self.tasks_total
            .get_or_create(&TaskLabels {
                status: status.to_string(),
                team: team.to_string(),
                agent: agent.to_string(),
            })
            .inc();
    }

    /// Observe an execution duration.
    pub fn observe_duration(&self, team: &str, agent: &str, seconds: f64) {
        self.task_duration_seconds
            .get_or_create(&ExecutionLabels {
                team: team.to_string(),
                agent: agent.to_string(),
            })
            .observe(seconds);
    }

    /// Adjust the in-progress gauge by ±1.
    pub fn in_progress(&self, team: &str, agent: &str, delta: i64) {
        let gauge = self.tasks_in_progress.get_or_create(&ExecutionLabels {
            team: team.to_string(),
            agent: agent.to_string(),
        });
        if delta >= 0 {
            gauge.inc_by(delta);
        } else {
            gauge.dec_by(-delta);
        }
    }

    /// Adjust the queue gauge for a priority band by ±1.
    pub fn queue_size(&self, priority: u8, delta: i64) {
        let gauge = self.task_queue_size.get_or_create(&QueueLabels {
            priority: priority.to_string(),
        });
        if delta >= 0 {
            gauge.inc_by(delta);
        } else {
            gauge.dec_by(-delta);
        }
    }

    /// Count an engine CLI invocation.
    pub fn record_engine_call(&self, engine: &str, outcome: &str) {
        self.engine_invocations_total
            .get_or_create(&EngineLabels {
                engine: engine.to_string(),
                outcome: outcome.to_string(),
            })
            .inc();
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn encode(&self) -> String {
        let mut buf = String::new();
        encode(&mut buf, &self.registry).expect("encoding metrics should not fail");
        buf
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
