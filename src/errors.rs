//! Error types surfaced by the orchestration core.

use thiserror::Error;

/// Errors produced by the dispatch and orchestration pipeline.
///
/// Executor failures (timeouts, engine exits) are usually carried as data
/// inside a failed [`crate::core::coordinator::TaskResult`] rather than
/// propagated as `Err` — a failed agent is a result, not an abort. These
/// variants cover the paths where the pipeline itself cannot continue.
#[derive(Debug, Error)]
pub enum HivemindError {
    /// The router produced no (team, agent) routes for the task.
    #[error("No suitable agents found for task")]
    RoutingEmpty,

    /// The executor exceeded its deadline.
    #[error("execution timed out after {seconds}s")]
    ExecutorTimeout { seconds: u64 },

    /// A line from the engine CLI could not be parsed as a JSON event.
    #[error("failed to parse engine output: {message}")]
    EngineParse { message: String },

    /// The engine CLI exited non-zero.
    #[error("engine exited with status {code}: {stderr}")]
    EngineExit { code: i32, stderr: String },

    /// The engine CLI binary could not be spawned.
    #[error("engine unavailable: {0}")]
    EngineUnavailable(String),

    /// The task was cancelled before completion.
    #[error("task cancelled")]
    Cancelled,

    /// An agent or team lookup failed.
    #[error("unknown {kind} id: {id}")]
    UnknownId { kind: &'static str, id: String },

    /// Agent pool initialization was handed an invalid roster.
    #[error("invalid agent roster: {0}")]
    InvalidRoster(String),

    /// A persistence call failed. Callers log and retry; a transient
    /// repository failure must not fail a task mid-flight.
    #[error("repository error: {0}")]
    Repository(String),

    /// A cache call failed. Always degradable.
    #[error("cache error: {0}")]
    Cache(String),

    /// Catch-all for executor internals.
    #[error("{0}")]
    Execution(String),
}

impl HivemindError {
    /// Metrics status label for this error kind.
    ///
    /// Cancellations are counted under `cancelled`, not `failed`.
    pub fn status_label(&self) -> &'static str {
        match self {
            HivemindError::Cancelled => "cancelled",
            HivemindError::ExecutorTimeout { .. } => "timeout",
            _ => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_names_seconds() {
        let err = HivemindError::ExecutorTimeout { seconds: 300 };
        assert_eq!(err.to_string(), "execution timed out after 300s");
    }

    #[test]
    fn test_routing_empty_message() {
        assert_eq!(
            HivemindError::RoutingEmpty.to_string(),
            "No suitable agents found for task"
        );
    }

    #[test]
    fn test_status_labels() {
        assert_eq!(HivemindError::Cancelled.status_label(), "cancelled");
        assert_eq!(
            HivemindError::ExecutorTimeout { seconds: 1 }.status_label(),
            "timeout"
        );
        assert_eq!(HivemindError::RoutingEmpty.status_label(), "error");
    }
}
