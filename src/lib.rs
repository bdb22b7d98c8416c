//! # HIVEMIND
//!
//! A multi-agent orchestration backend. Prompts are analyzed for keywords,
//! routed to one or more specialized agents grouped into four fixed teams
//! (DEV, SEC, INF, QA), executed as subprocess calls against external LLM
//! CLIs under layered concurrency limits, and synthesized into a single
//! user-facing response.
//!
//! The pipeline for one prompt:
//!
//! ```text
//! prompt → Coordinator::create_task → analyze (keywords)
//!        → Router::route                  → [(team, agent), …]
//!        → Dispatcher::execute (parallel) → [TaskResult, …]
//!        → Coordinator::synthesize        → unified response
//! ```
//!
//! Complex prompts take the dialogue variant first: the primary engine
//! proposes a plan, the consultant engine evaluates it, and the consensus
//! names the agents to run.

pub mod agents;
pub mod app;
pub mod config;
pub mod core;
pub mod engine;
pub mod errors;
pub mod memory;
pub mod observability;
pub mod server;

pub use crate::agents::base::{Agent, AgentMetadata, AgentState};
pub use crate::agents::pool::AgentPool;
pub use crate::agents::teams::{Team, TeamId};
pub use crate::app::Application;
pub use crate::config::Settings;
pub use crate::core::coordinator::{Coordinator, Task, TaskPriority, TaskResult, TaskState};
pub use crate::core::dispatcher::Dispatcher;
pub use crate::core::router::Router;
pub use crate::errors::HivemindError;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
