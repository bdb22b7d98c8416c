//! Agent registry: the 24 specialized agents and their four teams.

pub mod base;
pub mod pool;
pub mod teams;

pub use base::{Agent, AgentCapability, AgentMetadata, AgentState, SharedAgent};
pub use pool::AgentPool;
pub use teams::{Team, TeamConfig, TeamId};
