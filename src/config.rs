//! Configuration loaded from the environment.
//!
//! All values flow through [`Settings::from_env`] once at startup and are
//! immutable afterwards. Components receive the slices they need by value
//! from the [`crate::app::Application`] constructor — there is no ambient
//! configuration state.
//!
//! # Environment Variables
//!
//! - `HIVEMIND_BIND_ADDR` — HTTP bind address (default `0.0.0.0:8600`)
//! - `HIVEMIND_PRIMARY_CLI` / `HIVEMIND_PRIMARY_MODEL` — primary engine
//! - `HIVEMIND_CONSULTANT_CLI` / `HIVEMIND_CONSULTANT_MODEL` — consultant engine
//! - `HIVEMIND_CONSULTANT_TIMEOUT` — consultant evaluation deadline in seconds
//!   (`HIVEMIND_CLAUDE_TIMEOUT` is accepted as a legacy alias)
//! - `HIVEMIND_MAX_GLOBAL_CONCURRENT` / `HIVEMIND_MAX_PER_TEAM` /
//!   `HIVEMIND_MAX_PER_AGENT` — dispatcher concurrency limits
//! - `HIVEMIND_TASK_TIMEOUT` — default agent execution deadline in seconds
//! - `HIVEMIND_AGENTS_CONFIG` — optional JSON roster path
//! - `HIVEMIND_DATABASE_URL` / `HIVEMIND_CACHE_URL` / `HIVEMIND_BUS_URL` —
//!   collaborator endpoints (informational to the core; consumed by the
//!   concrete Repository/Cache implementations wired at startup)
//! - `HIVEMIND_SESSION_TTL` — session context TTL in seconds

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::profile::{EngineKind, EngineProfile};

/// Concurrency limits for the dispatcher's layered semaphores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencySettings {
    /// Maximum concurrent executions across all agents.
    pub max_global_concurrent: usize,
    /// Maximum concurrent executions per team.
    pub max_per_team: usize,
    /// Maximum concurrent executions per agent. With the default of 1 an
    /// agent is a single-writer resource.
    pub max_per_agent: usize,
    /// Default execution deadline in seconds.
    pub default_task_timeout: u64,
    /// Number of queue worker loops.
    pub queue_workers: usize,
}

impl Default for ConcurrencySettings {
    fn default() -> Self {
        Self {
            max_global_concurrent: 32,
            max_per_team: 4,
            max_per_agent: 1,
            default_task_timeout: 300,
            queue_workers: 4,
        }
    }
}

impl ConcurrencySettings {
    /// Default deadline as a [`Duration`].
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_task_timeout)
    }
}

/// Top-level settings for every component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// HTTP bind address.
    pub bind_addr: String,
    /// Primary engine profile (talks to the user).
    pub primary: EngineProfile,
    /// Consultant engine profile (reviews plans, runs agents).
    pub consultant: EngineProfile,
    /// Dispatcher concurrency limits.
    pub concurrency: ConcurrencySettings,
    /// Optional JSON roster overriding the built-in agent table.
    pub agents_config_path: Option<PathBuf>,
    /// Repository DSN. Consumed by the persistence implementation chosen at
    /// startup; the in-memory repository ignores it.
    pub database_url: Option<String>,
    /// Cache URL, same contract as `database_url`.
    pub cache_url: Option<String>,
    /// Message-bus URL, same contract as `database_url`.
    pub bus_url: Option<String>,
    /// Session context TTL in seconds.
    pub session_ttl: u64,
    /// Dialogue turn cap before forcing a decision.
    pub max_dialogue_turns: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8600".to_string(),
            primary: EngineProfile::default_for(EngineKind::Primary),
            consultant: EngineProfile::default_for(EngineKind::Consultant),
            concurrency: ConcurrencySettings::default(),
            agents_config_path: None,
            database_url: None,
            cache_url: None,
            bus_url: None,
            session_ttl: 3600,
            max_dialogue_turns: 10,
        }
    }
}

impl Settings {
    /// Load settings from the process environment, falling back to defaults
    /// for anything unset.
    pub fn from_env() -> Self {
        let mut settings = Settings::default();

        if let Ok(addr) = env::var("HIVEMIND_BIND_ADDR") {
            settings.bind_addr = addr;
        }

        if let Ok(path) = env::var("HIVEMIND_PRIMARY_CLI") {
            settings.primary.cli_path = path;
        }
        if let Ok(model) = env::var("HIVEMIND_PRIMARY_MODEL") {
            settings.primary.model = model;
        }
        if let Some(secs) = env_u64("HIVEMIND_PRIMARY_TIMEOUT") {
            settings.primary.timeout_seconds = secs;
        }

        if let Ok(path) = env::var("HIVEMIND_CONSULTANT_CLI") {
            settings.consultant.cli_path = path;
        }
        if let Ok(model) = env::var("HIVEMIND_CONSULTANT_MODEL") {
            settings.consultant.model = model;
        }
        // Legacy alias kept for operators migrating existing deployments.
        if let Some(secs) =
            env_u64("HIVEMIND_CONSULTANT_TIMEOUT").or_else(|| env_u64("HIVEMIND_CLAUDE_TIMEOUT"))
        {
            settings.consultant.timeout_seconds = secs;
        }

        if let Some(n) = env_usize("HIVEMIND_MAX_GLOBAL_CONCURRENT") {
            settings.concurrency.max_global_concurrent = n.max(1);
        }
        if let Some(n) = env_usize("HIVEMIND_MAX_PER_TEAM") {
            settings.concurrency.max_per_team = n.max(1);
        }
        if let Some(n) = env_usize("HIVEMIND_MAX_PER_AGENT") {
            settings.concurrency.max_per_agent = n.max(1);
        }
        if let Some(secs) = env_u64("HIVEMIND_TASK_TIMEOUT") {
            settings.concurrency.default_task_timeout = secs;
        }
        if let Some(n) = env_usize("HIVEMIND_QUEUE_WORKERS") {
            settings.concurrency.queue_workers = n.max(1);
        }

        if let Ok(path) = env::var("HIVEMIND_AGENTS_CONFIG") {
            settings.agents_config_path = Some(PathBuf::from(path));
        }
        settings.database_url = env::var("HIVEMIND_DATABASE_URL").ok();
        settings.cache_url = env::var("HIVEMIND_CACHE_URL").ok();
        settings.bus_url = env::var("HIVEMIND_BUS_URL").ok();

        if let Some(secs) = env_u64("HIVEMIND_SESSION_TTL") {
            settings.session_ttl = secs;
        }
        if let Some(n) = env_usize("HIVEMIND_MAX_DIALOGUE_TURNS") {
            settings.max_dialogue_turns = n.max(1);
        }

        settings
    }
}

fn env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}
