//! Core agent abstraction and state machine.
//!
//! An agent is a bounded role — identity, keywords, and a system-prompt
//! fragment — not a code path. Differentiation between agents is data; the
//! same executor runs all of them with the agent's role injected as the
//! engine system prompt.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Shared handle to a pool-owned agent.
///
/// The pool owns the value; teams and the dispatcher hold clones of the
/// `Arc` as non-owning views. Mutable state is only written while the
/// agent's dispatcher semaphore is held, which serialises writers.
pub type SharedAgent = Arc<RwLock<Agent>>;

/// Agent execution states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Idle,
    Pending,
    Running,
    Success,
    Error,
    Paused,
}

/// Agent capability categories, grouped by team domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentCapability {
    // Development
    Architecture,
    Backend,
    Frontend,
    CodeReview,
    Documentation,
    Devops,
    // Security
    SecurityArchitecture,
    PenetrationTesting,
    MalwareAnalysis,
    WirelessSecurity,
    Compliance,
    IncidentResponse,
    // Infrastructure
    CloudArchitecture,
    SystemsAdmin,
    Networking,
    Database,
    Sre,
    Automation,
    // QA
    TestStrategy,
    TestAutomation,
    PerformanceTesting,
    SecurityTesting,
    ManualTesting,
    TestData,
}

/// Immutable agent identity and configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMetadata {
    /// Agent id, e.g. `DEV-002`.
    pub id: String,
    /// Human-readable role name.
    pub name: String,
    /// Team id the agent belongs to, e.g. `DEV`.
    pub team: String,
    /// One-line role description.
    #[serde(default)]
    pub description: String,
    /// Capability categories.
    #[serde(default)]
    pub capabilities: Vec<AgentCapability>,
    /// Routing keywords.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// System-prompt fragment injected into the engine when this agent runs.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

/// A specialized agent: immutable metadata plus mutable runtime state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub metadata: AgentMetadata,
    pub state: AgentState,
    pub current_task_id: Option<String>,
    pub last_activity: Option<DateTime<Utc>>,
    pub success_count: u64,
    pub error_count: u64,
}

impl Agent {
    /// Create an idle agent from metadata.
    pub fn new(metadata: AgentMetadata) -> Self {
        Self {
            metadata,
            state: AgentState::Idle,
            current_task_id: None,
            last_activity: None,
            success_count: 0,
            error_count: 0,
        }
    }

    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn team(&self) -> &str {
        &self.metadata.team
    }

    /// Whether the agent can accept a new task.
    pub fn is_available(&self) -> bool {
        matches!(
            self.state,
            AgentState::Idle | AgentState::Success | AgentState::Error
        )
    }

    /// Whether the agent currently holds a task.
    pub fn is_busy(&self) -> bool {
        matches!(self.state, AgentState::Pending | AgentState::Running)
    }

    /// Whether this agent's keywords intersect the task keywords.
    pub fn can_handle(&self, keywords: &[String]) -> bool {
        self.keyword_match_count(keywords) > 0
    }

    /// Number of task keywords present in this agent's keyword set
    /// (case-insensitive).
    pub fn keyword_match_count(&self, keywords: &[String]) -> usize {
        let own: std::collections::HashSet<String> = self
            .metadata
            .keywords
            .iter()
            .map(|k| k.to_lowercase())
            .collect();
        keywords
            .iter()
            .filter(|k| own.contains(&k.to_lowercase()))
            .count()
    }

    /// Transition to a new state, stamping activity and outcome counters.
    pub fn transition_to(&mut self, new_state: AgentState) {
        self.state = new_state;
        self.last_activity = Some(Utc::now());

        match new_state {
            AgentState::Success => self.success_count += 1,
            AgentState::Error => self.error_count += 1,
            _ => {}
        }
    }

    /// Assign a task: Idle/Success/Error → Pending.
    pub fn assign_task(&mut self, task_id: &str) {
        self.current_task_id = Some(task_id.to_string());
        self.transition_to(AgentState::Pending);
    }

    /// Mark the assigned task as actually executing.
    pub fn start_execution(&mut self) {
        self.transition_to(AgentState::Running);
    }

    /// Release the current task, recording the outcome.
    pub fn complete_task(&mut self, success: bool) {
        self.current_task_id = None;
        self.transition_to(if success {
            AgentState::Success
        } else {
            AgentState::Error
        });
    }

    /// Drop any assignment and return to idle.
    pub fn reset(&mut self) {
        self.current_task_id = None;
        self.transition_to(AgentState::Idle);
    }
}
