//! The four fixed teams and their keyword vocabularies.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::agents::base::SharedAgent;
use crate::errors::HivemindError;

/// Team identifiers. The team table is fixed; agents are data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TeamId {
    /// Development
    DEV,
    /// Security
    SEC,
    /// Infrastructure
    INF,
    /// Quality Assurance
    QA,
}

impl TeamId {
    /// All team ids in table order.
    pub const ALL: [TeamId; 4] = [TeamId::DEV, TeamId::SEC, TeamId::INF, TeamId::QA];

    pub fn as_str(&self) -> &'static str {
        match self {
            TeamId::DEV => "DEV",
            TeamId::SEC => "SEC",
            TeamId::INF => "INF",
            TeamId::QA => "QA",
        }
    }
}

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TeamId {
    type Err = HivemindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEV" => Ok(TeamId::DEV),
            "SEC" => Ok(TeamId::SEC),
            "INF" => Ok(TeamId::INF),
            "QA" => Ok(TeamId::QA),
            other => Err(HivemindError::UnknownId {
                kind: "team",
                id: other.to_string(),
            }),
        }
    }
}

/// Team configuration and metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamConfig {
    pub id: TeamId,
    pub name: String,
    pub description: String,
    pub keywords: Vec<String>,
    /// Display color for front-ends.
    pub color: String,
}

/// The fixed team table.
pub static TEAM_CONFIGS: Lazy<Vec<TeamConfig>> = Lazy::new(|| {
    vec![
        TeamConfig {
            id: TeamId::DEV,
            name: "Development".into(),
            description: "Software development, architecture, and code quality".into(),
            keywords: [
                "code", "implement", "build", "create", "function", "api", "develop", "program",
                "write", "fix", "bug", "feature", "refactor", "optimize", "class", "method",
                "module", "library", "framework", "design", "architecture",
            ]
            .map(String::from)
            .to_vec(),
            color: "#39ff14".into(),
        },
        TeamConfig {
            id: TeamId::SEC,
            name: "Security".into(),
            description: "Security assessment, vulnerability analysis, and incident response"
                .into(),
            keywords: [
                "security", "vulnerability", "audit", "pentest", "encrypt", "auth",
                "authentication", "authorization", "exploit", "malware", "threat", "attack",
                "defense", "firewall", "intrusion", "forensic", "compliance", "risk", "breach",
            ]
            .map(String::from)
            .to_vec(),
            color: "#ff0090".into(),
        },
        TeamConfig {
            id: TeamId::INF,
            name: "Infrastructure".into(),
            description: "Cloud infrastructure, deployment, and operations".into(),
            keywords: [
                "deploy", "scale", "kubernetes", "docker", "server", "cloud", "aws", "azure",
                "gcp", "infrastructure", "network", "database", "monitoring", "logging",
                "terraform", "ansible", "ci/cd", "pipeline", "container", "cluster", "load",
                "balance",
            ]
            .map(String::from)
            .to_vec(),
            color: "#00ffff".into(),
        },
        TeamConfig {
            id: TeamId::QA,
            name: "Quality Assurance".into(),
            description: "Testing, quality control, and performance validation".into(),
            keywords: [
                "test", "quality", "bug", "regression", "performance", "automation", "selenium",
                "cypress", "jest", "pytest", "coverage", "integration", "unit", "e2e",
                "acceptance", "benchmark", "load", "stress", "validate", "verify",
            ]
            .map(String::from)
            .to_vec(),
            color: "#9900ff".into(),
        },
    ]
});

/// Look up the fixed configuration for a team id.
pub fn team_config(id: TeamId) -> &'static TeamConfig {
    TEAM_CONFIGS
        .iter()
        .find(|c| c.id == id)
        .expect("fixed team table covers every TeamId")
}

/// A team of specialized agents: the primary unit of routing.
///
/// `agents` holds non-owning views of pool-owned agents; the pool remains
/// the single owner.
#[derive(Debug, Clone)]
pub struct Team {
    pub config: TeamConfig,
    pub agents: Vec<SharedAgent>,
}

impl Team {
    /// Create an empty team from the fixed table.
    pub fn new(id: TeamId) -> Self {
        Self {
            config: team_config(id).clone(),
            agents: Vec::new(),
        }
    }

    pub fn id(&self) -> TeamId {
        self.config.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn size(&self) -> usize {
        self.agents.len()
    }

    /// Agents currently able to accept a task, in insertion order.
    pub fn available_agents(&self) -> Vec<SharedAgent> {
        self.agents
            .iter()
            .filter(|a| a.read().is_available())
            .cloned()
            .collect()
    }

    /// Ratio of available agents, 0.0 when the team is empty.
    pub fn availability(&self) -> f64 {
        if self.agents.is_empty() {
            return 0.0;
        }
        self.available_agents().len() as f64 / self.agents.len() as f64
    }

    /// Whether the team's keyword vocabulary intersects the task keywords.
    pub fn can_handle(&self, keywords: &[String]) -> bool {
        let own: std::collections::HashSet<String> = self
            .config
            .keywords
            .iter()
            .map(|k| k.to_lowercase())
            .collect();
        keywords.iter().any(|k| own.contains(&k.to_lowercase()))
    }

    /// Best available agent by keyword-intersection count.
    ///
    /// Ties keep insertion order. Returns `None` when no agent is available.
    pub fn get_best_agent(&self, keywords: &[String]) -> Option<SharedAgent> {
        let mut best: Option<(usize, SharedAgent)> = None;
        for agent in self.available_agents() {
            let score = agent.read().keyword_match_count(keywords);
            // Strictly-greater keeps the earliest agent on ties.
            if best.as_ref().map_or(true, |(s, _)| score > *s) {
                best = Some((score, agent));
            }
        }
        best.map(|(_, agent)| agent)
    }

    /// Attach an agent view to this team.
    pub fn add_agent(&mut self, agent: SharedAgent) {
        if !self
            .agents
            .iter()
            .any(|a| std::sync::Arc::ptr_eq(a, &agent))
        {
            self.agents.push(agent);
        }
    }

    /// Find an agent view by id.
    pub fn get_agent(&self, agent_id: &str) -> Option<SharedAgent> {
        self.agents
            .iter()
            .find(|a| a.read().id() == agent_id)
            .cloned()
    }
}
