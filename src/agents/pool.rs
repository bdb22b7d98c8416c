//! Agent pool: the central registry of all agents and teams.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::json;

use crate::agents::base::{Agent, AgentMetadata, SharedAgent};
use crate::agents::teams::{Team, TeamId};
use crate::errors::HivemindError;

/// Built-in roster: 6 agents per team, 24 total.
///
/// Used when no roster file is configured. A roster file uses the same JSON
/// shape: `{"agents": [{id, name, team, description, capabilities, keywords}]}`.
fn default_roster() -> Vec<AgentMetadata> {
    let defs = json!([
        // Development Team
        {"id": "DEV-001", "name": "Architect", "team": "DEV",
         "description": "System design and architecture decisions",
         "capabilities": ["architecture"],
         "keywords": ["architecture", "design", "system", "pattern", "structure", "diagram"]},
        {"id": "DEV-002", "name": "Backend Developer", "team": "DEV",
         "description": "Server-side code, APIs, and databases",
         "capabilities": ["backend"],
         "keywords": ["backend", "api", "server", "database", "endpoint", "rest", "graphql"]},
        {"id": "DEV-003", "name": "Frontend Developer", "team": "DEV",
         "description": "UI/UX and client-side applications",
         "capabilities": ["frontend"],
         "keywords": ["frontend", "ui", "ux", "react", "vue", "angular", "css", "html", "javascript"]},
        {"id": "DEV-004", "name": "Code Reviewer", "team": "DEV",
         "description": "Code quality and design patterns",
         "capabilities": ["code_review"],
         "keywords": ["review", "quality", "refactor", "pattern", "clean", "style", "lint"]},
        {"id": "DEV-005", "name": "Technical Writer", "team": "DEV",
         "description": "Documentation and API guides",
         "capabilities": ["documentation"],
         "keywords": ["document", "readme", "guide", "api", "docs", "comment", "explain"]},
        {"id": "DEV-006", "name": "DevOps Liaison", "team": "DEV",
         "description": "CI/CD and deployment pipelines",
         "capabilities": ["devops"],
         "keywords": ["cicd", "pipeline", "deploy", "build", "release", "github", "gitlab"]},

        // Security Team
        {"id": "SEC-001", "name": "Security Architect", "team": "SEC",
         "description": "Threat modeling and secure design",
         "capabilities": ["security_architecture"],
         "keywords": ["threat", "model", "secure", "design", "risk", "framework"]},
        {"id": "SEC-002", "name": "Penetration Tester", "team": "SEC",
         "description": "Offensive security and vulnerability testing",
         "capabilities": ["penetration_testing"],
         "keywords": ["pentest", "exploit", "vulnerability", "attack", "hack", "ctf"]},
        {"id": "SEC-003", "name": "Malware Analyst", "team": "SEC",
         "description": "Reverse engineering and threat analysis",
         "capabilities": ["malware_analysis"],
         "keywords": ["malware", "reverse", "binary", "analysis", "threat", "ioc"]},
        {"id": "SEC-004", "name": "Wireless Security Expert", "team": "SEC",
         "description": "WiFi, Bluetooth, and RF security",
         "capabilities": ["wireless_security"],
         "keywords": ["wireless", "wifi", "bluetooth", "rf", "radio", "signal"]},
        {"id": "SEC-005", "name": "Compliance Auditor", "team": "SEC",
         "description": "Regulatory compliance (SOC2, GDPR, PCI)",
         "capabilities": ["compliance"],
         "keywords": ["compliance", "audit", "soc2", "gdpr", "pci", "hipaa", "policy"]},
        {"id": "SEC-006", "name": "Incident Responder", "team": "SEC",
         "description": "Forensics and incident management",
         "capabilities": ["incident_response"],
         "keywords": ["incident", "forensic", "response", "breach", "investigate"]},

        // Infrastructure Team
        {"id": "INF-001", "name": "Infrastructure Architect", "team": "INF",
         "description": "Cloud architecture and design",
         "capabilities": ["cloud_architecture"],
         "keywords": ["cloud", "aws", "azure", "gcp", "architecture", "infrastructure"]},
        {"id": "INF-002", "name": "Systems Administrator", "team": "INF",
         "description": "Server management and configuration",
         "capabilities": ["systems_admin"],
         "keywords": ["linux", "windows", "server", "admin", "configure", "manage"]},
        {"id": "INF-003", "name": "Network Engineer", "team": "INF",
         "description": "Networking and connectivity",
         "capabilities": ["networking"],
         "keywords": ["network", "firewall", "vpc", "dns", "routing", "load"]},
        {"id": "INF-004", "name": "Database Administrator", "team": "INF",
         "description": "Database optimization and backup",
         "capabilities": ["database"],
         "keywords": ["database", "sql", "postgres", "mysql", "mongo", "redis", "backup"]},
        {"id": "INF-005", "name": "Site Reliability Engineer", "team": "INF",
         "description": "Monitoring, observability, and SLOs",
         "capabilities": ["sre"],
         "keywords": ["monitoring", "alert", "slo", "sli", "observability", "prometheus"]},
        {"id": "INF-006", "name": "Automation Engineer", "team": "INF",
         "description": "Terraform, Ansible, and Infrastructure as Code",
         "capabilities": ["automation"],
         "keywords": ["terraform", "ansible", "iac", "automation", "script", "provision"]},

        // QA Team
        {"id": "QA-001", "name": "QA Architect", "team": "QA",
         "description": "Test strategy and quality processes",
         "capabilities": ["test_strategy"],
         "keywords": ["strategy", "quality", "process", "framework", "methodology"]},
        {"id": "QA-002", "name": "Test Automation Engineer", "team": "QA",
         "description": "Automated testing and frameworks",
         "capabilities": ["test_automation"],
         "keywords": ["automation", "selenium", "cypress", "playwright", "framework"]},
        {"id": "QA-003", "name": "Performance Tester", "team": "QA",
         "description": "Load testing and performance analysis",
         "capabilities": ["performance_testing"],
         "keywords": ["performance", "load", "stress", "benchmark", "jmeter", "k6"]},
        {"id": "QA-004", "name": "Security Tester", "team": "QA",
         "description": "SAST/DAST and vulnerability scanning",
         "capabilities": ["security_testing"],
         "keywords": ["sast", "dast", "scan", "security", "vulnerability", "owasp"]},
        {"id": "QA-005", "name": "Manual QA Tester", "team": "QA",
         "description": "Exploratory testing and UAT",
         "capabilities": ["manual_testing"],
         "keywords": ["manual", "exploratory", "uat", "acceptance", "usability"]},
        {"id": "QA-006", "name": "Test Data Manager", "team": "QA",
         "description": "Test data and fixtures",
         "capabilities": ["test_data"],
         "keywords": ["data", "fixture", "mock", "seed", "generate", "synthetic"]}
    ]);

    serde_json::from_value(defs).expect("built-in roster is valid")
}

#[derive(Deserialize)]
struct RosterFile {
    agents: Vec<AgentMetadata>,
}

/// Central registry of all agents across all teams.
///
/// The pool exclusively owns every [`Agent`]; teams hold `Arc` views of the
/// same values. Initialization is idempotent.
pub struct AgentPool {
    teams: RwLock<HashMap<TeamId, Team>>,
    agents: RwLock<Vec<(String, SharedAgent)>>,
    initialized: RwLock<bool>,
}

impl AgentPool {
    /// Create an empty, uninitialized pool.
    pub fn new() -> Self {
        Self {
            teams: RwLock::new(HashMap::new()),
            agents: RwLock::new(Vec::new()),
            initialized: RwLock::new(false),
        }
    }

    /// Create a pool initialized with the built-in roster.
    pub fn with_default_roster() -> Self {
        let pool = Self::new();
        pool.initialize_default()
            .expect("built-in roster initializes cleanly");
        pool
    }

    /// Initialize with the built-in roster.
    pub fn initialize_default(&self) -> Result<(), HivemindError> {
        self.initialize(default_roster())
    }

    /// Build teams from the fixed table and attach each agent to its
    /// declared team. Idempotent: a second call is a no-op.
    ///
    /// Fails on a duplicate agent id or an unknown team id.
    pub fn initialize(&self, roster: Vec<AgentMetadata>) -> Result<(), HivemindError> {
        let mut initialized = self.initialized.write();
        if *initialized {
            return Ok(());
        }

        let mut teams: HashMap<TeamId, Team> = TeamId::ALL
            .into_iter()
            .map(|id| (id, Team::new(id)))
            .collect();
        let mut agents: Vec<(String, SharedAgent)> = Vec::with_capacity(roster.len());

        for metadata in roster {
            if agents.iter().any(|(id, _)| *id == metadata.id) {
                return Err(HivemindError::InvalidRoster(format!(
                    "duplicate agent id: {}",
                    metadata.id
                )));
            }
            let team_id: TeamId = metadata.team.parse().map_err(|_| {
                HivemindError::InvalidRoster(format!(
                    "agent {} declares unknown team: {}",
                    metadata.id, metadata.team
                ))
            })?;

            let agent: SharedAgent = Arc::new(RwLock::new(Agent::new(metadata)));
            agents.push((agent.read().id().to_string(), agent.clone()));
            teams
                .get_mut(&team_id)
                .expect("team table covers every TeamId")
                .add_agent(agent);
        }

        *self.teams.write() = teams;
        *self.agents.write() = agents;
        *initialized = true;

        tracing::info!(
            total_agents = self.total_agents(),
            teams = TeamId::ALL.len(),
            "agent pool initialized"
        );
        Ok(())
    }

    /// Load a roster from a JSON file, falling back to the built-in roster
    /// when the path is missing or unreadable.
    pub fn initialize_from_path(&self, path: Option<&Path>) -> Result<(), HivemindError> {
        let roster = match path {
            Some(path) => match std::fs::read_to_string(path) {
                Ok(raw) => serde_json::from_str::<RosterFile>(&raw)
                    .map(|f| f.agents)
                    .unwrap_or_else(|e| {
                        tracing::warn!(path = %path.display(), error = %e,
                            "failed to parse roster file, using built-in roster");
                        default_roster()
                    }),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e,
                        "failed to read roster file, using built-in roster");
                    default_roster()
                }
            },
            None => default_roster(),
        };
        self.initialize(roster)
    }

    pub fn total_agents(&self) -> usize {
        self.agents.read().len()
    }

    /// All agent ids in insertion order.
    pub fn agent_ids(&self) -> Vec<String> {
        self.agents.read().iter().map(|(id, _)| id.clone()).collect()
    }

    /// All agents in insertion order.
    pub fn all_agents(&self) -> Vec<SharedAgent> {
        self.agents
            .read()
            .iter()
            .map(|(_, a)| a.clone())
            .collect()
    }

    /// Agents currently able to accept a task.
    pub fn available_agents(&self) -> Vec<SharedAgent> {
        self.all_agents()
            .into_iter()
            .filter(|a| a.read().is_available())
            .collect()
    }

    pub fn get_agent(&self, agent_id: &str) -> Option<SharedAgent> {
        self.agents
            .read()
            .iter()
            .find(|(id, _)| id == agent_id)
            .map(|(_, a)| a.clone())
    }

    pub fn get_team(&self, team_id: TeamId) -> Option<Team> {
        self.teams.read().get(&team_id).cloned()
    }

    /// All four teams in table order.
    pub fn teams(&self) -> Vec<Team> {
        let teams = self.teams.read();
        TeamId::ALL
            .into_iter()
            .filter_map(|id| teams.get(&id).cloned())
            .collect()
    }

    /// Agents whose keyword sets intersect `keywords`, sorted by
    /// intersection size descending; ties keep insertion order.
    pub fn find_agents_by_keywords(&self, keywords: &[String]) -> Vec<SharedAgent> {
        let mut matches: Vec<(usize, SharedAgent)> = self
            .all_agents()
            .into_iter()
            .filter_map(|agent| {
                let score = agent.read().keyword_match_count(keywords);
                (score > 0).then_some((score, agent))
            })
            .collect();
        matches.sort_by(|a, b| b.0.cmp(&a.0)); // stable: ties keep order
        matches.into_iter().map(|(_, a)| a).collect()
    }

    /// Teams whose vocabularies intersect `keywords`, in table order.
    pub fn find_teams_by_keywords(&self, keywords: &[String]) -> Vec<Team> {
        self.teams()
            .into_iter()
            .filter(|t| t.can_handle(keywords))
            .collect()
    }

    /// Best available agent for a task: ask each matching team for its best
    /// available agent and take the first hit, else fall back to any
    /// available agent.
    pub fn get_best_agent_for_task(&self, keywords: &[String]) -> Option<SharedAgent> {
        let teams = self.find_teams_by_keywords(keywords);
        if teams.is_empty() {
            return self.available_agents().into_iter().next();
        }
        teams.iter().find_map(|t| t.get_best_agent(keywords))
    }
}

impl Default for AgentPool {
    fn default() -> Self {
        Self::with_default_roster()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::base::AgentMetadata;

    fn meta(id: &str, team: &str, keywords: &[&str]) -> AgentMetadata {
        AgentMetadata {
            id: id.into(),
            name: id.into(),
            team: team.into(),
            description: String::new(),
            capabilities: vec![],
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            system_prompt: None,
        }
    }

    #[test]
    fn test_default_roster_builds_24_agents_in_4_teams() {
        let pool = AgentPool::with_default_roster();
        assert_eq!(pool.total_agents(), 24);

        let team_sum: usize = pool.teams().iter().map(Team::size).sum();
        assert_eq!(team_sum, pool.total_agents());

        // Every agent referenced by a team is also in the pool's map.
        for team in pool.teams() {
            for agent in &team.agents {
                let id = agent.read().id().to_string();
                assert!(pool.get_agent(&id).is_some());
            }
        }
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let pool = AgentPool::with_default_roster();
        pool.initialize(vec![meta("DEV-099", "DEV", &["extra"])])
            .unwrap();
        assert_eq!(pool.total_agents(), 24);
        assert!(pool.get_agent("DEV-099").is_none());
    }

    #[test]
    fn test_duplicate_agent_id_rejected() {
        let pool = AgentPool::new();
        let result = pool.initialize(vec![
            meta("DEV-001", "DEV", &["a"]),
            meta("DEV-001", "DEV", &["b"]),
        ]);
        assert!(matches!(result, Err(HivemindError::InvalidRoster(_))));
    }

    #[test]
    fn test_unknown_team_rejected() {
        let pool = AgentPool::new();
        let result = pool.initialize(vec![meta("OPS-001", "OPS", &["a"])]);
        assert!(matches!(result, Err(HivemindError::InvalidRoster(_))));
    }

    #[test]
    fn test_find_agents_by_keywords_sorted_by_overlap() {
        let pool = AgentPool::with_default_roster();
        let found =
            pool.find_agents_by_keywords(&["backend".into(), "api".into(), "rest".into()]);
        assert!(!found.is_empty());
        // DEV-002 matches backend+api+rest; others at most one of these.
        assert_eq!(found[0].read().id(), "DEV-002");
    }

    #[test]
    fn test_find_agents_no_match_is_empty() {
        let pool = AgentPool::with_default_roster();
        assert!(pool
            .find_agents_by_keywords(&["zzzz".into(), "qqqq".into()])
            .is_empty());
    }

    #[test]
    fn test_best_agent_for_task_falls_back_to_any_available() {
        let pool = AgentPool::with_default_roster();
        let best = pool.get_best_agent_for_task(&["nonmatching".into()]);
        assert!(best.is_some());
    }
}
