//! Keyword-scored routing of tasks to teams and agents.
//!
//! Routing is a pure function of the pool state and the keyword list:
//! stable sorts and insertion-order tie-breaking make the route list
//! reproducible across runs.

use std::collections::HashSet;
use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::agents::base::SharedAgent;
use crate::agents::pool::AgentPool;
use crate::agents::teams::Team;

/// English stop words dropped during keyword extraction.
static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "an", "the", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
        "do", "does", "did", "will", "would", "should", "could", "may", "might", "can", "must",
        "i", "you", "he", "she", "it", "we", "they", "what", "which", "who", "when", "where",
        "why", "how", "this", "that", "these", "those", "to", "from", "in", "on", "at", "by",
        "for", "with", "about", "as", "of", "and", "or", "but", "not", "if", "then", "so",
        "because", "while", "there", "here", "just", "now", "some",
    ]
    .into_iter()
    .collect()
});

const PUNCTUATION: &[char] = &[
    '.', ',', ';', ':', '!', '?', '(', ')', '[', ']', '{', '}', '"', '\'',
];

/// Extract routing keywords from a free-form prompt.
///
/// Lowercases, splits on whitespace, strips surrounding punctuation, drops
/// tokens of length ≤ 2 and stop words, and deduplicates preserving first
/// occurrence.
pub fn extract_keywords(prompt: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut keywords = Vec::new();

    for word in prompt.to_lowercase().split_whitespace() {
        let cleaned = word.trim_matches(PUNCTUATION);
        if cleaned.len() <= 2 || STOP_WORDS.contains(cleaned) {
            continue;
        }
        if seen.insert(cleaned.to_string()) {
            keywords.push(cleaned.to_string());
        }
    }

    keywords
}

/// Match task keywords against candidate keywords.
///
/// Returns the harmonic mean of task coverage and candidate coverage in
/// `[0, 1]`, plus the matched keywords. Zero iff the intersection is empty.
pub fn match_keywords(task_keywords: &[String], target_keywords: &[String]) -> (f64, Vec<String>) {
    if task_keywords.is_empty() || target_keywords.is_empty() {
        return (0.0, Vec::new());
    }

    let task_set: HashSet<String> = task_keywords.iter().map(|k| k.to_lowercase()).collect();
    let target_set: HashSet<String> = target_keywords.iter().map(|k| k.to_lowercase()).collect();

    let mut matched: Vec<String> = task_set.intersection(&target_set).cloned().collect();
    if matched.is_empty() {
        return (0.0, Vec::new());
    }
    matched.sort();

    let task_coverage = matched.len() as f64 / task_set.len() as f64;
    let target_coverage = matched.len() as f64 / target_set.len() as f64;
    let score = 2.0 * (task_coverage * target_coverage) / (task_coverage + target_coverage);

    (score, matched)
}

/// Score for a routing candidate.
#[derive(Debug, Clone)]
pub struct RoutingScore {
    pub team: Team,
    pub agent: Option<SharedAgent>,
    pub score: f64,
    pub matched_keywords: Vec<String>,
}

/// A selected (team, agent) pair.
pub type Route = (Team, SharedAgent);

/// Router for directing tasks to the most suitable teams and agents.
///
/// Scores teams first; a dominant team (score ≥ `multi_team_threshold`)
/// routes alone, otherwise up to `max_teams` teams above `min_match_score`
/// each contribute their best available agents.
pub struct Router {
    pool: Arc<AgentPool>,
    /// Score at or above which the top team routes alone.
    pub multi_team_threshold: f64,
    /// Minimum score for a candidate to be considered at all.
    pub min_match_score: f64,
}

impl Router {
    pub fn new(pool: Arc<AgentPool>) -> Self {
        Self {
            pool,
            multi_team_threshold: 0.7,
            min_match_score: 0.3,
        }
    }

    /// Override the scoring thresholds.
    pub fn with_thresholds(mut self, multi_team_threshold: f64, min_match_score: f64) -> Self {
        self.multi_team_threshold = multi_team_threshold;
        self.min_match_score = min_match_score;
        self
    }

    /// Score how well a team's vocabulary matches the task keywords.
    pub fn score_team(&self, keywords: &[String], team: &Team) -> RoutingScore {
        let (score, matched) = match_keywords(keywords, &team.config.keywords);
        RoutingScore {
            team: team.clone(),
            agent: None,
            score,
            matched_keywords: matched,
        }
    }

    /// Teams scoring at least `min_match_score`, sorted descending.
    /// Stable sort: table order wins ties.
    pub fn route_to_teams(&self, keywords: &[String]) -> Vec<RoutingScore> {
        let mut scores: Vec<RoutingScore> = self
            .pool
            .teams()
            .iter()
            .map(|team| self.score_team(keywords, team))
            .filter(|s| s.score >= self.min_match_score)
            .collect();

        scores.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        tracing::debug!(
            keyword_count = keywords.len(),
            team_scores = ?scores
                .iter()
                .take(3)
                .map(|s| (s.team.id().as_str(), s.score))
                .collect::<Vec<_>>(),
            "teams scored"
        );

        scores
    }

    /// Available agents in `team` scoring at least `min_match_score`,
    /// sorted descending; insertion order wins ties.
    pub fn route_to_agents(&self, keywords: &[String], team: &Team) -> Vec<RoutingScore> {
        let mut scores: Vec<RoutingScore> = team
            .available_agents()
            .into_iter()
            .filter_map(|agent| {
                let (score, matched) = match_keywords(keywords, &agent.read().metadata.keywords);
                (score >= self.min_match_score).then(|| RoutingScore {
                    team: team.clone(),
                    agent: Some(agent),
                    score,
                    matched_keywords: matched,
                })
            })
            .collect();

        scores.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scores
    }

    /// Route keywords to (team, agent) pairs.
    ///
    /// 1. Score all teams; a team at or above the multi-team threshold
    ///    routes alone, otherwise up to `max_teams` qualifying teams.
    /// 2. Per team, take the top `max_agents_per_team` available agents; if
    ///    none scores above threshold, fall back to the team's first
    ///    available agent; a team with no available agents is skipped.
    ///
    /// Returns an empty list when no team matches.
    pub fn route(
        &self,
        keywords: &[String],
        max_teams: usize,
        max_agents_per_team: usize,
    ) -> Vec<Route> {
        tracing::info!(?keywords, max_teams, max_agents_per_team, "routing task");

        let team_scores = self.route_to_teams(keywords);
        if team_scores.is_empty() {
            tracing::warn!(?keywords, "no teams matched keywords");
            return Vec::new();
        }

        let selected: Vec<&RoutingScore> = if team_scores[0].score >= self.multi_team_threshold {
            team_scores.iter().take(1).collect()
        } else {
            team_scores.iter().take(max_teams).collect()
        };

        let mut routes: Vec<Route> = Vec::new();
        for team_score in selected {
            let team = &team_score.team;
            let agent_scores = self.route_to_agents(keywords, team);

            if agent_scores.is_empty() {
                // No agent above threshold; fall back to any available agent.
                match team.available_agents().into_iter().next() {
                    Some(agent) => {
                        tracing::info!(
                            team = %team.id(),
                            agent = %agent.read().id(),
                            "using fallback agent"
                        );
                        routes.push((team.clone(), agent));
                    }
                    None => {
                        tracing::warn!(team = %team.id(), "no available agents in team");
                    }
                }
                continue;
            }

            for agent_score in agent_scores.into_iter().take(max_agents_per_team) {
                if let Some(agent) = agent_score.agent {
                    routes.push((team.clone(), agent));
                }
            }
        }

        tracing::info!(
            route_count = routes.len(),
            routes = ?routes
                .iter()
                .map(|(t, a)| (t.id().as_str(), a.read().id().to_string()))
                .collect::<Vec<_>>(),
            "routing complete"
        );

        routes
    }

    /// Route a free-form prompt with default limits.
    pub fn route_prompt(&self, prompt: &str) -> Vec<Route> {
        self.route(&extract_keywords(prompt), 3, 2)
    }

    /// Resolve consensus-named agent ids into (team, agent) routes.
    ///
    /// Unknown ids are skipped with a warning; availability is not
    /// required — the dispatcher's per-agent semaphore serialises access
    /// to a busy agent.
    pub fn routes_for_agents(&self, agent_ids: &[String]) -> Vec<Route> {
        agent_ids
            .iter()
            .filter_map(|agent_id| {
                let Some(agent) = self.pool.get_agent(agent_id) else {
                    tracing::warn!(agent_id = %agent_id, "unknown agent id in route request");
                    return None;
                };
                let team_id = agent.read().team().parse().ok()?;
                let team = self.pool.get_team(team_id)?;
                Some((team, agent))
            })
            .collect()
    }

    /// The single best (team, agent) match, if any.
    pub fn get_best_match(&self, keywords: &[String]) -> Option<Route> {
        self.route(keywords, 1, 1).into_iter().next()
    }

    /// Whether at least one route exists for the keywords.
    pub fn can_route(&self, keywords: &[String]) -> bool {
        !self.route_to_teams(keywords).is_empty()
    }

    /// Diagnostic summary of routing options for a keyword set.
    pub fn routing_summary(&self, keywords: &[String]) -> serde_json::Value {
        let team_scores = self.route_to_teams(keywords);
        serde_json::json!({
            "keywords": keywords,
            "team_scores": team_scores.iter().map(|s| serde_json::json!({
                "team": s.team.id().as_str(),
                "score": s.score,
                "matched_keywords": s.matched_keywords.clone(),
            })).collect::<Vec<_>>(),
            "recommended_teams": team_scores
                .iter()
                .filter(|s| s.score >= self.multi_team_threshold)
                .map(|s| s.team.id().as_str())
                .collect::<Vec<_>>(),
            "multi_team_needed": !team_scores.is_empty()
                && team_scores[0].score < self.multi_team_threshold,
        })
    }
}
