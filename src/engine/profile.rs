//! Per-engine subprocess profiles.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Which of the two external engines a profile drives.
///
/// The primary engine owns the user conversation; the consultant reviews
/// plans and runs agent roles. They are separate binaries with slightly
/// different flags and stream dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Primary,
    Consultant,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Primary => "primary",
            EngineKind::Consultant => "consultant",
        }
    }
}

/// Invocation profile for one engine CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineProfile {
    pub kind: EngineKind,
    /// Path or name of the CLI binary.
    pub cli_path: String,
    pub model: String,
    pub max_tokens: u32,
    /// Default deadline for one invocation, in seconds.
    pub timeout_seconds: u64,
    /// Stream dialect requested from the CLI.
    pub output_format: String,
    /// Tools the engine may use (primary engine flags each one).
    #[serde(default)]
    pub allowed_tools: Vec<String>,
    /// Standing system prompt, if any.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Reasoning effort level (consultant engine only).
    #[serde(default)]
    pub reasoning_effort: Option<String>,
}

impl EngineProfile {
    /// Built-in defaults for each engine.
    pub fn default_for(kind: EngineKind) -> Self {
        match kind {
            EngineKind::Primary => Self {
                kind,
                cli_path: "codex".into(),
                model: "o4-mini".into(),
                max_tokens: 4096,
                timeout_seconds: 60,
                output_format: "stream-json".into(),
                allowed_tools: Vec::new(),
                system_prompt: None,
                reasoning_effort: None,
            },
            EngineKind::Consultant => Self {
                kind,
                cli_path: "claude".into(),
                model: "claude-sonnet-4-20250514".into(),
                max_tokens: 4096,
                timeout_seconds: 45,
                output_format: "stream-json".into(),
                allowed_tools: Vec::new(),
                system_prompt: None,
                reasoning_effort: Some("medium".into()),
            },
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_differ_per_engine() {
        let primary = EngineProfile::default_for(EngineKind::Primary);
        let consultant = EngineProfile::default_for(EngineKind::Consultant);
        assert_eq!(primary.timeout_seconds, 60);
        assert_eq!(consultant.timeout_seconds, 45);
        assert_eq!(primary.output_format, "stream-json");
        assert!(primary.reasoning_effort.is_none());
        assert!(consultant.reasoning_effort.is_some());
    }
}
