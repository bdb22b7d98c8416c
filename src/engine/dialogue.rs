//! Primary ⇄ consultant consensus dialogue.
//!
//! Before agents run, the primary engine proposes a plan and the consultant
//! evaluates it, for up to `max_turns` rounds. Agreement is the literal
//! "AGREED" marker in the consultant's reply; the consensus also names the
//! agent set to execute. On non-agreement at the turn cap, the last
//! proposal is returned with `agreed = false` and the consultant's last
//! feedback as the response — no agents run.

use std::sync::Arc;

use crate::engine::adapter::{CallOptions, EngineAdapter};
use crate::engine::consultant::{Consultant, EvaluationResult};

/// Injection point for user follow-ups arriving while the dialogue runs.
///
/// Contract: `drain` returns the (possibly empty) list of follow-ups since
/// the last call.
pub trait LiveInputSource: Send + Sync {
    fn drain(&self) -> Vec<String>;
}

/// Default source: no live inputs.
pub struct NoLiveInput;

impl LiveInputSource for NoLiveInput {
    fn drain(&self) -> Vec<String> {
        Vec::new()
    }
}

/// One turn of the dialogue.
#[derive(Debug, Clone)]
pub struct DialogueTurn {
    pub speaker: &'static str,
    pub content: String,
    pub turn_number: usize,
}

/// Outcome of the consensus phase.
#[derive(Debug, Clone)]
pub struct ConsensusResult {
    pub agreed: bool,
    pub plan: String,
    pub agents_needed: Vec<String>,
    /// Response for the non-agreement path (the consultant's last feedback).
    pub response: Option<String>,
    /// Set when the loop aborted because an engine call failed rather than
    /// because the consultant disagreed.
    pub engine_error: Option<String>,
}

/// Final result of a dialogue run.
#[derive(Debug, Clone)]
pub struct DialogueResult {
    pub success: bool,
    pub plan: String,
    pub turns: usize,
    pub agents_used: Vec<String>,
    pub response: Option<String>,
    pub error: Option<String>,
}

/// The bounded proposal/evaluate/refine loop.
pub struct DialogueLoop {
    primary: Arc<EngineAdapter>,
    consultant: Arc<Consultant>,
    live_inputs: Arc<dyn LiveInputSource>,
    max_turns: usize,
    history: Vec<DialogueTurn>,
    turn_count: usize,
}

impl DialogueLoop {
    pub fn new(
        primary: Arc<EngineAdapter>,
        consultant: Arc<Consultant>,
        live_inputs: Arc<dyn LiveInputSource>,
        max_turns: usize,
    ) -> Self {
        Self {
            primary,
            consultant,
            live_inputs,
            max_turns: max_turns.max(1),
            history: Vec::new(),
            turn_count: 0,
        }
    }

    pub fn history(&self) -> &[DialogueTurn] {
        &self.history
    }

    fn log_turn(&mut self, speaker: &'static str, content: String) {
        self.turn_count += 1;
        self.history.push(DialogueTurn {
            speaker,
            content,
            turn_number: self.turn_count,
        });
    }

    fn history_for_context(&self) -> Vec<(String, String)> {
        self.history
            .iter()
            .map(|t| (t.speaker.to_string(), t.content.clone()))
            .collect()
    }

    fn live_block(&self) -> String {
        let inputs = self.live_inputs.drain();
        if inputs.is_empty() {
            String::new()
        } else {
            let notes: Vec<String> = inputs.iter().map(|i| format!("- {i}")).collect();
            format!("\nLive User Input:\n{}\n", notes.join("\n"))
        }
    }

    async fn propose(&self, request: &str, live_notes: &str) -> String {
        let prompt = format!(
            "You are coordinating with an expert consultant on a user request.\n\n\
             User Request: {request}\n{live_notes}\n\
             Propose an approach to handle this request. Consider:\n\
             1. Is this something that needs specialized agents, or can it be answered directly?\n\
             2. If agents are needed, which ones?\n\
             3. What's the success criteria?\n\n\
             Keep your proposal concise and actionable.\n"
        );

        let (success, response) = self
            .primary
            .call(
                &prompt,
                &CallOptions {
                    status_label: Some("Planning approach...".to_string()),
                    ..Default::default()
                },
            )
            .await;

        if success {
            response
        } else {
            format!("I'll work with the consultant to determine the best approach for: {request}")
        }
    }

    async fn refine(&self, request: &str, proposal: &str, feedback: &str, live_notes: &str) -> String {
        let prompt = format!(
            "You are refining your proposal based on the consultant's feedback.\n\n\
             User Request: {request}\n{live_notes}\n\
             Your Previous Proposal:\n{proposal}\n\n\
             Consultant's Feedback:\n{feedback}\n\n\
             Refine your proposal based on the feedback. If you now agree with the \
             suggestions, incorporate them.\n"
        );

        let (success, response) = self
            .primary
            .call(
                &prompt,
                &CallOptions {
                    status_label: Some("Refining approach...".to_string()),
                    ..Default::default()
                },
            )
            .await;

        if success {
            response
        } else {
            let excerpt: String = feedback.chars().take(200).collect();
            format!("Incorporating the consultant's feedback: {excerpt}...")
        }
    }

    /// Iterate until the consultant agrees or the turn cap is reached.
    ///
    /// Always exits within `max_turns` evaluation rounds; on non-agreement
    /// the returned plan equals the last primary proposal.
    pub async fn reach_consensus(&mut self, request: &str) -> ConsensusResult {
        let live = self.live_block();
        let mut proposal = self.propose(request, &live).await;
        self.log_turn("primary", proposal.clone());

        let mut last_eval: Option<EvaluationResult> = None;

        for turn in 0..self.max_turns {
            tracing::debug!(turn = turn + 1, "consulting on proposal");

            let live = self.live_block();
            let proposal_for_eval = if live.is_empty() {
                proposal.clone()
            } else {
                format!("{proposal}\n{live}")
            };

            let eval = self
                .consultant
                .evaluate_proposal(request, &proposal_for_eval, &self.history_for_context())
                .await;
            self.log_turn("consultant", eval.feedback.clone());

            if eval.engine_error {
                // The consultant never actually spoke; abort rather than
                // burn the remaining turns on a dead engine.
                return ConsensusResult {
                    agreed: false,
                    plan: proposal,
                    agents_needed: Vec::new(),
                    response: Some(eval.feedback.clone()),
                    engine_error: Some(eval.feedback),
                };
            }

            if eval.agrees {
                return ConsensusResult {
                    agreed: true,
                    plan: proposal,
                    agents_needed: eval.suggested_agents,
                    response: None,
                    engine_error: None,
                };
            }

            let refined = self.refine(request, &proposal, &eval.feedback, &live).await;
            self.log_turn("primary", refined.clone());
            proposal = refined;
            last_eval = Some(eval);
        }

        // Turn cap: force a decision without running agents.
        let (agents, response) = match last_eval {
            Some(eval) => (eval.suggested_agents, eval.feedback),
            None => (Vec::new(), "Consensus not reached".to_string()),
        };
        ConsensusResult {
            agreed: false,
            plan: proposal,
            agents_needed: agents,
            response: Some(response),
            engine_error: None,
        }
    }

    /// Main entry point: run the consensus phase and report.
    pub async fn discuss(&mut self, request: &str) -> DialogueResult {
        let consensus = self.reach_consensus(request).await;
        DialogueResult {
            success: consensus.agreed,
            plan: consensus.plan,
            turns: self.turn_count,
            agents_used: consensus.agents_needed,
            response: consensus.response,
            error: consensus.engine_error,
        }
    }
}
