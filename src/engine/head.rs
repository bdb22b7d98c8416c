//! The primary head: classification and consensus planning for prompts.
//!
//! The head classifies a prompt and runs the consensus dialogue for work
//! requests. The coordinator consults [`PrimaryHead::plan`] before keyword
//! routing, so the agreed agent set takes the Router's place on complex
//! prompts. [`PrimaryHead::process`] is the standalone conversational
//! entry: it also answers direct input with a single primary-engine call
//! and executes consensus agents itself.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::agents::pool::AgentPool;
use crate::core::coordinator::{Task, TaskPriority, TaskResult};
use crate::core::dispatcher::Dispatcher;
use crate::engine::adapter::{CallOptions, EngineAdapter};
use crate::engine::classifier::{classify, PromptClass};
use crate::engine::consultant::{synthesize_results, Consultant};
use crate::engine::dialogue::{DialogueLoop, LiveInputSource, NoLiveInput};
use crate::observability::Metrics;

const DIRECT_SYSTEM_PROMPT: &str = "You are HIVEMIND's primary assistant.\n\
\n\
You are talking DIRECTLY to the user. You ARE the assistant, not a router.\n\
\n\
For this specific message, provide a direct, helpful response.\n\
Be conversational, friendly, and concise.\n\
\n\
If this is a greeting, respond warmly.\n\
If this is a question, answer it directly.\n\
If this is feedback, acknowledge it appropriately.\n\
\n\
DO NOT mention agents, routing, or internal systems.\n\
DO NOT say you need to \"route\" or \"delegate\" anything.\n\
Just respond naturally as a helpful assistant.";

const IDENTITY_RESPONSE: &str = "I'm HIVEMIND - your AI assistant.\n\n\
I handle conversations directly, and when you have complex technical work, I coordinate \
with an expert consultant and our specialized agent teams to get things done.\n\n\
**What I can help with:**\n\
- General questions and conversations\n\
- Technical explanations and advice\n\
- Code writing, review, and debugging\n\
- System design and architecture\n\
- Security assessments\n\
- Infrastructure and deployment\n\
- Testing and quality assurance\n\n\
Just tell me what you need - for simple things I'll help directly, for complex work I'll \
coordinate with the right specialists.\n\n\
What can I help you with?";

/// Where a head response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    /// The primary engine answered alone.
    PrimaryDirect,
    /// The consultant was consulted but no agents ran.
    Consultation,
    /// Agents were executed.
    Agents,
}

/// The head's answer to one prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeadResponse {
    pub content: String,
    pub source: ResponseSource,
    pub success: bool,
    pub error: Option<String>,
    pub agents_used: Vec<String>,
    pub dialogue_turns: usize,
}

/// What the classifier + consensus decided about a prompt.
///
/// The coordinator consumes this to pick between the dialogue variant and
/// plain keyword routing.
#[derive(Debug, Clone)]
pub enum PlanOutcome {
    /// Conversational input: no dialogue, no agents.
    Simple,
    /// Consensus named the agents to execute in place of keyword routing.
    Agents {
        agents: Vec<String>,
        plan: String,
        turns: usize,
    },
    /// The engines answered the prompt themselves; no agents needed.
    Answer { response: String, turns: usize },
    /// Turn cap without agreement: the consultant's last feedback is the
    /// reply and no agents run.
    NoConsensus { response: String, turns: usize },
    /// An engine call failed; the caller should fall back to keyword
    /// routing.
    Unavailable { error: String },
}

/// The user-facing entry point composing classifier, dialogue, dispatcher,
/// and synthesis.
pub struct PrimaryHead {
    primary: Arc<EngineAdapter>,
    consultant: Arc<Consultant>,
    dispatcher: Arc<Dispatcher>,
    pool: Arc<AgentPool>,
    metrics: Arc<Metrics>,
    live_inputs: Arc<dyn LiveInputSource>,
    max_dialogue_turns: usize,
    history: Mutex<Vec<(String, String)>>,
}

impl PrimaryHead {
    pub fn new(
        primary: Arc<EngineAdapter>,
        consultant: Arc<Consultant>,
        dispatcher: Arc<Dispatcher>,
        pool: Arc<AgentPool>,
        metrics: Arc<Metrics>,
        max_dialogue_turns: usize,
    ) -> Self {
        Self {
            primary,
            consultant,
            dispatcher,
            pool,
            metrics,
            live_inputs: Arc::new(NoLiveInput),
            max_dialogue_turns,
            history: Mutex::new(Vec::new()),
        }
    }

    /// Inject a source of user follow-ups for the dialogue loop.
    pub fn with_live_inputs(mut self, source: Arc<dyn LiveInputSource>) -> Self {
        self.live_inputs = source;
        self
    }

    /// Classify the prompt and, for work, run the consensus dialogue.
    ///
    /// This is the planning half of the head: it decides whether agents
    /// run and which ones, without executing anything. The coordinator
    /// calls it before keyword routing.
    pub async fn plan(&self, prompt: &str) -> PlanOutcome {
        match classify(prompt) {
            PromptClass::Identity => PlanOutcome::Answer {
                response: IDENTITY_RESPONSE.to_string(),
                turns: 0,
            },
            PromptClass::Direct => PlanOutcome::Simple,
            PromptClass::Work => {
                let mut dialogue = DialogueLoop::new(
                    self.primary.clone(),
                    self.consultant.clone(),
                    self.live_inputs.clone(),
                    self.max_dialogue_turns,
                );
                let result = dialogue.discuss(prompt).await;
                self.metrics.dialogue_turns.observe(result.turns as f64);

                if let Some(error) = result.error {
                    return PlanOutcome::Unavailable { error };
                }
                if !result.success {
                    return PlanOutcome::NoConsensus {
                        response: result
                            .response
                            .unwrap_or_else(|| "Consensus not reached".to_string()),
                        turns: result.turns,
                    };
                }
                if result.agents_used.is_empty() {
                    PlanOutcome::Answer {
                        response: result.plan,
                        turns: result.turns,
                    }
                } else {
                    PlanOutcome::Agents {
                        agents: result.agents_used,
                        plan: result.plan,
                        turns: result.turns,
                    }
                }
            }
        }
    }

    /// Process user input. The head decides how to handle everything.
    pub async fn process(&self, user_input: &str) -> HeadResponse {
        self.history
            .lock()
            .push(("user".to_string(), user_input.to_string()));

        let response = match self.plan(user_input).await {
            PlanOutcome::Simple => self.respond_directly(user_input).await,
            PlanOutcome::Answer { response, turns } => HeadResponse {
                content: response,
                source: if turns == 0 {
                    ResponseSource::PrimaryDirect
                } else {
                    ResponseSource::Consultation
                },
                success: true,
                error: None,
                agents_used: Vec::new(),
                dialogue_turns: turns,
            },
            PlanOutcome::NoConsensus { response, turns } => HeadResponse {
                content: response,
                source: ResponseSource::Consultation,
                success: false,
                error: None,
                agents_used: Vec::new(),
                dialogue_turns: turns,
            },
            PlanOutcome::Unavailable { error } => HeadResponse {
                content: "I'm having trouble responding right now. Could you try again?"
                    .to_string(),
                source: ResponseSource::Consultation,
                success: false,
                error: Some(error),
                agents_used: Vec::new(),
                dialogue_turns: 0,
            },
            PlanOutcome::Agents { agents, turns, .. } => {
                let results = self.execute_agents(user_input, &agents).await;
                // The primary engine owns the user-facing voice: it merges
                // the agent outputs into the final reply.
                let content = synthesize_results(&self.primary, &results, user_input).await;
                let all_failed = results.iter().all(|r| !r.success);
                HeadResponse {
                    content,
                    source: ResponseSource::Agents,
                    success: !all_failed,
                    error: all_failed.then(|| "all agent executions failed".to_string()),
                    agents_used: agents,
                    dialogue_turns: turns,
                }
            }
        };

        self.history
            .lock()
            .push(("assistant".to_string(), response.content.clone()));
        response
    }

    /// Single primary-engine call, no consultant.
    async fn respond_directly(&self, user_input: &str) -> HeadResponse {
        let (success, response) = self
            .primary
            .call(
                user_input,
                &CallOptions {
                    system_prompt: Some(DIRECT_SYSTEM_PROMPT.to_string()),
                    status_label: Some("Thinking...".to_string()),
                    ..Default::default()
                },
            )
            .await;

        if success {
            HeadResponse {
                content: response,
                source: ResponseSource::PrimaryDirect,
                success: true,
                error: None,
                agents_used: Vec::new(),
                dialogue_turns: 0,
            }
        } else {
            HeadResponse {
                content: "I'm having trouble responding right now. Could you try again?"
                    .to_string(),
                source: ResponseSource::PrimaryDirect,
                success: false,
                error: Some(response),
                agents_used: Vec::new(),
                dialogue_turns: 0,
            }
        }
    }

    /// Dispatch the consensus agents in parallel under the normal
    /// concurrency limits.
    async fn execute_agents(&self, request: &str, agent_ids: &[String]) -> Vec<TaskResult> {
        let task = Arc::new(parking_lot::RwLock::new(Task::new(
            request,
            TaskPriority::Normal,
        )));

        let executions = agent_ids.iter().filter_map(|agent_id| {
            let agent = self.pool.get_agent(agent_id);
            if agent.is_none() {
                tracing::warn!(agent_id = %agent_id, "consensus named unknown agent, skipping");
            }
            agent.map(|agent| {
                let dispatcher = self.dispatcher.clone();
                let task = task.clone();
                async move { dispatcher.execute(task, agent, None).await }
            })
        });

        futures::future::join_all(executions).await
    }
}
