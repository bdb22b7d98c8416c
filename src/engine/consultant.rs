//! The consultant engine role: plan evaluation, agent execution, output
//! verification, and synthesis.
//!
//! The consultant never talks to the user directly. It reviews the primary
//! engine's proposals, runs agent roles as separate CLI calls with the
//! agent's role injected as the system prompt, and can merge multi-agent
//! outputs into one reply.

use std::sync::Arc;

use crate::agents::pool::AgentPool;
use crate::core::coordinator::TaskResult;
use crate::core::dispatcher::ExecutorFn;
use crate::engine::adapter::{CallOptions, EngineAdapter};

const EVALUATOR_PROMPT: &str = "You are the expert consultant in HIVEMIND, reviewing a proposed \
approach for a user task. Your job is to:\n\
1. Assess if the approach is sound\n\
2. Suggest improvements if needed\n\
3. Identify which specialized agents (if any) should be involved\n\
4. Help reach consensus on the best approach\n\
\n\
Available agents:\n\
- DEV-001 to DEV-006: Development (architecture, backend, frontend, code review, docs, devops)\n\
- SEC-001 to SEC-006: Security (architecture, pentest, malware, wireless, compliance, incident)\n\
- INF-001 to INF-006: Infrastructure (cloud, sysadmin, network, database, SRE, automation)\n\
- QA-001 to QA-006: QA (strategy, automation, performance, security testing, manual, test data)\n\
\n\
Respond with your evaluation and whether you agree with the approach.\n\
If you agree, state \"AGREED\" clearly.\n\
If you disagree, explain why and propose modifications.";

const VERIFIER_PROMPT: &str = "You are the consultant in HIVEMIND, verifying task completion.\n\
\n\
Review the output against the original requirements.\n\
Check for:\n\
1. Completeness - Does it address all requirements?\n\
2. Correctness - Is the approach/solution correct?\n\
3. Quality - Does it meet professional standards?\n\
\n\
If the output is acceptable, state \"VERIFIED\" clearly.\n\
If issues exist, describe what needs to be fixed.";

/// Consultant's verdict on a proposal.
#[derive(Debug, Clone)]
pub struct EvaluationResult {
    pub agrees: bool,
    pub feedback: String,
    pub suggested_agents: Vec<String>,
    /// The engine call itself failed (binary missing, timeout, non-zero
    /// exit) — this is not a disagreement.
    pub engine_error: bool,
}

/// Consultant's verdict on an output.
#[derive(Debug, Clone)]
pub struct VerificationResult {
    pub verified: bool,
    pub issues: Option<String>,
}

/// The consultant engine with the agent roster it may name.
pub struct Consultant {
    adapter: Arc<EngineAdapter>,
    pool: Arc<AgentPool>,
}

impl Consultant {
    pub fn new(adapter: Arc<EngineAdapter>, pool: Arc<AgentPool>) -> Self {
        Self { adapter, pool }
    }

    pub fn adapter(&self) -> Arc<EngineAdapter> {
        self.adapter.clone()
    }

    /// Evaluate a proposal against the request and prior dialogue.
    ///
    /// Agreement is the literal marker "AGREED" (or "I AGREE"),
    /// case-insensitive; suggested agents are known agent ids appearing
    /// verbatim in the reply.
    pub async fn evaluate_proposal(
        &self,
        user_request: &str,
        proposal: &str,
        history: &[(String, String)],
    ) -> EvaluationResult {
        let history_text = if history.is_empty() {
            String::new()
        } else {
            let lines: Vec<String> = history
                .iter()
                .map(|(speaker, content)| format!("{speaker}: {content}"))
                .collect();
            format!("Previous Discussion:\n{}\n\n", lines.join("\n\n"))
        };

        let prompt = format!(
            "User Request: {user_request}\n\n{history_text}Proposal:\n{proposal}\n\n\
             Evaluate this proposal. Do you agree with the approach?\n\
             If agents are needed, list them by ID (e.g., DEV-001, SEC-002).\n"
        );

        let (success, response) = self
            .adapter
            .call(
                &prompt,
                &CallOptions {
                    system_prompt: Some(EVALUATOR_PROMPT.to_string()),
                    status_label: Some("Waiting on consultant evaluation...".to_string()),
                    ..Default::default()
                },
            )
            .await;

        if !success {
            return EvaluationResult {
                agrees: false,
                feedback: format!("Failed to evaluate: {response}"),
                suggested_agents: Vec::new(),
                engine_error: true,
            };
        }

        let upper = response.to_uppercase();
        let agrees = upper.contains("AGREED") || upper.contains("I AGREE");

        let suggested_agents = self
            .pool
            .agent_ids()
            .into_iter()
            .filter(|id| response.contains(id.as_str()))
            .collect();

        EvaluationResult {
            agrees,
            feedback: response,
            suggested_agents,
            engine_error: false,
        }
    }

    /// Run a task as a specific agent: one CLI call with the agent's role
    /// as the system prompt.
    pub async fn execute_agent_task(
        &self,
        agent_id: &str,
        task: &str,
        context: Option<&str>,
    ) -> TaskResult {
        let (system_prompt, team_id) = match self.pool.get_agent(agent_id) {
            Some(agent) => {
                let a = agent.read();
                let prompt = a.metadata.system_prompt.clone().unwrap_or_else(|| {
                    format!(
                        "You are executing a task in HIVEMIND.\n\n\
                         You are acting as {} ({}).\nTeam: {}\n\n\
                         Execute the assigned task with expertise in your domain.\n\
                         Provide a complete, professional response.\n\
                         Focus on your area of specialization.",
                        a.name(),
                        a.metadata.description,
                        a.team()
                    )
                });
                (prompt, a.team().to_string())
            }
            None => (
                "You are executing a task in HIVEMIND. Provide a complete, professional response."
                    .to_string(),
                "unknown".to_string(),
            ),
        };

        let full_task = match context {
            Some(context) => format!("Context:\n{context}\n\nTask:\n{task}"),
            None => task.to_string(),
        };

        let (success, response) = self
            .adapter
            .call(
                &full_task,
                &CallOptions {
                    system_prompt: Some(system_prompt),
                    status_label: Some(format!("Executing {agent_id}...")),
                    ..Default::default()
                },
            )
            .await;

        if success {
            TaskResult::success("", agent_id, &team_id, response)
        } else {
            TaskResult::failure("", agent_id, &team_id, response)
        }
    }

    /// Verify an output against the original request via the "VERIFIED"
    /// marker protocol.
    pub async fn verify_output(&self, original_request: &str, output: &str) -> VerificationResult {
        let prompt = format!(
            "Original Request:\n{original_request}\n\nOutput to Verify:\n{output}\n\n\
             Is this output complete and correct? Review against the original requirements.\n"
        );

        let (success, response) = self
            .adapter
            .call(
                &prompt,
                &CallOptions {
                    system_prompt: Some(VERIFIER_PROMPT.to_string()),
                    status_label: Some("Waiting on consultant verification...".to_string()),
                    ..Default::default()
                },
            )
            .await;

        if !success {
            return VerificationResult {
                verified: false,
                issues: Some(format!("Verification failed: {response}")),
            };
        }

        let verified = response.to_uppercase().contains("VERIFIED");
        VerificationResult {
            issues: (!verified).then(|| response),
            verified,
        }
    }
}

/// Merge multiple agent results into one reply through an engine, falling
/// back to plain concatenation when the engine call fails.
///
/// The primary engine owns the user-facing voice, so the head hands it the
/// agent outputs for the final merge.
pub async fn synthesize_results(
    adapter: &EngineAdapter,
    results: &[TaskResult],
    original_request: &str,
) -> String {
    if results.len() == 1 {
        let r = &results[0];
        return if r.output.is_empty() {
            r.error.clone().unwrap_or_else(|| "No output".to_string())
        } else {
            r.output.clone()
        };
    }

    let sections: Vec<String> = results
        .iter()
        .filter(|r| r.success && !r.output.is_empty())
        .map(|r| format!("## {} ({})\n{}", r.agent_id, r.team_id, r.output))
        .collect();

    let prompt = format!(
        "Original Request:\n{original_request}\n\nAgent Outputs:\n{}\n\n\
         Synthesize these outputs into a single, cohesive response for the user.\n\
         Remove redundancy, organize logically, and present as one unified answer.\n",
        sections.join("\n")
    );

    let (success, response) = adapter
        .call(
            &prompt,
            &CallOptions {
                status_label: Some("Synthesizing agent outputs...".to_string()),
                ..Default::default()
            },
        )
        .await;

    if success {
        response
    } else {
        sections.join("\n\n")
    }
}

/// Build the dispatcher executor backed by the consultant engine.
///
/// Each execution is one CLI call with the agent's role as the system
/// prompt; dropping the returned future kills the engine subprocess, which
/// is how dispatcher timeouts and cancellations reach the child.
pub fn consultant_executor(adapter: Arc<EngineAdapter>, pool: Arc<AgentPool>) -> ExecutorFn {
    Arc::new(move |task, agent| {
        let consultant = Consultant::new(adapter.clone(), pool.clone());
        let (task_id, prompt) = {
            let t = task.read();
            (t.id.to_string(), t.prompt.clone())
        };
        let agent_id = agent.read().id().to_string();
        Box::pin(async move {
            let mut result = consultant
                .execute_agent_task(&agent_id, &prompt, None)
                .await;
            result.task_id = task_id;
            Ok(result)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::profile::{EngineKind, EngineProfile};

    fn consultant_with_stub(script: &str) -> (Consultant, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let stub = dir.path().join("consultant-stub");
        std::fs::write(&stub, format!("#!/bin/sh\n{script}\n")).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&stub, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let mut profile = EngineProfile::default_for(EngineKind::Consultant);
        profile.cli_path = stub.to_string_lossy().to_string();
        let adapter = Arc::new(EngineAdapter::new(profile));
        let pool = Arc::new(AgentPool::with_default_roster());
        (Consultant::new(adapter, pool), dir)
    }

    fn emit(content: &str) -> String {
        // A stub engine printing one content event and a done marker.
        format!(
            "printf '{{\"type\":\"content\",\"content\":\"{content}\",\"index\":0}}\\n{{\"type\":\"done\"}}\\n'"
        )
    }

    #[tokio::test]
    async fn test_evaluate_agreement_and_agent_extraction() {
        let (consultant, _dir) =
            consultant_with_stub(&emit("AGREED. Use DEV-001 and DEV-002 for this."));

        let eval = consultant
            .evaluate_proposal("implement a cache", "proposal text", &[])
            .await;
        assert!(eval.agrees);
        assert_eq!(
            eval.suggested_agents,
            vec!["DEV-001".to_string(), "DEV-002".to_string()]
        );
    }

    #[tokio::test]
    async fn test_evaluate_disagreement() {
        let (consultant, _dir) =
            consultant_with_stub(&emit("This misses caching semantics; try SEC-002 instead."));

        let eval = consultant
            .evaluate_proposal("implement a cache", "proposal", &[])
            .await;
        assert!(!eval.agrees);
        assert_eq!(eval.suggested_agents, vec!["SEC-002".to_string()]);
        assert!(eval.feedback.contains("caching semantics"));
    }

    #[tokio::test]
    async fn test_evaluate_failure_never_agrees() {
        let (consultant, _dir) = consultant_with_stub("echo nope >&2; exit 1");

        let eval = consultant.evaluate_proposal("req", "prop", &[]).await;
        assert!(!eval.agrees);
        assert!(eval.engine_error);
        assert!(eval.feedback.contains("Failed to evaluate"));
    }

    #[tokio::test]
    async fn test_execute_agent_task_success() {
        let (consultant, _dir) = consultant_with_stub(&emit("backend work complete"));

        let result = consultant
            .execute_agent_task("DEV-002", "build the endpoint", None)
            .await;
        assert!(result.success);
        assert_eq!(result.agent_id, "DEV-002");
        assert_eq!(result.team_id, "DEV");
        assert_eq!(result.output, "backend work complete");
    }

    #[tokio::test]
    async fn test_verify_output_marker() {
        let (consultant, _dir) = consultant_with_stub(&emit("Looks good. VERIFIED."));
        let verdict = consultant.verify_output("req", "out").await;
        assert!(verdict.verified);
        assert!(verdict.issues.is_none());
    }

    #[tokio::test]
    async fn test_synthesize_single_result_is_identity() {
        let (consultant, _dir) = consultant_with_stub(&emit("unused"));
        let results = vec![TaskResult::success("t", "DEV-002", "DEV", "only output".into())];
        let merged = synthesize_results(&consultant.adapter(), &results, "req").await;
        assert_eq!(merged, "only output");
    }

    #[tokio::test]
    async fn test_dispatcher_timeout_reaps_engine_subprocess() {
        use crate::config::ConcurrencySettings;
        use crate::core::coordinator::{Task, TaskPriority};
        use crate::core::dispatcher::Dispatcher;
        use crate::engine::profile::{EngineKind, EngineProfile};
        use crate::observability::Metrics;
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("engine.pid");
        let stub = dir.path().join("slow-engine");
        std::fs::write(
            &stub,
            format!("#!/bin/sh\necho $$ > {}\nsleep 30\n", pid_file.display()),
        )
        .unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&stub, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let mut profile = EngineProfile::default_for(EngineKind::Consultant);
        profile.cli_path = stub.to_string_lossy().to_string();
        let adapter = Arc::new(EngineAdapter::new(profile));
        let pool = Arc::new(AgentPool::with_default_roster());

        let dispatcher = Arc::new(Dispatcher::new(
            &ConcurrencySettings::default(),
            Arc::new(Metrics::new()),
        ));
        dispatcher.set_executor(consultant_executor(adapter, pool.clone()));

        let task = Arc::new(parking_lot::RwLock::new(Task::new(
            "long running work",
            TaskPriority::Normal,
        )));
        let agent = pool.get_agent("DEV-002").unwrap();
        let result = dispatcher
            .execute(task, agent, Some(Duration::from_secs(1)))
            .await;

        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("timed out after 1"));

        // The engine subprocess must not outlive the execution.
        let pid: i32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let mut alive = true;
        for _ in 0..100 {
            alive = unsafe { libc::kill(pid, 0) } == 0;
            if !alive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!alive, "engine subprocess leaked past the deadline");
    }

    #[tokio::test]
    async fn test_synthesize_falls_back_to_concatenation() {
        let (consultant, _dir) = consultant_with_stub("exit 1");
        let results = vec![
            TaskResult::success("t", "DEV-002", "DEV", "part one".into()),
            TaskResult::success("t", "QA-001", "QA", "part two".into()),
        ];
        let merged = synthesize_results(&consultant.adapter(), &results, "req").await;
        assert!(merged.contains("part one"));
        assert!(merged.contains("part two"));
        assert!(merged.contains("DEV-002"));
    }
}
