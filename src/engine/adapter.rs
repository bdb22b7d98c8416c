//! Async subprocess driver for external LLM CLIs.
//!
//! Spawns the engine binary with stdin closed and stdout/stderr piped, in
//! its own process group so a kill reaches every descendant. Stdout is
//! split on newlines and each line parsed as one JSON event; malformed
//! lines become `Error` events carrying the raw text without ending the
//! stream. No child process survives the adapter on any exit path: the
//! stream's guard sends SIGKILL to the process group if the child has not
//! been reaped when the stream is dropped.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::engine::events::{extract_text_content, EngineEvent};
use crate::engine::profile::{EngineKind, EngineProfile};
use crate::errors::HivemindError;
use crate::observability::Metrics;

/// Callback invoked with human-facing progress messages.
pub type StatusCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Per-call overrides on top of the engine profile.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub max_tokens: Option<u32>,
    pub tools: Option<Vec<String>>,
    pub reasoning_effort: Option<String>,
    /// Deadline override; defaults to the profile timeout.
    pub timeout: Option<Duration>,
    /// When set (and a status callback is installed), this label is emitted
    /// on a fixed interval while the call is live.
    pub status_label: Option<String>,
}

/// Kills the child's process group on drop unless it was already reaped.
struct ProcessGuard {
    pgid: i32,
    reaped: Arc<AtomicBool>,
}

impl ProcessGuard {
    /// Signal the process group now. Safe to call repeatedly; a dead group
    /// is simply ESRCH.
    fn kill_group(&self) {
        if self.pgid > 0 && !self.reaped.load(Ordering::SeqCst) {
            unsafe {
                libc::killpg(self.pgid, libc::SIGKILL);
            }
        }
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        self.kill_group();
    }
}

/// A live engine invocation: a lazy event sequence plus the kill handle.
pub struct EngineStream {
    rx: mpsc::Receiver<EngineEvent>,
    guard: ProcessGuard,
}

impl EngineStream {
    /// Next event, or `None` once the stream is exhausted.
    pub async fn next(&mut self) -> Option<EngineEvent> {
        self.rx.recv().await
    }

    /// Kill the child's process group immediately. Idempotent.
    pub fn kill(&self) {
        self.guard.kill_group();
    }

    /// Whether the child has exited and been waited on.
    pub fn reaped(&self) -> bool {
        self.guard.reaped.load(Ordering::SeqCst)
    }
}

/// Subprocess adapter for one engine profile.
pub struct EngineAdapter {
    profile: EngineProfile,
    on_status: Option<StatusCallback>,
    progress_interval: Duration,
    metrics: Option<Arc<Metrics>>,
}

impl EngineAdapter {
    pub fn new(profile: EngineProfile) -> Self {
        Self {
            profile,
            on_status: None,
            progress_interval: Duration::from_secs(5),
            metrics: None,
        }
    }

    pub fn kind(&self) -> EngineKind {
        self.profile.kind
    }

    pub fn profile(&self) -> &EngineProfile {
        &self.profile
    }

    /// Install a progress callback, ticked every `progress_interval` while
    /// a labelled call is live.
    pub fn with_status(mut self, on_status: StatusCallback) -> Self {
        self.on_status = Some(on_status);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the argv for one invocation. The prompt is always the last
    /// argument.
    pub fn build_command(&self, prompt: &str, opts: &CallOptions) -> Vec<String> {
        let model = opts.model.clone().unwrap_or_else(|| self.profile.model.clone());
        let max_tokens = opts.max_tokens.unwrap_or(self.profile.max_tokens);

        let mut cmd = vec![
            self.profile.cli_path.clone(),
            "--model".into(),
            model,
            "--max-tokens".into(),
            max_tokens.to_string(),
            "--output".into(),
            self.profile.output_format.clone(),
        ];

        match self.profile.kind {
            EngineKind::Primary => {
                if let Some(system) = opts
                    .system_prompt
                    .as_ref()
                    .or(self.profile.system_prompt.as_ref())
                {
                    cmd.push("--system".into());
                    cmd.push(system.clone());
                }
                let tools = opts
                    .tools
                    .clone()
                    .unwrap_or_else(|| self.profile.allowed_tools.clone());
                for tool in tools {
                    cmd.push("--allow-tool".into());
                    cmd.push(tool);
                }
            }
            EngineKind::Consultant => {
                if let Some(effort) = opts
                    .reasoning_effort
                    .as_ref()
                    .or(self.profile.reasoning_effort.as_ref())
                {
                    cmd.push("--reasoning-effort".into());
                    cmd.push(effort.clone());
                }
                if let Some(system) = opts
                    .system_prompt
                    .as_ref()
                    .or(self.profile.system_prompt.as_ref())
                {
                    cmd.push("--system".into());
                    cmd.push(system.clone());
                }
            }
        }

        cmd.push(prompt.to_string());
        cmd
    }

    /// Parse one stdout line into an event.
    ///
    /// Unknown `type` values map to `Metadata`; unparseable lines map to
    /// `Error` carrying the raw text.
    pub fn parse_line(kind: EngineKind, line: &str) -> EngineEvent {
        let data: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                return EngineEvent::Error {
                    message: format!("failed to parse engine output: {e}: {line}"),
                }
            }
        };

        let event_type = data.get("type").and_then(Value::as_str).unwrap_or("content");

        match event_type {
            "content" => EngineEvent::Content {
                text: data
                    .get("content")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                index: data.get("index").and_then(Value::as_u64).unwrap_or(0) as usize,
            },
            "content_block_delta" => {
                let index = data.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
                let delta = data.get("delta").cloned().unwrap_or(Value::Null);
                if let Some(text) = delta.get("text").and_then(Value::as_str) {
                    EngineEvent::Content {
                        text: text.to_string(),
                        index,
                    }
                } else if let Some(partial) = delta.get("partial_json").and_then(Value::as_str) {
                    EngineEvent::ToolUsePartial {
                        partial_json: partial.to_string(),
                        index,
                    }
                } else {
                    EngineEvent::Metadata { data }
                }
            }
            "content_block_start" => {
                let block = data.get("content_block").cloned().unwrap_or(Value::Null);
                if block.get("type").and_then(Value::as_str) == Some("tool_use") {
                    EngineEvent::ToolUse {
                        id: block
                            .get("id")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        name: block
                            .get("name")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        input: block.get("input").cloned().unwrap_or(Value::Null),
                    }
                } else {
                    EngineEvent::Metadata { data }
                }
            }
            "tool_use" => EngineEvent::ToolUse {
                id: data
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                name: data
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                input: data.get("input").cloned().unwrap_or(Value::Null),
            },
            "tool_result" => EngineEvent::ToolResult {
                tool_use_id: data
                    .get("tool_use_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                result: data.get("result").cloned().unwrap_or(Value::Null),
            },
            "error" => EngineEvent::Error {
                message: data
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown engine error")
                    .to_string(),
            },
            "done" | "message_stop" => EngineEvent::Done {
                stop_reason: data
                    .get("stop_reason")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
            // Consultant reasoning tokens keep their content accessible.
            "reasoning" if kind == EngineKind::Consultant => EngineEvent::Metadata {
                data: serde_json::json!({
                    "reasoning": data.get("content").and_then(Value::as_str).unwrap_or(""),
                    "summary": data.get("summary").cloned().unwrap_or(Value::Null),
                }),
            },
            _ => EngineEvent::Metadata { data },
        }
    }

    /// Start the engine for one prompt and return the live event stream.
    pub fn stream(&self, prompt: &str, opts: &CallOptions) -> Result<EngineStream, HivemindError> {
        self.spawn(self.build_command(prompt, opts))
    }

    fn spawn(&self, argv: Vec<String>) -> Result<EngineStream, HivemindError> {
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| HivemindError::EngineUnavailable(format!("{}: {e}", argv[0])))?;

        let pgid = child.id().unwrap_or_default() as i32;
        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");
        let reaped = Arc::new(AtomicBool::new(false));

        let (tx, rx) = mpsc::channel(64);
        let kind = self.profile.kind;
        let reaper_flag = reaped.clone();

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut produced_output = false;
            let mut terminal_seen = false;

            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                produced_output = true;
                let event = Self::parse_line(kind, line);
                let terminal = event.is_terminal();
                if tx.send(event).await.is_err() {
                    // Receiver gone; the stream guard kills the group.
                    break;
                }
                if terminal {
                    terminal_seen = true;
                    break;
                }
            }

            let mut err_buf = String::new();
            let _ = BufReader::new(stderr).read_to_string(&mut err_buf).await;
            let status = child.wait().await;
            reaper_flag.store(true, Ordering::SeqCst);

            if terminal_seen {
                return;
            }

            let final_event = match status {
                Ok(s) if !s.success() => {
                    let stderr_tail: String = err_buf
                        .lines()
                        .rev()
                        .take(20)
                        .collect::<Vec<_>>()
                        .into_iter()
                        .rev()
                        .collect::<Vec<_>>()
                        .join("\n");
                    EngineEvent::Error {
                        message: if stderr_tail.trim().is_empty() {
                            format!("engine exited with status {}", s.code().unwrap_or(-1))
                        } else {
                            format!(
                                "engine exited with status {}: {}",
                                s.code().unwrap_or(-1),
                                stderr_tail.trim()
                            )
                        },
                    }
                }
                Ok(_) if !produced_output => EngineEvent::Error {
                    message: "No response".to_string(),
                },
                Ok(_) => EngineEvent::Done { stop_reason: None },
                Err(e) => EngineEvent::Error {
                    message: format!("failed to await engine: {e}"),
                },
            };
            let _ = tx.send(final_event).await;
        });

        Ok(EngineStream {
            rx,
            guard: ProcessGuard { pgid, reaped },
        })
    }

    /// Run the engine and collect events until `Done`/`Error`.
    ///
    /// On deadline expiry the child's process group is killed and
    /// [`HivemindError::ExecutorTimeout`] is returned.
    pub async fn generate(
        &self,
        prompt: &str,
        opts: &CallOptions,
    ) -> Result<Vec<EngineEvent>, HivemindError> {
        let deadline = opts.timeout.unwrap_or_else(|| self.profile.timeout());
        let mut stream = self.stream(prompt, opts)?;

        let collect = async {
            let mut events = Vec::new();
            while let Some(event) = stream.next().await {
                let terminal = event.is_terminal();
                events.push(event);
                if terminal {
                    break;
                }
            }
            events
        };

        // Bind first: the timeout future borrows the stream and must be
        // dropped before the kill below.
        let collected = tokio::time::timeout(deadline, collect).await;
        match collected {
            Ok(events) => Ok(events),
            Err(_) => {
                stream.kill();
                Err(HivemindError::ExecutorTimeout {
                    seconds: deadline.as_secs(),
                })
            }
        }
    }

    /// Run the engine and reduce the stream to `(success, text_or_error)`.
    ///
    /// This is the shape the dialogue loop and agent executor consume.
    pub async fn call(&self, prompt: &str, opts: &CallOptions) -> (bool, String) {
        let ticker = match (&self.on_status, &opts.status_label) {
            (Some(on_status), Some(label)) => {
                let on_status = on_status.clone();
                let label = label.clone();
                let interval = self.progress_interval;
                Some(tokio::spawn(async move {
                    loop {
                        tokio::time::sleep(interval).await;
                        on_status(&label);
                    }
                }))
            }
            _ => None,
        };

        let result = self.generate(prompt, opts).await;

        if let Some(ticker) = ticker {
            ticker.abort();
        }

        let outcome = match result {
            Ok(events) => {
                let error = events.iter().find_map(|e| match e {
                    EngineEvent::Error { message } => Some(message.clone()),
                    _ => None,
                });
                match error {
                    Some(message) => (false, message),
                    None => {
                        let text = extract_text_content(&events).trim().to_string();
                        if text.is_empty() {
                            (false, "No response".to_string())
                        } else {
                            (true, text)
                        }
                    }
                }
            }
            Err(HivemindError::ExecutorTimeout { seconds }) => {
                (false, format!("timed out after {seconds}s"))
            }
            Err(e) => (false, e.to_string()),
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_engine_call(
                self.profile.kind.as_str(),
                if outcome.0 { "success" } else { "error" },
            );
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sh_adapter(kind: EngineKind) -> EngineAdapter {
        EngineAdapter::new(EngineProfile::default_for(kind))
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["/bin/sh".into(), "-c".into(), script.into()]
    }

    // ---- parse_line mapping table ----

    #[test]
    fn test_parse_content() {
        let event = EngineAdapter::parse_line(
            EngineKind::Primary,
            r#"{"type":"content","content":"hi","index":2}"#,
        );
        match event {
            EngineEvent::Content { text, index } => {
                assert_eq!(text, "hi");
                assert_eq!(index, 2);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_content_block_delta_text_and_partial_json() {
        let text = EngineAdapter::parse_line(
            EngineKind::Primary,
            r#"{"type":"content_block_delta","delta":{"text":"abc"},"index":1}"#,
        );
        assert!(matches!(text, EngineEvent::Content { ref text, index: 1 } if text == "abc"));

        let partial = EngineAdapter::parse_line(
            EngineKind::Primary,
            r#"{"type":"content_block_delta","delta":{"partial_json":"{\"a\":"},"index":3}"#,
        );
        assert!(matches!(
            partial,
            EngineEvent::ToolUsePartial { index: 3, .. }
        ));
    }

    #[test]
    fn test_parse_content_block_start_tool_use() {
        let event = EngineAdapter::parse_line(
            EngineKind::Primary,
            r#"{"type":"content_block_start","content_block":{"type":"tool_use","id":"t1","name":"Read","input":{"path":"x"}}}"#,
        );
        match event {
            EngineEvent::ToolUse { id, name, input } => {
                assert_eq!(id, "t1");
                assert_eq!(name, "Read");
                assert_eq!(input, json!({"path": "x"}));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_tool_result_error_done() {
        assert!(matches!(
            EngineAdapter::parse_line(
                EngineKind::Primary,
                r#"{"type":"tool_result","tool_use_id":"t1","result":{"ok":true}}"#
            ),
            EngineEvent::ToolResult { .. }
        ));
        assert!(matches!(
            EngineAdapter::parse_line(EngineKind::Primary, r#"{"type":"error","error":"bad"}"#),
            EngineEvent::Error { ref message } if message == "bad"
        ));
        assert!(matches!(
            EngineAdapter::parse_line(
                EngineKind::Primary,
                r#"{"type":"done","stop_reason":"end_turn"}"#
            ),
            EngineEvent::Done { stop_reason: Some(ref r) } if r == "end_turn"
        ));
        assert!(matches!(
            EngineAdapter::parse_line(EngineKind::Primary, r#"{"type":"message_stop"}"#),
            EngineEvent::Done { stop_reason: None }
        ));
    }

    #[test]
    fn test_parse_reasoning_consultant_only() {
        let line = r#"{"type":"reasoning","content":"step 1","summary":"s"}"#;

        let consultant = EngineAdapter::parse_line(EngineKind::Consultant, line);
        match consultant {
            EngineEvent::Metadata { data } => {
                assert_eq!(data["reasoning"], "step 1");
                assert_eq!(data["summary"], "s");
            }
            other => panic!("unexpected: {other:?}"),
        }

        // The primary dialect treats it as opaque metadata.
        let primary = EngineAdapter::parse_line(EngineKind::Primary, line);
        match primary {
            EngineEvent::Metadata { data } => assert_eq!(data["type"], "reasoning"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_unknown_type_is_metadata() {
        assert!(matches!(
            EngineAdapter::parse_line(EngineKind::Primary, r#"{"type":"usage","tokens":10}"#),
            EngineEvent::Metadata { .. }
        ));
    }

    #[test]
    fn test_parse_malformed_line_is_error_with_raw_text() {
        let event = EngineAdapter::parse_line(EngineKind::Primary, "not json at all");
        match event {
            EngineEvent::Error { message } => assert!(message.contains("not json at all")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    // ---- command construction ----

    #[test]
    fn test_build_command_prompt_is_last() {
        let adapter = sh_adapter(EngineKind::Primary);
        let cmd = adapter.build_command("do things", &CallOptions::default());
        assert_eq!(cmd.first().map(String::as_str), Some("codex"));
        assert_eq!(cmd.last().map(String::as_str), Some("do things"));
        assert!(cmd.contains(&"--output".to_string()));
        assert!(cmd.contains(&"stream-json".to_string()));
    }

    #[test]
    fn test_build_command_consultant_reasoning_effort() {
        let adapter = sh_adapter(EngineKind::Consultant);
        let cmd = adapter.build_command(
            "evaluate",
            &CallOptions {
                system_prompt: Some("be terse".into()),
                ..Default::default()
            },
        );
        let joined = cmd.join(" ");
        assert!(joined.contains("--reasoning-effort medium"));
        assert!(joined.contains("--system be terse"));
    }

    #[test]
    fn test_build_command_primary_allow_tools() {
        let adapter = sh_adapter(EngineKind::Primary);
        let cmd = adapter.build_command(
            "p",
            &CallOptions {
                tools: Some(vec!["Read".into(), "Bash".into()]),
                ..Default::default()
            },
        );
        let joined = cmd.join(" ");
        assert!(joined.contains("--allow-tool Read"));
        assert!(joined.contains("--allow-tool Bash"));
    }

    // ---- subprocess behaviour ----

    #[tokio::test]
    async fn test_stream_parses_line_events() {
        let adapter = sh_adapter(EngineKind::Primary);
        let mut stream = adapter
            .spawn(sh(
                r#"printf '{"type":"content","content":"hello","index":0}\n{"type":"done","stop_reason":"end_turn"}\n'"#,
            ))
            .unwrap();

        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                break;
            }
        }

        assert_eq!(extract_text_content(&events), "hello");
        assert!(events.last().unwrap().is_done());
    }

    #[tokio::test]
    async fn test_malformed_line_does_not_kill_stream() {
        let adapter = sh_adapter(EngineKind::Primary);
        let mut stream = adapter
            .spawn(sh(
                // A broken line between two good ones; the stream must keep
                // flowing and surface the breakage as an Error event.
                r#"printf 'garbage\n{"type":"content","content":"ok","index":0}\n{"type":"done"}\n'"#,
            ))
            .unwrap();

        let first = stream.next().await.unwrap();
        assert!(first.is_error());
        let second = stream.next().await.unwrap();
        assert!(matches!(second, EngineEvent::Content { .. }));
    }

    #[tokio::test]
    async fn test_nonzero_exit_yields_stderr_tail() {
        let adapter = sh_adapter(EngineKind::Primary);
        let mut stream = adapter
            .spawn(sh(r#"echo "credential rejected" >&2; exit 3"#))
            .unwrap();

        let event = stream.next().await.unwrap();
        match event {
            EngineEvent::Error { message } => {
                assert!(message.contains("status 3"));
                assert!(message.contains("credential rejected"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_stdout_zero_exit_is_no_response() {
        let adapter = sh_adapter(EngineKind::Primary);
        let mut stream = adapter.spawn(sh("true")).unwrap();
        let event = stream.next().await.unwrap();
        assert!(matches!(event, EngineEvent::Error { ref message } if message == "No response"));
    }

    #[tokio::test]
    async fn test_generate_timeout_kills_process_group() {
        let adapter = sh_adapter(EngineKind::Primary);
        let mut stream = adapter.spawn(sh("sleep 30")).unwrap();
        let pgid = stream.guard.pgid;

        // Kill twice: termination must be idempotent.
        stream.kill();
        stream.kill();

        // Drain to completion; the reader reaps the child.
        while stream.next().await.is_some() {}
        for _ in 0..100 {
            if stream.reaped() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(stream.reaped());

        // No process with that pid remains.
        let alive = unsafe { libc::kill(pgid, 0) } == 0;
        assert!(!alive, "child process leaked");
    }

    #[tokio::test]
    async fn test_deadline_expiry_then_kill_reaps_child() {
        let adapter = sh_adapter(EngineKind::Primary);
        let mut stream = adapter.spawn(sh("sleep 30")).unwrap();

        let collect = async {
            while let Some(event) = stream.next().await {
                if event.is_terminal() {
                    break;
                }
            }
        };
        let timed_out = tokio::time::timeout(Duration::from_millis(100), collect)
            .await
            .is_err();
        assert!(timed_out);
        stream.kill();
        while stream.next().await.is_some() {}
        assert!(stream.reaped());
    }

    #[tokio::test]
    async fn test_call_collects_text() {
        // Point the profile at a stub that ignores flags and prints a
        // stream, exactly how an engine CLI would behave.
        let dir = tempfile::tempdir().unwrap();
        let stub = dir.path().join("engine-stub");
        std::fs::write(
            &stub,
            "#!/bin/sh\nprintf '{\"type\":\"content\",\"content\":\"forty-two\",\"index\":0}\\n{\"type\":\"done\"}\\n'\n",
        )
        .unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&stub, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let mut profile = EngineProfile::default_for(EngineKind::Primary);
        profile.cli_path = stub.to_string_lossy().to_string();
        let adapter = EngineAdapter::new(profile);

        let (ok, text) = adapter.call("question", &CallOptions::default()).await;
        assert!(ok);
        assert_eq!(text, "forty-two");
    }
}
