use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};

use crate::arbiter::ToolDecision;
use crate::response::ResponseSink;

use super::{Agent, AgentError, QueryOptions};

/// Drives the Claude CLI over its stream-JSON stdio interface.
///
/// One invocation per command: the user message goes in on stdin, event
/// records stream out on stdout as JSONL and are forwarded verbatim to
/// the sink. When the CLI needs a tool approval it emits a
/// `control_request` line and blocks until the matching
/// `control_response` arrives on stdin.
pub struct ClaudeAgent {
    binary: PathBuf,
}

impl ClaudeAgent {
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("claude"),
        }
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for ClaudeAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for ClaudeAgent {
    async fn query(
        &self,
        message: &str,
        options: QueryOptions,
        sink: &mut dyn ResponseSink,
    ) -> Result<(), AgentError> {
        let mut command = Command::new(&self.binary);
        command
            .arg("--print")
            .arg("--verbose")
            .args(["--output-format", "stream-json"])
            .args(["--input-format", "stream-json"])
            .args(["--permission-mode", options.permission_mode.as_str()])
            .current_dir(&options.cwd)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);
        if let Some(session) = &options.resume_session_id {
            command.args(["--resume", session.as_str()]);
        }

        let mut child = command
            .spawn()
            .map_err(|e| AgentError::Spawn(e.to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Spawn("agent stdout not captured".to_string()))?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| AgentError::Spawn("agent stdin not captured".to_string()))?;

        write_line(
            &mut stdin,
            &json!({
                "type": "user",
                "message": { "role": "user", "content": message },
            }),
        )
        .await?;

        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| AgentError::Stream(e.to_string()))?
        {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let event: Value = match serde_json::from_str(trimmed) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(error = %e, "agent sent non-JSON line");
                    continue;
                }
            };

            if let Some(request) = ControlRequest::parse(&event) {
                let decision = match &request.tool {
                    Some((tool_name, input)) => {
                        (options.can_use_tool)(tool_name.clone(), input.clone()).await
                    }
                    None => ToolDecision::Deny {
                        message: "malformed tool request".to_string(),
                    },
                };
                tracing::debug!(allow = decision.is_allow(), "answering agent control request");
                write_line(&mut stdin, &request.response(&decision)).await?;
                continue;
            }

            sink.send(event).await;
        }

        let status = child
            .wait()
            .await
            .map_err(|e| AgentError::Stream(e.to_string()))?;
        if !status.success() {
            return Err(AgentError::Exited(status.to_string()));
        }
        Ok(())
    }
}

async fn write_line(stdin: &mut ChildStdin, value: &Value) -> Result<(), AgentError> {
    let mut data = value.to_string().into_bytes();
    data.push(b'\n');
    stdin
        .write_all(&data)
        .await
        .map_err(|e| AgentError::Stream(e.to_string()))?;
    stdin
        .flush()
        .await
        .map_err(|e| AgentError::Stream(e.to_string()))
}

/// A `control_request` line from the CLI. `tool` is None when the
/// request is not a well-formed `can_use_tool`; those are answered with
/// a deny instead of stalling the run.
struct ControlRequest {
    request_id: Value,
    tool: Option<(String, Value)>,
}

impl ControlRequest {
    fn parse(event: &Value) -> Option<Self> {
        if event.get("type").and_then(Value::as_str) != Some("control_request") {
            return None;
        }
        let request_id = event.get("request_id").cloned().unwrap_or(Value::Null);
        let tool = event.get("request").and_then(|request| {
            if request.get("subtype").and_then(Value::as_str) != Some("can_use_tool") {
                return None;
            }
            let tool_name = request.get("tool_name").and_then(Value::as_str)?;
            let input = request.get("input").cloned().unwrap_or(Value::Null);
            Some((tool_name.to_string(), input))
        });
        Some(Self { request_id, tool })
    }

    fn response(&self, decision: &ToolDecision) -> Value {
        json!({
            "type": "control_response",
            "response": {
                "subtype": "success",
                "request_id": self.request_id,
                "response": decision.to_control_json(),
            },
        })
    }
}
