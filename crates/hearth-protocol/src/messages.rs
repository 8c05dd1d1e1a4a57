use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ProtocolError;

/// Inbound command envelope published by a device on the command topic.
///
/// `message` is the only required field; presence is checked by the
/// command handler (not the parser) so a missing message produces an
/// error *response* instead of a silent drop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Working directory hint for the agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default = "default_stream")]
    pub stream: bool,
}

fn default_stream() -> bool {
    true
}

impl CommandEnvelope {
    /// The command text, or the error the handler reports back when the
    /// field is absent or blank.
    pub fn message(&self) -> Result<&str, ProtocolError> {
        match self.message.as_deref() {
            Some(m) if !m.trim().is_empty() => Ok(m),
            _ => Err(ProtocolError::MissingField("message")),
        }
    }
}

/// Outbound response event on the response topic.
///
/// Serializes flat: `{type, ..payload fields.., session_id,
/// source_device, timestamp}` with `type` ∈ {chunk, answer, complete,
/// error}.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEvent {
    #[serde(flatten)]
    pub payload: ResponsePayload,
    pub session_id: String,
    pub source_device: String,
    /// Milliseconds since epoch.
    pub timestamp: u64,
}

/// Type-specific part of a [`ResponseEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    /// One raw agent event, forwarded as-is (streaming mode).
    Chunk { content: Value },
    /// Voice-friendly extract of a final result.
    Answer { text: String },
    /// Terminal success marker. `content` carries the buffered events in
    /// batched mode and is omitted in streaming mode.
    Complete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<Vec<Value>>,
        duration_ms: u64,
    },
    /// Terminal failure marker.
    Error { error: String },
}

impl ResponseEvent {
    pub fn new(payload: ResponsePayload, session_id: &str, source_device: &str) -> Self {
        Self {
            payload,
            session_id: session_id.to_string(),
            source_device: source_device.to_string(),
            timestamp: epoch_millis(),
        }
    }
}

/// Outbound tool-approval request on the approval-request topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalRequest {
    pub request_id: String,
    pub tool_name: String,
    pub input: ApprovalInput,
    pub session_id: String,
    pub source_device: String,
    /// Milliseconds since epoch.
    pub timestamp: u64,
}

/// Summary of the tool input a device needs to make a decision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApprovalInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ApprovalInput {
    /// Lift `command`/`description` out of a raw tool input object.
    pub fn from_tool_input(input: &Value) -> Self {
        let field = |name: &str| {
            input
                .get(name)
                .and_then(Value::as_str)
                .map(|s| s.to_string())
        };
        Self {
            command: field("command"),
            description: field("description"),
        }
    }
}

/// Inbound decision for a pending approval request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalResponse {
    pub request_id: String,
    /// Kept as raw JSON: only a literal `true` allows, anything else
    /// (including `"true"` or `1`) denies.
    #[serde(default)]
    pub approved: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ApprovalResponse {
    pub fn is_approved(&self) -> bool {
        matches!(self.approved, Value::Bool(true))
    }
}

/// Retained liveness payload on the status topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivenessStatus {
    /// Client identifier of the publishing bridge.
    pub server: String,
    pub online: bool,
    /// Milliseconds since epoch.
    pub timestamp: u64,
}

impl LivenessStatus {
    pub fn online(server: &str) -> Self {
        Self {
            server: server.to_string(),
            online: true,
            timestamp: epoch_millis(),
        }
    }

    pub fn offline(server: &str) -> Self {
        Self {
            server: server.to_string(),
            online: false,
            timestamp: epoch_millis(),
        }
    }
}

/// Current time as integer milliseconds since the Unix epoch.
pub fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Encode a payload for publishing.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    Ok(serde_json::to_vec(value)?)
}

/// Decode an inbound payload.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    Ok(serde_json::from_slice(bytes)?)
}
