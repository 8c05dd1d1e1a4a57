use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use hearth_protocol::{epoch_millis, ApprovalInput, ApprovalRequest};

use crate::approvals::ApprovalRegistry;
use crate::mqtt::Publisher;

/// Callback type the agent invokes for each tool use needing approval.
pub type ToolGate =
    Arc<dyn Fn(String, Value) -> Pin<Box<dyn Future<Output = ToolDecision> + Send>> + Send + Sync>;

/// Decision returned to the agent for a single tool use.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolDecision {
    Allow { updated_input: Value },
    Deny { message: String },
}

impl ToolDecision {
    /// Control-channel form: `{behavior:"allow", updatedInput}` or
    /// `{behavior:"deny", message}`.
    pub fn to_control_json(&self) -> Value {
        match self {
            Self::Allow { updated_input } => json!({
                "behavior": "allow",
                "updatedInput": updated_input,
            }),
            Self::Deny { message } => json!({
                "behavior": "deny",
                "message": message,
            }),
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }
}

/// Per-command mediator for tool approvals: publishes the request,
/// suspends on the registry, and maps the outcome to allow/deny.
pub struct PermissionArbiter {
    publisher: Arc<dyn Publisher>,
    registry: Arc<ApprovalRegistry>,
    request_topic: String,
    session_id: String,
    source_device: String,
    timeout: Duration,
}

impl PermissionArbiter {
    pub fn new(
        publisher: Arc<dyn Publisher>,
        registry: Arc<ApprovalRegistry>,
        request_topic: &str,
        session_id: &str,
        source_device: &str,
        timeout: Duration,
    ) -> Self {
        Self {
            publisher,
            registry,
            request_topic: request_topic.to_string(),
            session_id: session_id.to_string(),
            source_device: source_device.to_string(),
            timeout,
        }
    }

    pub async fn decide(&self, tool_name: &str, tool_input: Value) -> ToolDecision {
        let request_id = self.registry.new_request_id();
        // Waiter first, so a same-instant response can never be orphaned.
        let pending = self.registry.register(&request_id);

        let request = ApprovalRequest {
            request_id: request_id.clone(),
            tool_name: tool_name.to_string(),
            input: ApprovalInput::from_tool_input(&tool_input),
            session_id: self.session_id.clone(),
            source_device: self.source_device.clone(),
            timestamp: epoch_millis(),
        };

        tracing::info!(
            request_id = %request_id,
            tool = tool_name,
            session = %self.session_id,
            "requesting tool approval"
        );
        match hearth_protocol::encode(&request) {
            Ok(payload) => {
                // No retry on failure; the wait below times out.
                if let Err(e) = self.publisher.publish(&self.request_topic, payload, false).await {
                    tracing::warn!(request_id = %request_id, error = %e, "approval request publish failed");
                }
            }
            Err(e) => tracing::warn!(request_id = %request_id, error = %e, "approval request encode failed"),
        }

        match self
            .registry
            .await_decision(&request_id, pending, self.timeout)
            .await
        {
            Ok(verdict) if verdict.approved => ToolDecision::Allow {
                updated_input: tool_input,
            },
            Ok(verdict) => ToolDecision::Deny {
                message: verdict
                    .reason
                    .unwrap_or_else(|| "Denied by user".to_string()),
            },
            Err(e) => ToolDecision::Deny {
                message: format!("Approval timeout: {e}"),
            },
        }
    }

    /// Adapt the arbiter into the callback shape the agent consumes.
    pub fn into_gate(self) -> ToolGate {
        let arbiter = Arc::new(self);
        Arc::new(move |tool_name, tool_input| {
            let arbiter = arbiter.clone();
            Box::pin(async move { arbiter.decide(&tool_name, tool_input).await })
        })
    }
}
