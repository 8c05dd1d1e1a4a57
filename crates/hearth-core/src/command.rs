use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use hearth_protocol::{CommandEnvelope, ResponseEvent, ResponsePayload};

use crate::agent::{self, Agent, PermissionMode, QueryOptions};
use crate::approvals::ApprovalRegistry;
use crate::arbiter::PermissionArbiter;
use crate::config::BridgeConfig;
use crate::mqtt::Publisher;
use crate::response::{publish_event, ResponseSink, ResponseWriter};

const NOT_AUTHENTICATED: &str =
    "Claude CLI not authenticated. Run 'claude login' on the bridge host first.";

/// Entry point for every inbound command envelope.
pub struct CommandHandler {
    publisher: Arc<dyn Publisher>,
    registry: Arc<ApprovalRegistry>,
    agent: Arc<dyn Agent>,
    config: Arc<BridgeConfig>,
    credentials_path: PathBuf,
    /// Informational only: commands are not serialized, approvals are.
    active: Mutex<Option<String>>,
}

impl CommandHandler {
    pub fn new(
        publisher: Arc<dyn Publisher>,
        registry: Arc<ApprovalRegistry>,
        agent: Arc<dyn Agent>,
        config: Arc<BridgeConfig>,
    ) -> Self {
        Self {
            publisher,
            registry,
            agent,
            config,
            credentials_path: agent::default_credentials_path(),
            active: Mutex::new(None),
        }
    }

    pub fn with_credentials_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_path = path.into();
        self
    }

    pub async fn handle(&self, envelope: CommandEnvelope) {
        let session_id = envelope
            .session_id
            .clone()
            .unwrap_or_else(|| self.registry.new_request_id());
        let source_device = envelope
            .source
            .clone()
            .unwrap_or_else(|| "unknown".to_string());

        // Approvals belonging to the previous command die before this
        // one can create any waiter.
        if self.registry.count() > 0 {
            self.registry.cancel_all("New command received");
        }
        self.mark_active(&session_id);

        let message = match envelope.message() {
            Ok(message) => message.to_string(),
            Err(e) => {
                self.publish_error(&session_id, &source_device, &e.to_string())
                    .await;
                self.clear_active(&session_id);
                return;
            }
        };

        if !agent::credentials_present(&self.credentials_path) {
            tracing::warn!(path = %self.credentials_path.display(), "agent credentials missing");
            self.publish_error(&session_id, &source_device, NOT_AUTHENTICATED)
                .await;
            self.clear_active(&session_id);
            return;
        }

        tracing::info!(
            session = %session_id,
            source = %source_device,
            streaming = envelope.stream,
            "command accepted"
        );

        let mut writer = ResponseWriter::new(
            self.publisher.clone(),
            &self.config.response_topic,
            &session_id,
            &source_device,
            envelope.stream,
        );

        let arbiter = PermissionArbiter::new(
            self.publisher.clone(),
            self.registry.clone(),
            &self.config.approval_request_topic,
            &session_id,
            &source_device,
            self.config.approval_timeout,
        );

        let options = QueryOptions {
            cwd: envelope
                .project
                .clone()
                .map(PathBuf::from)
                .unwrap_or_else(|| {
                    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
                }),
            resume_session_id: envelope.session_id.clone(),
            permission_mode: PermissionMode::Default,
            can_use_tool: arbiter.into_gate(),
        };

        match self.agent.query(&message, options, &mut writer).await {
            Ok(()) => writer.end().await,
            Err(e) => {
                tracing::warn!(session = %session_id, error = %e, "agent run failed");
                self.publish_error(&session_id, &source_device, &e.to_string())
                    .await;
            }
        }
        self.clear_active(&session_id);
    }

    async fn publish_error(&self, session_id: &str, source_device: &str, error: &str) {
        let event = ResponseEvent::new(
            ResponsePayload::Error {
                error: error.to_string(),
            },
            session_id,
            source_device,
        );
        publish_event(&*self.publisher, &self.config.response_topic, &event).await;
    }

    fn mark_active(&self, session_id: &str) {
        if let Ok(mut active) = self.active.lock() {
            if let Some(previous) = active.as_deref() {
                tracing::info!(previous, session = session_id, "command arrived while another is active");
            }
            *active = Some(session_id.to_string());
        }
    }

    fn clear_active(&self, session_id: &str) {
        if let Ok(mut active) = self.active.lock() {
            if active.as_deref() == Some(session_id) {
                *active = None;
            }
        }
    }
}
