use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use hearth_protocol::{ApprovalResponse, CommandEnvelope};

use crate::agent::Agent;
use crate::approvals::ApprovalRegistry;
use crate::command::CommandHandler;
use crate::config::{BridgeConfig, ConfigError};
use crate::mqtt::{Inbound, MqttClient};

/// Routes inbound broker messages to the command handler or the
/// approval registry by topic. Malformed payloads are logged and
/// dropped; nothing here terminates the loop.
pub struct Dispatcher {
    config: Arc<BridgeConfig>,
    registry: Arc<ApprovalRegistry>,
    handler: Arc<CommandHandler>,
}

impl Dispatcher {
    pub fn new(
        config: Arc<BridgeConfig>,
        registry: Arc<ApprovalRegistry>,
        handler: Arc<CommandHandler>,
    ) -> Self {
        Self {
            config,
            registry,
            handler,
        }
    }

    pub fn dispatch(&self, topic: &str, payload: &[u8]) {
        if topic == self.config.command_topic {
            match hearth_protocol::decode::<CommandEnvelope>(payload) {
                Ok(envelope) => {
                    // Commands run on their own task so approval
                    // responses keep flowing while the agent works.
                    let handler = self.handler.clone();
                    tokio::spawn(async move {
                        handler.handle(envelope).await;
                    });
                }
                Err(e) => {
                    tracing::warn!(topic, error = %e, "dropping malformed command payload");
                }
            }
        } else if topic == self.config.approval_response_topic {
            match hearth_protocol::decode::<ApprovalResponse>(payload) {
                Ok(response) => {
                    self.registry.resolve(
                        &response.request_id,
                        response.is_approved(),
                        response.reason,
                    );
                }
                Err(e) => {
                    tracing::warn!(topic, error = %e, "dropping malformed approval response");
                }
            }
        } else {
            tracing::debug!(topic, "ignoring message on unrouted topic");
        }
    }
}

/// The running bridge: broker client, dispatcher task, and the shared
/// approval registry.
pub struct Bridge {
    registry: Arc<ApprovalRegistry>,
    client: MqttClient,
    dispatcher: JoinHandle<()>,
}

impl Bridge {
    /// Start the bridge. Returns `None` when the config gate is off.
    pub fn start(
        config: BridgeConfig,
        agent: Arc<dyn Agent>,
    ) -> Result<Option<Self>, ConfigError> {
        if !config.enabled {
            tracing::info!("MQTT bridge disabled");
            return Ok(None);
        }

        let (client, inbound_rx) = MqttClient::connect(&config)?;
        let config = Arc::new(config);
        let registry = Arc::new(ApprovalRegistry::new());
        let handler = Arc::new(CommandHandler::new(
            Arc::new(client.clone()),
            registry.clone(),
            agent,
            config.clone(),
        ));
        let dispatcher = Dispatcher::new(config.clone(), registry.clone(), handler);

        tracing::info!(
            broker = %config.broker_url,
            client_id = %config.client_id,
            command_topic = %config.command_topic,
            "MQTT bridge starting"
        );

        let task = tokio::spawn(run_dispatcher(inbound_rx, dispatcher));

        Ok(Some(Self {
            registry,
            client,
            dispatcher: task,
        }))
    }

    /// Orderly teardown: reject pending approvals, announce offline
    /// (retained), drop the broker session, then stop the dispatcher.
    pub async fn shutdown(mut self) {
        tracing::info!("MQTT bridge shutting down");
        self.registry.cancel_all("MQTT bridge shutdown");
        self.client.disconnect().await;
        if tokio::time::timeout(Duration::from_secs(2), &mut self.dispatcher)
            .await
            .is_err()
        {
            self.dispatcher.abort();
        }
    }
}

async fn run_dispatcher(mut inbound: mpsc::Receiver<Inbound>, dispatcher: Dispatcher) {
    while let Some(message) = inbound.recv().await {
        dispatcher.dispatch(&message.topic, &message.payload);
    }
    tracing::debug!("dispatcher exited");
}
