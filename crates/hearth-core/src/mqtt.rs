use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Packet, QoS};
use thiserror::Error;
use tokio::sync::mpsc;

use hearth_protocol::LivenessStatus;

use crate::config::{parse_broker_url, BridgeConfig, ConfigError, STATUS_TOPIC};

/// Publish seam shared by every outbound path. The broker client
/// implements it for real; tests substitute a recorder.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>, retain: bool)
        -> Result<(), PublishError>;
}

#[derive(Debug, Error)]
#[error("publish to {topic} failed: {reason}")]
pub struct PublishError {
    pub topic: String,
    pub reason: String,
}

/// Raw inbound broker message, delivered to the dispatcher in arrival
/// order.
#[derive(Debug)]
pub struct Inbound {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Broker client adapter: owns the connection lifecycle, reconnects
/// with a fixed backoff, and keeps the retained liveness value current.
#[derive(Clone)]
pub struct MqttClient {
    client: AsyncClient,
    client_id: String,
    stopping: Arc<AtomicBool>,
}

impl MqttClient {
    /// Build the client and spawn its event-loop task. The connection
    /// itself is established lazily by the event loop; subscriptions
    /// and the `online:true` liveness publish happen on every
    /// successful (re)connect.
    pub fn connect(config: &BridgeConfig) -> Result<(Self, mpsc::Receiver<Inbound>), ConfigError> {
        let addr = parse_broker_url(&config.broker_url)?;

        let mut options = MqttOptions::new(config.client_id.clone(), addr.host, addr.port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_session(true);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username.clone(), password.clone());
        }
        // The broker announces us offline if the connection dies without
        // an orderly shutdown.
        if let Ok(payload) = hearth_protocol::encode(&LivenessStatus::offline(&config.client_id)) {
            options.set_last_will(LastWill::new(STATUS_TOPIC, payload, QoS::AtMostOnce, true));
        }

        let (client, eventloop) = AsyncClient::new(options, 64);
        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        let stopping = Arc::new(AtomicBool::new(false));

        tokio::spawn(run_event_loop(EventLoopParams {
            eventloop,
            client: client.clone(),
            client_id: config.client_id.clone(),
            subscriptions: vec![
                config.command_topic.clone(),
                config.approval_response_topic.clone(),
            ],
            backoff: config.reconnect_backoff,
            inbound_tx,
            stopping: stopping.clone(),
        }));

        Ok((
            Self {
                client,
                client_id: config.client_id.clone(),
                stopping,
            },
            inbound_rx,
        ))
    }

    /// Orderly shutdown: retained `online:false`, then drop the broker
    /// session. The inbound stream closes once the event loop exits.
    pub async fn disconnect(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        match hearth_protocol::encode(&LivenessStatus::offline(&self.client_id)) {
            Ok(payload) => {
                if let Err(e) = self
                    .client
                    .publish(STATUS_TOPIC, QoS::AtMostOnce, true, payload)
                    .await
                {
                    tracing::warn!(error = %e, "offline liveness publish failed");
                }
            }
            Err(e) => tracing::warn!(error = %e, "offline liveness encode failed"),
        }
        if let Err(e) = self.client.disconnect().await {
            tracing::debug!(error = %e, "broker disconnect error");
        }
    }
}

#[async_trait]
impl Publisher for MqttClient {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        retain: bool,
    ) -> Result<(), PublishError> {
        self.client
            .publish(topic, QoS::AtMostOnce, retain, payload)
            .await
            .map_err(|e| PublishError {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }
}

struct EventLoopParams {
    eventloop: EventLoop,
    client: AsyncClient,
    client_id: String,
    subscriptions: Vec<String>,
    backoff: Duration,
    inbound_tx: mpsc::Sender<Inbound>,
    stopping: Arc<AtomicBool>,
}

async fn run_event_loop(params: EventLoopParams) {
    let EventLoopParams {
        mut eventloop,
        client,
        client_id,
        subscriptions,
        backoff,
        inbound_tx,
        stopping,
    } = params;

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                tracing::info!(client_id = %client_id, "broker session established");
                for topic in &subscriptions {
                    // Non-fatal: the next reconnect retries.
                    if let Err(e) = client.subscribe(topic.clone(), QoS::AtMostOnce).await {
                        tracing::warn!(topic = %topic, error = %e, "subscribe failed");
                    }
                }
                match hearth_protocol::encode(&LivenessStatus::online(&client_id)) {
                    Ok(payload) => {
                        if let Err(e) = client
                            .publish(STATUS_TOPIC, QoS::AtMostOnce, true, payload)
                            .await
                        {
                            tracing::warn!(error = %e, "liveness publish failed");
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "liveness encode failed"),
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let inbound = Inbound {
                    topic: publish.topic.clone(),
                    payload: publish.payload.to_vec(),
                };
                if inbound_tx.send(inbound).await.is_err() {
                    tracing::debug!("inbound consumer gone, stopping event loop");
                    break;
                }
            }
            Ok(_) => {}
            Err(e) => {
                if stopping.load(Ordering::SeqCst) {
                    break;
                }
                tracing::warn!(error = %e, backoff_ms = backoff.as_millis() as u64,
                    "broker connection lost, reconnecting");
                tokio::time::sleep(backoff).await;
            }
        }
        if stopping.load(Ordering::SeqCst) {
            break;
        }
    }

    tracing::debug!("broker event loop exited");
}
