use std::env;
use std::time::Duration;

use thiserror::Error;

use hearth_protocol::epoch_millis;

/// Liveness topic. Fixed and always published retained.
pub const STATUS_TOPIC: &str = "claude/home/status";

/// Bridge configuration. Immutable after startup.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Master gate; when false the bridge does not start.
    pub enabled: bool,
    /// Broker URL (`mqtt://host:port`).
    pub broker_url: String,
    /// Broker client identity, unique per process.
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Subscribe: inbound command envelopes.
    pub command_topic: String,
    /// Publish: response events.
    pub response_topic: String,
    /// Publish: tool-approval requests.
    pub approval_request_topic: String,
    /// Subscribe: tool-approval decisions.
    pub approval_response_topic: String,
    /// Budget for a single approval round-trip.
    pub approval_timeout: Duration,
    /// Delay between reconnect attempts after a transport error.
    pub reconnect_backoff: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            broker_url: "mqtt://localhost:1883".to_string(),
            client_id: format!("claudecodeui-{}", epoch_millis()),
            username: None,
            password: None,
            command_topic: "claude/command".to_string(),
            response_topic: "claude/home/response".to_string(),
            approval_request_topic: "claude/approval-request".to_string(),
            approval_response_topic: "claude/approval-response".to_string(),
            approval_timeout: Duration::from_millis(60_000),
            reconnect_backoff: Duration::from_millis(5_000),
        }
    }
}

impl BridgeConfig {
    /// Assemble the configuration from `MQTT_*` environment variables,
    /// falling back to [`Default`] for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: parse_bool("MQTT_ENABLED", defaults.enabled),
            broker_url: parse_string("MQTT_BROKER_URL", defaults.broker_url),
            client_id: parse_string("MQTT_CLIENT_ID", defaults.client_id),
            username: env::var("MQTT_USERNAME").ok(),
            password: env::var("MQTT_PASSWORD").ok(),
            command_topic: parse_string("MQTT_COMMAND_TOPIC", defaults.command_topic),
            response_topic: parse_string("MQTT_RESPONSE_TOPIC", defaults.response_topic),
            approval_request_topic: parse_string(
                "MQTT_APPROVAL_REQUEST_TOPIC",
                defaults.approval_request_topic,
            ),
            approval_response_topic: parse_string(
                "MQTT_APPROVAL_RESPONSE_TOPIC",
                defaults.approval_response_topic,
            ),
            approval_timeout: parse_millis("MQTT_APPROVAL_TIMEOUT", defaults.approval_timeout),
            reconnect_backoff: parse_millis("MQTT_RECONNECT_BACKOFF", defaults.reconnect_backoff),
        }
    }
}

/// Configuration errors surfaced at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid broker url '{url}': {reason}")]
    InvalidBrokerUrl { url: String, reason: String },
}

/// Host/port pair parsed out of a broker URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerAddr {
    pub host: String,
    pub port: u16,
}

/// Parse `mqtt://host[:port]` (also accepts `tcp://` and a bare
/// host:port). Port defaults to 1883.
pub fn parse_broker_url(url: &str) -> Result<BrokerAddr, ConfigError> {
    let rest = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);
    let rest = rest.trim_end_matches('/');

    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidBrokerUrl {
                    url: url.to_string(),
                    reason: format!("bad port '{port}'"),
                })?;
            (host, port)
        }
        None => (rest, 1883),
    };

    if host.is_empty() {
        return Err(ConfigError::InvalidBrokerUrl {
            url: url.to_string(),
            reason: "empty host".to_string(),
        });
    }

    Ok(BrokerAddr {
        host: host.to_string(),
        port,
    })
}

fn parse_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"),
        Err(_) => default,
    }
}

fn parse_string(key: &str, default: String) -> String {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => v,
        _ => default,
    }
}

fn parse_millis(key: &str, default: Duration) -> Duration {
    match env::var(key) {
        Ok(v) => v
            .parse::<u64>()
            .map(Duration::from_millis)
            .unwrap_or(default),
        Err(_) => default,
    }
}
