pub mod agent;
mod approvals;
mod arbiter;
mod bridge;
mod command;
mod config;
mod mqtt;
mod response;
pub mod testing;

pub use approvals::{ApprovalError, ApprovalRegistry, PendingApproval, Verdict};
pub use arbiter::{PermissionArbiter, ToolDecision, ToolGate};
pub use bridge::{Bridge, Dispatcher};
pub use command::CommandHandler;
pub use config::{parse_broker_url, BridgeConfig, BrokerAddr, ConfigError, STATUS_TOPIC};
pub use mqtt::{Inbound, MqttClient, PublishError, Publisher};
pub use response::{ResponseSink, ResponseWriter};
