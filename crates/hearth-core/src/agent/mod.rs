mod claude;

pub use claude::ClaudeAgent;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

use crate::arbiter::ToolGate;
use crate::response::ResponseSink;

/// How the agent should route privileged tool uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PermissionMode {
    /// Every tool use requiring approval goes through the gate.
    #[default]
    Default,
}

impl PermissionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
        }
    }
}

/// Options for a single agent invocation.
pub struct QueryOptions {
    /// Working directory for the run.
    pub cwd: PathBuf,
    /// Session to resume, when the device supplied one.
    pub resume_session_id: Option<String>,
    pub permission_mode: PermissionMode,
    /// Invoked for each tool use needing approval.
    pub can_use_tool: ToolGate,
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to start agent: {0}")]
    Spawn(String),
    #[error("agent stream error: {0}")]
    Stream(String),
    #[error("agent exited with {0}")]
    Exited(String),
}

/// Streaming agent collaborator: consumes one natural-language message,
/// pushes structured events at the sink, and returns when the run ends.
#[async_trait]
pub trait Agent: Send + Sync {
    async fn query(
        &self,
        message: &str,
        options: QueryOptions,
        sink: &mut dyn ResponseSink,
    ) -> Result<(), AgentError>;
}

/// Readability probe for the agent's credential file. No parsing
/// happens at this layer.
pub fn credentials_present(path: &Path) -> bool {
    std::fs::File::open(path).is_ok()
}

/// Well-known credential location for the Claude CLI.
pub fn default_credentials_path() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/"))
        .join(".claude")
        .join(".credentials.json")
}
