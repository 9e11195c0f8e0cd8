//! Wire types for the AI execution service adapter.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque session identifier returned by the AI service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A model reference: `{providerID, modelID}`, naming `agents.<role>.model`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRef {
    pub provider_id: String,
    pub model_id: String,
}

impl std::fmt::Display for ModelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider_id, self.model_id)
    }
}

/// Parameters for submitting a prompt to an agent.
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    pub agent_name: String,
    pub prompt: String,
    pub model: ModelRef,
    pub working_dir: std::path::PathBuf,
    pub env_vars: HashMap<String, String>,
}

/// A live, spawned agent process/session.
#[derive(Debug, Clone)]
pub struct AgentHandle {
    pub session_id: SessionId,
    pub agent_name: String,
}

/// The typed progress-event surface.
///
/// Routed independently to the executor's own bookkeeping, the status
/// reporter, and the resilience layer, per the same design note.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum AgentEvent {
    /// The service is retrying an internal operation.
    Retry { attempt: u32, reason: String },
    /// A tool invocation completed inside the agent's session.
    ToolCompleted { tool: String },
    /// New assistant-visible text arrived; becomes the current agent message.
    MessageReceived { text: String },
    /// The session watchdog's hang detector fired.
    HangDetected,
    /// The agent finished its run.
    Completed {
        response: String,
        attempts: u32,
        tools_executed: u32,
    },
    /// A terminal or recoverable error occurred.
    Error { code: String, message: String },
}

/// Result of a successful `execute` call.
#[derive(Debug, Clone)]
pub struct ExecuteOutcome {
    pub response: String,
    pub session_id: SessionId,
    pub duration: std::time::Duration,
    pub attempts: u32,
    pub tools_executed: u32,
}
