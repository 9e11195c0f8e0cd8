//! AI execution service capability interface.

pub mod error;
pub mod http;
pub mod trait_def;
pub mod types;

pub use error::AgentServiceError;
pub use http::HttpAgentService;
pub use trait_def::AgentService;
pub use types::{AgentEvent, AgentHandle, ExecuteOutcome, ExecuteRequest, ModelRef, SessionId};
