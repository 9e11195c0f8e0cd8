//! The `AgentService` trait -- the adapter interface for the remote AI
//! execution service: an opaque session-producing service with a known
//! event stream.
//!
//! Shaped like a harness trait (`spawn` / `events` / `send` / `kill` /
//! `is_running`) but speaking to a remote HTTP service rather than a local
//! subprocess: `spawn` submits a prompt over HTTP instead of forking a
//! child process, and `events` streams parsed response chunks instead of a
//! child's stdout lines.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;

use crate::error::AgentServiceError;
use crate::types::{AgentHandle, AgentEvent, ExecuteRequest, SessionId};

/// Adapter interface for the remote AI execution service.
///
/// Object-safe: stored as `Arc<dyn AgentService>` and shared across the
/// agent executor, session watchdog, and resilience layer.
#[async_trait]
pub trait AgentService: Send + Sync {
    /// Human-readable name for this service (e.g. "prod-ai-service").
    fn name(&self) -> &str;

    /// Pre-flight health check with a bounded budget.
    async fn health_check(&self, budget: Duration) -> Result<(), AgentServiceError>;

    /// Submit a prompt, returning a handle for the spawned session.
    async fn spawn(&self, request: &ExecuteRequest) -> Result<AgentHandle, AgentServiceError>;

    /// Stream of progress events for a spawned session. Terminates with
    /// [`AgentEvent::Completed`].
    fn events(
        &self,
        handle: &AgentHandle,
    ) -> Pin<Box<dyn Stream<Item = AgentEvent> + Send>>;

    /// Send a follow-up message to a running session (conversation
    /// continuation).
    async fn send(&self, handle: &AgentHandle, message: &str) -> Result<(), AgentServiceError>;

    /// Request graceful termination of a session.
    async fn terminate(&self, session: SessionId) -> Result<(), AgentServiceError>;

    /// Check whether a session still exists on the service side. `None` means the service does not expose
    /// an existence probe, in which case the watchdog assumes success.
    async fn session_exists(&self, session: SessionId) -> Option<bool>;
}

// Compile-time assertion: AgentService must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn AgentService) {}
};
