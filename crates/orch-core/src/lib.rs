//! The deterministic orchestration engine: stage state machine,
//! dependency-scheduled task execution, the test self-healing loop, the
//! FIFO service queue with its source poller, the live log stream, and the
//! resilience layer.
//!
//! This crate holds no concrete tracker, AI-service, or notifier client --
//! it is parameterized entirely over the `orch_tracker::Tracker` and
//! `orch_ai::AgentService` traits and the [`events::EventSink`] surface,
//! keeping pure domain/state logic separate from concrete backends.

pub mod agents;
pub mod body;
pub mod config;
pub mod context;
pub mod debug_dump;
pub mod depgraph;
pub mod events;
pub mod executor;
pub mod labels;
pub mod logstream;
pub mod orchestrator;
pub mod plan;
pub mod poller;
pub mod queue;
pub mod resilience;
pub mod retry;
pub mod stages;
pub mod state;
pub mod status;
pub mod worktree;

pub use context::{OrchestratorContext, StageSettings};
pub use orchestrator::{Orchestrator, OrchestratorError};
