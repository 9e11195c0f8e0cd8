//! Fakes for `Tracker` and `AgentService`, shared by every crate's test
//! suite.

pub mod fake_agent_service;
pub mod fake_tracker;

pub use fake_agent_service::{FakeAgentService, ScriptedRun};
pub use fake_tracker::FakeTracker;
