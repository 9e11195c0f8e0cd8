//! Typed event surface.
//!
//! Progress events from an agent session fan out to three independent
//! consumers -- the executor's own state, the Status Reporter, and the
//! resilience layer -- each reached through [`orch_ai::AgentEvent`]
//! directly rather than a bespoke callback type. `OrchestrationEvent` is the
//! higher-level, stage/orchestrator-facing vocabulary that the Status
//! Reporter and Notifier key their templates on.

use serde::{Deserialize, Serialize};

/// Stage/orchestrator-level events consumed by the status reporter and notifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum OrchestrationEvent {
    PlanningComplete { ticket_id: u64 },
    TaskCompleted { ticket_id: u64, sub_ticket: u64 },
    CriticalError { ticket_id: u64, message: String, log_path: Option<String> },
    TestFailed { ticket_id: u64, test_sub_ticket: u64 },
    TestFixStarted { ticket_id: u64, test_sub_ticket: u64, fix_sub_ticket: u64, attempt: u32 },
    TestFixCompleted { ticket_id: u64, test_sub_ticket: u64, fix_sub_ticket: u64, attempt: u32, passed: bool },
    TestPassedAfterFix { ticket_id: u64, test_sub_ticket: u64, attempt: u32 },
    TestMaxAttemptsReached { ticket_id: u64, test_sub_ticket: u64 },
    OrchestrationComplete { ticket_id: u64, pull_request_url: String },
    OrchestrationFailed { ticket_id: u64, reason: String },
    ModelFailover { agent: String, from: String, to: String, reason: String },
}

impl OrchestrationEvent {
    /// The stable kind string used by the Notifier's template lookup and by
    /// the Status Reporter's `onEvent` dispatch.
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestrationEvent::PlanningComplete { .. } => "planning-complete",
            OrchestrationEvent::TaskCompleted { .. } => "task-completed",
            OrchestrationEvent::CriticalError { .. } => "critical-error",
            OrchestrationEvent::TestFailed { .. } => "test-failed",
            OrchestrationEvent::TestFixStarted { .. } => "test-fix-started",
            OrchestrationEvent::TestFixCompleted { .. } => "test-fix-completed",
            OrchestrationEvent::TestPassedAfterFix { .. } => "test-passed-after-fix",
            OrchestrationEvent::TestMaxAttemptsReached { .. } => "test-max-attempts-reached",
            OrchestrationEvent::OrchestrationComplete { .. } => "orchestration-complete",
            OrchestrationEvent::OrchestrationFailed { .. } => "orchestration-failed",
            OrchestrationEvent::ModelFailover { .. } => "model-failover",
        }
    }

    pub fn ticket_id(&self) -> Option<u64> {
        match self {
            OrchestrationEvent::PlanningComplete { ticket_id }
            | OrchestrationEvent::TaskCompleted { ticket_id, .. }
            | OrchestrationEvent::CriticalError { ticket_id, .. }
            | OrchestrationEvent::TestFailed { ticket_id, .. }
            | OrchestrationEvent::TestFixStarted { ticket_id, .. }
            | OrchestrationEvent::TestFixCompleted { ticket_id, .. }
            | OrchestrationEvent::TestPassedAfterFix { ticket_id, .. }
            | OrchestrationEvent::TestMaxAttemptsReached { ticket_id, .. }
            | OrchestrationEvent::OrchestrationComplete { ticket_id, .. }
            | OrchestrationEvent::OrchestrationFailed { ticket_id, .. } => Some(*ticket_id),
            OrchestrationEvent::ModelFailover { .. } => None,
        }
    }
}

/// A sink that reacts to orchestration-level events; stages hold an
/// `Arc<dyn EventSink>` rather than a list of callbacks.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &OrchestrationEvent);
}

/// Fans an event out to every registered sink. Constructed once at service
/// start alongside the Log Stream Hub and injected by reference.
#[derive(Default)]
pub struct EventBus {
    sinks: Vec<std::sync::Arc<dyn EventSink>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, sink: std::sync::Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    pub fn dispatch(&self, event: OrchestrationEvent) {
        for sink in &self.sinks {
            sink.on_event(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counter(AtomicUsize);
    impl EventSink for Counter {
        fn on_event(&self, _event: &OrchestrationEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn dispatch_reaches_every_registered_sink() {
        let mut bus = EventBus::new();
        let a = Arc::new(Counter(AtomicUsize::new(0)));
        let b = Arc::new(Counter(AtomicUsize::new(0)));
        bus.register(a.clone());
        bus.register(b.clone());

        bus.dispatch(OrchestrationEvent::PlanningComplete { ticket_id: 1 });

        assert_eq!(a.0.load(Ordering::SeqCst), 1);
        assert_eq!(b.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn kind_strings_are_stable() {
        assert_eq!(
            OrchestrationEvent::TestPassedAfterFix { ticket_id: 1, test_sub_ticket: 2, attempt: 3 }.kind(),
            "test-passed-after-fix"
        );
    }
}
