//! FIFO Queue + Source Poller.
//!
//! The queue is the single admission point into the orchestrator: exactly
//! one `start(id)` runs at a time, a cooperative loop drains the queue
//! until it is empty, and a bounded history records the last 50 results.
//! The Source Poller feeds the queue from open tickets carrying the
//! configured "queue" label.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use orch_tracker::{Tracker, TicketId};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{info, warn};

use crate::labels::LabelScheme;
use crate::orchestrator::Orchestrator;

const HISTORY_CAP: usize = 50;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("ticket {0} is already queued or running")]
    Duplicate(TicketId),
    #[error("ticket {0} is running and cannot be removed or cleared")]
    Running(TicketId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    Failure,
}

#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub ticket_id: TicketId,
    pub outcome: RunOutcome,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct QueueStats {
    pub success_rate: f64,
    pub mean_duration: Duration,
}

#[derive(Default)]
struct QueueState {
    queued: VecDeque<TicketId>,
    running: Option<TicketId>,
    history: VecDeque<HistoryEntry>,
}

/// A function that builds a fresh [`Orchestrator`] bound to `ticket_id`;
/// the queue calls this once per dequeue so every run gets fresh
/// collaborators.
pub type OrchestratorFactory = Arc<dyn Fn(TicketId) -> Orchestrator + Send + Sync>;

/// Single-flight FIFO processing loop over master ticket ids.
pub struct Queue {
    state: Mutex<QueueState>,
    processing: AtomicBool,
    factory: OrchestratorFactory,
}

impl Queue {
    pub fn new(factory: OrchestratorFactory) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState::default()),
            processing: AtomicBool::new(false),
            factory,
        })
    }

    /// Enqueue `ticket_id`, rejecting a duplicate of anything running or
    /// already queued. Idempotently re-arms the processing loop if idle.
    pub fn enqueue(self: &Arc<Self>, ticket_id: TicketId) -> Result<(), QueueError> {
        {
            let mut state = self.state.lock();
            if state.running == Some(ticket_id) || state.queued.contains(&ticket_id) {
                return Err(QueueError::Duplicate(ticket_id));
            }
            state.queued.push_back(ticket_id);
        }
        self.arm();
        Ok(())
    }

    /// Remove a queued (not running) ticket.
    pub fn remove(&self, ticket_id: TicketId) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        if state.running == Some(ticket_id) {
            return Err(QueueError::Running(ticket_id));
        }
        state.queued.retain(|id| *id != ticket_id);
        Ok(())
    }

    /// Clear every queued (not running) ticket. A ticket currently running
    /// is untouched -- it has already left the queue.
    pub fn clear(&self) {
        self.state.lock().queued.clear();
    }

    pub fn running(&self) -> Option<TicketId> {
        self.state.lock().running
    }

    pub fn queued(&self) -> Vec<TicketId> {
        self.state.lock().queued.iter().copied().collect()
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.state.lock().history.iter().cloned().collect()
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        if state.history.is_empty() {
            return QueueStats { success_rate: 0.0, mean_duration: Duration::ZERO };
        }
        let total = state.history.len();
        let successes = state.history.iter().filter(|h| h.outcome == RunOutcome::Success).count();
        let total_duration: Duration = state.history.iter().map(|h| h.duration).sum();
        QueueStats {
            success_rate: successes as f64 / total as f64,
            mean_duration: total_duration / total as u32,
        }
    }

    /// Arm the cooperative processing loop if it is not already running.
    fn arm(self: &Arc<Self>) {
        if self.processing.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move { this.drain().await });
    }

    async fn drain(self: Arc<Self>) {
        loop {
            let next = {
                let mut state = self.state.lock();
                let next = state.queued.pop_front();
                state.running = next;
                next
            };
            let Some(ticket_id) = next else {
                self.processing.store(false, Ordering::SeqCst);
                return;
            };

            let orchestrator = (self.factory)(ticket_id);
            let start = tokio::time::Instant::now();
            let outcome = match orchestrator.start(ticket_id).await {
                Ok(()) => RunOutcome::Success,
                Err(err) => {
                    warn!(ticket_id, error = %err, "orchestration run failed");
                    RunOutcome::Failure
                }
            };
            let duration = start.elapsed();
            info!(ticket_id, ?outcome, ?duration, "orchestration run finished");

            let mut state = self.state.lock();
            state.running = None;
            state.history.push_back(HistoryEntry { ticket_id, outcome, duration });
            while state.history.len() > HISTORY_CAP {
                state.history.pop_front();
            }
        }
    }
}

/// Wakes every `poll_interval` and enqueues open tickets carrying the
/// configured queue label that the queue doesn't already know about
///. Overlapping polls are suppressed by an internal
/// single-flight flag.
pub struct SourcePoller {
    tracker: Arc<dyn Tracker>,
    labels: LabelScheme,
    queue: Arc<Queue>,
    poll_interval: Duration,
    in_flight: AtomicBool,
    cancel: tokio_util::sync::CancellationToken,
}

impl SourcePoller {
    pub fn new(
        tracker: Arc<dyn Tracker>,
        labels: LabelScheme,
        queue: Arc<Queue>,
        poll_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            tracker,
            labels,
            queue,
            poll_interval,
            in_flight: AtomicBool::new(false),
            cancel: tokio_util::sync::CancellationToken::new(),
        })
    }

    pub fn start(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.poll_interval);
            loop {
                tokio::select! {
                    _ = this.cancel.cancelled() => break,
                    _ = interval.tick() => this.poll_once().await,
                }
            }
        });
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    async fn poll_once(&self) {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(err) = self.poll_inner().await {
            warn!(error = %err, "source poller sweep failed");
        }
        self.in_flight.store(false, Ordering::SeqCst);
    }

    async fn poll_inner(&self) -> Result<(), orch_tracker::TrackerError> {
        let queue_label = self.labels.queue();
        let processing_label = self.labels.processing();
        let candidates = self.tracker.list_open_with_label(&queue_label).await?;

        for ticket_id in candidates {
            if self.queue.running() == Some(ticket_id) || self.queue.queued().contains(&ticket_id) {
                continue;
            }
            self.tracker.remove_label(ticket_id, &queue_label).await?;
            self.tracker.add_label(ticket_id, &processing_label).await?;
            if self.queue.enqueue(ticket_id).is_err() {
                warn!(ticket_id, "source poller found a duplicate after label swap");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_factory() -> OrchestratorFactory {
        Arc::new(move |_id| {
            Orchestrator::new(crate::context::OrchestratorContext {
                tracker: Arc::new(orch_test_utils::FakeTracker::default()),
                labels: LabelScheme::new("orch/"),
                executor: Arc::new(crate::executor::AgentExecutor::new(
                    Arc::new(orch_test_utils::FakeAgentService::new()),
                    Arc::new(crate::resilience::Resilience::new(Default::default(), Default::default(), 2)),
                    None,
                )),
                roster: crate::agents::AgentRoster::new(),
                state: Arc::new(crate::state::StateStore::new(
                    Arc::new(orch_test_utils::FakeTracker::default()),
                    LabelScheme::new("orch/"),
                    crate::retry::RetryConfig::default(),
                )),
                worktrees: Arc::new(
                    crate::worktree::WorktreeManager::new(".", ".", ".orch-test-registry.json")
                        .expect("test harness runs inside a git repo"),
                ),
                status: crate::status::StatusReporter::new(
                    Arc::new(orch_test_utils::FakeTracker::default()),
                    LabelScheme::new("orch/"),
                    Arc::new(NullProvider),
                    Duration::from_secs(60),
                ),
                events: Arc::new(crate::events::EventBus::new()),
                resilience: Arc::new(crate::resilience::Resilience::new(Default::default(), Default::default(), 2)),
                retry_config: crate::retry::RetryConfig::default(),
                settings: crate::context::StageSettings::default(),
            })
        })
    }

    struct NullProvider;
    #[async_trait::async_trait]
    impl crate::status::StatusSnapshotProvider for NullProvider {
        async fn snapshot(
            &self,
            _master_id: TicketId,
        ) -> Result<Vec<crate::body::StatusRow>, orch_tracker::TrackerError> {
            Ok(vec![])
        }
    }

    #[test]
    fn enqueue_rejects_duplicates() {
        let queue = Queue::new(fake_factory());
        queue.state.lock().running = Some(1);
        assert!(matches!(queue.enqueue(1), Err(QueueError::Duplicate(1))));
    }

    #[test]
    fn remove_refuses_running_ticket() {
        let queue = Queue::new(fake_factory());
        queue.state.lock().running = Some(1);
        assert!(matches!(queue.remove(1), Err(QueueError::Running(1))));
    }

    #[test]
    fn stats_on_empty_history_is_zeroed() {
        let queue = Queue::new(fake_factory());
        let stats = queue.stats();
        assert_eq!(stats.success_rate, 0.0);
        assert_eq!(stats.mean_duration, Duration::ZERO);
    }
}
