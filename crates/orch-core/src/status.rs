//! Status Reporter: periodic + event-driven master status
//! table updates, plus a 500ms-debounced per-sub-ticket progress writer.
//!
//! Updates are serialized per reporter instance: a concurrent update is a
//! no-op, enforced by the `update_lock` below rather than by blocking
//! callers on a queue.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use orch_tracker::{Tracker, TrackerError, TicketId};
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::body::{apply_markers, update_status_table, ProgressMarkers, StatusRow};
use crate::events::{EventSink, OrchestrationEvent};
use crate::labels::LabelScheme;

/// Default periodic refresh interval.
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(60);

/// Debounce tail for per-sub-ticket progress writes.
pub const PROGRESS_DEBOUNCE: Duration = Duration::from_millis(500);

/// Supplies the current status rows for a master ticket on demand; the
/// Orchestrator/stage loop implements this over its in-memory plan state.
#[async_trait]
pub trait StatusSnapshotProvider: Send + Sync {
    async fn snapshot(&self, master_id: TicketId) -> Result<Vec<StatusRow>, TrackerError>;
}

struct PendingUpdate {
    markers: ProgressMarkers,
    generation: u64,
}

/// Periodic + event-driven status table writer, and the debounced
/// per-sub-ticket progress sink.
pub struct StatusReporter {
    tracker: Arc<dyn Tracker>,
    labels: LabelScheme,
    provider: Arc<dyn StatusSnapshotProvider>,
    update_interval: Duration,
    regenerate_lock: AsyncMutex<()>,
    pending: Mutex<HashMap<TicketId, PendingUpdate>>,
    /// One cancellation token per master ticket currently being reported
    /// on, rather than a single reporter-wide token: a `StatusReporter` is
    /// one long-lived instance shared across every orchestration the queue
    /// runs in sequence,
    /// so stopping ticket A's timer on completion must not also kill the
    /// timer the next dequeued ticket starts.
    timers: Mutex<HashMap<TicketId, CancellationToken>>,
}

impl StatusReporter {
    pub fn new(
        tracker: Arc<dyn Tracker>,
        labels: LabelScheme,
        provider: Arc<dyn StatusSnapshotProvider>,
        update_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            tracker,
            labels,
            provider,
            update_interval,
            regenerate_lock: AsyncMutex::new(()),
            pending: Mutex::new(HashMap::new()),
            timers: Mutex::new(HashMap::new()),
        })
    }

    /// Start the periodic timer loop for `master_id`. Returns immediately;
    /// the loop runs until `stop(master_id)` is called.
    pub fn start_periodic(self: &Arc<Self>, master_id: TicketId) {
        let cancel = CancellationToken::new();
        self.timers.lock().insert(master_id, cancel.clone());

        let this = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.update_interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(err) = this.regenerate(master_id).await {
                            warn!(error = %err, ticket = master_id, "status regeneration failed");
                        }
                    }
                }
            }
        });
    }

    /// Stop `master_id`'s periodic timer, if one is running.
    pub fn stop(&self, master_id: TicketId) {
        if let Some(cancel) = self.timers.lock().remove(&master_id) {
            cancel.cancel();
        }
    }

    /// Regenerate the master ticket's status table, rewriting only that
    /// subregion of the body. A concurrent call observes the lock held and
    /// is a no-op.
    pub async fn regenerate(&self, master_id: TicketId) -> Result<(), TrackerError> {
        let Ok(_guard) = self.regenerate_lock.try_lock() else {
            debug!(ticket = master_id, "status regeneration already in flight, skipping");
            return Ok(());
        };
        let rows = self.provider.snapshot(master_id).await?;
        let ticket = self.tracker.get_ticket(master_id).await?;
        let new_body = update_status_table(&ticket.body, &rows);
        if new_body != ticket.body {
            self.tracker.set_body(master_id, &new_body).await?;
        }
        Ok(())
    }

    /// Write an explicit set of status rows directly, bypassing the
    /// snapshot provider. Used for the completion stage's final table,
    /// built from the testing stage's own pass/fail detail rather than
    /// re-derived from ticket labels, where the write must actually happen
    /// rather than being skipped as a no-op against an in-flight periodic
    /// regeneration.
    pub async fn write_rows(&self, master_id: TicketId, rows: &[StatusRow]) -> Result<(), TrackerError> {
        let _guard = self.regenerate_lock.lock().await;
        let ticket = self.tracker.get_ticket(master_id).await?;
        let new_body = update_status_table(&ticket.body, rows);
        if new_body != ticket.body {
            self.tracker.set_body(master_id, &new_body).await?;
        }
        Ok(())
    }

    /// Debounced per-sub-ticket progress update: merges with
    /// any pending update for the same sub-ticket and writes once, 500ms
    /// after the last call for that id.
    pub fn update_task_progress(self: &Arc<Self>, sub_ticket_id: TicketId, update: ProgressMarkers) {
        let generation = {
            let mut pending = self.pending.lock();
            let entry = pending.entry(sub_ticket_id).or_insert_with(|| PendingUpdate {
                markers: ProgressMarkers::default(),
                generation: 0,
            });
            entry.markers.merge(&update);
            entry.generation += 1;
            entry.generation
        };

        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(PROGRESS_DEBOUNCE).await;

            let markers = {
                let mut pending = this.pending.lock();
                match pending.get(&sub_ticket_id) {
                    Some(entry) if entry.generation == generation => {
                        pending.remove(&sub_ticket_id).map(|e| e.markers)
                    }
                    _ => None,
                }
            };

            let Some(markers) = markers else {
                return;
            };

            match this.tracker.get_ticket(sub_ticket_id).await {
                Ok(ticket) => {
                    let new_body = apply_markers(&ticket.body, &markers);
                    if let Err(err) = this.tracker.set_body(sub_ticket_id, &new_body).await {
                        warn!(error = %err, sub_ticket = sub_ticket_id, "failed to write progress markers");
                    }
                }
                Err(err) => warn!(error = %err, sub_ticket = sub_ticket_id, "failed to fetch sub-ticket for progress write"),
            }
        });
    }
}

/// Adapts a [`StatusReporter`] into an [`EventSink`] so it can be registered
/// on the same [`crate::events::EventBus`] the Notifier listens on: the
/// event path fires off a `regenerate` call for every master-ticket-bearing
/// dispatched event, in addition to the periodic timer.
pub struct StatusEventSink(Arc<StatusReporter>);

impl StatusEventSink {
    pub fn new(reporter: Arc<StatusReporter>) -> Arc<Self> {
        Arc::new(Self(reporter))
    }
}

impl EventSink for StatusEventSink {
    fn on_event(&self, event: &OrchestrationEvent) {
        let Some(master_id) = event.ticket_id() else { return };
        let reporter = self.0.clone();
        tokio::spawn(async move {
            if let Err(err) = reporter.regenerate(master_id).await {
                warn!(error = %err, ticket = master_id, "event-driven status regeneration failed");
            }
        });
    }
}

/// The production [`StatusSnapshotProvider`]: reads sub-ticket status
/// straight out of the tracker's labels and per-ticket progress markers,
/// the same way [`crate::orchestrator::reconstruct_plan`] recovers a plan
/// after a restart, rather than keeping an in-memory shadow of stage state.
pub struct TrackerStatusProvider {
    tracker: Arc<dyn Tracker>,
    labels: LabelScheme,
}

impl TrackerStatusProvider {
    pub fn new(tracker: Arc<dyn Tracker>, labels: LabelScheme) -> Arc<Self> {
        Arc::new(Self { tracker, labels })
    }

    fn status_emoji(&self, ticket: &orch_tracker::Ticket) -> &'static str {
        use crate::labels::SubState;
        for state in SubState::ALL {
            if ticket.has_label(&self.labels.sub_state(state)) {
                return match state {
                    SubState::Pending => "⚪",
                    SubState::InProgress => "🔵",
                    SubState::AgentComplete => "🟢",
                    SubState::Failed => "🔴",
                    SubState::TestFailed => "🟠",
                    SubState::MaxAttemptsReached => "🔺",
                };
            }
        }
        "⚪"
    }
}

#[async_trait]
impl StatusSnapshotProvider for TrackerStatusProvider {
    async fn snapshot(&self, master_id: TicketId) -> Result<Vec<StatusRow>, TrackerError> {
        use crate::labels::Role;

        let master_ref = self.labels.master_ref(master_id);
        let sub_ids = self.tracker.list_open_with_label(&master_ref).await?;
        let fix_attempt_label = self.labels.role(Role::FixAttempt);
        let test_label = self.labels.role(Role::Test);

        let mut rows = Vec::new();
        for sub_id in sub_ids {
            let ticket = self.tracker.get_ticket(sub_id).await?;
            if ticket.has_label(&fix_attempt_label) {
                // Fix-attempt sub-tickets roll up into their test's row
                // rather than getting one of their own.
                continue;
            }

            let markers = crate::body::ProgressMarkers::parse(&ticket.body);
            let fix_attempts = if ticket.has_label(&test_label) {
                let test_ref = self.labels.test_ref(sub_id);
                let open_fixes = self.tracker.list_open_with_label(&test_ref).await?;
                let mut max_attempt = 0u32;
                for fix_id in open_fixes {
                    let fix_ticket = self.tracker.get_ticket(fix_id).await?;
                    for label in &fix_ticket.labels {
                        if let Some(k) = self.labels.parse_attempt(label) {
                            max_attempt = max_attempt.max(k);
                        }
                    }
                }
                Some((max_attempt, 10))
            } else {
                None
            };

            rows.push(StatusRow {
                sub_ticket: sub_id,
                title: ticket.title.clone(),
                status_emoji: self.status_emoji(&ticket),
                agent_message: markers.agent_message,
                tools_used: markers.tools_used.unwrap_or(0),
                retry_count: markers.retry_count.unwrap_or(0),
                last_retry_age: markers.last_retry_time,
                fix_attempts,
            });
        }

        rows.sort_by_key(|r| r.sub_ticket);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orch_test_utils::FakeTracker;

    struct EmptyProvider;
    #[async_trait]
    impl StatusSnapshotProvider for EmptyProvider {
        async fn snapshot(&self, _master_id: TicketId) -> Result<Vec<StatusRow>, TrackerError> {
            Ok(vec![])
        }
    }

    fn reporter(tracker: Arc<dyn Tracker>) -> Arc<StatusReporter> {
        StatusReporter::new(
            tracker,
            LabelScheme::new("orch/"),
            Arc::new(EmptyProvider),
            Duration::from_secs(60),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn debounced_updates_within_window_collapse_to_one_write() {
        let tracker = Arc::new(FakeTracker::default());
        tracker.seed(1, "t", "body", &[]);
        let tracker: Arc<dyn Tracker> = tracker;
        let reporter = reporter(tracker.clone());

        reporter.update_task_progress(1, ProgressMarkers { tools_used: Some(1), ..Default::default() });
        tokio::time::sleep(Duration::from_millis(100)).await;
        reporter.update_task_progress(1, ProgressMarkers { tools_used: Some(2), ..Default::default() });

        tokio::time::sleep(Duration::from_millis(700)).await;

        let ticket = tracker.get_ticket(1).await.unwrap();
        assert_eq!(ticket.body.matches("tools-used").count(), 1);
        assert!(ticket.body.contains("tools-used=2"));
    }

    #[tokio::test]
    async fn regenerate_is_a_noop_when_table_unchanged() {
        let tracker = Arc::new(FakeTracker::default());
        tracker.seed(1, "t", "no markers here", &[]);
        let tracker: Arc<dyn Tracker> = tracker;
        let reporter = reporter(tracker.clone());

        reporter.regenerate(1).await.unwrap();
        let ticket = tracker.get_ticket(1).await.unwrap();
        assert_eq!(ticket.body, "no markers here");
    }
}
