//! Approval Monitor: polls the master ticket for the
//! `approved` or `rejected` label.

use std::sync::Arc;
use std::time::Duration;

use orch_tracker::{Tracker, TrackerError, TicketId};
use tokio_util::sync::CancellationToken;

use crate::labels::{LabelScheme, MasterState};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Rejected,
    Cancelled,
}

/// If `auto_approve` is set, add the approved label immediately and return
/// without polling.
pub async fn auto_approve(
    tracker: &Arc<dyn Tracker>,
    labels: &LabelScheme,
    ticket_id: TicketId,
) -> Result<(), TrackerError> {
    tracker
        .add_label(ticket_id, &labels.state(MasterState::Approved))
        .await
}

/// Poll `ticket_id` every `poll_interval` until it carries `approved` or
/// `rejected`, or `cancel` fires. No total timeout by default.
pub async fn wait_for_approval(
    tracker: &Arc<dyn Tracker>,
    labels: &LabelScheme,
    ticket_id: TicketId,
    poll_interval: Duration,
    cancel: &CancellationToken,
) -> Result<ApprovalDecision, TrackerError> {
    let approved_label = labels.state(MasterState::Approved);
    let rejected_label = labels.state(MasterState::Rejected);

    loop {
        let ticket = tracker.get_ticket(ticket_id).await?;
        if ticket.has_label(&rejected_label) {
            return Ok(ApprovalDecision::Rejected);
        }
        if ticket.has_label(&approved_label) {
            return Ok(ApprovalDecision::Approved);
        }

        tokio::select! {
            _ = cancel.cancelled() => return Ok(ApprovalDecision::Cancelled),
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orch_test_utils::FakeTracker;

    #[tokio::test(start_paused = true)]
    async fn approved_label_resolves_to_approved() {
        let fake = FakeTracker::default();
        fake.seed(1, "t", "b", &["orch/awaiting-approval"]);
        let tracker: Arc<dyn Tracker> = Arc::new(fake);
        let labels = LabelScheme::new("orch/");
        let cancel = CancellationToken::new();

        tracker.add_label(1, "orch/approved").await.unwrap();
        let decision =
            wait_for_approval(&tracker, &labels, 1, Duration::from_millis(10), &cancel).await.unwrap();
        assert_eq!(decision, ApprovalDecision::Approved);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_label_resolves_to_rejected() {
        let fake = FakeTracker::default();
        fake.seed(1, "t", "b", &["orch/rejected"]);
        let tracker: Arc<dyn Tracker> = Arc::new(fake);
        let labels = LabelScheme::new("orch/");
        let cancel = CancellationToken::new();

        let decision =
            wait_for_approval(&tracker, &labels, 1, Duration::from_millis(10), &cancel).await.unwrap();
        assert_eq!(decision, ApprovalDecision::Rejected);
    }

    #[tokio::test]
    async fn cancellation_stops_the_poll() {
        let fake = FakeTracker::default();
        fake.seed(1, "t", "b", &[]);
        let tracker: Arc<dyn Tracker> = Arc::new(fake);
        let labels = LabelScheme::new("orch/");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let decision =
            wait_for_approval(&tracker, &labels, 1, Duration::from_millis(10), &cancel).await.unwrap();
        assert_eq!(decision, ApprovalDecision::Cancelled);
    }
}
