//! Task Poller: polls a sub-ticket for the `agent-complete`
//! label until it appears or a total timeout elapses.

use std::sync::Arc;
use std::time::Duration;

use orch_tracker::{Tracker, TrackerError, TicketId};
use thiserror::Error;

use crate::labels::LabelScheme;

const POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum PollError {
    #[error("poll timed out after {0:?}")]
    PollTimeout(Duration),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

/// Poll `ticket_id` every 2s until it carries the `agent-complete` label, or
/// `total_timeout` elapses.
pub async fn poll_for_completion(
    tracker: &Arc<dyn Tracker>,
    labels: &LabelScheme,
    ticket_id: TicketId,
    total_timeout: Duration,
) -> Result<(), PollError> {
    let complete_label = labels.sub_state(crate::labels::SubState::AgentComplete);
    let deadline = tokio::time::Instant::now() + total_timeout;

    loop {
        let ticket = tracker.get_ticket(ticket_id).await?;
        if ticket.has_label(&complete_label) {
            return Ok(());
        }

        if tokio::time::Instant::now() >= deadline {
            return Err(PollError::PollTimeout(total_timeout));
        }

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        tokio::time::sleep(POLL_INTERVAL.min(remaining.max(Duration::from_millis(1)))).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orch_test_utils::FakeTracker;

    #[tokio::test(start_paused = true)]
    async fn returns_ok_once_label_appears() {
        let tracker = Arc::new(FakeTracker::default());
        tracker.seed(1, "t", "b", &[]);
        let tracker: Arc<dyn Tracker> = tracker;
        let labels = LabelScheme::new("orch/");

        let t2 = tracker.clone();
        let labels2 = labels.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            t2.add_label(1, &labels2.sub_state(crate::labels::SubState::AgentComplete))
                .await
                .unwrap();
        });

        let result = poll_for_completion(&tracker, &labels, 1, Duration::from_secs(30)).await;
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_if_label_never_appears() {
        let fake = FakeTracker::default();
        fake.seed(1, "t", "b", &[]);
        let tracker: Arc<dyn Tracker> = Arc::new(fake);
        let labels = LabelScheme::new("orch/");

        let result = poll_for_completion(&tracker, &labels, 1, Duration::from_secs(5)).await;
        assert!(matches!(result, Err(PollError::PollTimeout(_))));
    }
}
