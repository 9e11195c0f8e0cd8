//! State Store: the issue tracker itself is the system of
//! record. A ticket's state is whichever state label it currently carries;
//! transitioning state means swapping one label for another via the
//! [`orch_tracker::Tracker`] trait, rather than writing a database row.

use std::sync::Arc;

use orch_tracker::{Tracker, TrackerError, TicketId};

use crate::labels::{LabelScheme, MasterState, SubState};
use crate::retry::{retry_with, RetryConfig};

/// Reads and writes master-ticket and sub-ticket state labels through a
/// [`Tracker`], retrying transient tracker failures per `retry_config`.
pub struct StateStore {
    tracker: Arc<dyn Tracker>,
    labels: LabelScheme,
    retry_config: RetryConfig,
}

impl StateStore {
    pub fn new(tracker: Arc<dyn Tracker>, labels: LabelScheme, retry_config: RetryConfig) -> Self {
        Self { tracker, labels, retry_config }
    }

    async fn get_ticket(&self, ticket_id: TicketId) -> Result<orch_tracker::Ticket, TrackerError> {
        retry_with(&self.retry_config, |_attempt| self.tracker.get_ticket(ticket_id))
            .await
            .map_err(|e| e.0)
    }

    /// The master state label currently on `ticket_id`, if any.
    ///
    /// A ticket may legitimately carry zero state labels (a freshly queued
    /// ticket not yet picked up) or, transiently, more than one if a crash
    /// interrupted a transition; the first one resolved is returned, and the
    /// others are left for [`Self::repair_master_state`] to reconcile.
    pub async fn current_master_state(
        &self,
        ticket_id: TicketId,
    ) -> Result<Option<MasterState>, TrackerError> {
        let ticket = self.get_ticket(ticket_id).await?;
        Ok(MasterState::ALL
            .into_iter()
            .find(|state| ticket.has_label(&self.labels.state(*state))))
    }

    /// Move `ticket_id` from whatever master state label it carries (if any)
    /// to `to`, removing every other state label found.
    pub async fn transition_master(
        &self,
        ticket_id: TicketId,
        to: MasterState,
    ) -> Result<(), TrackerError> {
        let ticket = self.get_ticket(ticket_id).await?;
        for state in MasterState::ALL {
            let label = self.labels.state(state);
            if state != to && ticket.has_label(&label) {
                retry_with(&self.retry_config, |_attempt| {
                    self.tracker.remove_label(ticket_id, &label)
                })
                .await
                .map_err(|e| e.0)?;
            }
        }
        retry_with(&self.retry_config, |_attempt| {
            self.tracker.add_label(ticket_id, &self.labels.state(to))
        })
        .await
        .map_err(|e| e.0)
    }

    /// If more than one master state label is present (possible after a
    /// crash mid-transition), keep only the most-advanced one. The resume
    /// policy only ever advances, never rewinds.
    pub async fn repair_master_state(&self, ticket_id: TicketId) -> Result<(), TrackerError> {
        let ticket = self.get_ticket(ticket_id).await?;
        let present: Vec<MasterState> = MasterState::ALL
            .into_iter()
            .filter(|state| ticket.has_label(&self.labels.state(*state)))
            .collect();
        if present.len() <= 1 {
            return Ok(());
        }
        let keep = present.into_iter().max_by_key(state_rank).unwrap();
        self.transition_master(ticket_id, keep).await
    }

    /// The sub-state label currently on `ticket_id`, if any.
    pub async fn current_sub_state(
        &self,
        ticket_id: TicketId,
    ) -> Result<Option<SubState>, TrackerError> {
        let ticket = self.get_ticket(ticket_id).await?;
        Ok(SubState::ALL
            .into_iter()
            .find(|state| ticket.has_label(&self.labels.sub_state(*state))))
    }

    pub async fn transition_sub(
        &self,
        ticket_id: TicketId,
        to: SubState,
    ) -> Result<(), TrackerError> {
        let ticket = self.get_ticket(ticket_id).await?;
        for state in SubState::ALL {
            let label = self.labels.sub_state(state);
            if state != to && ticket.has_label(&label) {
                retry_with(&self.retry_config, |_attempt| {
                    self.tracker.remove_label(ticket_id, &label)
                })
                .await
                .map_err(|e| e.0)?;
            }
        }
        retry_with(&self.retry_config, |_attempt| {
            self.tracker.add_label(ticket_id, &self.labels.sub_state(to))
        })
        .await
        .map_err(|e| e.0)
    }
}

/// Ordering of master states by how far along the pipeline they are, used
/// only to pick a survivor when repairing a ticket with more than one state
/// label. Not the same as a total transition order: `rejected`/`failed` can
/// be reached from several earlier states.
fn state_rank(state: &MasterState) -> u8 {
    match state {
        MasterState::Planning => 0,
        MasterState::AwaitingApproval => 1,
        MasterState::Rejected => 2,
        MasterState::Approved => 2,
        MasterState::Implementing => 3,
        MasterState::Testing => 4,
        MasterState::Completing => 5,
        MasterState::Completed => 6,
        MasterState::PrCreated => 6,
        MasterState::Failed => 6,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orch_test_utils::FakeTracker;

    fn store() -> (StateStore, Arc<FakeTracker>) {
        let tracker = Arc::new(FakeTracker::default());
        let store = StateStore::new(tracker.clone(), LabelScheme::new("orch/"), RetryConfig::default());
        (store, tracker)
    }

    #[tokio::test]
    async fn unset_ticket_has_no_master_state() {
        let (store, tracker) = store();
        tracker.seed(1, "t", "b", &[]);
        assert_eq!(store.current_master_state(1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn transition_swaps_state_labels() {
        let (store, tracker) = store();
        tracker.seed(1, "t", "b", &["orch/planning"]);

        store
            .transition_master(1, MasterState::AwaitingApproval)
            .await
            .unwrap();

        let state = store.current_master_state(1).await.unwrap();
        assert_eq!(state, Some(MasterState::AwaitingApproval));

        let ticket = tracker.get_ticket(1).await.unwrap();
        assert!(!ticket.has_label("orch/planning"));
    }

    #[tokio::test]
    async fn repair_keeps_most_advanced_state() {
        let (store, tracker) = store();
        tracker.seed(1, "t", "b", &["orch/planning", "orch/testing"]);

        store.repair_master_state(1).await.unwrap();

        assert_eq!(
            store.current_master_state(1).await.unwrap(),
            Some(MasterState::Testing)
        );
    }

    #[tokio::test]
    async fn sub_state_transitions_independently_of_master_state() {
        let (store, tracker) = store();
        tracker.seed(1, "t", "b", &["orch/planning"]);

        store.transition_sub(1, SubState::InProgress).await.unwrap();
        assert_eq!(
            store.current_sub_state(1).await.unwrap(),
            Some(SubState::InProgress)
        );
        assert_eq!(
            store.current_master_state(1).await.unwrap(),
            Some(MasterState::Planning)
        );
    }
}
