//! The `Tracker` trait -- the capability interface for the external issue
//! tracker.
//!
//! Object-safe the same way `orch_ai::AgentService` is: every method
//! returns a concrete or boxed type so implementations can be stored as
//! `Arc<dyn Tracker>` and shared across the orchestrator, status
//! reporter, and source poller.

use async_trait::async_trait;

use crate::error::TrackerError;
use crate::types::{ChangeStats, Comment, NewPullRequest, NewTicket, PullRequestRef, Ticket, TicketId};

/// Capability interface for the issue tracker and the version-control
/// remote it is paired with.
#[async_trait]
pub trait Tracker: Send + Sync {
    /// Fetch a ticket by id.
    async fn get_ticket(&self, id: TicketId) -> Result<Ticket, TrackerError>;

    /// Replace a ticket's body verbatim.
    async fn set_body(&self, id: TicketId, body: &str) -> Result<(), TrackerError>;

    /// Add a label to a ticket (idempotent).
    async fn add_label(&self, id: TicketId, label: &str) -> Result<(), TrackerError>;

    /// Remove a label from a ticket (idempotent; no error if absent).
    async fn remove_label(&self, id: TicketId, label: &str) -> Result<(), TrackerError>;

    /// Post a comment on a ticket.
    async fn add_comment(&self, id: TicketId, body: &str) -> Result<(), TrackerError>;

    /// Fetch comments on a ticket, oldest first.
    async fn list_comments(&self, id: TicketId) -> Result<Vec<Comment>, TrackerError>;

    /// Create a new ticket (used for sub-tickets and fix-attempts).
    async fn create_ticket(&self, new: NewTicket) -> Result<TicketId, TrackerError>;

    /// Close a ticket, leaving its labels untouched.
    async fn close_ticket(&self, id: TicketId) -> Result<(), TrackerError>;

    /// List open ticket ids carrying the given label.
    async fn list_open_with_label(&self, label: &str) -> Result<Vec<TicketId>, TrackerError>;

    /// Open a pull/merge request.
    async fn open_pull_request(&self, pr: NewPullRequest) -> Result<PullRequestRef, TrackerError>;

    /// Compute commit/changed-file stats between `head` and `base`.
    async fn change_stats(&self, base: &str, head: &str) -> Result<ChangeStats, TrackerError>;

    /// Last `n` commits on `branch`, newest first.
    async fn recent_commits(
        &self,
        branch: &str,
        n: usize,
    ) -> Result<Vec<crate::types::CommitSummary>, TrackerError>;
}

// Compile-time assertion: Tracker must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Tracker) {}
};
