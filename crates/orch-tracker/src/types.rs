//! Wire types shared by every `Tracker` implementation.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier for a ticket (issue or pull request) in the tracker.
pub type TicketId = u64;

/// A ticket as seen by the orchestrator: identifier, body, and label set.
///
/// Mirrors the Ticket entry of the data model: the orchestration
/// state for a ticket is read back out of `labels` by the state store
/// rather than stored as a separate field here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub title: String,
    pub body: String,
    pub labels: BTreeSet<String>,
    pub open: bool,
}

impl Ticket {
    pub fn has_label(&self, label: &str) -> bool {
        self.labels.contains(label)
    }
}

/// A single comment on a ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: u64,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Parameters for creating a new ticket (used for sub-tickets).
#[derive(Debug, Clone)]
pub struct NewTicket {
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

/// A single commit summary, used by the self-heal loop's failure context
/// and the completion stage's PR body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSummary {
    pub short_hash: String,
    pub subject: String,
    pub author: String,
    pub date: DateTime<Utc>,
}

/// Stats computed against the base branch for the completion stage.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChangeStats {
    pub commits: Vec<CommitSummary>,
    pub changed_files: Vec<String>,
}

/// Parameters for opening a change request (pull request).
#[derive(Debug, Clone)]
pub struct NewPullRequest {
    pub title: String,
    pub body: String,
    pub base: String,
    pub head: String,
    pub labels: Vec<String>,
}

/// A created pull request's identity and URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRef {
    pub number: u64,
    pub url: String,
}
