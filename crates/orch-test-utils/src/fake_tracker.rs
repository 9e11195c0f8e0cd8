//! In-memory [`Tracker`] fake.
//!
//! Plays the role a disposable test database plays for integration
//! suites that need a real-but-throwaway backend, except the system of
//! record here is labels on an in-memory ticket map rather than rows in
//! a table.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use orch_tracker::{
    ChangeStats, Comment, CommitSummary, NewPullRequest, NewTicket, PullRequestRef, Ticket,
    TicketId, Tracker, TrackerError,
};

#[derive(Debug, Clone)]
struct StoredTicket {
    ticket: Ticket,
    comments: Vec<Comment>,
}

/// An in-memory tracker used by unit and integration tests.
pub struct FakeTracker {
    tickets: Mutex<std::collections::BTreeMap<TicketId, StoredTicket>>,
    next_id: AtomicU64,
    next_comment_id: AtomicU64,
    pull_requests: Mutex<Vec<NewPullRequest>>,
    /// Canned commit history returned by `recent_commits`/`change_stats`,
    /// keyed by branch name.
    commits_by_branch: Mutex<std::collections::HashMap<String, Vec<CommitSummary>>>,
}

impl Default for FakeTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeTracker {
    pub fn new() -> Self {
        Self {
            tickets: Mutex::new(std::collections::BTreeMap::new()),
            next_id: AtomicU64::new(1),
            next_comment_id: AtomicU64::new(1),
            pull_requests: Mutex::new(Vec::new()),
            commits_by_branch: Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Seed a ticket with a fixed id (for deterministic master-ticket tests).
    pub fn seed(&self, id: TicketId, title: &str, body: &str, labels: &[&str]) {
        self.tickets.lock().insert(
            id,
            StoredTicket {
                ticket: Ticket {
                    id,
                    title: title.to_string(),
                    body: body.to_string(),
                    labels: labels.iter().map(|s| s.to_string()).collect(),
                    open: true,
                },
                comments: Vec::new(),
            },
        );
        let next = self.next_id.load(Ordering::SeqCst).max(id + 1);
        self.next_id.store(next, Ordering::SeqCst);
    }

    pub fn set_commits(&self, branch: &str, commits: Vec<CommitSummary>) {
        self.commits_by_branch
            .lock()
            .insert(branch.to_string(), commits);
    }

    pub fn opened_pull_requests(&self) -> Vec<NewPullRequest> {
        self.pull_requests.lock().clone()
    }

    fn get_mut<'a>(
        tickets: &'a mut std::collections::BTreeMap<TicketId, StoredTicket>,
        id: TicketId,
    ) -> Result<&'a mut StoredTicket, TrackerError> {
        tickets.get_mut(&id).ok_or(TrackerError::NotFound(id))
    }
}

#[async_trait]
impl Tracker for FakeTracker {
    async fn get_ticket(&self, id: TicketId) -> Result<Ticket, TrackerError> {
        self.tickets
            .lock()
            .get(&id)
            .map(|t| t.ticket.clone())
            .ok_or(TrackerError::NotFound(id))
    }

    async fn set_body(&self, id: TicketId, body: &str) -> Result<(), TrackerError> {
        let mut tickets = self.tickets.lock();
        let t = Self::get_mut(&mut tickets, id)?;
        t.ticket.body = body.to_string();
        Ok(())
    }

    async fn add_label(&self, id: TicketId, label: &str) -> Result<(), TrackerError> {
        let mut tickets = self.tickets.lock();
        let t = Self::get_mut(&mut tickets, id)?;
        t.ticket.labels.insert(label.to_string());
        Ok(())
    }

    async fn remove_label(&self, id: TicketId, label: &str) -> Result<(), TrackerError> {
        let mut tickets = self.tickets.lock();
        let t = Self::get_mut(&mut tickets, id)?;
        t.ticket.labels.remove(label);
        Ok(())
    }

    async fn add_comment(&self, id: TicketId, body: &str) -> Result<(), TrackerError> {
        let mut tickets = self.tickets.lock();
        let t = Self::get_mut(&mut tickets, id)?;
        let comment_id = self.next_comment_id.fetch_add(1, Ordering::SeqCst);
        t.comments.push(Comment {
            id: comment_id,
            body: body.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn list_comments(&self, id: TicketId) -> Result<Vec<Comment>, TrackerError> {
        let tickets = self.tickets.lock();
        let t = tickets.get(&id).ok_or(TrackerError::NotFound(id))?;
        Ok(t.comments.clone())
    }

    async fn create_ticket(&self, new: NewTicket) -> Result<TicketId, TrackerError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.tickets.lock().insert(
            id,
            StoredTicket {
                ticket: Ticket {
                    id,
                    title: new.title,
                    body: new.body,
                    labels: new.labels.into_iter().collect::<BTreeSet<_>>(),
                    open: true,
                },
                comments: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn close_ticket(&self, id: TicketId) -> Result<(), TrackerError> {
        let mut tickets = self.tickets.lock();
        let t = Self::get_mut(&mut tickets, id)?;
        t.ticket.open = false;
        Ok(())
    }

    async fn list_open_with_label(&self, label: &str) -> Result<Vec<TicketId>, TrackerError> {
        Ok(self
            .tickets
            .lock()
            .values()
            .filter(|t| t.ticket.open && t.ticket.has_label(label))
            .map(|t| t.ticket.id)
            .collect())
    }

    async fn open_pull_request(&self, pr: NewPullRequest) -> Result<PullRequestRef, TrackerError> {
        let number = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.pull_requests.lock().push(pr);
        Ok(PullRequestRef {
            number,
            url: format!("https://example.invalid/pull/{number}"),
        })
    }

    async fn change_stats(&self, _base: &str, head: &str) -> Result<ChangeStats, TrackerError> {
        let commits = self
            .commits_by_branch
            .lock()
            .get(head)
            .cloned()
            .unwrap_or_default();
        Ok(ChangeStats {
            commits,
            changed_files: vec![],
        })
    }

    async fn recent_commits(
        &self,
        branch: &str,
        n: usize,
    ) -> Result<Vec<CommitSummary>, TrackerError> {
        Ok(self
            .commits_by_branch
            .lock()
            .get(branch)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .take(n)
            .collect())
    }
}
