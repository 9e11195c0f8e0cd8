//! GitHub implementation of [`Tracker`], backed by `octocrab`.

use std::collections::BTreeSet;

use async_trait::async_trait;
use octocrab::Octocrab;
use octocrab::models::IssueState;
use octocrab::params::State as ParamState;

use crate::error::TrackerError;
use crate::trait_def::Tracker;
use crate::types::{
    ChangeStats, Comment, CommitSummary, NewPullRequest, NewTicket, PullRequestRef, Ticket,
    TicketId,
};

/// Tracker backed by the GitHub REST API via `octocrab`.
pub struct GitHubTracker {
    client: Octocrab,
    owner: String,
    repo: String,
}

impl GitHubTracker {
    /// Build a client from a personal access token.
    pub fn new(token: impl Into<String>, owner: impl Into<String>, repo: impl Into<String>) -> anyhow::Result<Self> {
        let client = Octocrab::builder().personal_token(token.into()).build()?;
        Ok(Self {
            client,
            owner: owner.into(),
            repo: repo.into(),
        })
    }

    fn classify(err: octocrab::Error) -> TrackerError {
        match &err {
            octocrab::Error::GitHub { source, .. } => {
                let status = source.status_code.as_u16();
                let msg = source.message.clone();
                match status {
                    401 | 403 if msg.to_lowercase().contains("rate limit") => {
                        TrackerError::RateLimited(msg)
                    }
                    401 => TrackerError::AuthFailed(msg),
                    403 => TrackerError::PermissionDenied(msg),
                    404 => TrackerError::NotFound(0),
                    429 => TrackerError::RateLimited(msg),
                    _ => TrackerError::Transient(msg),
                }
            }
            other => TrackerError::Transient(other.to_string()),
        }
    }
}

#[async_trait]
impl Tracker for GitHubTracker {
    async fn get_ticket(&self, id: TicketId) -> Result<Ticket, TrackerError> {
        let issue = self
            .client
            .issues(&self.owner, &self.repo)
            .get(id)
            .await
            .map_err(Self::classify)?;

        let labels: BTreeSet<String> = issue.labels.into_iter().map(|l| l.name).collect();

        Ok(Ticket {
            id,
            title: issue.title,
            body: issue.body.unwrap_or_default(),
            labels,
            open: matches!(issue.state, IssueState::Open),
        })
    }

    async fn set_body(&self, id: TicketId, body: &str) -> Result<(), TrackerError> {
        self.client
            .issues(&self.owner, &self.repo)
            .update(id)
            .body(body)
            .send()
            .await
            .map_err(Self::classify)?;
        Ok(())
    }

    async fn add_label(&self, id: TicketId, label: &str) -> Result<(), TrackerError> {
        self.client
            .issues(&self.owner, &self.repo)
            .add_labels(id, &[label.to_string()])
            .await
            .map_err(Self::classify)?;
        Ok(())
    }

    async fn remove_label(&self, id: TicketId, label: &str) -> Result<(), TrackerError> {
        match self
            .client
            .issues(&self.owner, &self.repo)
            .remove_label(id, label)
            .await
        {
            Ok(_) => Ok(()),
            // Removing an absent label is a no-op.
            Err(octocrab::Error::GitHub { source, .. }) if source.status_code.as_u16() == 404 => {
                Ok(())
            }
            Err(e) => Err(Self::classify(e)),
        }
    }

    async fn add_comment(&self, id: TicketId, body: &str) -> Result<(), TrackerError> {
        self.client
            .issues(&self.owner, &self.repo)
            .create_comment(id, body)
            .await
            .map_err(Self::classify)?;
        Ok(())
    }

    async fn list_comments(&self, id: TicketId) -> Result<Vec<Comment>, TrackerError> {
        let page = self
            .client
            .issues(&self.owner, &self.repo)
            .list_comments(id)
            .send()
            .await
            .map_err(Self::classify)?;

        Ok(page
            .items
            .into_iter()
            .map(|c| Comment {
                id: c.id.0,
                body: c.body.unwrap_or_default(),
                created_at: c.created_at,
            })
            .collect())
    }

    async fn create_ticket(&self, new: NewTicket) -> Result<TicketId, TrackerError> {
        let issue = self
            .client
            .issues(&self.owner, &self.repo)
            .create(&new.title)
            .body(&new.body)
            .labels(new.labels)
            .send()
            .await
            .map_err(Self::classify)?;
        Ok(issue.number)
    }

    async fn close_ticket(&self, id: TicketId) -> Result<(), TrackerError> {
        self.client
            .issues(&self.owner, &self.repo)
            .update(id)
            .state(IssueState::Closed)
            .send()
            .await
            .map_err(Self::classify)?;
        Ok(())
    }

    async fn list_open_with_label(&self, label: &str) -> Result<Vec<TicketId>, TrackerError> {
        let page = self
            .client
            .issues(&self.owner, &self.repo)
            .list()
            .state(ParamState::Open)
            .labels(&[label.to_string()])
            .send()
            .await
            .map_err(Self::classify)?;

        Ok(page.items.into_iter().map(|i| i.number).collect())
    }

    async fn open_pull_request(&self, pr: NewPullRequest) -> Result<PullRequestRef, TrackerError> {
        let created = self
            .client
            .pulls(&self.owner, &self.repo)
            .create(&pr.title, &pr.head, &pr.base)
            .body(&pr.body)
            .send()
            .await
            .map_err(Self::classify)?;

        if !pr.labels.is_empty() {
            self.client
                .issues(&self.owner, &self.repo)
                .add_labels(created.number, &pr.labels)
                .await
                .map_err(Self::classify)?;
        }

        Ok(PullRequestRef {
            number: created.number,
            url: created
                .html_url
                .map(|u| u.to_string())
                .unwrap_or_default(),
        })
    }

    async fn change_stats(&self, base: &str, head: &str) -> Result<ChangeStats, TrackerError> {
        let basehead = format!("{base}...{head}");
        let comparison = self
            .client
            .commits(&self.owner, &self.repo)
            .compare(basehead)
            .send()
            .await
            .map_err(Self::classify)?;

        let commits = comparison
            .commits
            .iter()
            .map(|c| CommitSummary {
                short_hash: c.sha.chars().take(7).collect(),
                subject: c
                    .commit
                    .message
                    .lines()
                    .next()
                    .unwrap_or_default()
                    .to_string(),
                author: c
                    .commit
                    .author
                    .as_ref()
                    .and_then(|a| a.name.clone())
                    .unwrap_or_default(),
                date: c
                    .commit
                    .author
                    .as_ref()
                    .and_then(|a| a.date)
                    .unwrap_or_default(),
            })
            .collect();

        let changed_files = comparison
            .files
            .unwrap_or_default()
            .into_iter()
            .map(|f| f.filename)
            .collect();

        Ok(ChangeStats {
            commits,
            changed_files,
        })
    }

    async fn recent_commits(
        &self,
        branch: &str,
        n: usize,
    ) -> Result<Vec<CommitSummary>, TrackerError> {
        let page = self
            .client
            .repos(&self.owner, &self.repo)
            .list_commits()
            .sha(branch)
            .per_page(n as u8)
            .send()
            .await
            .map_err(Self::classify)?;

        Ok(page
            .items
            .into_iter()
            .take(n)
            .map(|c| CommitSummary {
                short_hash: c.sha.chars().take(7).collect(),
                subject: c
                    .commit
                    .message
                    .lines()
                    .next()
                    .unwrap_or_default()
                    .to_string(),
                author: c
                    .commit
                    .author
                    .as_ref()
                    .and_then(|a| a.name.clone())
                    .unwrap_or_default(),
                date: c
                    .commit
                    .author
                    .as_ref()
                    .and_then(|a| a.date)
                    .unwrap_or_default(),
            })
            .collect())
    }
}
