//! Issue-tracker capability interface.
//!
//! `Tracker` is the trait the rest of the system depends on; `GitHubTracker`
//! is the only concrete implementation shipped here. Keeping the trait in
//! its own crate (rather than behind a feature flag in `orch-core`) keeps
//! pure domain logic separate from the concrete backend it talks to.

pub mod error;
pub mod github;
pub mod trait_def;
pub mod types;

pub use error::TrackerError;
pub use github::GitHubTracker;
pub use trait_def::Tracker;
pub use types::{
    ChangeStats, Comment, CommitSummary, NewPullRequest, NewTicket, PullRequestRef, Ticket,
    TicketId,
};
