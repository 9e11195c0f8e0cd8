//! `orch status` command: read-only introspection.
//!
//! With no issue number, summarizes the running service's queue over its
//! REST surface. With an issue number, reads the master ticket's state
//! directly from the tracker (no running service required) and exits with
//! the code the state's exit-code convention assigns to it.

use anyhow::Result;
use serde_json::Value;

use orch_core::config::Config;
use orch_core::labels::{LabelScheme, MasterState};
use orch_core::status::TrackerStatusProvider;
use orch_tracker::TicketId;

use crate::adapters::build_tracker;
use crate::api::ApiClient;

/// Exit codes for each terminal and in-progress state.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_AWAITING_APPROVAL: i32 = 2;
pub const EXIT_IN_PROGRESS: i32 = 3;

pub async fn run_overview(api: &ApiClient) -> Result<i32> {
    let health = api.health().await?;
    let status = health.get("status").and_then(Value::as_str).unwrap_or("unknown");
    println!("Service: {status}");

    let queue = api.queue_status().await?;
    let running = queue.get("running").and_then(Value::as_u64);
    match running {
        Some(id) => println!("Running: issue #{id}"),
        None => println!("Running: (idle)"),
    }
    let queued_count = queue.get("queued").and_then(Value::as_array).map(|a| a.len()).unwrap_or(0);
    println!("Queued: {queued_count} issue(s)");

    Ok(if status == "ok" { EXIT_SUCCESS } else { EXIT_FAILURE })
}

pub async fn run_issue(config: &Config, issue_number: TicketId) -> Result<i32> {
    let tracker = build_tracker(config)?;
    let labels = LabelScheme::new(config.tracker.label_prefix.clone());

    let ticket = tracker.get_ticket(issue_number).await?;
    let state = MasterState::ALL.into_iter().find(|s| ticket.has_label(&labels.state(*s)));

    println!("Issue #{issue_number}: {}", ticket.title);
    match state {
        Some(s) => println!("State: {s}"),
        None => println!("State: (not yet picked up)"),
    }

    let provider = TrackerStatusProvider::new(tracker, labels);
    let rows = provider.snapshot(issue_number).await?;
    if rows.is_empty() {
        println!("No sub-tickets yet.");
    } else {
        println!("Sub-tickets:");
        for row in rows {
            let fix = match row.fix_attempts {
                Some((k, max)) => format!(" (fix attempt {k}/{max})"),
                None => String::new(),
            };
            println!("  {} #{} {}{}", row.status_emoji, row.sub_ticket, row.title, fix);
        }
    }

    Ok(match state {
        Some(MasterState::Completed) | Some(MasterState::PrCreated) => EXIT_SUCCESS,
        Some(MasterState::Failed) | Some(MasterState::Rejected) => EXIT_FAILURE,
        Some(MasterState::AwaitingApproval) => EXIT_AWAITING_APPROVAL,
        _ => EXIT_IN_PROGRESS,
    })
}
