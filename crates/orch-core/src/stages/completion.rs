//! Completion Stage: push the branch, open a pull request,
//! and close out the orchestration record on the master ticket.

use orch_tracker::{NewPullRequest, TrackerError, TicketId};
use std::process::Command;
use thiserror::Error;
use tracing::info;

use crate::body::StatusRow;
use crate::context::OrchestratorContext;
use crate::events::OrchestrationEvent;
use crate::labels::{MasterState, SERVICE_ORCHESTRATED};
use crate::plan::Plan;
use crate::worktree::WorktreeError;

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("no worktree registered for master ticket {0}")]
    MissingWorktree(TicketId),
    #[error("git push failed: {0}")]
    Push(String),
    #[error(transparent)]
    Worktree(#[from] WorktreeError),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

/// Run the completion stage, returning the pull request that was opened.
pub async fn run_completion(
    ctx: &OrchestratorContext,
    master_id: TicketId,
    plan: &Plan,
    test_summary: &crate::stages::testing::TestSummary,
) -> Result<orch_tracker::PullRequestRef, CompletionError> {
    let record = ctx
        .worktrees
        .get(master_id)?
        .ok_or(CompletionError::MissingWorktree(master_id))?;

    push_branch(&record.path, &record.branch)?;

    let stats = ctx.tracker.change_stats(&ctx.settings.base_branch, &record.branch).await?;

    let impl_total = plan.implementation_tasks.len();
    let title = format!("[orch] Issue #{master_id}");
    let mut body = render_pr_body(plan, test_summary, impl_total, &stats);
    if !body.contains(&format!("Closes #{master_id}")) {
        body.push_str(&format!("\n\nCloses #{master_id}\n"));
    }

    let pr = ctx
        .tracker
        .open_pull_request(NewPullRequest {
            title,
            body,
            base: ctx.settings.base_branch.clone(),
            head: record.branch.clone(),
            labels: vec![SERVICE_ORCHESTRATED.to_string()],
        })
        .await?;

    ctx.tracker
        .add_comment(master_id, &format!("Opened pull request: {}", pr.url))
        .await?;
    ctx.tracker.add_label(master_id, &ctx.labels.state(MasterState::PrCreated)).await?;

    ctx.events.dispatch(OrchestrationEvent::OrchestrationComplete {
        ticket_id: master_id,
        pull_request_url: pr.url.clone(),
    });

    let final_rows = status_rows_from_summary(test_summary);
    ctx.status.write_rows(master_id, &final_rows).await?;
    ctx.status.stop(master_id);
    info!(master_id, pr = %pr.url, "completion stage finished");

    Ok(pr)
}

/// Build the status rows the completion stage feeds into the final status
/// table write, pass-through from the testing stage's per-test detail.
pub fn status_rows_from_summary(test_summary: &crate::stages::testing::TestSummary) -> Vec<StatusRow> {
    test_summary
        .details
        .iter()
        .map(|d| StatusRow {
            sub_ticket: d.sub_ticket,
            title: d.task_id.clone(),
            status_emoji: if d.passed { "✅" } else { "❌" },
            agent_message: None,
            tools_used: 0,
            retry_count: 0,
            last_retry_age: None,
            fix_attempts: if d.fix_attempts > 0 { Some((d.fix_attempts, 10)) } else { None },
        })
        .collect()
}

fn render_pr_body(
    plan: &Plan,
    test_summary: &crate::stages::testing::TestSummary,
    impl_total: usize,
    stats: &orch_tracker::ChangeStats,
) -> String {
    let files = stats.changed_files.join("\n- ");
    format!(
        "## Specification\n{}\n\n\
         ## Tallies\nImplementation tasks: {impl_total}\nTests: {}/{} passed ({:.0}%)\n\n\
         ## Changed files\n- {files}\n\n\
         ## Commits\n{}\n",
        plan.specification.requirements,
        test_summary.passed,
        test_summary.total,
        test_summary.pass_rate * 100.0,
        stats
            .commits
            .iter()
            .map(|c| format!("{} {}", c.short_hash, c.subject))
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

/// Push `branch` to `origin`, retrying with `--force` if the remote
/// rejects a fast-forward.
fn push_branch(repo_path: &std::path::Path, branch: &str) -> Result<(), CompletionError> {
    let output = Command::new("git")
        .args(["push", "origin", branch])
        .current_dir(repo_path)
        .output()
        .map_err(|e| CompletionError::Push(e.to_string()))?;
    if output.status.success() {
        return Ok(());
    }

    let output = Command::new("git")
        .args(["push", "--force", "origin", branch])
        .current_dir(repo_path)
        .output()
        .map_err(|e| CompletionError::Push(e.to_string()))?;
    if output.status.success() {
        return Ok(());
    }

    Err(CompletionError::Push(String::from_utf8_lossy(&output.stderr).to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::testing::TestDetail;

    #[test]
    fn status_rows_carry_fix_attempts() {
        let summary = crate::stages::testing::TestSummary {
            passed: 1,
            failed: 0,
            total: 1,
            pass_rate: 1.0,
            details: vec![TestDetail {
                task_id: "test-1".into(),
                sub_ticket: 9,
                passed: true,
                fix_attempts: 2,
            }],
        };
        let rows = status_rows_from_summary(&summary);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].fix_attempts, Some((2, 10)));
        assert_eq!(rows[0].status_emoji, "✅");
    }
}
