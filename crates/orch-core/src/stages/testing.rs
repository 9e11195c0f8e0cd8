//! Testing Stage + Self-Heal Loop.

use std::collections::HashMap;

use futures::stream::{self, StreamExt};
use orch_tracker::{NewTicket, TrackerError, TicketId};
use regex::Regex;
use thiserror::Error;
use tracing::info;

use crate::agents::AgentRole;
use crate::context::OrchestratorContext;
use crate::depgraph::{resolve_batches, DependencyError, TaskDeps};
use crate::events::OrchestrationEvent;
use crate::executor::ExecuteOptions;
use crate::labels::{Role, SubState};
use crate::plan::{TaskId, TestTask};
use crate::poller::poll_for_completion;

const MAX_FIX_ATTEMPTS: u32 = 10;
const MAX_STACK_FRAMES: usize = 10;
const RECENT_COMMIT_COUNT: usize = 5;

#[derive(Debug, Error)]
pub enum TestingError {
    #[error(transparent)]
    Dependency(#[from] DependencyError<String>),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error(transparent)]
    Worktree(#[from] crate::worktree::WorktreeError),
    #[error("fixing test sub-ticket {sub_ticket} broke dependent test {dependent}")]
    DependentRegression { sub_ticket: TicketId, dependent: TicketId },
    #[error("one or more tests reached max-attempts-reached")]
    MaxAttemptsReached,
}

#[derive(Debug, Clone)]
pub struct TestDetail {
    pub task_id: TaskId,
    pub sub_ticket: TicketId,
    pub passed: bool,
    pub fix_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct TestSummary {
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
    pub pass_rate: f64,
    pub details: Vec<TestDetail>,
}

/// Failure details parsed out of a test ticket's last comment.
#[derive(Debug, Clone, Default)]
struct FailureContext {
    message: String,
    stack_frames: Vec<String>,
    logs: Vec<String>,
}

fn parse_failure_context(comment: &str) -> FailureContext {
    let mut message = None;
    for prefix in ["Error", "AssertionError", "FAILED", "Exception"] {
        let pattern = format!(r"(?m)^{prefix}:\s*(.+)$");
        if let Some(caps) = Regex::new(&pattern).unwrap().captures(comment) {
            message = Some(format!("{prefix}: {}", caps[1].trim()));
            break;
        }
    }

    let frame_re = Regex::new(r"at\s+\S+:\d+:\d+").unwrap();
    let stack_frames = frame_re
        .find_iter(comment)
        .take(MAX_STACK_FRAMES)
        .map(|m| m.as_str().to_string())
        .collect();

    let block_re = Regex::new(r"(?s)```[^\n]*\n(.*?)```").unwrap();
    let logs = block_re
        .captures_iter(comment)
        .map(|c| c[1].trim().to_string())
        .collect();

    FailureContext {
        message: message.unwrap_or_else(|| "no structured failure found in last comment".to_string()),
        stack_frames,
        logs,
    }
}

/// Phase A: execute every test task, capped at `settings.max_concurrency`
/// concurrent agents, batch by batch.
pub async fn run_testing(
    ctx: &OrchestratorContext,
    master_id: TicketId,
    tasks: &[TestTask],
) -> Result<TestSummary, TestingError> {
    let deps: Vec<TaskDeps<String>> = tasks
        .iter()
        .map(|t| TaskDeps { id: t.id.clone(), depends_on: t.depends_on.clone() })
        .collect();
    let batches = resolve_batches(&deps)?;
    let cap = ctx.settings.max_concurrency.max(1);

    for batch in &batches {
        let batch_tasks: Vec<&TestTask> =
            batch.iter().map(|id| tasks.iter().find(|t| &t.id == id).expect("known id")).collect();

        stream::iter(batch_tasks.into_iter().map(|t| run_test_task(ctx, master_id, t)))
            .buffer_unordered(cap)
            .collect::<Vec<_>>()
            .await;
    }

    // Phase B: identify.
    let mut needs_heal = Vec::new();
    for task in tasks {
        if let Some(sub_ticket) = task.sub_ticket {
            let ticket = ctx.tracker.get_ticket(sub_ticket).await?;
            if ticket.has_label(&ctx.labels.sub_state(SubState::Failed))
                || ticket.has_label(&ctx.labels.sub_state(SubState::TestFailed))
            {
                needs_heal.push(task.clone());
            }
        }
    }

    // Phase C: self-heal, sequential across failed tests.
    let mut fix_attempts: HashMap<TaskId, u32> = HashMap::new();
    for task in &needs_heal {
        let attempts = self_heal(ctx, master_id, task, tasks).await?;
        fix_attempts.insert(task.id.clone(), attempts);
    }

    // Phase D: aggregate.
    let mut details = Vec::new();
    let mut passed = 0usize;
    let mut failed = 0usize;
    let mut any_exhausted = false;
    for task in tasks {
        let Some(sub_ticket) = task.sub_ticket else { continue };
        let ticket = ctx.tracker.get_ticket(sub_ticket).await?;
        let exhausted = ticket.has_label(&ctx.labels.sub_state(SubState::MaxAttemptsReached));
        let is_passing = !exhausted
            && !ticket.has_label(&ctx.labels.sub_state(SubState::TestFailed))
            && !ticket.has_label(&ctx.labels.sub_state(SubState::Failed));
        any_exhausted |= exhausted;
        if is_passing {
            passed += 1;
        } else {
            failed += 1;
        }
        details.push(TestDetail {
            task_id: task.id.clone(),
            sub_ticket,
            passed: is_passing,
            fix_attempts: fix_attempts.get(&task.id).copied().unwrap_or(0),
        });
    }
    let total = passed + failed;
    let pass_rate = if total == 0 { 1.0 } else { passed as f64 / total as f64 };
    let summary = TestSummary { passed, failed, total, pass_rate, details };

    if any_exhausted {
        return Err(TestingError::MaxAttemptsReached);
    }
    Ok(summary)
}

/// Run the test agent for a single test task's sub-ticket and report
/// pass/fail via sub-state labels; returns `true` on pass.
async fn run_test_task(ctx: &OrchestratorContext, master_id: TicketId, task: &TestTask) -> bool {
    let Some(sub_ticket) = task.sub_ticket else { return false };
    if ctx.state.transition_sub(sub_ticket, SubState::InProgress).await.is_err() {
        return false;
    }

    let config = ctx.roster.get(AgentRole::Validator).expect("validator role must be configured");
    let ticket = match ctx.tracker.get_ticket(sub_ticket).await {
        Ok(t) => t,
        Err(_) => {
            let _ = ctx.state.transition_sub(sub_ticket, SubState::TestFailed).await;
            return false;
        }
    };
    let worktree = match ctx.worktrees.get(master_id) {
        Ok(Some(w)) => w,
        _ => {
            let _ = ctx.state.transition_sub(sub_ticket, SubState::TestFailed).await;
            return false;
        }
    };

    let options = ExecuteOptions {
        agent_name: AgentRole::Validator.as_str().to_string(),
        default_model: config.model.clone(),
        working_dir: worktree.path.clone(),
        timeout: config.timeout,
        progress_sink: Some(sub_ticket),
    };

    let run_result = ctx.executor.execute(&ticket.body, &options).await;
    let passed = match run_result {
        Ok(_) => poll_for_completion(&ctx.tracker, &ctx.labels, sub_ticket, config.timeout).await.is_ok(),
        Err(_) => false,
    };

    if passed {
        let _ = ctx.state.transition_sub(sub_ticket, SubState::AgentComplete).await;
        ctx.events.dispatch(OrchestrationEvent::TaskCompleted { ticket_id: master_id, sub_ticket });
    } else {
        let _ = ctx.state.transition_sub(sub_ticket, SubState::TestFailed).await;
        ctx.events.dispatch(OrchestrationEvent::TestFailed { ticket_id: master_id, test_sub_ticket: sub_ticket });
    }
    passed
}

/// Phase C for a single failed test: up to `ctx.settings.max_fix_attempts`
/// fix attempts (defaults to [`MAX_FIX_ATTEMPTS`]), returning the number of
/// attempts actually used.
async fn self_heal(
    ctx: &OrchestratorContext,
    master_id: TicketId,
    task: &TestTask,
    all_tasks: &[TestTask],
) -> Result<u32, TestingError> {
    let test_sub_ticket = task.sub_ticket.expect("failed test task must have a sub-ticket");
    let max_attempts = ctx.settings.max_fix_attempts.min(MAX_FIX_ATTEMPTS);

    for attempt in 1..=max_attempts {
        let failure = last_failure_context(ctx, test_sub_ticket).await?;
        let worktree = ctx.worktrees.get(master_id)?;
        let branch = worktree.as_ref().map(|w| w.branch.as_str()).unwrap_or("");
        let commits = ctx.tracker.recent_commits(branch, RECENT_COMMIT_COUNT).await.unwrap_or_default();

        let fix_body = render_fix_body(task, &failure, &commits, attempt);
        let fix_title = format!("[Fix] {} (Attempt {attempt}/{max_attempts})", task.title);
        let fix_sub_ticket = ctx
            .tracker
            .create_ticket(NewTicket {
                title: fix_title,
                body: fix_body,
                labels: vec![
                    ctx.labels.sub_issue(),
                    ctx.labels.role(Role::FixAttempt),
                    ctx.labels.role(Role::Implementation),
                    ctx.labels.master_ref(master_id),
                    ctx.labels.test_ref(test_sub_ticket),
                    ctx.labels.attempt(attempt),
                ],
            })
            .await?;

        ctx.tracker
            .add_comment(
                test_sub_ticket,
                &format!("Opened fix attempt {attempt}/{max_attempts}: #{fix_sub_ticket}"),
            )
            .await?;
        ctx.events.dispatch(OrchestrationEvent::TestFixStarted {
            ticket_id: master_id,
            test_sub_ticket,
            fix_sub_ticket,
            attempt,
        });

        run_fix_implementation(ctx, master_id, fix_sub_ticket).await?;

        ctx.tracker.remove_label(test_sub_ticket, &ctx.labels.sub_state(SubState::Failed)).await?;
        ctx.tracker.remove_label(test_sub_ticket, &ctx.labels.sub_state(SubState::TestFailed)).await?;
        ctx.tracker.remove_label(test_sub_ticket, &ctx.labels.sub_state(SubState::AgentComplete)).await?;

        let passed = run_test_task(ctx, master_id, task).await;
        ctx.events.dispatch(OrchestrationEvent::TestFixCompleted {
            ticket_id: master_id,
            test_sub_ticket,
            fix_sub_ticket,
            attempt,
            passed,
        });

        if passed {
            ctx.tracker
                .add_comment(test_sub_ticket, &format!("Passed after fix attempt {attempt}/{max_attempts}."))
                .await?;
            ctx.tracker.close_ticket(fix_sub_ticket).await?;
            ctx.events.dispatch(OrchestrationEvent::TestPassedAfterFix {
                ticket_id: master_id,
                test_sub_ticket,
                attempt,
            });
            info!(test_sub_ticket, attempt, "test passed after self-heal");

            for dependent in all_tasks.iter().filter(|t| t.depends_on.contains(&task.id)) {
                if !run_test_task(ctx, master_id, dependent).await {
                    return Err(TestingError::DependentRegression {
                        sub_ticket: test_sub_ticket,
                        dependent: dependent.sub_ticket.unwrap_or(0),
                    });
                }
            }

            return Ok(attempt);
        }
    }

    ctx.state.transition_sub(test_sub_ticket, SubState::MaxAttemptsReached).await?;
    ctx.tracker
        .add_comment(test_sub_ticket, &format!("Exhausted {max_attempts} fix attempts."))
        .await?;
    ctx.events.dispatch(OrchestrationEvent::TestMaxAttemptsReached { ticket_id: master_id, test_sub_ticket });

    Ok(max_attempts)
}

async fn last_failure_context(
    ctx: &OrchestratorContext,
    test_sub_ticket: TicketId,
) -> Result<FailureContext, TrackerError> {
    let comments = ctx.tracker.list_comments(test_sub_ticket).await?;
    Ok(match comments.last() {
        Some(comment) => parse_failure_context(&comment.body),
        None => FailureContext::default(),
    })
}

async fn run_fix_implementation(
    ctx: &OrchestratorContext,
    master_id: TicketId,
    fix_sub_ticket: TicketId,
) -> Result<(), TestingError> {
    let config = ctx.roster.get(AgentRole::Craftsman).expect("craftsman role must be configured");
    let ticket = ctx.tracker.get_ticket(fix_sub_ticket).await?;
    let working_dir = ctx
        .worktrees
        .get(master_id)?
        .map(|w| w.path)
        .unwrap_or_else(|| ctx.worktrees.repo_path().to_path_buf());

    let options = ExecuteOptions {
        agent_name: AgentRole::Craftsman.as_str().to_string(),
        default_model: config.model.clone(),
        working_dir,
        timeout: config.timeout,
        progress_sink: Some(fix_sub_ticket),
    };

    if ctx.executor.execute(&ticket.body, &options).await.is_ok() {
        let _ = poll_for_completion(&ctx.tracker, &ctx.labels, fix_sub_ticket, config.timeout).await;
    }
    Ok(())
}

fn render_fix_body(
    task: &TestTask,
    failure: &FailureContext,
    commits: &[orch_tracker::CommitSummary],
    attempt: u32,
) -> String {
    let scenarios = task.test_scenarios.join("\n- ");
    let frames = failure.stack_frames.join("\n");
    let logs = failure.logs.join("\n---\n");
    let commit_lines: Vec<String> = commits
        .iter()
        .map(|c| format!("{} {} ({}, {})", c.short_hash, c.subject, c.author, c.date))
        .collect();

    format!(
        "Fix attempt {attempt} for test `{}`.\n\n\
         ## Test requirements\n- {scenarios}\n\n\
         ## Failure\n{}\n\n\
         ## Stack frames\n{frames}\n\n\
         ## Logs\n{logs}\n\n\
         ## Recent commits\n{}\n",
        task.id,
        failure.message,
        commit_lines.join("\n"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_first_matching_marker() {
        let comment = "ran suite\nAssertionError: expected 2 got 3\nat src/lib.rs:10:4\n";
        let ctx = parse_failure_context(comment);
        assert_eq!(ctx.message, "AssertionError: expected 2 got 3");
        assert_eq!(ctx.stack_frames, vec!["at src/lib.rs:10:4"]);
    }

    #[test]
    fn falls_back_to_generic_message_when_nothing_matches() {
        let ctx = parse_failure_context("nothing useful here");
        assert_eq!(ctx.message, "no structured failure found in last comment");
        assert!(ctx.stack_frames.is_empty());
    }

    #[test]
    fn collects_fenced_code_blocks_as_logs() {
        let comment = "Error: boom\n```\nstdout line 1\nstdout line 2\n```\n";
        let ctx = parse_failure_context(comment);
        assert_eq!(ctx.logs, vec!["stdout line 1\nstdout line 2"]);
    }

    #[test]
    fn caps_stack_frames_at_ten() {
        let mut comment = String::from("Error: boom\n");
        for i in 0..15 {
            comment.push_str(&format!("at file.rs:{i}:1\n"));
        }
        let ctx = parse_failure_context(&comment);
        assert_eq!(ctx.stack_frames.len(), MAX_STACK_FRAMES);
    }
}
