//! Implementation Stage: dependency-batched, all-or-wait
//! parallel execution of the plan's implementation tasks.

use orch_tracker::TicketId;
use thiserror::Error;
use tracing::{error, info};

use crate::agents::AgentRole;
use crate::context::OrchestratorContext;
use crate::depgraph::{resolve_batches, DependencyError, TaskDeps};
use crate::events::OrchestrationEvent;
use crate::executor::{ExecuteOptions, ExecutorError};
use crate::labels::SubState;
use crate::plan::ImplementationTask;
use crate::poller::{poll_for_completion, PollError};

#[derive(Debug, Error)]
pub enum ImplementationError {
    #[error(transparent)]
    Dependency(#[from] DependencyError<String>),
    #[error("batch {0} had at least one failed task")]
    BatchFailed(usize),
}

/// Run every implementation task to completion, batch by batch; a batch
/// that contains any failure stops further batches.
pub async fn run_implementation(
    ctx: &OrchestratorContext,
    master_id: TicketId,
    tasks: &[ImplementationTask],
) -> Result<(), ImplementationError> {
    let deps: Vec<TaskDeps<String>> = tasks
        .iter()
        .map(|t| TaskDeps { id: t.id.clone(), depends_on: t.depends_on.clone() })
        .collect();
    let batches = resolve_batches(&deps)?;

    for (batch_index, batch) in batches.iter().enumerate() {
        let mut handles = Vec::new();
        for task_id in batch {
            let task = tasks.iter().find(|t| &t.id == task_id).expect("batch id must be a known task");
            handles.push(run_single_task(ctx, master_id, task));
        }
        let results = futures::future::join_all(handles).await;
        if results.iter().any(|r| r.is_err()) {
            error!(batch = batch_index, "implementation batch had failures, stopping");
            return Err(ImplementationError::BatchFailed(batch_index));
        }
    }

    Ok(())
}

async fn run_single_task(
    ctx: &OrchestratorContext,
    master_id: TicketId,
    task: &ImplementationTask,
) -> Result<(), ()> {
    let Some(sub_ticket) = task.sub_ticket else {
        error!(task = %task.id, "implementation task has no pinned sub-ticket");
        return Err(());
    };

    if let Err(err) = ctx.state.transition_sub(sub_ticket, SubState::InProgress).await {
        error!(error = %err, sub_ticket, "failed to mark task in-progress");
        return Err(());
    }

    let config = ctx
        .roster
        .get(AgentRole::Craftsman)
        .expect("craftsman role must be configured");

    let ticket = match ctx.tracker.get_ticket(sub_ticket).await {
        Ok(t) => t,
        Err(err) => {
            error!(error = %err, sub_ticket, "failed to fetch sub-ticket body");
            return Err(());
        }
    };

    let worktree = match ctx.worktrees.get(master_id) {
        Ok(Some(record)) => record,
        _ => {
            error!(sub_ticket, "no worktree registered for master ticket");
            return Err(());
        }
    };

    let options = ExecuteOptions {
        agent_name: AgentRole::Craftsman.as_str().to_string(),
        default_model: config.model.clone(),
        working_dir: worktree.path.clone(),
        timeout: config.timeout,
        progress_sink: Some(sub_ticket),
    };

    let outcome = ctx.executor.execute(&ticket.body, &options).await;
    match outcome {
        Ok(_) => match poll_for_completion(&ctx.tracker, &ctx.labels, sub_ticket, config.timeout).await {
            Ok(()) => {
                ctx.events.dispatch(OrchestrationEvent::TaskCompleted { ticket_id: master_id, sub_ticket });
                info!(sub_ticket, "implementation task completed");
                Ok(())
            }
            Err(PollError::PollTimeout(_)) => {
                mark_failed(ctx, master_id, sub_ticket, "task poll timed out", false).await;
                Err(())
            }
            Err(PollError::Tracker(e)) => {
                mark_failed(ctx, master_id, sub_ticket, &e.to_string(), false).await;
                Err(())
            }
        },
        Err(ExecutorError::ServerUnreachable(msg)) => {
            mark_failed(ctx, master_id, sub_ticket, &msg, true).await;
            Err(())
        }
        Err(err) => {
            mark_failed(ctx, master_id, sub_ticket, &err.to_string(), false).await;
            Err(())
        }
    }
}

async fn mark_failed(
    ctx: &OrchestratorContext,
    master_id: TicketId,
    sub_ticket: TicketId,
    message: &str,
    server_unreachable: bool,
) {
    let _ = ctx.state.transition_sub(sub_ticket, SubState::Failed).await;
    if server_unreachable {
        ctx.events.dispatch(OrchestrationEvent::CriticalError {
            ticket_id: master_id,
            message: message.to_string(),
            log_path: ctx.executor.current_log_path(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ImplementationTask;

    #[test]
    fn batches_carry_through_dependency_order() {
        let tasks = vec![
            ImplementationTask {
                id: "a".into(),
                title: "a".into(),
                description: "d".into(),
                acceptance_criteria: vec![],
                depends_on: vec![],
                complexity: None,
                sub_ticket: Some(1),
            },
            ImplementationTask {
                id: "b".into(),
                title: "b".into(),
                description: "d".into(),
                acceptance_criteria: vec![],
                depends_on: vec!["a".into()],
                complexity: None,
                sub_ticket: Some(2),
            },
        ];
        let deps: Vec<TaskDeps<String>> = tasks
            .iter()
            .map(|t| TaskDeps { id: t.id.clone(), depends_on: t.depends_on.clone() })
            .collect();
        let batches = resolve_batches(&deps).unwrap();
        assert_eq!(batches, vec![vec!["a".to_string()], vec!["b".to_string()]]);
    }
}
