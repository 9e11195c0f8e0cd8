//! Orchestrator: the stage sequencer. One `Orchestrator` is
//! bound to one [`OrchestratorContext`] and drives a single master ticket
//! from whatever master state it currently carries through to a terminal
//! state.

use orch_tracker::TicketId;
use thiserror::Error;
use tracing::{error, info};

use crate::context::OrchestratorContext;
use crate::events::OrchestrationEvent;
use crate::labels::{MasterState, Role};
use crate::plan::{ImplementationTask, Plan, Specification, TestTask};
use crate::stages::{approval, completion, implementation, planning, testing};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("ticket {0} is in a terminal state and cannot be resumed")]
    Terminal(TicketId),
    #[error(transparent)]
    Tracker(#[from] orch_tracker::TrackerError),
    #[error(transparent)]
    Planning(#[from] planning::PlanningError),
    #[error(transparent)]
    Implementation(#[from] implementation::ImplementationError),
    #[error(transparent)]
    Testing(#[from] testing::TestingError),
    #[error(transparent)]
    Completion(#[from] completion::CompletionError),
}

/// Drives one master ticket's orchestration, honoring the resume policy:
/// re-enter the stage matching the ticket's current master state rather
/// than restarting from the top.
pub struct Orchestrator {
    ctx: OrchestratorContext,
}

impl Orchestrator {
    pub fn new(ctx: OrchestratorContext) -> Self {
        Self { ctx }
    }

    pub async fn start(&self, master_id: TicketId) -> Result<(), OrchestratorError> {
        self.ctx.state.repair_master_state(master_id).await?;
        let current = self.ctx.state.current_master_state(master_id).await?;

        if let Some(state) = current {
            if state.is_terminal() {
                return Err(OrchestratorError::Terminal(master_id));
            }
        }

        match self.run(master_id, current).await {
            Ok(()) => Ok(()),
            Err(err) => {
                error!(master_id, error = %err, "orchestration failed");
                self.ctx.events.dispatch(OrchestrationEvent::OrchestrationFailed {
                    ticket_id: master_id,
                    reason: err.to_string(),
                });
                let _ = self.ctx.state.transition_master(master_id, MasterState::Failed).await;
                Err(err)
            }
        }
    }

    async fn run(&self, master_id: TicketId, current: Option<MasterState>) -> Result<(), OrchestratorError> {
        let plan = match current {
            None | Some(MasterState::Planning) => planning::run_planning(&self.ctx, master_id).await?,
            Some(_) => reconstruct_plan(&self.ctx, master_id).await?,
        };

        let state = self.ctx.state.current_master_state(master_id).await?.unwrap_or(MasterState::AwaitingApproval);

        if matches!(state, MasterState::AwaitingApproval) {
            if self.ctx.settings.auto_approve {
                approval::auto_approve(&self.ctx.tracker, &self.ctx.labels, master_id).await?;
            } else {
                let decision = approval::wait_for_approval(
                    &self.ctx.tracker,
                    &self.ctx.labels,
                    master_id,
                    self.ctx.settings.approval_poll_interval,
                    &tokio_util::sync::CancellationToken::new(),
                )
                .await?;
                match decision {
                    approval::ApprovalDecision::Approved => {
                        self.ctx.state.transition_master(master_id, MasterState::Approved).await?;
                    }
                    approval::ApprovalDecision::Rejected => {
                        self.ctx.state.transition_master(master_id, MasterState::Rejected).await?;
                        return Ok(());
                    }
                    approval::ApprovalDecision::Cancelled => return Ok(()),
                }
            }
        }

        self.ctx.state.transition_master(master_id, MasterState::Implementing).await?;
        implementation::run_implementation(&self.ctx, master_id, &plan.implementation_tasks).await?;

        self.ctx.state.transition_master(master_id, MasterState::Testing).await?;
        let test_summary = testing::run_testing(&self.ctx, master_id, &plan.test_tasks).await?;

        self.ctx.state.transition_master(master_id, MasterState::Completing).await?;
        completion::run_completion(&self.ctx, master_id, &plan, &test_summary).await?;
        self.ctx.state.transition_master(master_id, MasterState::Completed).await?;

        info!(master_id, "orchestration complete");
        Ok(())
    }
}

/// Reconstruct a best-effort [`Plan`] from sub-tickets carrying the
/// configured role and master-ref labels. The
/// structured specification JSON the Architect produced is not persisted
/// outside the master ticket's orchestration block, so the reconstructed
/// specification is a placeholder; see `DESIGN.md` for the rationale.
async fn reconstruct_plan(ctx: &OrchestratorContext, master_id: TicketId) -> Result<Plan, orch_tracker::TrackerError> {
    let master_ref_label = ctx.labels.master_ref(master_id);
    let candidates = ctx.tracker.list_open_with_label(&master_ref_label).await?;

    let impl_label = ctx.labels.role(Role::Implementation);
    let test_label = ctx.labels.role(Role::Test);

    let mut implementation_tasks = Vec::new();
    let mut test_tasks = Vec::new();

    for sub_ticket in candidates {
        let ticket = ctx.tracker.get_ticket(sub_ticket).await?;
        if ticket.has_label(&impl_label) {
            implementation_tasks.push(ImplementationTask {
                id: format!("impl-{sub_ticket}"),
                title: ticket.title.clone(),
                description: ticket.body.clone(),
                acceptance_criteria: vec![],
                depends_on: vec![],
                complexity: None,
                sub_ticket: Some(sub_ticket),
            });
        } else if ticket.has_label(&test_label) {
            test_tasks.push(TestTask {
                id: format!("test-{sub_ticket}"),
                title: ticket.title.clone(),
                description: ticket.body.clone(),
                test_scenarios: vec![],
                depends_on: vec![],
                complexity: None,
                sub_ticket: Some(sub_ticket),
            });
        }
    }

    Ok(Plan {
        specification: Specification {
            requirements: String::new(),
            acceptance_criteria: String::new(),
            technical_approach: String::new(),
            edge_cases: vec![],
            dependencies: vec![],
            complexity: None,
        },
        implementation_tasks,
        test_tasks,
    })
}
