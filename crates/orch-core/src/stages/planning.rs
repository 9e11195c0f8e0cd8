//! Planning Stage: one specification, two parallel planners,
//! sub-tickets stamped from the resulting task lists.

use std::sync::Arc;

use orch_tracker::{NewTicket, TrackerError, TicketId};
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::agents::AgentRole;
use crate::body::{compose_body, ParsedBody};
use crate::context::OrchestratorContext;
use crate::events::OrchestrationEvent;
use crate::executor::{ExecuteOptions, ExecutorError};
use crate::labels::{MasterState, Role, SubState};
use crate::plan::{ImplementationTask, Plan, Specification, TestTask};

#[derive(Debug, Error)]
pub enum PlanningError {
    #[error("architect response was not valid JSON or missing a required field: {0}")]
    InvalidSpecification(String),
    #[error("{agent} produced no tasks")]
    EmptyTaskList { agent: &'static str },
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
}

#[derive(Deserialize)]
struct ArchitectResponse {
    requirements: String,
    acceptance_criteria: String,
    technical_approach: String,
    #[serde(default)]
    edge_cases: Vec<String>,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    complexity: Option<String>,
}

#[derive(Deserialize)]
struct SculptorResponse {
    tasks: Vec<ImplementationTaskSeed>,
}

#[derive(Deserialize)]
struct ImplementationTaskSeed {
    id: String,
    title: String,
    description: String,
    #[serde(default)]
    acceptance_criteria: Vec<String>,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    complexity: Option<String>,
}

#[derive(Deserialize)]
struct SentinelResponse {
    tasks: Vec<TestTaskSeed>,
}

#[derive(Deserialize)]
struct TestTaskSeed {
    id: String,
    title: String,
    description: String,
    #[serde(default)]
    test_scenarios: Vec<String>,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    complexity: Option<String>,
}

async fn run_agent(
    ctx: &OrchestratorContext,
    role: AgentRole,
    prompt: &str,
) -> Result<String, ExecutorError> {
    let config = ctx
        .roster
        .get(role)
        .expect("agent role must be configured before planning runs");
    let options = ExecuteOptions {
        agent_name: role.as_str().to_string(),
        default_model: config.model.clone(),
        working_dir: ctx.worktrees.repo_path().to_path_buf(),
        timeout: config.timeout,
        progress_sink: None,
    };
    Ok(ctx.executor.execute(prompt, &options).await?.response)
}

/// Run the full planning stage for `master_id`, returning the plan with
/// sub-ticket numbers pinned.
pub async fn run_planning(ctx: &OrchestratorContext, master_id: TicketId) -> Result<Plan, PlanningError> {
    let ticket = ctx.tracker.get_ticket(master_id).await?;
    let ParsedBody { original_request, .. } = crate::body::parse_body(&ticket.body);

    let architect_raw = run_agent(ctx, AgentRole::Architect, &original_request).await?;
    let architect: ArchitectResponse = serde_json::from_str(&architect_raw)
        .map_err(|e| PlanningError::InvalidSpecification(e.to_string()))?;

    let specification = Specification {
        requirements: architect.requirements,
        acceptance_criteria: architect.acceptance_criteria,
        technical_approach: architect.technical_approach,
        edge_cases: architect.edge_cases,
        dependencies: architect.dependencies,
        complexity: architect.complexity,
    };

    let spec_prompt = format!(
        "requirements: {}\nacceptance_criteria: {}\ntechnical_approach: {}",
        specification.requirements, specification.acceptance_criteria, specification.technical_approach
    );

    let empty_plan = Plan {
        specification: specification.clone(),
        implementation_tasks: vec![],
        test_tasks: vec![],
    };
    let body = compose_body(&empty_plan, &original_request, &[]);
    ctx.tracker.set_body(master_id, &body).await?;
    ctx.status.start_periodic(master_id);

    let (sculptor_raw, sentinel_raw) = tokio::try_join!(
        run_agent(ctx, AgentRole::Sculptor, &spec_prompt),
        run_agent(ctx, AgentRole::Sentinel, &spec_prompt),
    )?;

    let sculptor: SculptorResponse = serde_json::from_str(&sculptor_raw)
        .map_err(|e| PlanningError::InvalidSpecification(e.to_string()))?;
    if sculptor.tasks.is_empty() {
        return Err(PlanningError::EmptyTaskList { agent: "sculptor" });
    }
    let sentinel: SentinelResponse = serde_json::from_str(&sentinel_raw)
        .map_err(|e| PlanningError::InvalidSpecification(e.to_string()))?;
    if sentinel.tasks.is_empty() {
        return Err(PlanningError::EmptyTaskList { agent: "sentinel" });
    }

    let mut implementation_tasks = Vec::new();
    for seed in sculptor.tasks {
        let sub_ticket = create_sub_ticket(
            ctx,
            master_id,
            &seed.title,
            &seed.description,
            Role::Implementation,
        )
        .await?;
        implementation_tasks.push(ImplementationTask {
            id: seed.id,
            title: seed.title,
            description: seed.description,
            acceptance_criteria: seed.acceptance_criteria,
            depends_on: seed.depends_on,
            complexity: seed.complexity,
            sub_ticket: Some(sub_ticket),
        });
    }

    let mut test_tasks = Vec::new();
    for seed in sentinel.tasks {
        let sub_ticket =
            create_sub_ticket(ctx, master_id, &seed.title, &seed.description, Role::Test).await?;
        test_tasks.push(TestTask {
            id: seed.id,
            title: seed.title,
            description: seed.description,
            test_scenarios: seed.test_scenarios,
            depends_on: seed.depends_on,
            complexity: seed.complexity,
            sub_ticket: Some(sub_ticket),
        });
    }

    let plan = Plan { specification, implementation_tasks, test_tasks };

    let full_body = compose_body(&plan, &original_request, &[]);
    ctx.tracker.set_body(master_id, &full_body).await?;

    ctx.events.dispatch(OrchestrationEvent::PlanningComplete { ticket_id: master_id });
    ctx.state.transition_master(master_id, MasterState::AwaitingApproval).await?;
    info!(ticket = master_id, tasks = plan.task_count(), "planning complete");

    Ok(plan)
}

async fn create_sub_ticket(
    ctx: &OrchestratorContext,
    master_id: TicketId,
    title: &str,
    body: &str,
    role: Role,
) -> Result<TicketId, TrackerError> {
    let labels = vec![
        ctx.labels.sub_issue(),
        ctx.labels.role(role),
        ctx.labels.master_ref(master_id),
        ctx.labels.sub_state(SubState::Pending),
    ];
    ctx.tracker
        .create_ticket(NewTicket { title: title.to_string(), body: body.to_string(), labels })
        .await
}
