//! The collaborator bundle every stage is parameterized by. A factory
//! produces a fresh one bound to all its collaborators for each
//! orchestration run, rather than reaching for process-global state.

use std::sync::Arc;

use orch_tracker::Tracker;

use crate::agents::AgentRoster;
use crate::events::EventBus;
use crate::executor::AgentExecutor;
use crate::labels::LabelScheme;
use crate::resilience::Resilience;
use crate::retry::RetryConfig;
use crate::state::StateStore;
use crate::status::StatusReporter;
use crate::worktree::WorktreeManager;

/// Tunables pulled from configuration that stages consult directly rather
/// than threading through every function signature.
#[derive(Debug, Clone)]
pub struct StageSettings {
    pub base_branch: String,
    pub label_prefix: String,
    pub max_concurrency: usize,
    pub create_pr: bool,
    pub close_sub_on_completion: bool,
    pub cleanup_on_completion: bool,
    pub cleanup_on_failure: bool,
    pub auto_approve: bool,
    pub approval_poll_interval: std::time::Duration,
    pub max_fix_attempts: u32,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            base_branch: "main".to_string(),
            label_prefix: String::new(),
            max_concurrency: num_cpus::get(),
            create_pr: true,
            close_sub_on_completion: true,
            cleanup_on_completion: false,
            cleanup_on_failure: false,
            auto_approve: false,
            approval_poll_interval: crate::stages::approval::DEFAULT_POLL_INTERVAL,
            max_fix_attempts: 10,
        }
    }
}

/// Everything a stage needs, bound once per orchestration run by the
/// factory in `orchestrator.rs`.
pub struct OrchestratorContext {
    pub tracker: Arc<dyn Tracker>,
    pub labels: LabelScheme,
    pub executor: Arc<AgentExecutor>,
    pub roster: AgentRoster,
    pub state: Arc<StateStore>,
    pub worktrees: Arc<WorktreeManager>,
    pub status: Arc<StatusReporter>,
    pub events: Arc<EventBus>,
    pub resilience: Arc<Resilience>,
    pub retry_config: RetryConfig,
    pub settings: StageSettings,
}
