//! `orch serve`: wires every concrete adapter into `orch-core`'s
//! collaborator bundle and runs the service loop (source poller + queue
//! processor + web surface) until SIGTERM/SIGINT. Shutdown handlers stop
//! the source poller and the web surface and return; the running
//! orchestration is not aborted mid-flight -- a drain is best-effort.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use orch_ai::{AgentService, HttpAgentService, ModelRef};
use orch_core::agents::{AgentConfig, AgentRole, AgentRoster};
use orch_core::config::Config;
use orch_core::context::OrchestratorContext;
use orch_core::events::{EventBus, EventSink};
use orch_core::executor::AgentExecutor;
use orch_core::labels::LabelScheme;
use orch_core::logstream::LogHub;
use orch_core::queue::{OrchestratorFactory, Queue, SourcePoller};
use orch_core::resilience::Resilience;
use orch_core::state::StateStore;
use orch_core::status::{StatusReporter, TrackerStatusProvider};
use orch_core::worktree::WorktreeManager;
use orch_core::Orchestrator;
use orch_notify::Notifier;
use orch_tracker::Tracker;

use crate::adapters::build_tracker;

/// Static-asset directory for the web client build, if one is configured
/// via `--static-dir`.
pub struct ServeOptions {
    pub static_dir: Option<PathBuf>,
}

pub async fn run(config: Config, options: ServeOptions, log_hub: Arc<LogHub>) -> Result<()> {
    let tracker = build_tracker(&config)?;
    let labels = LabelScheme::new(config.tracker.label_prefix.clone());

    let notifier = Notifier::new(
        config.notifier.webhook_url.clone(),
        config.notifier.notification_level,
        config.notifier.mention_roles.clone(),
    );
    let mut event_bus = EventBus::new();
    let notifier_sink: Arc<dyn EventSink> = notifier.clone();
    event_bus.register(notifier_sink);

    let (default_models, roster) = build_roster(&config);
    let resilience = Arc::new(Resilience::new(
        default_models,
        config.status_resilience.model_failover.failback_models.clone(),
        config.status_resilience.model_failover.max_failovers_per_agent,
    ));

    let ai_service: Arc<dyn AgentService> =
        Arc::new(HttpAgentService::new("orch-ai", config.execution.base_url.clone()));

    let status_provider = TrackerStatusProvider::new(tracker.clone(), labels.clone());
    let status = StatusReporter::new(
        tracker.clone(),
        labels.clone(),
        status_provider,
        Duration::from_secs(config.status_table.update_interval_seconds),
    );
    event_bus.register(orch_core::status::StatusEventSink::new(status.clone()));
    let events = Arc::new(event_bus);

    let mut executor_builder = AgentExecutor::new(ai_service, resilience.clone(), Some(status.clone()))
        .with_events(events.clone())
        .with_log_path(crate::logging::current_log_path(&config.logging.log_dir));
    if config.logging.debug_mode {
        let debug_dir = config
            .logging
            .debug_log_dir
            .clone()
            .unwrap_or_else(|| format!("{}/debug", config.logging.log_dir));
        executor_builder = executor_builder.with_debug_dir(PathBuf::from(debug_dir));
    }
    let executor = Arc::new(executor_builder);
    let retry_config = config.execution.retry.to_retry_config();
    let state = Arc::new(StateStore::new(tracker.clone(), labels.clone(), retry_config));

    let registry_path = PathBuf::from(&config.tracker.repo_path).join(".orch").join("worktrees.json");
    let worktrees = Arc::new(WorktreeManager::new(
        config.tracker.repo_path.clone(),
        config.worktree.base_path.clone(),
        registry_path,
    )?);

    let settings = config.stage_settings();

    let factory: OrchestratorFactory = {
        let tracker = tracker.clone();
        let labels = labels.clone();
        let executor = executor.clone();
        let roster = roster.clone();
        let state = state.clone();
        let worktrees = worktrees.clone();
        let status = status.clone();
        let events = events.clone();
        let resilience = resilience.clone();
        let settings = settings.clone();
        Arc::new(move |_ticket_id| {
            Orchestrator::new(OrchestratorContext {
                tracker: tracker.clone(),
                labels: labels.clone(),
                executor: executor.clone(),
                roster: roster.clone(),
                state: state.clone(),
                worktrees: worktrees.clone(),
                status: status.clone(),
                events: events.clone(),
                resilience: resilience.clone(),
                retry_config,
                settings: settings.clone(),
            })
        })
    };

    let queue = Queue::new(factory);
    let poller = SourcePoller::new(
        tracker,
        labels,
        queue.clone(),
        Duration::from_millis(config.service.poll_interval_ms),
    );

    poller.start();

    let cancel = CancellationToken::new();
    let web_state = orch_web::AppState::new(log_hub, queue);

    let server = {
        let cancel = cancel.clone();
        let host = config.service.host.clone();
        let port = config.service.port;
        let static_dir = options.static_dir.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = orch_web::run(web_state, static_dir, &host, port) => {
                    if let Err(err) = result {
                        tracing::error!(error = %err, "web surface exited with an error");
                    }
                }
                _ = cancel.cancelled() => {
                    tracing::info!("web surface shutting down");
                }
            }
        })
    };

    shutdown_signal().await;
    tracing::info!("shutdown signal received, stopping source poller and web surface");
    poller.stop();
    cancel.cancel();
    let _ = server.await;

    Ok(())
}

/// Builds the per-role agent roster and the default-model map the
/// resilience layer falls back to, from `config.agents`.
fn build_roster(config: &Config) -> (HashMap<String, ModelRef>, AgentRoster) {
    let mut default_models = HashMap::new();
    let mut roster = AgentRoster::new();

    for role in AgentRole::ALL {
        if let Some(settings) = config.agents.get(role.as_str()) {
            default_models.insert(role.as_str().to_string(), settings.model.clone());
            roster.set(
                role,
                AgentConfig {
                    model: settings.model.clone(),
                    timeout: Duration::from_secs(settings.timeout_secs),
                },
            );
        }
    }

    (default_models, roster)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
