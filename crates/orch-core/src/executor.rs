//! Agent Executor: submits a prompt to the AI service, streams
//! progress events out to the executor's own bookkeeping, the Status
//! Reporter, and the resilience layer, and retries across a failback model
//! on a session hang.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use orch_ai::{AgentEvent, AgentService, AgentServiceError, ExecuteRequest, ModelRef};
use thiserror::Error;
use tracing::{info, warn};

use crate::events::{EventBus, OrchestrationEvent};
use crate::resilience::{self, KillOutcome, NoFailoverReason, Resilience};
use crate::status::StatusReporter;
use orch_tracker::TicketId;

/// Default failover attempts inside a single `execute` call.
pub const DEFAULT_MAX_FAILOVER_ATTEMPTS: u32 = 3;

/// Default health-check budget.
pub const HEALTH_CHECK_BUDGET: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("AI service unreachable: {0}")]
    ServerUnreachable(String),
    #[error("session hung and failover was not possible: {0:?}")]
    FailoverExhausted(NoFailoverReason),
    #[error(transparent)]
    Service(#[from] AgentServiceError),
}

/// Options for a single `execute` call.
pub struct ExecuteOptions {
    pub agent_name: String,
    pub default_model: ModelRef,
    pub working_dir: PathBuf,
    pub timeout: Duration,
    /// Sub-ticket id to route debounced progress updates to, if any.
    pub progress_sink: Option<TicketId>,
}

/// Outcome of a successful `execute` call.
pub struct ExecuteOutcome {
    pub response: String,
    pub duration: Duration,
    pub attempts: u32,
    pub tools_executed: u32,
}

/// Drives a single prompt through the AI service, handling health checks,
/// progress fan-out, and model failover on a hang.
pub struct AgentExecutor {
    service: Arc<dyn AgentService>,
    resilience: Arc<Resilience>,
    status: Option<Arc<StatusReporter>>,
    events: Option<Arc<EventBus>>,
    current_log_path: Option<String>,
    debug_dir: Option<PathBuf>,
}

impl AgentExecutor {
    pub fn new(
        service: Arc<dyn AgentService>,
        resilience: Arc<Resilience>,
        status: Option<Arc<StatusReporter>>,
    ) -> Self {
        Self { service, resilience, status, events: None, current_log_path: None, debug_dir: None }
    }

    /// Registers the event bus a successful failover's `model-failover`
    /// notification is dispatched through.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Attaches the path of the daily log file a `ServerUnreachable`
    /// failure's `critical-error` notification should carry.
    pub fn with_log_path(mut self, path: impl Into<String>) -> Self {
        self.current_log_path = Some(path.into());
        self
    }

    /// Enables per-agent debug JSON dumps under `dir` (`logging.debug_mode`
    /// and `logging.debug_log_dir`).
    pub fn with_debug_dir(mut self, dir: PathBuf) -> Self {
        self.debug_dir = Some(dir);
        self
    }

    /// The current log snapshot path, if one was configured.
    pub fn current_log_path(&self) -> Option<String> {
        self.current_log_path.clone()
    }

    pub async fn execute(
        &self,
        prompt: &str,
        options: &ExecuteOptions,
    ) -> Result<ExecuteOutcome, ExecutorError> {
        let start = Instant::now();
        let mut attempts = 0u32;
        let mut failover_attempt = 0u32;

        loop {
            attempts += 1;
            let model = self
                .resilience
                .current_model_for(&options.agent_name, &options.default_model);

            self.service
                .health_check(HEALTH_CHECK_BUDGET)
                .await
                .map_err(|err| ExecutorError::ServerUnreachable(err.to_string()))?;

            let request = ExecuteRequest {
                agent_name: options.agent_name.clone(),
                prompt: prompt.to_string(),
                model,
                working_dir: options.working_dir.clone(),
                env_vars: Default::default(),
            };

            let handle = self.service.spawn(&request).await?;
            let mut stream = self.service.events(&handle);

            let mut tools_executed = 0u32;
            let mut retries = 0u32;
            let mut hung = false;
            let mut terminal_error: Option<AgentServiceError> = None;
            let mut response = String::new();

            loop {
                let next = match tokio::time::timeout(options.timeout, stream.next()).await {
                    Ok(Some(event)) => event,
                    Ok(None) => break,
                    Err(_elapsed) => {
                        hung = true;
                        break;
                    }
                };
                match next {
                    AgentEvent::Retry { attempt, reason: _ } => {
                        retries = attempt;
                        self.push_progress(options.progress_sink, None, None, Some(retries));
                    }
                    AgentEvent::ToolCompleted { tool } => {
                        tools_executed += 1;
                        info!(tool, "tool completed");
                        self.push_progress(options.progress_sink, None, Some(tools_executed), None);
                    }
                    AgentEvent::MessageReceived { text } => {
                        self.push_progress(options.progress_sink, Some(text), None, None);
                    }
                    AgentEvent::HangDetected => {
                        hung = true;
                        break;
                    }
                    AgentEvent::Completed { response: resp, attempts: a, tools_executed: t } => {
                        response = resp;
                        tools_executed = t;
                        attempts = attempts.max(a);
                        break;
                    }
                    AgentEvent::Error { code, message } => {
                        terminal_error = Some(if code == "session-hung" {
                            hung = true;
                            AgentServiceError::SessionHung
                        } else {
                            AgentServiceError::Transient(message)
                        });
                        break;
                    }
                }
            }

            if hung {
                warn!(agent = %options.agent_name, "session hang detected, invoking watchdog");
                match resilience::verify_termination(&self.service, handle.session_id).await {
                    KillOutcome::SessionKilled => {
                        info!(agent = %options.agent_name, method = "graceful-kill", "session-killed");
                    }
                    KillOutcome::FailedTermination => {
                        warn!(agent = %options.agent_name, "failed-termination: watchdog could not confirm the session was killed");
                    }
                }

                warn!(agent = %options.agent_name, "reporting model-timeout");
                failover_attempt += 1;
                match self.resilience.on_model_timeout(
                    &options.agent_name,
                    Some(handle.session_id),
                    failover_attempt,
                ) {
                    Ok(new_model) if failover_attempt < DEFAULT_MAX_FAILOVER_ATTEMPTS => {
                        if let Some(events) = &self.events {
                            events.dispatch(OrchestrationEvent::ModelFailover {
                                agent: options.agent_name.clone(),
                                from: model.to_string(),
                                to: new_model.to_string(),
                                reason: "model-timeout".to_string(),
                            });
                        }
                        continue;
                    }
                    Ok(_) => return Err(ExecutorError::Service(AgentServiceError::SessionHung)),
                    Err(reason) => return Err(ExecutorError::FailoverExhausted(reason)),
                }
            }

            if let Some(err) = terminal_error {
                return Err(ExecutorError::Service(err));
            }

            self.resilience.reset_agent(&options.agent_name);
            let duration = start.elapsed();
            if let Some(dir) = &self.debug_dir {
                crate::debug_dump::write(
                    dir,
                    &crate::debug_dump::AgentDebugRecord {
                        agent_name: &options.agent_name,
                        model: &model.model_id,
                        session_id: Some(handle.session_id.to_string()),
                        prompt,
                        response: &response,
                        attempts,
                        tools_executed,
                        duration_ms: duration.as_millis(),
                        timestamp: chrono::Utc::now(),
                    },
                )
                .await;
            }
            return Ok(ExecuteOutcome { response, duration, attempts, tools_executed });
        }
    }

    fn push_progress(
        &self,
        sink: Option<TicketId>,
        message: Option<String>,
        tools_used: Option<u32>,
        retry_count: Option<u32>,
    ) {
        let (Some(sink), Some(status)) = (sink, &self.status) else {
            return;
        };
        status.update_task_progress(
            sink,
            crate::body::ProgressMarkers {
                agent_message: message,
                tools_used,
                retry_count,
                last_retry_time: retry_count.map(|_| chrono::Utc::now().to_rfc3339()),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orch_test_utils::FakeAgentService;
    use orch_test_utils::ScriptedRun;

    fn options() -> ExecuteOptions {
        ExecuteOptions {
            agent_name: "architect".into(),
            default_model: ModelRef { provider_id: "a".into(), model_id: "default".into() },
            working_dir: PathBuf::from("/tmp"),
            timeout: Duration::from_secs(10),
            progress_sink: None,
        }
    }

    #[tokio::test]
    async fn successful_execution_returns_response_and_resets_resilience() {
        let service = Arc::new(FakeAgentService::new());
        service.push_script(
            "architect",
            ScriptedRun::Events(vec![
                AgentEvent::ToolCompleted { tool: "read_file".into() },
                AgentEvent::Completed { response: "done".into(), attempts: 1, tools_executed: 1 },
            ]),
        );
        let resilience = Arc::new(Resilience::new(Default::default(), Default::default(), 2));
        let executor = AgentExecutor::new(service, resilience, None);

        let outcome = executor.execute("do it", &options()).await.unwrap();
        assert_eq!(outcome.response, "done");
        assert_eq!(outcome.tools_executed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn hang_without_failback_fails_with_no_failback_configured() {
        let service = Arc::new(FakeAgentService::new());
        service.push_script("architect", ScriptedRun::Events(vec![AgentEvent::HangDetected]));
        let resilience = Arc::new(Resilience::new(Default::default(), Default::default(), 2));
        let executor = AgentExecutor::new(service, resilience, None);

        let result = executor.execute("do it", &options()).await;
        assert!(matches!(
            result,
            Err(ExecutorError::FailoverExhausted(NoFailoverReason::NoFailbackConfigured))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn failover_retries_with_failback_and_dispatches_model_failover_event() {
        let service = Arc::new(FakeAgentService::new());
        service.push_script("architect", ScriptedRun::Hang);
        service.push_script(
            "architect",
            ScriptedRun::Events(vec![AgentEvent::Completed {
                response: "done".into(),
                attempts: 1,
                tools_executed: 0,
            }]),
        );

        let mut failbacks = std::collections::HashMap::new();
        failbacks.insert("architect".to_string(), ModelRef { provider_id: "b".into(), model_id: "failback".into() });
        let resilience = Arc::new(Resilience::new(Default::default(), failbacks, 2));

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        struct Recorder(Arc<std::sync::Mutex<Vec<OrchestrationEvent>>>);
        impl crate::events::EventSink for Recorder {
            fn on_event(&self, event: &OrchestrationEvent) {
                self.0.lock().unwrap().push(event.clone());
            }
        }
        let mut bus = EventBus::new();
        bus.register(Arc::new(Recorder(seen.clone())));
        let events = Arc::new(bus);

        let executor = AgentExecutor::new(service, resilience, None).with_events(events);

        let outcome = executor.execute("do it", &options()).await.unwrap();
        assert_eq!(outcome.response, "done");

        let recorded = seen.lock().unwrap();
        assert!(recorded.iter().any(|e| matches!(
            e,
            OrchestrationEvent::ModelFailover { agent, to, .. }
                if agent == "architect" && to == "b/failback"
        )));
    }
}
