//! Session Watchdog + Model Failover.
//!
//! Two related responsibilities sharing per-agent state: detecting and
//! killing hung sessions, and swapping an agent's model after repeated
//! timeouts, up to a per-agent cap.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use orch_ai::{AgentService, ModelRef, SessionId};
use parking_lot::Mutex;
use tracing::{info, warn};

/// Outcome of a watchdog verification pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    /// The session no longer exists, confirmed by re-checking existence.
    SessionKilled,
    /// Verification could not confirm termination.
    FailedTermination,
}

/// One recorded failover.
#[derive(Debug, Clone)]
pub struct FailoverRecord {
    pub from: ModelRef,
    pub to: ModelRef,
    pub reason: String,
    pub session: Option<SessionId>,
    pub attempt: u32,
}

#[derive(Debug, Clone, Default)]
struct AgentFailoverState {
    current: Option<ModelRef>,
    failover_count: u32,
    history: Vec<FailoverRecordLite>,
}

#[derive(Debug, Clone)]
struct FailoverRecordLite {
    from: ModelRef,
    to: ModelRef,
    reason: String,
    attempt: u32,
}

/// Default per-agent failover cap.
pub const DEFAULT_MAX_FAILOVERS_PER_AGENT: u32 = 2;

/// Reason an attempted failover did not happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoFailoverReason {
    NoFailbackConfigured,
    MaxFailoversExceeded,
}

/// Session hang detection (kill + verify) and per-agent model failover.
pub struct Resilience {
    max_failovers_per_agent: u32,
    failback_models: HashMap<String, ModelRef>,
    default_models: HashMap<String, ModelRef>,
    state: Mutex<HashMap<String, AgentFailoverState>>,
}

impl Resilience {
    pub fn new(
        default_models: HashMap<String, ModelRef>,
        failback_models: HashMap<String, ModelRef>,
        max_failovers_per_agent: u32,
    ) -> Self {
        Self {
            max_failovers_per_agent,
            failback_models,
            default_models,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// The model currently in effect for `agent`: the active failback if
    /// one was swapped in, else the configured default.
    pub fn current_model_for(&self, agent: &str, default: &ModelRef) -> ModelRef {
        let state = self.state.lock();
        state
            .get(agent)
            .and_then(|s| s.current.clone())
            .unwrap_or_else(|| {
                self.default_models
                    .get(agent)
                    .cloned()
                    .unwrap_or_else(|| default.clone())
            })
    }

    /// On `model-timeout`: swap to the agent's failback if the cap allows
    /// and one is configured, recording the transition.
    pub fn on_model_timeout(
        &self,
        agent: &str,
        session: Option<SessionId>,
        attempt: u32,
    ) -> Result<ModelRef, NoFailoverReason> {
        let Some(failback) = self.failback_models.get(agent).cloned() else {
            return Err(NoFailoverReason::NoFailbackConfigured);
        };

        let mut state = self.state.lock();
        let entry = state.entry(agent.to_string()).or_default();
        if entry.failover_count >= self.max_failovers_per_agent {
            return Err(NoFailoverReason::MaxFailoversExceeded);
        }

        let from = entry
            .current
            .clone()
            .or_else(|| self.default_models.get(agent).cloned())
            .unwrap_or_else(|| failback.clone());

        entry.current = Some(failback.clone());
        entry.failover_count += 1;
        entry.history.push(FailoverRecordLite {
            from: from.clone(),
            to: failback.clone(),
            reason: "model-timeout".to_string(),
            attempt,
        });

        info!(agent, from = %from, to = %failback, attempt, "model failover");
        let _ = session;
        Ok(failback)
    }

    /// Called on `agent-completed`: resets current model and failover count.
    pub fn reset_agent(&self, agent: &str) {
        self.state.lock().remove(agent);
    }

    pub fn failover_history(&self, agent: &str) -> Vec<FailoverRecord> {
        self.state
            .lock()
            .get(agent)
            .map(|s| {
                s.history
                    .iter()
                    .map(|h| FailoverRecord {
                        from: h.from.clone(),
                        to: h.to.clone(),
                        reason: h.reason.clone(),
                        session: None,
                        attempt: h.attempt,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Graceful-termination watchdog: on `session-hung`, attempt termination
/// then verify non-existence with backoff {1s, 2s, 4s}.
pub async fn verify_termination(
    service: &Arc<dyn AgentService>,
    session: SessionId,
) -> KillOutcome {
    if let Err(err) = service.terminate(session).await {
        warn!(error = %err, "graceful termination request failed");
    }

    let backoffs = [Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)];
    for delay in backoffs {
        tokio::time::sleep(delay).await;
        match service.session_exists(session).await {
            Some(false) => return KillOutcome::SessionKilled,
            Some(true) => continue,
            // No existence probe available: assume success.
            None => return KillOutcome::SessionKilled,
        }
    }
    KillOutcome::FailedTermination
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(provider: &str, m: &str) -> ModelRef {
        ModelRef { provider_id: provider.into(), model_id: m.into() }
    }

    #[test]
    fn current_model_defaults_until_a_failover_happens() {
        let res = Resilience::new(HashMap::new(), HashMap::new(), DEFAULT_MAX_FAILOVERS_PER_AGENT);
        let default = model("a", "default");
        assert_eq!(res.current_model_for("architect", &default), default);
    }

    #[test]
    fn failover_swaps_in_configured_failback() {
        let mut failbacks = HashMap::new();
        failbacks.insert("architect".to_string(), model("b", "failback"));
        let res = Resilience::new(HashMap::new(), failbacks, 2);

        let chosen = res.on_model_timeout("architect", None, 1).unwrap();
        assert_eq!(chosen, model("b", "failback"));
        assert_eq!(res.current_model_for("architect", &model("a", "default")), model("b", "failback"));
    }

    #[test]
    fn failover_exhausts_after_cap() {
        let mut failbacks = HashMap::new();
        failbacks.insert("architect".to_string(), model("b", "failback"));
        let res = Resilience::new(HashMap::new(), failbacks, 1);

        assert!(res.on_model_timeout("architect", None, 1).is_ok());
        assert_eq!(
            res.on_model_timeout("architect", None, 2).unwrap_err(),
            NoFailoverReason::MaxFailoversExceeded
        );
    }

    #[test]
    fn reset_agent_clears_state() {
        let mut failbacks = HashMap::new();
        failbacks.insert("architect".to_string(), model("b", "failback"));
        let res = Resilience::new(HashMap::new(), failbacks, 2);
        res.on_model_timeout("architect", None, 1).unwrap();
        res.reset_agent("architect");
        assert_eq!(res.current_model_for("architect", &model("a", "default")), model("a", "default"));
    }

    #[test]
    fn no_failback_configured_is_reported() {
        let res = Resilience::new(HashMap::new(), HashMap::new(), 2);
        assert_eq!(
            res.on_model_timeout("architect", None, 1).unwrap_err(),
            NoFailoverReason::NoFailbackConfigured
        );
    }
}
