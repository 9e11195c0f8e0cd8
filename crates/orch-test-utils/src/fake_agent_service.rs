//! In-memory [`AgentService`] fake.
//!
//! Each call to `spawn` for a given agent name pops the next scripted run
//! off that agent's queue (FIFO), letting a test set up a specific sequence
//! of outcomes -- e.g. "architect" times out once, then succeeds on the
//! second attempt with the failback model.

use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use parking_lot::Mutex;
use uuid::Uuid;

use orch_ai::{AgentEvent, AgentHandle, AgentService, AgentServiceError, ExecuteRequest, SessionId};

/// A scripted run: either a finite sequence of events, or a hang (never
/// completes within the caller's timeout).
#[derive(Clone)]
pub enum ScriptedRun {
    Events(Vec<AgentEvent>),
    Hang,
    SpawnFails(String),
}

pub struct FakeAgentService {
    name: String,
    scripts: Mutex<HashMap<String, Vec<ScriptedRun>>>,
    health_check_fails: AtomicBool,
    terminated: Mutex<HashSet<Uuid>>,
    spawned_models: Mutex<Vec<(String, String)>>,
}

impl FakeAgentService {
    pub fn new() -> Self {
        Self {
            name: "fake-ai-service".to_string(),
            scripts: Mutex::new(HashMap::new()),
            health_check_fails: AtomicBool::new(false),
            terminated: Mutex::new(HashSet::new()),
            spawned_models: Mutex::new(Vec::new()),
        }
    }

    /// Queue a scripted run for the given agent name.
    pub fn push_script(&self, agent_name: &str, run: ScriptedRun) {
        self.scripts
            .lock()
            .entry(agent_name.to_string())
            .or_default()
            .push(run);
    }

    pub fn fail_health_check(&self) {
        self.health_check_fails.store(true, Ordering::SeqCst);
    }

    pub fn was_terminated(&self, session: SessionId) -> bool {
        self.terminated.lock().contains(&session.0)
    }

    /// `(provider_id, model_id)` pairs used across all `spawn` calls, in order.
    pub fn spawned_models(&self) -> Vec<(String, String)> {
        self.spawned_models.lock().clone()
    }
}

impl Default for FakeAgentService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentService for FakeAgentService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn health_check(&self, _budget: Duration) -> Result<(), AgentServiceError> {
        if self.health_check_fails.load(Ordering::SeqCst) {
            return Err(AgentServiceError::ServerUnreachable(
                "fake service is down".to_string(),
            ));
        }
        Ok(())
    }

    async fn spawn(&self, request: &ExecuteRequest) -> Result<AgentHandle, AgentServiceError> {
        self.spawned_models.lock().push((
            request.model.provider_id.clone(),
            request.model.model_id.clone(),
        ));

        let mut scripts = self.scripts.lock();
        let queue = scripts.entry(request.agent_name.clone()).or_default();
        if let Some(ScriptedRun::SpawnFails(reason)) = queue.first() {
            let reason = reason.clone();
            queue.remove(0);
            return Err(AgentServiceError::Transient(reason));
        }

        let session_id = SessionId(Uuid::new_v4());
        Ok(AgentHandle {
            session_id,
            agent_name: request.agent_name.clone(),
        })
    }

    fn events(&self, handle: &AgentHandle) -> Pin<Box<dyn Stream<Item = AgentEvent> + Send>> {
        let mut scripts = self.scripts.lock();
        let queue = scripts.entry(handle.agent_name.clone()).or_default();

        if queue.is_empty() {
            // Default: an immediate, uneventful success.
            return Box::pin(futures::stream::iter(vec![AgentEvent::Completed {
                response: "ok".to_string(),
                attempts: 1,
                tools_executed: 0,
            }]));
        }

        match queue.remove(0) {
            ScriptedRun::Events(events) => Box::pin(futures::stream::iter(events)),
            ScriptedRun::Hang => Box::pin(futures::stream::pending()),
            ScriptedRun::SpawnFails(_) => {
                // Already handled in `spawn`; treat as an immediate error event.
                Box::pin(futures::stream::iter(vec![AgentEvent::Error {
                    code: "spawn-failed".to_string(),
                    message: "spawn should have failed before events() was called".to_string(),
                }]))
            }
        }
    }

    async fn send(&self, _handle: &AgentHandle, _message: &str) -> Result<(), AgentServiceError> {
        Ok(())
    }

    async fn terminate(&self, session: SessionId) -> Result<(), AgentServiceError> {
        self.terminated.lock().insert(session.0);
        Ok(())
    }

    async fn session_exists(&self, session: SessionId) -> Option<bool> {
        Some(!self.terminated.lock().contains(&session.0))
    }
}
