//! HTTP/NDJSON implementation of [`AgentService`].
//!
//! Submits a prompt by POSTing to `{base_url}/v1/sessions`, then streams the
//! response body as newline-delimited JSON events -- the same shape as a
//! subprocess adapter that parses a child's stdout as JSONL, except the
//! byte source is an HTTP response stream rather than a child process's
//! stdout.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AgentServiceError;
use crate::trait_def::AgentService;
use crate::types::{AgentEvent, AgentHandle, ExecuteRequest, SessionId};

/// Client for an AI execution service speaking HTTP + newline-delimited
/// JSON events.
pub struct HttpAgentService {
    name: String,
    base_url: String,
    client: reqwest::Client,
    /// Tracks sessions this process has spawned, for `session_exists`
    /// fallback when the service itself is queried.
    known_sessions: Arc<Mutex<HashMap<Uuid, bool>>>,
}

impl HttpAgentService {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            client: reqwest::Client::new(),
            known_sessions: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SpawnResponse {
    session_id: Uuid,
}

/// One line of the NDJSON progress stream.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireEvent {
    Retry {
        attempt: u32,
        reason: String,
    },
    ToolCompleted {
        tool: String,
    },
    Message {
        text: String,
    },
    HangDetected,
    Completed {
        response: String,
        attempts: u32,
        tools_executed: u32,
    },
    Error {
        code: String,
        message: String,
    },
}

impl From<WireEvent> for AgentEvent {
    fn from(w: WireEvent) -> Self {
        match w {
            WireEvent::Retry { attempt, reason } => AgentEvent::Retry { attempt, reason },
            WireEvent::ToolCompleted { tool } => AgentEvent::ToolCompleted { tool },
            WireEvent::Message { text } => AgentEvent::MessageReceived { text },
            WireEvent::HangDetected => AgentEvent::HangDetected,
            WireEvent::Completed {
                response,
                attempts,
                tools_executed,
            } => AgentEvent::Completed {
                response,
                attempts,
                tools_executed,
            },
            WireEvent::Error { code, message } => AgentEvent::Error { code, message },
        }
    }
}

fn classify_status(status: reqwest::StatusCode, body: &str) -> AgentServiceError {
    match status.as_u16() {
        401 => AgentServiceError::AuthFailed(body.to_string()),
        403 if body.to_lowercase().contains("quota") => {
            AgentServiceError::QuotaExceeded(body.to_string())
        }
        403 => AgentServiceError::PermissionDenied(body.to_string()),
        429 => AgentServiceError::RateLimited(body.to_string()),
        _ => AgentServiceError::Transient(format!("HTTP {status}: {body}")),
    }
}

#[async_trait]
impl AgentService for HttpAgentService {
    fn name(&self) -> &str {
        &self.name
    }

    async fn health_check(&self, budget: Duration) -> Result<(), AgentServiceError> {
        let url = format!("{}/v1/health", self.base_url);
        let resp = tokio::time::timeout(budget, self.client.get(&url).send())
            .await
            .map_err(|_| AgentServiceError::ServerUnreachable(format!("health check timed out after {budget:?}")))?
            .map_err(|e| AgentServiceError::ServerUnreachable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(AgentServiceError::ServerUnreachable(format!(
                "health endpoint returned {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn spawn(&self, request: &ExecuteRequest) -> Result<AgentHandle, AgentServiceError> {
        let url = format!("{}/v1/sessions", self.base_url);
        let body = serde_json::json!({
            "agent": request.agent_name,
            "prompt": request.prompt,
            "model": {
                "provider_id": request.model.provider_id,
                "model_id": request.model.model_id,
            },
            "working_dir": request.working_dir,
            "env": request.env_vars,
        });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentServiceError::Transient(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &text));
        }

        let parsed: SpawnResponse = resp
            .json()
            .await
            .map_err(|e| AgentServiceError::Transient(format!("malformed spawn response: {e}")))?;

        let session_id = SessionId(parsed.session_id);
        self.known_sessions.lock().insert(parsed.session_id, true);

        Ok(AgentHandle {
            session_id,
            agent_name: request.agent_name.clone(),
        })
    }

    fn events(&self, handle: &AgentHandle) -> Pin<Box<dyn Stream<Item = AgentEvent> + Send>> {
        let url = format!("{}/v1/sessions/{}/events", self.base_url, handle.session_id);
        let client = self.client.clone();

        let stream = async_stream::stream! {
            let resp = match client.get(&url).send().await {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "failed to open agent event stream");
                    yield AgentEvent::Error { code: "stream-unreachable".into(), message: e.to_string() };
                    return;
                }
            };

            let mut byte_stream = resp.bytes_stream();
            let mut buf = Vec::new();

            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(error = %e, "agent event stream read error");
                        break;
                    }
                };
                buf.extend_from_slice(&chunk);

                while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line);
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<WireEvent>(line) {
                        Ok(wire) => {
                            let is_completed = matches!(wire, WireEvent::Completed { .. });
                            yield AgentEvent::from(wire);
                            if is_completed {
                                return;
                            }
                        }
                        Err(e) => {
                            debug!(error = %e, line = %line, "ignoring malformed event line");
                        }
                    }
                }
            }
        };

        Box::pin(stream)
    }

    async fn send(&self, handle: &AgentHandle, message: &str) -> Result<(), AgentServiceError> {
        let url = format!(
            "{}/v1/sessions/{}/messages",
            self.base_url, handle.session_id
        );
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "message": message }))
            .send()
            .await
            .map_err(|e| AgentServiceError::Transient(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(classify_status(status, &text));
        }
        Ok(())
    }

    async fn terminate(&self, session: SessionId) -> Result<(), AgentServiceError> {
        let url = format!("{}/v1/sessions/{}", self.base_url, session);
        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| AgentServiceError::Transient(e.to_string()))?;

        if resp.status().is_success() || resp.status().as_u16() == 404 {
            self.known_sessions.lock().remove(&session.0);
            return Ok(());
        }
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        Err(classify_status(status, &text))
    }

    async fn session_exists(&self, session: SessionId) -> Option<bool> {
        let url = format!("{}/v1/sessions/{}", self.base_url, session);
        match self.client.get(&url).send().await {
            Ok(resp) => Some(resp.status().is_success()),
            Err(_) => None,
        }
    }
}
