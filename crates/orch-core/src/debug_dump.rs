//! Per-agent debug JSON dumps, written under `logging.debug_log_dir` when
//! `logging.debug_mode` is enabled -- a diagnostic trail of exactly what was
//! sent to and received from the AI service for a given agent call,
//! independent of the Log Stream Hub's lossy in-memory events.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::warn;

#[derive(Debug, Serialize)]
pub struct AgentDebugRecord<'a> {
    pub agent_name: &'a str,
    pub model: &'a str,
    pub session_id: Option<String>,
    pub prompt: &'a str,
    pub response: &'a str,
    pub attempts: u32,
    pub tools_executed: u32,
    pub duration_ms: u128,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Writes `record` as a JSON file under `dir`, named
/// `<agent>-<timestamp>-<session-or-noid>.json`. Failures are logged and
/// swallowed -- a missing debug dump must never fail the orchestration.
pub async fn write(dir: &Path, record: &AgentDebugRecord<'_>) {
    if let Err(err) = tokio::fs::create_dir_all(dir).await {
        warn!(error = %err, dir = %dir.display(), "failed to create debug log directory");
        return;
    }

    let file_name = format!(
        "{}-{}-{}.json",
        record.agent_name,
        record.timestamp.format("%Y%m%dT%H%M%S%.3f"),
        record.session_id.as_deref().unwrap_or("no-session"),
    );
    let path: PathBuf = dir.join(file_name);

    match serde_json::to_vec_pretty(record) {
        Ok(bytes) => {
            if let Err(err) = tokio::fs::write(&path, bytes).await {
                warn!(error = %err, path = %path.display(), "failed to write agent debug dump");
            }
        }
        Err(err) => warn!(error = %err, "failed to serialize agent debug dump"),
    }
}
