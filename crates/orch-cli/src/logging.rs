//! Process-wide `tracing` setup: stdout plus, once a config is available, a
//! daily-rotating file sink under `logging.log_dir` -- the durable half of
//! the Log Stream Hub's otherwise-lossy in-memory ring buffer.

use std::path::PathBuf;
use std::sync::Arc;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use orch_core::config::Config;
use orch_core::logstream::{LogHub, LogHubLayer};

/// File name prefix `tracing_appender::rolling::daily` rotates under,
/// producing `orch.log.<YYYY-MM-DD>`.
const LOG_FILE_PREFIX: &str = "orch.log";

/// Initializes the subscriber: stdout, an optional daily-rotating file
/// sink, and -- when `log_hub` is given -- a [`LogHubLayer`] so every
/// `tracing` call in the orchestrator also reaches the Log Stream Hub's
/// WS subscribers. Returns the non-blocking writer's guard when file
/// logging was set up; the caller must keep it alive for the life of the
/// process, since dropping it stops flushing to the file.
pub fn init(config: Option<&Config>, log_hub: Option<Arc<LogHub>>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let hub_layer = log_hub.map(LogHubLayer::new);

    let Some(config) = config else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .with(hub_layer)
            .init();
        return None;
    };

    if std::fs::create_dir_all(&config.logging.log_dir).is_err() {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .with(hub_layer)
            .init();
        return None;
    }

    let appender = tracing_appender::rolling::daily(&config.logging.log_dir, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .with(hub_layer)
        .init();

    Some(guard)
}

/// Today's log file path, matching the rotation convention above -- used to
/// attach the current log file to a `critical-error` notification.
pub fn current_log_path(log_dir: &str) -> String {
    let date = chrono::Utc::now().format("%Y-%m-%d");
    PathBuf::from(log_dir)
        .join(format!("{LOG_FILE_PREFIX}.{date}"))
        .to_string_lossy()
        .into_owned()
}
