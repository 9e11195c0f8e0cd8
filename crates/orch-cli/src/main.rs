mod adapters;
mod api;
mod config;
mod logging;
mod logs_cmd;
mod queue_cmd;
mod serve_cmd;
mod status_cmd;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use orch_core::logstream::LogHub;

#[derive(Parser)]
#[command(name = "orch", about = "Issue-driven development orchestrator")]
struct Cli {
    /// Path to the config file (overrides ORCH_CONFIG_PATH and the XDG default).
    #[arg(long, global = true)]
    config: Option<String>,

    /// Base URL of a running `orch serve` instance (overrides the derived
    /// `service.host:service.port` default), used by `queue`/`logs`/`status`.
    #[arg(long, global = true)]
    server: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the service loop: source poller + queue processor + web surface.
    Serve {
        /// Directory to serve the web client's static build from.
        #[arg(long)]
        static_dir: Option<PathBuf>,
    },
    /// Configuration file management.
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Inspect and mutate the FIFO queue of a running service.
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Tail or query the Log Stream Hub of a running service.
    Logs {
        #[command(subcommand)]
        command: LogsCommands,
    },
    /// Read-only status: the running service's queue, or one issue's state.
    Status {
        /// Master issue number to report on. Omit for a service overview.
        issue: Option<u64>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write a starter config file.
    Init {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        repo: String,
        #[arg(long)]
        repo_path: String,
        /// Overwrite an existing config file.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum QueueCommands {
    /// Enqueue a master issue.
    Enqueue { issue: u64 },
    /// List what's running and queued.
    List,
    /// Remove a queued (not running) issue.
    Remove { issue: u64 },
    /// Clear every queued (not running) issue.
    Clear,
    /// Success rate and mean duration over recorded runs.
    Stats,
}

#[derive(Subcommand)]
enum LogsCommands {
    /// Most recent log events.
    Recent {
        #[arg(long, default_value_t = 100)]
        count: usize,
    },
    /// Log events for one issue.
    Issue { number: u64 },
    /// Log events from one named agent.
    Agent { name: String },
    /// Counts by level.
    Stats,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Best-effort: a config load failure here doesn't block the command --
    // `run` below reloads the config itself and surfaces any real error.
    let config_for_logging = config::load(cli.config.as_deref()).ok();
    let buffer_size = config_for_logging
        .as_ref()
        .map(|c| c.service.max_buffer_size)
        .unwrap_or(orch_core::logstream::DEFAULT_CAPACITY);
    let log_hub = Arc::new(LogHub::new(buffer_size));
    let _log_guard = logging::init(config_for_logging.as_ref(), Some(log_hub.clone()));

    match run(cli, log_hub).await {
        Ok(code) => ExitCode::from(code as u8),
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, log_hub: Arc<LogHub>) -> anyhow::Result<i32> {
    match cli.command {
        Commands::Config {
            command: ConfigCommands::Init { owner, repo, repo_path, force },
        } => {
            let path = config::init(cli.config.as_deref(), &owner, &repo, &repo_path, force)?;
            println!("Config written to {}", path.display());
            Ok(0)
        }
        Commands::Serve { static_dir } => {
            let loaded = config::load(cli.config.as_deref())?;
            serve_cmd::run(loaded, serve_cmd::ServeOptions { static_dir }, log_hub).await?;
            Ok(0)
        }
        Commands::Queue { command } => {
            let loaded = config::load(cli.config.as_deref())?;
            let client = api::ApiClient::new(server_base_url(&cli.server, &loaded));
            match command {
                QueueCommands::Enqueue { issue } => queue_cmd::run_enqueue(&client, issue).await?,
                QueueCommands::List => queue_cmd::run_list(&client).await?,
                QueueCommands::Remove { issue } => queue_cmd::run_remove(&client, issue).await?,
                QueueCommands::Clear => queue_cmd::run_clear(&client).await?,
                QueueCommands::Stats => queue_cmd::run_stats(&client).await?,
            }
            Ok(0)
        }
        Commands::Logs { command } => {
            let loaded = config::load(cli.config.as_deref())?;
            let client = api::ApiClient::new(server_base_url(&cli.server, &loaded));
            match command {
                LogsCommands::Recent { count } => logs_cmd::run_recent(&client, count).await?,
                LogsCommands::Issue { number } => logs_cmd::run_by_issue(&client, number).await?,
                LogsCommands::Agent { name } => logs_cmd::run_by_agent(&client, &name).await?,
                LogsCommands::Stats => logs_cmd::run_stats(&client).await?,
            }
            Ok(0)
        }
        Commands::Status { issue } => {
            let loaded = config::load(cli.config.as_deref())?;
            match issue {
                Some(number) => status_cmd::run_issue(&loaded, number).await,
                None => {
                    let client = api::ApiClient::new(server_base_url(&cli.server, &loaded));
                    status_cmd::run_overview(&client).await
                }
            }
        }
    }
}

/// Resolve the base URL for the `queue`/`logs`/`status` REST client:
/// `--server` if given, else derived from `service.host`/`service.port`
/// (with `0.0.0.0` mapped to a connectable loopback address).
fn server_base_url(cli_server: &Option<String>, config: &orch_core::config::Config) -> String {
    if let Some(server) = cli_server {
        return server.clone();
    }
    let host = if config.service.host == "0.0.0.0" { "127.0.0.1" } else { &config.service.host };
    format!("http://{host}:{port}", port = config.service.port)
}
