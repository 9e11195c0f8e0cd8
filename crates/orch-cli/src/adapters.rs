//! Construction of the concrete `Tracker` implementation from a loaded
//! [`Config`], shared by the `serve` and `status` commands.

use std::sync::Arc;

use anyhow::{Context, Result};

use orch_core::config::Config;
use orch_tracker::{GitHubTracker, Tracker};

/// Name of the environment variable carrying the tracker's access token.
pub const TRACKER_TOKEN_ENV: &str = "ORCH_TRACKER_TOKEN";

pub fn build_tracker(config: &Config) -> Result<Arc<dyn Tracker>> {
    let token = std::env::var(TRACKER_TOKEN_ENV)
        .with_context(|| format!("{TRACKER_TOKEN_ENV} must be set in the environment"))?;
    let tracker = GitHubTracker::new(token, &config.tracker.owner, &config.tracker.repo)
        .context("failed to build GitHub tracker client")?;
    Ok(Arc::new(tracker))
}
