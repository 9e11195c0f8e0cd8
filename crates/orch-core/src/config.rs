//! Configuration: the typed document every other component is built from,
//! plus legacy document-format migration.
//!
//! `orch-cli` owns *where* the document lives (XDG config dir, env vars,
//! CLI flags); this module owns *what* the document looks like and how an
//! old-format file is brought forward, since both are domain concerns
//! independent of the CLI.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use orch_ai::ModelRef;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

fn default_true() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    60_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub parallel: ParallelConfig,
    #[serde(default)]
    pub retry: RetryTuning,
    #[serde(default)]
    pub testing: TestingTuning,
    #[serde(default)]
    pub auto_approve: bool,
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_retries() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParallelConfig {
    /// Either an integer or the literal `"auto"` (logical CPU count), spec
    /// `execution.parallel.maxConcurrency`.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: MaxConcurrency,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self { max_concurrency: default_max_concurrency() }
    }
}

fn default_max_concurrency() -> MaxConcurrency {
    MaxConcurrency::Auto
}

/// `execution.parallel.maxConcurrency`: either a fixed integer or the
/// literal `"auto"`. Serde's untagged-enum derive expects unit
/// variants to come from JSON/TOML `null`, not the string `"auto"`, so this
/// gets a hand-written `Deserialize` instead.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MaxConcurrency {
    Fixed(usize),
    Auto,
}

impl MaxConcurrency {
    pub fn resolve(&self) -> usize {
        match self {
            MaxConcurrency::Fixed(n) => (*n).max(1),
            MaxConcurrency::Auto => num_cpus::get(),
        }
    }
}

impl<'de> serde::de::Deserialize<'de> for MaxConcurrency {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::de::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Int(usize),
            Str(String),
        }
        match Repr::deserialize(deserializer)? {
            Repr::Int(n) => Ok(MaxConcurrency::Fixed(n)),
            Repr::Str(s) if s == "auto" => Ok(MaxConcurrency::Auto),
            Repr::Str(other) => Err(serde::de::Error::custom(format!(
                "invalid maxConcurrency value: {other:?} (expected an integer or \"auto\")"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryTuning {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
}

impl Default for RetryTuning {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_multiplier: default_backoff_multiplier(),
            initial_delay_ms: default_initial_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_initial_delay_ms() -> u64 {
    500
}

impl RetryTuning {
    pub fn to_retry_config(&self) -> crate::retry::RetryConfig {
        crate::retry::RetryConfig {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            multiplier: self.backoff_multiplier,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestingTuning {
    #[serde(default)]
    pub continue_on_failure: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    pub model: ModelRef,
    pub agent: String,
    #[serde(default = "default_agent_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_agent_timeout_secs() -> u64 {
    600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    pub owner: String,
    pub repo: String,
    pub repo_path: String,
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    #[serde(default)]
    pub label_prefix: String,
    #[serde(default = "default_true")]
    pub create_pr: bool,
    #[serde(default)]
    pub auto_merge_pr: bool,
    #[serde(default)]
    pub close_sub_on_completion: bool,
}

fn default_base_branch() -> String {
    "main".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeConfig {
    pub base_path: String,
    #[serde(default)]
    pub cleanup_on_completion: bool,
    #[serde(default)]
    pub cleanup_on_failure: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationLevel {
    AllMajorEvents,
    StageTransitions,
    ErrorsOnly,
}

impl Default for NotificationLevel {
    fn default() -> Self {
        NotificationLevel::StageTransitions
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifierConfig {
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub notification_level: NotificationLevel,
    #[serde(default)]
    pub mention_roles: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusTableConfig {
    #[serde(default = "default_status_interval_secs")]
    pub update_interval_seconds: u64,
    #[serde(default)]
    pub show_retry_history: bool,
    #[serde(default = "default_max_retry_history")]
    pub max_retry_history_entries: usize,
}

impl Default for StatusTableConfig {
    fn default() -> Self {
        Self {
            update_interval_seconds: default_status_interval_secs(),
            show_retry_history: false,
            max_retry_history_entries: default_max_retry_history(),
        }
    }
}

fn default_status_interval_secs() -> u64 {
    60
}
fn default_max_retry_history() -> usize {
    10
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevelConfig {
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for LogLevelConfig {
    fn default() -> Self {
        LogLevelConfig::Info
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevelConfig,
    #[serde(default)]
    pub debug_mode: bool,
    pub log_dir: String,
    #[serde(default)]
    pub debug_log_dir: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_queue_label")]
    pub queue_label: String,
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_port(),
            host: default_host(),
            poll_interval_ms: default_poll_interval_ms(),
            queue_label: default_queue_label(),
            max_buffer_size: default_max_buffer_size(),
        }
    }
}

fn default_port() -> u16 {
    4180
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_queue_label() -> String {
    "queue".to_string()
}
fn default_max_buffer_size() -> usize {
    crate::logstream::DEFAULT_CAPACITY
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResilienceFeatures {
    #[serde(default = "default_true")]
    pub hang_recovery: bool,
    #[serde(default)]
    pub use_ocr_client_events: bool,
    #[serde(default = "default_true")]
    pub poll_based_fallback: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelFailoverConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_failover_timeout_secs")]
    pub timeout_threshold_seconds: u64,
    #[serde(default = "default_max_failovers_per_agent")]
    pub max_failovers_per_agent: u32,
    #[serde(default)]
    pub failback_models: HashMap<String, ModelRef>,
}

impl Default for ModelFailoverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_threshold_seconds: default_failover_timeout_secs(),
            max_failovers_per_agent: default_max_failovers_per_agent(),
            failback_models: HashMap::new(),
        }
    }
}

fn default_failover_timeout_secs() -> u64 {
    600
}
fn default_max_failovers_per_agent() -> u32 {
    crate::resilience::DEFAULT_MAX_FAILOVERS_PER_AGENT
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusResilienceConfig {
    #[serde(default)]
    pub features: ResilienceFeatures,
    #[serde(default)]
    pub model_failover: ModelFailoverConfig,
}

/// The full configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub agents: HashMap<String, AgentSettings>,
    pub tracker: TrackerConfig,
    pub worktree: WorktreeConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub status_table: StatusTableConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub status_resilience: StatusResilienceConfig,
}

impl Config {
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Build [`crate::context::StageSettings`] from this document.
    pub fn stage_settings(&self) -> crate::context::StageSettings {
        crate::context::StageSettings {
            base_branch: self.tracker.base_branch.clone(),
            label_prefix: self.tracker.label_prefix.clone(),
            max_concurrency: self.execution.parallel.max_concurrency.resolve(),
            create_pr: self.tracker.create_pr,
            close_sub_on_completion: self.tracker.close_sub_on_completion,
            cleanup_on_completion: self.worktree.cleanup_on_completion,
            cleanup_on_failure: self.worktree.cleanup_on_failure,
            auto_approve: self.execution.auto_approve,
            approval_poll_interval: Duration::from_secs(5),
            max_fix_attempts: 10,
        }
    }
}

/// Migrates a legacy document-format config (`_comment*` keys mixed into a
/// JSON or TOML table) into the current [`Config`] shape, stripping the
/// comment keys. The caller is expected to back up the original file
/// before calling this.
pub fn migrate_legacy(raw_json: &str) -> Result<Config, ConfigError> {
    let mut value: serde_json::Value =
        serde_json::from_str(raw_json).map_err(|_| ConfigError::MissingField("valid JSON or legacy document"))?;

    strip_comment_keys(&mut value);

    let config: Config = serde_json::from_value(value)
        .map_err(|_| ConfigError::MissingField("config shape after legacy migration"))?;
    Ok(config)
}

fn strip_comment_keys(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            map.retain(|k, _| !k.starts_with("_comment"));
            for v in map.values_mut() {
                strip_comment_keys(v);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                strip_comment_keys(item);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_toml() -> &'static str {
        r#"
            [execution]
            base_url = "https://ai.example.com"

            [tracker]
            owner = "acme"
            repo = "widgets"
            repo_path = "/srv/widgets"

            [worktree]
            base_path = "/srv/worktrees"

            [logging]
            log_dir = "/var/log/orch"
        "#
    }

    #[test]
    fn parses_minimal_document_with_defaults_filled_in() {
        let config = Config::from_toml(sample_toml()).unwrap();
        assert_eq!(config.tracker.base_branch, "main");
        assert_eq!(config.execution.retries, 3);
        assert_eq!(config.service.port, 4180);
        assert_eq!(config.status_resilience.model_failover.max_failovers_per_agent, 2);
    }

    #[test]
    fn max_concurrency_auto_resolves_to_cpu_count() {
        let config = Config::from_toml(sample_toml()).unwrap();
        assert_eq!(
            config.execution.parallel.max_concurrency.resolve(),
            num_cpus::get()
        );
    }

    #[test]
    fn round_trips_through_toml() {
        let config = Config::from_toml(sample_toml()).unwrap();
        let rendered = config.to_toml().unwrap();
        let reparsed = Config::from_toml(&rendered).unwrap();
        assert_eq!(reparsed.tracker.owner, config.tracker.owner);
    }

    #[test]
    fn legacy_migration_strips_comment_keys() {
        let legacy = r#"{
            "_comment": "this is a legacy file",
            "execution": { "_comment_base_url": "points at prod", "base_url": "https://ai.example.com" },
            "tracker": { "owner": "acme", "repo": "widgets", "repo_path": "/srv/widgets" },
            "worktree": { "base_path": "/srv/worktrees" },
            "logging": { "log_dir": "/var/log/orch" }
        }"#;
        let config = migrate_legacy(legacy).unwrap();
        assert_eq!(config.execution.base_url, "https://ai.example.com");
        assert_eq!(config.tracker.owner, "acme");
    }

    #[test]
    fn stage_settings_carries_tracker_and_worktree_fields() {
        let config = Config::from_toml(sample_toml()).unwrap();
        let settings = config.stage_settings();
        assert_eq!(settings.base_branch, "main");
        assert!(settings.create_pr);
        assert!(!settings.cleanup_on_failure);
    }
}
