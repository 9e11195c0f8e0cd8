//! Configuration file management for `orch`: an XDG config directory, a
//! resolution chain (CLI flag > env var > config file > default), and
//! legacy document-format migration with a backup of the original file.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};

use orch_core::config::{Config, migrate_legacy};

/// Return the `orch` config directory: `$XDG_CONFIG_HOME/orch` or
/// `~/.config/orch`. Platform-specific dirs (e.g. macOS's Application
/// Support) are intentionally not used.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("orch");
    }
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".config").join("orch")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Load and parse the config file at the resolved path, migrating a
/// legacy document-format file in place if one is found.
///
/// Resolution chain for the *path itself*: `cli_path` > `ORCH_CONFIG_PATH`
/// env var > the XDG default.
pub fn load(cli_path: Option<&str>) -> Result<Config> {
    let path = resolve_path(cli_path);
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;

    match Config::from_toml(&raw) {
        Ok(config) => Ok(config),
        Err(toml_err) => migrate_and_reload(&path, &raw).with_context(|| {
            format!(
                "config file at {} is neither a valid current-format document ({toml_err}) nor a migratable legacy document",
                path.display()
            )
        }),
    }
}

fn resolve_path(cli_path: Option<&str>) -> PathBuf {
    if let Some(p) = cli_path {
        return PathBuf::from(p);
    }
    if let Ok(p) = std::env::var("ORCH_CONFIG_PATH") {
        return PathBuf::from(p);
    }
    config_path()
}

/// Attempt legacy-document migration: parse as lenient JSON (legacy files
/// carry `_comment*` keys that are not valid TOML comments), strip comment
/// keys, back up the original, and rewrite in the current TOML format.
fn migrate_and_reload(path: &std::path::Path, raw: &str) -> Result<Config> {
    let config = migrate_legacy(raw).context("legacy migration failed")?;

    let backup_path = path.with_extension("toml.bak");
    std::fs::copy(path, &backup_path)
        .with_context(|| format!("failed to back up legacy config to {}", backup_path.display()))?;

    let rewritten = config.to_toml().context("failed to serialize migrated config")?;
    std::fs::write(path, rewritten)
        .with_context(|| format!("failed to rewrite migrated config at {}", path.display()))?;

    tracing::info!(
        original = %path.display(),
        backup = %backup_path.display(),
        "migrated legacy-format config file"
    );
    Ok(config)
}

/// Write a starter config document, failing if one already exists unless
/// `force` is set.
pub fn init(cli_path: Option<&str>, owner: &str, repo: &str, repo_path: &str, force: bool) -> Result<PathBuf> {
    let path = resolve_path(cli_path);
    if path.exists() && !force {
        bail!("config file already exists at {}\nUse --force to overwrite.", path.display());
    }

    let starter = starter_config(owner, repo, repo_path);
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }
    let rendered = starter.to_toml().context("failed to serialize starter config")?;
    std::fs::write(&path, rendered).with_context(|| format!("failed to write config file at {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }

    Ok(path)
}

fn starter_config(owner: &str, repo: &str, repo_path: &str) -> Config {
    use orch_core::config::*;
    use std::collections::HashMap;

    Config {
        execution: ExecutionConfig {
            base_url: "https://ai.example.com".to_string(),
            timeout_secs: 300,
            retries: 3,
            poll_interval_ms: 60_000,
            parallel: ParallelConfig::default(),
            retry: RetryTuning::default(),
            testing: TestingTuning::default(),
            auto_approve: false,
        },
        agents: HashMap::new(),
        tracker: TrackerConfig {
            owner: owner.to_string(),
            repo: repo.to_string(),
            repo_path: repo_path.to_string(),
            base_branch: "main".to_string(),
            label_prefix: String::new(),
            create_pr: true,
            auto_merge_pr: false,
            close_sub_on_completion: true,
        },
        worktree: WorktreeConfig {
            base_path: "/tmp/orch-worktrees".to_string(),
            cleanup_on_completion: false,
            cleanup_on_failure: false,
        },
        notifier: NotifierConfig::default(),
        status_table: StatusTableConfig::default(),
        logging: LoggingConfig {
            level: LogLevelConfig::Info,
            debug_mode: false,
            log_dir: "/var/log/orch".to_string(),
            debug_log_dir: None,
        },
        service: ServiceConfig::default(),
        status_resilience: StatusResilienceConfig::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starter_config_round_trips_through_toml() {
        let config = starter_config("acme", "widgets", "/srv/widgets");
        let rendered = config.to_toml().unwrap();
        let reparsed = Config::from_toml(&rendered).unwrap();
        assert_eq!(reparsed.tracker.owner, "acme");
    }

    #[test]
    fn init_refuses_to_overwrite_without_force() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "not a real config").unwrap();

        let result = init(Some(path.to_str().unwrap()), "acme", "widgets", "/srv/widgets", false);
        assert!(result.is_err());
    }

    #[test]
    fn init_then_load_round_trips() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");

        init(Some(path.to_str().unwrap()), "acme", "widgets", "/srv/widgets", false).unwrap();
        let loaded = load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(loaded.tracker.owner, "acme");
        assert_eq!(loaded.tracker.repo, "widgets");
    }

    #[test]
    fn load_migrates_legacy_document_and_backs_it_up() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"{
                "_comment": "legacy",
                "execution": { "base_url": "https://ai.example.com" },
                "tracker": { "owner": "acme", "repo": "widgets", "repo_path": "/srv/widgets" },
                "worktree": { "base_path": "/srv/worktrees" },
                "logging": { "log_dir": "/var/log/orch" }
            }"#,
        )
        .unwrap();

        let config = load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(config.tracker.owner, "acme");
        assert!(path.with_extension("toml.bak").exists());

        // The file on disk should now be valid TOML.
        let rewritten = std::fs::read_to_string(&path).unwrap();
        Config::from_toml(&rewritten).unwrap();
    }
}
