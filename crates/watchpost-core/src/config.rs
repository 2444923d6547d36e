use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Default dispatch channel capacity — bounds the number of distinct
/// job ids that can sit between "fired" and "picked up by a worker".
pub const DEFAULT_DISPATCH_CAPACITY: usize = 256;

/// Top-level config (watchpost.toml + WATCHPOST_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WatchpostConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    /// Directory where screenshots and diff images are written.
    #[serde(default = "default_artifacts_dir")]
    pub dir: String,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            dir: default_artifacts_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    /// Number of concurrent capture workers. Fixed at startup.
    #[serde(default = "default_worker_count")]
    pub count: usize,
    /// Hard cap on a single capture call, in seconds.
    #[serde(default = "default_capture_timeout")]
    pub capture_timeout_secs: u64,
    /// How long an in-flight capture may keep running after shutdown is
    /// requested before its run is marked failed.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            capture_timeout_secs: default_capture_timeout(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_dispatch_capacity")]
    pub capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            capacity: default_dispatch_capacity(),
        }
    }
}

/// Outbound notification settings for the default webhook notifier.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct NotifyConfig {
    /// When set, difference alerts are POSTed here as JSON.
    pub webhook_url: Option<String>,
}

fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.watchpost/watchpost.db", home)
}

fn default_artifacts_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.watchpost/artifacts", home)
}

fn default_worker_count() -> usize {
    4
}

fn default_capture_timeout() -> u64 {
    60
}

fn default_shutdown_grace() -> u64 {
    10
}

fn default_dispatch_capacity() -> usize {
    DEFAULT_DISPATCH_CAPACITY
}

impl WatchpostConfig {
    /// Load config from a TOML file with WATCHPOST_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.watchpost/watchpost.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);
        tracing::debug!(path, "loading config");

        let config: WatchpostConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("WATCHPOST_").split("_"))
            .extract()
            .map_err(|e| crate::error::WatchpostError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.watchpost/watchpost.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = WatchpostConfig::default();
        assert_eq!(cfg.workers.count, 4);
        assert_eq!(cfg.dispatch.capacity, DEFAULT_DISPATCH_CAPACITY);
        assert!(cfg.notify.webhook_url.is_none());
        assert!(cfg.database.path.ends_with("watchpost.db"));
    }
}
