//! Runtime configuration for the sync engine.

use std::{
    env, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the daemon looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/sync.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "PLAYVEX_SYNC_CONFIG_PATH";

const DEFAULT_DATA_DIR: &str = "data";
const DEFAULT_QUIET_WINDOW: Duration = Duration::from_millis(500);
const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_RECONCILE_BUDGET: Duration = Duration::from_secs(30);
const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(120);

/// Immutable runtime configuration shared across the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Directory holding the device-local blobs.
    pub data_dir: PathBuf,
    /// Quiet window of the per-slug remote write debounce.
    pub write_quiet_window: Duration,
    /// Bound on each remote mirror call.
    pub remote_timeout: Duration,
    /// Bound on a whole reconciliation pass.
    pub reconcile_budget: Duration,
    /// Bound on each identity provider call.
    pub provider_timeout: Duration,
    /// Simulated local storage quota; `None` means unlimited.
    pub storage_quota_bytes: Option<usize>,
}

impl SyncConfig {
    /// Load the configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        Self::load_from(&resolve_config_path())
    }

    /// Load from an explicit path with the same fallbacks as [`SyncConfig::load`].
    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        data_dir = %config.data_dir.display(),
                        "loaded sync config"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            write_quiet_window: DEFAULT_QUIET_WINDOW,
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
            reconcile_budget: DEFAULT_RECONCILE_BUDGET,
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
            storage_quota_bytes: None,
        }
    }
}

/// JSON representation of the configuration file; every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    data_dir: Option<PathBuf>,
    write_quiet_window_ms: Option<u64>,
    remote_timeout_ms: Option<u64>,
    reconcile_budget_ms: Option<u64>,
    provider_timeout_ms: Option<u64>,
    storage_quota_bytes: Option<usize>,
}

impl From<RawConfig> for SyncConfig {
    fn from(raw: RawConfig) -> Self {
        let defaults = SyncConfig::default();
        let millis = |value: Option<u64>, fallback: Duration| {
            value.map(Duration::from_millis).unwrap_or(fallback)
        };
        Self {
            data_dir: raw.data_dir.unwrap_or(defaults.data_dir),
            write_quiet_window: millis(raw.write_quiet_window_ms, defaults.write_quiet_window),
            remote_timeout: millis(raw.remote_timeout_ms, defaults.remote_timeout),
            reconcile_budget: millis(raw.reconcile_budget_ms, defaults.reconcile_budget),
            provider_timeout: millis(raw.provider_timeout_ms, defaults.provider_timeout),
            storage_quota_bytes: raw.storage_quota_bytes,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SyncConfig::load_from(&dir.path().join("absent.json"));
        assert_eq!(config, SyncConfig::default());
        assert_eq!(config.write_quiet_window, Duration::from_millis(500));
    }

    #[test]
    fn partial_file_overrides_only_given_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.json");
        fs::write(&path, r#"{ "remote_timeout_ms": 250, "storage_quota_bytes": 4096 }"#).unwrap();

        let config = SyncConfig::load_from(&path);
        assert_eq!(config.remote_timeout, Duration::from_millis(250));
        assert_eq!(config.storage_quota_bytes, Some(4096));
        assert_eq!(config.reconcile_budget, DEFAULT_RECONCILE_BUDGET);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.json");
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(SyncConfig::load_from(&path), SyncConfig::default());
    }
}
