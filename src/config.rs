use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

pub const CONFIG_ENV: &str = "LOADMASTER_BRIDGE_CONFIG";
const CONFIG_FILE_NAME: &str = "bridge.yaml";

const DEFAULT_CALL_SYNC_TIMEOUT_MS: u64 = 250;
const DEFAULT_MAX_PENDING_JOBS: usize = 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read bridge config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Tunables for one bridge instance.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Upper bound for a blocking native -> runtime call.
    pub call_sync_timeout_ms: u64,
    /// Promise jobs drained per runtime turn before yielding.
    pub max_pending_jobs: usize,
    pub memory_limit_bytes: Option<usize>,
    pub max_stack_size: Option<usize>,
    /// Component passed to `AppRegistry.runApplication` once the bundle has
    /// been evaluated. `None` means the bundle renders on its own.
    pub app_name: Option<String>,
    pub initial_props: JsonValue,
    /// Console messages containing any of these substrings are dropped.
    pub ignore_logs: Vec<String>,
    /// Reload the page whenever a file bundle changes on disk.
    pub watch_bundle: bool,
    /// Base directory for relative bundle paths.
    pub bundle_root: Option<PathBuf>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            call_sync_timeout_ms: DEFAULT_CALL_SYNC_TIMEOUT_MS,
            max_pending_jobs: DEFAULT_MAX_PENDING_JOBS,
            memory_limit_bytes: None,
            max_stack_size: None,
            app_name: None,
            initial_props: JsonValue::Object(Default::default()),
            ignore_logs: Vec::new(),
            watch_bundle: false,
            bundle_root: None,
        }
    }
}

impl BridgeConfig {
    /// Load from `config_path`, falling back to defaults when no file exists.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config = match config_path {
            Some(path) if path.exists() => {
                let contents = fs::read_to_string(path)?;
                serde_yaml::from_str::<BridgeConfig>(&contents)?
            }
            _ => BridgeConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Resolve the config path from the environment, then the platform config
    /// directory.
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_ENV)
            .ok()
            .map(PathBuf::from)
            .or_else(default_config_path);
        Self::load(path)
    }

    pub fn call_sync_timeout(&self) -> Duration {
        Duration::from_millis(self.call_sync_timeout_ms)
    }

    /// Reject values no runtime can work with. `load` runs this, and so does
    /// instance creation for configs built in code.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.call_sync_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "call_sync_timeout_ms",
                reason: "must be greater than zero".into(),
            });
        }
        if self.max_pending_jobs == 0 {
            return Err(ConfigError::Invalid {
                field: "max_pending_jobs",
                reason: "must be greater than zero".into(),
            });
        }
        if let Some(name) = &self.app_name {
            if name.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field: "app_name",
                    reason: "must not be blank".into(),
                });
            }
        }
        Ok(())
    }
}

/// Whether a console message matches one of the `ignore_logs` substrings.
pub(crate) fn is_ignored_log(patterns: &[String], message: &str) -> bool {
    patterns
        .iter()
        .any(|pattern| !pattern.is_empty() && message.contains(pattern.as_str()))
}

fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("app", "loadmaster", "loadmaster")
        .map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}
