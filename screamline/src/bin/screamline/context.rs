use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use screamline::{DEFAULT_STREAM_MAX_LEN, TriggerSettings, WorkerSettings};

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "screamline.toml";

/// Contents of `screamline.toml`. Every section and key is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScreamlineConfig {
    #[serde(default)]
    pub redis: RedisSettings,
    #[serde(default)]
    pub triggers: TriggerSettings,
    #[serde(default)]
    pub worker: WorkerSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedisSettings {
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_service")]
    pub service: String,
    /// Approximate cap on the change stream length; 0 disables trimming.
    #[serde(default = "default_stream_max_len")]
    pub stream_max_len: usize,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            prefix: default_prefix(),
            service: default_service(),
            stream_max_len: default_stream_max_len(),
        }
    }
}

fn default_redis_url() -> String {
    "${REDIS_URL}".to_string()
}

fn default_prefix() -> String {
    "screamline".to_string()
}

fn default_service() -> String {
    "social".to_string()
}

fn default_stream_max_len() -> usize {
    DEFAULT_STREAM_MAX_LEN
}

/// Resolved configuration plus where it came from.
pub struct RunContext {
    pub config_path: Option<PathBuf>,
    pub config: ScreamlineConfig,
}

impl RunContext {
    /// Loads `explicit` when given (it must exist), otherwise `screamline.toml`
    /// from the working directory if present, otherwise defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => {
                let current_dir = std::env::current_dir().context("Failed to get current directory")?;
                let candidate = current_dir.join(DEFAULT_CONFIG_FILE);
                if candidate.exists() {
                    Self::from_file(&candidate)
                } else {
                    Ok(Self {
                        config_path: None,
                        config: ScreamlineConfig::default(),
                    })
                }
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let config: ScreamlineConfig =
            toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(Self {
            config_path: Some(path.to_path_buf()),
            config,
        })
    }

    /// The Redis URL with a whole-value `${VAR}` reference expanded.
    pub fn redis_url(&self) -> Result<String> {
        let url = self.config.redis.url.as_str();
        if let Some(var_name) = url.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
            std::env::var(var_name).with_context(|| format!("Environment variable {var_name} not set"))
        } else {
            Ok(url.to_string())
        }
    }
}
