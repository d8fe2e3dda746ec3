//! Configuration management for boxwright
//!
//! Settings are loaded from environment variables with defaults. CLI flags
//! override them per build.
//!
//! # Environment Variables
//!
//! - `BOXWRIGHT_CACHE_ENABLED`: Use the layer cache index (true|false) - default: "true"
//! - `BOXWRIGHT_CACHE_DIR`: Cache directory - default: user cache dir + "boxwright"
//! - `BOXWRIGHT_PULL_POLICY`: When to pull the base image (missing|always|never) - default: "missing"
//! - `BOXWRIGHT_STEP_TIMEOUT`: Seconds a single build step may take, 0 for no limit - default: "0"
//! - `BOXWRIGHT_VERIFY`: Verify images before tagging (true|false) - default: "true"
//! - `BOXWRIGHT_LOG_LEVEL`: Logging level - default: "info"
//! - `BOXWRIGHT_LOG_JSON`: Emit logs as JSON lines (true|false) - default: "false"
//!
//! # Example
//!
//! ```no_run
//! use boxwright::BuilderConfig;
//!
//! let config = BuilderConfig::default();
//! config.validate().expect("Invalid configuration");
//! let pipeline = config.pipeline_config();
//! ```

use crate::backend::PullPolicy;
use crate::cache::LayerCache;
use crate::pipeline::PipelineConfig;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub const ENV_CACHE_ENABLED: &str = "BOXWRIGHT_CACHE_ENABLED";
pub const ENV_CACHE_DIR: &str = "BOXWRIGHT_CACHE_DIR";
pub const ENV_PULL_POLICY: &str = "BOXWRIGHT_PULL_POLICY";
pub const ENV_STEP_TIMEOUT: &str = "BOXWRIGHT_STEP_TIMEOUT";
pub const ENV_VERIFY: &str = "BOXWRIGHT_VERIFY";
pub const ENV_LOG_LEVEL: &str = "BOXWRIGHT_LOG_LEVEL";
pub const ENV_LOG_JSON: &str = "BOXWRIGHT_LOG_JSON";

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_CACHE_ENABLED: bool = true;
const DEFAULT_VERIFY: bool = true;
const MAX_STEP_TIMEOUT_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Failed to parse {field}: {error}")]
    ParseError { field: String, error: String },

    #[error("Cannot open layer cache: {0}")]
    CacheUnavailable(String),
}

#[derive(Debug, Clone)]
pub struct BuilderConfig {
    pub cache_enabled: bool,

    /// Root of the layer cache; one index per backend lives below it
    pub cache_dir: Option<PathBuf>,

    pub pull_policy: PullPolicy,

    /// 0 disables the per-step limit
    pub step_timeout_secs: u64,

    pub verify: bool,

    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,

    pub log_json: bool,
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().to_lowercase().parse::<bool>().ok())
        .unwrap_or(default)
}

impl Default for BuilderConfig {
    /// Loads BOXWRIGHT_* environment variables, falling back to defaults
    /// for missing or unparsable values
    fn default() -> Self {
        let cache_enabled = env_bool(ENV_CACHE_ENABLED, DEFAULT_CACHE_ENABLED);

        let cache_dir = env::var(ENV_CACHE_DIR)
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .or_else(|| {
                if cache_enabled {
                    Some(
                        dirs::cache_dir()
                            .unwrap_or_else(env::temp_dir)
                            .join("boxwright"),
                    )
                } else {
                    None
                }
            });

        let pull_policy = match env::var(ENV_PULL_POLICY) {
            Ok(value) => value.parse().unwrap_or_else(|e| {
                warn!("Ignoring {}: {}", ENV_PULL_POLICY, e);
                PullPolicy::default()
            }),
            Err(_) => PullPolicy::default(),
        };

        let step_timeout_secs = env::var(ENV_STEP_TIMEOUT)
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(0);

        let log_level = env::var(ENV_LOG_LEVEL)
            .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string())
            .to_lowercase();

        Self {
            cache_enabled,
            cache_dir,
            pull_policy,
            step_timeout_secs,
            verify: env_bool(ENV_VERIFY, DEFAULT_VERIFY),
            log_level,
            log_json: env_bool(ENV_LOG_JSON, false),
        }
    }
}

impl BuilderConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.step_timeout_secs > MAX_STEP_TIMEOUT_SECS {
            return Err(ConfigError::ValidationFailed(format!(
                "Step timeout cannot exceed {} seconds",
                MAX_STEP_TIMEOUT_SECS
            )));
        }

        if self.cache_enabled && self.cache_dir.is_none() {
            return Err(ConfigError::ValidationFailed(
                "Caching is enabled but no cache directory is set".to_string(),
            ));
        }

        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::ValidationFailed(format!(
                    "Invalid log level: {}. Valid options: trace, debug, info, warn, error",
                    self.log_level
                )))
            }
        }

        Ok(())
    }

    pub fn step_timeout(&self) -> Option<Duration> {
        (self.step_timeout_secs > 0).then(|| Duration::from_secs(self.step_timeout_secs))
    }

    /// Cache directory for one backend; image ids are only meaningful to
    /// the engine that produced them
    pub fn cache_path(&self, backend_name: &str) -> Option<PathBuf> {
        if !self.cache_enabled {
            return None;
        }
        let safe_name = backend_name.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
        self.cache_dir.as_ref().map(|dir| dir.join(safe_name))
    }

    pub fn open_cache(&self, backend_name: &str) -> Result<Option<LayerCache>, ConfigError> {
        self.cache_path(backend_name)
            .map(|path| {
                LayerCache::open(path).map_err(|e| ConfigError::CacheUnavailable(format!("{:#}", e)))
            })
            .transpose()
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig::new()
            .with_pull_policy(self.pull_policy)
            .with_verify(self.verify)
            .with_step_timeout(self.step_timeout())
    }

    pub fn to_display_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();

        map.insert("cache_enabled".to_string(), self.cache_enabled.to_string());
        if let Some(ref dir) = self.cache_dir {
            map.insert("cache_dir".to_string(), dir.display().to_string());
        }
        map.insert("pull_policy".to_string(), self.pull_policy.to_string());
        map.insert(
            "step_timeout_secs".to_string(),
            self.step_timeout_secs.to_string(),
        );
        map.insert("verify".to_string(), self.verify.to_string());
        map.insert("log_level".to_string(), self.log_level.clone());
        map.insert("log_json".to_string(), self.log_json.to_string());

        map
    }
}

impl fmt::Display for BuilderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Boxwright Configuration:")?;
        writeln!(f, "  Cache Enabled: {}", self.cache_enabled)?;
        if let Some(ref dir) = self.cache_dir {
            writeln!(f, "  Cache Dir: {}", dir.display())?;
        }
        writeln!(f, "  Pull Policy: {}", self.pull_policy)?;
        match self.step_timeout() {
            Some(timeout) => writeln!(f, "  Step Timeout: {}s", timeout.as_secs())?,
            None => writeln!(f, "  Step Timeout: none")?,
        }
        writeln!(f, "  Verify: {}", self.verify)?;
        writeln!(f, "  Log Level: {}", self.log_level)?;
        Ok(())
    }
}
