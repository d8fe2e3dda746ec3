//! Container engine backends
//!
//! The pipeline talks to the engine only through [`ImageBackend`]. The Docker
//! implementation drives a local daemon over its API; the mock keeps images in
//! memory and interprets the few instructions the builder emits.

pub mod docker;
pub mod mock;

pub use docker::DockerBackend;
pub use mock::MockBackend;

use crate::pipeline::BuildStage;
use crate::recipe::ImageRef;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Image not found: {0}")]
    ImageNotFound(String),

    #[error("{message}")]
    StepFailed { message: String, log: Vec<String> },

    #[error("Container engine unavailable: {0}")]
    Unavailable(String),

    #[error("Container engine error: {0}")]
    Engine(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackendError {
    /// Build output leading up to a failed step, if any
    pub fn log(&self) -> &[String] {
        match self {
            BackendError::StepFailed { log, .. } => log,
            _ => &[],
        }
    }
}

/// When the base image is fetched from its registry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullPolicy {
    /// Pull only when the image is not present locally
    #[default]
    Missing,
    Always,
    /// Never contact a registry
    Never,
}

impl FromStr for PullPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "missing" | "if-not-present" => Ok(PullPolicy::Missing),
            "always" => Ok(PullPolicy::Always),
            "never" => Ok(PullPolicy::Never),
            other => Err(format!(
                "Invalid pull policy '{}' (expected missing, always or never)",
                other
            )),
        }
    }
}

impl fmt::Display for PullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PullPolicy::Missing => "missing",
            PullPolicy::Always => "always",
            PullPolicy::Never => "never",
        };
        write!(f, "{}", name)
    }
}

/// A base reference pinned to a concrete local image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedImage {
    pub reference: String,
    pub id: String,
    pub pulled: bool,
}

/// One layered step submitted to the engine
#[derive(Debug, Clone)]
pub struct StepRequest {
    pub stage: BuildStage,
    pub parent: String,
    pub dockerfile: String,
    /// Build context archive (tar, optionally gzip-compressed) including the Dockerfile
    pub context: Vec<u8>,
    pub cache_key: String,
    /// Bypass the engine's own layer cache
    pub no_cache: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutput {
    pub image_id: String,
    /// The engine reused an existing layer instead of executing the step
    pub cached: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub log: Vec<String>,
}

/// Runtime configuration recorded in an image
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDetails {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ImageDetails {
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env.iter().rev().find_map(|entry| {
            entry
                .split_once('=')
                .filter(|(k, _)| *k == key)
                .map(|(_, v)| v)
        })
    }
}

#[async_trait]
pub trait ImageBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Finds the base image locally or pulls it, according to `policy`
    async fn resolve(&self, reference: &ImageRef, policy: PullPolicy) -> Result<ResolvedImage, BackendError>;

    async fn image_exists(&self, image: &str) -> Result<bool, BackendError>;

    /// Reads one file out of an image's filesystem; `None` when absent
    async fn read_file(&self, image: &str, path: &str) -> Result<Option<Vec<u8>>, BackendError>;

    async fn build_step(&self, request: StepRequest) -> Result<StepOutput, BackendError>;

    async fn tag(&self, image: &str, tag: &str) -> Result<(), BackendError>;

    async fn inspect(&self, image: &str) -> Result<ImageDetails, BackendError>;

    /// Tar archive of `path` inside the image, rooted at its final component
    async fn export_dir(&self, image: &str, path: &str) -> Result<Vec<u8>, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pull_policy_parse() {
        assert_eq!("missing".parse::<PullPolicy>().unwrap(), PullPolicy::Missing);
        assert_eq!("ALWAYS".parse::<PullPolicy>().unwrap(), PullPolicy::Always);
        assert_eq!("never".parse::<PullPolicy>().unwrap(), PullPolicy::Never);
        assert!("sometimes".parse::<PullPolicy>().is_err());
        assert_eq!(PullPolicy::default().to_string(), "missing");
    }

    #[test]
    fn test_env_value_last_wins() {
        let details = ImageDetails {
            env: vec![
                "PATH=/usr/bin".to_string(),
                "PYTHONUNBUFFERED=0".to_string(),
                "PYTHONUNBUFFERED=1".to_string(),
            ],
            ..Default::default()
        };
        assert_eq!(details.env_value("PYTHONUNBUFFERED"), Some("1"));
        assert_eq!(details.env_value("HOME"), None);
    }
}
