//! Build error taxonomy
//!
//! Every variant is fatal to the build. Errors carry enough context to name
//! the step that failed; the CLI prints `Build failed at <step>: <error>`.

use crate::backend::BackendError;
use crate::pipeline::{BuildStage, BuildState};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    /// The recipe or the manifest syntax is invalid; nothing was built
    #[error("Invalid recipe: {0}")]
    Recipe(String),

    #[error("Cannot resolve base image '{reference}': {reason}")]
    Resolution { reference: String, reason: String },

    #[error("Dependency installation failed: {0}")]
    Installation(String),

    #[error("Application placement failed: {0}")]
    Placement(String),

    #[error("Cannot create execution identity: {0}")]
    Identity(String),

    #[error("Container engine error during {stage}: {source}")]
    Backend {
        stage: BuildStage,
        #[source]
        source: BackendError,
    },

    #[error("Layer cache error: {0}")]
    Cache(String),

    #[error("{stage} timed out after {seconds}s")]
    Timeout { stage: BuildStage, seconds: u64 },

    #[error("Invalid build state transition from {from} to {to}")]
    InvalidTransition { from: BuildState, to: BuildState },

    #[error("Image verification failed: {0}")]
    Verification(String),
}

impl BuildError {
    /// The step the failure belongs to, if it happened inside one
    pub fn stage(&self) -> Option<BuildStage> {
        match self {
            BuildError::Resolution { .. } => Some(BuildStage::Base),
            BuildError::Installation(_) => Some(BuildStage::Dependencies),
            BuildError::Placement(_) => Some(BuildStage::Placement),
            BuildError::Identity(_) => Some(BuildStage::Privilege),
            BuildError::Backend { stage, .. } | BuildError::Timeout { stage, .. } => Some(*stage),
            BuildError::Verification(_) => Some(BuildStage::Finalize),
            BuildError::Recipe(_) | BuildError::Cache(_) | BuildError::InvalidTransition { .. } => {
                None
            }
        }
    }

    /// Short category name used in reports and JSON output
    pub fn kind(&self) -> &'static str {
        match self {
            BuildError::Recipe(_) => "recipe",
            BuildError::Resolution { .. } => "resolution",
            BuildError::Installation(_) => "installation",
            BuildError::Placement(_) => "placement",
            BuildError::Identity(_) => "identity",
            BuildError::Backend { .. } => "backend",
            BuildError::Cache(_) => "cache",
            BuildError::Timeout { .. } => "timeout",
            BuildError::InvalidTransition { .. } => "state",
            BuildError::Verification(_) => "verification",
        }
    }

    pub fn backend(stage: BuildStage, source: BackendError) -> Self {
        BuildError::Backend { stage, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_mapping() {
        assert_eq!(
            BuildError::Installation("x".into()).stage(),
            Some(BuildStage::Dependencies)
        );
        assert_eq!(
            BuildError::Identity("x".into()).stage(),
            Some(BuildStage::Privilege)
        );
        assert_eq!(BuildError::Recipe("x".into()).stage(), None);
        assert_eq!(
            BuildError::Timeout {
                stage: BuildStage::Placement,
                seconds: 5
            }
            .stage(),
            Some(BuildStage::Placement)
        );
    }

    #[test]
    fn test_display() {
        let err = BuildError::Resolution {
            reference: "python:9.9-nope".to_string(),
            reason: "manifest unknown".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Cannot resolve base image 'python:9.9-nope': manifest unknown"
        );
        assert_eq!(err.kind(), "resolution");
    }

    #[test]
    fn test_backend_source() {
        use std::error::Error as _;
        let err = BuildError::backend(
            BuildStage::Base,
            BackendError::Unavailable("socket missing".to_string()),
        );
        assert!(err.source().is_some());
        assert!(err.to_string().contains("base environment selection"));
    }
}
