//! Build reports

use crate::digest::Digest;
use crate::error::BuildError;
use crate::pipeline::{BuildStage, BuildState};
use crate::verify::VerificationReport;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a step's image came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepSource {
    /// Instructions executed by the engine
    Built,
    /// Reused through the layer cache index without contacting the builder
    Index,
    /// The engine's own layer cache matched every instruction
    Engine,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    pub stage: BuildStage,
    pub cache_key: Digest,
    pub image_id: String,
    pub source: StepSource,
    pub duration_ms: u64,
}

impl StepReport {
    pub fn cached(&self) -> bool {
        self.source != StepSource::Built
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<BuildStage>,
    pub message: String,
}

impl From<&BuildError> for FailureReport {
    fn from(error: &BuildError) -> Self {
        Self {
            kind: error.kind().to_string(),
            stage: error.stage(),
            message: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    pub recipe: String,
    pub base: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_image_id: Option<String>,
    pub state: BuildState,
    pub steps: Vec<StepReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReport>,
    pub duration_ms: u64,
}

impl BuildReport {
    pub fn new(recipe: impl Into<String>, base: impl Into<String>) -> Self {
        Self {
            recipe: recipe.into(),
            base: base.into(),
            base_image_id: None,
            state: BuildState::Pending,
            steps: Vec::new(),
            image_id: None,
            tag: None,
            verification: None,
            failure: None,
            duration_ms: 0,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state.is_ready() && self.failure.is_none()
    }

    pub fn step(&self, stage: BuildStage) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.stage == stage)
    }

    pub fn cached_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.cached()).count()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize build report to JSON")
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize build report to YAML")
    }
}

impl fmt::Display for BuildReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Recipe: {}", self.recipe)?;
        writeln!(f, "Base:   {}", self.base)?;
        if !self.steps.is_empty() {
            writeln!(f)?;
        }
        for step in &self.steps {
            let source = match step.source {
                StepSource::Built => format!("{}ms", step.duration_ms),
                StepSource::Index => "cached".to_string(),
                StepSource::Engine => "cached (engine)".to_string(),
            };
            writeln!(
                f,
                "  {}. {:<28} {}  {}",
                step.stage.number(),
                step.stage.to_string(),
                short_id(&step.image_id),
                source
            )?;
        }
        writeln!(f)?;
        match (&self.failure, &self.image_id) {
            (Some(failure), _) => match failure.stage {
                Some(stage) => writeln!(f, "Build failed at {}: {}", stage, failure.message)?,
                None => writeln!(f, "Build failed: {}", failure.message)?,
            },
            (None, Some(image_id)) => {
                write!(f, "Image:  {}", image_id)?;
                if let Some(tag) = &self.tag {
                    write!(f, " ({})", tag)?;
                }
                writeln!(f)?;
            }
            (None, None) => writeln!(f, "State:  {}", self.state)?,
        }
        if let Some(verification) = &self.verification {
            write!(f, "{}", verification)?;
        }
        Ok(())
    }
}

fn short_id(id: &str) -> &str {
    let hash = id.strip_prefix("sha256:").unwrap_or(id);
    &hash[..hash.len().min(12)]
}
