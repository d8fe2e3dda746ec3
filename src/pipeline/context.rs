//! Mutable state threaded through the build phases

use std::sync::Arc;

use crate::backend::{ImageBackend, ResolvedImage};
use crate::cache::LayerCache;
use crate::context::TreeSnapshot;
use crate::error::BuildError;
use crate::identity::BaseIdentityInfo;
use crate::plan::PlanStep;
use crate::recipe::{BuildRecipe, DependencyManifest, LoadedRecipe};
use crate::report::StepReport;
use crate::verify::VerificationReport;

use super::config::PipelineConfig;
use super::state::{BuildStage, BuildState};

/// Long-lived dependencies plus the results each phase leaves for the next
pub struct PipelineContext {
    pub loaded: LoadedRecipe,
    pub backend: Arc<dyn ImageBackend>,
    /// Layer cache index; `None` when caching is disabled
    pub cache: Option<LayerCache>,
    pub config: PipelineConfig,
    pub state: BuildState,

    // Phase results
    pub base: Option<ResolvedImage>,
    pub identity: Option<BaseIdentityInfo>,
    pub manifest: Option<DependencyManifest>,
    pub snapshot: Option<TreeSnapshot>,
    pub head: Option<(PlanStep, String)>,
    pub steps: Vec<StepReport>,
    pub tag: Option<String>,
    pub verification: Option<VerificationReport>,
}

impl PipelineContext {
    pub fn new(
        loaded: LoadedRecipe,
        backend: Arc<dyn ImageBackend>,
        cache: Option<LayerCache>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            loaded,
            backend,
            cache,
            config,
            state: BuildState::Pending,
            base: None,
            identity: None,
            manifest: None,
            snapshot: None,
            head: None,
            steps: Vec::new(),
            tag: None,
            verification: None,
        }
    }

    pub fn recipe(&self) -> &BuildRecipe {
        &self.loaded.recipe
    }

    /// Image produced by the last completed step, with its plan step
    pub fn head(&self, stage: BuildStage) -> Result<(&PlanStep, &str), BuildError> {
        self.head
            .as_ref()
            .map(|(step, image)| (step, image.as_str()))
            .ok_or(BuildError::InvalidTransition {
                from: self.state,
                to: stage.completes(),
            })
    }

    pub fn image_id(&self) -> Option<&str> {
        self.head.as_ref().map(|(_, image)| image.as_str())
    }

    pub fn last_step(&self) -> Option<&StepReport> {
        self.steps.last()
    }

    /// Records a finished step and makes its image the parent of the next one
    pub fn push_step(&mut self, step: PlanStep, report: StepReport) {
        self.head = Some((step, report.image_id.clone()));
        self.steps.push(report);
    }
}
