use crate::error::BuildError;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::phase_trait::BuildPhase;
use crate::pipeline::BuildStage;
use crate::verify::{verify_image, Expectations};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Verifies the finished image and tags it. Nothing is tagged unless every
/// earlier step and the verification succeeded.
pub struct FinalizePhase;

#[async_trait]
impl BuildPhase for FinalizePhase {
    fn name(&self) -> &'static str {
        "FinalizePhase"
    }

    fn stage(&self) -> BuildStage {
        BuildStage::Finalize
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<(), BuildError> {
        let (_, image) = ctx.head(self.stage())?;
        let image = image.to_string();
        let backend = Arc::clone(&ctx.backend);

        if ctx.config.verify {
            let expected = Expectations::from_recipe(ctx.recipe(), ctx.snapshot.clone());
            let report = verify_image(backend.as_ref(), &image, &expected)
                .await
                .map_err(|e| BuildError::backend(BuildStage::Finalize, e))?;
            let passed = report.passed();
            let summary = report.failure_summary();
            ctx.verification = Some(report);
            if !passed {
                warn!(image = %image, "Produced image does not hold its invariants");
                return Err(BuildError::Verification(summary));
            }
        }

        let tag = ctx.loaded.image_tag(ctx.config.tag.as_deref());
        backend
            .tag(&image, &tag)
            .await
            .map_err(|e| BuildError::backend(BuildStage::Finalize, e))?;
        info!(image = %image, tag = %tag, "Image ready");
        ctx.tag = Some(tag);
        Ok(())
    }
}
