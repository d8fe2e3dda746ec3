use crate::backend::{BackendError, StepRequest};
use crate::context::{BuildContext, DOCKERFILE_NAME};
use crate::error::BuildError;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::BuildStage;
use crate::plan::PlanStep;
use crate::report::{StepReport, StepSource};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

pub fn cache_error(error: anyhow::Error) -> BuildError {
    BuildError::Cache(format!("{:#}", error))
}

/// Maps an engine failure inside a step onto the step's error category
pub fn step_failure(stage: BuildStage, base: &str, error: BackendError) -> BuildError {
    match error {
        BackendError::StepFailed { message, log } => {
            for line in &log {
                debug!(step = stage.number(), "{}", line);
            }
            match stage {
                BuildStage::Base => BuildError::Resolution {
                    reference: base.to_string(),
                    reason: message,
                },
                BuildStage::Dependencies => BuildError::Installation(message),
                BuildStage::Placement => BuildError::Placement(message),
                BuildStage::Privilege => BuildError::Identity(message),
                BuildStage::Finalize => BuildError::backend(
                    stage,
                    BackendError::StepFailed {
                        message,
                        log: Vec::new(),
                    },
                ),
            }
        }
        other => BuildError::backend(stage, other),
    }
}

/// Produces the image for one layered step on top of `parent`.
///
/// A layer cache hit whose image still exists skips the engine entirely;
/// otherwise the step's Dockerfile is added to `files` and submitted.
pub async fn run_step(
    ctx: &mut PipelineContext,
    step: PlanStep,
    parent: String,
    mut files: BuildContext,
) -> Result<(), BuildError> {
    let stage = step.stage;
    let started = Instant::now();
    let backend = Arc::clone(&ctx.backend);
    let cache = if ctx.config.no_cache {
        None
    } else {
        ctx.cache.clone()
    };

    if let Some(cache) = &cache {
        if let Some(record) = cache.lookup(&step.cache_key).map_err(cache_error)? {
            let present = backend
                .image_exists(&record.image_id)
                .await
                .map_err(|e| BuildError::backend(stage, e))?;
            if present {
                debug!(
                    step = stage.number(),
                    key = %step.cache_key.short(),
                    "Layer cache hit"
                );
                cache.touch(&step.cache_key).map_err(cache_error)?;
                let report = StepReport {
                    stage,
                    cache_key: step.cache_key.clone(),
                    image_id: record.image_id,
                    source: StepSource::Index,
                    duration_ms: started.elapsed().as_millis() as u64,
                };
                ctx.push_step(step, report);
                return Ok(());
            }
            debug!(
                step = stage.number(),
                image = %record.image_id,
                "Cached image no longer exists, rebuilding"
            );
            cache.forget(&step.cache_key).map_err(cache_error)?;
        }
    }

    if files.get(DOCKERFILE_NAME).is_some() {
        return Err(BuildError::Recipe(format!(
            "step inputs may not use the reserved context entry '{}'",
            DOCKERFILE_NAME
        )));
    }
    let dockerfile = step.dockerfile(&parent);
    files.add_dockerfile(&dockerfile);
    let archive = files
        .to_tar_gz()
        .map_err(|e| BuildError::backend(stage, BackendError::Io(e)))?;

    let request = StepRequest {
        stage,
        parent: parent.clone(),
        dockerfile,
        context: archive,
        cache_key: step.cache_key.to_string(),
        no_cache: ctx.config.no_cache,
    };
    let output = backend
        .build_step(request)
        .await
        .map_err(|e| step_failure(stage, &ctx.recipe().base, e))?;
    for line in &output.log {
        trace!(step = stage.number(), "{}", line);
    }

    if let Some(cache) = &ctx.cache {
        cache
            .record(&step.cache_key, stage, &output.image_id)
            .map_err(cache_error)?;
    }

    let report = StepReport {
        stage,
        cache_key: step.cache_key.clone(),
        image_id: output.image_id,
        source: if output.cached {
            StepSource::Engine
        } else {
            StepSource::Built
        },
        duration_ms: started.elapsed().as_millis() as u64,
    };
    ctx.push_step(step, report);
    Ok(())
}
