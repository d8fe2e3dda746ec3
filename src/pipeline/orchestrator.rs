use super::context::PipelineContext;
use super::phase_trait::BuildPhase;
use super::phases::{BasePhase, DependenciesPhase, FinalizePhase, PlacementPhase, PrivilegePhase};
use super::BuildStage;
use crate::error::BuildError;
use crate::progress::{ProgressEvent, ProgressHandler};
use crate::report::{BuildReport, FailureReport, StepSource};
use crate::validation::Validator;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub struct BuildOrchestrator {
    progress_handler: Option<Arc<dyn ProgressHandler>>,
    validator: Validator,
}

impl BuildOrchestrator {
    pub fn new(progress_handler: Option<Arc<dyn ProgressHandler>>) -> Self {
        Self {
            progress_handler,
            validator: Validator::default(),
        }
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(handler) = &self.progress_handler {
            handler.on_progress(&event);
        }
    }

    /// Runs every phase in order and returns the id of the tagged image.
    ///
    /// The first error stops the build; the context keeps whatever the
    /// completed phases left behind.
    pub async fn execute(&self, context: &mut PipelineContext) -> Result<String, BuildError> {
        let start = Instant::now();
        info!("Starting build for: {}", context.loaded.file.display());
        self.emit(ProgressEvent::Started {
            recipe: context.loaded.file.display().to_string(),
        });

        if let Err(e) = self.validator.validate(context.recipe()) {
            let error = BuildError::Recipe(format!("{:#}", e));
            self.emit(ProgressEvent::Failed {
                stage: None,
                error: error.to_string(),
            });
            return Err(error);
        }

        let phases: Vec<Box<dyn BuildPhase>> = vec![
            Box::new(BasePhase),
            Box::new(DependenciesPhase),
            Box::new(PlacementPhase),
            Box::new(PrivilegePhase),
            Box::new(FinalizePhase),
        ];

        for phase in phases {
            let stage = phase.stage();
            debug!("Phase: {}", phase.name());
            self.emit(ProgressEvent::StepStarted { stage });

            let phase_start = Instant::now();
            let step_timeout = context.config.step_timeout;
            let result = match step_timeout {
                Some(limit) => tokio::time::timeout(limit, phase.execute(context))
                    .await
                    .unwrap_or_else(|_| {
                        Err(BuildError::Timeout {
                            stage,
                            seconds: limit.as_secs(),
                        })
                    }),
                None => phase.execute(context).await,
            };

            if let Err(error) = result.and_then(|_| context.state.advance(stage.completes())) {
                self.emit(ProgressEvent::Failed {
                    stage: error.stage().or(Some(stage)),
                    error: error.to_string(),
                });
                return Err(error);
            }

            self.report_phase(context, stage, phase_start.elapsed());
            debug!("Phase {} complete", phase.name());
        }

        let image_id = context
            .image_id()
            .map(str::to_string)
            .ok_or(BuildError::InvalidTransition {
                from: context.state,
                to: BuildStage::Finalize.completes(),
            })?;
        info!("Build complete: {}", image_id);
        self.emit(ProgressEvent::Completed {
            image_id: image_id.clone(),
            total_time: start.elapsed(),
        });

        Ok(image_id)
    }

    fn report_phase(&self, context: &PipelineContext, stage: BuildStage, elapsed: Duration) {
        if stage == BuildStage::Base {
            if let Some(base) = &context.base {
                self.emit(ProgressEvent::BaseResolved {
                    reference: base.reference.clone(),
                    image_id: base.id.clone(),
                    pulled: base.pulled,
                });
            }
        }

        if stage == BuildStage::Finalize {
            if let Some(verification) = &context.verification {
                self.emit(ProgressEvent::VerificationComplete {
                    passed: verification.passed_count(),
                    failed: verification.failures().len(),
                });
            }
            if let (Some(image_id), Some(tag)) = (context.image_id(), &context.tag) {
                self.emit(ProgressEvent::Tagged {
                    image_id: image_id.to_string(),
                    tag: tag.clone(),
                });
            }
            return;
        }

        if let Some(step) = context.last_step().filter(|s| s.stage == stage) {
            let event = match step.source {
                StepSource::Built => ProgressEvent::StepComplete {
                    stage,
                    image_id: step.image_id.clone(),
                    duration: elapsed,
                },
                StepSource::Index | StepSource::Engine => ProgressEvent::StepCached {
                    stage,
                    image_id: step.image_id.clone(),
                },
            };
            self.emit(event);
        }
    }

    /// Runs the build and summarizes it, successful or not
    pub async fn build(&self, context: &mut PipelineContext) -> BuildReport {
        let start = Instant::now();
        let result = self.execute(context).await;
        build_report(context, result.as_ref().err(), start.elapsed())
    }
}

/// Summary of a build as far as it got
pub fn build_report(
    context: &PipelineContext,
    error: Option<&BuildError>,
    elapsed: Duration,
) -> BuildReport {
    let mut report = BuildReport::new(
        context.loaded.file.display().to_string(),
        context.recipe().base.clone(),
    );
    report.base_image_id = context.base.as_ref().map(|b| b.id.clone());
    report.state = context.state;
    report.steps = context.steps.clone();
    report.verification = context.verification.clone();
    report.duration_ms = elapsed.as_millis() as u64;

    match error {
        Some(error) => {
            let mut failure = FailureReport::from(error);
            failure.stage = failure.stage.or(context.state.pending_stage());
            report.failure = Some(failure);
        }
        None => {
            report.image_id = context.image_id().map(str::to_string);
            report.tag = context.tag.clone();
        }
    }
    report
}
