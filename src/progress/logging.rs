//! Logging-based progress handler

use super::{ProgressEvent, ProgressHandler};
use tracing::{debug, error, info};

/// Handler that logs progress events using tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl ProgressHandler for LoggingHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Started { recipe } => {
                info!(recipe = %recipe, "Starting build");
            }
            ProgressEvent::BaseResolved {
                reference,
                image_id,
                pulled,
            } => {
                info!(
                    base = %reference,
                    image = %image_id,
                    pulled,
                    "Base image resolved"
                );
            }
            ProgressEvent::StepStarted { stage } => {
                info!(step = stage.number(), "Step {}: {}", stage.number(), stage);
            }
            ProgressEvent::StepCached { stage, image_id } => {
                info!(step = stage.number(), image = %image_id, "Using cached layer");
            }
            ProgressEvent::StepComplete {
                stage,
                image_id,
                duration,
            } => {
                info!(
                    step = stage.number(),
                    image = %image_id,
                    duration_ms = duration.as_millis(),
                    "Step complete"
                );
            }
            ProgressEvent::Tagged { image_id, tag } => {
                info!(image = %image_id, tag = %tag, "Tagged image");
            }
            ProgressEvent::VerificationComplete { passed, failed } => {
                if *failed > 0 {
                    error!(passed, failed, "Verification failed");
                } else {
                    debug!(passed, "Verification passed");
                }
            }
            ProgressEvent::Completed {
                image_id,
                total_time,
            } => {
                info!(
                    image = %image_id,
                    total_time_ms = total_time.as_millis(),
                    "Build complete"
                );
            }
            ProgressEvent::Failed { stage, error } => match stage {
                Some(stage) => error!(step = stage.number(), error = %error, "Build failed at {}", stage),
                None => error!(error = %error, "Build failed"),
            },
        }
    }
}
