//! Progress handler trait and events

use crate::pipeline::BuildStage;
use std::time::Duration;

/// Events emitted while a build runs
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Build started
    Started { recipe: String },

    /// Base reference resolved to a local image
    BaseResolved {
        reference: String,
        image_id: String,
        pulled: bool,
    },

    /// A layered step started
    StepStarted { stage: BuildStage },

    /// A layered step was satisfied from cache
    StepCached { stage: BuildStage, image_id: String },

    /// A layered step produced a new image
    StepComplete {
        stage: BuildStage,
        image_id: String,
        duration: Duration,
    },

    /// Final image tagged
    Tagged { image_id: String, tag: String },

    /// Verification finished
    VerificationComplete { passed: usize, failed: usize },

    /// Build completed successfully
    Completed {
        image_id: String,
        total_time: Duration,
    },

    /// Build failed
    Failed {
        stage: Option<BuildStage>,
        error: String,
    },
}

/// Trait for handling progress events during a build
pub trait ProgressHandler: Send + Sync {
    /// Called when a progress event occurs
    fn on_progress(&self, event: &ProgressEvent);
}

/// No-op handler that ignores all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHandler;

impl ProgressHandler for NoOpHandler {
    fn on_progress(&self, _event: &ProgressEvent) {}
}
