//! The image build pipeline
//!
//! Four layered steps run in strict order, each producing one image on top
//! of the previous step's image, then the result is verified and tagged.

pub mod config;
pub mod context;
pub mod orchestrator;
pub mod phase_trait;
pub mod phases;
pub mod state;

pub use config::PipelineConfig;
pub use context::PipelineContext;
pub use orchestrator::{build_report, BuildOrchestrator};
pub use phase_trait::BuildPhase;
pub use state::{BuildStage, BuildState};
