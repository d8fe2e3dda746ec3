//! boxwright - layered container image builder
//!
//! Builds an application image from a [`BuildRecipe`] in four strictly ordered
//! steps, each committed as its own image layer:
//!
//! 1. **Base selection**: resolve the pinned base runtime image
//! 2. **Dependency installation**: copy the manifest alone and install it
//! 3. **Application placement**: copy the source tree into the app directory
//! 4. **Privilege de-escalation**: create an unprivileged account and switch to it
//!
//! Because the manifest is placed before the source, editing application code
//! reuses the dependency layer. The finished image is verified and only then
//! tagged; any failure leaves nothing tagged.
//!
//! # Example
//!
//! ```no_run
//! use boxwright::{BuildOrchestrator, BuildRecipe, BuilderConfig, DockerBackend, PipelineContext};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = BuilderConfig::default();
//! let loaded = BuildRecipe::load(Path::new("."))?;
//! let backend = Arc::new(DockerBackend::connect()?);
//! let cache = config.open_cache("docker")?;
//!
//! let mut context = PipelineContext::new(loaded, backend, cache, config.pipeline_config());
//! let report = BuildOrchestrator::new(None).build(&mut context).await;
//! println!("{}", report);
//! # Ok(())
//! # }
//! ```
//!
//! # Project Structure
//!
//! - [`recipe`]: recipe, image reference, manifest and identity types
//! - [`plan`]: per-step Dockerfile instructions and chained cache keys
//! - [`pipeline`]: state machine, phases and the orchestrator
//! - [`backend`]: the image engine seam, with Docker and in-memory backends
//! - [`cache`]: on-disk index from step cache keys to image ids

pub mod backend;
pub mod cache;
pub mod cli;
pub mod config;
pub mod context;
pub mod digest;
pub mod error;
pub mod identity;
pub mod pipeline;
pub mod plan;
pub mod progress;
pub mod recipe;
pub mod report;
pub mod util;
pub mod validation;
pub mod verify;

pub use backend::{BackendError, DockerBackend, ImageBackend, MockBackend, PullPolicy};
pub use cache::LayerCache;
pub use config::{BuilderConfig, ConfigError};
pub use digest::Digest;
pub use error::BuildError;
pub use pipeline::{BuildOrchestrator, BuildStage, BuildState, PipelineConfig, PipelineContext};
pub use plan::BuildPlan;
pub use recipe::{BuildRecipe, ExecutionIdentity, LoadedRecipe};
pub use report::BuildReport;
pub use util::{init_logging, LoggingConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
