//! Subcommand handlers. Each returns the process exit code.

use super::commands::{BuildArgs, CacheArgs, ConfigArgs, PlanArgs, RenderArgs, VerifyArgs};
use super::output::OutputFormatter;
use crate::backend::{DockerBackend, ImageBackend};
use crate::config::BuilderConfig;
use crate::context::TreeSnapshot;
use crate::identity::Distro;
use crate::pipeline::{BuildOrchestrator, PipelineConfig, PipelineContext};
use crate::plan::BuildPlan;
use crate::progress::{LoggingHandler, ProgressHandler};
use crate::recipe::{BuildRecipe, DependencyManifest, LoadedRecipe};
use crate::report::BuildReport;
use crate::verify::{verify_image, Expectations};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

fn recipe_path(arg: Option<&PathBuf>) -> PathBuf {
    arg.cloned().unwrap_or_else(|| PathBuf::from("."))
}

fn load_recipe(arg: Option<&PathBuf>) -> Result<LoadedRecipe> {
    let path = recipe_path(arg);
    debug!("Recipe path: {}", path.display());
    BuildRecipe::load(&path)
}

fn write_output(content: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            fs::write(path, content)
                .with_context(|| format!("Failed to write output to {}", path.display()))?;
            info!("Output written to {}", path.display());
        }
        None if content.ends_with('\n') => print!("{}", content),
        None => println!("{}", content),
    }
    Ok(())
}

async fn connect_docker() -> Result<Arc<dyn ImageBackend>> {
    let docker = DockerBackend::connect().context("Cannot connect to the Docker engine")?;
    docker
        .ping()
        .await
        .context("Docker engine is not responding")?;
    Ok(Arc::new(docker))
}

/// Effective pipeline settings: environment defaults with CLI overrides on top
pub fn pipeline_config(args: &BuildArgs, config: &BuilderConfig) -> PipelineConfig {
    let mut pipeline = config
        .pipeline_config()
        .with_no_cache(args.no_cache)
        .with_verify(config.verify && !args.no_verify)
        .with_tag(args.tag.clone());
    if let Some(pull) = args.pull {
        pipeline = pipeline.with_pull_policy(pull.into());
    }
    if let Some(secs) = args.step_timeout {
        pipeline = pipeline.with_step_timeout((secs > 0).then(|| Duration::from_secs(secs)));
    }
    pipeline
}

/// Runs a build against `backend` and returns its report, successful or not.
/// Only setup problems (unreadable recipe, unusable cache) are errors here.
pub async fn run_build(
    args: &BuildArgs,
    config: &BuilderConfig,
    backend: Arc<dyn ImageBackend>,
    progress: Option<Arc<dyn ProgressHandler>>,
) -> Result<BuildReport> {
    let loaded = load_recipe(args.recipe.as_ref())?;
    let cache = config.open_cache(backend.name())?;
    if let Some(cache) = &cache {
        debug!("Layer cache: {}", cache.dir().display());
    }

    let mut context = PipelineContext::new(loaded, backend, cache, pipeline_config(args, config));
    Ok(BuildOrchestrator::new(progress).build(&mut context).await)
}

pub async fn handle_build(args: &BuildArgs, quiet: bool) -> i32 {
    info!("Starting build");

    let config = BuilderConfig::default();
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        eprintln!("\nPlease check your BOXWRIGHT_* environment variables.");
        return 1;
    }

    let backend = match connect_docker().await {
        Ok(backend) => backend,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return 1;
        }
    };

    let progress: Option<Arc<dyn ProgressHandler>> = if quiet {
        None
    } else {
        Some(Arc::new(LoggingHandler))
    };

    let report = match run_build(args, &config, backend, progress).await {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return 1;
        }
    };

    let formatter = OutputFormatter::new(args.format.into());
    match formatter.format_report(&report) {
        Ok(output) => {
            if let Err(e) = write_output(&output, args.output.as_deref()) {
                eprintln!("Error: {:#}", e);
                return 1;
            }
        }
        Err(e) => {
            error!("Failed to format build report: {}", e);
            return 1;
        }
    }

    match &report.failure {
        None => 0,
        Some(failure) => {
            match failure.stage {
                Some(stage) => eprintln!("Build failed at {}: {}", stage, failure.message),
                None => eprintln!("Build failed: {}", failure.message),
            }
            1
        }
    }
}

/// Computes the plan without contacting an engine. The base reference stands
/// in for the resolved base id and the account tool is guessed from it.
pub fn local_plan(loaded: &LoadedRecipe) -> Result<BuildPlan> {
    let recipe = &loaded.recipe;
    let reference = recipe.base_ref()?;

    let manifest_path = loaded.manifest_path();
    let bytes = fs::read(&manifest_path)
        .with_context(|| format!("Failed to read manifest {}", manifest_path.display()))?;
    let manifest = DependencyManifest::parse(&bytes)
        .with_context(|| format!("Invalid manifest {}", manifest_path.display()))?;

    let snapshot = TreeSnapshot::capture(&loaded.source_path())?;
    let tool = Distro::guess_from_reference(&reference).account_tool();

    Ok(BuildPlan::new(
        recipe,
        &recipe.base,
        &manifest.digest,
        &snapshot.content_digest(),
        tool,
    ))
}

pub fn handle_plan(args: &PlanArgs) -> i32 {
    let result = load_recipe(args.recipe.as_ref())
        .and_then(|loaded| local_plan(&loaded))
        .and_then(|plan| OutputFormatter::new(args.format.into()).format_plan(&plan))
        .and_then(|output| write_output(&output, None));

    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    }
}

pub fn handle_render(args: &RenderArgs) -> i32 {
    let result = load_recipe(args.recipe.as_ref())
        .and_then(|loaded| local_plan(&loaded))
        .and_then(|plan| write_output(&plan.render_dockerfile(), args.output.as_deref()));

    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    }
}

pub async fn run_verify(args: &VerifyArgs, backend: &dyn ImageBackend) -> Result<(bool, String)> {
    let expected = Expectations {
        user: args.user.clone(),
        app_dir: args.app_dir.clone(),
        env: args.env.iter().cloned().collect(),
        source: None,
    };
    let report = verify_image(backend, &args.image, &expected)
        .await
        .with_context(|| format!("Cannot inspect image {}", args.image))?;
    let output = OutputFormatter::new(args.format.into()).format_verification(&report)?;
    Ok((report.passed(), output))
}

pub async fn handle_verify(args: &VerifyArgs) -> i32 {
    let backend = match connect_docker().await {
        Ok(backend) => backend,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return 1;
        }
    };

    match run_verify(args, backend.as_ref()).await {
        Ok((passed, output)) => match write_output(&output, None) {
            Ok(()) if passed => 0,
            Ok(()) => 1,
            Err(e) => {
                eprintln!("Error: {:#}", e);
                1
            }
        },
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    }
}

pub fn handle_config(args: &ConfigArgs) -> i32 {
    let config = BuilderConfig::default();
    if let Err(e) = config.validate() {
        eprintln!("Warning: {}", e);
    }
    let result = OutputFormatter::new(args.format.into())
        .format_config(&config)
        .and_then(|output| write_output(&output, None));
    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    }
}

pub fn handle_cache(args: &CacheArgs) -> i32 {
    let config = BuilderConfig::default();
    let result = (|| -> Result<String> {
        let Some(cache) = config.open_cache("docker")? else {
            return Ok("Layer cache is disabled\n".to_string());
        };
        if args.clear {
            let removed = cache.clear()?;
            return Ok(format!("Removed {} cache entries\n", removed));
        }
        let entries = cache.entries()?;
        OutputFormatter::new(args.format.into()).format_cache(&entries)
    })();

    match result.and_then(|output| write_output(&output, None)) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    }
}
