//! Layer cache index, pull policy and step timeout behavior across builds

mod support;

use boxwright::backend::mock::MockImage;
use boxwright::cache::LayerCache;
use boxwright::pipeline::{BuildOrchestrator, BuildStage, PipelineConfig};
use boxwright::report::StepSource;
use boxwright::{BuildError, MockBackend, PullPolicy};
use std::sync::Arc;
use std::time::Duration;
use support::{backend, context, Project, BASE};
use tempfile::TempDir;

async fn build_with_cache(
    project: &Project,
    backend: &Arc<MockBackend>,
    cache: &LayerCache,
    config: PipelineConfig,
) -> boxwright::BuildReport {
    let mut ctx = context(project.recipe(), backend, Some(cache.clone()), config);
    BuildOrchestrator::new(None).build(&mut ctx).await
}

#[tokio::test]
async fn test_index_hits_across_builds() {
    let project = Project::new();
    let cache_dir = TempDir::new().unwrap();
    let cache = LayerCache::open(cache_dir.path()).unwrap();
    let backend = backend();

    let first = build_with_cache(&project, &backend, &cache, PipelineConfig::new()).await;
    assert!(first.succeeded(), "{}", first);
    assert_eq!(cache.entries().unwrap().len(), 4);

    // A fresh handle on the same directory sees the recorded layers
    let reopened = LayerCache::open(cache_dir.path()).unwrap();
    let second = build_with_cache(&project, &backend, &reopened, PipelineConfig::new()).await;

    assert!(second.succeeded(), "{}", second);
    assert!(second.steps.iter().all(|s| s.source == StepSource::Index));
    assert_eq!(second.image_id, first.image_id);
    assert_eq!(backend.build_calls().len(), 4);
}

#[tokio::test]
async fn test_missing_image_is_rebuilt() {
    let project = Project::new();
    let cache_dir = TempDir::new().unwrap();
    let cache = LayerCache::open(cache_dir.path()).unwrap();
    let backend = backend();

    let first = build_with_cache(&project, &backend, &cache, PipelineConfig::new()).await;
    let deps_image = first.step(BuildStage::Dependencies).unwrap().image_id.clone();
    backend.remove_image(&deps_image);

    let second = build_with_cache(&project, &backend, &cache, PipelineConfig::new()).await;

    assert!(second.succeeded(), "{}", second);
    let deps = second.step(BuildStage::Dependencies).unwrap();
    assert_eq!(deps.source, StepSource::Built);
    assert_eq!(deps.image_id, deps_image);
    assert_eq!(second.step(BuildStage::Base).unwrap().source, StepSource::Index);
    assert_eq!(backend.executed(BuildStage::Dependencies), 2);
}

#[tokio::test]
async fn test_no_cache_rebuilds_but_records() {
    let project = Project::new();
    let cache_dir = TempDir::new().unwrap();
    let cache = LayerCache::open(cache_dir.path()).unwrap();
    let backend = backend();

    build_with_cache(&project, &backend, &cache, PipelineConfig::new()).await;
    let report = build_with_cache(
        &project,
        &backend,
        &cache,
        PipelineConfig::new().with_no_cache(true),
    )
    .await;

    assert!(report.succeeded(), "{}", report);
    assert!(report.steps.iter().all(|s| s.source == StepSource::Built));
    assert_eq!(backend.executed(BuildStage::Dependencies), 2);
    assert_eq!(cache.entries().unwrap().len(), 4);
}

#[tokio::test]
async fn test_engine_cache_without_index() {
    let project = Project::new();
    let backend = backend();

    support::build(&project, &backend).await;
    let report = support::build(&project, &backend).await;

    assert!(report.steps.iter().all(|s| s.source == StepSource::Engine));
}

#[tokio::test]
async fn test_pull_policy_never_requires_local_base() {
    let project = Project::new();
    let remote_only = backend();
    let mut ctx = context(
        project.recipe(),
        &remote_only,
        None,
        PipelineConfig::new().with_pull_policy(PullPolicy::Never),
    );
    let err = BuildOrchestrator::new(None).execute(&mut ctx).await.unwrap_err();
    assert!(matches!(err, BuildError::Resolution { .. }), "{:?}", err);
    assert!(remote_only.pulls().is_empty());

    let local = Arc::new(MockBackend::new().with_local_image(BASE, MockImage::alpine()));
    let mut ctx = context(
        project.recipe(),
        &local,
        None,
        PipelineConfig::new().with_pull_policy(PullPolicy::Never),
    );
    BuildOrchestrator::new(None).execute(&mut ctx).await.unwrap();
    assert!(local.pulls().is_empty());
}

#[tokio::test]
async fn test_pull_policy_always_pulls_again() {
    let project = Project::new();
    let backend = backend();

    for _ in 0..2 {
        let mut ctx = context(
            project.recipe(),
            &backend,
            None,
            PipelineConfig::new().with_pull_policy(PullPolicy::Always),
        );
        BuildOrchestrator::new(None).execute(&mut ctx).await.unwrap();
    }
    assert_eq!(backend.pulls().len(), 2);
}

#[tokio::test]
async fn test_slow_step_times_out() {
    let project = Project::new();
    let backend = Arc::new(
        MockBackend::new()
            .with_remote_image(BASE, MockImage::alpine())
            .with_step_delay(Duration::from_millis(500)),
    );
    let mut ctx = context(
        project.recipe(),
        &backend,
        None,
        PipelineConfig::new().with_step_timeout(Some(Duration::from_millis(50))),
    );

    let err = BuildOrchestrator::new(None).execute(&mut ctx).await.unwrap_err();

    assert!(
        matches!(err, BuildError::Timeout { stage: BuildStage::Base, .. }),
        "{:?}",
        err
    );
    assert!(backend.tags().is_empty());
}
