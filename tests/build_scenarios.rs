//! End-to-end build scenarios against the in-memory backend
//!
//! Each test runs the full orchestrator: validation, the four layered steps,
//! verification and tagging.

mod support;

use boxwright::backend::mock::MockImage;
use boxwright::backend::ImageBackend;
use boxwright::identity::PasswdDb;
use boxwright::pipeline::{BuildOrchestrator, BuildStage, BuildState, PipelineConfig};
use boxwright::{BuildError, MockBackend};
use std::sync::Arc;
use support::{backend, build, context, Project, BASE};

#[tokio::test]
async fn test_minimal_alpine_app() {
    let project = Project::new();
    let backend = backend();

    let report = build(&project, &backend).await;

    assert!(report.succeeded(), "{}", report);
    assert_eq!(report.state, BuildState::Ready);
    let image = report.image_id.clone().unwrap();

    assert_eq!(backend.files_under(&image, "/app").unwrap(), vec!["main.py"]);

    let details = backend.inspect(&image).await.unwrap();
    assert_eq!(details.user.as_deref(), Some("user"));
    assert_eq!(details.working_dir.as_deref(), Some("/app"));
    assert_eq!(details.env_value("PYTHONUNBUFFERED"), Some("1"));

    let passwd = backend.file(&image, "/etc/passwd").unwrap();
    let db = PasswdDb::parse(&String::from_utf8_lossy(&passwd));
    assert_ne!(db.find("user").unwrap().uid, 0);

    assert!(backend.installed_packages(&image).is_empty());
    assert_eq!(backend.lookup(report.tag.as_deref().unwrap()), Some(image));
}

#[tokio::test]
async fn test_unknown_package_fails_installation_and_tags_nothing() {
    let project = Project::new();
    project.write("requirements.txt", "flask==3.0.0\nnosuchpkg-zzz==0.0.1\n");
    let backend = Arc::new(
        MockBackend::new()
            .with_remote_image(BASE, MockImage::alpine())
            .reject_package("nosuchpkg-zzz"),
    );

    let mut ctx = context(project.recipe(), &backend, None, PipelineConfig::new());
    let err = BuildOrchestrator::new(None).execute(&mut ctx).await.unwrap_err();

    assert!(matches!(err, BuildError::Installation(_)), "{:?}", err);
    assert_eq!(err.stage(), Some(BuildStage::Dependencies));
    assert_eq!(ctx.state, BuildState::BaseSelected);
    assert!(backend.tags().is_empty());
    assert_eq!(backend.executed(BuildStage::Placement), 0);
}

#[tokio::test]
async fn test_colliding_account_is_identity_error() {
    let project = Project::new();
    project.write(
        "boxwright.yaml",
        "base: python:3.9-alpine\nmanifest: requirements.txt\nsource: app\nuser: daemon\n",
    );
    let backend = backend();

    let report = build(&project, &backend).await;

    let failure = report.failure.as_ref().unwrap();
    assert_eq!(failure.kind, "identity");
    assert_eq!(failure.stage, Some(BuildStage::Privilege));
    assert!(report.image_id.is_none());
    assert!(backend.tags().is_empty());
}

#[tokio::test]
async fn test_colliding_uid_is_identity_error() {
    let project = Project::new();
    project.write(
        "boxwright.yaml",
        "base: python:3.9-alpine\nmanifest: requirements.txt\nsource: app\nuser:\n  name: svc\n  uid: 65534\n",
    );

    let report = build(&project, &backend()).await;
    assert_eq!(report.failure.unwrap().kind, "identity");
}

#[tokio::test]
async fn test_unresolvable_base_is_resolution_error() {
    let project = Project::new();
    let backend = Arc::new(MockBackend::new());

    let report = build(&project, &backend).await;

    let failure = report.failure.unwrap();
    assert_eq!(failure.kind, "resolution");
    assert_eq!(failure.stage, Some(BuildStage::Base));
    assert_eq!(report.state, BuildState::Pending);
}

#[tokio::test]
async fn test_missing_source_is_placement_error() {
    let project = Project::new();
    std::fs::remove_dir_all(project.path().join("app")).unwrap();

    let report = build(&project, &backend()).await;

    let failure = report.failure.unwrap();
    assert_eq!(failure.kind, "placement");
    assert_eq!(report.state, BuildState::DependenciesInstalled);
}

#[tokio::test]
async fn test_runtime_user_is_never_privileged() {
    for base in [MockImage::alpine(), MockImage::debian()] {
        let project = Project::new();
        let backend = Arc::new(MockBackend::new().with_remote_image(BASE, base));

        let report = build(&project, &backend).await;
        assert!(report.succeeded(), "{}", report);

        let details = backend.inspect(report.image_id.as_deref().unwrap()).await.unwrap();
        let user = details.user.unwrap_or_default();
        assert!(!user.is_empty());
        assert_ne!(user, "root");
        assert_ne!(user, "0");
    }
}

#[tokio::test]
async fn test_app_dir_equals_source_tree() {
    let project = Project::new();
    project.write("app/pkg/__init__.py", "");
    project.write("app/pkg/util.py", "def f():\n    return 1\n");
    project.write("app/static/style.css", "body {}\n");
    let backend = backend();

    let report = build(&project, &backend).await;
    assert!(report.succeeded(), "{}", report);
    assert!(report.verification.as_ref().unwrap().passed());

    let mut placed = backend
        .files_under(report.image_id.as_deref().unwrap(), "/app")
        .unwrap();
    placed.sort();
    assert_eq!(
        placed,
        vec![
            "main.py",
            "pkg",
            "pkg/__init__.py",
            "pkg/util.py",
            "static",
            "static/style.css",
        ]
    );
}

#[tokio::test]
async fn test_source_change_does_not_reinstall_dependencies() {
    let project = Project::new();
    project.write("requirements.txt", "flask==3.0.0\n");
    let backend = backend();

    let first = build(&project, &backend).await;
    assert!(first.succeeded(), "{}", first);

    project.write("app/main.py", "print('changed')\n");
    let second = build(&project, &backend).await;
    assert!(second.succeeded(), "{}", second);

    assert_eq!(backend.executed(BuildStage::Dependencies), 1);
    assert!(second.step(BuildStage::Dependencies).unwrap().cached());
    assert!(!second.step(BuildStage::Placement).unwrap().cached());
    assert_eq!(
        first.step(BuildStage::Dependencies).unwrap().image_id,
        second.step(BuildStage::Dependencies).unwrap().image_id
    );
    assert_ne!(first.image_id, second.image_id);
}

#[tokio::test]
async fn test_manifest_change_reinstalls_dependencies() {
    let project = Project::new();
    let backend = backend();

    assert!(build(&project, &backend).await.succeeded());
    project.write("requirements.txt", "requests==2.31.0\n");
    let second = build(&project, &backend).await;

    assert!(second.succeeded(), "{}", second);
    assert_eq!(backend.executed(BuildStage::Dependencies), 2);
    assert_eq!(
        backend.installed_packages(second.image_id.as_deref().unwrap()),
        vec!["requests"]
    );
}

#[tokio::test]
async fn test_builds_are_idempotent() {
    let project = Project::new();
    project.write("requirements.txt", "flask==3.0.0\nrequests>=2.31\n");

    let first_backend = backend();
    let second_backend = backend();
    let first = build(&project, &first_backend).await;
    let second = build(&project, &second_backend).await;

    assert!(first.succeeded() && second.succeeded());
    assert_eq!(first.image_id, second.image_id);
    for (a, b) in first.steps.iter().zip(&second.steps) {
        assert_eq!(a.cache_key, b.cache_key);
        assert_eq!(a.image_id, b.image_id);
    }

    let image = first.image_id.as_deref().unwrap();
    assert_eq!(
        first_backend.installed_packages(image),
        second_backend.installed_packages(image)
    );

    // Rebuilding on the same engine changes nothing
    let again = build(&project, &first_backend).await;
    assert_eq!(again.image_id, first.image_id);
    assert_eq!(again.cached_steps(), 4);
}

#[tokio::test]
async fn test_manifest_named_dockerfile_is_copied_verbatim() {
    let project = Project::new();
    project.write("Dockerfile", "flask==3.0.0\n");
    project.write(
        "boxwright.yaml",
        "base: python:3.9-alpine\nmanifest: Dockerfile\nsource: app\nuser: user\n",
    );
    let backend = backend();

    let report = build(&project, &backend).await;

    assert!(report.succeeded(), "{}", report);
    let image = report.image_id.as_deref().unwrap();
    assert_eq!(
        backend.file(image, "/requirements.txt").unwrap(),
        b"flask==3.0.0\n".to_vec()
    );
    assert_eq!(backend.installed_packages(image), vec!["flask"]);
}

#[tokio::test]
async fn test_reserved_context_name_is_rejected() {
    let project = Project::new();
    project.write(".boxwright.Dockerfile/main.py", "print('hi')\n");
    project.write(
        "boxwright.yaml",
        "base: python:3.9-alpine\nmanifest: requirements.txt\nsource: .boxwright.Dockerfile\nuser: user\n",
    );
    let backend = backend();

    let report = build(&project, &backend).await;

    assert_eq!(report.failure.unwrap().kind, "recipe");
    assert!(backend.build_calls().is_empty());
}
