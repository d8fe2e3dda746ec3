//! Shared helpers for pipeline integration tests

#![allow(dead_code)]

use boxwright::backend::mock::MockImage;
use boxwright::cache::LayerCache;
use boxwright::recipe::{BuildRecipe, LoadedRecipe};
use boxwright::{BuildOrchestrator, BuildReport, MockBackend, PipelineConfig, PipelineContext};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

pub const BASE: &str = "python:3.9-alpine";

pub const RECIPE: &str = "\
base: python:3.9-alpine
manifest: requirements.txt
source: app
user: user
";

/// A project directory with a recipe, an empty manifest and `app/main.py`
pub struct Project {
    pub dir: TempDir,
}

impl Project {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        fs::write(dir.path().join("boxwright.yaml"), RECIPE).expect("Failed to write recipe");
        fs::write(dir.path().join("requirements.txt"), "").expect("Failed to write manifest");
        fs::create_dir(dir.path().join("app")).expect("Failed to create app dir");
        fs::write(dir.path().join("app/main.py"), "print('hello')\n")
            .expect("Failed to write main.py");
        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, relative: &str, contents: &str) {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dir");
        }
        fs::write(path, contents).expect("Failed to write file");
    }

    pub fn recipe(&self) -> LoadedRecipe {
        BuildRecipe::load(self.path()).expect("Failed to load recipe")
    }
}

pub fn backend() -> Arc<MockBackend> {
    Arc::new(MockBackend::new().with_remote_image(BASE, MockImage::alpine()))
}

pub fn context(
    loaded: LoadedRecipe,
    backend: &Arc<MockBackend>,
    cache: Option<LayerCache>,
    config: PipelineConfig,
) -> PipelineContext {
    PipelineContext::new(loaded, backend.clone(), cache, config)
}

pub async fn build(project: &Project, backend: &Arc<MockBackend>) -> BuildReport {
    let mut ctx = context(project.recipe(), backend, None, PipelineConfig::new());
    BuildOrchestrator::new(None).build(&mut ctx).await
}
