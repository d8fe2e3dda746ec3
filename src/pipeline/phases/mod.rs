// Build phases
//
// One phase per step of the image build. Phases run strictly in file order;
// each layered phase leaves exactly one new image on top of the previous one.

pub mod step_helper;

#[path = "01_base.rs"]
pub mod base;
#[path = "02_dependencies.rs"]
pub mod dependencies;
#[path = "03_placement.rs"]
pub mod placement;
#[path = "04_privilege.rs"]
pub mod privilege;
#[path = "05_finalize.rs"]
pub mod finalize;

pub use base::BasePhase;
pub use dependencies::DependenciesPhase;
pub use finalize::FinalizePhase;
pub use placement::PlacementPhase;
pub use privilege::PrivilegePhase;

#[cfg(test)]
pub(crate) mod test_support {
    use crate::backend::mock::MockImage;
    use crate::backend::MockBackend;
    use crate::pipeline::{PipelineConfig, PipelineContext};
    use crate::recipe::{BuildRecipe, LoadedRecipe, RecipeFormat};
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    pub const BASE: &str = "python:3.9-alpine";

    /// Recipe directory with an empty manifest and `app/main.py`
    pub fn project() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("requirements.txt"), "").unwrap();
        fs::create_dir(dir.path().join("app")).unwrap();
        fs::write(dir.path().join("app/main.py"), "print('hello')\n").unwrap();
        dir
    }

    pub fn backend() -> Arc<MockBackend> {
        Arc::new(MockBackend::new().with_remote_image(BASE, MockImage::alpine()))
    }

    pub fn context(dir: &TempDir, backend: Arc<MockBackend>) -> PipelineContext {
        let recipe = BuildRecipe::parse(
            &format!(
                "base: {}\nmanifest: requirements.txt\nsource: app\nuser: user\n",
                BASE
            ),
            RecipeFormat::Yaml,
        )
        .unwrap();
        PipelineContext::new(
            LoadedRecipe::from_parts(recipe, dir.path()),
            backend,
            None,
            PipelineConfig::default(),
        )
    }
}
