use super::step_helper::run_step;
use crate::context::BuildContext;
use crate::error::BuildError;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::phase_trait::BuildPhase;
use crate::pipeline::BuildStage;
use crate::plan::{self, context_path};
use crate::recipe::DependencyManifest;
use async_trait::async_trait;
use std::io::ErrorKind;
use tracing::{debug, info};

pub struct DependenciesPhase;

#[async_trait]
impl BuildPhase for DependenciesPhase {
    fn name(&self) -> &'static str {
        "DependenciesPhase"
    }

    fn stage(&self) -> BuildStage {
        BuildStage::Dependencies
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<(), BuildError> {
        let path = ctx.loaded.manifest_path();
        let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => {
                BuildError::Installation(format!("manifest {} does not exist", path.display()))
            }
            _ => BuildError::Installation(format!(
                "cannot read manifest {}: {}",
                path.display(),
                e
            )),
        })?;

        let manifest = DependencyManifest::parse(&bytes)
            .map_err(|e| BuildError::Recipe(format!("{}: {}", path.display(), e)))?;
        info!(
            packages = manifest.len(),
            digest = %manifest.digest.short(),
            "Parsed dependency manifest"
        );
        debug!("Packages: {}", manifest.package_names().join(", "));

        let recipe = ctx.recipe();
        let (parent_step, parent_image) = ctx.head(self.stage())?;
        let step = plan::dependencies_step(recipe, parent_step, &manifest.digest);
        let parent = parent_image.to_string();

        let mut files = BuildContext::new();
        files.add_file(&context_path(&recipe.manifest), bytes, 0o644);
        ctx.manifest = Some(manifest);

        run_step(ctx, step, parent, files).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockImage;
    use crate::backend::MockBackend;
    use crate::pipeline::phases::test_support::{backend, context, project, BASE};
    use crate::pipeline::phases::BasePhase;
    use std::fs;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_installs_manifest_packages() {
        let dir = project();
        fs::write(dir.path().join("requirements.txt"), "flask==3.0.0\nrequests>=2.31\n").unwrap();
        let backend = backend();
        let mut ctx = context(&dir, backend.clone());

        BasePhase.execute(&mut ctx).await.unwrap();
        DependenciesPhase.execute(&mut ctx).await.unwrap();

        assert_eq!(ctx.manifest.as_ref().unwrap().len(), 2);
        let image = ctx.image_id().unwrap();
        let installed = backend.installed_packages(image);
        assert!(installed.contains(&"flask".to_string()));
        assert!(installed.contains(&"requests".to_string()));
        assert!(backend.file(image, "/requirements.txt").is_some());
    }

    #[tokio::test]
    async fn test_rejected_package_is_installation_error() {
        let dir = project();
        fs::write(dir.path().join("requirements.txt"), "nonexistent-pkg==1.0\n").unwrap();
        let backend = Arc::new(
            MockBackend::new()
                .with_remote_image(BASE, MockImage::alpine())
                .reject_package("nonexistent-pkg"),
        );
        let mut ctx = context(&dir, backend);

        BasePhase.execute(&mut ctx).await.unwrap();
        let err = DependenciesPhase.execute(&mut ctx).await.unwrap_err();
        assert!(matches!(err, BuildError::Installation(_)));
        assert!(err.to_string().contains("nonexistent-pkg"));
    }

    #[tokio::test]
    async fn test_missing_manifest() {
        let dir = project();
        fs::remove_file(dir.path().join("requirements.txt")).unwrap();
        let mut ctx = context(&dir, backend());

        BasePhase.execute(&mut ctx).await.unwrap();
        let err = DependenciesPhase.execute(&mut ctx).await.unwrap_err();
        assert!(matches!(err, BuildError::Installation(m) if m.contains("does not exist")));
    }

    #[tokio::test]
    async fn test_non_utf8_manifest_is_recipe_error() {
        let dir = project();
        fs::write(dir.path().join("requirements.txt"), [0xff, 0xfe, b'\n']).unwrap();
        let mut ctx = context(&dir, backend());

        BasePhase.execute(&mut ctx).await.unwrap();
        let err = DependenciesPhase.execute(&mut ctx).await.unwrap_err();
        assert!(matches!(err, BuildError::Recipe(_)));
    }

    #[tokio::test]
    async fn test_unrecognized_line_is_left_to_the_installer() {
        let dir = project();
        fs::write(dir.path().join("requirements.txt"), "flake8 ?? 3\n").unwrap();
        let mut ctx = context(&dir, backend());

        BasePhase.execute(&mut ctx).await.unwrap();
        let err = DependenciesPhase.execute(&mut ctx).await.unwrap_err();
        assert!(matches!(err, BuildError::Installation(m) if m.contains("Invalid requirement")));
        assert_eq!(ctx.manifest.as_ref().unwrap().opaque.len(), 1);
    }

    #[tokio::test]
    async fn test_location_requirements_reach_the_installer() {
        let dir = project();
        let manifest = "flask==3.0.0\n\
git+https://github.com/psf/requests.git@v2.31.0#egg=requests\n\
./vendor/mylib-1.0-py3-none-any.whl\n";
        fs::write(dir.path().join("requirements.txt"), manifest).unwrap();
        let backend = backend();
        let mut ctx = context(&dir, backend.clone());

        BasePhase.execute(&mut ctx).await.unwrap();
        DependenciesPhase.execute(&mut ctx).await.unwrap();

        assert_eq!(ctx.manifest.as_ref().unwrap().len(), 3);
        let image = ctx.image_id().unwrap();
        assert_eq!(
            backend.file(image, "/requirements.txt").unwrap(),
            manifest.as_bytes().to_vec()
        );
    }

    #[tokio::test]
    async fn test_requires_base_step() {
        let dir = project();
        let mut ctx = context(&dir, backend());
        let err = DependenciesPhase.execute(&mut ctx).await.unwrap_err();
        assert!(matches!(err, BuildError::InvalidTransition { .. }));
    }
}
