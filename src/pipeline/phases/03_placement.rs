use super::step_helper::run_step;
use crate::context::{BuildContext, TreeSnapshot};
use crate::error::BuildError;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::phase_trait::BuildPhase;
use crate::pipeline::BuildStage;
use crate::plan::{self, context_path};
use async_trait::async_trait;
use tracing::info;

pub struct PlacementPhase;

#[async_trait]
impl BuildPhase for PlacementPhase {
    fn name(&self) -> &'static str {
        "PlacementPhase"
    }

    fn stage(&self) -> BuildStage {
        BuildStage::Placement
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<(), BuildError> {
        let source = ctx.loaded.source_path();
        let snapshot = TreeSnapshot::capture(&source)
            .map_err(|e| BuildError::Placement(e.to_string()))?;
        let digest = snapshot.content_digest();
        info!(
            source = %source.display(),
            files = snapshot.files().count(),
            bytes = snapshot.total_size(),
            digest = %digest.short(),
            "Captured application tree"
        );

        let recipe = ctx.recipe();
        let (parent_step, parent_image) = ctx.head(self.stage())?;
        let step = plan::placement_step(recipe, parent_step, &digest);
        let parent = parent_image.to_string();

        let mut files = BuildContext::new();
        files
            .add_tree(&context_path(&recipe.source), &snapshot)
            .map_err(|e| BuildError::Placement(e.to_string()))?;
        ctx.snapshot = Some(snapshot);

        run_step(ctx, step, parent, files).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ImageBackend;
    use crate::pipeline::phases::test_support::{backend, context, project};
    use crate::pipeline::phases::{BasePhase, DependenciesPhase};
    use std::fs;

    #[tokio::test]
    async fn test_places_exact_source_tree() {
        let dir = project();
        fs::create_dir(dir.path().join("app/pkg")).unwrap();
        fs::write(dir.path().join("app/pkg/util.py"), "X = 1\n").unwrap();
        let backend = backend();
        let mut ctx = context(&dir, backend.clone());

        BasePhase.execute(&mut ctx).await.unwrap();
        DependenciesPhase.execute(&mut ctx).await.unwrap();
        PlacementPhase.execute(&mut ctx).await.unwrap();

        let image = ctx.image_id().unwrap().to_string();
        let mut files = backend.files_under(&image, "/app").unwrap();
        files.sort();
        assert_eq!(files, vec!["main.py", "pkg", "pkg/util.py"]);
        assert_eq!(
            backend.file(&image, "/app/main.py").unwrap(),
            b"print('hello')\n".to_vec()
        );

        let details = backend.inspect(&image).await.unwrap();
        assert_eq!(details.working_dir.as_deref(), Some("/app"));
        assert_eq!(ctx.snapshot.as_ref().unwrap().files().count(), 2);
    }

    #[tokio::test]
    async fn test_missing_source_is_placement_error() {
        let dir = project();
        fs::remove_dir_all(dir.path().join("app")).unwrap();
        let mut ctx = context(&dir, backend());

        BasePhase.execute(&mut ctx).await.unwrap();
        DependenciesPhase.execute(&mut ctx).await.unwrap();
        let err = PlacementPhase.execute(&mut ctx).await.unwrap_err();
        assert!(matches!(err, BuildError::Placement(_)));
        assert_eq!(err.stage(), Some(BuildStage::Placement));
    }
}
