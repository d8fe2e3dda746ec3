use super::step_helper::run_step;
use crate::context::BuildContext;
use crate::error::BuildError;
use crate::identity::Distro;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::phase_trait::BuildPhase;
use crate::pipeline::BuildStage;
use crate::plan;
use async_trait::async_trait;
use tracing::info;

pub struct PrivilegePhase;

impl PrivilegePhase {
    fn distro(ctx: &PipelineContext) -> Distro {
        match ctx.identity.as_ref().map(|i| i.distro) {
            Some(Distro::Unknown) | None => ctx
                .recipe()
                .base_ref()
                .map(|r| Distro::guess_from_reference(&r))
                .unwrap_or(Distro::Unknown),
            Some(distro) => distro,
        }
    }
}

#[async_trait]
impl BuildPhase for PrivilegePhase {
    fn name(&self) -> &'static str {
        "PrivilegePhase"
    }

    fn stage(&self) -> BuildStage {
        BuildStage::Privilege
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<(), BuildError> {
        let recipe = ctx.recipe();
        if recipe.user.is_privileged() {
            return Err(BuildError::Identity(format!(
                "'{}' is a privileged identity",
                recipe.user
            )));
        }

        let tool = Self::distro(ctx).account_tool();
        info!(user = %recipe.user.name, tool = ?tool, "Dropping privileges");

        let (parent_step, parent_image) = ctx.head(self.stage())?;
        let step = plan::privilege_step(recipe, parent_step, tool);
        let parent = parent_image.to_string();

        run_step(ctx, step, parent, BuildContext::new()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockImage;
    use crate::backend::{ImageBackend, MockBackend};
    use crate::identity::PasswdDb;
    use crate::pipeline::phases::test_support::{backend, context, project, BASE};
    use crate::pipeline::phases::{BasePhase, DependenciesPhase, PlacementPhase};
    use crate::recipe::ExecutionIdentity;
    use std::sync::Arc;

    async fn run_through_placement(ctx: &mut PipelineContext) {
        BasePhase.execute(ctx).await.unwrap();
        DependenciesPhase.execute(ctx).await.unwrap();
        PlacementPhase.execute(ctx).await.unwrap();
    }

    #[tokio::test]
    async fn test_creates_account_and_switches_user() {
        let dir = project();
        let backend = backend();
        let mut ctx = context(&dir, backend.clone());
        run_through_placement(&mut ctx).await;

        PrivilegePhase.execute(&mut ctx).await.unwrap();

        let image = ctx.image_id().unwrap().to_string();
        let details = backend.inspect(&image).await.unwrap();
        assert_eq!(details.user.as_deref(), Some("user"));

        let passwd = backend.file(&image, "/etc/passwd").unwrap();
        let db = PasswdDb::parse(&String::from_utf8_lossy(&passwd));
        let entry = db.find("user").unwrap();
        assert_ne!(entry.uid, 0);
    }

    #[tokio::test]
    async fn test_debian_base_uses_useradd() {
        let dir = project();
        let backend = Arc::new(MockBackend::new().with_remote_image(BASE, MockImage::debian()));
        let mut ctx = context(&dir, backend.clone());
        run_through_placement(&mut ctx).await;

        PrivilegePhase.execute(&mut ctx).await.unwrap();

        let calls = backend.build_calls();
        let last = calls.last().unwrap();
        assert!(last.dockerfile.contains("RUN useradd --no-create-home user"));
        assert!(last.dockerfile.ends_with("USER user\n"));
    }

    #[tokio::test]
    async fn test_uid_collision_is_identity_error() {
        let dir = project();
        let backend = backend();
        let mut ctx = context(&dir, backend);
        ctx.loaded.recipe.user = ExecutionIdentity::new("svc").with_uid(2);
        BasePhase.execute(&mut ctx).await.unwrap_err();

        let mut ctx = context(&dir, backend_with_late_account());
        run_through_placement(&mut ctx).await;
        let err = PrivilegePhase.execute(&mut ctx).await.unwrap_err();
        assert!(matches!(err, BuildError::Identity(_)));
    }

    fn backend_with_late_account() -> Arc<MockBackend> {
        Arc::new(
            MockBackend::new()
                .with_remote_image(BASE, MockImage::alpine())
                .fail_stage(BuildStage::Privilege, "adduser: user 'user' in use"),
        )
    }

    #[tokio::test]
    async fn test_root_identity_rejected() {
        let dir = project();
        let mut ctx = context(&dir, backend());
        run_through_placement(&mut ctx).await;
        ctx.loaded.recipe.user = ExecutionIdentity::new("root");

        let err = PrivilegePhase.execute(&mut ctx).await.unwrap_err();
        assert!(matches!(err, BuildError::Identity(_)));
    }
}
