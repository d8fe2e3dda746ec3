use super::step_helper::run_step;
use crate::backend::{BackendError, ImageBackend};
use crate::context::BuildContext;
use crate::error::BuildError;
use crate::identity::{BaseIdentityInfo, OS_RELEASE_PATHS, PASSWD_PATH};
use crate::pipeline::context::PipelineContext;
use crate::pipeline::phase_trait::BuildPhase;
use crate::pipeline::BuildStage;
use crate::plan;
use async_trait::async_trait;
use tracing::{debug, info};

pub struct BasePhase;

#[async_trait]
impl BuildPhase for BasePhase {
    fn name(&self) -> &'static str {
        "BasePhase"
    }

    fn stage(&self) -> BuildStage {
        BuildStage::Base
    }

    async fn execute(&self, ctx: &mut PipelineContext) -> Result<(), BuildError> {
        let recipe = ctx.recipe().clone();
        let reference = recipe.base_ref().map_err(|e| BuildError::Resolution {
            reference: recipe.base.clone(),
            reason: e.to_string(),
        })?;

        let resolved = ctx
            .backend
            .resolve(&reference, ctx.config.pull_policy)
            .await
            .map_err(|e| match e {
                BackendError::ImageNotFound(_) | BackendError::StepFailed { .. } => {
                    BuildError::Resolution {
                        reference: recipe.base.clone(),
                        reason: e.to_string(),
                    }
                }
                other => BuildError::backend(BuildStage::Base, other),
            })?;
        info!(
            base = %reference,
            image = %resolved.id,
            pulled = resolved.pulled,
            "Resolved base image"
        );

        let identity = inspect_base(ctx.backend.as_ref(), &resolved.id).await?;
        debug!(
            distro = %identity.distro,
            accounts = identity.passwd.len(),
            "Inspected base image"
        );
        identity
            .passwd
            .check_available(&recipe.user)
            .map_err(|conflict| BuildError::Identity(conflict.to_string()))?;

        let step = plan::base_step(&recipe, &resolved.id);
        let parent = resolved.id.clone();
        ctx.base = Some(resolved);
        ctx.identity = Some(identity);

        run_step(ctx, step, parent, BuildContext::new()).await
    }
}

async fn inspect_base(
    backend: &dyn ImageBackend,
    image: &str,
) -> Result<BaseIdentityInfo, BuildError> {
    let read = |path: &'static str| async move {
        backend
            .read_file(image, path)
            .await
            .map(|data| data.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
            .map_err(|e| BuildError::backend(BuildStage::Base, e))
    };

    let mut os_release = None;
    for path in OS_RELEASE_PATHS {
        if let Some(content) = read(*path).await? {
            os_release = Some(content);
            break;
        }
    }
    let passwd = read(PASSWD_PATH).await?;

    Ok(BaseIdentityInfo::new(
        os_release.as_deref(),
        passwd.as_deref(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::mock::MockImage;
    use crate::backend::{MockBackend, PullPolicy};
    use crate::identity::Distro;
    use crate::pipeline::phases::test_support::{backend, context, project, BASE};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_base_phase_resolves_and_builds() {
        let dir = project();
        let backend = backend();
        let mut ctx = context(&dir, backend.clone());

        BasePhase.execute(&mut ctx).await.unwrap();

        let base = ctx.base.as_ref().unwrap();
        assert!(base.pulled);
        assert_eq!(ctx.identity.as_ref().unwrap().distro, Distro::Alpine);
        assert_eq!(ctx.steps.len(), 1);
        assert_eq!(backend.executed(BuildStage::Base), 1);

        let image = ctx.image_id().unwrap().to_string();
        let details = backend.inspect(&image).await.unwrap();
        assert_eq!(details.env_value("PYTHONUNBUFFERED"), Some("1"));
    }

    #[tokio::test]
    async fn test_unknown_base_is_resolution_error() {
        let dir = project();
        let backend = Arc::new(MockBackend::new());
        let mut ctx = context(&dir, backend);

        let err = BasePhase.execute(&mut ctx).await.unwrap_err();
        assert!(matches!(err, BuildError::Resolution { .. }));
        assert_eq!(err.stage(), Some(BuildStage::Base));
    }

    #[tokio::test]
    async fn test_pull_policy_never_requires_local_image() {
        let dir = project();
        let mut ctx = context(&dir, backend());
        ctx.config.pull_policy = PullPolicy::Never;
        assert!(matches!(
            BasePhase.execute(&mut ctx).await,
            Err(BuildError::Resolution { .. })
        ));

        let local = Arc::new(MockBackend::new().with_local_image(BASE, MockImage::alpine()));
        let mut ctx = context(&dir, local.clone());
        ctx.config.pull_policy = PullPolicy::Never;
        BasePhase.execute(&mut ctx).await.unwrap();
        assert!(!ctx.base.unwrap().pulled);
        assert!(local.pulls().is_empty());
    }

    #[tokio::test]
    async fn test_colliding_account_fails_before_building() {
        let dir = project();
        let backend = Arc::new(
            MockBackend::new().with_remote_image(BASE, MockImage::alpine().with_account("user", 1000)),
        );
        let mut ctx = context(&dir, backend.clone());

        let err = BasePhase.execute(&mut ctx).await.unwrap_err();
        assert!(matches!(err, BuildError::Identity(_)));
        assert!(backend.build_calls().is_empty());
    }
}
