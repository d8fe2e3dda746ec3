use super::context::PipelineContext;
use super::state::BuildStage;
use crate::error::BuildError;
use async_trait::async_trait;

#[async_trait]
pub trait BuildPhase: Send + Sync {
    fn name(&self) -> &'static str;

    fn stage(&self) -> BuildStage;

    async fn execute(&self, context: &mut PipelineContext) -> Result<(), BuildError>;
}
