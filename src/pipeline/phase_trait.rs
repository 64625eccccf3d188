use super::context::BuildContext;
use crate::error::Stage;
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait WorkflowPhase: Send + Sync {
    /// Stage this phase belongs to, for progress and error attribution
    fn stage(&self) -> Stage;

    async fn execute(&self, context: &mut BuildContext) -> Result<()>;
}
