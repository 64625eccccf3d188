use crate::context::SourceTree;
use crate::error::Stage;
use crate::pipeline::context::BuildContext;
use crate::pipeline::phase_trait::WorkflowPhase;
use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

/// Reads the application tree that is placed under the working directory
pub struct PlacementPhase;

#[async_trait]
impl WorkflowPhase for PlacementPhase {
    fn stage(&self) -> Stage {
        Stage::ArtifactPlacement
    }

    async fn execute(&self, context: &mut BuildContext) -> Result<()> {
        let root = context.context_path.clone();
        let tree = tokio::task::spawn_blocking(move || SourceTree::scan(&root)).await??;

        info!(
            files = tree.stats.files,
            directories = tree.stats.directories,
            bytes = tree.stats.bytes,
            ignored = tree.stats.ignored,
            workdir = %context.config.workdir,
            "Source tree ready for placement"
        );
        context.tree = Some(tree);
        Ok(())
    }
}
