use crate::error::Stage;
use crate::image::{base, EnvironmentHandle};
use crate::pipeline::context::BuildContext;
use crate::pipeline::phase_trait::WorkflowPhase;
use anyhow::Result;
use async_trait::async_trait;
use tracing::{debug, warn};

/// Resolves the configured base identity to an immutable environment handle
pub struct BasePhase;

#[async_trait]
impl WorkflowPhase for BasePhase {
    fn stage(&self) -> Stage {
        Stage::BaseSelection
    }

    async fn execute(&self, context: &mut BuildContext) -> Result<()> {
        let identity = context.config.base_image.clone();

        let handle = if context.config.pin_base {
            let handle = context.base_resolver.resolve(&identity).await?;
            if !handle.is_pinned() {
                warn!(image = %identity, "Base image has no registry digest; FROM uses the mutable tag");
            }
            handle
        } else {
            debug!(image = %identity, "Digest pinning disabled, engine not consulted");
            EnvironmentHandle::unresolved(&base::parse(&identity)?)
        };

        context.base = Some(handle);
        Ok(())
    }
}
