use crate::config::BIND_HOST;
use crate::error::Stage;
use crate::launch::{EntryPoint, LaunchCommand};
use crate::output::LaunchPlan;
use crate::pipeline::context::BuildContext;
use crate::pipeline::phase_trait::WorkflowPhase;
use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

/// Fixes the server command and checks the entry point against the placed tree
pub struct LaunchPhase;

#[async_trait]
impl WorkflowPhase for LaunchPhase {
    fn stage(&self) -> Stage {
        Stage::ProcessLaunch
    }

    async fn execute(&self, context: &mut BuildContext) -> Result<()> {
        let config = &context.config;
        let entrypoint = EntryPoint::parse(&config.entrypoint)?;
        let module_file = entrypoint.verify(context.tree()?, config.check_entrypoint)?;

        let command = LaunchCommand::new(&config.server, &entrypoint, BIND_HOST, config.port);
        info!(command = %command, module = %module_file.display(), "Launch command fixed");

        context.launch = Some(LaunchPlan {
            entrypoint,
            command,
            module_file: Some(module_file),
        });
        Ok(())
    }
}
