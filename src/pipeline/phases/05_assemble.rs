use crate::context::{ContextArchive, GeneratedFile};
use crate::error::Stage;
use crate::manifest::install::STAGED_MANIFEST;
use crate::output::{BuildPlan, DependencyPlan, PlacementPlan, PLAN_VERSION};
use crate::pipeline::context::BuildContext;
use crate::pipeline::phase_trait::WorkflowPhase;
use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::info;

pub const DOCKERFILE: &str = "Dockerfile";

/// Combines the stage results into the build plan, the Dockerfile and the
/// build context archive
pub struct AssemblePhase;

#[async_trait]
impl WorkflowPhase for AssemblePhase {
    fn stage(&self) -> Stage {
        Stage::ImageAssembly
    }

    async fn execute(&self, context: &mut BuildContext) -> Result<()> {
        let manifest = context.manifest()?;
        let tree = context.tree()?;
        let canonical = manifest.canonical();

        let mut plan = BuildPlan {
            version: PLAN_VERSION.to_string(),
            base: context.base()?.clone(),
            dependencies: DependencyPlan {
                manifest: context.config.manifest.clone(),
                requirements: manifest.requirements().map(ToString::to_string).collect(),
                resolved: context.resolved.clone(),
                index: manifest.index.clone(),
                digest: hex::encode(Sha256::digest(canonical.as_bytes())),
            },
            install: context.install.clone(),
            placement: PlacementPlan {
                source: context.context_path.clone(),
                workdir: context.config.workdir.clone(),
                stats: tree.stats.clone(),
                tree_digest: tree.digest.clone(),
                context_digest: String::new(),
            },
            launch: context.launch()?.clone(),
            fingerprint: String::new(),
        };
        plan.fingerprint = plan.compute_fingerprint();

        let mut generated = vec![GeneratedFile::new(DOCKERFILE, plan.to_dockerfile())];
        if plan.install.is_some() {
            generated.push(GeneratedFile::new(STAGED_MANIFEST, canonical));
        }
        let archive = ContextArchive::assemble(tree, &generated)?;
        plan.placement.context_digest = archive.digest().to_string();

        info!(
            fingerprint = %plan.fingerprint,
            context_bytes = archive.len(),
            entries = archive.entries(),
            "Build context assembled"
        );

        context.plan = Some(plan);
        context.archive = Some(archive);
        Ok(())
    }
}
