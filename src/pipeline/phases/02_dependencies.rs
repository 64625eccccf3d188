use crate::error::Stage;
use crate::manifest::{DependencyManifest, InstallStep, Resolver};
use crate::pipeline::context::BuildContext;
use crate::pipeline::phase_trait::WorkflowPhase;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Loads the manifest, checks each declared constraint against the index,
/// and fixes the install step
pub struct DependenciesPhase;

#[async_trait]
impl WorkflowPhase for DependenciesPhase {
    fn stage(&self) -> Stage {
        Stage::DependencyMaterialization
    }

    async fn execute(&self, context: &mut BuildContext) -> Result<()> {
        let path = context.context_path.join(&context.config.manifest);
        let manifest = DependencyManifest::load(&path, context.file_system.as_ref())?;
        info!(
            manifest = %path.display(),
            requirements = manifest.entries.len(),
            "Dependency manifest loaded"
        );

        if !context.config.resolve {
            info!("Pre-resolution disabled, the installer resolves at build time");
        } else if !manifest.index.is_default() {
            warn!("Manifest selects its own package index, skipping pre-resolution");
        } else {
            let resolver = Resolver::new(Arc::clone(&context.index));
            context.resolved = resolver.resolve(&manifest).await?;
        }

        context.install = InstallStep::render(&manifest);
        context.manifest = Some(manifest);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::manifest::StaticIndex;

    #[tokio::test]
    async fn test_resolves_declared_packages() {
        let (mut context, _engine, _dir) =
            BuildContext::with_mocks(&[("requirements.txt", "fastapi==0.100.0\n")]);
        DependenciesPhase.execute(&mut context).await.unwrap();

        assert_eq!(context.resolved.len(), 1);
        assert_eq!(context.resolved[0].version, "0.100.0");
        assert!(context.install.is_some());
    }

    #[tokio::test]
    async fn test_unknown_package_fails() {
        let (mut context, _engine, _dir) =
            BuildContext::with_mocks(&[("requirements.txt", "doesnotexist==9.9.9\n")]);
        let err = DependenciesPhase.execute(&mut context).await.unwrap_err();

        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::DependencyResolutionError { requirement, .. }) => {
                assert!(requirement.contains("doesnotexist"))
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(context.manifest.is_none());
    }

    #[tokio::test]
    async fn test_unsatisfiable_constraint_fails() {
        let (mut context, _engine, _dir) =
            BuildContext::with_mocks(&[("requirements.txt", "fastapi>=1.0,<0.5\n")]);
        let err = DependenciesPhase.execute(&mut context).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::DependencyResolutionError { .. })
        ));
    }

    #[tokio::test]
    async fn test_resolution_can_be_disabled() {
        let (mut context, _engine, _dir) =
            BuildContext::with_mocks(&[("requirements.txt", "doesnotexist==9.9.9\n")]);
        context.config.resolve = false;
        DependenciesPhase.execute(&mut context).await.unwrap();
        assert!(context.resolved.is_empty());
        assert_eq!(context.manifest().unwrap().entries.len(), 1);
    }

    #[tokio::test]
    async fn test_offline_index_is_network_error() {
        let (mut context, _engine, _dir) =
            BuildContext::with_mocks(&[("requirements.txt", "fastapi==0.100.0\n")]);
        context.index = Arc::new(StaticIndex::offline());
        let err = DependenciesPhase.execute(&mut context).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::NetworkUnavailable {
                stage: Stage::DependencyMaterialization,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_empty_manifest_has_no_install_step() {
        let (mut context, _engine, _dir) =
            BuildContext::with_mocks(&[("requirements.txt", "# nothing yet\n")]);
        DependenciesPhase.execute(&mut context).await.unwrap();
        assert!(context.install.is_none());
    }

    #[tokio::test]
    async fn test_missing_manifest() {
        let (mut context, _engine, _dir) = BuildContext::with_mocks(&[("main.py", "app = 1\n")]);
        let err = DependenciesPhase.execute(&mut context).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::InvalidManifest { line: 0, .. })
        ));
    }
}
