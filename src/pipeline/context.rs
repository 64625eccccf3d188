//! Build context shared by all phases

use crate::config::SlipwayConfig;
use crate::context::{ContextArchive, SourceTree};
use crate::engine::ContainerEngine;
use crate::fs::FileSystem;
use crate::image::{BaseResolver, EnvironmentHandle};
use crate::manifest::{DependencyManifest, InstallStep, PackageIndex, ResolvedPackage};
use crate::output::{BuildPlan, BuildReport, LaunchPlan};
use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Per-invocation switches that are not part of the image's identity
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Final `repository:tag`; derived from the context directory when absent
    pub tag: Option<String>,
    /// Build even if an image with the same fingerprint exists
    pub rebuild: bool,
}

/// Owns the long-lived services and every stage's result
pub struct BuildContext {
    pub context_path: PathBuf,
    pub config: SlipwayConfig,
    pub options: BuildOptions,

    pub engine: Arc<dyn ContainerEngine>,
    pub index: Arc<dyn PackageIndex>,
    pub file_system: Arc<dyn FileSystem>,
    pub base_resolver: Arc<BaseResolver>,

    // Stage results
    pub base: Option<EnvironmentHandle>,
    pub manifest: Option<DependencyManifest>,
    pub resolved: Vec<ResolvedPackage>,
    pub install: Option<InstallStep>,
    pub tree: Option<SourceTree>,
    pub launch: Option<LaunchPlan>,
    pub plan: Option<BuildPlan>,
    pub archive: Option<ContextArchive>,
    pub report: Option<BuildReport>,
}

impl BuildContext {
    pub fn new(
        context_path: &Path,
        config: SlipwayConfig,
        engine: Arc<dyn ContainerEngine>,
        index: Arc<dyn PackageIndex>,
        file_system: Arc<dyn FileSystem>,
    ) -> Self {
        let base_resolver = Arc::new(BaseResolver::new(Arc::clone(&engine), config.pull));
        Self {
            context_path: context_path.to_path_buf(),
            config,
            options: BuildOptions::default(),
            engine,
            index,
            file_system,
            base_resolver,
            base: None,
            manifest: None,
            resolved: Vec::new(),
            install: None,
            tree: None,
            launch: None,
            plan: None,
            archive: None,
            report: None,
        }
    }

    pub fn with_options(mut self, options: BuildOptions) -> Self {
        self.options = options;
        self
    }

    pub fn base(&self) -> Result<&EnvironmentHandle> {
        self.base
            .as_ref()
            .ok_or_else(|| anyhow!("Base image must be selected before this phase"))
    }

    pub fn manifest(&self) -> Result<&DependencyManifest> {
        self.manifest
            .as_ref()
            .ok_or_else(|| anyhow!("Dependency manifest must be loaded before this phase"))
    }

    pub fn tree(&self) -> Result<&SourceTree> {
        self.tree
            .as_ref()
            .ok_or_else(|| anyhow!("Source tree must be scanned before this phase"))
    }

    pub fn launch(&self) -> Result<&LaunchPlan> {
        self.launch
            .as_ref()
            .ok_or_else(|| anyhow!("Launch command must be fixed before this phase"))
    }

    pub fn plan(&self) -> Result<&BuildPlan> {
        self.plan
            .as_ref()
            .ok_or_else(|| anyhow!("Build plan must be assembled before this phase"))
    }

    pub fn archive(&self) -> Result<&ContextArchive> {
        self.archive
            .as_ref()
            .ok_or_else(|| anyhow!("Build context must be archived before this phase"))
    }

    /// Final image tag: the requested one, or `slipway/<context dir>:latest`
    pub fn target_tag(&self) -> String {
        if let Some(tag) = &self.options.tag {
            return tag.clone();
        }
        let dir = self
            .context_path
            .canonicalize()
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_default();
        let name: String = dir
            .to_lowercase()
            .chars()
            .map(|c| match c {
                'a'..='z' | '0'..='9' | '.' | '_' | '-' => c,
                _ => '-',
            })
            .collect();
        let name = name.trim_matches(|c: char| !c.is_ascii_alphanumeric());
        let name = if name.is_empty() { "app" } else { name };
        format!("slipway/{}:latest", name)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::engine::MockEngine;
    use crate::fs::RealFileSystem;
    use crate::manifest::StaticIndex;
    use std::fs;
    use tempfile::TempDir;

    pub(crate) const BASE: &str = "python:3.11-slim";
    pub(crate) const BASE_DIGEST: &str =
        "sha256:1111111111111111111111111111111111111111111111111111111111111111";

    impl BuildContext {
        /// Context over a temp directory with a mock engine and a static index
        pub(crate) fn with_mocks(files: &[(&str, &str)]) -> (Self, MockEngine, TempDir) {
            let dir = TempDir::new().unwrap();
            for (rel, content) in files {
                let path = dir.path().join(rel);
                fs::create_dir_all(path.parent().unwrap()).unwrap();
                fs::write(path, content).unwrap();
            }

            let engine = MockEngine::new().with_remote_image(BASE, BASE_DIGEST);
            let index = StaticIndex::new().with_versions("fastapi", &["0.99.1", "0.100.0"]);
            // Pinned explicitly so tests that mutate SLIPWAY_* cannot leak in
            let config = SlipwayConfig {
                base_image: BASE.to_string(),
                manifest: PathBuf::from("requirements.txt"),
                workdir: "/app".to_string(),
                server: "uvicorn".to_string(),
                entrypoint: "main:app".to_string(),
                port: 80,
                resolve: true,
                pull: crate::config::PullPolicy::Missing,
                pin_base: true,
                check_entrypoint: true,
                ..SlipwayConfig::default()
            };

            let context = Self::new(
                dir.path(),
                config,
                Arc::new(engine.clone()),
                Arc::new(index),
                Arc::new(RealFileSystem),
            );
            (context, engine, dir)
        }
    }

    #[test]
    fn test_results_start_empty() {
        let (context, _engine, _dir) = BuildContext::with_mocks(&[]);
        assert!(context.base().is_err());
        assert!(context.plan().is_err());
        assert!(context.resolved.is_empty());
    }

    #[test]
    fn test_target_tag() {
        let (mut context, _engine, _dir) = BuildContext::with_mocks(&[]);
        let tag = context.target_tag();
        assert!(tag.starts_with("slipway/"), "{}", tag);
        assert!(tag.ends_with(":latest"));
        assert!(!tag.contains(' '));

        context.options.tag = Some("shortener:1.0".to_string());
        assert_eq!(context.target_tag(), "shortener:1.0");
    }
}
