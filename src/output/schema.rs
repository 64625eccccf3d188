//! Build plan and build report
//!
//! A [`BuildPlan`] is everything the four stages decided, in the order they
//! decided it. It is what `slipway plan` prints and what the generated
//! Dockerfile and the build fingerprint are derived from. A [`BuildReport`]
//! describes the image an engine build produced (or reused).

use crate::context::TreeStats;
use crate::image::EnvironmentHandle;
use crate::launch::{EntryPoint, LaunchCommand};
use crate::manifest::{IndexOptions, InstallStep, ResolvedPackage};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;

pub const PLAN_VERSION: &str = "1.0";

/// Image label carrying the build fingerprint
pub const FINGERPRINT_LABEL: &str = "io.slipway.fingerprint";

/// Image label carrying the pinned base reference
pub const BASE_LABEL: &str = "org.opencontainers.image.base.name";

#[derive(Debug, Clone, Serialize)]
pub struct BuildPlan {
    pub version: String,
    pub base: EnvironmentHandle,
    pub dependencies: DependencyPlan,
    /// Absent when the manifest declares nothing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install: Option<InstallStep>,
    pub placement: PlacementPlan,
    pub launch: LaunchPlan,
    pub fingerprint: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DependencyPlan {
    pub manifest: PathBuf,
    /// Declared requirements in manifest order
    pub requirements: Vec<String>,
    /// Versions the index currently offers for each declared constraint
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resolved: Vec<ResolvedPackage>,
    #[serde(skip_serializing_if = "IndexOptions::is_default")]
    pub index: IndexOptions,
    /// SHA-256 of the canonical manifest
    pub digest: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlacementPlan {
    pub source: PathBuf,
    pub workdir: String,
    pub stats: TreeStats,
    pub tree_digest: String,
    /// SHA-256 of the uncompressed build context; empty until assembled
    #[serde(skip_serializing_if = "String::is_empty")]
    pub context_digest: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LaunchPlan {
    pub entrypoint: EntryPoint,
    pub command: LaunchCommand,
    /// Module file the entry point imports, relative to the workdir
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_file: Option<PathBuf>,
}

impl BuildPlan {
    /// Digest over every input that shapes the image
    ///
    /// Covers the pinned base, the canonical manifest, the placed tree, the
    /// launch command and the working directory. The context archive is left
    /// out because it embeds the Dockerfile, which is itself derived from
    /// these inputs.
    pub fn compute_fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        let mut field = |name: &str, value: &str| {
            hasher.update(name.as_bytes());
            hasher.update([0]);
            hasher.update(value.as_bytes());
            hasher.update([0]);
        };
        field("version", &self.version);
        field("base", &self.base.pinned);
        field("manifest", &self.dependencies.digest);
        field("tree", &self.placement.tree_digest);
        field("workdir", &self.placement.workdir);
        field("launch", &self.launch.command.exec_form());
        field("port", &self.launch.command.port.to_string());
        format!("sha256:{}", hex::encode(hasher.finalize()))
    }

    pub fn to_dockerfile(&self) -> String {
        super::dockerfile::render(self)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize build plan to YAML")
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize build plan to JSON")
    }
}

fn short(digest: &str) -> &str {
    let hex = digest.strip_prefix("sha256:").unwrap_or(digest);
    &hex[..hex.len().min(12)]
}

impl fmt::Display for BuildPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Build Plan")?;
        writeln!(f, "==========")?;
        writeln!(f, "Fingerprint: {}", short(&self.fingerprint))?;
        writeln!(f)?;

        writeln!(f, "Base:")?;
        writeln!(f, "  Identity: {}", self.base.reference)?;
        if self.base.pinned != self.base.reference {
            writeln!(f, "  Pinned:   {}", self.base.pinned)?;
        }
        writeln!(f)?;

        writeln!(f, "Dependencies ({}):", self.dependencies.manifest.display())?;
        if self.dependencies.requirements.is_empty() {
            writeln!(f, "  (none)")?;
        }
        for requirement in &self.dependencies.requirements {
            writeln!(f, "  - {}", requirement)?;
        }
        if !self.dependencies.resolved.is_empty() {
            writeln!(f, "  Resolved:")?;
            for package in &self.dependencies.resolved {
                writeln!(f, "    {} -> {}", package.constraint, package.version)?;
            }
        }
        if let Some(ref install) = self.install {
            writeln!(f, "  Install:  {}", install.command)?;
        }
        writeln!(f)?;

        let stats = &self.placement.stats;
        writeln!(f, "Placement:")?;
        writeln!(
            f,
            "  {} -> {}",
            self.placement.source.display(),
            self.placement.workdir
        )?;
        writeln!(
            f,
            "  {} files, {} directories, {} bytes ({} ignored)",
            stats.files, stats.directories, stats.bytes, stats.ignored
        )?;
        writeln!(f)?;

        writeln!(f, "Launch:")?;
        writeln!(f, "  Command:  {}", self.launch.command)?;
        writeln!(f, "  Port:     {}", self.launch.command.port)?;
        if let Some(ref module) = self.launch.module_file {
            writeln!(f, "  Module:   {}", module.display())?;
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    pub image_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub fingerprint: String,
    /// True when an existing image with the same fingerprint was reused
    pub reused: bool,
    pub duration_ms: u64,
}

impl fmt::Display for BuildReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let action = if self.reused { "Reused" } else { "Built" };
        writeln!(f, "{} image {}", action, self.image_id)?;
        if let Some(ref tag) = self.tag {
            writeln!(f, "  Tag:         {}", tag)?;
        }
        writeln!(f, "  Fingerprint: {}", short(&self.fingerprint))?;
        write!(f, "  Duration:    {:.1}s", self.duration_ms as f64 / 1000.0)
    }
}
