use super::index::{IndexError, PackageIndex, Release};
use super::specifier::{Operator, SpecifierSet};
use super::version::Version;
use super::DependencyManifest;
use crate::error::{PipelineError, Stage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// The version chosen for one declared package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPackage {
    pub name: String,
    /// Combined constraint as declared, e.g. `fastapi==0.100.0`
    pub constraint: String,
    pub version: String,
}

/// Checks every declared requirement against a package index
///
/// Only the declared packages are resolved; their own dependencies are left
/// to the installer. Requirements with a direct URL or an environment marker
/// are skipped.
pub struct Resolver {
    index: Arc<dyn PackageIndex>,
}

struct Group {
    name: String,
    specifiers: SpecifierSet,
}

impl Resolver {
    pub fn new(index: Arc<dyn PackageIndex>) -> Self {
        Self { index }
    }

    pub async fn resolve(
        &self,
        manifest: &DependencyManifest,
    ) -> Result<Vec<ResolvedPackage>, PipelineError> {
        let mut groups: Vec<Group> = Vec::new();
        for requirement in manifest.requirements() {
            if requirement.url.is_some() || requirement.marker.is_some() {
                debug!(requirement = %requirement, "Skipping pre-resolution");
                continue;
            }
            match groups.iter_mut().find(|g| g.name == requirement.name) {
                Some(group) => group.specifiers.extend(&requirement.specifiers),
                None => groups.push(Group {
                    name: requirement.name.clone(),
                    specifiers: requirement.specifiers.clone(),
                }),
            }
        }

        let mut resolved = Vec::with_capacity(groups.len());
        for group in groups {
            let constraint = format!("{}{}", group.name, group.specifiers);
            let releases = self
                .index
                .releases(&group.name)
                .await
                .map_err(|e| self.index_failure(&constraint, e))?;

            let version = select(&releases, &group.specifiers).ok_or_else(|| {
                PipelineError::DependencyResolutionError {
                    requirement: constraint.clone(),
                    reason: format!(
                        "no release satisfies the constraint ({} releases checked)",
                        releases.len()
                    ),
                }
            })?;

            info!(package = %group.name, version = %version, "Resolved");
            resolved.push(ResolvedPackage {
                name: group.name,
                constraint,
                version: version.to_string(),
            });
        }

        Ok(resolved)
    }

    fn index_failure(&self, constraint: &str, err: IndexError) -> PipelineError {
        match err {
            IndexError::NotFound(_) => PipelineError::DependencyResolutionError {
                requirement: constraint.to_string(),
                reason: format!("package not found on {}", self.index.endpoint()),
            },
            IndexError::Unreachable { endpoint, reason } => PipelineError::NetworkUnavailable {
                stage: Stage::DependencyMaterialization,
                endpoint,
                reason,
            },
            IndexError::Malformed { reason, .. } => PipelineError::DependencyResolutionError {
                requirement: constraint.to_string(),
                reason,
            },
        }
    }
}

/// Highest release allowed by `specifiers`
///
/// Yanked releases count only when pinned with `==`. Pre-releases count when
/// a specifier names one, or when nothing else matches.
pub fn select(releases: &[Release], specifiers: &SpecifierSet) -> Option<Version> {
    let pinned = |version: &Version| {
        specifiers.0.iter().any(|s| {
            s.operator == Operator::Equal && !s.wildcard && s.version.as_ref() == Some(version)
        })
    };

    let candidates: Vec<Version> = releases
        .iter()
        .filter_map(|release| {
            let version = Version::parse(&release.version).ok()?;
            if release.yanked && !pinned(&version) {
                return None;
            }
            specifiers.contains(&version).then_some(version)
        })
        .collect();

    let finals = candidates.iter().filter(|v| !v.is_prerelease()).max();
    if specifiers.names_prerelease() {
        candidates.iter().max().cloned()
    } else {
        finals.or_else(|| candidates.iter().max()).cloned()
    }
}
