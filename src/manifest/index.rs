//! Package index access for pre-resolution

use super::requirement::normalize_name;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IndexError {
    #[error("package '{0}' does not exist on the index")]
    NotFound(String),

    #[error("index {endpoint} is unreachable: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("unexpected index response for '{package}': {reason}")]
    Malformed { package: String, reason: String },
}

/// A published version of a package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub version: String,
    pub yanked: bool,
}

impl Release {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            yanked: false,
        }
    }

    pub fn yanked(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            yanked: true,
        }
    }
}

#[async_trait]
pub trait PackageIndex: Send + Sync {
    /// Every release of the normalized project `name` that has files
    async fn releases(&self, name: &str) -> Result<Vec<Release>, IndexError>;

    /// Where the index lives, for diagnostics
    fn endpoint(&self) -> &str;
}

#[derive(Debug, Deserialize)]
struct ProjectResponse {
    #[serde(default)]
    releases: HashMap<String, Vec<ReleaseFile>>,
}

#[derive(Debug, Deserialize)]
struct ReleaseFile {
    #[serde(default)]
    yanked: bool,
}

/// [`PackageIndex`] over the PyPI JSON API (`{base}/{project}/json`)
pub struct PypiIndex {
    base_url: String,
    http_client: Client,
}

impl PypiIndex {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, IndexError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| IndexError::Unreachable {
                endpoint: base_url.to_string(),
                reason: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    fn unreachable(&self, reason: impl Into<String>) -> IndexError {
        IndexError::Unreachable {
            endpoint: self.base_url.clone(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl PackageIndex for PypiIndex {
    async fn releases(&self, name: &str) -> Result<Vec<Release>, IndexError> {
        let url = format!("{}/{}/json", self.base_url, name);
        debug!(%url, "Querying package index");

        let response = match self.http_client.get(&url).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return Err(self.unreachable("request timed out")),
            Err(e) if e.is_connect() => {
                return Err(self.unreachable(format!("connection failed: {}", e)))
            }
            Err(e) => return Err(self.unreachable(e.to_string())),
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(IndexError::NotFound(name.to_string()));
        }
        if status.is_server_error() {
            warn!(%url, %status, "Package index returned a server error");
            return Err(self.unreachable(format!("server returned {}", status)));
        }
        if !status.is_success() {
            return Err(IndexError::Malformed {
                package: name.to_string(),
                reason: format!("status {}", status),
            });
        }

        let project: ProjectResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                self.unreachable("response timed out")
            } else {
                IndexError::Malformed {
                    package: name.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        Ok(releases_from(project))
    }

    fn endpoint(&self) -> &str {
        &self.base_url
    }
}

/// Releases without files are skipped; a release is yanked when all its files are
fn releases_from(project: ProjectResponse) -> Vec<Release> {
    let mut releases: Vec<Release> = project
        .releases
        .into_iter()
        .filter(|(_, files)| !files.is_empty())
        .map(|(version, files)| Release {
            yanked: files.iter().all(|f| f.yanked),
            version,
        })
        .collect();
    releases.sort_by(|a, b| a.version.cmp(&b.version));
    releases
}

/// In-memory [`PackageIndex`]
#[derive(Debug, Clone, Default)]
pub struct StaticIndex {
    packages: HashMap<String, Vec<Release>>,
    offline: bool,
}

impl StaticIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_package(mut self, name: &str, releases: Vec<Release>) -> Self {
        self.packages.insert(normalize_name(name), releases);
        self
    }

    /// Convenience for packages whose releases are all live
    pub fn with_versions(self, name: &str, versions: &[&str]) -> Self {
        let releases = versions.iter().map(|v| Release::new(*v)).collect();
        self.with_package(name, releases)
    }

    /// Every query fails as unreachable
    pub fn offline() -> Self {
        Self {
            packages: HashMap::new(),
            offline: true,
        }
    }
}

#[async_trait]
impl PackageIndex for StaticIndex {
    async fn releases(&self, name: &str) -> Result<Vec<Release>, IndexError> {
        if self.offline {
            return Err(IndexError::Unreachable {
                endpoint: self.endpoint().to_string(),
                reason: "offline".to_string(),
            });
        }
        self.packages
            .get(name)
            .cloned()
            .ok_or_else(|| IndexError::NotFound(name.to_string()))
    }

    fn endpoint(&self) -> &str {
        "static"
    }
}
