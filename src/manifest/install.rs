use super::DependencyManifest;
use serde::{Deserialize, Serialize};

/// Where the canonical manifest is placed inside the build context
pub const STAGED_MANIFEST: &str = ".slipway/requirements.txt";

/// Where the manifest is copied inside the image for the install layer
const IMAGE_MANIFEST_DIR: &str = "/tmp/slipway";

/// Installer invocation for the dependency layer
///
/// The manifest arrives through its own COPY layer and stays in that layer.
/// The install runs with pip's HTTP cache disabled, so no download cache is
/// written to any layer; the later `rm` only hides the manifest from the
/// final filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallStep {
    /// Manifest path inside the build context
    pub source: String,
    /// Manifest path inside the image while installing
    pub target: String,
    /// Shell command run in the install layer
    pub command: String,
    pub requirements: usize,
}

impl InstallStep {
    /// `None` when the manifest declares nothing to install
    pub fn render(manifest: &DependencyManifest) -> Option<Self> {
        if manifest.is_empty() {
            return None;
        }

        let target = format!("{}/requirements.txt", IMAGE_MANIFEST_DIR);
        let command = [
            "pip install".to_string(),
            "--no-cache-dir".to_string(),
            "--disable-pip-version-check".to_string(),
            "--no-input".to_string(),
            format!("-r {}", target),
            format!("&& rm -rf {}", IMAGE_MANIFEST_DIR),
        ]
        .join(" ");

        Some(Self {
            source: STAGED_MANIFEST.to_string(),
            target,
            command,
            requirements: manifest.entries.len(),
        })
    }
}
