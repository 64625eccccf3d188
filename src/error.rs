//! Error taxonomy for the build and launch pipeline
//!
//! Every failure is fatal to the stage that raised it: nothing here is retried
//! or recovered locally. Each variant maps to a distinct process exit code so
//! callers (CI, orchestrators) can tell the failing stage apart without
//! parsing messages.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The pipeline stage an error originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    BaseSelection,
    DependencyMaterialization,
    ArtifactPlacement,
    ProcessLaunch,
    ImageAssembly,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::BaseSelection => "base selection",
            Stage::DependencyMaterialization => "dependency materialization",
            Stage::ArtifactPlacement => "artifact placement",
            Stage::ProcessLaunch => "process launch",
            Stage::ImageAssembly => "image assembly",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Base image '{reference}' could not be resolved: {reason}")]
    UnresolvedBaseImage { reference: String, reason: String },

    #[error("Dependency '{requirement}' could not be resolved: {reason}")]
    DependencyResolutionError { requirement: String, reason: String },

    #[error("Network unavailable while contacting {endpoint}: {reason}")]
    NetworkUnavailable {
        stage: Stage,
        endpoint: String,
        reason: String,
    },

    #[error("Source tree '{}' is unreadable: {reason}", path.display())]
    SourceTreeUnreadable { path: PathBuf, reason: String },

    #[error("Bind address {address} is already in use")]
    BindAddressInUse { address: String },

    #[error("Entry point '{entrypoint}' not found: {reason}")]
    EntryPointNotFound { entrypoint: String, reason: String },

    #[error("Invalid manifest {}:{line}: {reason}", path.display())]
    InvalidManifest {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Container engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Container engine error during {stage}: {message}")]
    Engine { stage: Stage, message: String },

    #[error("Server process exited with status {code}")]
    ServerExited { code: i64 },

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl PipelineError {
    /// The stage that produced this error, if it belongs to one
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::UnresolvedBaseImage { .. } => Some(Stage::BaseSelection),
            PipelineError::DependencyResolutionError { .. }
            | PipelineError::InvalidManifest { .. } => Some(Stage::DependencyMaterialization),
            PipelineError::NetworkUnavailable { stage, .. } => Some(*stage),
            PipelineError::SourceTreeUnreadable { .. } => Some(Stage::ArtifactPlacement),
            PipelineError::BindAddressInUse { .. }
            | PipelineError::EntryPointNotFound { .. }
            | PipelineError::ServerExited { .. } => Some(Stage::ProcessLaunch),
            PipelineError::Engine { stage, .. } => Some(*stage),
            PipelineError::EngineUnavailable(_) | PipelineError::Config(_) => None,
        }
    }

    /// Process exit code for this failure kind
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Config(_) => 2,
            PipelineError::UnresolvedBaseImage { .. } => 10,
            PipelineError::DependencyResolutionError { .. } => 11,
            PipelineError::NetworkUnavailable { .. } => 12,
            PipelineError::SourceTreeUnreadable { .. } => 13,
            PipelineError::BindAddressInUse { .. } => 14,
            PipelineError::EntryPointNotFound { .. } => 15,
            PipelineError::InvalidManifest { .. } => 16,
            PipelineError::EngineUnavailable(_) | PipelineError::Engine { .. } => 17,
            PipelineError::ServerExited { .. } => 18,
        }
    }

    pub fn source_tree(path: impl Into<PathBuf>, reason: impl fmt::Display) -> Self {
        PipelineError::SourceTreeUnreadable {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn entrypoint(entrypoint: impl Into<String>, reason: impl Into<String>) -> Self {
        PipelineError::EntryPointNotFound {
            entrypoint: entrypoint.into(),
            reason: reason.into(),
        }
    }
}

/// Exit code for failures that are not a [`PipelineError`]
pub const EXIT_FAILURE: i32 = 1;

/// Maps any error chain to an exit code, preferring the first `PipelineError` found
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<PipelineError>())
        .map(PipelineError::exit_code)
        .unwrap_or(EXIT_FAILURE)
}
