//! Container engine abstraction
//!
//! Everything slipway needs from a container runtime goes through
//! [`ContainerEngine`]: image lookup and pulls for Base Selection, image
//! builds for assembly, and container lifecycle for Process Launch.
//! [`DockerEngine`] talks to the Docker Engine API; [`MockEngine`] is an
//! in-memory double for tests. [`LazyEngine`] defers connecting until the
//! first call.

pub mod classify;
mod docker;
mod lazy;
mod mock;

pub use docker::DockerEngine;
pub use lazy::LazyEngine;
pub use mock::{MockEngine, MockRun};

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// The engine or a registry reported that the object does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The engine (or the registry behind it) could not be reached
    #[error("transport error: {0}")]
    Transport(String),

    /// Any other API error response
    #[error("engine returned {status}: {message}")]
    Api { status: u16, message: String },
}

impl EngineError {
    pub fn message(&self) -> &str {
        match self {
            EngineError::NotFound(m) | EngineError::Transport(m) => m,
            EngineError::Api { message, .. } => message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineInfo {
    pub version: String,
    pub api_version: String,
}

/// An image known to the engine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageRecord {
    pub id: String,
    pub repo_digests: Vec<String>,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Build context archive (tar, optionally gzip-compressed)
    pub context: Bytes,
    /// Dockerfile path inside the context
    pub dockerfile: String,
    /// Throw-away tag the image is built under
    pub staging_tag: String,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
    pub image_id: Option<String>,
    /// Accumulated build output
    pub log: String,
    /// First error reported by the engine, if any
    pub error: Option<String>,
}

impl BuildOutput {
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.image_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub env: Vec<String>,
    pub container_port: u16,
    pub host_ip: String,
    pub host_port: u16,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub stream: LogStream,
    pub text: String,
}

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn version(&self) -> Result<EngineInfo, EngineError>;

    /// Looks an image up by reference or id; `Ok(None)` when absent
    async fn inspect_image(&self, reference: &str) -> Result<Option<ImageRecord>, EngineError>;

    /// Finds an image carrying `key=value` as a label
    async fn find_image_by_label(
        &self,
        key: &str,
        value: &str,
    ) -> Result<Option<ImageRecord>, EngineError>;

    async fn pull_image(&self, reference: &str) -> Result<(), EngineError>;

    async fn build_image(&self, request: BuildRequest) -> Result<BuildOutput, EngineError>;

    async fn tag_image(&self, image: &str, repository: &str, tag: &str) -> Result<(), EngineError>;

    async fn remove_image(&self, image: &str, force: bool) -> Result<(), EngineError>;

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, EngineError>;

    async fn start_container(&self, id: &str) -> Result<(), EngineError>;

    /// Blocks until the container exits and returns its exit status
    async fn wait_container(&self, id: &str) -> Result<i64, EngineError>;

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), EngineError>;

    async fn remove_container(&self, id: &str) -> Result<(), EngineError>;

    /// Follows the container's output until it exits
    fn follow_logs(&self, id: &str) -> mpsc::Receiver<LogLine>;
}
