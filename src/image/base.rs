use super::reference::ImageReference;
use crate::config::PullPolicy;
use crate::engine::{ContainerEngine, EngineError};
use crate::error::{PipelineError, Stage};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

const DEFAULT_REGISTRY: &str = "docker.io";

/// Immutable identity of the runtime environment a build starts from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentHandle {
    /// Identity as requested, e.g. `python:3.11-slim`
    pub reference: String,
    /// Reference used in `FROM`; digest-pinned when the engine knows the digest
    pub pinned: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_id: Option<String>,
}

impl EnvironmentHandle {
    /// Handle built from the reference alone, without asking the engine
    pub fn unresolved(reference: &ImageReference) -> Self {
        Self {
            reference: reference.to_string(),
            pinned: reference.to_string(),
            image_id: None,
        }
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned.contains("@sha256:")
    }
}

/// Resolves base identities to [`EnvironmentHandle`]s
///
/// Resolution is cached per identity string for the lifetime of the
/// resolver; a second lookup never reaches the engine.
pub struct BaseResolver {
    engine: Arc<dyn ContainerEngine>,
    pull: PullPolicy,
    cache: Mutex<HashMap<String, EnvironmentHandle>>,
}

impl BaseResolver {
    pub fn new(engine: Arc<dyn ContainerEngine>, pull: PullPolicy) -> Self {
        Self {
            engine,
            pull,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn resolve(&self, identity: &str) -> Result<EnvironmentHandle, PipelineError> {
        if let Some(handle) = self.cached(identity) {
            debug!(identity, "Base image resolved from cache");
            return Ok(handle);
        }

        let reference = parse(identity)?;
        let registry = reference
            .registry
            .clone()
            .unwrap_or_else(|| DEFAULT_REGISTRY.to_string());

        let present = self
            .engine
            .inspect_image(identity)
            .await
            .map_err(|e| engine_failure(identity, &registry, e))?;

        let record = match (self.pull, present) {
            (PullPolicy::Always, _) | (PullPolicy::Missing, None) => {
                info!(image = identity, "Pulling base image");
                self.engine
                    .pull_image(identity)
                    .await
                    .map_err(|e| engine_failure(identity, &registry, e))?;
                self.engine
                    .inspect_image(identity)
                    .await
                    .map_err(|e| engine_failure(identity, &registry, e))?
                    .ok_or_else(|| PipelineError::UnresolvedBaseImage {
                        reference: identity.to_string(),
                        reason: "image is missing after pull".to_string(),
                    })?
            }
            (_, Some(record)) => record,
            (PullPolicy::Never, None) => {
                return Err(PipelineError::UnresolvedBaseImage {
                    reference: identity.to_string(),
                    reason: "not present locally and pull policy is 'never'".to_string(),
                })
            }
        };

        let pinned = if reference.is_pinned() {
            reference.to_string()
        } else {
            match reference.digest_from(&record.repo_digests) {
                Some(digest) => reference.pinned(digest),
                None => {
                    debug!(image = identity, "Engine reports no repo digest, using tag");
                    reference.to_string()
                }
            }
        };

        let handle = EnvironmentHandle {
            reference: identity.to_string(),
            pinned,
            image_id: Some(record.id),
        };
        info!(image = identity, pinned = %handle.pinned, "Base image resolved");

        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(identity.to_string(), handle.clone());
        Ok(handle)
    }

    fn cached(&self, identity: &str) -> Option<EnvironmentHandle> {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(identity)
            .cloned()
    }
}

/// Parses a base identity, failing as an unresolved base
pub fn parse(identity: &str) -> Result<ImageReference, PipelineError> {
    ImageReference::parse(identity).map_err(|e| PipelineError::UnresolvedBaseImage {
        reference: identity.to_string(),
        reason: e.to_string(),
    })
}

fn engine_failure(identity: &str, registry: &str, err: EngineError) -> PipelineError {
    match err {
        EngineError::NotFound(reason) => PipelineError::UnresolvedBaseImage {
            reference: identity.to_string(),
            reason,
        },
        EngineError::Transport(reason) => PipelineError::NetworkUnavailable {
            stage: Stage::BaseSelection,
            endpoint: registry.to_string(),
            reason,
        },
        EngineError::Api { message, .. } => PipelineError::Engine {
            stage: Stage::BaseSelection,
            message,
        },
    }
}
