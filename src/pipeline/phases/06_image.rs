use super::assemble::DOCKERFILE;
use crate::engine::{classify, BuildRequest, EngineError};
use crate::error::{PipelineError, Stage};
use crate::image::ImageReference;
use crate::launch::MANAGED_LABEL;
use crate::output::{BuildReport, BASE_LABEL, FINGERPRINT_LABEL};
use crate::pipeline::context::BuildContext;
use crate::pipeline::phase_trait::WorkflowPhase;
use crate::progress::{ProgressEvent, ProgressHandler};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

const STAGING_REPOSITORY: &str = "slipway-staging";
const STAGING_TAG: &str = "pending";

/// Builds the image from the assembled context
///
/// The engine builds under a throw-away staging tag. Only a successful build
/// receives the final tag, and the staging tag is removed either way, so a
/// failed build never leaves a usable tag behind. An image already labeled
/// with the same fingerprint is reused unless a rebuild is forced.
pub struct ImagePhase {
    progress: Arc<dyn ProgressHandler>,
}

impl ImagePhase {
    pub fn new(progress: Arc<dyn ProgressHandler>) -> Self {
        Self { progress }
    }
}

#[async_trait]
impl WorkflowPhase for ImagePhase {
    fn stage(&self) -> Stage {
        Stage::ImageAssembly
    }

    async fn execute(&self, context: &mut BuildContext) -> Result<()> {
        let started = Instant::now();
        let plan = context.plan()?;
        let archive = context.archive()?;
        let engine = Arc::clone(&context.engine);
        let target = context.target_tag();
        let (repository, tag) = split_tag(&target)?;

        if !context.options.rebuild {
            let existing = engine
                .find_image_by_label(FINGERPRINT_LABEL, &plan.fingerprint)
                .await
                .map_err(engine_error)?;
            if let Some(image) = existing {
                self.progress.on_progress(&ProgressEvent::ImageReused {
                    image_id: image.id.clone(),
                    fingerprint: plan.fingerprint.clone(),
                });
                engine
                    .tag_image(&image.id, &repository, &tag)
                    .await
                    .map_err(engine_error)?;
                context.report = Some(BuildReport {
                    image_id: image.id,
                    tag: Some(target),
                    fingerprint: plan.fingerprint.clone(),
                    reused: true,
                    duration_ms: started.elapsed().as_millis() as u64,
                });
                return Ok(());
            }
        }

        let staging = format!(
            "{}/{}:{}",
            STAGING_REPOSITORY,
            uuid::Uuid::new_v4().simple(),
            STAGING_TAG
        );
        let labels = HashMap::from([
            (FINGERPRINT_LABEL.to_string(), plan.fingerprint.clone()),
            (BASE_LABEL.to_string(), plan.base.pinned.clone()),
            (MANAGED_LABEL.to_string(), "true".to_string()),
        ]);

        self.progress.on_progress(&ProgressEvent::BuildStarted {
            staging_tag: staging.clone(),
        });
        let build_started = Instant::now();
        let built = engine
            .build_image(BuildRequest {
                context: archive.bytes(),
                dockerfile: DOCKERFILE.to_string(),
                staging_tag: staging.clone(),
                labels,
            })
            .await;

        let outcome = match built {
            Err(e) => Err(engine_error(e)),
            Ok(output) => match (output.succeeded(), output.image_id.clone()) {
                (true, Some(image_id)) => Ok(image_id),
                _ => Err(classify::build_failure(
                    &output.log,
                    output.error.as_deref().unwrap_or("build produced no image"),
                    &context.config.index_url,
                )),
            },
        };

        let image_id = match outcome {
            Ok(image_id) => {
                let tagged = engine.tag_image(&image_id, &repository, &tag).await;
                remove_staging(engine.as_ref(), &staging).await;
                tagged.map_err(engine_error)?;
                image_id
            }
            Err(e) => {
                remove_staging(engine.as_ref(), &staging).await;
                return Err(e.into());
            }
        };

        self.progress.on_progress(&ProgressEvent::BuildComplete {
            image_id: image_id.clone(),
            duration: build_started.elapsed(),
        });
        info!(image = %image_id, tag = %target, "Image tagged");

        context.report = Some(BuildReport {
            image_id,
            tag: Some(target),
            fingerprint: plan.fingerprint.clone(),
            reused: false,
            duration_ms: started.elapsed().as_millis() as u64,
        });
        Ok(())
    }
}

fn split_tag(target: &str) -> Result<(String, String), PipelineError> {
    let reference = ImageReference::parse(target).map_err(|e| PipelineError::Engine {
        stage: Stage::ImageAssembly,
        message: format!("invalid tag '{}': {}", target, e),
    })?;
    Ok((reference.name(), reference.tag_or_default().to_string()))
}

fn engine_error(err: EngineError) -> PipelineError {
    match err {
        EngineError::Transport(message) => PipelineError::EngineUnavailable(message),
        other => PipelineError::Engine {
            stage: Stage::ImageAssembly,
            message: other.to_string(),
        },
    }
}

async fn remove_staging(engine: &dyn crate::engine::ContainerEngine, staging: &str) {
    match engine.remove_image(staging, false).await {
        Ok(()) => debug!(tag = %staging, "Staging tag removed"),
        Err(EngineError::NotFound(_)) => debug!(tag = %staging, "Staging tag was never created"),
        Err(e) => warn!(tag = %staging, "Failed to remove staging tag: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::BuildOutput;
    use crate::pipeline::phases::{
        assemble::AssemblePhase, base::BasePhase, dependencies::DependenciesPhase,
        launch::LaunchPhase, placement::PlacementPhase,
    };
    use crate::progress::NoOpHandler;

    async fn assembled() -> (BuildContext, crate::engine::MockEngine, tempfile::TempDir) {
        let (mut context, engine, dir) = BuildContext::with_mocks(&[
            ("requirements.txt", "fastapi==0.100.0\n"),
            ("main.py", "app = object()\n"),
        ]);
        BasePhase.execute(&mut context).await.unwrap();
        DependenciesPhase.execute(&mut context).await.unwrap();
        PlacementPhase.execute(&mut context).await.unwrap();
        LaunchPhase.execute(&mut context).await.unwrap();
        AssemblePhase.execute(&mut context).await.unwrap();
        (context, engine, dir)
    }

    fn phase() -> ImagePhase {
        ImagePhase::new(Arc::new(NoOpHandler))
    }

    #[tokio::test]
    async fn test_labels_and_default_tag() {
        let (mut context, engine, _dir) = assembled().await;
        phase().execute(&mut context).await.unwrap();

        let report = context.report.clone().unwrap();
        let target = context.target_tag();
        assert_eq!(report.tag.as_deref(), Some(target.as_str()));
        assert!(target.starts_with("slipway/"));

        let build = &engine.builds()[0];
        assert_eq!(build.dockerfile, DOCKERFILE);
        assert_eq!(build.labels.get(MANAGED_LABEL).map(String::as_str), Some("true"));
        assert_eq!(
            build.labels.get(BASE_LABEL),
            Some(&context.plan().unwrap().base.pinned)
        );
    }

    #[tokio::test]
    async fn test_unclassified_failure_is_engine_error() {
        let (mut context, engine, _dir) = assembled().await;
        let engine = engine.with_build_output(BuildOutput {
            image_id: None,
            log: "Step 4/7 : RUN pip install\n".to_string(),
            error: Some("no space left on device".to_string()),
        });

        let err = phase().execute(&mut context).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::Engine {
                stage: Stage::ImageAssembly,
                ..
            })
        ));
        assert!(engine.tags().is_empty());
        assert!(context.report.is_none());
    }

    #[tokio::test]
    async fn test_network_failure_during_install() {
        let (mut context, engine, _dir) = assembled().await;
        let _engine = engine.with_build_output(BuildOutput {
            image_id: None,
            log: "WARNING: Retrying after connection broken by 'NewConnectionError: Failed to establish a new connection'\n"
                .to_string(),
            error: Some("returned a non-zero code: 1".to_string()),
        });

        let err = phase().execute(&mut context).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::NetworkUnavailable { .. })
        ));
    }

    #[test]
    fn test_split_tag() {
        assert_eq!(
            split_tag("shortener:1.0").unwrap(),
            ("shortener".to_string(), "1.0".to_string())
        );
        assert_eq!(
            split_tag("localhost:5000/team/shortener").unwrap(),
            ("localhost:5000/team/shortener".to_string(), "latest".to_string())
        );
        assert!(split_tag("Not A Tag").is_err());
    }

    #[test]
    fn test_transport_errors_mean_engine_unavailable() {
        assert!(matches!(
            engine_error(EngineError::Transport("connection refused".to_string())),
            PipelineError::EngineUnavailable(_)
        ));
        assert!(matches!(
            engine_error(EngineError::NotFound("x".to_string())),
            PipelineError::Engine { .. }
        ));
    }
}
