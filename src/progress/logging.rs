//! Logging-based progress handler

use super::{ProgressEvent, ProgressHandler};
use tracing::{debug, error, info};

/// Handler that logs progress events using tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl ProgressHandler for LoggingHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Started { context_path } => {
                info!(context = %context_path, "Starting pipeline");
            }
            ProgressEvent::StageStarted { stage } => {
                info!(stage = %stage, "Starting stage");
            }
            ProgressEvent::StageComplete { stage, duration } => {
                info!(
                    stage = %stage,
                    duration_ms = duration.as_millis() as u64,
                    "Stage complete"
                );
            }
            ProgressEvent::BuildStarted { staging_tag } => {
                info!(staging_tag = %staging_tag, "Building image");
            }
            ProgressEvent::BuildComplete { image_id, duration } => {
                info!(
                    image = %image_id,
                    duration_ms = duration.as_millis() as u64,
                    "Image built"
                );
            }
            ProgressEvent::ImageReused {
                image_id,
                fingerprint,
            } => {
                info!(image = %image_id, fingerprint = %fingerprint, "Reusing existing image");
            }
            ProgressEvent::Completed { total_time } => {
                debug!(total_time_ms = total_time.as_millis() as u64, "Pipeline complete");
            }
            ProgressEvent::Failed { stage, error } => match stage {
                Some(stage) => error!(stage = %stage, error = %error, "Pipeline failed"),
                None => error!(error = %error, "Pipeline failed"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_logging_all_events() {
        let handler = LoggingHandler;

        let events = vec![
            ProgressEvent::Started {
                context_path: "/test".to_string(),
            },
            ProgressEvent::StageStarted {
                stage: "artifact placement".to_string(),
            },
            ProgressEvent::StageComplete {
                stage: "artifact placement".to_string(),
                duration: Duration::from_millis(12),
            },
            ProgressEvent::BuildStarted {
                staging_tag: "slipway-staging/x:pending".to_string(),
            },
            ProgressEvent::BuildComplete {
                image_id: "sha256:abc".to_string(),
                duration: Duration::from_secs(3),
            },
            ProgressEvent::ImageReused {
                image_id: "sha256:abc".to_string(),
                fingerprint: "sha256:def".to_string(),
            },
            ProgressEvent::Completed {
                total_time: Duration::from_secs(5),
            },
            ProgressEvent::Failed {
                stage: Some("process launch".to_string()),
                error: "Bind address 0.0.0.0:80 is already in use".to_string(),
            },
            ProgressEvent::Failed {
                stage: None,
                error: "engine unavailable".to_string(),
            },
        ];

        for event in events {
            handler.on_progress(&event);
        }
    }
}
