//! Progress handler trait and events

use std::time::Duration;

/// Events emitted while the pipeline runs
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Pipeline started for a build context
    Started { context_path: String },

    /// A stage began
    StageStarted { stage: String },

    /// A stage finished successfully
    StageComplete { stage: String, duration: Duration },

    /// The engine build started under a staging tag
    BuildStarted { staging_tag: String },

    /// The engine build finished
    BuildComplete { image_id: String, duration: Duration },

    /// An image with the same fingerprint already existed
    ImageReused { image_id: String, fingerprint: String },

    /// Pipeline finished
    Completed { total_time: Duration },

    /// Pipeline failed
    Failed { stage: Option<String>, error: String },
}

/// Receives progress events from the pipeline
pub trait ProgressHandler: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
}

/// Handler that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHandler;

impl ProgressHandler for NoOpHandler {
    fn on_progress(&self, _event: &ProgressEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct RecordingHandler {
        events: Arc<Mutex<Vec<String>>>,
    }

    impl ProgressHandler for RecordingHandler {
        fn on_progress(&self, event: &ProgressEvent) {
            let name = format!("{:?}", event);
            let name = name.split(|c: char| c == ' ' || c == '{').next().unwrap_or_default().to_string();
            self.events.lock().unwrap().push(name);
        }
    }

    #[test]
    fn test_noop_handler() {
        NoOpHandler.on_progress(&ProgressEvent::Started {
            context_path: "/test".to_string(),
        });
    }

    #[test]
    fn test_events_are_delivered_in_order() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let handler = RecordingHandler {
            events: events.clone(),
        };

        handler.on_progress(&ProgressEvent::Started {
            context_path: "/test".to_string(),
        });
        handler.on_progress(&ProgressEvent::StageStarted {
            stage: "base selection".to_string(),
        });
        handler.on_progress(&ProgressEvent::Completed {
            total_time: Duration::from_secs(1),
        });

        assert_eq!(
            *events.lock().unwrap(),
            vec!["Started", "StageStarted", "Completed"]
        );
    }
}
