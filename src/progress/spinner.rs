//! Terminal spinner for interactive runs

use super::{ProgressEvent, ProgressHandler};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;

/// Shows the current stage on a spinner line and prints one line per
/// finished stage. Only meaningful when stderr is a terminal.
pub struct SpinnerHandler {
    bar: Mutex<Option<ProgressBar>>,
}

impl SpinnerHandler {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    /// Whether a spinner makes sense for this process
    pub fn is_interactive() -> bool {
        atty::is(atty::Stream::Stderr)
    }

    fn start(&self, message: String) {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg} ({elapsed})") {
            bar.set_style(style);
        }
        bar.set_message(message);
        bar.enable_steady_tick(Duration::from_millis(100));
        if let Some(previous) = self.lock().replace(bar) {
            previous.finish_and_clear();
        }
    }

    fn finish(&self, line: String) {
        match self.lock().take() {
            Some(bar) => bar.finish_with_message(line),
            None => eprintln!("{}", line),
        }
    }

    fn clear(&self) {
        if let Some(bar) = self.lock().take() {
            bar.finish_and_clear();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<ProgressBar>> {
        self.bar.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Default for SpinnerHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressHandler for SpinnerHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::StageStarted { stage } => self.start(format!("{}...", stage)),
            ProgressEvent::StageComplete { stage, duration } => {
                self.finish(format!("✓ {} ({:.1}s)", stage, duration.as_secs_f64()))
            }
            ProgressEvent::BuildStarted { .. } => self.start("building image...".to_string()),
            ProgressEvent::BuildComplete { image_id, duration } => self.finish(format!(
                "✓ built {} ({:.1}s)",
                image_id,
                duration.as_secs_f64()
            )),
            ProgressEvent::ImageReused { image_id, .. } => {
                self.finish(format!("✓ reused {}", image_id))
            }
            ProgressEvent::Failed { .. } => self.clear(),
            ProgressEvent::Started { .. } | ProgressEvent::Completed { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_lifecycle_releases_bar() {
        let handler = SpinnerHandler::new();
        handler.on_progress(&ProgressEvent::StageStarted {
            stage: "base selection".to_string(),
        });
        assert!(handler.lock().is_some());
        handler.on_progress(&ProgressEvent::StageComplete {
            stage: "base selection".to_string(),
            duration: Duration::from_millis(5),
        });
        assert!(handler.lock().is_none());

        handler.on_progress(&ProgressEvent::BuildStarted {
            staging_tag: "slipway-staging/x:pending".to_string(),
        });
        handler.on_progress(&ProgressEvent::Failed {
            stage: None,
            error: "boom".to_string(),
        });
        assert!(handler.lock().is_none());
    }
}
