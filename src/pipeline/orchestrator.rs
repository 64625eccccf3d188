use super::context::BuildContext;
use super::phase_trait::WorkflowPhase;
use super::phases::{
    assemble::AssemblePhase, base::BasePhase, dependencies::DependenciesPhase,
    image::ImagePhase, launch::LaunchPhase, placement::PlacementPhase,
};
use crate::error::PipelineError;
use crate::output::{BuildPlan, BuildReport};
use crate::progress::{NoOpHandler, ProgressEvent, ProgressHandler};
use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

pub struct PipelineOrchestrator {
    progress: Arc<dyn ProgressHandler>,
}

impl Default for PipelineOrchestrator {
    fn default() -> Self {
        Self::new(Arc::new(NoOpHandler))
    }
}

impl PipelineOrchestrator {
    pub fn new(progress: Arc<dyn ProgressHandler>) -> Self {
        Self { progress }
    }

    /// Runs every stage and assembles the build context, without building
    pub async fn plan(&self, context: &mut BuildContext) -> Result<BuildPlan> {
        self.run(context, false).await?;
        context.plan.clone().ok_or_else(|| anyhow!("Pipeline produced no plan"))
    }

    /// Runs every stage, then builds (or reuses) and tags the image
    pub async fn build(&self, context: &mut BuildContext) -> Result<BuildReport> {
        self.run(context, true).await?;
        context
            .report
            .clone()
            .ok_or_else(|| anyhow!("Pipeline produced no build report"))
    }

    async fn run(&self, context: &mut BuildContext, build_image: bool) -> Result<()> {
        let start = Instant::now();
        info!(
            "Starting pipeline for: {}",
            context.context_path.display()
        );
        self.progress.on_progress(&ProgressEvent::Started {
            context_path: context.context_path.display().to_string(),
        });

        let mut phases: Vec<(Box<dyn WorkflowPhase>, &str)> = vec![
            (Box::new(BasePhase), "BasePhase"),
            (Box::new(DependenciesPhase), "DependenciesPhase"),
            (Box::new(PlacementPhase), "PlacementPhase"),
            (Box::new(LaunchPhase), "LaunchPhase"),
            (Box::new(AssemblePhase), "AssemblePhase"),
        ];
        if build_image {
            phases.push((
                Box::new(ImagePhase::new(Arc::clone(&self.progress))),
                "ImagePhase",
            ));
        }

        for (phase, phase_name) in phases {
            let stage = phase.stage().name().to_string();
            info!("Phase: {}", phase_name);
            self.progress.on_progress(&ProgressEvent::StageStarted {
                stage: stage.clone(),
            });

            let phase_start = Instant::now();
            if let Err(err) = phase.execute(context).await {
                let failed_stage = err
                    .downcast_ref::<PipelineError>()
                    .and_then(PipelineError::stage)
                    .map(|s| s.name().to_string())
                    .or(Some(stage));
                self.progress.on_progress(&ProgressEvent::Failed {
                    stage: failed_stage,
                    error: err.to_string(),
                });
                return Err(err).with_context(|| format!("Phase {} failed", phase_name));
            }

            self.progress.on_progress(&ProgressEvent::StageComplete {
                stage,
                duration: phase_start.elapsed(),
            });
            debug!("Phase {} complete", phase_name);
        }

        info!("Pipeline complete in {:.1}s", start.elapsed().as_secs_f64());
        self.progress.on_progress(&ProgressEvent::Completed {
            total_time: start.elapsed(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::BuildOutput;
    use crate::error::exit_code_for;
    use crate::output::FINGERPRINT_LABEL;
    use crate::pipeline::context::BuildOptions;
    use std::sync::Mutex;

    const APP: &[(&str, &str)] = &[
        ("requirements.txt", "fastapi==0.100.0\n"),
        (
            "main.py",
            "from fastapi import FastAPI\n\napp = FastAPI()\n",
        ),
    ];

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl ProgressHandler for Recorder {
        fn on_progress(&self, event: &ProgressEvent) {
            let line = match event {
                ProgressEvent::StageStarted { stage } => format!("start {}", stage),
                ProgressEvent::Failed { stage, .. } => {
                    format!("failed {}", stage.clone().unwrap_or_default())
                }
                ProgressEvent::ImageReused { .. } => "reused".to_string(),
                _ => return,
            };
            self.0.lock().unwrap().push(line);
        }
    }

    #[tokio::test]
    async fn test_plan_runs_stages_in_order() {
        let (mut context, engine, _dir) = BuildContext::with_mocks(APP);
        let recorder = Arc::new(Recorder::default());
        let orchestrator = PipelineOrchestrator::new(recorder.clone());

        let plan = orchestrator.plan(&mut context).await.unwrap();
        assert!(plan.fingerprint.starts_with("sha256:"));
        assert!(engine.builds().is_empty());
        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![
                "start base selection",
                "start dependency materialization",
                "start artifact placement",
                "start process launch",
                "start image assembly",
            ]
        );
    }

    #[tokio::test]
    async fn test_build_tags_and_removes_staging() {
        let (context, engine, _dir) = BuildContext::with_mocks(APP);
        let mut context = context.with_options(BuildOptions {
            tag: Some("shortener:latest".to_string()),
            rebuild: false,
        });

        let report = PipelineOrchestrator::default()
            .build(&mut context)
            .await
            .unwrap();
        assert!(!report.reused);
        assert_eq!(report.tag.as_deref(), Some("shortener:latest"));

        let builds = engine.builds();
        assert_eq!(builds.len(), 1);
        assert!(builds[0].staging_tag.starts_with("slipway-staging/"));
        assert_eq!(
            builds[0].labels.get(FINGERPRINT_LABEL),
            Some(&report.fingerprint)
        );
        assert_eq!(engine.tags(), vec!["shortener:latest"]);
        assert_eq!(engine.removed_images(), vec![builds[0].staging_tag.clone()]);
        assert!(engine
            .local_references()
            .iter()
            .all(|r| !r.starts_with("slipway-staging/")));
    }

    #[tokio::test]
    async fn test_second_build_reuses_image() {
        let (context, engine, _dir) = BuildContext::with_mocks(APP);
        let options = BuildOptions {
            tag: Some("shortener:latest".to_string()),
            rebuild: false,
        };
        let mut context = context.with_options(options.clone());
        let recorder = Arc::new(Recorder::default());
        let orchestrator = PipelineOrchestrator::new(recorder.clone());

        let first = orchestrator.build(&mut context).await.unwrap();
        let second = orchestrator.build(&mut context).await.unwrap();
        assert!(second.reused);
        assert_eq!(first.image_id, second.image_id);
        assert_eq!(first.fingerprint, second.fingerprint);
        assert_eq!(engine.builds().len(), 1);
        assert!(recorder.0.lock().unwrap().contains(&"reused".to_string()));

        context.options.rebuild = true;
        let third = orchestrator.build(&mut context).await.unwrap();
        assert!(!third.reused);
        assert_eq!(engine.builds().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_build_produces_no_tag() {
        let (context, engine, _dir) = BuildContext::with_mocks(APP);
        let engine = engine.with_build_output(BuildOutput {
            image_id: None,
            log: "ERROR: No matching distribution found for fastapi==0.100.0\n".to_string(),
            error: Some("The command '/bin/sh -c pip install' returned a non-zero code: 1".to_string()),
        });
        let mut context = context.with_options(BuildOptions {
            tag: Some("shortener:latest".to_string()),
            rebuild: false,
        });

        let recorder = Arc::new(Recorder::default());
        let err = PipelineOrchestrator::new(recorder.clone())
            .build(&mut context)
            .await
            .unwrap_err();

        assert_eq!(exit_code_for(&err), 11);
        assert!(engine.tags().is_empty());
        assert!(engine.local_references().iter().all(|r| r != "shortener:latest"));
        assert!(context.report.is_none());
        assert_eq!(
            recorder.0.lock().unwrap().last().map(String::as_str),
            Some("failed dependency materialization")
        );
    }

    #[tokio::test]
    async fn test_failure_stops_pipeline() {
        let (mut context, engine, _dir) =
            BuildContext::with_mocks(&[("requirements.txt", "doesnotexist==9.9.9\n")]);
        let err = PipelineOrchestrator::default()
            .build(&mut context)
            .await
            .unwrap_err();

        assert!(format!("{:#}", err).contains("Phase DependenciesPhase failed"));
        assert_eq!(exit_code_for(&err), 11);
        assert!(context.tree.is_none());
        assert!(engine.builds().is_empty());
    }
}
