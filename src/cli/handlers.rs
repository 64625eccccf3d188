//! Command handlers
//!
//! Each handler returns the process exit code. Failures are logged with the
//! stage they came from, and the code is picked from the first
//! [`PipelineError`] in the error chain.

use super::commands::{BuildArgs, HealthArgs, LaunchArgs, PlanArgs, RunArgs, StageArgs, UpArgs};
use super::output::{HealthStatus, OutputFormat, OutputFormatter};
use crate::config::{SlipwayConfig, BIND_HOST};
use crate::engine::{ContainerEngine, DockerEngine, LazyEngine};
use crate::error::{exit_code_for, PipelineError, Stage};
use crate::fs::RealFileSystem;
use crate::launch::{env_file, shutdown_signal, LaunchOptions, Launcher};
use crate::manifest::{PackageIndex, PypiIndex};
use crate::output::BuildReport;
use crate::pipeline::{BuildContext, BuildOptions, PipelineOrchestrator};
use crate::progress::{LoggingHandler, NoOpHandler, ProgressHandler, SpinnerHandler};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Package probed by `health` to check the index answers
const INDEX_PROBE_PACKAGE: &str = "pip";

pub async fn handle_build(args: &BuildArgs, quiet: bool, verbose: bool) -> i32 {
    let result: Result<()> = async {
        let options = BuildOptions {
            tag: args.tag.clone(),
            rebuild: args.rebuild,
        };
        let (_, report) = build(
            args.context_path.as_deref(),
            &args.stage,
            options,
            quiet,
            verbose,
        )
        .await?;
        let formatter = OutputFormatter::new(args.format.into());
        println!("{}", formatter.format_report(&report)?);
        Ok(())
    }
    .await;
    finish(result)
}

pub async fn handle_plan(args: &PlanArgs, quiet: bool, verbose: bool) -> i32 {
    let result: Result<()> = async {
        let context_path = resolve_context_path(args.context_path.as_deref())?;
        let mut config = load_config(&context_path, &args.stage)?;
        if args.no_pin {
            config.pin_base = false;
        }

        // Without pinning nothing in planning talks to the engine
        let engine: Arc<dyn ContainerEngine> = if config.pin_base {
            connect_engine().await?
        } else {
            Arc::new(LazyEngine::docker())
        };
        let mut context = create_context(&context_path, config, engine)?;
        let plan = PipelineOrchestrator::new(progress_handler(quiet, verbose))
            .plan(&mut context)
            .await?;

        let format: OutputFormat = args.format.into();
        let output = OutputFormatter::new(format).format_plan(&plan)?;
        match &args.output {
            Some(output_file) => {
                std::fs::write(output_file, &output).with_context(|| {
                    format!("Failed to write output to {}", output_file.display())
                })?;
                info!("Output written to: {}", output_file.display());
                if !quiet {
                    println!("Output written to: {}", output_file.display());
                }
            }
            None => println!("{}", output),
        }
        Ok(())
    }
    .await;
    finish(result)
}

pub async fn handle_run(args: &RunArgs) -> i32 {
    let result: Result<()> = async {
        let defaults = SlipwayConfig::default();
        let container_port = args.container_port.unwrap_or(defaults.port);
        let entrypoint = args
            .entrypoint
            .clone()
            .unwrap_or_else(|| defaults.entrypoint.clone());

        let options = launch_options(&args.launch, &defaults, container_port, entrypoint)?;
        let engine = connect_engine().await?;
        launch(engine, &args.image, options).await
    }
    .await;
    finish(result)
}

pub async fn handle_up(args: &UpArgs, quiet: bool, verbose: bool) -> i32 {
    let result: Result<()> = async {
        let options = BuildOptions {
            tag: args.tag.clone(),
            rebuild: args.rebuild,
        };
        let (context, report) = build(
            args.context_path.as_deref(),
            &args.stage,
            options,
            quiet,
            verbose,
        )
        .await?;
        if !quiet {
            println!("{}", report);
        }

        let image = report.tag.clone().unwrap_or_else(|| report.image_id.clone());
        let launch_options = launch_options(
            &args.launch,
            &context.config,
            context.config.port,
            context.config.entrypoint.clone(),
        )?;
        launch(Arc::clone(&context.engine), &image, launch_options).await
    }
    .await;
    finish(result)
}

pub async fn handle_health(args: &HealthArgs) -> i32 {
    let config = SlipwayConfig::default();
    let mut health_results = BTreeMap::new();

    let engine_status = match DockerEngine::connect() {
        Ok(engine) => match engine.version().await {
            Ok(info) => HealthStatus::available(format!(
                "Docker {} (API {})",
                info.version, info.api_version
            )),
            Err(e) => HealthStatus::unavailable("Cannot reach the engine".to_string())
                .with_details(e.to_string()),
        },
        Err(e) => HealthStatus::unavailable("Cannot connect to the engine".to_string())
            .with_details(e.to_string()),
    };
    let engine_ok = engine_status.available;
    health_results.insert("Container engine".to_string(), engine_status);

    let index_status = match PypiIndex::new(&config.index_url, config.request_timeout()) {
        Ok(index) => match index.releases(INDEX_PROBE_PACKAGE).await {
            Ok(_) => HealthStatus::available(format!("Reachable at {}", config.index_url)),
            Err(e) => HealthStatus::unavailable(format!("Cannot query {}", config.index_url))
                .with_details(e.to_string()),
        },
        Err(e) => HealthStatus::unavailable("Cannot create the index client".to_string())
            .with_details(e.to_string()),
    };
    health_results.insert("Package index".to_string(), index_status);

    let formatter = OutputFormatter::new(args.format.into());
    match formatter.format_health(&health_results) {
        Ok(output) => println!("{}", output),
        Err(e) => {
            error!("Failed to format output: {}", e);
            return 1;
        }
    }

    if engine_ok {
        0
    } else {
        PipelineError::EngineUnavailable(String::new()).exit_code()
    }
}

async fn build(
    context_path: Option<&Path>,
    stage: &StageArgs,
    options: BuildOptions,
    quiet: bool,
    verbose: bool,
) -> Result<(BuildContext, BuildReport)> {
    let context_path = resolve_context_path(context_path)?;
    let config = load_config(&context_path, stage)?;
    let engine = connect_engine().await?;
    let mut context = create_context(&context_path, config, engine)?.with_options(options);

    let report = PipelineOrchestrator::new(progress_handler(quiet, verbose))
        .build(&mut context)
        .await?;
    Ok((context, report))
}

async fn launch(engine: Arc<dyn ContainerEngine>, image: &str, options: LaunchOptions) -> Result<()> {
    // Installed before the container exists so an early signal still stops it
    let shutdown = shutdown_signal();
    info!(image = %image, address = %options.address(), "Launching server");
    let server = Launcher::new(engine).launch(image, options).await?;
    server.run_until(shutdown).await?;
    info!("Server stopped");
    Ok(())
}

fn resolve_context_path(path: Option<&Path>) -> Result<PathBuf> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => env::current_dir().context("Failed to get current directory")?,
    };
    debug!("Build context: {}", path.display());

    if !path.is_dir() {
        return Err(PipelineError::source_tree(&path, "not a directory").into());
    }
    let path = path
        .canonicalize()
        .map_err(|e| PipelineError::source_tree(&path, e))?;
    Ok(path)
}

fn load_config(context_path: &Path, stage: &StageArgs) -> Result<SlipwayConfig> {
    let mut config = SlipwayConfig::load(context_path).map_err(PipelineError::from)?;
    stage.apply(&mut config);
    config.validate().map_err(PipelineError::from)?;
    debug!("Configuration:\n{}", config);
    Ok(config)
}

async fn connect_engine() -> Result<Arc<dyn ContainerEngine>, PipelineError> {
    let engine =
        DockerEngine::connect().map_err(|e| PipelineError::EngineUnavailable(e.to_string()))?;
    let info = engine
        .version()
        .await
        .map_err(|e| PipelineError::EngineUnavailable(e.to_string()))?;
    debug!(version = %info.version, api = %info.api_version, "Connected to container engine");
    Ok(Arc::new(engine))
}

fn create_context(
    context_path: &Path,
    config: SlipwayConfig,
    engine: Arc<dyn ContainerEngine>,
) -> Result<BuildContext> {
    let index = PypiIndex::new(&config.index_url, config.request_timeout()).map_err(|e| {
        PipelineError::NetworkUnavailable {
            stage: Stage::DependencyMaterialization,
            endpoint: config.index_url.clone(),
            reason: e.to_string(),
        }
    })?;
    Ok(BuildContext::new(
        context_path,
        config,
        engine,
        Arc::new(index),
        Arc::new(RealFileSystem),
    ))
}

fn launch_options(
    args: &LaunchArgs,
    config: &SlipwayConfig,
    container_port: u16,
    entrypoint: String,
) -> Result<LaunchOptions> {
    let file_vars = match &args.env_file {
        Some(path) => env_file::load(path)?,
        None => Vec::new(),
    };
    let explicit = args
        .env
        .iter()
        .map(|pair| env_file::parse_assignment(pair))
        .collect::<Result<Vec<_>>>()?;

    Ok(LaunchOptions {
        name: args.name.clone(),
        host: BIND_HOST.to_string(),
        host_port: args.host_port.unwrap_or(container_port),
        container_port,
        env: env_file::merge(file_vars, explicit),
        entrypoint,
        stop_timeout: config.stop_timeout(),
        ready_timeout: config.ready_timeout(),
    })
}

fn progress_handler(quiet: bool, verbose: bool) -> Arc<dyn ProgressHandler> {
    if quiet {
        Arc::new(NoOpHandler)
    } else if !verbose && SpinnerHandler::is_interactive() {
        Arc::new(SpinnerHandler::new())
    } else {
        Arc::new(LoggingHandler)
    }
}

fn finish(result: Result<()>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(err) => {
            let stage = err
                .chain()
                .find_map(|cause| cause.downcast_ref::<PipelineError>())
                .and_then(PipelineError::stage);
            match stage {
                Some(stage) => error!("{} failed: {:#}", stage, err),
                None => error!("{:#}", err),
            }
            exit_code_for(&err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_resolve_context_path_rejects_missing_dir() {
        let err = resolve_context_path(Some(Path::new("/nonexistent/slipway/context"))).unwrap_err();
        assert_eq!(exit_code_for(&err), 13);
    }

    #[test]
    fn test_resolve_context_path_canonicalizes() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("app");
        std::fs::create_dir(&nested).unwrap();

        let resolved = resolve_context_path(Some(&nested.join("..").join("app"))).unwrap();
        assert_eq!(resolved, nested.canonicalize().unwrap());
    }

    #[test]
    #[serial]
    fn test_load_config_applies_flags_over_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("slipway.toml"),
            "entrypoint = \"api:app\"\nport = 8000\n",
        )
        .unwrap();
        let stage = StageArgs {
            port: Some(9000),
            ..Default::default()
        };

        let config = load_config(dir.path(), &stage).unwrap();
        assert_eq!(config.entrypoint, "api:app");
        assert_eq!(config.port, 9000);
    }

    #[test]
    #[serial]
    fn test_load_config_invalid_value_is_config_error() {
        let dir = TempDir::new().unwrap();
        let stage = StageArgs {
            port: Some(0),
            ..Default::default()
        };
        let err = load_config(dir.path(), &stage).unwrap_err();
        assert_eq!(exit_code_for(&err), 2);
    }

    #[test]
    #[serial]
    fn test_launch_options_merge_env() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "DATABASE_URL=sqlite:///file.db").unwrap();
        writeln!(file, "DEBUG=0").unwrap();

        let args = LaunchArgs {
            host_port: None,
            env: vec!["DEBUG=1".to_string()],
            env_file: Some(file.path().to_path_buf()),
            name: Some("shortener".to_string()),
        };
        let options =
            launch_options(&args, &SlipwayConfig::default(), 80, "main:app".to_string()).unwrap();

        assert_eq!(options.host, "0.0.0.0");
        assert_eq!(options.host_port, 80);
        assert_eq!(options.container_port, 80);
        assert!(options.env.contains(&"DEBUG=1".to_string()));
        assert!(options.env.contains(&"DATABASE_URL=sqlite:///file.db".to_string()));
        assert!(!options.env.contains(&"DEBUG=0".to_string()));
        assert_eq!(options.name.as_deref(), Some("shortener"));
    }

    #[test]
    fn test_launch_options_rejects_bad_env() {
        let args = LaunchArgs {
            env: vec!["NOT AN ASSIGNMENT".to_string()],
            ..Default::default()
        };
        assert!(launch_options(&args, &SlipwayConfig::default(), 80, "main:app".to_string()).is_err());
    }

    #[test]
    fn test_finish_maps_exit_codes() {
        assert_eq!(finish(Ok(())), 0);
        let err = anyhow::Error::from(PipelineError::BindAddressInUse {
            address: "0.0.0.0:80".to_string(),
        })
        .context("Launch failed");
        assert_eq!(finish(Err(err)), 14);
        assert_eq!(finish(Err(anyhow::anyhow!("plain failure"))), 1);
    }
}
