use crate::config::{PullPolicy, SlipwayConfig};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Builds a Python ASGI application into a container image and launches it
#[derive(Parser, Debug)]
#[command(
    name = "slipway",
    about = "Build and launch container images for Python ASGI applications",
    version,
    author,
    long_about = "slipway turns a source tree and a requirements file into a runnable \
                  container image in four stages: base selection, dependency \
                  materialization, artifact placement and process launch. It can then \
                  start exactly one server container from that image."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Enable debug output")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - suppress non-error output"
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Build the application image",
        long_about = "Runs every stage and builds the image with the container engine.\n\
                      An image carrying the same build fingerprint is reused unless \
                      --rebuild is given.\n\n\
                      Examples:\n  \
                      slipway build\n  \
                      slipway build ./shortener -t shortener:1.0\n  \
                      slipway build --base python:3.12-slim --format json"
    )]
    Build(BuildArgs),

    #[command(
        about = "Show what would be built, without building",
        long_about = "Runs every stage and prints the resulting build plan or the \
                      generated Dockerfile.\n\n\
                      Examples:\n  \
                      slipway plan\n  \
                      slipway plan --format dockerfile -o Dockerfile\n  \
                      slipway plan --no-pin --format yaml"
    )]
    Plan(PlanArgs),

    #[command(
        about = "Launch a server container from an image",
        long_about = "Starts exactly one container from IMAGE with its port published, \
                      forwards its output and stops it on SIGTERM or SIGINT.\n\n\
                      Examples:\n  \
                      slipway run shortener:1.0\n  \
                      slipway run shortener:1.0 -p 8080 -e DATABASE_URL=sqlite:///db.sqlite"
    )]
    Run(RunArgs),

    #[command(about = "Build the image, then launch it")]
    Up(UpArgs),

    #[command(about = "Check container engine availability")]
    Health(HealthArgs),
}

/// Flags shared by every command that runs the stages
#[derive(Args, Debug, Clone, Default)]
pub struct StageArgs {
    #[arg(long, value_name = "IMAGE", help = "Base runtime image")]
    pub base: Option<String>,

    #[arg(
        long,
        value_name = "FILE",
        help = "Dependency manifest, relative to the build context"
    )]
    pub manifest: Option<PathBuf>,

    #[arg(long, value_name = "MODULE:ATTR", help = "ASGI application to serve")]
    pub entrypoint: Option<String>,

    #[arg(long, value_name = "PORT", help = "Port the server binds inside the container")]
    pub port: Option<u16>,

    #[arg(long, value_enum, help = "When to pull the base image")]
    pub pull: Option<PullArg>,

    #[arg(long, help = "Skip pre-resolving the manifest against the package index")]
    pub no_resolve: bool,

    #[arg(long, help = "Only require the entry point module to exist")]
    pub skip_entrypoint_check: bool,
}

impl StageArgs {
    /// Overlays the flags that were given onto `config`
    pub fn apply(&self, config: &mut SlipwayConfig) {
        if let Some(base) = &self.base {
            config.base_image = base.clone();
        }
        if let Some(manifest) = &self.manifest {
            config.manifest = manifest.clone();
        }
        if let Some(entrypoint) = &self.entrypoint {
            config.entrypoint = entrypoint.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(pull) = self.pull {
            config.pull = pull.into();
        }
        if self.no_resolve {
            config.resolve = false;
        }
        if self.skip_entrypoint_check {
            config.check_entrypoint = false;
        }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct BuildArgs {
    #[arg(
        value_name = "PATH",
        help = "Build context (defaults to current directory)"
    )]
    pub context_path: Option<PathBuf>,

    #[arg(
        short = 't',
        long,
        value_name = "TAG",
        help = "Image tag (defaults to slipway/<dir>:latest)"
    )]
    pub tag: Option<String>,

    #[command(flatten)]
    pub stage: StageArgs,

    #[arg(long, help = "Build even if a matching image already exists")]
    pub rebuild: bool,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: ReportFormatArg,
}

#[derive(Parser, Debug, Clone)]
pub struct PlanArgs {
    #[arg(
        value_name = "PATH",
        help = "Build context (defaults to current directory)"
    )]
    pub context_path: Option<PathBuf>,

    #[command(flatten)]
    pub stage: StageArgs,

    #[arg(long, help = "Keep the base reference as given instead of pinning a digest")]
    pub no_pin: bool,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,

    #[arg(
        short = 'o',
        long,
        value_name = "FILE",
        help = "Write output to file instead of stdout"
    )]
    pub output: Option<PathBuf>,
}

/// Flags for launching a container
#[derive(Args, Debug, Clone, Default)]
pub struct LaunchArgs {
    #[arg(
        short = 'p',
        long = "publish",
        value_name = "HOST_PORT",
        help = "Host port to publish (defaults to the container port)"
    )]
    pub host_port: Option<u16>,

    #[arg(
        short = 'e',
        long = "env",
        value_name = "KEY=VALUE",
        help = "Environment variable for the server (repeatable)"
    )]
    pub env: Vec<String>,

    #[arg(long, value_name = "FILE", help = "Read environment variables from a file")]
    pub env_file: Option<PathBuf>,

    #[arg(long, value_name = "NAME", help = "Container name")]
    pub name: Option<String>,
}

#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    #[arg(value_name = "IMAGE", help = "Image to launch")]
    pub image: String,

    #[arg(
        long,
        value_name = "PORT",
        help = "Port the server listens on inside the container"
    )]
    pub container_port: Option<u16>,

    #[arg(
        long,
        value_name = "MODULE:ATTR",
        help = "Entry point the image serves, for error reports"
    )]
    pub entrypoint: Option<String>,

    #[command(flatten)]
    pub launch: LaunchArgs,
}

#[derive(Parser, Debug, Clone)]
pub struct UpArgs {
    #[arg(
        value_name = "PATH",
        help = "Build context (defaults to current directory)"
    )]
    pub context_path: Option<PathBuf>,

    #[arg(short = 't', long, value_name = "TAG", help = "Image tag")]
    pub tag: Option<String>,

    #[command(flatten)]
    pub stage: StageArgs,

    #[arg(long, help = "Build even if a matching image already exists")]
    pub rebuild: bool,

    #[command(flatten)]
    pub launch: LaunchArgs,
}

#[derive(Parser, Debug, Clone)]
pub struct HealthArgs {
    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: ReportFormatArg,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullArg {
    Missing,
    Always,
    Never,
}

impl From<PullArg> for PullPolicy {
    fn from(arg: PullArg) -> Self {
        match arg {
            PullArg::Missing => PullPolicy::Missing,
            PullArg::Always => PullPolicy::Always,
            PullArg::Never => PullPolicy::Never,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormatArg {
    Json,
    Yaml,
    Human,
    Dockerfile,
}

/// Formats for reports that have no Dockerfile rendering
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormatArg {
    Json,
    Yaml,
    Human,
}

impl From<OutputFormatArg> for super::output::OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Json => super::output::OutputFormat::Json,
            OutputFormatArg::Yaml => super::output::OutputFormat::Yaml,
            OutputFormatArg::Human => super::output::OutputFormat::Human,
            OutputFormatArg::Dockerfile => super::output::OutputFormat::Dockerfile,
        }
    }
}

impl From<ReportFormatArg> for super::output::OutputFormat {
    fn from(arg: ReportFormatArg) -> Self {
        match arg {
            ReportFormatArg::Json => super::output::OutputFormat::Json,
            ReportFormatArg::Yaml => super::output::OutputFormat::Yaml,
            ReportFormatArg::Human => super::output::OutputFormat::Human,
        }
    }
}
