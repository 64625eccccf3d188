use slipway::cli::commands::{CliArgs, Commands};
use slipway::cli::handlers::{handle_build, handle_health, handle_plan, handle_run, handle_up};
use slipway::util::logging::{init_logging, LoggingConfig};
use slipway::{NAME, VERSION};

use clap::Parser;
use std::process;
use tracing::debug;

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    init_logging(LoggingConfig::from_cli(
        args.log_level.as_deref(),
        args.verbose,
        args.quiet,
    ));

    debug!("{} v{} starting", NAME, VERSION);
    debug!("Arguments: {:?}", args);

    let exit_code = match &args.command {
        Commands::Build(build_args) => handle_build(build_args, args.quiet, args.verbose).await,
        Commands::Plan(plan_args) => handle_plan(plan_args, args.quiet, args.verbose).await,
        Commands::Run(run_args) => handle_run(run_args).await,
        Commands::Up(up_args) => handle_up(up_args, args.quiet, args.verbose).await,
        Commands::Health(health_args) => handle_health(health_args).await,
    };

    process::exit(exit_code);
}
