pub mod commands;
pub mod handlers;
pub mod output;

pub use commands::{BuildArgs, CliArgs, Commands, HealthArgs, PlanArgs, RunArgs, UpArgs};
pub use output::{HealthStatus, OutputFormat, OutputFormatter};
