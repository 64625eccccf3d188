//! Structured logging setup for slipway
//!
//! Console output by default, JSON when `SLIPWAY_LOG_JSON=true`. `RUST_LOG`
//! takes precedence over everything configured here. Logs go to stderr so
//! that `plan --format json` and friends keep stdout machine-readable.
//!
//! # Example
//!
//! ```no_run
//! use slipway::util::logging;
//! use tracing::info;
//!
//! logging::init_from_env();
//! info!(stage = "base selection", "Resolving base image");
//! ```

use std::env;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Ensures logging is only initialized once
static INIT: Once = Once::new();

/// Crates whose debug chatter is silenced unless `RUST_LOG` asks for it
const NOISY_TARGETS: &[&str] = &["h2", "hyper", "hyper_util", "reqwest", "bollard"];

/// Configuration for logging initialization
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Minimum log level to display
    pub level: Level,

    /// Use JSON output format
    pub use_json: bool,

    /// Include the module target (e.g., slipway::pipeline) in logs
    pub include_target: bool,

    /// Include file and line number information
    pub include_location: bool,

    /// Include thread IDs in log output
    pub include_thread_ids: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            use_json: false,
            include_target: true,
            include_location: false,
            include_thread_ids: false,
        }
    }
}

impl LoggingConfig {
    pub fn with_level(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Resolves the level from CLI flags: an explicit level wins, then
    /// `--verbose`/`--quiet`, then `SLIPWAY_LOG_LEVEL`.
    pub fn from_cli(log_level: Option<&str>, verbose: bool, quiet: bool) -> Self {
        let level = if let Some(level_str) = log_level {
            parse_level(level_str)
        } else if verbose {
            Level::DEBUG
        } else if quiet {
            Level::ERROR
        } else {
            parse_level(&env::var("SLIPWAY_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()))
        };

        Self {
            level,
            use_json: json_from_env(),
            include_target: verbose,
            include_location: false,
            include_thread_ids: false,
        }
    }
}

fn json_from_env() -> bool {
    env::var("SLIPWAY_LOG_JSON")
        .ok()
        .and_then(|v| v.parse::<bool>().ok())
        .unwrap_or(false)
}

/// Parses a log level name, case-insensitively
///
/// Unknown values fall back to `INFO` with a warning on stderr, since the
/// subscriber that would carry the warning does not exist yet.
///
/// ```
/// use slipway::util::logging::parse_level;
/// use tracing::Level;
///
/// assert_eq!(parse_level("debug"), Level::DEBUG);
/// assert_eq!(parse_level("invalid"), Level::INFO);
/// ```
pub fn parse_level(level_str: &str) -> Level {
    level_str.trim().parse::<Level>().unwrap_or_else(|_| {
        eprintln!(
            "slipway: unknown log level '{}', using info (expected trace, debug, info, warn or error)",
            level_str
        );
        Level::INFO
    })
}

fn build_filter(level: Level) -> EnvFilter {
    if env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }

    let mut filter = EnvFilter::new(level.to_string());
    for target in NOISY_TARGETS {
        if let Ok(directive) = format!("{}=warn", target).parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

/// Installs the global subscriber. Only the first call has any effect.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let json = config.use_json.then(|| {
            fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(config.include_target)
                .with_thread_ids(config.include_thread_ids)
                .with_file(config.include_location)
                .with_line_number(config.include_location)
        });
        let console = (!config.use_json).then(|| {
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(config.include_target)
                .with_thread_ids(config.include_thread_ids)
                .with_file(config.include_location)
                .with_line_number(config.include_location)
        });

        tracing_subscriber::registry()
            .with(build_filter(config.level))
            .with(json)
            .with(console)
            .init();
    });
}

/// Initializes logging with default configuration
pub fn init_default() {
    init_logging(LoggingConfig::default());
}

/// Initializes logging from `SLIPWAY_LOG_LEVEL` and `SLIPWAY_LOG_JSON`
pub fn init_from_env() {
    init_logging(LoggingConfig::from_cli(None, false, false));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[yare::parameterized(
        trace = { "trace", Level::TRACE },
        upper = { "DEBUG", Level::DEBUG },
        padded = { " warn ", Level::WARN },
        error = { "Error", Level::ERROR },
        unknown = { "loud", Level::INFO },
        empty = { "", Level::INFO },
    )]
    fn test_parse_level(input: &str, expected: Level) {
        assert_eq!(parse_level(input), expected);
    }

    #[test]
    fn test_default_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert!(!config.use_json);
        assert!(config.include_target);
    }

    #[test]
    fn test_from_cli_precedence() {
        let config = LoggingConfig::from_cli(Some("warn"), true, false);
        assert_eq!(config.level, Level::WARN);

        let config = LoggingConfig::from_cli(None, true, false);
        assert_eq!(config.level, Level::DEBUG);

        let config = LoggingConfig::from_cli(None, false, true);
        assert_eq!(config.level, Level::ERROR);
    }
}
