//! Configuration management for slipway
//!
//! Settings are layered: environment variables with defaults (via `Default`),
//! then an optional `slipway.toml` at the root of the build context, then CLI
//! flags applied by the command handlers.
//!
//! # Environment Variables
//!
//! - `SLIPWAY_BASE_IMAGE`: Base runtime identity - default: "python:3.11-slim"
//! - `SLIPWAY_MANIFEST`: Dependency manifest, relative to the context - default: "requirements.txt"
//! - `SLIPWAY_WORKDIR`: Working directory inside the image - default: "/app"
//! - `SLIPWAY_SERVER`: ASGI server executable - default: "uvicorn"
//! - `SLIPWAY_ENTRYPOINT`: ASGI callable as module:attr - default: "main:app"
//! - `SLIPWAY_PORT`: Port the server binds inside the container - default: "80"
//! - `SLIPWAY_INDEX_URL`: Package index JSON API - default: "https://pypi.org/pypi"
//! - `SLIPWAY_RESOLVE`: Pre-resolve the manifest against the index (true|false) - default: "true"
//! - `SLIPWAY_PULL`: Base image pull policy (missing|always|never) - default: "missing"
//! - `SLIPWAY_REQUEST_TIMEOUT`: Index/registry timeout in seconds - default: "30"
//! - `SLIPWAY_STOP_TIMEOUT`: Grace period before the server is killed - default: "10"
//! - `SLIPWAY_READY_TIMEOUT`: How long to wait for the port to accept - default: "30"
//! - `SLIPWAY_LOG_LEVEL`: Logging level - default: "info"
//!
//! # Example
//!
//! ```no_run
//! use slipway::SlipwayConfig;
//! use std::path::Path;
//!
//! let config = SlipwayConfig::load(Path::new(".")).expect("config");
//! config.validate().expect("Invalid configuration");
//! ```

use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_BASE_IMAGE: &str = "python:3.11-slim";
const DEFAULT_MANIFEST: &str = "requirements.txt";
const DEFAULT_WORKDIR: &str = "/app";
const DEFAULT_SERVER: &str = "uvicorn";
const DEFAULT_ENTRYPOINT: &str = "main:app";
const DEFAULT_PORT: u16 = 80;
const DEFAULT_INDEX_URL: &str = "https://pypi.org/pypi";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_STOP_TIMEOUT_SECS: u64 = 10;
const DEFAULT_READY_TIMEOUT_SECS: u64 = 30;

/// Host the server binds inside the container. Not configurable.
pub const BIND_HOST: &str = "0.0.0.0";

/// Name of the optional project file at the context root
pub const CONFIG_FILE_NAME: &str = "slipway.toml";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Failed to parse {field}: {error}")]
    ParseError { field: String, error: String },

    #[error("Failed to read {}: {error}", path.display())]
    FileError { path: PathBuf, error: String },
}

/// When the base image is fetched from its registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullPolicy {
    /// Pull only when the engine does not have the image
    Missing,
    /// Pull on every build
    Always,
    /// Never contact the registry
    Never,
}

impl FromStr for PullPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "missing" => Ok(PullPolicy::Missing),
            "always" => Ok(PullPolicy::Always),
            "never" => Ok(PullPolicy::Never),
            other => Err(ConfigError::ParseError {
                field: "pull".to_string(),
                error: format!("'{}' is not one of missing, always, never", other),
            }),
        }
    }
}

impl fmt::Display for PullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PullPolicy::Missing => "missing",
            PullPolicy::Always => "always",
            PullPolicy::Never => "never",
        };
        f.write_str(s)
    }
}

/// Main configuration structure for slipway
#[derive(Debug, Clone)]
pub struct SlipwayConfig {
    /// Base runtime identity (image reference)
    pub base_image: String,

    /// Dependency manifest path, relative to the context root
    pub manifest: PathBuf,

    /// Working directory inside the image
    pub workdir: String,

    /// ASGI server executable
    pub server: String,

    /// ASGI callable reference (module:attr)
    pub entrypoint: String,

    /// Port the server binds inside the container
    pub port: u16,

    /// Package index JSON API base URL
    pub index_url: String,

    /// Pre-resolve the manifest against the package index
    pub resolve: bool,

    /// Base image pull policy
    pub pull: PullPolicy,

    /// Pin the base image to its registry digest
    pub pin_base: bool,

    /// Check that the entry point attribute exists in the source tree
    pub check_entrypoint: bool,

    /// Index and registry request timeout in seconds
    pub request_timeout_secs: u64,

    /// Grace period between SIGTERM and SIGKILL when stopping the server
    pub stop_timeout_secs: u64,

    /// How long to wait for the published port to accept connections
    pub ready_timeout_secs: u64,

    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

/// Optional overrides read from `slipway.toml`
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub base_image: Option<String>,
    pub manifest: Option<PathBuf>,
    pub workdir: Option<String>,
    pub server: Option<String>,
    pub entrypoint: Option<String>,
    pub port: Option<u16>,
    pub index_url: Option<String>,
    pub resolve: Option<bool>,
    pub pull: Option<PullPolicy>,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl Default for SlipwayConfig {
    /// Loads `SLIPWAY_*` environment variables, falling back to defaults
    fn default() -> Self {
        let pull = env::var("SLIPWAY_PULL")
            .ok()
            .and_then(|v| v.parse::<PullPolicy>().ok())
            .unwrap_or(PullPolicy::Missing);

        Self {
            base_image: env_or("SLIPWAY_BASE_IMAGE", DEFAULT_BASE_IMAGE),
            manifest: PathBuf::from(env_or("SLIPWAY_MANIFEST", DEFAULT_MANIFEST)),
            workdir: env_or("SLIPWAY_WORKDIR", DEFAULT_WORKDIR),
            server: env_or("SLIPWAY_SERVER", DEFAULT_SERVER),
            entrypoint: env_or("SLIPWAY_ENTRYPOINT", DEFAULT_ENTRYPOINT),
            port: env_parse("SLIPWAY_PORT", DEFAULT_PORT),
            index_url: env_or("SLIPWAY_INDEX_URL", DEFAULT_INDEX_URL),
            resolve: env_parse("SLIPWAY_RESOLVE", true),
            pull,
            pin_base: true,
            check_entrypoint: true,
            request_timeout_secs: env_parse("SLIPWAY_REQUEST_TIMEOUT", DEFAULT_REQUEST_TIMEOUT_SECS),
            stop_timeout_secs: env_parse("SLIPWAY_STOP_TIMEOUT", DEFAULT_STOP_TIMEOUT_SECS),
            ready_timeout_secs: env_parse("SLIPWAY_READY_TIMEOUT", DEFAULT_READY_TIMEOUT_SECS),
            log_level: env_or("SLIPWAY_LOG_LEVEL", DEFAULT_LOG_LEVEL).to_lowercase(),
        }
    }
}

impl SlipwayConfig {
    /// Environment defaults overlaid with `slipway.toml` from `context_root`, if present
    pub fn load(context_root: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let path = context_root.join(CONFIG_FILE_NAME);
        if path.is_file() {
            let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileError {
                path: path.clone(),
                error: e.to_string(),
            })?;
            let file: ConfigFile = toml::from_str(&content).map_err(|e| ConfigError::FileError {
                path: path.clone(),
                error: e.to_string(),
            })?;
            config.merge_file(file);
        }
        Ok(config)
    }

    /// Applies every field set in the project file
    pub fn merge_file(&mut self, file: ConfigFile) {
        if let Some(v) = file.base_image {
            self.base_image = v;
        }
        if let Some(v) = file.manifest {
            self.manifest = v;
        }
        if let Some(v) = file.workdir {
            self.workdir = v;
        }
        if let Some(v) = file.server {
            self.server = v;
        }
        if let Some(v) = file.entrypoint {
            self.entrypoint = v;
        }
        if let Some(v) = file.port {
            self.port = v;
        }
        if let Some(v) = file.index_url {
            self.index_url = v;
        }
        if let Some(v) = file.resolve {
            self.resolve = v;
        }
        if let Some(v) = file.pull {
            self.pull = v;
        }
    }

    /// Validates the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if any value is out of range
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_image.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "Base image cannot be empty".to_string(),
            ));
        }
        if !self.workdir.starts_with('/') {
            return Err(ConfigError::ValidationFailed(format!(
                "Working directory must be absolute, got '{}'",
                self.workdir
            )));
        }
        if self.port == 0 {
            return Err(ConfigError::ValidationFailed(
                "Port must be between 1 and 65535".to_string(),
            ));
        }
        if self.server.trim().is_empty() || self.server.contains(char::is_whitespace) {
            return Err(ConfigError::ValidationFailed(format!(
                "Server executable must be a single word, got '{}'",
                self.server
            )));
        }
        if self.manifest.is_absolute() {
            return Err(ConfigError::ValidationFailed(
                "Manifest path must be relative to the build context".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "Request timeout must be at least 1 second".to_string(),
            ));
        }
        if self.request_timeout_secs > 600 {
            return Err(ConfigError::ValidationFailed(
                "Request timeout cannot exceed 10 minutes".to_string(),
            ));
        }
        if self.stop_timeout_secs > 300 {
            return Err(ConfigError::ValidationFailed(
                "Stop timeout cannot exceed 5 minutes".to_string(),
            ));
        }
        if !self.index_url.starts_with("http://") && !self.index_url.starts_with("https://") {
            return Err(ConfigError::ValidationFailed(format!(
                "Index URL must be http(s), got '{}'",
                self.index_url
            )));
        }

        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::ValidationFailed(format!(
                    "Invalid log level: {}. Valid options: trace, debug, info, warn, error",
                    self.log_level
                )))
            }
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }
}

impl fmt::Display for SlipwayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Slipway Configuration:")?;
        writeln!(f, "  Base Image: {}", self.base_image)?;
        writeln!(f, "  Manifest: {}", self.manifest.display())?;
        writeln!(f, "  Working Dir: {}", self.workdir)?;
        writeln!(f, "  Launch: {} {} on {}:{}", self.server, self.entrypoint, BIND_HOST, self.port)?;
        writeln!(f, "  Index: {} (resolve: {})", self.index_url, self.resolve)?;
        writeln!(f, "  Pull Policy: {}", self.pull)?;
        writeln!(f, "  Request Timeout: {}s", self.request_timeout_secs)?;
        writeln!(f, "  Log Level: {}", self.log_level)?;
        Ok(())
    }
}
