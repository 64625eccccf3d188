//! Maps engine and server output onto [`PipelineError`] kinds
//!
//! The installer and the ASGI server run inside the container, so the only
//! evidence of why they failed is their output. These rules pick the error
//! kind from well-known pip, uvicorn and Docker messages.

use super::EngineError;
use crate::error::{PipelineError, Stage};
use regex::Regex;
use std::sync::OnceLock;

fn missing_distribution_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?m)(?:No matching distribution found for|Could not find a version that satisfies the requirement)\s+(\S+)",
        )
        .expect("valid regex")
    })
}

fn conflict_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)(ResolutionImpossible|conflicting dependencies|Cannot install .*? because)")
            .expect("valid regex")
    })
}

fn network_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?m)(Failed to establish a new connection|Temporary failure in name resolution|Name or service not known|ConnectTimeoutError|Read timed out|Network is unreachable|Could not fetch URL \S+)",
        )
        .expect("valid regex")
    })
}

fn import_failure_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?m)(Could not import module "[^"]*"|Attribute "[^"]*" not found in module "[^"]*"|Error loading ASGI app\..*|ModuleNotFoundError: .*)"#,
        )
        .expect("valid regex")
    })
}

fn bind_failure_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?mi)(port is already allocated|address already in use)").expect("valid regex")
    })
}

fn server_missing_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?mi)(executable file not found in \$PATH|exec: "[^"]*": .*not found)"#)
            .expect("valid regex")
    })
}

/// Classifies a failed image build from its log and first error message
pub fn build_failure(log: &str, error: &str, index_url: &str) -> PipelineError {
    let haystack = format!("{}\n{}", log, error);

    if let Some(caps) = missing_distribution_re().captures(&haystack) {
        let requirement = caps[1].trim_end_matches(|c: char| c == ')' || c == ',').to_string();
        return PipelineError::DependencyResolutionError {
            requirement,
            reason: "no matching distribution found by the installer".to_string(),
        };
    }

    if let Some(caps) = conflict_re().captures(&haystack) {
        return PipelineError::DependencyResolutionError {
            requirement: "manifest".to_string(),
            reason: format!("installer reported {}", &caps[1]),
        };
    }

    if let Some(caps) = network_re().captures(&haystack) {
        return PipelineError::NetworkUnavailable {
            stage: Stage::DependencyMaterialization,
            endpoint: index_url.to_string(),
            reason: caps[1].to_string(),
        };
    }

    PipelineError::Engine {
        stage: Stage::ImageAssembly,
        message: error.to_string(),
    }
}

/// Classifies an error returned when creating or starting the container
pub fn start_failure(err: &EngineError, address: &str, entrypoint: &str) -> PipelineError {
    let message = err.message();
    if bind_failure_re().is_match(message) {
        PipelineError::BindAddressInUse {
            address: address.to_string(),
        }
    } else if server_missing_re().is_match(message) {
        PipelineError::entrypoint(entrypoint, message.to_string())
    } else {
        PipelineError::Engine {
            stage: Stage::ProcessLaunch,
            message: message.to_string(),
        }
    }
}

/// Classifies a server that exited with `code`, given its output
pub fn server_exit(code: i64, output: &[String], address: &str, entrypoint: &str) -> PipelineError {
    for line in output {
        if let Some(m) = import_failure_re().find(line) {
            return PipelineError::entrypoint(entrypoint, m.as_str().to_string());
        }
        if bind_failure_re().is_match(line) {
            return PipelineError::BindAddressInUse {
                address: address.to_string(),
            };
        }
    }
    PipelineError::ServerExited { code }
}
