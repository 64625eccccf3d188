//! Output formatting for multiple formats
//!
//! Formatters for build plans, build reports and engine health
//! in JSON, YAML and human-readable text. Build plans can also be rendered as
//! the Dockerfile the image would be built from.
//!
//! # Example
//!
//! ```ignore
//! use slipway::cli::output::{OutputFormat, OutputFormatter};
//!
//! let formatter = OutputFormatter::new(OutputFormat::Json);
//! let output = formatter.format_plan(&plan)?;
//! println!("{}", output);
//! ```

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;

use crate::output::{BuildPlan, BuildReport};

const RULE: &str = "\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}";

/// Output format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON format (machine-readable)
    Json,
    /// YAML format (human-friendly, version-control friendly)
    Yaml,
    /// Human-readable formatted text
    Human,
    /// Generated Dockerfile (build plans only)
    Dockerfile,
}

pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format_plan(&self, plan: &BuildPlan) -> Result<String> {
        match self.format {
            OutputFormat::Json => plan.to_json(),
            OutputFormat::Yaml => plan.to_yaml(),
            OutputFormat::Human => Ok(plan.to_string()),
            OutputFormat::Dockerfile => Ok(plan.to_dockerfile()),
        }
    }

    pub fn format_report(&self, report: &BuildReport) -> Result<String> {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report)
                .context("Failed to serialize build report to JSON"),
            OutputFormat::Yaml => {
                serde_yaml::to_string(report).context("Failed to serialize build report to YAML")
            }
            OutputFormat::Human => Ok(report.to_string()),
            OutputFormat::Dockerfile => bail!("A build report has no Dockerfile rendering"),
        }
    }

    /// Formats health check results, keyed by component name
    pub fn format_health(&self, health_results: &BTreeMap<String, HealthStatus>) -> Result<String> {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(health_results)
                .context("Failed to serialize health status to JSON"),
            OutputFormat::Yaml => serde_yaml::to_string(health_results)
                .context("Failed to serialize health status to YAML"),
            OutputFormat::Human | OutputFormat::Dockerfile => {
                Ok(self.format_health_human(health_results))
            }
        }
    }

    fn format_health_human(&self, health_results: &BTreeMap<String, HealthStatus>) -> String {
        let mut output = String::new();

        output.push_str("Health Status\n");
        output.push_str(RULE);
        output.push_str("\n\n");

        for (component, status) in health_results {
            let status_symbol = if status.available {
                "\u{2713}"
            } else {
                "\u{2717}"
            };

            output.push_str(&format!("{} {}\n", status_symbol, component));
            output.push_str(&format!(
                "  Status: {}\n",
                if status.available {
                    "Available"
                } else {
                    "Unavailable"
                }
            ));
            output.push_str(&format!("  Message: {}\n", status.message));

            if let Some(ref details) = status.details {
                output.push_str(&format!("  Details: {}\n", details));
            }
            output.push('\n');
        }

        output
    }
}

/// Health status for one component (container engine, package index)
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HealthStatus {
    pub available: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl HealthStatus {
    pub fn available(message: String) -> Self {
        Self {
            available: true,
            message,
            details: None,
        }
    }

    pub fn unavailable(message: String) -> Self {
        Self {
            available: false,
            message,
            details: None,
        }
    }

    pub fn with_details(mut self, details: String) -> Self {
        self.details = Some(details);
        self
    }
}
