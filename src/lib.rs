//! slipway - build and launch container images for Python ASGI applications
//!
//! A build is a single sequential pass through four stages, each producing
//! one result on the [`pipeline::BuildContext`]:
//!
//! 1. **Base Selection** resolves the base runtime identity to a digest-pinned
//!    [`image::EnvironmentHandle`].
//! 2. **Dependency Materialization** loads the requirements manifest,
//!    pre-resolves it against the package index and fixes the install step.
//! 3. **Artifact Placement** scans the source tree that is copied into the
//!    image's working directory.
//! 4. **Process Launch** fixes the server command and checks the entry point.
//!
//! The results are assembled into a [`output::BuildPlan`] and a build context
//! archive, which a [`engine::ContainerEngine`] builds into an image. The
//! [`launch::Launcher`] then starts exactly one server container from it.
//!
//! # Example Usage
//!
//! ```ignore
//! use slipway::engine::DockerEngine;
//! use slipway::fs::RealFileSystem;
//! use slipway::manifest::PypiIndex;
//! use slipway::pipeline::{BuildContext, PipelineOrchestrator};
//! use slipway::SlipwayConfig;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let root = Path::new("./shortener");
//! let config = SlipwayConfig::load(root)?;
//! let index = PypiIndex::new(&config.index_url, config.request_timeout())?;
//! let mut context = BuildContext::new(
//!     root,
//!     config,
//!     Arc::new(DockerEngine::connect()?),
//!     Arc::new(index),
//!     Arc::new(RealFileSystem),
//! );
//! let report = PipelineOrchestrator::default().build(&mut context).await?;
//! println!("{}", report);
//! ```

pub mod cli;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod fs;
pub mod image;
pub mod launch;
pub mod manifest;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod util;

pub use config::{ConfigError, PullPolicy, SlipwayConfig};
pub use error::{PipelineError, Stage};
pub use output::{BuildPlan, BuildReport};
pub use pipeline::{BuildContext, BuildOptions, PipelineOrchestrator};
pub use util::{init_default, init_from_env, init_logging, LoggingConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
