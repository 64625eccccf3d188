//! FileSystem abstraction for testable file operations
//!
//! Manifest loading (with its `-r` includes) reads through this trait so it
//! can be exercised against an in-memory tree. Artifact Placement walks the
//! real disk directly because it needs modes and symlink targets.

mod mock;
mod real;

pub use mock::MockFileSystem;
pub use real::RealFileSystem;

use anyhow::Result;
use std::path::{Path, PathBuf};

/// Abstraction over the read-only file operations used during planning
pub trait FileSystem: Send + Sync {
    /// Check if a path exists
    fn exists(&self, path: &Path) -> bool;

    /// Check if path is a directory
    fn is_dir(&self, path: &Path) -> bool;

    /// Check if path is a file
    fn is_file(&self, path: &Path) -> bool;

    /// Read file contents as string
    fn read_to_string(&self, path: &Path) -> Result<String>;

    /// Canonicalize a path
    fn canonicalize(&self, path: &Path) -> Result<PathBuf>;
}
