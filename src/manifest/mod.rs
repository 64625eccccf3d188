//! Dependency Materialization inputs
//!
//! A [`DependencyManifest`] is the ordered list of requirements read from a
//! pip requirements file (following `-r` includes). It is rendered back into
//! a canonical manifest that the image installs with no-cache discipline
//! (see [`InstallStep`]), and it can be pre-resolved against a package index
//! (see [`Resolver`]) so that unsatisfiable requirements fail fast.

pub mod index;
pub mod install;
pub mod requirement;
pub mod resolver;
pub mod specifier;
pub mod version;

pub use index::{IndexError, PackageIndex, PypiIndex, Release, StaticIndex};
pub use install::InstallStep;
pub use requirement::{normalize_name, Requirement};
pub use resolver::{ResolvedPackage, Resolver};
pub use specifier::{Specifier, SpecifierSet};
pub use version::{Version, VersionError};

use crate::error::PipelineError;
use crate::fs::FileSystem;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ManifestError {
    #[error("invalid specifier '{specifier}': {reason}")]
    InvalidSpecifier { specifier: String, reason: String },

    #[error("invalid requirement '{requirement}': {reason}")]
    InvalidRequirement { requirement: String, reason: String },
}

/// A requirement together with where it was declared
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    pub requirement: Requirement,
    pub source: PathBuf,
    pub line: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_url: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_index_urls: Vec<String>,
}

impl IndexOptions {
    pub fn is_default(&self) -> bool {
        self.index_url.is_none() && self.extra_index_urls.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DependencyManifest {
    pub path: PathBuf,
    pub entries: Vec<ManifestEntry>,
    pub index: IndexOptions,
}

impl DependencyManifest {
    /// Reads `path` and every file it includes
    ///
    /// A missing manifest is an [`PipelineError::InvalidManifest`] at line 0;
    /// an application with no dependencies declares an empty file.
    pub fn load(path: &Path, fs: &dyn FileSystem) -> Result<Self, PipelineError> {
        let mut manifest = Self {
            path: path.to_path_buf(),
            entries: Vec::new(),
            index: IndexOptions::default(),
        };
        let mut stack = Vec::new();
        manifest.read_file(path, fs, &mut stack)?;
        debug!(
            manifest = %path.display(),
            requirements = manifest.entries.len(),
            "Manifest loaded"
        );
        Ok(manifest)
    }

    /// Parses manifest text that has no includes
    pub fn parse_str(path: &Path, content: &str) -> Result<Self, PipelineError> {
        let mut manifest = Self {
            path: path.to_path_buf(),
            entries: Vec::new(),
            index: IndexOptions::default(),
        };
        for (line, text) in logical_lines(content) {
            if let Some(option) = manifest.apply_option(path, line, &text)? {
                return Err(invalid(path, line, format!("'{}' is not allowed here", option)));
            }
        }
        Ok(manifest)
    }

    fn read_file(
        &mut self,
        path: &Path,
        fs: &dyn FileSystem,
        stack: &mut Vec<PathBuf>,
    ) -> Result<(), PipelineError> {
        if !fs.is_file(path) {
            return Err(invalid(path, 0, "manifest file not found".to_string()));
        }
        let key = fs.canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        if stack.contains(&key) {
            return Err(invalid(path, 0, "include cycle detected".to_string()));
        }

        let content = fs
            .read_to_string(path)
            .map_err(|e| invalid(path, 0, format!("{:#}", e)))?;

        stack.push(key);
        for (line, text) in logical_lines(&content) {
            if let Some(include) = self.apply_option(path, line, &text)? {
                let target = path
                    .parent()
                    .map(|dir| dir.join(&include))
                    .unwrap_or_else(|| PathBuf::from(&include));
                debug!(from = %path.display(), include = %target.display(), "Following include");
                self.read_file(&target, fs, stack).map_err(|e| match e {
                    PipelineError::InvalidManifest { line: 0, reason, .. } => {
                        invalid(path, line, format!("{}: {}", target.display(), reason))
                    }
                    other => other,
                })?;
            }
        }
        stack.pop();
        Ok(())
    }

    /// Applies one logical line; returns the target of a `-r` include
    fn apply_option(
        &mut self,
        path: &Path,
        line: usize,
        text: &str,
    ) -> Result<Option<String>, PipelineError> {
        if !text.starts_with('-') {
            let requirement =
                Requirement::parse(text).map_err(|e| invalid(path, line, e.to_string()))?;
            self.entries.push(ManifestEntry {
                requirement,
                source: path.to_path_buf(),
                line,
            });
            return Ok(None);
        }

        let (flag, value) = split_option(text);
        let required = || -> Result<String, PipelineError> {
            value
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| invalid(path, line, format!("option '{}' needs a value", flag)))
        };

        match flag {
            "-r" | "--requirement" => Ok(Some(required()?)),
            "-i" | "--index-url" => {
                self.index.index_url = Some(required()?);
                Ok(None)
            }
            "--extra-index-url" => {
                self.index.extra_index_urls.push(required()?);
                Ok(None)
            }
            other => Err(invalid(
                path,
                line,
                format!("unsupported option '{}'", other),
            )),
        }
    }

    pub fn requirements(&self) -> impl Iterator<Item = &Requirement> {
        self.entries.iter().map(|e| &e.requirement)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Canonical manifest text, in declaration order with includes inlined
    ///
    /// This is the exact file installed into the image, so equal manifests
    /// always render to equal bytes.
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        if let Some(url) = &self.index.index_url {
            out.push_str(&format!("--index-url {}\n", url));
        }
        for url in &self.index.extra_index_urls {
            out.push_str(&format!("--extra-index-url {}\n", url));
        }
        for requirement in self.requirements() {
            out.push_str(&requirement.to_string());
            out.push('\n');
        }
        out
    }
}

fn invalid(path: &Path, line: usize, reason: String) -> PipelineError {
    PipelineError::InvalidManifest {
        path: path.to_path_buf(),
        line,
        reason,
    }
}

/// Splits `-r file`, `-rfile`, `--requirement=file` and `--requirement file`
fn split_option(text: &str) -> (&str, Option<&str>) {
    if let Some(long) = text.strip_prefix("--") {
        let end = long
            .find(|c: char| c == '=' || c.is_whitespace())
            .unwrap_or(long.len());
        let flag = &text[..end + 2];
        let value = text[end + 2..].trim_start_matches('=').trim();
        return (flag, Some(value));
    }
    let split = text.char_indices().nth(2).map(|(i, _)| i).unwrap_or(text.len());
    let (flag, value) = text.split_at(split);
    (flag, Some(value.trim()))
}

/// Joins `\` continuations and strips comments, yielding (first line number, text)
fn logical_lines(content: &str) -> Vec<(usize, String)> {
    let mut lines = Vec::new();
    let mut pending: Option<(usize, String)> = None;

    for (index, raw) in content.lines().enumerate() {
        let number = index + 1;
        let (start, mut text) = pending.take().unwrap_or((number, String::new()));

        if let Some(stripped) = raw.strip_suffix('\\') {
            text.push_str(stripped);
            pending = Some((start, text));
            continue;
        }
        text.push_str(raw);

        let text = strip_comment(&text).trim().to_string();
        if !text.is_empty() {
            lines.push((start, text));
        }
    }

    if let Some((start, text)) = pending {
        let text = strip_comment(&text).trim().to_string();
        if !text.is_empty() {
            lines.push((start, text));
        }
    }
    lines
}

fn strip_comment(line: &str) -> &str {
    if line.trim_start().starts_with('#') {
        return "";
    }
    match line.find(" #").or_else(|| line.find("\t#")) {
        Some(i) => &line[..i],
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MockFileSystem;

    fn load(fs: &MockFileSystem, path: &str) -> Result<DependencyManifest, PipelineError> {
        DependencyManifest::load(&fs.root().join(path), fs)
    }

    #[test]
    fn test_order_is_preserved() {
        let fs = MockFileSystem::new();
        fs.add_file(
            "requirements.txt",
            "# web\nfastapi==0.100.0\nuvicorn>=0.22  # server\n\nhttpx\n",
        );
        let manifest = load(&fs, "requirements.txt").unwrap();

        let names: Vec<&str> = manifest.requirements().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["fastapi", "uvicorn", "httpx"]);
        assert_eq!(manifest.entries[1].line, 3);
        assert_eq!(
            manifest.canonical(),
            "fastapi==0.100.0\nuvicorn>=0.22\nhttpx\n"
        );
    }

    #[test]
    fn test_continuation_lines() {
        let fs = MockFileSystem::new();
        fs.add_file("requirements.txt", "fastapi\\\n==0.100.0\nhttpx\n");
        let manifest = load(&fs, "requirements.txt").unwrap();
        assert_eq!(manifest.canonical(), "fastapi==0.100.0\nhttpx\n");
        assert_eq!(manifest.entries[1].line, 3);
    }

    #[test]
    fn test_includes_are_inlined_in_place() {
        let fs = MockFileSystem::new();
        fs.add_file("requirements.txt", "fastapi==0.100.0\n-r reqs/extra.txt\nhttpx\n");
        fs.add_file("reqs/extra.txt", "--requirement=base.txt\npydantic<2\n");
        fs.add_file("reqs/base.txt", "anyio\n");

        let manifest = load(&fs, "requirements.txt").unwrap();
        assert_eq!(
            manifest.canonical(),
            "fastapi==0.100.0\nanyio\npydantic<2\nhttpx\n"
        );
        assert!(manifest.entries[1].source.ends_with("reqs/base.txt"));
    }

    #[test]
    fn test_include_cycle_is_rejected() {
        let fs = MockFileSystem::new();
        fs.add_file("a.txt", "-r b.txt\n");
        fs.add_file("b.txt", "-ra.txt\n");

        let err = load(&fs, "a.txt").unwrap_err();
        match err {
            PipelineError::InvalidManifest { reason, .. } => {
                assert!(reason.contains("cycle"), "{}", reason)
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_index_options_pass_through() {
        let fs = MockFileSystem::new();
        fs.add_file(
            "requirements.txt",
            "-i https://mirror.example/simple\n--extra-index-url https://extra.example/simple\nfastapi\n",
        );
        let manifest = load(&fs, "requirements.txt").unwrap();
        assert!(!manifest.index.is_default());
        assert_eq!(
            manifest.canonical(),
            "--index-url https://mirror.example/simple\n--extra-index-url https://extra.example/simple\nfastapi\n"
        );
    }

    #[test]
    fn test_unsupported_option_names_line() {
        let fs = MockFileSystem::new();
        fs.add_file("requirements.txt", "fastapi\n-e ./local\n");
        match load(&fs, "requirements.txt").unwrap_err() {
            PipelineError::InvalidManifest { line, reason, .. } => {
                assert_eq!(line, 2);
                assert!(reason.contains("-e"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_bad_requirement_names_line() {
        let fs = MockFileSystem::new();
        fs.add_file("requirements.txt", "fastapi\nuvicorn=0.1\n");
        match load(&fs, "requirements.txt").unwrap_err() {
            PipelineError::InvalidManifest { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_missing_manifest() {
        let fs = MockFileSystem::new();
        let err = load(&fs, "requirements.txt").unwrap_err();
        assert_eq!(err.exit_code(), 16);
    }

    #[test]
    fn test_missing_include_reports_including_line() {
        let fs = MockFileSystem::new();
        fs.add_file("requirements.txt", "fastapi\n-r nope.txt\n");
        match load(&fs, "requirements.txt").unwrap_err() {
            PipelineError::InvalidManifest { line, reason, .. } => {
                assert_eq!(line, 2);
                assert!(reason.contains("nope.txt"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_str_rejects_includes() {
        let err = DependencyManifest::parse_str(Path::new("inline"), "-r other.txt\n").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidManifest { line: 1, .. }));

        let manifest =
            DependencyManifest::parse_str(Path::new("inline"), "fastapi==0.100.0\n").unwrap();
        assert_eq!(manifest.entries.len(), 1);
    }

    #[test]
    fn test_empty_manifest_is_valid() {
        let fs = MockFileSystem::new();
        fs.add_file("requirements.txt", "# nothing yet\n");
        let manifest = load(&fs, "requirements.txt").unwrap();
        assert!(manifest.is_empty());
        assert_eq!(manifest.canonical(), "");
    }
}
