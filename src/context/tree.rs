use crate::error::PipelineError;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ignore::WalkBuilder;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DOCKERIGNORE: &str = ".dockerignore";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    File { executable: bool, size: u64 },
    Dir,
    Symlink { target: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Path relative to the tree root
    pub path: PathBuf,
    pub kind: EntryKind,
}

impl TreeEntry {
    pub fn is_file(&self) -> bool {
        matches!(self.kind, EntryKind::File { .. })
    }

    /// Relative path with `/` separators
    pub fn slash_path(&self) -> String {
        self.path
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TreeStats {
    pub files: usize,
    pub directories: usize,
    pub symlinks: usize,
    pub bytes: u64,
    pub ignored: usize,
}

/// The application source tree, as it will be placed in the image
#[derive(Debug, Clone)]
pub struct SourceTree {
    pub root: PathBuf,
    /// Entries sorted by relative path
    pub entries: Vec<TreeEntry>,
    /// SHA-256 over every entry's path, kind, mode and content
    pub digest: String,
    pub stats: TreeStats,
}

impl SourceTree {
    /// Walks `root`, honoring `.dockerignore`, and reads every file once
    pub fn scan(root: &Path) -> Result<Self, PipelineError> {
        let metadata = fs::metadata(root).map_err(|e| PipelineError::source_tree(root, e))?;
        if !metadata.is_dir() {
            return Err(PipelineError::source_tree(root, "not a directory"));
        }

        let ignore = load_dockerignore(root)?;
        let mut stats = TreeStats::default();
        let mut entries = Vec::new();

        let walker = WalkBuilder::new(root)
            .standard_filters(false)
            .follow_links(false)
            .build();

        for result in walker {
            let entry = result.map_err(|e| PipelineError::source_tree(root, e))?;
            let rel = match entry.path().strip_prefix(root) {
                Ok(rel) if !rel.as_os_str().is_empty() => rel.to_path_buf(),
                _ => continue,
            };

            let file_type = entry
                .file_type()
                .ok_or_else(|| PipelineError::source_tree(entry.path(), "unknown file type"))?;

            if let Some(ignore) = &ignore {
                if ignore
                    .matched_path_or_any_parents(&rel, file_type.is_dir())
                    .is_ignore()
                {
                    stats.ignored += 1;
                    continue;
                }
            }

            let kind = if file_type.is_dir() {
                stats.directories += 1;
                EntryKind::Dir
            } else if file_type.is_symlink() {
                let target = fs::read_link(entry.path())
                    .map_err(|e| PipelineError::source_tree(entry.path(), e))?;
                stats.symlinks += 1;
                EntryKind::Symlink { target }
            } else if file_type.is_file() {
                let metadata = entry
                    .metadata()
                    .map_err(|e| PipelineError::source_tree(entry.path(), e))?;
                stats.files += 1;
                stats.bytes += metadata.len();
                EntryKind::File {
                    executable: is_executable(&metadata),
                    size: metadata.len(),
                }
            } else {
                warn!(path = %entry.path().display(), "Skipping special file");
                continue;
            };

            entries.push(TreeEntry { path: rel, kind });
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        let digest = digest_entries(root, &entries)?;

        debug!(
            root = %root.display(),
            files = stats.files,
            directories = stats.directories,
            ignored = stats.ignored,
            "Source tree scanned"
        );

        Ok(Self {
            root: root.to_path_buf(),
            entries,
            digest,
            stats,
        })
    }

    pub fn files(&self) -> impl Iterator<Item = &TreeEntry> {
        self.entries.iter().filter(|e| e.is_file())
    }

    pub fn contains_file(&self, rel: &Path) -> bool {
        self.files().any(|e| e.path == rel)
    }

    pub fn open(&self, entry: &TreeEntry) -> Result<File, PipelineError> {
        let path = self.root.join(&entry.path);
        File::open(&path).map_err(|e| PipelineError::source_tree(path, e))
    }

    pub fn read_to_string(&self, rel: &Path) -> Result<String, PipelineError> {
        let path = self.root.join(rel);
        fs::read_to_string(&path).map_err(|e| PipelineError::source_tree(path, e))
    }
}

/// Turns `.dockerignore` patterns into root-anchored gitignore rules
fn load_dockerignore(root: &Path) -> Result<Option<Gitignore>, PipelineError> {
    let path = root.join(DOCKERIGNORE);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(PipelineError::source_tree(path, e)),
    };

    let mut builder = GitignoreBuilder::new(root);
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (negated, pattern) = match line.strip_prefix('!') {
            Some(rest) => (true, rest.trim()),
            None => (false, line),
        };
        let pattern = pattern.trim_start_matches("./").trim_start_matches('/');
        let rule = format!("{}/{}", if negated { "!" } else { "" }, pattern);
        builder
            .add_line(None, &rule)
            .map_err(|e| PipelineError::source_tree(&path, e))?;
    }

    builder
        .build()
        .map(Some)
        .map_err(|e| PipelineError::source_tree(&path, e))
}

fn digest_entries(root: &Path, entries: &[TreeEntry]) -> Result<String, PipelineError> {
    let mut hasher = Sha256::new();
    for entry in entries {
        hasher.update(entry.slash_path().as_bytes());
        hasher.update([0]);
        match &entry.kind {
            EntryKind::Dir => hasher.update(b"d"),
            EntryKind::Symlink { target } => {
                hasher.update(b"l");
                hasher.update(target.to_string_lossy().as_bytes());
            }
            EntryKind::File { executable, .. } => {
                hasher.update(if *executable { b"x" } else { b"f" });
                let path = root.join(&entry.path);
                let mut file = File::open(&path).map_err(|e| PipelineError::source_tree(&path, e))?;
                io::copy(&mut file, &mut hasher).map_err(|e| PipelineError::source_tree(&path, e))?;
            }
        }
        hasher.update([0]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(unix)]
fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &fs::Metadata) -> bool {
    false
}
