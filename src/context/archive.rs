use super::tree::{EntryKind, SourceTree, TreeEntry};
use crate::error::PipelineError;
use bytes::Bytes;
use flate2::{Compression, GzBuilder};
use sha2::{Digest, Sha256};
use std::io::{self, Read, Write};
use std::path::Path;
use tar::{Builder, EntryType, Header};

/// Directory inside the archive that holds the source tree
pub const APP_PREFIX: &str = "app";

const FILE_MODE: u32 = 0o644;
const EXEC_MODE: u32 = 0o755;

/// A generated file placed at the archive root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedFile {
    pub path: String,
    pub content: Vec<u8>,
}

impl GeneratedFile {
    pub fn new(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Build context sent to the engine
///
/// Entries are written in sorted order with zeroed timestamps and ownership
/// and normalized modes, so the same inputs always produce the same bytes.
#[derive(Debug, Clone)]
pub struct ContextArchive {
    /// gzip-compressed tar
    bytes: Bytes,
    /// SHA-256 of the uncompressed tar
    digest: String,
    entries: usize,
}

enum Pending<'a> {
    Generated(&'a GeneratedFile),
    Tree(&'a TreeEntry),
    AppRoot,
}

impl ContextArchive {
    pub fn assemble(
        tree: &SourceTree,
        generated: &[GeneratedFile],
    ) -> Result<Self, PipelineError> {
        let mut pending: Vec<(String, Pending)> = generated
            .iter()
            .map(|file| (file.path.clone(), Pending::Generated(file)))
            .collect();
        pending.push((format!("{}/", APP_PREFIX), Pending::AppRoot));
        for entry in &tree.entries {
            let mut path = format!("{}/{}", APP_PREFIX, entry.slash_path());
            if entry.kind == EntryKind::Dir {
                path.push('/');
            }
            pending.push((path, Pending::Tree(entry)));
        }
        pending.sort_by(|a, b| a.0.cmp(&b.0));

        let mut builder = Builder::new(Vec::new());
        builder.mode(tar::HeaderMode::Deterministic);

        for (path, item) in &pending {
            let result = match item {
                Pending::Generated(file) => {
                    append_file(&mut builder, path, FILE_MODE, file.content.len() as u64, &file.content[..])
                }
                Pending::AppRoot => append_dir(&mut builder, path),
                Pending::Tree(entry) => match &entry.kind {
                    EntryKind::Dir => append_dir(&mut builder, path),
                    EntryKind::Symlink { target } => append_symlink(&mut builder, path, target),
                    EntryKind::File { executable, size } => {
                        let file = tree.open(entry)?;
                        let mode = if *executable { EXEC_MODE } else { FILE_MODE };
                        append_file(&mut builder, path, mode, *size, file)
                    }
                },
            };
            result.map_err(|e| PipelineError::source_tree(tree.root.join(path), e))?;
        }

        let tar = builder
            .into_inner()
            .map_err(|e| PipelineError::source_tree(&tree.root, e))?;
        let digest = hex::encode(Sha256::digest(&tar));

        let mut encoder = GzBuilder::new()
            .mtime(0)
            .write(Vec::new(), Compression::default());
        encoder
            .write_all(&tar)
            .map_err(|e| PipelineError::source_tree(&tree.root, e))?;
        let compressed = encoder
            .finish()
            .map_err(|e| PipelineError::source_tree(&tree.root, e))?;

        Ok(Self {
            bytes: Bytes::from(compressed),
            digest,
            entries: pending.len(),
        })
    }

    pub fn bytes(&self) -> Bytes {
        self.bytes.clone()
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn entries(&self) -> usize {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

fn base_header(entry_type: EntryType, mode: u32, size: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mode(mode);
    header.set_size(size);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header
}

fn append_file<R: Read>(
    builder: &mut Builder<Vec<u8>>,
    path: &str,
    mode: u32,
    size: u64,
    data: R,
) -> io::Result<()> {
    let mut header = base_header(EntryType::Regular, mode, size);
    // A file that changed size since the scan would corrupt the stream
    let mut limited = data.take(size);
    builder.append_data(&mut header, path, &mut limited)
}

fn append_dir(builder: &mut Builder<Vec<u8>>, path: &str) -> io::Result<()> {
    let mut header = base_header(EntryType::Directory, EXEC_MODE, 0);
    builder.append_data(&mut header, path, io::empty())
}

fn append_symlink(builder: &mut Builder<Vec<u8>>, path: &str, target: &Path) -> io::Result<()> {
    let mut header = base_header(EntryType::Symlink, 0o777, 0);
    builder.append_link(&mut header, path, target)
}
