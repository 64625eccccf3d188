//! Artifact Placement: the source tree and the build context archive

pub mod archive;
pub mod tree;

pub use archive::{ContextArchive, GeneratedFile, APP_PREFIX};
pub use tree::{EntryKind, SourceTree, TreeEntry, TreeStats};
