//! Collaborator trait definitions for MR Gate
//!
//! These traits define what the rule engine consumes from outside:
//! - `RepositoryReader`: read-only file/directory access at a ref
//! - `MergeRequestSource`: MR metadata and file changes
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RepoError;
use crate::model::MrContext;

/// Result type for collaborator operations
pub type RepoResult<T> = std::result::Result<T, RepoError>;

/// Kind of a directory listing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    File,
    Directory,
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TreeEntry {
    /// Base name of the entry.
    pub name: String,
    /// Repository-relative path of the entry.
    pub path: String,
    pub kind: EntryKind,
}

impl TreeEntry {
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Read-only view of repository content.
///
/// Guarantees:
/// - `get_file` returns `RepoError::NotFound` when the path does not exist at
///   the ref; any other error means the lookup itself failed.
/// - `list_directory` returns `RepoError::NotFound` for a missing directory.
#[async_trait]
pub trait RepositoryReader: Send + Sync {
    /// Raw file content at `reference`.
    async fn get_file(&self, project_id: u64, path: &str, reference: &str) -> RepoResult<String>;

    /// Immediate children of the directory at `path`.
    async fn list_directory(
        &self,
        project_id: u64,
        path: &str,
        reference: &str,
    ) -> RepoResult<Vec<TreeEntry>>;
}

/// Source of merge-request descriptions.
#[async_trait]
pub trait MergeRequestSource: Send + Sync {
    /// Load metadata and changes for `(project_id, mr_iid)`.
    async fn load_context(&self, project_id: u64, mr_iid: u64) -> RepoResult<MrContext>;
}
