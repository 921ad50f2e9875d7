//! Error types for mrgate-repo

use thiserror::Error;

/// Errors surfaced by repository and merge-request collaborators.
#[derive(Error, Debug)]
pub enum RepoError {
    /// The path does not exist at the requested ref.
    #[error("file not found: {path} at {reference}")]
    NotFound { path: String, reference: String },

    /// The merge request is unknown to the source.
    #[error("merge request not found: project {project_id} !{mr_iid}")]
    MergeRequestNotFound { project_id: u64, mr_iid: u64 },

    /// The collaborator could not be reached or answered with garbage.
    #[error("repository transport failed: {0}")]
    Transport(String),

    /// The path escapes the repository root or is otherwise unusable.
    #[error("invalid repository path: {0}")]
    InvalidPath(String),

    /// Local I/O error (filesystem-backed collaborators).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// MR description could not be decoded.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RepoError {
    /// Whether this error means "the thing is absent" rather than "the lookup broke".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RepoError::NotFound { .. } | RepoError::MergeRequestNotFound { .. }
        )
    }
}
