//! Filesystem-backed collaborators for local runs.
//!
//! `FsRepository` maps each ref to a checked-out directory; the project id is
//! ignored because a local checkout only ever holds one project.
//! `FileMergeRequestSource` reads MR descriptions stored as JSON.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::error::RepoError;
use crate::model::MrContext;
use crate::reader::*;

/// Repository reader over local directories, one per ref.
#[derive(Debug, Clone)]
pub struct FsRepository {
    default_root: PathBuf,
    refs: HashMap<String, PathBuf>,
}

impl FsRepository {
    /// Serve every ref from `root` unless overridden with [`FsRepository::with_ref`].
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            default_root: root.into(),
            refs: HashMap::new(),
        }
    }

    /// Serve `reference` from `root`.
    pub fn with_ref(mut self, reference: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        self.refs.insert(reference.into(), root.into());
        self
    }

    fn resolve(&self, path: &str, reference: &str) -> RepoResult<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(RepoError::InvalidPath(path.to_string()));
        }
        let root = self.refs.get(reference).unwrap_or(&self.default_root);
        Ok(root.join(relative))
    }
}

fn not_found_or_io(err: std::io::Error, path: &str, reference: &str) -> RepoError {
    if err.kind() == ErrorKind::NotFound {
        RepoError::NotFound {
            path: path.to_string(),
            reference: reference.to_string(),
        }
    } else {
        RepoError::Io(err)
    }
}

#[async_trait]
impl RepositoryReader for FsRepository {
    async fn get_file(&self, _project_id: u64, path: &str, reference: &str) -> RepoResult<String> {
        let full = self.resolve(path, reference)?;
        debug!(path = %full.display(), reference = %reference, "reading file");
        tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| not_found_or_io(e, path, reference))
    }

    async fn list_directory(
        &self,
        _project_id: u64,
        path: &str,
        reference: &str,
    ) -> RepoResult<Vec<TreeEntry>> {
        let full = self.resolve(path, reference)?;
        let mut dir = tokio::fs::read_dir(&full)
            .await
            .map_err(|e| not_found_or_io(e, path, reference))?;

        let base = path.trim_matches('/');
        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let kind = if entry.file_type().await?.is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::File
            };
            let path = if base.is_empty() {
                name.clone()
            } else {
                format!("{base}/{name}")
            };
            entries.push(TreeEntry { name, path, kind });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

/// MR source reading `<dir>/<project_id>-<mr_iid>.json`.
#[derive(Debug, Clone)]
pub struct FileMergeRequestSource {
    dir: PathBuf,
}

impl FileMergeRequestSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Decode a single MR description file.
    pub async fn read_file(path: &Path) -> RepoResult<MrContext> {
        let raw = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[async_trait]
impl MergeRequestSource for FileMergeRequestSource {
    async fn load_context(&self, project_id: u64, mr_iid: u64) -> RepoResult<MrContext> {
        let path = self.dir.join(format!("{project_id}-{mr_iid}.json"));
        match Self::read_file(&path).await {
            Err(RepoError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                Err(RepoError::MergeRequestNotFound { project_id, mr_iid })
            }
            other => other,
        }
    }
}
