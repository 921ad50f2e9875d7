//! In-memory fakes for collaborator traits (testing only)
//!
//! Provides `MemoryRepository` and `MemoryMergeRequestSource` that satisfy
//! the trait contracts without any external dependencies.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::error::RepoError;
use crate::model::MrContext;
use crate::reader::*;

// ---------------------------------------------------------------------------
// MemoryRepository
// ---------------------------------------------------------------------------

/// In-memory repository keyed by `(project, ref, path)`.
///
/// Built up front with the `with_*` methods and read-only afterwards. Paths
/// registered through [`MemoryRepository::with_transport_failure`] fail every
/// lookup with `RepoError::Transport`.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    files: BTreeMap<(u64, String, String), String>,
    failing: HashSet<String>,
    fetches: AtomicUsize,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register file content at `(project_id, reference, path)`.
    pub fn with_file(
        mut self,
        project_id: u64,
        reference: &str,
        path: &str,
        content: &str,
    ) -> Self {
        self.files.insert(
            (project_id, reference.to_string(), normalize(path)),
            content.to_string(),
        );
        self
    }

    /// Make every lookup at or below `path` fail with a transport error.
    pub fn with_transport_failure(mut self, path: &str) -> Self {
        self.failing.insert(normalize(path));
        self
    }

    /// Number of `get_file` calls served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    fn check_failure(&self, path: &str) -> RepoResult<()> {
        let path = normalize(path);
        if self
            .failing
            .iter()
            .any(|f| path == *f || path.starts_with(&format!("{f}/")))
        {
            return Err(RepoError::Transport(format!("simulated failure for {path}")));
        }
        Ok(())
    }
}

fn normalize(path: &str) -> String {
    path.trim_matches('/').to_string()
}

#[async_trait]
impl RepositoryReader for MemoryRepository {
    async fn get_file(&self, project_id: u64, path: &str, reference: &str) -> RepoResult<String> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        self.check_failure(path)?;
        self.files
            .get(&(project_id, reference.to_string(), normalize(path)))
            .cloned()
            .ok_or_else(|| RepoError::NotFound {
                path: path.to_string(),
                reference: reference.to_string(),
            })
    }

    async fn list_directory(
        &self,
        project_id: u64,
        path: &str,
        reference: &str,
    ) -> RepoResult<Vec<TreeEntry>> {
        self.check_failure(path)?;
        let dir = normalize(path);
        let prefix = if dir.is_empty() {
            String::new()
        } else {
            format!("{dir}/")
        };

        let mut entries = BTreeSet::new();
        for (p, r, file) in self.files.keys() {
            if *p != project_id || r != reference {
                continue;
            }
            let Some(rest) = file.strip_prefix(&prefix) else {
                continue;
            };
            let (name, kind) = match rest.split_once('/') {
                Some((child, _)) => (child, EntryKind::Directory),
                None => (rest, EntryKind::File),
            };
            entries.insert((name.to_string(), kind));
        }

        if entries.is_empty() {
            return Err(RepoError::NotFound {
                path: path.to_string(),
                reference: reference.to_string(),
            });
        }

        Ok(entries
            .into_iter()
            .map(|(name, kind)| TreeEntry {
                path: format!("{prefix}{name}"),
                name,
                kind,
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MemoryMergeRequestSource
// ---------------------------------------------------------------------------

/// In-memory MR source backed by a `HashMap<(project, mr_iid), MrContext>`.
#[derive(Debug, Default)]
pub struct MemoryMergeRequestSource {
    contexts: HashMap<(u64, u64), MrContext>,
}

impl MemoryMergeRequestSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(mut self, ctx: MrContext) -> Self {
        self.contexts.insert((ctx.project_id, ctx.mr_iid), ctx);
        self
    }
}

#[async_trait]
impl MergeRequestSource for MemoryMergeRequestSource {
    async fn load_context(&self, project_id: u64, mr_iid: u64) -> RepoResult<MrContext> {
        self.contexts
            .get(&(project_id, mr_iid))
            .cloned()
            .ok_or(RepoError::MergeRequestNotFound { project_id, mr_iid })
    }
}
