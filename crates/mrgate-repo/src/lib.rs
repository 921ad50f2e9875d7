//! MR Gate Repo: collaborator contracts for the governance engine
//!
//! This crate owns everything the rule engine consumes from the outside
//! world but does not implement itself: the shape of a merge request and its
//! file changes, and the read-only view of repository content at a ref.
//!
//! ## Layer 0 - Collaborators
//!
//! Focus: stable contracts, no policy.
//!
//! ## Key Components
//!
//! - `FileChange` / `MrContext`: immutable description of one MR
//! - `RepositoryReader`: fetch file content / list directories at a ref
//! - `MergeRequestSource`: load an `MrContext` for `(project, mr_iid)`
//! - `fakes`: in-memory implementations for tests
//! - `fs`: filesystem-backed implementations for local runs

mod error;
pub mod fakes;
pub mod fs;
pub mod model;
pub mod reader;

pub use error::RepoError;
pub use model::{FileChange, MrContext, RebuiltContent};
pub use reader::{EntryKind, MergeRequestSource, RepoResult, RepositoryReader, TreeEntry};
