//! Access to the version-controlled store.
//!
//! The engine only talks to the repository through [`RepositoryGateway`]:
//! - [`GitGateway`] drives a local git repository with plumbing commands
//! - [`InMemoryGateway`] keeps branches in process (tests, embedding)
//!
//! Commits are atomic and guarded by the base revision (optimistic
//! concurrency): a stale base fails with [`GatewayError::Conflict`].

pub mod error;
pub mod git;
pub mod memory;
pub mod parse;
pub mod types;

use async_trait::async_trait;

pub use error::{GatewayError, Result};
pub use git::{GitGateway, GitSettings};
pub use memory::InMemoryGateway;
pub use types::*;

#[async_trait]
pub trait RepositoryGateway: Send + Sync {
    /// Reads `path` at the head of `branch`.
    async fn read(&self, path: &str, branch: &str) -> Result<FileContent>;

    /// Reads `path` at an exact revision.
    async fn read_at(&self, path: &str, revision_id: &str) -> Result<FileContent>;

    /// Lists every entry under `prefix` at the head of `branch`.
    async fn list_tree(&self, prefix: &str, branch: &str) -> Result<Vec<TreeEntry>>;

    /// Returns the current head of `branch`.
    async fn head_revision(&self, branch: &str) -> Result<Revision>;

    /// Resolves a revision id to a [`Revision`] carrying its generation.
    async fn resolve(&self, revision_id: &str) -> Result<Revision>;

    /// Applies all changes as one new revision on `request.branch`.
    async fn commit(&self, request: CommitRequest) -> Result<Revision>;
}

/// Returns true if `path` lies under the directory `prefix`.
///
/// An empty prefix matches everything.
pub(crate) fn path_under(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        return true;
    }
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}
