//! Pure data types for repository operations.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A repository revision.
///
/// `sequence` is the commit generation (number of commits reachable from the
/// revision). It grows strictly along a branch's history and is what
/// consistency markers compare; `id` is the opaque revision id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Revision {
    /// Opaque revision id (a commit hash for git).
    pub id: String,
    /// Commit generation.
    pub sequence: u64,
}

impl Revision {
    pub fn new(id: impl Into<String>, sequence: u64) -> Self {
        Self {
            id: id.into(),
            sequence,
        }
    }

    /// Returns true if `self` is strictly newer than `other`.
    pub fn is_newer_than(&self, other: &Revision) -> bool {
        self.sequence > other.sequence
    }
}

impl PartialOrd for Revision {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Revision {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sequence
            .cmp(&other.sequence)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.id.get(..12).unwrap_or(&self.id);
        write!(f, "{}@{}", short, self.sequence)
    }
}

/// File content read from the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub path: String,
    pub content: String,
    /// The revision the content was read at.
    pub revision: Revision,
}

/// Kind of a tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// A single entry of a listed tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TreeEntry {
    pub path: String,
    pub kind: EntryKind,
}

/// One change within a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileChange {
    Write { path: String, content: String },
    Delete { path: String },
}

impl FileChange {
    pub fn path(&self) -> &str {
        match self {
            FileChange::Write { path, .. } | FileChange::Delete { path } => path,
        }
    }
}

/// Author identity recorded on a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitIdentity {
    pub name: String,
    pub email: String,
}

impl CommitIdentity {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }
}

/// An atomic commit request: all changes land as one revision or none do.
#[derive(Debug, Clone)]
pub struct CommitRequest {
    pub branch: String,
    /// Optimistic-concurrency guard: the head the changes were prepared against.
    pub base_revision: String,
    pub changes: Vec<FileChange>,
    pub message: String,
    pub author: CommitIdentity,
}
