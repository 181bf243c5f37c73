//! In-process repository gateway.
//!
//! Branches are chains of immutable snapshots held in memory. Revision ids
//! are `r0`, `r1`, ... in creation order; generations start at 1 for a root
//! commit, matching `git rev-list --count`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::error::{GatewayError, Result};
use super::types::*;
use super::{path_under, RepositoryGateway};

#[derive(Debug)]
struct Snapshot {
    revision: Revision,
    files: BTreeMap<String, String>,
    message: String,
    author: CommitIdentity,
}

#[derive(Debug, Default)]
struct State {
    snapshots: HashMap<String, Arc<Snapshot>>,
    heads: HashMap<String, String>,
    next_id: u64,
    offline: bool,
    failing_commits: u32,
    commit_delay: Option<Duration>,
}

impl State {
    fn head(&self, branch: &str) -> Result<Arc<Snapshot>> {
        let id = self
            .heads
            .get(branch)
            .ok_or_else(|| GatewayError::UnknownRevision(branch.to_string()))?;
        self.snapshot(id)
    }

    fn snapshot(&self, id: &str) -> Result<Arc<Snapshot>> {
        self.snapshots
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownRevision(id.to_string()))
    }

    fn check_online(&self) -> Result<()> {
        if self.offline {
            return Err(GatewayError::Unreachable(
                "in-memory repository is offline".to_string(),
            ));
        }
        Ok(())
    }

    fn allocate_id(&mut self) -> String {
        let id = format!("r{}", self.next_id);
        self.next_id += 1;
        id
    }

    fn apply(&mut self, request: &CommitRequest) -> Result<Revision> {
        let head = self.head(&request.branch)?;
        if head.revision.id != request.base_revision {
            return Err(GatewayError::Conflict {
                branch: request.branch.clone(),
                expected: request.base_revision.clone(),
                actual: head.revision.id.clone(),
            });
        }
        if request.changes.is_empty() {
            return Err(GatewayError::EmptyChangeSet(request.branch.clone()));
        }

        let mut files = head.files.clone();
        for change in &request.changes {
            match change {
                FileChange::Write { path, content } => {
                    files.insert(path.clone(), content.clone());
                }
                FileChange::Delete { path } => {
                    if files.remove(path).is_none() {
                        return Err(GatewayError::NotFound {
                            path: path.clone(),
                            reference: request.branch.clone(),
                        });
                    }
                }
            }
        }

        let revision = Revision::new(self.allocate_id(), head.revision.sequence + 1);
        self.snapshots.insert(
            revision.id.clone(),
            Arc::new(Snapshot {
                revision: revision.clone(),
                files,
                message: request.message.clone(),
                author: request.author.clone(),
            }),
        );
        self.heads
            .insert(request.branch.clone(), revision.id.clone());
        Ok(revision)
    }
}

/// A repository gateway backed by process memory.
#[derive(Debug, Default)]
pub struct InMemoryGateway {
    state: Mutex<State>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates `branch` with a root commit holding `files`.
    pub fn create_branch<I, P, C>(&self, branch: &str, files: I) -> Revision
    where
        I: IntoIterator<Item = (P, C)>,
        P: Into<String>,
        C: Into<String>,
    {
        let mut state = self.state();
        let revision = Revision::new(state.allocate_id(), 1);
        let files = files
            .into_iter()
            .map(|(p, c)| (p.into(), c.into()))
            .collect();
        state.snapshots.insert(
            revision.id.clone(),
            Arc::new(Snapshot {
                revision: revision.clone(),
                files,
                message: "Initial commit".to_string(),
                author: CommitIdentity::new("system", "system@localhost"),
            }),
        );
        state.heads.insert(branch.to_string(), revision.id.clone());
        revision
    }

    /// Commits directly onto the head of `branch`, bypassing any workflow.
    /// Simulates an out-of-band push.
    pub fn push_external(&self, branch: &str, changes: Vec<FileChange>) -> Result<Revision> {
        let mut state = self.state();
        let head = state.head(branch)?;
        state.apply(&CommitRequest {
            branch: branch.to_string(),
            base_revision: head.revision.id.clone(),
            changes,
            message: "External push".to_string(),
            author: CommitIdentity::new("external", "external@localhost"),
        })
    }

    /// Commit message and author of a revision.
    pub fn commit_info(&self, revision_id: &str) -> Option<(String, CommitIdentity)> {
        let state = self.state();
        state
            .snapshots
            .get(revision_id)
            .map(|s| (s.message.clone(), s.author.clone()))
    }

    /// Number of revisions stored across all branches.
    pub fn revision_count(&self) -> usize {
        self.state().snapshots.len()
    }

    /// Makes every operation fail with `Unreachable` while set.
    pub fn set_offline(&self, offline: bool) {
        self.state().offline = offline;
    }

    /// Makes the next `count` commits fail with `Unreachable` before applying.
    pub fn fail_next_commits(&self, count: u32) {
        self.state().failing_commits = count;
    }

    /// Delays every commit by `delay` before it is applied.
    pub fn set_commit_delay(&self, delay: Option<Duration>) {
        self.state().commit_delay = delay;
    }
}

#[async_trait]
impl RepositoryGateway for InMemoryGateway {
    async fn read(&self, path: &str, branch: &str) -> Result<FileContent> {
        let state = self.state();
        state.check_online()?;
        let head = state.head(branch)?;
        read_snapshot(&head, path, branch)
    }

    async fn read_at(&self, path: &str, revision_id: &str) -> Result<FileContent> {
        let state = self.state();
        state.check_online()?;
        let snapshot = state.snapshot(revision_id)?;
        read_snapshot(&snapshot, path, revision_id)
    }

    async fn list_tree(&self, prefix: &str, branch: &str) -> Result<Vec<TreeEntry>> {
        let state = self.state();
        state.check_online()?;
        let head = state.head(branch)?;

        let mut directories = BTreeSet::new();
        let mut entries = Vec::new();
        for path in head.files.keys().filter(|p| path_under(p, prefix)) {
            let mut parent = path.as_str();
            while let Some((dir, _)) = parent.rsplit_once('/') {
                if path_under(dir, prefix) && dir != prefix.trim_matches('/') {
                    directories.insert(dir.to_string());
                }
                parent = dir;
            }
            entries.push(TreeEntry {
                path: path.clone(),
                kind: EntryKind::File,
            });
        }
        entries.extend(directories.into_iter().map(|path| TreeEntry {
            path,
            kind: EntryKind::Directory,
        }));
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn head_revision(&self, branch: &str) -> Result<Revision> {
        let state = self.state();
        state.check_online()?;
        Ok(state.head(branch)?.revision.clone())
    }

    async fn resolve(&self, revision_id: &str) -> Result<Revision> {
        let state = self.state();
        state.check_online()?;
        Ok(state.snapshot(revision_id)?.revision.clone())
    }

    async fn commit(&self, request: CommitRequest) -> Result<Revision> {
        let delay = {
            let mut state = self.state();
            state.check_online()?;
            if state.failing_commits > 0 {
                state.failing_commits -= 1;
                return Err(GatewayError::Unreachable(
                    "injected commit failure".to_string(),
                ));
            }
            state.commit_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.state().apply(&request)
    }
}

fn read_snapshot(snapshot: &Snapshot, path: &str, reference: &str) -> Result<FileContent> {
    snapshot
        .files
        .get(path)
        .map(|content| FileContent {
            path: path.to_string(),
            content: content.clone(),
            revision: snapshot.revision.clone(),
        })
        .ok_or_else(|| GatewayError::NotFound {
            path: path.to_string(),
            reference: reference.to_string(),
        })
}
