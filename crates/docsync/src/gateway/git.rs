//! Repository gateway over a local git repository.
//!
//! Everything goes through plumbing commands so the working tree is never
//! touched and commits are built in a private index:
//! `read-tree` → `hash-object`/`update-index` → `write-tree` → `commit-tree`
//! → `update-ref <new> <base>`. The final `update-ref` is a compare-and-swap
//! on the branch ref, which makes the commit atomic and enforces the base
//! revision guard even against concurrent writers outside this process.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command as TokioCommand;

use super::error::{classify_git_error, GatewayError, Result};
use super::parse::{first_line, format_git_error, parse_count, parse_ls_tree};
use super::types::*;
use super::{path_under, RepositoryGateway};

/// Settings for [`GitGateway`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitSettings {
    /// Path to the repository (bare or with a working tree).
    pub path: PathBuf,
    /// Committer name recorded on every commit.
    #[serde(default = "default_committer_name")]
    pub committer_name: String,
    /// Committer email recorded on every commit.
    #[serde(default = "default_committer_email")]
    pub committer_email: String,
}

fn default_committer_name() -> String {
    "docsync".to_string()
}

fn default_committer_email() -> String {
    "docsync@localhost".to_string()
}

impl GitSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            committer_name: default_committer_name(),
            committer_email: default_committer_email(),
        }
    }
}

/// Removes the private index file when dropped.
#[derive(Debug)]
struct IndexCleanup {
    path: PathBuf,
}

impl Drop for IndexCleanup {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                log::warn!("Failed to clean up index file {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Git-backed repository gateway.
pub struct GitGateway {
    settings: GitSettings,
}

impl GitGateway {
    pub fn new(settings: GitSettings) -> Self {
        Self { settings }
    }

    /// Returns the repository path.
    pub fn repo_path(&self) -> &Path {
        &self.settings.path
    }

    /// Creates `branch` with a parentless commit holding `files`.
    ///
    /// Fails if the branch already exists.
    pub async fn bootstrap_branch(
        &self,
        branch: &str,
        files: &[(&str, &str)],
        message: &str,
    ) -> Result<Revision> {
        let index = self.private_index();
        let env = [("GIT_INDEX_FILE", index.path.to_string_lossy().into_owned())];

        for (path, content) in files {
            self.stage_blob(&env, path, content).await?;
        }
        let tree = self.git_line(&["write-tree"], &env, None).await?;

        let identity = CommitIdentity::new(
            self.settings.committer_name.clone(),
            self.settings.committer_email.clone(),
        );
        let commit_env = self.identity_env(&identity);
        let commit = self
            .git_line(&["commit-tree", &tree], &commit_env, Some(message.as_bytes()))
            .await?;

        let branch_ref = branch_ref(branch);
        // An all-zero old value makes update-ref fail if the ref exists.
        let zero = "0".repeat(40);
        self.git_line(&["update-ref", &branch_ref, &commit, &zero], &[], None)
            .await?;
        self.revision_of(&commit).await
    }

    // ========================================================================
    // Private helpers
    // ========================================================================

    fn private_index(&self) -> IndexCleanup {
        IndexCleanup {
            path: std::env::temp_dir().join(format!("docsync-index-{}", uuid::Uuid::new_v4())),
        }
    }

    fn identity_env(&self, author: &CommitIdentity) -> Vec<(&'static str, String)> {
        vec![
            ("GIT_AUTHOR_NAME", author.name.clone()),
            ("GIT_AUTHOR_EMAIL", author.email.clone()),
            ("GIT_COMMITTER_NAME", self.settings.committer_name.clone()),
            ("GIT_COMMITTER_EMAIL", self.settings.committer_email.clone()),
        ]
    }

    async fn stage_blob(
        &self,
        env: &[(&str, String)],
        path: &str,
        content: &str,
    ) -> Result<()> {
        let blob = self
            .git_line(&["hash-object", "-w", "--stdin"], &[], Some(content.as_bytes()))
            .await?;
        let cacheinfo = format!("100644,{},{}", blob, path);
        self.git_line(&["update-index", "--add", "--cacheinfo", &cacheinfo], env, None)
            .await?;
        Ok(())
    }

    async fn path_exists(&self, revision_id: &str, path: &str) -> Result<bool> {
        let spec = format!("{}:{}", revision_id, path);
        let output = self.run_git(&["cat-file", "-e", &spec], &[], None).await?;
        Ok(output.status.success())
    }

    async fn revision_of(&self, commit: &str) -> Result<Revision> {
        let output = self.run_git(&["rev-list", "--count", commit], &[], None).await?;
        if !output.status.success() {
            return Err(classify_git_error(&format_git_error(&output)));
        }
        let sequence = parse_count(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
            GatewayError::Operation(format!("Unexpected rev-list output for {}", commit))
        })?;
        Ok(Revision::new(commit, sequence))
    }

    async fn read_blob(&self, revision: Revision, path: &str, reference: &str) -> Result<FileContent> {
        let spec = format!("{}:{}", revision.id, path);
        let output = self.run_git(&["cat-file", "blob", &spec], &[], None).await?;
        if !output.status.success() {
            return Err(GatewayError::NotFound {
                path: path.to_string(),
                reference: reference.to_string(),
            });
        }
        Ok(FileContent {
            path: path.to_string(),
            content: String::from_utf8_lossy(&output.stdout).into_owned(),
            revision,
        })
    }

    /// Runs a git command and returns its first stdout line, mapping failure
    /// through [`classify_git_error`].
    async fn git_line(
        &self,
        args: &[&str],
        env: &[(&str, String)],
        stdin: Option<&[u8]>,
    ) -> Result<String> {
        let output = self.run_git(args, env, stdin).await?;
        if !output.status.success() {
            return Err(classify_git_error(&format_git_error(&output)));
        }
        Ok(first_line(&output.stdout))
    }

    /// Runs a git command in the repository directory.
    ///
    /// The child is killed if the returned future is dropped, so a caller-side
    /// timeout never leaves a git process running.
    async fn run_git(
        &self,
        args: &[&str],
        env: &[(&str, String)],
        stdin: Option<&[u8]>,
    ) -> Result<Output> {
        let mut cmd = TokioCommand::new("git");
        cmd.current_dir(&self.settings.path)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for (key, value) in env {
            cmd.env(key, value);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| GatewayError::Unreachable(format!("failed to spawn git: {}", e)))?;

        let stdin_pipe = child.stdin.take();
        let write_task = async {
            if let (Some(mut pipe), Some(data)) = (stdin_pipe, stdin) {
                pipe.write_all(data).await?;
                pipe.shutdown().await?;
            }
            Ok::<(), std::io::Error>(())
        };

        let (written, output) = tokio::join!(write_task, child.wait_with_output());
        let output = output.map_err(|e| GatewayError::Unreachable(e.to_string()))?;
        written.map_err(|e| GatewayError::Unreachable(format!("git stdin: {}", e)))?;

        Ok(output)
    }
}

#[async_trait]
impl RepositoryGateway for GitGateway {
    async fn read(&self, path: &str, branch: &str) -> Result<FileContent> {
        let head = self.head_revision(branch).await?;
        self.read_blob(head, path, branch).await
    }

    async fn read_at(&self, path: &str, revision_id: &str) -> Result<FileContent> {
        let revision = self.resolve(revision_id).await?;
        self.read_blob(revision, path, revision_id).await
    }

    async fn list_tree(&self, prefix: &str, branch: &str) -> Result<Vec<TreeEntry>> {
        let head = self.head_revision(branch).await?;
        let output = self
            .run_git(&["ls-tree", "-r", "-t", &head.id], &[], None)
            .await?;
        if !output.status.success() {
            return Err(classify_git_error(&format_git_error(&output)));
        }

        let trimmed = prefix.trim_matches('/');
        Ok(parse_ls_tree(&String::from_utf8_lossy(&output.stdout))
            .into_iter()
            .filter(|e| path_under(&e.path, prefix) && e.path != trimmed)
            .collect())
    }

    async fn head_revision(&self, branch: &str) -> Result<Revision> {
        self.resolve(&branch_ref(branch)).await
    }

    async fn resolve(&self, revision_id: &str) -> Result<Revision> {
        let spec = format!("{}^{{commit}}", revision_id);
        let output = self
            .run_git(&["rev-parse", "--verify", "--quiet", &spec], &[], None)
            .await?;
        if !output.status.success() {
            return Err(GatewayError::UnknownRevision(revision_id.to_string()));
        }
        self.revision_of(&first_line(&output.stdout)).await
    }

    async fn commit(&self, request: CommitRequest) -> Result<Revision> {
        if request.changes.is_empty() {
            return Err(GatewayError::EmptyChangeSet(request.branch));
        }

        let branch_ref = branch_ref(&request.branch);
        let head = self.head_revision(&request.branch).await?;
        if head.id != request.base_revision {
            return Err(GatewayError::Conflict {
                branch: request.branch,
                expected: request.base_revision,
                actual: head.id,
            });
        }

        let index = self.private_index();
        let env = [("GIT_INDEX_FILE", index.path.to_string_lossy().into_owned())];
        self.git_line(&["read-tree", &head.id], &env, None).await?;

        for change in &request.changes {
            match change {
                FileChange::Write { path, content } => {
                    self.stage_blob(&env, path, content).await?;
                }
                FileChange::Delete { path } => {
                    if !self.path_exists(&head.id, path).await? {
                        return Err(GatewayError::NotFound {
                            path: path.clone(),
                            reference: request.branch.clone(),
                        });
                    }
                    self.git_line(&["update-index", "--force-remove", "--", path], &env, None)
                        .await?;
                }
            }
        }

        let tree = self.git_line(&["write-tree"], &env, None).await?;
        let commit_env = self.identity_env(&request.author);
        let commit = self
            .git_line(
                &["commit-tree", &tree, "-p", &head.id],
                &commit_env,
                Some(request.message.as_bytes()),
            )
            .await?;

        let update = self
            .run_git(
                &["update-ref", &branch_ref, &commit, &head.id],
                &[],
                None,
            )
            .await?;
        if !update.status.success() {
            let actual = self
                .head_revision(&request.branch)
                .await
                .map(|r| r.id)
                .unwrap_or_else(|_| "unknown".to_string());
            log::warn!(
                "update-ref on {} lost the race: {}",
                branch_ref,
                format_git_error(&update)
            );
            return Err(GatewayError::Conflict {
                branch: request.branch,
                expected: request.base_revision,
                actual,
            });
        }

        Ok(Revision::new(commit, head.sequence + 1))
    }
}

fn branch_ref(branch: &str) -> String {
    if branch.starts_with("refs/") {
        branch.to_string()
    } else {
        format!("refs/heads/{}", branch)
    }
}
