//! Brings the metadata cache back in line with the repository.
//!
//! Used after a publish whose cache write failed, for webhook paths that
//! could not be read, and periodically by the [`ResyncScheduler`]. Every
//! write goes through the cache's marker rules, so a resync racing a
//! webhook or a publish can never regress an entry.

pub mod scheduler;

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::Instrument;

use crate::audit::{AuditAction, AuditLog, AuditSource, NewAuditEntry, TargetRef};
use crate::cache::{CacheDocument, MetadataCache};
use crate::document::{normalize_path, DocumentScope};
use crate::error::{Result, SyncError};
use crate::gateway::{EntryKind, GatewayError, RepositoryGateway, Revision};
use crate::publish::RetryPolicy;

pub use scheduler::ResyncScheduler;

const ACTOR: &str = "reconciler";

/// Work item for reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileRequest {
    Path { path: String, branch: String },
    Branch { branch: String },
}

/// Summary of a resync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResyncReport {
    pub branch: String,
    /// Head the run compared against.
    pub revision: Revision,
    /// Documents read from the repository.
    pub scanned: usize,
    pub updated: Vec<String>,
    pub tombstoned: Vec<String>,
    /// Paths that could not be read; left for the next run.
    pub failed: Vec<String>,
}

impl ResyncReport {
    fn new(branch: &str, revision: Revision) -> Self {
        Self {
            branch: branch.to_string(),
            revision,
            scanned: 0,
            updated: Vec::new(),
            tombstoned: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn changed(&self) -> usize {
        self.updated.len() + self.tombstoned.len()
    }
}

pub struct CacheReconciler {
    gateway: Arc<dyn RepositoryGateway>,
    cache: MetadataCache,
    audit: AuditLog,
    scope: DocumentScope,
    retry: RetryPolicy,
}

impl CacheReconciler {
    pub fn new(
        gateway: Arc<dyn RepositoryGateway>,
        cache: MetadataCache,
        audit: AuditLog,
        scope: DocumentScope,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            gateway,
            cache,
            audit,
            scope,
            retry,
        }
    }

    /// Re-reads one document at the head of `branch`; tombstones it if absent.
    pub async fn resync_path(&self, path: &str, branch: &str) -> Result<ResyncReport> {
        let path = normalize_path(path)?;
        let span = tracing::info_span!("reconcile.path", path = %path, branch = %branch);
        async {
            let head = self.head(branch).await?;
            let mut report = ResyncReport::new(branch, head);
            self.sync_one(&path, &mut report).await?;
            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// Rebuilds every tracked document of `branch` from its head.
    ///
    /// Live cache entries missing from the tree are re-read and tombstoned
    /// if gone. Unreadable documents are reported in `failed` and do not
    /// abort the run.
    pub async fn resync_branch(&self, branch: &str) -> Result<ResyncReport> {
        let span = tracing::info_span!("reconcile.branch", branch = %branch);
        async {
            let head = self.head(branch).await?;
            let mut report = ResyncReport::new(branch, head);

            let entries = self
                .retry
                .run("list_tree", GatewayError::is_retryable, || {
                    self.gateway.list_tree(&self.scope.docs_root, branch)
                })
                .await?;
            let present: BTreeSet<String> = entries
                .into_iter()
                .filter(|e| e.kind == EntryKind::File && self.scope.contains(&e.path))
                .map(|e| e.path)
                .collect();

            for path in &present {
                if let Err(e) = self.sync_one(path, &mut report).await {
                    log::warn!("Resync of {} on {} failed: {}", path, branch, e);
                    report.failed.push(path.clone());
                }
            }

            // Live entries the tree listing did not cover: deleted documents
            // and documents published outside the docs root. Re-reading at
            // the head settles both.
            for path in self.cache.live_paths(branch)? {
                if present.contains(&path) {
                    continue;
                }
                if let Err(e) = self.sync_one(&path, &mut report).await {
                    log::warn!("Resync of {} on {} failed: {}", path, branch, e);
                    report.failed.push(path);
                }
            }

            log::info!(
                "Resync of {} at {}: {} scanned, {} updated, {} tombstoned, {} failed",
                branch,
                report.revision,
                report.scanned,
                report.updated.len(),
                report.tombstoned.len(),
                report.failed.len()
            );
            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// Handles a queued request.
    pub async fn handle(&self, request: &ReconcileRequest) -> Result<ResyncReport> {
        match request {
            ReconcileRequest::Path { path, branch } => self.resync_path(path, branch).await,
            ReconcileRequest::Branch { branch } => self.resync_branch(branch).await,
        }
    }

    async fn head(&self, branch: &str) -> Result<Revision> {
        self.retry
            .run("head_revision", GatewayError::is_retryable, || {
                self.gateway.head_revision(branch)
            })
            .await
    }

    async fn sync_one(&self, path: &str, report: &mut ResyncReport) -> Result<()> {
        let head = report.revision.clone();
        let branch = report.branch.clone();
        let read = self
            .retry
            .run("read_at", GatewayError::is_retryable, || {
                self.gateway.read_at(path, &head.id)
            })
            .await;

        match read {
            Ok(file) => {
                report.scanned += 1;
                let document = CacheDocument::from_content(path, &file.content);
                if self.cache.upsert(path, &branch, &document, &head)? {
                    self.record(path, &branch, AuditAction::CacheReconcile, json!({
                        "revision": head,
                        "metadata": document.metadata,
                    }));
                    report.updated.push(path.to_string());
                }
            }
            Err(SyncError::Gateway(GatewayError::NotFound { .. })) => {
                if self.cache.invalidate(path, &branch, &head)? {
                    self.record(path, &branch, AuditAction::CacheTombstone, json!({
                        "revision": head,
                        "tombstoned": true,
                    }));
                    report.tombstoned.push(path.to_string());
                }
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    fn record(&self, path: &str, branch: &str, action: AuditAction, state: serde_json::Value) {
        let entry = NewAuditEntry::new(
            ACTOR,
            action,
            TargetRef::document(path, branch),
            AuditSource::Reconciler,
        )
        .after(state);
        if let Err(e) = self.audit.append(&entry) {
            log::error!("Failed to audit resync of {}: {}", path, e);
        }
    }
}
