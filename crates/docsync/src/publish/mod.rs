//! Turns an approved draft into one repository commit.
//!
//! The coordinator is the only component that calls
//! [`RepositoryGateway::commit`]. Per (path, branch) it runs, under an
//! exclusive lock: head check, commit, draft update, cache upsert, audit.
//! The repository is authoritative: once the commit lands the publish
//! succeeds, and a failed cache write is handed to reconciliation.

pub mod commit_message;
pub mod locks;
pub mod retry;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::Instrument;

use crate::audit::{AuditAction, AuditLog, AuditSource, NewAuditEntry, TargetRef};
use crate::cache::{CacheDocument, MetadataCache};
use crate::drafts::{Draft, DraftStatus, DraftStore};
use crate::error::{Result, SyncError};
use crate::gateway::{
    CommitIdentity, CommitRequest, FileChange, GatewayError, RepositoryGateway, Revision,
};
use crate::reconcile::ReconcileRequest;
use crate::workflow::machine::{self, Actor, WorkflowEvent};

pub use commit_message::{parse_draft_id, CommitAction, PublishMessage};
pub use locks::{KeyedLocks, LockKey};
pub use retry::RetryPolicy;

/// Publish tuning.
#[derive(Debug, Clone)]
pub struct PublishSettings {
    /// How long to wait for another publish of the same key.
    pub lock_timeout: Duration,
    /// Deadline for a single commit attempt.
    pub commit_timeout: Duration,
    pub retry: RetryPolicy,
    /// Repository directory holding the documents.
    pub docs_root: String,
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(10),
            commit_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            docs_root: String::new(),
        }
    }
}

/// Result of a successful publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishOutcome {
    pub draft_id: String,
    pub revision: Revision,
    /// False if the cache write failed and reconciliation was requested.
    pub cache_synced: bool,
    /// False if the commit landed but the draft could not be marked
    /// published; it is still `Approved` and needs repair.
    pub draft_synced: bool,
    /// False if the publish audit entry could not be written.
    pub audited: bool,
}

pub struct PublishCoordinator {
    gateway: Arc<dyn RepositoryGateway>,
    drafts: DraftStore,
    cache: MetadataCache,
    audit: AuditLog,
    locks: KeyedLocks,
    settings: PublishSettings,
    reconcile_tx: broadcast::Sender<ReconcileRequest>,
}

impl PublishCoordinator {
    pub fn new(
        gateway: Arc<dyn RepositoryGateway>,
        drafts: DraftStore,
        cache: MetadataCache,
        audit: AuditLog,
        settings: PublishSettings,
        reconcile_tx: broadcast::Sender<ReconcileRequest>,
    ) -> Self {
        Self {
            gateway,
            drafts,
            cache,
            audit,
            locks: KeyedLocks::new(),
            settings,
            reconcile_tx,
        }
    }

    /// Publishes draft `draft_id` on behalf of `actor`.
    ///
    /// Fails with `InvalidState` unless the draft is approved, with
    /// `Conflict` if the branch moved past the draft's base revision or
    /// another publish of the same document holds the lock too long, and
    /// with `Unreachable` if the repository cannot be reached.
    pub async fn publish(&self, draft_id: &str, actor: &Actor) -> Result<PublishOutcome> {
        let draft = self.load_approved(draft_id)?;
        machine::check_guard(WorkflowEvent::Publish, actor, &draft.author)
            .map_err(SyncError::PermissionDenied)?;

        let span = tracing::info_span!(
            "publish",
            draft_id = %draft.id,
            path = %draft.path,
            branch = %draft.branch
        );
        self.publish_locked(draft, actor).instrument(span).await
    }

    async fn publish_locked(&self, draft: Draft, actor: &Actor) -> Result<PublishOutcome> {
        let key = LockKey::new(draft.path.clone(), draft.branch.clone());
        let _guard = self
            .locks
            .acquire(key, self.settings.lock_timeout)
            .await
            .ok_or_else(|| {
                SyncError::Conflict(format!(
                    "publish already in progress for '{}' on '{}'",
                    draft.path, draft.branch
                ))
            })?;

        // The status may have moved while we waited.
        let draft = self.load_approved(&draft.id)?;

        let head = self
            .settings
            .retry
            .run("head_revision", GatewayError::is_retryable, || {
                self.gateway.head_revision(&draft.branch)
            })
            .await?;
        if head.id != draft.base_revision {
            log::info!(
                "Publish of draft {} rejected: base {} is stale, head is {}",
                draft.id,
                draft.base_revision,
                head
            );
            return Err(SyncError::Conflict(format!(
                "branch '{}' moved from {} to {}; refresh the draft and resubmit",
                draft.branch, draft.base_revision, head.id
            )));
        }

        let previous = self
            .cache
            .get_any(&draft.path, &draft.branch)
            .unwrap_or_else(|e| {
                log::warn!("Could not read cached entry for {}: {}", draft.path, e);
                None
            });
        let document = draft.document();
        let cached = CacheDocument::from_content(&draft.path, &document);
        let action = match self.gateway.read(&draft.path, &draft.branch).await {
            Ok(_) => CommitAction::Update,
            Err(GatewayError::NotFound { .. }) => CommitAction::Create,
            Err(e) => return Err(e.into()),
        };

        let request = CommitRequest {
            branch: draft.branch.clone(),
            base_revision: head.id.clone(),
            changes: vec![FileChange::Write {
                path: draft.path.clone(),
                content: document,
            }],
            message: PublishMessage {
                action,
                title: &cached.metadata.title,
                path: &draft.path,
                docs_root: &self.settings.docs_root,
                draft_id: &draft.id,
                draft_author: &draft.author,
                published_by: &actor.id,
            }
            .render(),
            author: CommitIdentity::new(actor.id.clone(), actor.commit_email()),
        };

        let revision = self.commit(request).await?;
        log::info!("Published draft {} as {}", draft.id, revision);

        let draft_synced = self.mark_published(&draft, &revision);
        let cache_synced = self.sync_cache(&draft, &cached, &revision);

        let entry = NewAuditEntry::new(
            actor.id.clone(),
            AuditAction::DocumentPublish,
            TargetRef::document(draft.path.clone(), draft.branch.clone()),
            AuditSource::Human,
        )
        .before(json!({
            "revision": head,
            "metadata": previous.filter(|e| e.exists()).map(|e| e.metadata),
        }))
        .after(json!({
            "draftId": draft.id,
            "revision": revision,
            "metadata": cached.metadata,
        }));
        let audited = match self.audit.append(&entry) {
            Ok(_) => true,
            Err(e) => {
                log::error!("Failed to audit publish of draft {}: {}", draft.id, e);
                false
            }
        };

        Ok(PublishOutcome {
            draft_id: draft.id,
            revision,
            cache_synced,
            draft_synced,
            audited,
        })
    }

    fn load_approved(&self, draft_id: &str) -> Result<Draft> {
        let draft = self
            .drafts
            .get(draft_id)?
            .ok_or_else(|| SyncError::NotFound(format!("Draft '{}'", draft_id)))?;
        if draft.status != DraftStatus::Approved {
            return Err(SyncError::InvalidState {
                draft_id: draft.id,
                status: draft.status,
                expected: DraftStatus::Approved,
            });
        }
        Ok(draft)
    }

    /// Commits with a per-attempt deadline.
    ///
    /// Only `Unreachable` (nothing reached the store) is retried. A timed-out
    /// attempt has an unknown outcome, so it is surfaced instead.
    async fn commit(&self, request: CommitRequest) -> Result<Revision> {
        let timeout = self.settings.commit_timeout;
        self.settings
            .retry
            .run(
                "commit",
                |e| matches!(e, GatewayError::Unreachable(_)),
                || {
                    let request = request.clone();
                    async move {
                        tokio::time::timeout(timeout, self.gateway.commit(request))
                            .await
                            .unwrap_or_else(|_| {
                                Err(GatewayError::Timeout(
                                    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                                ))
                            })
                    }
                },
            )
            .await
    }

    fn mark_published(&self, draft: &Draft, revision: &Revision) -> bool {
        let now = Utc::now();
        let mut published = draft.clone();
        published.status = DraftStatus::Published;
        published.published_at = Some(now);
        published.published_revision = Some(revision.id.clone());
        published.updated_at = now;

        match self.drafts.replace(&published, DraftStatus::Approved) {
            Ok(true) => true,
            Ok(false) => {
                log::error!(
                    "Draft {} changed status during publish of {}",
                    draft.id,
                    revision
                );
                false
            }
            Err(e) => {
                log::error!(
                    "Draft {} committed as {} but its status update failed: {}",
                    draft.id,
                    revision,
                    e
                );
                false
            }
        }
    }

    fn sync_cache(&self, draft: &Draft, cached: &CacheDocument, revision: &Revision) -> bool {
        match self
            .cache
            .upsert(&draft.path, &draft.branch, cached, revision)
        {
            Ok(_) => true,
            Err(e) => {
                log::warn!(
                    "Cache update after publishing {} failed, requesting reconciliation: {}",
                    revision,
                    e
                );
                let request = ReconcileRequest::Path {
                    path: draft.path.clone(),
                    branch: draft.branch.clone(),
                };
                if let Err(e) = self.reconcile_tx.send(request) {
                    log::debug!("No reconciliation listeners active: {}", e);
                }
                false
            }
        }
    }
}
