//! Draft lifecycle operations.
//!
//! [`ReviewWorkflow`] applies the transition table in [`machine`] to stored
//! drafts. Every state change is a compare-and-set on the draft's status,
//! so two racing transitions of one draft cannot both apply. Publishing is
//! delegated to the [`PublishCoordinator`].

pub mod machine;

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::audit::{AuditAction, AuditLog, AuditSource, NewAuditEntry, TargetRef};
use crate::db::{Page, Pagination};
use crate::document::validate::require_non_empty;
use crate::document::{normalize_path, validate_branch, FrontMatter, ValidationError};
use crate::drafts::{Draft, DraftFilter, DraftStatus, DraftStore};
use crate::error::{Result, SyncError};
use crate::gateway::{GatewayError, RepositoryGateway};
use crate::publish::{PublishCoordinator, PublishOutcome, RetryPolicy};

pub use machine::{Actor, Role, WorkflowEvent};

/// Input for [`ReviewWorkflow::create`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDraft {
    pub path: String,
    pub branch: String,
    pub content: String,
    #[serde(default)]
    pub metadata: FrontMatter,
    /// Defaults to the branch head.
    #[serde(default)]
    pub base_revision: Option<String>,
}

/// Fields changed by an edit. `None` leaves the field as is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftPatch {
    pub content: Option<String>,
    pub metadata: Option<FrontMatter>,
}

/// Refreshed state carried by a resubmission of a rejected draft.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftRefresh {
    pub content: Option<String>,
    pub metadata: Option<FrontMatter>,
    pub base_revision: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewDecision {
    Approve,
    Reject,
}

/// State recorded in audit entries; the body itself is left out.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DraftSnapshot<'a> {
    status: DraftStatus,
    version: u32,
    path: &'a str,
    branch: &'a str,
    base_revision: &'a str,
    metadata: &'a FrontMatter,
    content_length: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    reviewer: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    review_comment: Option<&'a str>,
}

impl<'a> From<&'a Draft> for DraftSnapshot<'a> {
    fn from(draft: &'a Draft) -> Self {
        Self {
            status: draft.status,
            version: draft.version,
            path: &draft.path,
            branch: &draft.branch,
            base_revision: &draft.base_revision,
            metadata: &draft.metadata,
            content_length: draft.content.len(),
            reviewer: draft.reviewer.as_deref(),
            review_comment: draft.review_comment.as_deref(),
        }
    }
}

pub struct ReviewWorkflow {
    gateway: Arc<dyn RepositoryGateway>,
    drafts: DraftStore,
    audit: AuditLog,
    publisher: Arc<PublishCoordinator>,
    retry: RetryPolicy,
}

impl ReviewWorkflow {
    pub fn new(
        gateway: Arc<dyn RepositoryGateway>,
        drafts: DraftStore,
        audit: AuditLog,
        publisher: Arc<PublishCoordinator>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            gateway,
            drafts,
            audit,
            publisher,
            retry,
        }
    }

    /// Creates a draft of `input.path` on `input.branch`, authored by `actor`.
    pub async fn create(&self, input: NewDraft, actor: &Actor) -> Result<Draft> {
        if !actor.role.is_elevated() {
            return Err(SyncError::PermissionDenied(
                "creating drafts requires an editor or admin role".to_string(),
            ));
        }
        let path = normalize_path(&input.path)?;
        validate_branch(&input.branch)?;

        let base_revision = match input.base_revision {
            Some(base) => {
                require_non_empty("baseRevision", &base)?;
                base
            }
            None => {
                let branch = input.branch.as_str();
                self.retry
                    .run("head_revision", GatewayError::is_retryable, || {
                        self.gateway.head_revision(branch)
                    })
                    .await?
                    .id
            }
        };

        let now = Utc::now();
        let draft = Draft {
            id: uuid::Uuid::new_v4().to_string(),
            path,
            branch: input.branch,
            content: input.content,
            metadata: input.metadata,
            status: DraftStatus::Draft,
            author: actor.id.clone(),
            reviewer: None,
            review_comment: None,
            base_revision,
            version: 1,
            created_at: now,
            updated_at: now,
            submitted_at: None,
            reviewed_at: None,
            published_at: None,
            published_revision: None,
        };
        self.drafts.insert(&draft)?;
        log::info!(
            "Draft {} created for {} on {} by {}",
            draft.id,
            draft.path,
            draft.branch,
            actor.id
        );

        self.record(
            NewAuditEntry::new(
                actor.id.clone(),
                AuditAction::DraftCreate,
                TargetRef::draft(draft.id.clone()),
                AuditSource::Human,
            )
            .after(DraftSnapshot::from(&draft)),
        );
        Ok(draft)
    }

    pub fn get(&self, id: &str) -> Result<Draft> {
        self.drafts
            .get(id)?
            .ok_or_else(|| SyncError::NotFound(format!("Draft '{}'", id)))
    }

    pub fn list(&self, filter: &DraftFilter, pagination: Pagination) -> Result<Page<Draft>> {
        Ok(self.drafts.list(filter, pagination)?)
    }

    /// Edits content and metadata in place. Only allowed in `Draft` or
    /// `Rejected`; the draft returns to `Draft`.
    pub fn update(&self, id: &str, patch: DraftPatch, actor: &Actor) -> Result<Draft> {
        let (before, next) = self.begin(id, WorkflowEvent::Edit, actor)?;
        if patch.content.is_none() && patch.metadata.is_none() {
            return Err(ValidationError::Field {
                field: "patch",
                reason: "must change content or metadata",
            }
            .into());
        }

        let mut after = before.clone();
        if let Some(content) = patch.content {
            after.content = content;
        }
        if let Some(metadata) = patch.metadata {
            after.metadata = metadata;
        }
        after.status = next;
        after.version += 1;
        after.updated_at = Utc::now();

        self.apply(&before, &after, actor, AuditAction::DraftUpdate)?;
        Ok(after)
    }

    /// Deletes a draft. Only its author or an admin may, and never once it
    /// is under review, approved or published.
    pub fn delete(&self, id: &str, actor: &Actor) -> Result<()> {
        let draft = self.get(id)?;
        if !machine::deletable(draft.status) {
            return Err(SyncError::Conflict(format!(
                "draft '{}' is {} and cannot be deleted",
                draft.id, draft.status
            )));
        }
        if !machine::may_delete(actor, &draft.author) {
            return Err(SyncError::PermissionDenied(
                "only the author or an admin can delete this draft".to_string(),
            ));
        }
        if !self.drafts.delete(&draft.id, draft.status)? {
            return Err(SyncError::Conflict(format!(
                "draft '{}' changed while being deleted",
                draft.id
            )));
        }
        log::info!("Draft {} deleted by {}", draft.id, actor.id);

        self.record(
            NewAuditEntry::new(
                actor.id.clone(),
                AuditAction::DraftDelete,
                TargetRef::draft(draft.id.clone()),
                AuditSource::Human,
            )
            .before(DraftSnapshot::from(&draft)),
        );
        Ok(())
    }

    /// Sends a draft to review. A rejected draft may be refreshed on the way.
    pub fn submit(&self, id: &str, actor: &Actor, refresh: Option<DraftRefresh>) -> Result<Draft> {
        let (before, next) = self.begin(id, WorkflowEvent::Submit, actor)?;

        let mut after = before.clone();
        if let Some(refresh) = refresh {
            if before.status != DraftStatus::Rejected {
                return Err(ValidationError::Field {
                    field: "refresh",
                    reason: "is only accepted when resubmitting a rejected draft",
                }
                .into());
            }
            let edited = refresh.content.is_some() || refresh.metadata.is_some();
            if let Some(content) = refresh.content {
                after.content = content;
            }
            if let Some(metadata) = refresh.metadata {
                after.metadata = metadata;
            }
            if let Some(base) = refresh.base_revision {
                require_non_empty("baseRevision", &base)?;
                after.base_revision = base;
            }
            if edited {
                after.version += 1;
            }
        }

        let now = Utc::now();
        after.status = next;
        after.submitted_at = Some(now);
        after.updated_at = now;

        self.apply(&before, &after, actor, AuditAction::DraftSubmit)?;
        Ok(after)
    }

    /// Approves or rejects a draft under review. Rejection needs a comment.
    pub fn review(
        &self,
        id: &str,
        actor: &Actor,
        decision: ReviewDecision,
        comment: Option<String>,
    ) -> Result<Draft> {
        let (event, action) = match decision {
            ReviewDecision::Approve => (WorkflowEvent::Approve, AuditAction::DraftApprove),
            ReviewDecision::Reject => (WorkflowEvent::Reject, AuditAction::DraftReject),
        };
        let (before, next) = self.begin(id, event, actor)?;

        let comment = comment
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        if decision == ReviewDecision::Reject && comment.is_none() {
            return Err(ValidationError::Field {
                field: "comment",
                reason: "is required when rejecting",
            }
            .into());
        }

        let now = Utc::now();
        let mut after = before.clone();
        after.status = next;
        after.reviewer = Some(actor.id.clone());
        after.review_comment = comment;
        after.reviewed_at = Some(now);
        after.updated_at = now;

        self.apply(&before, &after, actor, action)?;
        Ok(after)
    }

    pub async fn publish(&self, id: &str, actor: &Actor) -> Result<PublishOutcome> {
        self.publisher.publish(id, actor).await
    }

    /// Loads a draft and checks `event` against the table, then the guard.
    fn begin(&self, id: &str, event: WorkflowEvent, actor: &Actor) -> Result<(Draft, DraftStatus)> {
        let draft = self.get(id)?;
        let next = machine::next_status(draft.status, event).ok_or(
            SyncError::InvalidTransition {
                status: draft.status,
                event,
            },
        )?;
        machine::check_guard(event, actor, &draft.author).map_err(SyncError::PermissionDenied)?;
        Ok((draft, next))
    }

    fn apply(&self, before: &Draft, after: &Draft, actor: &Actor, action: AuditAction) -> Result<()> {
        if !self.drafts.replace(after, before.status)? {
            return Err(SyncError::Conflict(format!(
                "draft '{}' changed concurrently; reload and retry",
                before.id
            )));
        }
        log::info!(
            "Draft {} {} -> {} ({} by {})",
            before.id,
            before.status,
            after.status,
            action,
            actor.id
        );

        self.record(
            NewAuditEntry::new(
                actor.id.clone(),
                action,
                TargetRef::draft(before.id.clone()),
                AuditSource::Human,
            )
            .before(DraftSnapshot::from(before))
            .after(DraftSnapshot::from(after)),
        );
        Ok(())
    }

    fn record(&self, entry: NewAuditEntry) {
        if let Err(e) = self.audit.append(&entry) {
            log::error!(
                "Failed to record {} for {:?}: {}",
                entry.action,
                entry.target,
                e
            );
        }
    }
}
