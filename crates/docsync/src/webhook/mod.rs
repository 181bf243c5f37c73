//! Applies repository host notifications to the metadata cache.
//!
//! Flow for one delivery: verify the signature over the raw body, claim the
//! delivery id, decode, then for a push to the publish branch re-read every
//! touched document at the pushed revision and upsert or tombstone it. The
//! revision's generation is the consistency marker, so replays and
//! out-of-order deliveries are absorbed by the cache itself.
//!
//! Each path's cache write and its audit entry commit together. A closing
//! `webhook.delivery` entry marks the delivery done; only that entry makes
//! a later redelivery a duplicate.

pub mod dedup;
pub mod payload;
pub mod signature;

use std::sync::Arc;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::broadcast;
use tracing::Instrument;

use crate::audit::{AuditAction, AuditLog, AuditSource, NewAuditEntry, TargetRef};
use crate::cache::{CacheDocument, MetadataCache};
use crate::db::DatabaseError;
use crate::document::validate::require_non_empty;
use crate::document::DocumentScope;
use crate::error::{Result, SyncError};
use crate::gateway::{GatewayError, RepositoryGateway, Revision};
use crate::publish::RetryPolicy;
use crate::reconcile::ReconcileRequest;

pub use dedup::{DeliveryClaim, DeliveryWindow};
pub use payload::{ChangeKind, PathChange, PushEvent, WebhookEvent};

/// How a delivery was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Ping acknowledged.
    Received,
    /// Push applied to the cache.
    Processed,
    /// Delivery id seen before; nothing reapplied.
    Duplicate,
    /// Acknowledged without effect (other branch, other event kind).
    Ignored,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookOutcome {
    pub status: DeliveryStatus,
    pub message: String,
    /// Paths whose cache entry was updated.
    pub applied: Vec<String>,
    /// Paths tombstoned.
    pub tombstoned: Vec<String>,
    /// Paths handed to reconciliation after a failure.
    pub deferred: Vec<String>,
}

impl WebhookOutcome {
    fn new(status: DeliveryStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            applied: Vec::new(),
            tombstoned: Vec::new(),
            deferred: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebhookSettings {
    /// The only branch whose pushes mutate the cache.
    pub publish_branch: String,
    pub scope: DocumentScope,
    pub retry: RetryPolicy,
}

pub struct WebhookIngester {
    secret: SecretString,
    gateway: Arc<dyn RepositoryGateway>,
    cache: MetadataCache,
    audit: AuditLog,
    window: DeliveryWindow,
    settings: WebhookSettings,
    reconcile_tx: broadcast::Sender<ReconcileRequest>,
}

impl WebhookIngester {
    pub fn new(
        secret: SecretString,
        gateway: Arc<dyn RepositoryGateway>,
        cache: MetadataCache,
        audit: AuditLog,
        window: DeliveryWindow,
        settings: WebhookSettings,
        reconcile_tx: broadcast::Sender<ReconcileRequest>,
    ) -> Self {
        Self {
            secret,
            gateway,
            cache,
            audit,
            window,
            settings,
            reconcile_tx,
        }
    }

    /// Handles one delivery.
    ///
    /// `signature` is the `X-Hub-Signature-256` header and `event_header`
    /// the `X-GitHub-Event` header, when present. Nothing in `raw` is looked
    /// at before the signature verifies.
    pub async fn handle(
        &self,
        raw: &[u8],
        signature: Option<&str>,
        delivery_id: &str,
        event_header: Option<&str>,
    ) -> Result<WebhookOutcome> {
        let span = tracing::info_span!("webhook.handle", delivery_id = %delivery_id);
        async {
            if let Err(e) = signature::verify(&self.secret, raw, signature) {
                log::warn!("Rejected webhook delivery {}: {}", delivery_id, e);
                return Err(e);
            }
            require_non_empty("deliveryId", delivery_id)?;

            match self.window.claim(delivery_id) {
                DeliveryClaim::Acquired => {}
                DeliveryClaim::Completed => return Ok(duplicate(delivery_id)),
                DeliveryClaim::InFlight => {
                    log::info!("Webhook delivery {} is already in flight", delivery_id);
                    return Err(SyncError::DeliveryInFlight(delivery_id.to_string()));
                }
            }

            let result = self.process(raw, event_header, delivery_id).await;
            match &result {
                Ok(_) => self.window.complete(delivery_id),
                Err(e) => {
                    log::warn!("Webhook delivery {} failed: {}", delivery_id, e);
                    self.window.release(delivery_id);
                }
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn process(
        &self,
        raw: &[u8],
        event_header: Option<&str>,
        delivery_id: &str,
    ) -> Result<WebhookOutcome> {
        // The window is in memory; the audit log remembers across restarts.
        if self.audit.has_delivery(delivery_id)? {
            return Ok(duplicate(delivery_id));
        }
        match payload::parse(raw, event_header)? {
            WebhookEvent::Ping(ping) => {
                self.audit.append(
                    &NewAuditEntry::new(
                        "webhook",
                        AuditAction::WebhookPing,
                        TargetRef::Delivery {
                            id: delivery_id.to_string(),
                        },
                        AuditSource::Webhook,
                    )
                    .after(json!({ "zen": ping.zen, "hookId": ping.hook_id }))
                    .delivery(delivery_id),
                )?;
                log::info!("Webhook ping received: {}", ping.zen);
                Ok(WebhookOutcome::new(DeliveryStatus::Received, "pong"))
            }
            WebhookEvent::Push(push) => self.apply_push(&push, delivery_id).await,
            WebhookEvent::Other(kind) => Ok(WebhookOutcome::new(
                DeliveryStatus::Ignored,
                format!("event '{}' is not handled", kind),
            )),
        }
    }

    async fn apply_push(&self, push: &PushEvent, delivery_id: &str) -> Result<WebhookOutcome> {
        let branch = match push.branch() {
            Some(branch) if branch == self.settings.publish_branch => branch,
            _ => {
                return Ok(WebhookOutcome::new(
                    DeliveryStatus::Ignored,
                    format!("push to '{}' is not tracked", push.git_ref),
                ))
            }
        };
        if push.deleted {
            log::warn!("Publish branch '{}' deleted upstream", branch);
            return Ok(WebhookOutcome::new(
                DeliveryStatus::Ignored,
                "branch deletion acknowledged",
            ));
        }

        let marker = self
            .settings
            .retry
            .run("resolve", GatewayError::is_retryable, || {
                self.gateway.resolve(&push.after)
            })
            .await?;

        let mut changes = Vec::new();
        for change in push.changes() {
            if self.is_tracked(&change.path, branch)? {
                changes.push(change);
            }
        }

        let origin = Origin {
            actor: push.pusher_name(),
            delivery_id,
        };
        let mut outcome = WebhookOutcome::new(DeliveryStatus::Processed, "");
        for change in &changes {
            let applied = match change.kind {
                ChangeKind::Upsert => {
                    self.upsert_path(&change.path, branch, &marker, &origin)
                        .await
                }
                ChangeKind::Remove => self.remove_path(&change.path, branch, &marker, &origin),
            };
            match applied {
                Ok((AuditAction::CacheTombstone, true)) => {
                    outcome.tombstoned.push(change.path.clone())
                }
                Ok((_, true)) => outcome.applied.push(change.path.clone()),
                Ok((_, false)) => {}
                Err(e) => {
                    log::warn!(
                        "Deferring {} from push {} to reconciliation: {}",
                        change.path,
                        marker,
                        e
                    );
                    outcome.deferred.push(change.path.clone());
                    let request = ReconcileRequest::Path {
                        path: change.path.clone(),
                        branch: branch.to_string(),
                    };
                    if self.reconcile_tx.send(request).is_err() {
                        log::debug!("No reconciliation listeners active");
                    }
                }
            }
        }

        outcome.message = format!(
            "{} applied, {} tombstoned, {} deferred at {}",
            outcome.applied.len(),
            outcome.tombstoned.len(),
            outcome.deferred.len(),
            marker
        );
        self.audit.append(
            &NewAuditEntry::new(
                origin.actor,
                AuditAction::WebhookDelivery,
                TargetRef::Delivery {
                    id: delivery_id.to_string(),
                },
                AuditSource::Webhook,
            )
            .after(json!({
                "revision": marker,
                "applied": outcome.applied,
                "tombstoned": outcome.tombstoned,
                "deferred": outcome.deferred,
            }))
            .delivery(delivery_id),
        )?;
        log::info!("Webhook delivery {}: {}", delivery_id, outcome.message);
        Ok(outcome)
    }

    /// A path counts if it is in scope or was cached before, e.g. by a
    /// publish of a document outside the docs root.
    fn is_tracked(&self, path: &str, branch: &str) -> Result<bool> {
        Ok(self.settings.scope.contains(path) || self.cache.has_entry(path, branch)?)
    }

    /// Re-reads `path` at the pushed revision and upserts it.
    async fn upsert_path(
        &self,
        path: &str,
        branch: &str,
        marker: &Revision,
        origin: &Origin<'_>,
    ) -> Result<(AuditAction, bool)> {
        let read = self
            .settings
            .retry
            .run("read_at", GatewayError::is_retryable, || {
                self.gateway.read_at(path, &marker.id)
            })
            .await;
        let file = match read {
            Ok(file) => file,
            // Gone at that revision despite the payload: treat as removed.
            Err(SyncError::Gateway(GatewayError::NotFound { .. })) => {
                return self.remove_path(path, branch, marker, origin)
            }
            Err(e) => return Err(e),
        };

        let document = CacheDocument::from_content(path, &file.content);
        let changed = self
            .cache
            .upsert_with(path, branch, &document, marker, |conn, changed| {
                let state = json!({
                    "revision": marker,
                    "applied": changed,
                    "metadata": document.metadata,
                });
                origin.record(conn, AuditAction::CacheSync, path, branch, state)
            })?;
        Ok((AuditAction::CacheSync, changed))
    }

    fn remove_path(
        &self,
        path: &str,
        branch: &str,
        marker: &Revision,
        origin: &Origin<'_>,
    ) -> Result<(AuditAction, bool)> {
        let changed = self
            .cache
            .invalidate_with(path, branch, marker, |conn, changed| {
                let state = json!({
                    "revision": marker,
                    "applied": changed,
                    "tombstoned": true,
                });
                origin.record(conn, AuditAction::CacheTombstone, path, branch, state)
            })?;
        Ok((AuditAction::CacheTombstone, changed))
    }
}

/// Who a push's cache changes are attributed to.
struct Origin<'a> {
    actor: &'a str,
    delivery_id: &'a str,
}

impl Origin<'_> {
    fn record(
        &self,
        conn: &rusqlite::Connection,
        action: AuditAction,
        path: &str,
        branch: &str,
        state: serde_json::Value,
    ) -> std::result::Result<(), DatabaseError> {
        let entry = NewAuditEntry::new(
            self.actor,
            action,
            TargetRef::document(path, branch),
            AuditSource::Webhook,
        )
        .after(state)
        .delivery(self.delivery_id);
        AuditLog::append_with(conn, &entry)?;
        Ok(())
    }
}

fn duplicate(delivery_id: &str) -> WebhookOutcome {
    log::info!("Duplicate webhook delivery {} ignored", delivery_id);
    WebhookOutcome::new(DeliveryStatus::Duplicate, "delivery already processed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, Pagination};
    use crate::error::ErrorKind;
    use crate::gateway::{FileChange, InMemoryGateway};

    const SECRET: &str = "hook-secret";

    struct Fixture {
        gateway: Arc<InMemoryGateway>,
        db: Database,
        window: DeliveryWindow,
        cache: MetadataCache,
        audit: AuditLog,
        ingester: WebhookIngester,
        reconcile_rx: broadcast::Receiver<ReconcileRequest>,
    }

    fn fixture() -> Fixture {
        let gateway = Arc::new(InMemoryGateway::new());
        gateway.create_branch(
            "main",
            [
                ("docs/intro.md", "# Intro\n\nWelcome.\n"),
                ("docs/old.md", "# Old\n"),
            ],
        );
        gateway.create_branch("feature", [("docs/intro.md", "# Feature\n")]);
        let db = Database::open_in_memory().unwrap();
        let cache = MetadataCache::new(db.clone());
        let audit = AuditLog::new(db.clone());
        let window = DeliveryWindow::default();
        let (tx, reconcile_rx) = broadcast::channel(16);
        let ingester = WebhookIngester::new(
            SecretString::from(SECRET),
            gateway.clone(),
            cache.clone(),
            audit.clone(),
            window.clone(),
            WebhookSettings {
                publish_branch: "main".to_string(),
                scope: DocumentScope::new("docs", vec!["md".to_string()]),
                retry: RetryPolicy::none(),
            },
            tx,
        );
        Fixture {
            gateway,
            db,
            window,
            cache,
            audit,
            ingester,
            reconcile_rx,
        }
    }

    fn push_body(branch: &str, after: &Revision, added: &[&str], removed: &[&str]) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "ref": format!("refs/heads/{}", branch),
            "before": "",
            "after": after.id,
            "commits": [{ "id": after.id, "added": added, "modified": [], "removed": removed }],
            "pusher": { "name": "ada" }
        }))
        .unwrap()
    }

    fn signed(body: &[u8]) -> String {
        signature::sign(&SecretString::from(SECRET), body)
    }

    fn write(path: &str, content: &str) -> FileChange {
        FileChange::Write {
            path: path.to_string(),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_push_upserts_and_tombstones() {
        let f = fixture();
        let r = f
            .gateway
            .push_external(
                "main",
                vec![
                    write("docs/new.md", "# New page\n"),
                    FileChange::Delete {
                        path: "docs/old.md".to_string(),
                    },
                ],
            )
            .unwrap();
        let body = push_body("main", &r, &["docs/new.md", "assets/logo.png"], &["docs/old.md"]);

        let outcome = f
            .ingester
            .handle(&body, Some(&signed(&body)), "d-1", Some("push"))
            .await
            .unwrap();
        assert_eq!(outcome.status, DeliveryStatus::Processed);
        assert_eq!(outcome.applied, vec!["docs/new.md"]);
        assert_eq!(outcome.tombstoned, vec!["docs/old.md"]);
        assert!(outcome.deferred.is_empty());

        let entry = f.cache.get("docs/new.md", "main").unwrap();
        assert_eq!(entry.metadata.title, "New page");
        assert_eq!(entry.marker, r);
        assert_eq!(
            f.cache.get("docs/old.md", "main").unwrap_err().kind(),
            ErrorKind::NotFound
        );
        let entries = f.audit.by_delivery("d-1").unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[2].action, AuditAction::WebhookDelivery);
    }

    #[tokio::test]
    async fn test_replay_is_duplicate() {
        let f = fixture();
        let r = f
            .gateway
            .push_external("main", vec![write("docs/new.md", "# New\n")])
            .unwrap();
        let body = push_body("main", &r, &["docs/new.md"], &[]);
        let sig = signed(&body);

        f.ingester
            .handle(&body, Some(&sig), "d-1", Some("push"))
            .await
            .unwrap();
        let before = f.cache.get("docs/new.md", "main").unwrap();

        let outcome = f
            .ingester
            .handle(&body, Some(&sig), "d-1", Some("push"))
            .await
            .unwrap();
        assert_eq!(outcome.status, DeliveryStatus::Duplicate);
        assert_eq!(f.audit.recent(Pagination::default()).unwrap().total, 2);
        assert_eq!(f.cache.get("docs/new.md", "main").unwrap(), before);
    }

    #[tokio::test]
    async fn test_tampered_body_is_rejected() {
        let f = fixture();
        let r = f
            .gateway
            .push_external("main", vec![write("docs/new.md", "# New\n")])
            .unwrap();
        let body = push_body("main", &r, &["docs/new.md"], &[]);
        let sig = signed(&body);
        let mut tampered = body.clone();
        let last = tampered.len() - 2;
        tampered[last] ^= 0x20;

        let err = f
            .ingester
            .handle(&tampered, Some(&sig), "d-1", Some("push"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidSignature);
        assert_eq!(f.audit.recent(Pagination::default()).unwrap().total, 0);
        assert!(f.cache.get_any("docs/new.md", "main").unwrap().is_none());

        // The rejected attempt does not consume the delivery id.
        let outcome = f
            .ingester
            .handle(&body, Some(&sig), "d-1", Some("push"))
            .await
            .unwrap();
        assert_eq!(outcome.status, DeliveryStatus::Processed);
    }

    #[tokio::test]
    async fn test_other_branch_is_ignored() {
        let f = fixture();
        let r = f
            .gateway
            .push_external("feature", vec![write("docs/intro.md", "# Changed\n")])
            .unwrap();
        let body = push_body("feature", &r, &["docs/intro.md"], &[]);

        let outcome = f
            .ingester
            .handle(&body, Some(&signed(&body)), "d-1", Some("push"))
            .await
            .unwrap();
        assert_eq!(outcome.status, DeliveryStatus::Ignored);
        assert!(f.cache.get_any("docs/intro.md", "feature").unwrap().is_none());
        assert_eq!(f.audit.recent(Pagination::default()).unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_ping_is_received() {
        let f = fixture();
        let body = br#"{"zen":"Half measures are as bad as nothing at all.","hook_id":7}"#;

        let outcome = f
            .ingester
            .handle(body, Some(&signed(body)), "p-1", None)
            .await
            .unwrap();
        assert_eq!(outcome.status, DeliveryStatus::Received);
        let entries = f.audit.by_delivery("p-1").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::WebhookPing);
        assert_eq!(f.cache.stats("main").unwrap().live, 0);
    }

    #[tokio::test]
    async fn test_out_of_order_delivery_keeps_newer_marker() {
        let f = fixture();
        let r1 = f
            .gateway
            .push_external("main", vec![write("docs/intro.md", "# Intro v1\n")])
            .unwrap();
        let r2 = f
            .gateway
            .push_external("main", vec![write("docs/intro.md", "# Intro v2\n")])
            .unwrap();

        let newer = push_body("main", &r2, &["docs/intro.md"], &[]);
        let older = push_body("main", &r1, &["docs/intro.md"], &[]);
        f.ingester
            .handle(&newer, Some(&signed(&newer)), "d-2", Some("push"))
            .await
            .unwrap();
        let outcome = f
            .ingester
            .handle(&older, Some(&signed(&older)), "d-1", Some("push"))
            .await
            .unwrap();
        assert!(outcome.applied.is_empty());

        let entry = f.cache.get("docs/intro.md", "main").unwrap();
        assert_eq!(entry.metadata.title, "Intro v2");
        assert_eq!(entry.marker, r2);
    }

    #[tokio::test]
    async fn test_unreachable_repository_releases_claim() {
        let mut f = fixture();
        let r = f
            .gateway
            .push_external("main", vec![write("docs/new.md", "# New\n")])
            .unwrap();
        let body = push_body("main", &r, &["docs/new.md"], &[]);
        let sig = signed(&body);

        f.gateway.set_offline(true);
        let err = f
            .ingester
            .handle(&body, Some(&sig), "d-1", Some("push"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unreachable);
        assert!(f.reconcile_rx.try_recv().is_err());

        f.gateway.set_offline(false);
        let outcome = f
            .ingester
            .handle(&body, Some(&sig), "d-1", Some("push"))
            .await
            .unwrap();
        assert_eq!(outcome.applied, vec!["docs/new.md"]);
    }

    fn block_audit(f: &Fixture, condition: &str) {
        let sql = format!(
            "CREATE TRIGGER block_audit BEFORE INSERT ON audit_log WHEN {} \
             BEGIN SELECT RAISE(ABORT, 'disk full'); END",
            condition
        );
        f.db.with_conn(|conn| Ok(conn.execute_batch(&sql)?)).unwrap();
    }

    fn unblock_audit(f: &Fixture) {
        f.db
            .with_conn(|conn| Ok(conn.execute_batch("DROP TRIGGER block_audit")?))
            .unwrap();
    }

    #[tokio::test]
    async fn test_failed_audit_defers_only_that_path() {
        let mut f = fixture();
        let r = f
            .gateway
            .push_external(
                "main",
                vec![
                    write("docs/a.md", "# A\n"),
                    write("docs/b.md", "# B\n"),
                    write("docs/c.md", "# C\n"),
                ],
            )
            .unwrap();
        let body = push_body("main", &r, &["docs/a.md", "docs/b.md", "docs/c.md"], &[]);
        block_audit(&f, "NEW.target_id = 'docs/b.md'");

        let outcome = f
            .ingester
            .handle(&body, Some(&signed(&body)), "d-1", Some("push"))
            .await
            .unwrap();
        assert_eq!(outcome.applied, vec!["docs/a.md", "docs/c.md"]);
        assert_eq!(outcome.deferred, vec!["docs/b.md"]);

        // The cache write for b rolled back with its audit entry.
        assert!(f.cache.get_any("docs/b.md", "main").unwrap().is_none());
        assert!(f.cache.get("docs/c.md", "main").unwrap().exists());
        assert_eq!(
            f.reconcile_rx.try_recv().unwrap(),
            ReconcileRequest::Path {
                path: "docs/b.md".to_string(),
                branch: "main".to_string(),
            }
        );
        unblock_audit(&f);
    }

    #[tokio::test]
    async fn test_unfinished_delivery_is_not_a_duplicate() {
        let f = fixture();
        let r = f
            .gateway
            .push_external(
                "main",
                vec![write("docs/a.md", "# A\n"), write("docs/b.md", "# B\n")],
            )
            .unwrap();
        let body = push_body("main", &r, &["docs/a.md", "docs/b.md"], &[]);
        let sig = signed(&body);
        block_audit(&f, "NEW.action = 'webhook.delivery'");

        let err = f
            .ingester
            .handle(&body, Some(&sig), "d-1", Some("push"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(!f.audit.has_delivery("d-1").unwrap());
        assert!(!f.window.contains("d-1"));

        unblock_audit(&f);
        let outcome = f
            .ingester
            .handle(&body, Some(&sig), "d-1", Some("push"))
            .await
            .unwrap();
        assert_eq!(outcome.status, DeliveryStatus::Processed);
        assert!(f.audit.has_delivery("d-1").unwrap());
        assert!(f.cache.get("docs/b.md", "main").unwrap().exists());
        for path in ["docs/a.md", "docs/b.md"] {
            let entries = f
                .audit
                .list_for_target(&TargetRef::document(path, "main"))
                .unwrap();
            assert!(!entries.is_empty());
        }
    }

    #[tokio::test]
    async fn test_in_flight_delivery_asks_for_retry() {
        let f = fixture();
        let r = f
            .gateway
            .push_external("main", vec![write("docs/new.md", "# New\n")])
            .unwrap();
        let body = push_body("main", &r, &["docs/new.md"], &[]);
        let sig = signed(&body);
        assert_eq!(f.window.claim("d-1"), DeliveryClaim::Acquired);

        let err = f
            .ingester
            .handle(&body, Some(&sig), "d-1", Some("push"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::DeliveryInFlight(_)));
        assert!(err.is_retryable());
        assert!(f.cache.get_any("docs/new.md", "main").unwrap().is_none());

        // The first attempt gave up; the retry goes through.
        f.window.release("d-1");
        let outcome = f
            .ingester
            .handle(&body, Some(&sig), "d-1", Some("push"))
            .await
            .unwrap();
        assert_eq!(outcome.applied, vec!["docs/new.md"]);
        assert_eq!(f.window.claim("d-1"), DeliveryClaim::Completed);
    }

    #[tokio::test]
    async fn test_cached_path_outside_scope_follows_pushes() {
        let f = fixture();
        let head = f.gateway.head_revision("main").await.unwrap();
        let published = CacheDocument::from_content("notes/intro", "# Intro\n");
        f.cache
            .upsert("notes/intro", "main", &published, &head)
            .unwrap();
        let r = f
            .gateway
            .push_external(
                "main",
                vec![
                    FileChange::Delete {
                        path: "notes/intro".to_string(),
                    },
                    write("notes/other", "# Other\n"),
                ],
            )
            .unwrap();
        let body = push_body("main", &r, &["notes/other"], &["notes/intro"]);

        let outcome = f
            .ingester
            .handle(&body, Some(&signed(&body)), "d-1", Some("push"))
            .await
            .unwrap();
        assert_eq!(outcome.tombstoned, vec!["notes/intro"]);
        assert!(outcome.applied.is_empty());
        assert_eq!(
            f.cache.get("notes/intro", "main").unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert!(f.cache.get_any("notes/other", "main").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_delivery_id_is_invalid() {
        let f = fixture();
        let body = br#"{"zen":"x"}"#;
        let err = f
            .ingester
            .handle(body, Some(&signed(body)), " ", None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }
}
