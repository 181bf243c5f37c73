//! Webhook ingestion against the assembled engine.

mod common;

use common::{harness::BRANCH, PushBuilder, TestHarness};
use docsync::gateway::FileChange;
use docsync::{
    AuditAction, AuditSource, CacheDocument, DeliveryStatus, ErrorKind, Pagination, Revision,
};

fn write(path: &str, content: &str) -> FileChange {
    FileChange::Write {
        path: path.to_string(),
        content: content.to_string(),
    }
}

fn delete(path: &str) -> FileChange {
    FileChange::Delete {
        path: path.to_string(),
    }
}

/// Populates the cache from the branch head.
async fn warm(h: &TestHarness) {
    h.engine
        .reconciler()
        .resync_branch(BRANCH)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_removed_document_is_tombstoned_once() {
    let h = TestHarness::new();
    warm(&h).await;
    let r1 = h
        .gateway
        .push_external(BRANCH, vec![delete("guide/old.md")])
        .unwrap();

    let body = PushBuilder::new(BRANCH, &r1)
        .removed("/guide/old.md")
        .build();
    let outcome = h.deliver(&body, "delivery-1").await.unwrap();
    assert_eq!(outcome.status, DeliveryStatus::Processed);
    assert_eq!(outcome.tombstoned, vec!["guide/old.md".to_string()]);

    let entry = h
        .engine
        .cache()
        .get_any("guide/old.md", BRANCH)
        .unwrap()
        .unwrap();
    assert!(entry.tombstoned);
    assert_eq!(entry.marker, r1);
    let err = h.engine.cache().get("/guide/old.md", BRANCH).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let audit = h.delivery_audit("delivery-1");
    assert_eq!(audit.len(), 2);
    assert_eq!(audit[0].action, AuditAction::CacheTombstone);
    assert_eq!(audit[0].source, AuditSource::Webhook);
    assert_eq!(audit[0].actor, "ada");
    assert_eq!(audit[1].action, AuditAction::WebhookDelivery);
    assert_eq!(h.document_audit("guide/old.md").len(), 1);
}

#[tokio::test]
async fn test_external_removal_of_published_document() {
    let h = TestHarness::new();
    let draft = h
        .approved("/guide/intro", "# Intro\n", Some(&h.root))
        .await;
    let r1 = h
        .engine
        .workflow()
        .publish(&draft.id, &TestHarness::reviewer())
        .await
        .unwrap()
        .revision;
    assert_eq!(h.engine.cache().get("guide/intro", BRANCH).unwrap().marker, r1);

    let r2 = h
        .gateway
        .push_external(BRANCH, vec![delete("guide/intro")])
        .unwrap();
    let body = PushBuilder::new(BRANCH, &r2).removed("guide/intro").build();
    let outcome = h.deliver(&body, "delivery-intro").await.unwrap();
    assert_eq!(outcome.tombstoned, vec!["guide/intro".to_string()]);

    let entry = h
        .engine
        .cache()
        .get_any("guide/intro", BRANCH)
        .unwrap()
        .unwrap();
    assert!(entry.tombstoned);
    assert_eq!(entry.marker, r2);
    let err = h.engine.cache().get("/guide/intro", BRANCH).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_replayed_delivery_changes_nothing() {
    let h = TestHarness::new();
    let r1 = h
        .gateway
        .push_external(BRANCH, vec![write("guide/new.md", "# New\n")])
        .unwrap();
    let body = PushBuilder::new(BRANCH, &r1).added("guide/new.md").build();

    let first = h.deliver(&body, "delivery-7").await.unwrap();
    assert_eq!(first.status, DeliveryStatus::Processed);
    let cached = h.engine.cache().get("guide/new.md", BRANCH).unwrap();
    let entries = h.engine.audit().recent(Pagination::default()).unwrap().total;

    let replay = h.deliver(&body, "delivery-7").await.unwrap();
    assert_eq!(replay.status, DeliveryStatus::Duplicate);
    assert!(replay.applied.is_empty());
    assert_eq!(h.engine.cache().get("guide/new.md", BRANCH).unwrap(), cached);
    assert_eq!(
        h.engine.audit().recent(Pagination::default()).unwrap().total,
        entries
    );
}

#[tokio::test]
async fn test_tampered_payload_is_rejected_without_side_effects() {
    let h = TestHarness::new();
    let r1 = h
        .gateway
        .push_external(BRANCH, vec![write("guide/new.md", "# New\n")])
        .unwrap();
    let body = PushBuilder::new(BRANCH, &r1).added("guide/new.md").build();
    let signature = TestHarness::sign(&body);

    let mut tampered = body.clone();
    let last = tampered.len() - 2;
    tampered[last] ^= 0x01;

    let err = h
        .webhook()
        .handle(&tampered, Some(&signature), "delivery-9", Some("push"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidSignature);
    assert_eq!(
        h.engine.audit().recent(Pagination::default()).unwrap().total,
        0
    );
    assert!(h
        .engine
        .cache()
        .get_any("guide/new.md", BRANCH)
        .unwrap()
        .is_none());

    // The id was never claimed, so the genuine delivery still applies.
    let outcome = h.deliver(&body, "delivery-9").await.unwrap();
    assert_eq!(outcome.status, DeliveryStatus::Processed);
}

#[tokio::test]
async fn test_older_push_does_not_regress_cache() {
    let h = TestHarness::new();
    let r1 = h
        .gateway
        .push_external(BRANCH, vec![write("guide/setup.md", "# Setup v2\n")])
        .unwrap();
    let r2 = h
        .gateway
        .push_external(BRANCH, vec![write("guide/setup.md", "# Setup v3\n")])
        .unwrap();

    let newer = PushBuilder::new(BRANCH, &r2)
        .modified("guide/setup.md")
        .build();
    h.deliver(&newer, "delivery-b").await.unwrap();

    let older = PushBuilder::new(BRANCH, &r1)
        .modified("guide/setup.md")
        .build();
    let outcome = h.deliver(&older, "delivery-a").await.unwrap();
    assert_eq!(outcome.status, DeliveryStatus::Processed);
    assert!(outcome.applied.is_empty());

    let entry = h.engine.cache().get("guide/setup.md", BRANCH).unwrap();
    assert_eq!(entry.marker, r2);
    assert_eq!(entry.metadata.title, "Setup v3");
}

#[tokio::test]
async fn test_lower_marker_upsert_is_a_noop() {
    let h = TestHarness::new();
    let cache = h.engine.cache();
    let newer = Revision::new("bbb", 5);
    let older = Revision::new("aaa", 4);

    let current = CacheDocument::from_content("guide/a.md", "# Current\n");
    assert!(cache.upsert("guide/a.md", BRANCH, &current, &newer).unwrap());

    let stale = CacheDocument::from_content("guide/a.md", "# Stale\n");
    assert!(!cache.upsert("guide/a.md", BRANCH, &stale, &older).unwrap());

    let entry = cache.get("guide/a.md", BRANCH).unwrap();
    assert_eq!(entry.metadata.title, "Current");
    assert_eq!(entry.marker, newer);
}

#[tokio::test]
async fn test_push_outside_docs_is_not_cached() {
    let h = TestHarness::new();
    let r1 = h
        .gateway
        .push_external(BRANCH, vec![write("notes.txt", "plain")])
        .unwrap();
    let body = PushBuilder::new(BRANCH, &r1).added("notes.txt").build();

    let outcome = h.deliver(&body, "delivery-txt").await.unwrap();
    assert_eq!(outcome.status, DeliveryStatus::Processed);
    assert!(outcome.applied.is_empty());
    assert!(h.engine.cache().get_any("notes.txt", BRANCH).unwrap().is_none());
}

#[tokio::test]
async fn test_branch_deletion_is_ignored() {
    let h = TestHarness::new();
    warm(&h).await;
    let body = PushBuilder::new(BRANCH, &h.root)
        .removed("guide/setup.md")
        .deleted()
        .build();

    let outcome = h.deliver(&body, "delivery-del").await.unwrap();
    assert_eq!(outcome.status, DeliveryStatus::Ignored);
    assert!(h
        .engine
        .cache()
        .get("guide/setup.md", BRANCH)
        .unwrap()
        .exists());
}
