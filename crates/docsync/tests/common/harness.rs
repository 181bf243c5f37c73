//! Test harness for isolated engine tests.
//!
//! `TestHarness` wires a `DocSync` over an `InMemoryGateway` and an in-memory
//! SQLite database, with a known webhook secret and fast retries.

#![allow(dead_code)]

use std::sync::Arc;

use secrecy::SecretString;

use docsync::webhook::signature;
use docsync::{
    Actor, AuditEntry, Database, DocSync, Draft, InMemoryGateway, NewDraft, Result, Revision,
    ReviewDecision, Role, SyncConfig, TargetRef, WebhookOutcome,
};

pub const SECRET: &str = "integration-secret";
pub const BRANCH: &str = "main";

const CONFIG: &str = r#"
repository:
  path: /unused
  publishBranch: main
publish:
  lockTimeoutMs: 2000
  commitTimeoutMs: 1000
  maxRetries: 2
  retryBaseDelayMs: 1
resync:
  enabled: false
"#;

/// Isolated engine over in-memory storage.
pub struct TestHarness {
    pub gateway: Arc<InMemoryGateway>,
    pub engine: DocSync,
    /// Root revision of the publish branch.
    pub root: Revision,
}

impl TestHarness {
    /// A harness whose publish branch holds a small docs tree.
    pub fn new() -> Self {
        Self::with_files([
            ("guide/old.md", "---\ntitle: Old Guide\n---\n# Old\n"),
            ("guide/setup.md", "# Setup\n\nInstall things.\n"),
            ("README.txt", "not a document"),
        ])
    }

    /// A harness whose publish branch starts with `files`.
    pub fn with_files<'a>(files: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let config: SyncConfig = serde_yaml::from_str(CONFIG).expect("Failed to parse config");
        let gateway = Arc::new(InMemoryGateway::new());
        let root = gateway.create_branch(BRANCH, files);
        let db = Database::open_in_memory().expect("Failed to open database");
        let engine = DocSync::with_gateway(
            &config,
            gateway.clone(),
            db,
            Some(SecretString::from(SECRET)),
        );
        Self {
            gateway,
            engine,
            root,
        }
    }

    pub fn author() -> Actor {
        Actor::new("alice", Role::Editor)
    }

    pub fn reviewer() -> Actor {
        Actor::new("bob", Role::Editor)
    }

    pub fn viewer() -> Actor {
        Actor::new("vera", Role::Viewer)
    }

    /// Creates a draft of `path` against `base` (or the head).
    pub async fn draft(&self, path: &str, content: &str, base: Option<&Revision>) -> Draft {
        self.engine
            .workflow()
            .create(
                NewDraft {
                    path: path.to_string(),
                    branch: BRANCH.to_string(),
                    content: content.to_string(),
                    base_revision: base.map(|r| r.id.clone()),
                    ..Default::default()
                },
                &Self::author(),
            )
            .await
            .expect("Failed to create draft")
    }

    /// Creates, submits and approves a draft.
    pub async fn approved(&self, path: &str, content: &str, base: Option<&Revision>) -> Draft {
        let draft = self.draft(path, content, base).await;
        let workflow = self.engine.workflow();
        workflow
            .submit(&draft.id, &Self::author(), None)
            .expect("Failed to submit draft");
        workflow
            .review(&draft.id, &Self::reviewer(), ReviewDecision::Approve, None)
            .expect("Failed to approve draft")
    }

    pub fn sign(body: &[u8]) -> String {
        signature::sign(&SecretString::from(SECRET), body)
    }

    /// Delivers a correctly signed push.
    pub async fn deliver(&self, body: &[u8], delivery_id: &str) -> Result<WebhookOutcome> {
        self.webhook()
            .handle(body, Some(&Self::sign(body)), delivery_id, Some("push"))
            .await
    }

    pub fn webhook(&self) -> &docsync::WebhookIngester {
        self.engine
            .webhook()
            .expect("Harness always configures a webhook secret")
    }

    /// Audit entries for a document on the publish branch.
    pub fn document_audit(&self, path: &str) -> Vec<AuditEntry> {
        self.engine
            .audit()
            .list_for_target(&TargetRef::document(path, BRANCH))
            .expect("Failed to read audit log")
    }

    pub fn delivery_audit(&self, delivery_id: &str) -> Vec<AuditEntry> {
        self.engine
            .audit()
            .by_delivery(delivery_id)
            .expect("Failed to read audit log")
    }
}
