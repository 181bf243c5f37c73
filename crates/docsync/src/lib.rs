pub mod audit;
pub mod cache;
pub mod config;
pub mod db;
pub mod document;
pub mod drafts;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod publish;
pub mod reconcile;
pub mod secrets;
pub mod webhook;
pub mod workflow;

pub use audit::{AuditAction, AuditEntry, AuditLog, AuditSource, TargetRef};
pub use cache::{CacheDocument, CacheEntry, CacheQuery, CacheStats, MetadataCache};
pub use config::{load_config, SyncConfig};
pub use db::{Database, Page, Pagination};
pub use document::{DocumentMetadata, DocumentScope, FrontMatter, MetaValue};
pub use drafts::{Draft, DraftFilter, DraftStatus, DraftStore};
pub use engine::DocSync;
pub use error::{ConfigError, ErrorKind, Result, SyncError};
pub use gateway::{
    GatewayError, GitGateway, GitSettings, InMemoryGateway, RepositoryGateway, Revision,
};
pub use publish::{PublishCoordinator, PublishOutcome, PublishSettings, RetryPolicy};
pub use reconcile::{CacheReconciler, ReconcileRequest, ResyncReport, ResyncScheduler};
pub use secrets::{resolve_secret, SecretError};
pub use webhook::{DeliveryStatus, WebhookIngester, WebhookOutcome};
pub use workflow::{
    Actor, DraftPatch, DraftRefresh, NewDraft, ReviewDecision, ReviewWorkflow, Role,
    WorkflowEvent,
};
