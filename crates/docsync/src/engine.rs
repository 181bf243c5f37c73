//! Wires the components together from a [`SyncConfig`].

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use secrecy::SecretString;
use tokio::sync::broadcast;

use crate::audit::AuditLog;
use crate::cache::MetadataCache;
use crate::config::SyncConfig;
use crate::db::{default_database_path, Database};
use crate::document::DocumentScope;
use crate::drafts::DraftStore;
use crate::error::{ConfigError, Result};
use crate::gateway::{GitGateway, GitSettings, RepositoryGateway};
use crate::publish::{PublishCoordinator, PublishSettings, RetryPolicy};
use crate::reconcile::{CacheReconciler, ReconcileRequest, ResyncScheduler};
use crate::secrets::{expand_home, SecretSource};
use crate::webhook::{DeliveryWindow, WebhookIngester, WebhookSettings};
use crate::workflow::ReviewWorkflow;

/// Capacity of the reconcile request channel.
const RECONCILE_CHANNEL_CAPACITY: usize = 256;

/// The assembled engine.
pub struct DocSync {
    gateway: Arc<dyn RepositoryGateway>,
    db: Database,
    drafts: DraftStore,
    cache: MetadataCache,
    audit: AuditLog,
    publisher: Arc<PublishCoordinator>,
    workflow: ReviewWorkflow,
    webhook: Option<WebhookIngester>,
    reconciler: Arc<CacheReconciler>,
    reconcile_tx: broadcast::Sender<ReconcileRequest>,
    publish_branch: String,
    resync_interval: Option<Duration>,
}

impl DocSync {
    /// Opens the database and git repository named by `config`.
    ///
    /// The webhook ingester is only built when a secret is configured.
    pub fn open(config: &SyncConfig) -> Result<Self> {
        let db_path = match &config.database.path {
            Some(path) => expand_home(path),
            None => default_database_path().ok_or_else(|| ConfigError::Validation {
                message: "database.path is not set and no home directory was found".to_string(),
            })?,
        };
        let db = Database::open(&db_path)?;

        let gateway = GitGateway::new(GitSettings {
            path: expand_home(&config.repository.path),
            committer_name: config.repository.committer_name.clone(),
            committer_email: config.repository.committer_email.clone(),
        });

        let source = SecretSource {
            direct: config.webhook.secret.as_deref(),
            file: config.webhook.secret_file.as_deref(),
            env_var: config.webhook.secret_env_var.as_deref(),
        };
        let secret = if source.is_configured() {
            Some(source.resolve()?)
        } else {
            log::warn!("No webhook secret configured; webhook deliveries are disabled");
            None
        };

        Ok(Self::with_gateway(config, Arc::new(gateway), db, secret))
    }

    /// Builds the engine over an existing gateway and database.
    pub fn with_gateway(
        config: &SyncConfig,
        gateway: Arc<dyn RepositoryGateway>,
        db: Database,
        secret: Option<SecretString>,
    ) -> Self {
        let drafts = DraftStore::new(db.clone());
        let cache = MetadataCache::new(db.clone());
        let audit = AuditLog::new(db.clone());
        let (reconcile_tx, _) = broadcast::channel(RECONCILE_CHANNEL_CAPACITY);

        let repository = &config.repository;
        let scope = DocumentScope::new(
            repository.docs_root.clone(),
            repository.tracked_extensions.clone(),
        );
        let retry = RetryPolicy {
            max_retries: config.publish.max_retries,
            base_delay: Duration::from_millis(config.publish.retry_base_delay_ms),
        };

        let publisher = Arc::new(PublishCoordinator::new(
            Arc::clone(&gateway),
            drafts.clone(),
            cache.clone(),
            audit.clone(),
            PublishSettings {
                lock_timeout: Duration::from_millis(config.publish.lock_timeout_ms),
                commit_timeout: Duration::from_millis(config.publish.commit_timeout_ms),
                retry,
                docs_root: repository.docs_root.clone(),
            },
            reconcile_tx.clone(),
        ));

        let workflow = ReviewWorkflow::new(
            Arc::clone(&gateway),
            drafts.clone(),
            audit.clone(),
            Arc::clone(&publisher),
            retry,
        );

        let webhook = secret.map(|secret| {
            WebhookIngester::new(
                secret,
                Arc::clone(&gateway),
                cache.clone(),
                audit.clone(),
                DeliveryWindow::new(
                    config.webhook.dedup_capacity,
                    Duration::from_secs(config.webhook.dedup_ttl_secs),
                ),
                WebhookSettings {
                    publish_branch: repository.publish_branch.clone(),
                    scope: scope.clone(),
                    retry,
                },
                reconcile_tx.clone(),
            )
        });

        let reconciler = Arc::new(CacheReconciler::new(
            Arc::clone(&gateway),
            cache.clone(),
            audit.clone(),
            scope,
            retry,
        ));

        Self {
            gateway,
            db,
            drafts,
            cache,
            audit,
            publisher,
            workflow,
            webhook,
            reconciler,
            reconcile_tx,
            publish_branch: repository.publish_branch.clone(),
            resync_interval: config
                .resync
                .enabled
                .then(|| Duration::from_secs(config.resync.interval_secs)),
        }
    }

    pub fn gateway(&self) -> &Arc<dyn RepositoryGateway> {
        &self.gateway
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn drafts(&self) -> &DraftStore {
        &self.drafts
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn publisher(&self) -> &PublishCoordinator {
        &self.publisher
    }

    pub fn workflow(&self) -> &ReviewWorkflow {
        &self.workflow
    }

    /// `None` when no webhook secret is configured.
    pub fn webhook(&self) -> Option<&WebhookIngester> {
        self.webhook.as_ref()
    }

    pub fn reconciler(&self) -> &Arc<CacheReconciler> {
        &self.reconciler
    }

    pub fn publish_branch(&self) -> &str {
        &self.publish_branch
    }

    /// Receives reconciliation requests raised by publishes and webhooks.
    pub fn subscribe_reconcile(&self) -> broadcast::Receiver<ReconcileRequest> {
        self.reconcile_tx.subscribe()
    }

    /// Queues a reconciliation request. Returns false if nobody listens.
    pub fn request_reconcile(&self, request: ReconcileRequest) -> bool {
        self.reconcile_tx.send(request).is_ok()
    }

    /// Starts background resync of the publish branch, if enabled.
    pub fn start_resync(&self) -> Option<(ResyncScheduler, JoinHandle<()>)> {
        let interval = self.resync_interval?;
        let scheduler = ResyncScheduler::new(
            Arc::clone(&self.reconciler),
            self.publish_branch.clone(),
            interval,
        );
        let handle = scheduler.start(self.subscribe_reconcile());
        log::info!(
            "Resync of '{}' scheduled every {:?}",
            self.publish_branch,
            interval
        );
        Some((scheduler, handle))
    }
}
