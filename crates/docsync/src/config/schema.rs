use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub publish: PublishConfig,
    #[serde(default)]
    pub resync: ResyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryConfig {
    /// Local git repository (working tree or bare).
    pub path: String,
    #[serde(default = "default_publish_branch")]
    pub publish_branch: String,
    /// Directory holding the documents; empty for the repository root.
    #[serde(default)]
    pub docs_root: String,
    #[serde(default = "default_tracked_extensions")]
    pub tracked_extensions: Vec<String>,
    #[serde(default = "default_committer_name")]
    pub committer_name: String,
    #[serde(default = "default_committer_email")]
    pub committer_email: String,
}

fn default_publish_branch() -> String {
    "main".to_string()
}

fn default_tracked_extensions() -> Vec<String> {
    vec!["md".to_string(), "mdx".to_string()]
}

fn default_committer_name() -> String {
    "docsync".to_string()
}

fn default_committer_email() -> String {
    "docsync@localhost".to_string()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    /// SQLite file; defaults to `~/.docsync/data/docsync.db`.
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    /// Shared secret given inline. Prefer `secretFile` or `secretEnvVar`.
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub secret_file: Option<String>,
    #[serde(default)]
    pub secret_env_var: Option<String>,
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: u64,
    #[serde(default = "default_dedup_ttl_secs")]
    pub dedup_ttl_secs: u64,
}

fn default_dedup_capacity() -> u64 {
    10_000
}

fn default_dedup_ttl_secs() -> u64 {
    24 * 60 * 60
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: None,
            secret_file: None,
            secret_env_var: None,
            dedup_capacity: default_dedup_capacity(),
            dedup_ttl_secs: default_dedup_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishConfig {
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    #[serde(default = "default_commit_timeout_ms")]
    pub commit_timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
}

fn default_lock_timeout_ms() -> u64 {
    10_000
}

fn default_commit_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    200
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            commit_timeout_ms: default_commit_timeout_ms(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResyncConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_resync_interval_secs")]
    pub interval_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_resync_interval_secs() -> u64 {
    900
}

impl Default for ResyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_resync_interval_secs(),
        }
    }
}
