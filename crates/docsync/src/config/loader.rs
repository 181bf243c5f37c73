use std::path::Path;

use crate::config::schema::SyncConfig;
use crate::document::validate_branch;
use crate::error::ConfigError;

/// Environment variables that override file values.
pub const ENV_REPOSITORY_PATH: &str = "DOCSYNC_REPOSITORY_PATH";
pub const ENV_PUBLISH_BRANCH: &str = "DOCSYNC_PUBLISH_BRANCH";
pub const ENV_DATABASE_PATH: &str = "DOCSYNC_DATABASE_PATH";
pub const ENV_WEBHOOK_SECRET_ENV_VAR: &str = "DOCSYNC_WEBHOOK_SECRET_ENV_VAR";

const MAX_RETRIES_LIMIT: u32 = 10;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<SyncConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<SyncConfig, ConfigError> {
    let mut config: SyncConfig = serde_yaml::from_str(content)?;

    apply_env_overrides(&mut config)?;
    validate_config(&config)?;

    Ok(config)
}

fn apply_env_overrides(config: &mut SyncConfig) -> Result<(), ConfigError> {
    if let Some(path) = env_value(ENV_REPOSITORY_PATH)? {
        config.repository.path = path;
    }
    if let Some(branch) = env_value(ENV_PUBLISH_BRANCH)? {
        config.repository.publish_branch = branch;
    }
    if let Some(path) = env_value(ENV_DATABASE_PATH)? {
        config.database.path = Some(path);
    }
    if let Some(name) = env_value(ENV_WEBHOOK_SECRET_ENV_VAR)? {
        config.webhook.secret_env_var = Some(name);
    }
    Ok(())
}

/// Reads a non-empty override; unset and empty both mean "no override".
fn env_value(name: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(name) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => {
            log::debug!("Config override from {}", name);
            Ok(Some(value.trim().to_string()))
        }
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidEnv {
            name: name.to_string(),
            reason: "not valid UTF-8".to_string(),
        }),
    }
}

pub fn validate_config(config: &SyncConfig) -> Result<(), ConfigError> {
    let invalid = |message: String| Err(ConfigError::Validation { message });

    if config.repository.path.trim().is_empty() {
        return invalid("repository.path cannot be empty".to_string());
    }
    if let Err(e) = validate_branch(&config.repository.publish_branch) {
        return invalid(format!("repository.publishBranch: {}", e));
    }
    for ext in &config.repository.tracked_extensions {
        if ext.is_empty() || ext.contains('.') || ext.contains('/') {
            return invalid(format!(
                "repository.trackedExtensions: '{}' must be a bare extension like 'md'",
                ext
            ));
        }
    }
    if config.repository.tracked_extensions.is_empty() {
        return invalid("repository.trackedExtensions cannot be empty".to_string());
    }

    if config.webhook.dedup_capacity == 0 {
        return invalid("webhook.dedupCapacity must be at least 1".to_string());
    }
    if config.webhook.dedup_ttl_secs == 0 {
        return invalid("webhook.dedupTtlSecs must be at least 1".to_string());
    }

    if config.publish.lock_timeout_ms == 0 || config.publish.commit_timeout_ms == 0 {
        return invalid("publish timeouts must be greater than zero".to_string());
    }
    if config.publish.max_retries > MAX_RETRIES_LIMIT {
        return invalid(format!(
            "publish.maxRetries cannot exceed {}",
            MAX_RETRIES_LIMIT
        ));
    }

    if config.resync.enabled && config.resync.interval_secs == 0 {
        return invalid("resync.intervalSecs must be greater than zero".to_string());
    }

    Ok(())
}
