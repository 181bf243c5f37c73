//! Webhook payloads (GitHub-compatible `push` and `ping`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::document::normalize_path;
use crate::error::{Result, SyncError};

const BRANCH_REF_PREFIX: &str = "refs/heads/";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PingEvent {
    pub zen: String,
    #[serde(default)]
    pub hook_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Pusher {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PushCommit {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub added: Vec<String>,
    #[serde(default)]
    pub modified: Vec<String>,
    #[serde(default)]
    pub removed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PushEvent {
    #[serde(rename = "ref")]
    pub git_ref: String,
    #[serde(default)]
    pub before: String,
    pub after: String,
    /// Set when the push deleted the branch.
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub commits: Vec<PushCommit>,
    #[serde(default)]
    pub pusher: Option<Pusher>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// Added or modified: re-read the content.
    Upsert,
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathChange {
    pub path: String,
    pub kind: ChangeKind,
}

impl PushEvent {
    /// Branch name, or `None` for tag pushes.
    pub fn branch(&self) -> Option<&str> {
        self.git_ref.strip_prefix(BRANCH_REF_PREFIX)
    }

    /// Who pushed, for audit entries.
    pub fn pusher_name(&self) -> &str {
        self.pusher
            .as_ref()
            .map(|p| p.name.as_str())
            .unwrap_or("webhook")
    }

    /// Net change per path across all commits, ordered by path.
    ///
    /// The last commit that touched a path decides: a file added then
    /// removed within one push is a removal. Invalid paths are skipped.
    pub fn changes(&self) -> Vec<PathChange> {
        let mut net = BTreeMap::new();
        for commit in &self.commits {
            let touched = commit
                .added
                .iter()
                .chain(&commit.modified)
                .map(|p| (p, ChangeKind::Upsert))
                .chain(commit.removed.iter().map(|p| (p, ChangeKind::Remove)));
            for (raw, kind) in touched {
                match normalize_path(raw) {
                    Ok(path) => {
                        net.insert(path, kind);
                    }
                    Err(e) => log::warn!("Skipping path '{}' in push {}: {}", raw, self.after, e),
                }
            }
        }
        net.into_iter()
            .map(|(path, kind)| PathChange { path, kind })
            .collect()
    }
}

/// A verified, decoded webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    Ping(PingEvent),
    Push(PushEvent),
    /// Any other event kind; acknowledged without side effects.
    Other(String),
}

/// Decodes `raw` according to the event header, or infers the kind from
/// the payload when the header is absent.
pub fn parse(raw: &[u8], event_header: Option<&str>) -> Result<WebhookEvent> {
    match event_header.map(str::trim) {
        Some("ping") => decode(raw).map(WebhookEvent::Ping),
        Some("push") => decode(raw).map(WebhookEvent::Push),
        Some(other) if !other.is_empty() => Ok(WebhookEvent::Other(other.to_string())),
        _ => {
            let value: serde_json::Value = serde_json::from_slice(raw)
                .map_err(|e| SyncError::Payload(e.to_string()))?;
            if value.get("zen").is_some() {
                decode_value(value).map(WebhookEvent::Ping)
            } else if value.get("ref").is_some() {
                decode_value(value).map(WebhookEvent::Push)
            } else {
                Err(SyncError::Payload(
                    "cannot determine event kind".to_string(),
                ))
            }
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(raw: &[u8]) -> Result<T> {
    serde_json::from_slice(raw).map_err(|e| SyncError::Payload(e.to_string()))
}

fn decode_value<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| SyncError::Payload(e.to_string()))
}
