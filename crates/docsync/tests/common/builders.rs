//! Builders for webhook payloads.

#![allow(dead_code)]

use serde_json::json;

use docsync::Revision;

/// Builder for GitHub-style push payloads.
pub struct PushBuilder {
    branch: String,
    after: String,
    added: Vec<String>,
    modified: Vec<String>,
    removed: Vec<String>,
    pusher: String,
    deleted: bool,
}

impl PushBuilder {
    /// A push of `after` to `branch` with no file changes.
    pub fn new(branch: &str, after: &Revision) -> Self {
        Self {
            branch: branch.to_string(),
            after: after.id.clone(),
            added: Vec::new(),
            modified: Vec::new(),
            removed: Vec::new(),
            pusher: "ada".to_string(),
            deleted: false,
        }
    }

    pub fn added(mut self, path: &str) -> Self {
        self.added.push(path.to_string());
        self
    }

    pub fn modified(mut self, path: &str) -> Self {
        self.modified.push(path.to_string());
        self
    }

    pub fn removed(mut self, path: &str) -> Self {
        self.removed.push(path.to_string());
        self
    }

    pub fn pusher(mut self, name: &str) -> Self {
        self.pusher = name.to_string();
        self
    }

    pub fn deleted(mut self) -> Self {
        self.deleted = true;
        self
    }

    pub fn build(self) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "ref": format!("refs/heads/{}", self.branch),
            "before": "",
            "after": self.after,
            "deleted": self.deleted,
            "commits": [{
                "id": self.after,
                "added": self.added,
                "modified": self.modified,
                "removed": self.removed,
            }],
            "pusher": { "name": self.pusher },
        }))
        .expect("Failed to serialize push payload")
    }
}
