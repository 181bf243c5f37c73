//! Commit messages for published drafts.
//!
//! ```text
//! docs: Update Getting Started (guide)
//!
//! Draft-Id: 3f2a...
//! Draft-Author: ada
//! Published-By: bob
//! ```
//!
//! The trailers keep repository history auditable without the database.

use crate::gateway::path_under;

const DRAFT_ID: &str = "Draft-Id";
const DRAFT_AUTHOR: &str = "Draft-Author";
const PUBLISHED_BY: &str = "Published-By";

/// Whether the commit adds a document or changes an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitAction {
    Create,
    Update,
}

impl CommitAction {
    fn verb(&self) -> &'static str {
        match self {
            CommitAction::Create => "Create",
            CommitAction::Update => "Update",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PublishMessage<'a> {
    pub action: CommitAction,
    pub title: &'a str,
    pub path: &'a str,
    pub docs_root: &'a str,
    pub draft_id: &'a str,
    pub draft_author: &'a str,
    pub published_by: &'a str,
}

impl PublishMessage<'_> {
    pub fn render(&self) -> String {
        let mut subject = format!("docs: {} {}", self.action.verb(), one_line(self.title));
        if let Some(category) = category_dir(self.path, self.docs_root) {
            subject.push_str(&format!(" ({})", category));
        }
        format!(
            "{}\n\n{}: {}\n{}: {}\n{}: {}\n",
            subject,
            DRAFT_ID,
            self.draft_id,
            DRAFT_AUTHOR,
            one_line(self.draft_author),
            PUBLISHED_BY,
            one_line(self.published_by),
        )
    }
}

/// First directory below the docs root, if the document sits in one.
fn category_dir<'p>(path: &'p str, docs_root: &str) -> Option<&'p str> {
    let root = docs_root.trim_matches('/');
    let relative = if root.is_empty() {
        path
    } else if path_under(path, root) {
        path[root.len()..].trim_start_matches('/')
    } else {
        path
    };
    relative.split_once('/').map(|(dir, _)| dir)
}

fn one_line(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Recovers the draft id from a commit message written by [`PublishMessage`].
pub fn parse_draft_id(message: &str) -> Option<String> {
    trailer(message, DRAFT_ID)
}

/// Recovers the publishing actor from a commit message.
pub fn parse_published_by(message: &str) -> Option<String> {
    trailer(message, PUBLISHED_BY)
}

fn trailer(message: &str, key: &str) -> Option<String> {
    message.lines().rev().find_map(|line| {
        let (k, v) = line.split_once(':')?;
        (k.trim() == key)
            .then(|| v.trim().to_string())
            .filter(|v| !v.is_empty())
    })
}
