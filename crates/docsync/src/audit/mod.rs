//! Append-only audit log of every state-changing operation.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use crate::db::{format_timestamp, parse_timestamp, Database, DatabaseError, Page, Pagination};

/// What triggered the change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSource {
    /// An editor, reviewer or publisher acting through the workflow.
    Human,
    /// A repository host notification.
    Webhook,
    /// Background re-sync of the cache.
    Reconciler,
}

/// Recorded operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditAction {
    #[serde(rename = "draft.create")]
    DraftCreate,
    #[serde(rename = "draft.update")]
    DraftUpdate,
    #[serde(rename = "draft.delete")]
    DraftDelete,
    #[serde(rename = "draft.submit")]
    DraftSubmit,
    #[serde(rename = "draft.approve")]
    DraftApprove,
    #[serde(rename = "draft.reject")]
    DraftReject,
    #[serde(rename = "document.publish")]
    DocumentPublish,
    #[serde(rename = "cache.sync")]
    CacheSync,
    #[serde(rename = "cache.tombstone")]
    CacheTombstone,
    #[serde(rename = "cache.reconcile")]
    CacheReconcile,
    #[serde(rename = "webhook.ping")]
    WebhookPing,
    #[serde(rename = "webhook.delivery")]
    WebhookDelivery,
}

const ACTIONS: [(AuditAction, &str); 12] = [
    (AuditAction::DraftCreate, "draft.create"),
    (AuditAction::DraftUpdate, "draft.update"),
    (AuditAction::DraftDelete, "draft.delete"),
    (AuditAction::DraftSubmit, "draft.submit"),
    (AuditAction::DraftApprove, "draft.approve"),
    (AuditAction::DraftReject, "draft.reject"),
    (AuditAction::DocumentPublish, "document.publish"),
    (AuditAction::CacheSync, "cache.sync"),
    (AuditAction::CacheTombstone, "cache.tombstone"),
    (AuditAction::CacheReconcile, "cache.reconcile"),
    (AuditAction::WebhookPing, "webhook.ping"),
    (AuditAction::WebhookDelivery, "webhook.delivery"),
];

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        ACTIONS
            .iter()
            .find(|(action, _)| action == self)
            .map(|(_, name)| *name)
            .unwrap_or("unknown")
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ACTIONS
            .iter()
            .find(|(_, name)| *name == s)
            .map(|(action, _)| *action)
            .ok_or_else(|| DatabaseError::InvalidValue {
                column: "action",
                value: s.to_string(),
            })
    }
}

impl AuditSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditSource::Human => "human",
            AuditSource::Webhook => "webhook",
            AuditSource::Reconciler => "reconciler",
        }
    }
}

impl FromStr for AuditSource {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "human" => Ok(AuditSource::Human),
            "webhook" => Ok(AuditSource::Webhook),
            "reconciler" => Ok(AuditSource::Reconciler),
            other => Err(DatabaseError::InvalidValue {
                column: "source",
                value: other.to_string(),
            }),
        }
    }
}

/// What an entry is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetRef {
    Draft { id: String },
    Document { path: String, branch: String },
    Delivery { id: String },
}

impl TargetRef {
    pub fn draft(id: impl Into<String>) -> Self {
        TargetRef::Draft { id: id.into() }
    }

    pub fn document(path: impl Into<String>, branch: impl Into<String>) -> Self {
        TargetRef::Document {
            path: path.into(),
            branch: branch.into(),
        }
    }

    fn columns(&self) -> (&'static str, &str, Option<&str>) {
        match self {
            TargetRef::Draft { id } => ("draft", id.as_str(), None),
            TargetRef::Document { path, branch } => {
                ("document", path.as_str(), Some(branch.as_str()))
            }
            TargetRef::Delivery { id } => ("delivery", id.as_str(), None),
        }
    }

    fn from_columns(kind: &str, id: String, branch: Option<String>) -> Result<Self, DatabaseError> {
        match kind {
            "draft" => Ok(TargetRef::Draft { id }),
            "document" => Ok(TargetRef::Document {
                path: id,
                branch: branch.unwrap_or_default(),
            }),
            "delivery" => Ok(TargetRef::Delivery { id }),
            other => Err(DatabaseError::InvalidValue {
                column: "target_kind",
                value: other.to_string(),
            }),
        }
    }
}

/// An entry to append. The sequence number and timestamp are assigned on write.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEntry {
    pub actor: String,
    pub action: AuditAction,
    pub target: TargetRef,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub source: AuditSource,
    pub delivery_id: Option<String>,
}

impl NewAuditEntry {
    pub fn new(
        actor: impl Into<String>,
        action: AuditAction,
        target: TargetRef,
        source: AuditSource,
    ) -> Self {
        Self {
            actor: actor.into(),
            action,
            target,
            before: None,
            after: None,
            source,
            delivery_id: None,
        }
    }

    pub fn before(mut self, state: impl Serialize) -> Self {
        self.before = serde_json::to_value(state).ok();
        self
    }

    pub fn after(mut self, state: impl Serialize) -> Self {
        self.after = serde_json::to_value(state).ok();
        self
    }

    pub fn delivery(mut self, delivery_id: impl Into<String>) -> Self {
        self.delivery_id = Some(delivery_id.into());
        self
    }
}

/// A stored audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub sequence: i64,
    pub actor: String,
    pub action: AuditAction,
    pub target: TargetRef,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub source: AuditSource,
    pub delivery_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

struct AuditRow {
    sequence: i64,
    actor: String,
    action: String,
    target_kind: String,
    target_id: String,
    branch: Option<String>,
    before_state: Option<String>,
    after_state: Option<String>,
    source: String,
    delivery_id: Option<String>,
    created_at: String,
}

impl AuditRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            sequence: row.get("sequence")?,
            actor: row.get("actor")?,
            action: row.get("action")?,
            target_kind: row.get("target_kind")?,
            target_id: row.get("target_id")?,
            branch: row.get("branch")?,
            before_state: row.get("before_state")?,
            after_state: row.get("after_state")?,
            source: row.get("source")?,
            delivery_id: row.get("delivery_id")?,
            created_at: row.get("created_at")?,
        })
    }

    fn into_entry(self) -> Result<AuditEntry, DatabaseError> {
        Ok(AuditEntry {
            sequence: self.sequence,
            actor: self.actor,
            action: self.action.parse()?,
            target: TargetRef::from_columns(&self.target_kind, self.target_id, self.branch)?,
            before: parse_state("before_state", self.before_state)?,
            after: parse_state("after_state", self.after_state)?,
            source: self.source.parse()?,
            delivery_id: self.delivery_id,
            created_at: parse_timestamp("created_at", &self.created_at)?,
        })
    }
}

fn parse_state(
    column: &'static str,
    value: Option<String>,
) -> Result<Option<serde_json::Value>, DatabaseError> {
    value
        .map(|v| serde_json::from_str(&v).map_err(|e| DatabaseError::Json { column, source: e }))
        .transpose()
}

/// Appends and reads audit entries. There is no update or delete.
#[derive(Clone)]
pub struct AuditLog {
    db: Database,
}

impl AuditLog {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Appends an entry and returns its sequence number.
    pub fn append(&self, entry: &NewAuditEntry) -> Result<i64, DatabaseError> {
        self.db.with_conn(|conn| Self::append_with(conn, entry))
    }

    /// Appends on an open connection, so the entry commits or rolls back
    /// with the caller's transaction.
    pub fn append_with(conn: &Connection, entry: &NewAuditEntry) -> Result<i64, DatabaseError> {
        let (target_kind, target_id, branch) = entry.target.columns();
        let before = entry.before.as_ref().map(|v| v.to_string());
        let after = entry.after.as_ref().map(|v| v.to_string());
        conn.execute(
            "INSERT INTO audit_log (actor, action, target_kind, target_id, branch,
             before_state, after_state, source, delivery_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                entry.actor,
                entry.action.as_str(),
                target_kind,
                target_id,
                branch,
                before,
                after,
                entry.source.as_str(),
                entry.delivery_id,
                format_timestamp(&Utc::now()),
            ],
        )?;
        let sequence = conn.last_insert_rowid();

        log::debug!(
            "Audit #{}: {} {} {} by {}",
            sequence,
            entry.source.as_str(),
            entry.action,
            target_id,
            entry.actor
        );
        Ok(sequence)
    }

    /// Entries about `target`, oldest first.
    pub fn list_for_target(&self, target: &TargetRef) -> Result<Vec<AuditEntry>, DatabaseError> {
        let (kind, id, branch) = target.columns();
        self.select(
            "SELECT * FROM audit_log WHERE target_kind = ?1 AND target_id = ?2
             AND (?3 IS NULL OR branch = ?3) ORDER BY sequence",
            params![kind, id, branch],
        )
    }

    /// Entries written while handling webhook delivery `delivery_id`.
    pub fn by_delivery(&self, delivery_id: &str) -> Result<Vec<AuditEntry>, DatabaseError> {
        self.select(
            "SELECT * FROM audit_log WHERE delivery_id = ?1 ORDER BY sequence",
            params![delivery_id],
        )
    }

    /// True once webhook delivery `delivery_id` was handled to completion.
    ///
    /// Only the closing `webhook.delivery` or `webhook.ping` entry counts;
    /// per-path entries of an attempt that failed midway do not.
    pub fn has_delivery(&self, delivery_id: &str) -> Result<bool, DatabaseError> {
        self.db.with_conn(|conn| {
            let found: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM audit_log WHERE delivery_id = ?1
                 AND action IN ('webhook.delivery', 'webhook.ping'))",
                params![delivery_id],
                |r| r.get(0),
            )?;
            Ok(found)
        })
    }

    /// Most recent entries first.
    pub fn recent(&self, pagination: Pagination) -> Result<Page<AuditEntry>, DatabaseError> {
        let total: u64 = self.db.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM audit_log", [], |r| r.get(0))?)
        })?;
        let items = self.select(
            "SELECT * FROM audit_log ORDER BY sequence DESC LIMIT ?1 OFFSET ?2",
            params![
                pagination.effective_limit() as i64,
                pagination.offset as i64
            ],
        )?;
        Ok(Page { items, total })
    }

    fn select(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::types::ToSql],
    ) -> Result<Vec<AuditEntry>, DatabaseError> {
        let rows = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt
                .query_map(params, AuditRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        rows.into_iter().map(AuditRow::into_entry).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn log() -> AuditLog {
        AuditLog::new(Database::open_in_memory().unwrap())
    }

    #[test]
    fn test_append_and_list_for_target() {
        let log = log();
        let target = TargetRef::draft("d1");
        log.append(
            &NewAuditEntry::new("ada", AuditAction::DraftCreate, target.clone(), AuditSource::Human)
                .after(json!({"status": "draft"})),
        )
        .unwrap();
        log.append(
            &NewAuditEntry::new("ada", AuditAction::DraftSubmit, target.clone(), AuditSource::Human)
                .before(json!({"status": "draft"}))
                .after(json!({"status": "in_review"})),
        )
        .unwrap();
        log.append(&NewAuditEntry::new(
            "bob",
            AuditAction::DraftCreate,
            TargetRef::draft("d2"),
            AuditSource::Human,
        ))
        .unwrap();

        let entries = log.list_for_target(&target).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].sequence < entries[1].sequence);
        assert_eq!(entries[1].action, AuditAction::DraftSubmit);
        assert_eq!(entries[1].before, Some(json!({"status": "draft"})));
        assert_eq!(entries[0].before, None);
    }

    #[test]
    fn test_document_target_matches_branch() {
        let log = log();
        for branch in ["main", "staging"] {
            log.append(&NewAuditEntry::new(
                "system",
                AuditAction::CacheSync,
                TargetRef::document("guide/a.md", branch),
                AuditSource::Reconciler,
            ))
            .unwrap();
        }
        let entries = log
            .list_for_target(&TargetRef::document("guide/a.md", "main"))
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].target, TargetRef::document("guide/a.md", "main"));
    }

    #[test]
    fn test_by_delivery() {
        let log = log();
        log.append(
            &NewAuditEntry::new(
                "octocat",
                AuditAction::CacheTombstone,
                TargetRef::document("guide/old.md", "main"),
                AuditSource::Webhook,
            )
            .delivery("abc-123"),
        )
        .unwrap();
        assert!(!log.has_delivery("abc-123").unwrap());

        log.append(
            &NewAuditEntry::new(
                "octocat",
                AuditAction::WebhookDelivery,
                TargetRef::Delivery {
                    id: "abc-123".to_string(),
                },
                AuditSource::Webhook,
            )
            .delivery("abc-123"),
        )
        .unwrap();

        assert!(log.has_delivery("abc-123").unwrap());
        assert!(!log.has_delivery("other").unwrap());
        let entries = log.by_delivery("abc-123").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].source, AuditSource::Webhook);
    }

    #[test]
    fn test_append_with_rolls_back_with_transaction() {
        let db = Database::open_in_memory().unwrap();
        let log = AuditLog::new(db.clone());
        let entry = NewAuditEntry::new(
            "ada",
            AuditAction::DraftUpdate,
            TargetRef::draft("d1"),
            AuditSource::Human,
        );

        let result: Result<(), DatabaseError> = db.with_transaction(|conn| {
            AuditLog::append_with(conn, &entry)?;
            Err(DatabaseError::LockPoisoned)
        });
        assert!(result.is_err());
        assert_eq!(log.recent(Pagination::default()).unwrap().total, 0);
    }

    #[test]
    fn test_recent_is_newest_first() {
        let log = log();
        for i in 0..3 {
            log.append(&NewAuditEntry::new(
                "ada",
                AuditAction::DraftUpdate,
                TargetRef::draft(format!("d{}", i)),
                AuditSource::Human,
            ))
            .unwrap();
        }
        let page = log.recent(Pagination::new(0, 2)).unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 2);
        assert_eq!(page.items[0].target, TargetRef::draft("d2"));
    }

    #[test]
    fn test_action_names_round_trip_through_storage() {
        for (action, name) in ACTIONS {
            assert_eq!(action.as_str(), name);
            assert_eq!(name.parse::<AuditAction>().unwrap(), action);
        }
    }
}
