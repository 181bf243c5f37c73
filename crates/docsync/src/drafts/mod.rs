//! Draft store: editorial content and workflow status, kept apart from the
//! repository until published.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Row};
use serde::{Deserialize, Serialize};

use crate::db::{
    first_row, format_timestamp, parse_optional_timestamp, parse_timestamp, Database,
    DatabaseError, Page, Pagination,
};
use crate::document::{frontmatter, FrontMatter};

/// Workflow status of a draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    Draft,
    InReview,
    Approved,
    Rejected,
    Published,
}

impl DraftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DraftStatus::Draft => "draft",
            DraftStatus::InReview => "in_review",
            DraftStatus::Approved => "approved",
            DraftStatus::Rejected => "rejected",
            DraftStatus::Published => "published",
        }
    }

    /// True once the draft is immutable history.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DraftStatus::Published)
    }
}

impl fmt::Display for DraftStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DraftStatus {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(DraftStatus::Draft),
            "in_review" => Ok(DraftStatus::InReview),
            "approved" => Ok(DraftStatus::Approved),
            "rejected" => Ok(DraftStatus::Rejected),
            "published" => Ok(DraftStatus::Published),
            other => Err(DatabaseError::InvalidValue {
                column: "status",
                value: other.to_string(),
            }),
        }
    }
}

/// An in-progress edit of one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    pub id: String,
    /// Normalised repository path of the target document.
    pub path: String,
    pub branch: String,
    pub content: String,
    /// Proposed front-matter; overrides fields of the same name in `content`.
    pub metadata: FrontMatter,
    pub status: DraftStatus,
    pub author: String,
    pub reviewer: Option<String>,
    pub review_comment: Option<String>,
    /// Revision id the draft was created or last refreshed against.
    pub base_revision: String,
    /// Incremented on every content change.
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub published_revision: Option<String>,
}

impl Draft {
    /// The file content that publishing this draft writes.
    pub fn document(&self) -> String {
        if self.metadata.is_empty() {
            return self.content.clone();
        }
        let (mut fields, body) = frontmatter::extract(&self.content);
        fields.extend(self.metadata.iter().map(|(k, v)| (k.clone(), v.clone())));
        frontmatter::combine(&fields, body)
    }
}

/// Filter for listing drafts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftFilter {
    pub author: Option<String>,
    pub status: Option<DraftStatus>,
    pub branch: Option<String>,
    pub path: Option<String>,
}

/// Raw `drafts` row.
struct DraftRow {
    id: String,
    path: String,
    branch: String,
    content: String,
    metadata: String,
    status: String,
    author: String,
    reviewer: Option<String>,
    review_comment: Option<String>,
    base_revision: String,
    version: u32,
    created_at: String,
    updated_at: String,
    submitted_at: Option<String>,
    reviewed_at: Option<String>,
    published_at: Option<String>,
    published_revision: Option<String>,
}

impl DraftRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            path: row.get("path")?,
            branch: row.get("branch")?,
            content: row.get("content")?,
            metadata: row.get("metadata")?,
            status: row.get("status")?,
            author: row.get("author")?,
            reviewer: row.get("reviewer")?,
            review_comment: row.get("review_comment")?,
            base_revision: row.get("base_revision")?,
            version: row.get("version")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            submitted_at: row.get("submitted_at")?,
            reviewed_at: row.get("reviewed_at")?,
            published_at: row.get("published_at")?,
            published_revision: row.get("published_revision")?,
        })
    }

    fn into_draft(self) -> Result<Draft, DatabaseError> {
        Ok(Draft {
            metadata: serde_json::from_str(&self.metadata).map_err(|e| DatabaseError::Json {
                column: "metadata",
                source: e,
            })?,
            status: self.status.parse()?,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            updated_at: parse_timestamp("updated_at", &self.updated_at)?,
            submitted_at: parse_optional_timestamp("submitted_at", self.submitted_at.as_deref())?,
            reviewed_at: parse_optional_timestamp("reviewed_at", self.reviewed_at.as_deref())?,
            published_at: parse_optional_timestamp("published_at", self.published_at.as_deref())?,
            id: self.id,
            path: self.path,
            branch: self.branch,
            content: self.content,
            author: self.author,
            reviewer: self.reviewer,
            review_comment: self.review_comment,
            base_revision: self.base_revision,
            version: self.version,
            published_revision: self.published_revision,
        })
    }
}

fn metadata_json(draft: &Draft) -> Result<String, DatabaseError> {
    serde_json::to_string(&draft.metadata).map_err(|e| DatabaseError::Json {
        column: "metadata",
        source: e,
    })
}

/// SQLite-backed draft storage.
#[derive(Clone)]
pub struct DraftStore {
    db: Database,
}

impl DraftStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts a new draft.
    pub fn insert(&self, draft: &Draft) -> Result<(), DatabaseError> {
        let metadata = metadata_json(draft)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO drafts (id, path, branch, content, metadata, status, author, reviewer,
                 review_comment, base_revision, version, created_at, updated_at, submitted_at,
                 reviewed_at, published_at, published_revision)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
                params![
                    draft.id,
                    draft.path,
                    draft.branch,
                    draft.content,
                    metadata,
                    draft.status.as_str(),
                    draft.author,
                    draft.reviewer,
                    draft.review_comment,
                    draft.base_revision,
                    draft.version,
                    format_timestamp(&draft.created_at),
                    format_timestamp(&draft.updated_at),
                    draft.submitted_at.as_ref().map(format_timestamp),
                    draft.reviewed_at.as_ref().map(format_timestamp),
                    draft.published_at.as_ref().map(format_timestamp),
                    draft.published_revision,
                ],
            )?;
            Ok(())
        })
    }

    /// Finds a draft by id.
    pub fn get(&self, id: &str) -> Result<Option<Draft>, DatabaseError> {
        let row = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM drafts WHERE id = ?1")?;
            let rows = stmt.query_map(params![id], DraftRow::from_row)?;
            first_row(rows)
        })?;
        row.map(DraftRow::into_draft).transpose()
    }

    /// Overwrites every mutable field of `draft`, but only while the stored
    /// row still has status `expected`.
    ///
    /// Returns false if the row is missing or its status moved on, so two
    /// racing transitions cannot both apply.
    pub fn replace(&self, draft: &Draft, expected: DraftStatus) -> Result<bool, DatabaseError> {
        let metadata = metadata_json(draft)?;
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE drafts SET content=?3, metadata=?4, status=?5, reviewer=?6,
                 review_comment=?7, base_revision=?8, version=?9, updated_at=?10,
                 submitted_at=?11, reviewed_at=?12, published_at=?13, published_revision=?14
                 WHERE id=?1 AND status=?2",
                params![
                    draft.id,
                    expected.as_str(),
                    draft.content,
                    metadata,
                    draft.status.as_str(),
                    draft.reviewer,
                    draft.review_comment,
                    draft.base_revision,
                    draft.version,
                    format_timestamp(&draft.updated_at),
                    draft.submitted_at.as_ref().map(format_timestamp),
                    draft.reviewed_at.as_ref().map(format_timestamp),
                    draft.published_at.as_ref().map(format_timestamp),
                    draft.published_revision,
                ],
            )?;
            Ok(changed == 1)
        })
    }

    /// Deletes a draft while its status is still `expected`.
    pub fn delete(&self, id: &str, expected: DraftStatus) -> Result<bool, DatabaseError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM drafts WHERE id = ?1 AND status = ?2",
                params![id, expected.as_str()],
            )?;
            Ok(changed == 1)
        })
    }

    /// Lists drafts matching `filter`, most recently updated first.
    pub fn list(
        &self,
        filter: &DraftFilter,
        pagination: Pagination,
    ) -> Result<Page<Draft>, DatabaseError> {
        let (rows, total) = self.db.with_conn(|conn| {
            let mut conditions = Vec::new();
            let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

            if let Some(ref author) = filter.author {
                conditions.push(format!("author = ?{}", param_values.len() + 1));
                param_values.push(Box::new(author.clone()));
            }
            if let Some(status) = filter.status {
                conditions.push(format!("status = ?{}", param_values.len() + 1));
                param_values.push(Box::new(status.as_str()));
            }
            if let Some(ref branch) = filter.branch {
                conditions.push(format!("branch = ?{}", param_values.len() + 1));
                param_values.push(Box::new(branch.clone()));
            }
            if let Some(ref path) = filter.path {
                conditions.push(format!("path = ?{}", param_values.len() + 1));
                param_values.push(Box::new(path.clone()));
            }

            let where_clause = if conditions.is_empty() {
                String::new()
            } else {
                format!("WHERE {}", conditions.join(" AND "))
            };

            let count_sql = format!("SELECT COUNT(*) FROM drafts {}", where_clause);
            let params_ref: Vec<&dyn rusqlite::types::ToSql> =
                param_values.iter().map(|p| p.as_ref()).collect();
            let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

            param_values.push(Box::new(pagination.effective_limit() as i64));
            param_values.push(Box::new(pagination.offset as i64));
            let query_sql = format!(
                "SELECT * FROM drafts {} ORDER BY updated_at DESC, id LIMIT ?{} OFFSET ?{}",
                where_clause,
                param_values.len() - 1,
                param_values.len()
            );
            let params_ref: Vec<&dyn rusqlite::types::ToSql> =
                param_values.iter().map(|p| p.as_ref()).collect();
            let mut stmt = conn.prepare(&query_sql)?;
            let rows: Vec<DraftRow> = stmt
                .query_map(params_ref.as_slice(), DraftRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok((rows, total))
        })?;

        let items = rows
            .into_iter()
            .map(DraftRow::into_draft)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Page { items, total })
    }
}
