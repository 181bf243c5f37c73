//! Metadata cache: a queryable mirror of repository documents per
//! (path, branch).
//!
//! Every write carries a consistency marker (the [`Revision`] it reflects).
//! A write whose marker is not newer than the stored one is discarded, so
//! callers need no ordering guarantees between publishes, webhooks and
//! background re-syncs. Deleted documents are kept as tombstones.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::db::{format_timestamp, parse_timestamp, Database, DatabaseError, Page, Pagination};
use crate::document::{markdown, normalize_path, DocumentMetadata};
use crate::error::{Result, SyncError};
use crate::gateway::Revision;

/// Metadata and search tokens derived from one version of a document.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheDocument {
    pub metadata: DocumentMetadata,
    pub tokens: Vec<String>,
}

impl CacheDocument {
    pub fn from_content(path: &str, content: &str) -> Self {
        let metadata = DocumentMetadata::from_content(path, content);
        let tokens = metadata.search_tokens(content);
        Self { metadata, tokens }
    }
}

/// A cached document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub path: String,
    pub branch: String,
    pub metadata: DocumentMetadata,
    pub tokens: Vec<String>,
    /// Revision this entry reflects.
    pub marker: Revision,
    pub tombstoned: bool,
    pub updated_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn exists(&self) -> bool {
        !self.tombstoned
    }

    /// True if the entry reflects the branch's current head.
    pub fn is_fresh(&self, head: &Revision) -> bool {
        self.marker.id == head.id
    }
}

/// Filter for [`MetadataCache::query`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheQuery {
    pub branch: Option<String>,
    /// Free text; every term must prefix-match one of the entry's tokens.
    pub text: Option<String>,
    pub category: Option<String>,
    pub tag: Option<String>,
    pub team: Option<String>,
    pub path_prefix: Option<String>,
    #[serde(default)]
    pub include_tombstoned: bool,
}

/// Aggregates over one branch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub live: u64,
    pub tombstoned: u64,
    pub categories: BTreeMap<String, u64>,
    pub tags: BTreeMap<String, u64>,
    pub average_word_count: f64,
    pub average_reading_time: f64,
    pub last_updated: Option<DateTime<Utc>>,
}

struct CacheRow {
    path: String,
    branch: String,
    title: String,
    slug: String,
    category: Option<String>,
    tags: String,
    team: Option<String>,
    description: Option<String>,
    author: Option<String>,
    version: Option<String>,
    word_count: u32,
    reading_time: u32,
    front_matter: String,
    tokens: String,
    marker_id: String,
    marker_sequence: i64,
    tombstoned: bool,
    updated_at: String,
}

impl CacheRow {
    fn from_row(row: &Row<'_>) -> std::result::Result<Self, rusqlite::Error> {
        Ok(Self {
            path: row.get("path")?,
            branch: row.get("branch")?,
            title: row.get("title")?,
            slug: row.get("slug")?,
            category: row.get("category")?,
            tags: row.get("tags")?,
            team: row.get("team")?,
            description: row.get("description")?,
            author: row.get("author")?,
            version: row.get("version")?,
            word_count: row.get("word_count")?,
            reading_time: row.get("reading_time")?,
            front_matter: row.get("front_matter")?,
            tokens: row.get("tokens")?,
            marker_id: row.get("marker_id")?,
            marker_sequence: row.get("marker_sequence")?,
            tombstoned: row.get("tombstoned")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn into_entry(self) -> std::result::Result<CacheEntry, DatabaseError> {
        Ok(CacheEntry {
            metadata: DocumentMetadata {
                title: self.title,
                slug: self.slug,
                category: self.category,
                tags: from_json("tags", &self.tags)?,
                team: self.team,
                description: self.description,
                author: self.author,
                version: self.version,
                word_count: self.word_count,
                reading_time: self.reading_time,
                front_matter: from_json("front_matter", &self.front_matter)?,
            },
            tokens: self.tokens.split_whitespace().map(str::to_string).collect(),
            marker: Revision::new(self.marker_id, to_sequence(self.marker_sequence)),
            tombstoned: self.tombstoned,
            updated_at: parse_timestamp("updated_at", &self.updated_at)?,
            path: self.path,
            branch: self.branch,
        })
    }
}

fn from_json<T: serde::de::DeserializeOwned>(
    column: &'static str,
    value: &str,
) -> std::result::Result<T, DatabaseError> {
    serde_json::from_str(value).map_err(|e| DatabaseError::Json { column, source: e })
}

fn to_json<T: Serialize>(column: &'static str, value: &T) -> std::result::Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Json { column, source: e })
}

// SQLite integers are signed; generations never come close to i64::MAX.
fn to_sequence(stored: i64) -> u64 {
    u64::try_from(stored).unwrap_or_default()
}

fn to_stored(sequence: u64) -> i64 {
    i64::try_from(sequence).unwrap_or(i64::MAX)
}

/// Tokens are stored space-padded so `LIKE '% term%'` is a token-prefix match.
fn tokens_column(tokens: &[String]) -> String {
    if tokens.is_empty() {
        String::new()
    } else {
        format!(" {} ", tokens.join(" "))
    }
}

fn stored_state(
    conn: &Connection,
    path: &str,
    branch: &str,
) -> std::result::Result<Option<(u64, bool)>, DatabaseError> {
    let state = conn
        .query_row(
            "SELECT marker_sequence, tombstoned FROM cache_entries WHERE path = ?1 AND branch = ?2",
            params![path, branch],
            |r| Ok((to_sequence(r.get(0)?), r.get::<_, bool>(1)?)),
        )
        .optional()?;
    Ok(state)
}

fn write_entry(
    conn: &Connection,
    path: &str,
    branch: &str,
    document: &CacheDocument,
    marker: &Revision,
    tombstoned: bool,
) -> std::result::Result<(), DatabaseError> {
    let meta = &document.metadata;
    let now = format_timestamp(&Utc::now());
    conn.execute(
        "INSERT INTO cache_entries (path, branch, title, slug, category, tags, team, description,
         author, version, word_count, reading_time, front_matter, tokens, marker_id,
         marker_sequence, tombstoned, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
         ON CONFLICT(path, branch) DO UPDATE SET
            title=excluded.title, slug=excluded.slug, category=excluded.category,
            tags=excluded.tags, team=excluded.team, description=excluded.description,
            author=excluded.author, version=excluded.version, word_count=excluded.word_count,
            reading_time=excluded.reading_time, front_matter=excluded.front_matter,
            tokens=excluded.tokens, marker_id=excluded.marker_id,
            marker_sequence=excluded.marker_sequence, tombstoned=excluded.tombstoned,
            updated_at=excluded.updated_at",
        params![
            path,
            branch,
            meta.title,
            meta.slug,
            meta.category,
            to_json("tags", &meta.tags)?,
            meta.team,
            meta.description,
            meta.author,
            meta.version,
            meta.word_count,
            meta.reading_time,
            to_json("front_matter", &meta.front_matter)?,
            tokens_column(&document.tokens),
            marker.id,
            to_stored(marker.sequence),
            tombstoned,
            now,
        ],
    )?;
    advance_branch_marker(conn, branch, marker, &now)
}

fn advance_branch_marker(
    conn: &Connection,
    branch: &str,
    marker: &Revision,
    now: &str,
) -> std::result::Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO branch_markers (branch, marker_id, marker_sequence, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(branch) DO UPDATE SET
            marker_id=excluded.marker_id, marker_sequence=excluded.marker_sequence,
            updated_at=excluded.updated_at
         WHERE excluded.marker_sequence > branch_markers.marker_sequence",
        params![branch, marker.id, to_stored(marker.sequence), now],
    )?;
    Ok(())
}

/// SQLite-backed metadata cache. Never reads from the repository.
#[derive(Clone)]
pub struct MetadataCache {
    db: Database,
}

impl MetadataCache {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Returns the live entry for (path, branch).
    ///
    /// Tombstoned entries report `NotFound`; use [`get_any`](Self::get_any)
    /// to see them.
    pub fn get(&self, path: &str, branch: &str) -> Result<CacheEntry> {
        match self.get_any(path, branch)? {
            Some(entry) if entry.exists() => Ok(entry),
            _ => Err(SyncError::NotFound(format!(
                "Cache entry '{}' on '{}'",
                path, branch
            ))),
        }
    }

    /// Returns the entry for (path, branch), tombstoned or not.
    pub fn get_any(&self, path: &str, branch: &str) -> Result<Option<CacheEntry>> {
        let path = normalize_path(path)?;
        let row = self.db.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT * FROM cache_entries WHERE path = ?1 AND branch = ?2",
                    params![path, branch],
                    CacheRow::from_row,
                )
                .optional()?;
            Ok(row)
        })?;
        Ok(row.map(CacheRow::into_entry).transpose()?)
    }

    /// True if (path, branch) has an entry, tombstoned or not.
    pub fn has_entry(&self, path: &str, branch: &str) -> Result<bool> {
        let path = normalize_path(path)?;
        let state = self
            .db
            .with_conn(|conn| stored_state(conn, &path, branch))?;
        Ok(state.is_some())
    }

    /// Stores `document` as the content of (path, branch) at `marker`.
    ///
    /// Returns false, changing nothing, if the stored marker is the same or
    /// newer. A newer upsert revives a tombstoned entry.
    pub fn upsert(
        &self,
        path: &str,
        branch: &str,
        document: &CacheDocument,
        marker: &Revision,
    ) -> Result<bool> {
        self.upsert_with(path, branch, document, marker, |_, _| Ok(()))
    }

    /// [`upsert`](Self::upsert), then `record` in the same transaction.
    ///
    /// `record` is told whether the write applied. If it fails, nothing is
    /// stored.
    pub fn upsert_with<F>(
        &self,
        path: &str,
        branch: &str,
        document: &CacheDocument,
        marker: &Revision,
        record: F,
    ) -> Result<bool>
    where
        F: FnOnce(&Connection, bool) -> std::result::Result<(), DatabaseError>,
    {
        let path = normalize_path(path)?;
        let applied = self.db.with_transaction(|conn| {
            let applied = match stored_state(conn, &path, branch)? {
                Some((stored, _)) if marker.sequence <= stored => false,
                _ => {
                    write_entry(conn, &path, branch, document, marker, false)?;
                    true
                }
            };
            record(conn, applied)?;
            Ok(applied)
        })?;

        if applied {
            log::debug!("Cache upsert {}@{} -> {}", path, branch, marker);
        } else {
            log::debug!("Cache upsert {}@{} at {} skipped (stale)", path, branch, marker);
        }
        Ok(applied)
    }

    /// Marks (path, branch) deleted as of `at`.
    ///
    /// The tombstone keeps the last metadata and stores `at` as its marker,
    /// so an upsert older than the deletion cannot bring the entry back.
    /// Returns false if the stored marker is newer, or if the entry is
    /// already tombstoned at the same or a newer marker.
    pub fn invalidate(&self, path: &str, branch: &str, at: &Revision) -> Result<bool> {
        self.invalidate_with(path, branch, at, |_, _| Ok(()))
    }

    /// [`invalidate`](Self::invalidate) with `record` in the same transaction.
    pub fn invalidate_with<F>(
        &self,
        path: &str,
        branch: &str,
        at: &Revision,
        record: F,
    ) -> Result<bool>
    where
        F: FnOnce(&Connection, bool) -> std::result::Result<(), DatabaseError>,
    {
        let path = normalize_path(path)?;
        let applied = self.db.with_transaction(|conn| {
            let applied = match stored_state(conn, &path, branch)? {
                Some((stored, _)) if at.sequence < stored => false,
                Some((stored, true)) if at.sequence <= stored => false,
                Some(_) => {
                    let now = format_timestamp(&Utc::now());
                    conn.execute(
                        "UPDATE cache_entries SET tombstoned = 1, marker_id = ?3,
                         marker_sequence = ?4, updated_at = ?5
                         WHERE path = ?1 AND branch = ?2",
                        params![path, branch, at.id, to_stored(at.sequence), now],
                    )?;
                    advance_branch_marker(conn, branch, at, &now)?;
                    true
                }
                None => {
                    // Never cached: record the deletion so older writes stay out.
                    let document = CacheDocument::from_content(&path, "");
                    write_entry(conn, &path, branch, &document, at, true)?;
                    true
                }
            };
            record(conn, applied)?;
            Ok(applied)
        })?;

        if applied {
            log::debug!("Cache tombstone {}@{} at {}", path, branch, at);
        }
        Ok(applied)
    }

    /// Searches cached entries, ordered by path. Never touches the repository.
    pub fn query(&self, filter: &CacheQuery, pagination: Pagination) -> Result<Page<CacheEntry>> {
        let path_prefix = filter
            .path_prefix
            .as_deref()
            .map(|p| p.trim_end_matches('/'))
            .filter(|p| !p.is_empty() && *p != "/")
            .map(normalize_path)
            .transpose()?;

        let (rows, total) = self.db.with_conn(|conn| {
            let mut conditions = Vec::new();
            let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

            if !filter.include_tombstoned {
                conditions.push("tombstoned = 0".to_string());
            }
            if let Some(ref branch) = filter.branch {
                conditions.push(format!("branch = ?{}", param_values.len() + 1));
                param_values.push(Box::new(branch.clone()));
            }
            if let Some(ref category) = filter.category {
                conditions.push(format!("category = ?{}", param_values.len() + 1));
                param_values.push(Box::new(category.clone()));
            }
            if let Some(ref team) = filter.team {
                conditions.push(format!("team = ?{}", param_values.len() + 1));
                param_values.push(Box::new(team.clone()));
            }
            if let Some(ref tag) = filter.tag {
                conditions.push(format!(
                    "EXISTS (SELECT 1 FROM json_each(cache_entries.tags) WHERE value = ?{})",
                    param_values.len() + 1
                ));
                param_values.push(Box::new(tag.clone()));
            }
            if let Some(ref prefix) = path_prefix {
                let n = param_values.len() + 1;
                conditions.push(format!(
                    "(path = ?{n} OR substr(path, 1, length(?{n}) + 1) = ?{n} || '/')"
                ));
                param_values.push(Box::new(prefix.clone()));
            }
            for term in filter.text.as_deref().map(markdown::query_terms).unwrap_or_default() {
                conditions.push(format!("tokens LIKE ?{}", param_values.len() + 1));
                param_values.push(Box::new(format!("% {}%", term)));
            }

            let where_clause = if conditions.is_empty() {
                String::new()
            } else {
                format!("WHERE {}", conditions.join(" AND "))
            };

            let count_sql = format!("SELECT COUNT(*) FROM cache_entries {}", where_clause);
            let params_ref: Vec<&dyn rusqlite::types::ToSql> =
                param_values.iter().map(|p| p.as_ref()).collect();
            let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

            param_values.push(Box::new(pagination.effective_limit() as i64));
            param_values.push(Box::new(pagination.offset as i64));
            let query_sql = format!(
                "SELECT * FROM cache_entries {} ORDER BY path, branch LIMIT ?{} OFFSET ?{}",
                where_clause,
                param_values.len() - 1,
                param_values.len()
            );
            let params_ref: Vec<&dyn rusqlite::types::ToSql> =
                param_values.iter().map(|p| p.as_ref()).collect();
            let mut stmt = conn.prepare(&query_sql)?;
            let rows: Vec<CacheRow> = stmt
                .query_map(params_ref.as_slice(), CacheRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok((rows, total))
        })?;

        let items = rows
            .into_iter()
            .map(CacheRow::into_entry)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Page { items, total })
    }

    /// Paths of every live entry on `branch`.
    pub fn live_paths(&self, branch: &str) -> Result<Vec<String>> {
        let paths = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT path FROM cache_entries WHERE branch = ?1 AND tombstoned = 0 ORDER BY path",
            )?;
            let paths = stmt
                .query_map(params![branch], |r| r.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(paths)
        })?;
        Ok(paths)
    }

    /// Aggregate counts for `branch`.
    pub fn stats(&self, branch: &str) -> Result<CacheStats> {
        let stats = self.db.with_conn(|conn| {
            let (live, tombstoned, avg_words, avg_minutes, last): (
                u64,
                u64,
                Option<f64>,
                Option<f64>,
                Option<String>,
            ) = conn.query_row(
                "SELECT
                    COALESCE(SUM(tombstoned = 0), 0),
                    COALESCE(SUM(tombstoned = 1), 0),
                    AVG(CASE WHEN tombstoned = 0 THEN word_count END),
                    AVG(CASE WHEN tombstoned = 0 THEN reading_time END),
                    MAX(updated_at)
                 FROM cache_entries WHERE branch = ?1",
                params![branch],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
            )?;

            let mut stmt = conn.prepare(
                "SELECT category, COUNT(*) FROM cache_entries
                 WHERE branch = ?1 AND tombstoned = 0 AND category IS NOT NULL
                 GROUP BY category",
            )?;
            let categories = stmt
                .query_map(params![branch], |r| Ok((r.get(0)?, r.get(1)?)))?
                .collect::<std::result::Result<BTreeMap<String, u64>, _>>()?;

            let mut stmt = conn.prepare(
                "SELECT t.value, COUNT(*) FROM cache_entries, json_each(cache_entries.tags) AS t
                 WHERE branch = ?1 AND tombstoned = 0
                 GROUP BY t.value",
            )?;
            let tags = stmt
                .query_map(params![branch], |r| Ok((r.get(0)?, r.get(1)?)))?
                .collect::<std::result::Result<BTreeMap<String, u64>, _>>()?;

            Ok(CacheStats {
                live,
                tombstoned,
                categories,
                tags,
                average_word_count: avg_words.unwrap_or_default(),
                average_reading_time: avg_minutes.unwrap_or_default(),
                last_updated: last
                    .as_deref()
                    .map(|v| parse_timestamp("updated_at", v))
                    .transpose()?,
            })
        })?;
        Ok(stats)
    }

    /// Highest marker applied to any entry on `branch`.
    pub fn branch_marker(&self, branch: &str) -> Result<Option<Revision>> {
        let marker = self.db.with_conn(|conn| {
            let marker = conn
                .query_row(
                    "SELECT marker_id, marker_sequence FROM branch_markers WHERE branch = ?1",
                    params![branch],
                    |r| Ok(Revision::new(r.get::<_, String>(0)?, to_sequence(r.get(1)?))),
                )
                .optional()?;
            Ok(marker)
        })?;
        Ok(marker)
    }

    /// True if the live entry for (path, branch) reflects `head`.
    pub fn is_fresh(&self, path: &str, branch: &str, head: &Revision) -> Result<bool> {
        Ok(self
            .get_any(path, branch)?
            .is_some_and(|entry| entry.exists() && entry.is_fresh(head)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    const INTRO: &str = "---\ntitle: Intro\ncategory: guides\ntags: [setup, basics]\nteam: docs\n---\nInstall the toolkit and configure logging.\n";
    const API: &str = "---\ntitle: API Reference\ncategory: reference\ntags: [api]\n---\nEndpoints for drafts.\n";

    fn cache() -> MetadataCache {
        MetadataCache::new(Database::open_in_memory().unwrap())
    }

    fn rev(n: u64) -> Revision {
        Revision::new(format!("r{}", n), n + 1)
    }

    fn doc(path: &str, content: &str) -> CacheDocument {
        CacheDocument::from_content(path, content)
    }

    #[test]
    fn test_upsert_and_get() {
        let cache = cache();
        assert!(cache
            .upsert("/guide/intro.md", "main", &doc("guide/intro.md", INTRO), &rev(1))
            .unwrap());

        let entry = cache.get("guide/intro.md", "main").unwrap();
        assert_eq!(entry.path, "guide/intro.md");
        assert_eq!(entry.metadata.title, "Intro");
        assert_eq!(entry.marker, rev(1));
        assert!(entry.tokens.contains(&"toolkit".to_string()));
        assert_eq!(cache.branch_marker("main").unwrap(), Some(rev(1)));
    }

    #[test]
    fn test_failed_record_rolls_back_write() {
        let cache = cache();
        let err = cache
            .upsert_with(
                "guide/intro.md",
                "main",
                &doc("guide/intro.md", INTRO),
                &rev(1),
                |_, _| Err(DatabaseError::LockPoisoned),
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(!cache.has_entry("guide/intro.md", "main").unwrap());
        assert_eq!(cache.branch_marker("main").unwrap(), None);

        let mut seen = None;
        cache
            .invalidate_with("guide/intro.md", "main", &rev(2), |_, applied| {
                seen = Some(applied);
                Ok(())
            })
            .unwrap();
        assert_eq!(seen, Some(true));
        assert!(cache.has_entry("/guide/intro.md", "main").unwrap());
    }

    #[test]
    fn test_older_marker_is_ignored() {
        let cache = cache();
        cache
            .upsert("guide/intro.md", "main", &doc("guide/intro.md", INTRO), &rev(2))
            .unwrap();

        let stale = doc("guide/intro.md", "# Stale\n");
        assert!(!cache.upsert("guide/intro.md", "main", &stale, &rev(1)).unwrap());
        assert!(!cache.upsert("guide/intro.md", "main", &stale, &rev(2)).unwrap());

        let entry = cache.get("guide/intro.md", "main").unwrap();
        assert_eq!(entry.metadata.title, "Intro");
        assert_eq!(entry.marker, rev(2));
    }

    #[test]
    fn test_tombstone_blocks_older_upsert() {
        let cache = cache();
        let intro = doc("guide/intro.md", INTRO);
        cache.upsert("guide/intro.md", "main", &intro, &rev(1)).unwrap();
        assert!(cache.invalidate("guide/intro.md", "main", &rev(3)).unwrap());

        let err = cache.get("guide/intro.md", "main").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let tombstone = cache.get_any("guide/intro.md", "main").unwrap().unwrap();
        assert!(tombstone.tombstoned);
        assert_eq!(tombstone.metadata.title, "Intro");
        assert_eq!(tombstone.marker, rev(3));

        // A late write from before the deletion stays out.
        assert!(!cache.upsert("guide/intro.md", "main", &intro, &rev(2)).unwrap());
        assert!(cache.get("guide/intro.md", "main").is_err());

        // A newer write revives it.
        assert!(cache.upsert("guide/intro.md", "main", &intro, &rev(4)).unwrap());
        assert!(cache.get("guide/intro.md", "main").unwrap().exists());
    }

    #[test]
    fn test_invalidate_rules() {
        let cache = cache();
        cache
            .upsert("guide/intro.md", "main", &doc("guide/intro.md", INTRO), &rev(5))
            .unwrap();
        assert!(!cache.invalidate("guide/intro.md", "main", &rev(4)).unwrap());
        assert!(cache.get("guide/intro.md", "main").is_ok());

        assert!(cache.invalidate("guide/intro.md", "main", &rev(6)).unwrap());
        assert!(!cache.invalidate("guide/intro.md", "main", &rev(6)).unwrap());

        // Unknown paths get a tombstone too.
        assert!(cache.invalidate("guide/never.md", "main", &rev(6)).unwrap());
        let entry = cache.get_any("guide/never.md", "main").unwrap().unwrap();
        assert!(entry.tombstoned);
    }

    #[test]
    fn test_branches_are_independent() {
        let cache = cache();
        let intro = doc("guide/intro.md", INTRO);
        cache.upsert("guide/intro.md", "main", &intro, &rev(5)).unwrap();
        assert!(cache.upsert("guide/intro.md", "staging", &intro, &rev(1)).unwrap());
        assert_eq!(cache.branch_marker("staging").unwrap(), Some(rev(1)));
        assert_eq!(cache.branch_marker("main").unwrap(), Some(rev(5)));
    }

    #[test]
    fn test_branch_marker_never_regresses() {
        let cache = cache();
        cache
            .upsert("a.md", "main", &doc("a.md", "a"), &rev(5))
            .unwrap();
        cache
            .upsert("b.md", "main", &doc("b.md", "b"), &rev(3))
            .unwrap();
        assert_eq!(cache.branch_marker("main").unwrap(), Some(rev(5)));
        assert_eq!(cache.branch_marker("other").unwrap(), None);
    }

    #[test]
    fn test_query_filters() {
        let cache = cache();
        cache
            .upsert("guide/intro.md", "main", &doc("guide/intro.md", INTRO), &rev(1))
            .unwrap();
        cache
            .upsert("reference/api.md", "main", &doc("reference/api.md", API), &rev(1))
            .unwrap();
        cache
            .upsert("guide/old.md", "main", &doc("guide/old.md", "# Old toolkit"), &rev(1))
            .unwrap();
        cache.invalidate("guide/old.md", "main", &rev(2)).unwrap();

        let all = cache
            .query(&CacheQuery::default(), Pagination::default())
            .unwrap();
        assert_eq!(all.total, 2);
        assert_eq!(all.items[0].path, "guide/intro.md");

        let text = CacheQuery {
            text: Some("TOOL config".into()),
            ..Default::default()
        };
        let page = cache.query(&text, Pagination::default()).unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].path, "guide/intro.md");

        let with_tombstones = CacheQuery {
            text: Some("toolkit".into()),
            include_tombstoned: true,
            ..Default::default()
        };
        assert_eq!(cache.query(&with_tombstones, Pagination::default()).unwrap().total, 2);

        let tag = CacheQuery {
            tag: Some("api".into()),
            ..Default::default()
        };
        let page = cache.query(&tag, Pagination::default()).unwrap();
        assert_eq!(page.items[0].path, "reference/api.md");

        let prefix = CacheQuery {
            path_prefix: Some("/guide/".into()),
            category: Some("guides".into()),
            team: Some("docs".into()),
            ..Default::default()
        };
        assert_eq!(cache.query(&prefix, Pagination::default()).unwrap().total, 1);

        let paged = cache
            .query(&CacheQuery::default(), Pagination::new(1, 1))
            .unwrap();
        assert_eq!(paged.total, 2);
        assert_eq!(paged.items.len(), 1);
        assert_eq!(paged.items[0].path, "reference/api.md");
    }

    #[test]
    fn test_stats() {
        let cache = cache();
        cache
            .upsert("guide/intro.md", "main", &doc("guide/intro.md", INTRO), &rev(1))
            .unwrap();
        cache
            .upsert("reference/api.md", "main", &doc("reference/api.md", API), &rev(1))
            .unwrap();
        cache.invalidate("reference/api.md", "main", &rev(2)).unwrap();

        let stats = cache.stats("main").unwrap();
        assert_eq!(stats.live, 1);
        assert_eq!(stats.tombstoned, 1);
        assert_eq!(stats.categories.get("guides"), Some(&1));
        assert_eq!(stats.categories.get("reference"), None);
        assert_eq!(stats.tags.get("setup"), Some(&1));
        assert!(stats.average_word_count > 0.0);
        assert!(stats.last_updated.is_some());

        let empty = cache.stats("nothing").unwrap();
        assert_eq!(empty.live, 0);
        assert_eq!(empty.last_updated, None);
    }

    #[test]
    fn test_is_fresh_and_live_paths() {
        let cache = cache();
        cache
            .upsert("guide/intro.md", "main", &doc("guide/intro.md", INTRO), &rev(1))
            .unwrap();
        assert!(cache.is_fresh("guide/intro.md", "main", &rev(1)).unwrap());
        assert!(!cache.is_fresh("guide/intro.md", "main", &rev(2)).unwrap());
        assert!(!cache.is_fresh("guide/none.md", "main", &rev(1)).unwrap());
        assert_eq!(cache.live_paths("main").unwrap(), vec!["guide/intro.md"]);
    }

    #[test]
    fn test_invalid_path_is_rejected() {
        let cache = cache();
        let err = cache.get("../etc/passwd", "main").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }
}
