//! The document model: front-matter, derived metadata and path rules.
//!
//! Documents are never stored on their own; they are read from the
//! repository and denormalized into [`DocumentMetadata`] for the cache.

pub mod frontmatter;
pub mod markdown;
pub mod validate;

use serde::{Deserialize, Serialize};

use crate::gateway::path_under;

pub use frontmatter::{FrontMatter, MetaValue};
pub use validate::{normalize_path, validate_branch, ValidationError};

/// Maximum description length taken from the body excerpt.
const DESCRIPTION_MAX_CHARS: usize = 200;

/// Metadata derived from a document's front-matter and body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    pub title: String,
    pub slug: String,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub team: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub version: Option<String>,
    pub word_count: u32,
    pub reading_time: u32,
    /// The full parsed front-matter.
    pub front_matter: FrontMatter,
}

impl DocumentMetadata {
    /// Derives metadata from the raw file content at `path`.
    pub fn from_content(path: &str, content: &str) -> Self {
        let (front_matter, body) = frontmatter::extract(content);
        let plain = markdown::strip_markdown(body);
        let words = markdown::word_count(&plain);

        let text = |key: &str| front_matter.get(key).and_then(MetaValue::to_text);

        let title = text("title")
            .filter(|t| !t.trim().is_empty())
            .or_else(|| markdown::first_heading(body))
            .unwrap_or_else(|| file_stem(path).to_string());
        let slug = text("slug")
            .map(|s| markdown::slugify(&s))
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| markdown::slugify(&title));
        let description = text("description").or_else(|| {
            let excerpt = markdown::excerpt(&plain, DESCRIPTION_MAX_CHARS);
            (!excerpt.is_empty()).then_some(excerpt)
        });

        Self {
            slug,
            category: text("category"),
            tags: front_matter
                .get("tags")
                .map(MetaValue::to_string_list)
                .unwrap_or_default(),
            team: text("team"),
            description,
            author: text("author"),
            version: text("version"),
            word_count: u32::try_from(words).unwrap_or(u32::MAX),
            reading_time: markdown::reading_time(words),
            title,
            front_matter,
        }
    }

    /// Search tokens for this document.
    pub fn search_tokens(&self, content: &str) -> Vec<String> {
        let (_, body) = frontmatter::extract(content);
        let plain = markdown::strip_markdown(body);
        let mut sources: Vec<&str> = vec![self.title.as_str()];
        if let Some(description) = &self.description {
            sources.push(description);
        }
        sources.extend(self.tags.iter().map(String::as_str));
        sources.push(&plain);
        markdown::tokenize(sources)
    }
}

/// File name without directories or extension.
pub fn file_stem(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

/// Extension of the file name, without the dot.
pub fn extension(path: &str) -> Option<&str> {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
}

/// Which repository files are documents: those under `docs_root` with a
/// tracked extension (compared case-insensitively).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentScope {
    pub docs_root: String,
    pub extensions: Vec<String>,
}

impl DocumentScope {
    pub fn new(docs_root: impl Into<String>, extensions: Vec<String>) -> Self {
        Self {
            docs_root: docs_root.into(),
            extensions,
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        path_under(path, &self.docs_root)
            && extension(path).is_some_and(|ext| {
                self.extensions
                    .iter()
                    .any(|tracked| tracked.eq_ignore_ascii_case(ext))
            })
    }
}

impl Default for DocumentScope {
    fn default() -> Self {
        Self::new("", vec!["md".to_string(), "mdx".to_string()])
    }
}
