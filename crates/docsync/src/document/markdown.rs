//! Markdown text utilities: plain-text extraction, search tokens, slugs.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

// Pre-compiled patterns, applied in this order by `strip_markdown`.
static RE_FENCED_CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"```[\s\S]*?```").unwrap());
static RE_INLINE_CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`[^`]+`").unwrap());
static RE_HEADING_MARK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#{1,6}\s+").unwrap());
static RE_BOLD_STAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*([^*]+)\*\*").unwrap());
static RE_BOLD_UNDERSCORE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"__([^_]+)__").unwrap());
static RE_ITALIC_STAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*([^*]+)\*").unwrap());
static RE_ITALIC_UNDERSCORE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_([^_]+)_").unwrap());
static RE_IMAGE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"!\[([^\]]*)\]\([^)]+\)").unwrap());
static RE_LINK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^)]+\)").unwrap());
static RE_BULLET: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^[ \t]*[-*+][ \t]+").unwrap());
static RE_NUMBERED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^[ \t]*\d+\.[ \t]+").unwrap());
static RE_QUOTE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^[ \t]*>[ \t]+").unwrap());
static RE_BLANK_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());
static RE_H1: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^#[ \t]+(.+?)[ \t#]*$").unwrap());
static RE_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[[:alnum:]]+").unwrap());
static RE_SLUG_DROP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9\s-]").unwrap());
static RE_SLUG_SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\s-]+").unwrap());

/// Words read per minute for reading-time estimates.
pub const WORDS_PER_MINUTE: usize = 200;

/// Upper bound on search tokens kept per document.
pub const MAX_TOKENS: usize = 2048;

/// Strips markdown formatting, keeping the readable text.
pub fn strip_markdown(text: &str) -> String {
    let text = RE_FENCED_CODE.replace_all(text, "");
    let text = RE_INLINE_CODE.replace_all(&text, "");
    let text = RE_HEADING_MARK.replace_all(&text, "");
    let text = RE_BOLD_STAR.replace_all(&text, "$1");
    let text = RE_BOLD_UNDERSCORE.replace_all(&text, "$1");
    let text = RE_ITALIC_STAR.replace_all(&text, "$1");
    let text = RE_ITALIC_UNDERSCORE.replace_all(&text, "$1");
    let text = RE_IMAGE.replace_all(&text, "");
    let text = RE_LINK.replace_all(&text, "$1");
    let text = RE_BULLET.replace_all(&text, "");
    let text = RE_NUMBERED.replace_all(&text, "");
    let text = RE_QUOTE.replace_all(&text, "");
    let text = RE_BLANK_RUNS.replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// Counts whitespace-separated words in already-stripped text.
pub fn word_count(plain: &str) -> usize {
    plain.split_whitespace().count()
}

/// Reading time in minutes, rounded, at least one.
pub fn reading_time(words: usize) -> u32 {
    let minutes = (words as f64 / WORDS_PER_MINUTE as f64).round() as u32;
    minutes.max(1)
}

/// First paragraph of already-stripped text, cut at a word boundary.
pub fn excerpt(plain: &str, max_chars: usize) -> String {
    let first = plain.split("\n\n").next().unwrap_or_default().trim();
    if first.chars().count() <= max_chars {
        return first.to_string();
    }

    let cut: String = first.chars().take(max_chars).collect();
    let head = match cut.rsplit_once(' ') {
        Some((head, _)) => head,
        None => cut.as_str(),
    };
    format!("{}...", head.trim_end())
}

/// Text of the first level-one heading, if any.
pub fn first_heading(body: &str) -> Option<String> {
    RE_H1
        .captures(body)
        .map(|c| c[1].trim().to_string())
        .filter(|t| !t.is_empty())
}

/// URL-friendly slug: lowercase ASCII letters, digits and single hyphens.
pub fn slugify(text: &str) -> String {
    let lower = text.to_lowercase();
    let cleaned = RE_SLUG_DROP.replace_all(&lower, "");
    let hyphenated = RE_SLUG_SPACE.replace_all(cleaned.trim(), "-");
    hyphenated.trim_matches('-').to_string()
}

/// Collects lower-cased alphanumeric words of length two or more from every
/// source, deduplicated in first-seen order and capped at [`MAX_TOKENS`].
pub fn tokenize<'a>(sources: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut tokens = Vec::new();
    for source in sources {
        for word in RE_WORD.find_iter(source) {
            let token = word.as_str().to_lowercase();
            if token.chars().count() < 2 || !seen.insert(token.clone()) {
                continue;
            }
            tokens.push(token);
            if tokens.len() == MAX_TOKENS {
                return tokens;
            }
        }
    }
    tokens
}

/// Splits free-text search input into the terms matched against tokens.
pub fn query_terms(query: &str) -> Vec<String> {
    RE_WORD
        .find_iter(query)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}
