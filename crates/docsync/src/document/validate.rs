//! Boundary validation for document paths and branch names.

use thiserror::Error;

/// Malformed input rejected before it reaches the workflow or the cache.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Path cannot be empty")]
    EmptyPath,

    #[error("Path cannot contain null bytes")]
    NullByte,

    #[error("Path cannot contain parent directory references (..)")]
    ParentReference,

    #[error("Path cannot contain character: {0}")]
    InvalidCharacter(char),

    #[error("Path cannot contain consecutive slashes")]
    ConsecutiveSlashes,

    #[error("Path cannot end with /")]
    TrailingSlash,

    #[error("Invalid branch name '{0}'")]
    InvalidBranch(String),

    #[error("{field} {reason}")]
    Field {
        field: &'static str,
        reason: &'static str,
    },
}

const INVALID_CHARS: [char; 7] = ['<', '>', ':', '"', '|', '?', '*'];

/// Validates `path` and returns its canonical key form.
///
/// A single leading `/` is dropped, so `/guide/intro` and `guide/intro`
/// address the same document.
pub fn normalize_path(path: &str) -> Result<String, ValidationError> {
    if path.contains('\0') {
        return Err(ValidationError::NullByte);
    }
    let path = path.strip_prefix('/').unwrap_or(path);
    if path.is_empty() {
        return Err(ValidationError::EmptyPath);
    }
    if path.contains("..") {
        return Err(ValidationError::ParentReference);
    }
    if let Some(c) = path.chars().find(|c| INVALID_CHARS.contains(c)) {
        return Err(ValidationError::InvalidCharacter(c));
    }
    if path.contains("//") || path.starts_with('/') {
        return Err(ValidationError::ConsecutiveSlashes);
    }
    if path.ends_with('/') {
        return Err(ValidationError::TrailingSlash);
    }
    Ok(path.to_string())
}

/// Validates a branch name using git's ref-name rules that matter here.
pub fn validate_branch(branch: &str) -> Result<(), ValidationError> {
    let invalid = branch.is_empty()
        || branch.starts_with('-')
        || branch.starts_with('/')
        || branch.ends_with('/')
        || branch.ends_with(".lock")
        || branch.contains("..")
        || branch.contains("//")
        || branch.contains("@{")
        || branch
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || "~^:?*[\\".contains(c));
    if invalid {
        return Err(ValidationError::InvalidBranch(branch.to_string()));
    }
    Ok(())
}

/// Rejects empty or whitespace-only values for a required field.
pub fn require_non_empty(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Field {
            field,
            reason: "cannot be empty",
        });
    }
    Ok(())
}
