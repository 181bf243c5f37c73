//! Git output parsing helpers.

use std::process::Output;

use super::types::{EntryKind, TreeEntry};

/// Formats a git error with both stdout and stderr for better debugging.
pub fn format_git_error(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();

    match (stderr.is_empty(), stdout.is_empty()) {
        (true, true) => format!(
            "Command failed with exit code {}",
            output.status.code().unwrap_or(-1)
        ),
        (true, false) => stdout,
        (false, true) => stderr,
        (false, false) => format!("{}\n{}", stderr, stdout),
    }
}

/// Parses `git ls-tree -r -t` output.
///
/// Each line is `<mode> SP <type> SP <object> TAB <path>`. Submodules
/// (`commit` objects) are skipped.
pub fn parse_ls_tree(output: &str) -> Vec<TreeEntry> {
    output
        .lines()
        .filter_map(|line| {
            let (meta, path) = line.split_once('\t')?;
            let kind = match meta.split_whitespace().nth(1)? {
                "blob" => EntryKind::File,
                "tree" => EntryKind::Directory,
                _ => return None,
            };
            Some(TreeEntry {
                path: path.to_string(),
                kind,
            })
        })
        .collect()
}

/// Parses the first line of stdout as an unsigned integer (`rev-list --count`).
pub fn parse_count(output: &str) -> Option<u64> {
    output.lines().next()?.trim().parse().ok()
}

/// Returns the first line of stdout, trimmed (object ids from plumbing commands).
pub fn first_line(output: &[u8]) -> String {
    String::from_utf8_lossy(output)
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .to_string()
}
