//! Unified-diff parsing.
//!
//! Only the new-side line coordinates matter here: changed line ranges are
//! later intersected with symbol spans and lockfile line maps, both of which
//! are read from the current working tree.

use regex::Regex;

/// A 1-based inclusive line range in the new revision of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRange {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone)]
pub struct FileDiff {
    pub path: String,
    pub changed_lines: Vec<LineRange>,
}

fn hunk_header_regex() -> Regex {
    // @@ -a,b +c,d @@; the old-side coordinates are irrelevant.
    Regex::new(r"^@@ -\d+(?:,\d+)? \+(\d+)(?:,(\d+))? @@").expect("valid hunk regex")
}

/// Parses a unified diff into per-file changed line ranges (new side).
/// A hunk `@@ -a,b +c,d @@` yields `[c, c + max(d, 1) - 1]`; an omitted `d`
/// is treated as 1.
pub fn parse_files(diff: &str) -> Vec<FileDiff> {
    let hunk_re = hunk_header_regex();
    let mut result: Vec<FileDiff> = Vec::new();

    for line in diff.lines() {
        if let Some(path) = line.strip_prefix("+++ b/") {
            result.push(FileDiff {
                path: path.to_string(),
                changed_lines: Vec::new(),
            });
            continue;
        }
        let Some(current) = result.last_mut() else {
            continue;
        };
        if let Some(caps) = hunk_re.captures(line) {
            let start: usize = caps[1].parse().unwrap_or(0);
            if start == 0 {
                continue;
            }
            let count: usize = caps
                .get(2)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(1)
                .max(1);
            current.changed_lines.push(LineRange {
                start,
                end: start + count - 1,
            });
        }
    }
    result
}

/// Extracts the new-side line numbers of added lines from a unified diff,
/// tracking position through context lines between hunk headers.
pub fn parse_changed_lines(diff: &str) -> Vec<usize> {
    let hunk_re = hunk_header_regex();
    let mut result = Vec::new();
    let mut new_line = 0usize;

    for line in diff.lines() {
        if line.starts_with("@@") {
            if let Some(caps) = hunk_re.captures(line) {
                let start: usize = caps[1].parse().unwrap_or(0);
                if start > 0 {
                    new_line = start - 1;
                }
            }
            continue;
        }
        if new_line == 0 {
            continue;
        }
        if line.starts_with('-') {
            continue;
        }
        new_line += 1;
        if line.starts_with('+') {
            result.push(new_line);
        }
    }
    result
}
