//! Thin wrapper over the `git` command line.
//!
//! All comparisons in the analyzer are phrased against a single baseline
//! commit; this module finds that baseline and fetches old file contents
//! and diffs from it.

use std::path::Path;
use std::process::Command;

use crate::error::{Error, Result};

/// Runs `git` with the given arguments in `root` and returns trimmed stdout.
pub fn run(root: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(root)
        .output()
        .map_err(|e| Error::Git {
            args: args.join(" "),
            message: e.to_string(),
        })?;

    if !output.status.success() {
        return Err(Error::Git {
            args: args.join(" "),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Returns the merge-base commit between HEAD and `branch`.
///
/// When HEAD is already an ancestor of `branch` (re-running on a merged PR),
/// the plain merge base would be HEAD itself and every diff would be empty.
/// In that case the merge commit that brought HEAD into the branch is located
/// on the branch's first-parent line, and the merge base is recomputed
/// against that merge's first parent. Any failure in the refinement falls
/// back to the plain merge base.
pub fn merge_base(root: &Path, branch: &str) -> Result<String> {
    let base = run(root, &["merge-base", "HEAD", branch]).map_err(|e| Error::MergeBase {
        branch: branch.to_string(),
        message: e.to_string(),
    })?;

    let Ok(head) = run(root, &["rev-parse", "HEAD"]) else {
        return Ok(base);
    };

    if base == head {
        let range = format!("{head}..{branch}");
        let Ok(merge_list) = run(
            root,
            &[
                "log",
                "--ancestry-path",
                &range,
                "--merges",
                "--first-parent",
                "--reverse",
                "--pretty=%H",
            ],
        ) else {
            return Ok(base);
        };
        let Some(merge_commit) = merge_list.lines().next().filter(|l| !l.is_empty()) else {
            return Ok(base);
        };
        let parent_ref = format!("{merge_commit}^1");
        let Ok(first_parent) = run(root, &["rev-parse", &parent_ref]) else {
            return Ok(base);
        };
        let Ok(real_base) = run(root, &["merge-base", &head, &first_parent]) else {
            return Ok(base);
        };
        return Ok(real_base);
    }

    Ok(base)
}

/// Lists repo-relative paths changed since `commit`.
pub fn changed_files_since(root: &Path, commit: &str) -> Result<Vec<String>> {
    let raw = run(root, &["diff", "--name-only", commit])?;
    Ok(raw
        .lines()
        .filter(|l| !l.is_empty())
        .map(|l| l.to_string())
        .collect())
}

/// Unified diff for one path since `commit`.
pub fn diff_since_path(root: &Path, commit: &str, path: &str) -> Result<String> {
    run(root, &["diff", commit, "--", path])
}

/// Content of `path` at `commit`. A file that does not exist at that commit
/// is not an error; it yields empty content. Output is returned untrimmed so
/// line numbers in the old revision stay exact.
pub fn show_file(root: &Path, commit: &str, path: &str) -> String {
    let spec = format!("{commit}:{path}");
    let output = Command::new("git")
        .args(["show", &spec])
        .current_dir(root)
        .output();
    match output {
        Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout).into_owned(),
        _ => String::new(),
    }
}
