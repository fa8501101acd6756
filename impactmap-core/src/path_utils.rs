//! Shared path utilities.

use std::path::{Component, Path, PathBuf};

/// Lexically normalizes a path: resolves `.` and `..` components without
/// touching the filesystem. Leading `..` components that cannot be resolved
/// are kept.
pub fn normalize(path: &Path) -> PathBuf {
    let mut parts: Vec<std::ffi::OsString> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(parts.last(), Some(last) if last != "..");
                if popped {
                    parts.pop();
                } else {
                    parts.push("..".into());
                }
            }
            Component::Normal(name) => parts.push(name.to_os_string()),
            Component::RootDir | Component::Prefix(_) => {}
        }
    }
    parts.iter().collect()
}

/// Joins `dir` and a relative specifier, normalized, as a forward-slash
/// string. Used for stems and style-file keys that are compared textually.
pub fn join_relative(dir: &str, rel: &str) -> String {
    let joined = Path::new(dir).join(rel);
    normalize(&joined).to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_resolves_parents() {
        assert_eq!(
            normalize(Path::new("common/temp/default/../../../apps/dash")),
            PathBuf::from("apps/dash")
        );
    }

    #[test]
    fn test_join_relative() {
        assert_eq!(join_relative("src/components", "../styles/main.scss"), "src/styles/main.scss");
        assert_eq!(join_relative("src", "./Button"), "src/Button");
    }
}
