#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use impactmap_core::analyzer::BaselineSource;
use impactmap_core::workspace::{PackageManifest, Project, ProjectInfo};

/// Writes a file under `root`, creating parent directories.
pub fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

/// In-memory baseline contents keyed by repo-relative path.
pub struct MemoryBaseline(pub HashMap<String, String>);

impl MemoryBaseline {
    pub fn empty() -> Self {
        Self(HashMap::new())
    }

    pub fn with(files: &[(&str, &str)]) -> Self {
        Self(
            files
                .iter()
                .map(|(path, content)| (path.to_string(), content.to_string()))
                .collect(),
        )
    }
}

impl BaselineSource for MemoryBaseline {
    fn file_at_base(&self, path: &str) -> Option<String> {
        self.0.get(path).cloned()
    }
}

pub fn project(name: &str, folder: &str) -> Project {
    Project {
        package_name: name.to_string(),
        project_folder: folder.to_string(),
        subspace_name: None,
    }
}

/// A library manifest: publishes `module`, so it gets export analysis.
pub fn library_manifest(name: &str, workspace_deps: &[&str]) -> PackageManifest {
    let mut manifest = PackageManifest {
        name: name.to_string(),
        module: "esm/index.js".to_string(),
        ..Default::default()
    };
    for dep in workspace_deps {
        manifest
            .dependencies
            .insert(dep.to_string(), "workspace:*".to_string());
    }
    manifest
}

/// An app manifest: no types/exports/module fields.
pub fn app_manifest(name: &str, workspace_deps: &[&str]) -> PackageManifest {
    let mut manifest = PackageManifest {
        name: name.to_string(),
        ..Default::default()
    };
    for dep in workspace_deps {
        manifest
            .dependencies
            .insert(dep.to_string(), "workspace:*".to_string());
    }
    manifest
}

pub fn project_info(name: &str, folder: &str, manifest: PackageManifest, deps: &[&str]) -> ProjectInfo {
    ProjectInfo::new(
        project(name, folder),
        manifest,
        deps.iter().map(|d| d.to_string()).collect(),
    )
}
