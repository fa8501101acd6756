//! Workspace model: manifest loading and the project dependency graph.

use std::fs;
use std::path::{Path, PathBuf};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Deserialize;
use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::project_config::IgnoreSet;

/// One entry of the workspace manifest.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub package_name: String,
    pub project_folder: String,
    #[serde(default)]
    pub subspace_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct WorkspaceManifest {
    projects: Vec<Project>,
}

/// The parts of `package.json` the analyzer reads.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub main: String,
    #[serde(default)]
    pub module: String,
    #[serde(default)]
    pub browser: String,
    #[serde(default)]
    pub types: String,
    #[serde(default)]
    pub exports: Option<serde_json::Value>,
    #[serde(default)]
    pub dependencies: FxHashMap<String, String>,
    #[serde(default)]
    pub dev_dependencies: FxHashMap<String, String>,
}

impl PackageManifest {
    /// Libraries publish `types`, `exports` or `module` and get symbol-level
    /// export analysis; everything else is an app, treated atomically.
    pub fn is_library(&self) -> bool {
        !self.types.is_empty() || self.exports.is_some() || !self.module.is_empty()
    }

    /// Direct dependency names whose version is not a workspace marker.
    pub fn external_deps(&self) -> FxHashSet<String> {
        self.dependencies
            .iter()
            .chain(self.dev_dependencies.iter())
            .filter(|(_, version)| !version.starts_with("workspace:"))
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// A project with its manifest and resolved workspace dependencies.
#[derive(Debug, Clone)]
pub struct ProjectInfo {
    pub project: Project,
    pub manifest: PackageManifest,
    /// Package names of workspace projects this project depends on.
    pub depends_on: SmallVec<[String; 4]>,
}

impl ProjectInfo {
    pub fn new(project: Project, manifest: PackageManifest, depends_on: Vec<String>) -> Self {
        Self {
            project,
            manifest,
            depends_on: SmallVec::from_vec(depends_on),
        }
    }

    pub fn name(&self) -> &str {
        &self.project.package_name
    }

    pub fn folder(&self) -> &str {
        &self.project.project_folder
    }

    pub fn subspace(&self) -> &str {
        self.project.subspace_name.as_deref().unwrap_or("default")
    }
}

/// The loaded workspace: projects plus the dependency graph over them.
/// Edge direction is dependent → dependency.
pub struct Workspace {
    projects: Vec<ProjectInfo>,
    name_to_id: FxHashMap<String, usize>,
    graph: DiGraph<usize, ()>,
    nodes: Vec<NodeIndex>,
}

impl Workspace {
    /// Loads the workspace manifest (`rush.json`, JSON with comments and
    /// trailing commas permitted) and every project's `package.json`.
    /// Unreadable project manifests degrade to an empty manifest; a missing
    /// or unparseable workspace manifest is fatal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WorkspaceManifest`] when `rush.json` cannot be read
    /// or parsed.
    pub fn load(root: &Path) -> Result<Self> {
        let manifest_path = root.join("rush.json");
        let data = fs::read_to_string(&manifest_path)
            .map_err(|_| Error::WorkspaceManifest(manifest_path.clone()))?;
        let cleaned = strip_json_comments(&data);
        let manifest: WorkspaceManifest = serde_json::from_str(&cleaned)
            .map_err(|_| Error::WorkspaceManifest(manifest_path))?;

        let package_set: FxHashSet<&str> = manifest
            .projects
            .iter()
            .map(|p| p.package_name.as_str())
            .collect();

        let mut projects = Vec::with_capacity(manifest.projects.len());
        for project in &manifest.projects {
            let pkg_path = root.join(&project.project_folder).join("package.json");
            let pkg = fs::read_to_string(&pkg_path)
                .ok()
                .and_then(|data| serde_json::from_str::<PackageManifest>(&data).ok())
                .unwrap_or_default();

            let mut depends_on: SmallVec<[String; 4]> = SmallVec::new();
            for (dep, version) in pkg.dependencies.iter().chain(pkg.dev_dependencies.iter()) {
                if version.starts_with("workspace:") && package_set.contains(dep.as_str()) {
                    depends_on.push(dep.clone());
                }
            }
            depends_on.sort();
            depends_on.dedup();

            projects.push(ProjectInfo {
                project: project.clone(),
                manifest: pkg,
                depends_on,
            });
        }

        Ok(Self::new(projects))
    }

    /// Builds the workspace from already-loaded project records. Dependency
    /// edges are taken from each project's `depends_on` list; names not
    /// present in the set are skipped.
    pub fn new(projects: Vec<ProjectInfo>) -> Self {
        let mut name_to_id = FxHashMap::default();
        for (id, info) in projects.iter().enumerate() {
            name_to_id.insert(info.name().to_string(), id);
        }

        let mut graph = DiGraph::with_capacity(projects.len(), projects.len() * 2);
        let nodes: Vec<NodeIndex> = (0..projects.len()).map(|id| graph.add_node(id)).collect();
        for (id, info) in projects.iter().enumerate() {
            for dep in &info.depends_on {
                if let Some(&dep_id) = name_to_id.get(dep) {
                    graph.add_edge(nodes[id], nodes[dep_id], ());
                }
            }
        }

        Self {
            projects,
            name_to_id,
            graph,
            nodes,
        }
    }

    pub fn projects(&self) -> &[ProjectInfo] {
        &self.projects
    }

    pub fn project(&self, name: &str) -> Option<&ProjectInfo> {
        self.name_to_id.get(name).map(|&id| &self.projects[id])
    }

    /// Direct dependents of a package (packages that depend on it).
    pub fn dependents(&self, name: &str) -> Vec<&str> {
        let Some(&id) = self.name_to_id.get(name) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(self.nodes[id], Direction::Incoming)
            .map(|idx| self.projects[self.graph[idx]].name())
            .collect()
    }

    /// Direct dependencies of a package within the workspace.
    pub fn dependencies(&self, name: &str) -> Vec<&str> {
        let Some(&id) = self.name_to_id.get(name) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(self.nodes[id], Direction::Outgoing)
            .map(|idx| self.projects[self.graph[idx]].name())
            .collect()
    }

    /// All packages that transitively depend on any seed, seeds included.
    pub fn transitive_dependents(&self, seeds: &[String]) -> FxHashSet<String> {
        self.closure(seeds, Direction::Incoming)
    }

    /// All packages any seed transitively depends on, seeds included.
    pub fn transitive_dependencies(&self, seeds: &[String]) -> FxHashSet<String> {
        self.closure(seeds, Direction::Outgoing)
    }

    fn closure(&self, seeds: &[String], direction: Direction) -> FxHashSet<String> {
        let mut visited: FxHashSet<String> = FxHashSet::default();
        let mut queue: Vec<usize> = Vec::new();
        for seed in seeds {
            if let Some(&id) = self.name_to_id.get(seed) {
                if visited.insert(seed.clone()) {
                    queue.push(id);
                }
            }
        }
        while let Some(id) = queue.pop() {
            for neighbor in self.graph.neighbors_directed(self.nodes[id], direction) {
                let neighbor_id = self.graph[neighbor];
                let name = self.projects[neighbor_id].name();
                if visited.insert(name.to_string()) {
                    queue.push(neighbor_id);
                }
            }
        }
        visited
    }

    /// Partitions `packages` into topological levels: level i holds the
    /// projects all of whose in-set dependencies sit in earlier levels.
    /// When a cycle prevents progress the remainder is flushed as one final
    /// level rather than deadlocking.
    pub fn topological_levels(&self, packages: &FxHashSet<String>) -> Vec<Vec<String>> {
        let mut in_degree: FxHashMap<&str, usize> = FxHashMap::default();
        for name in packages {
            let Some(info) = self.project(name) else {
                continue;
            };
            let degree = info
                .depends_on
                .iter()
                .filter(|dep| packages.contains(*dep))
                .count();
            in_degree.insert(info.name(), degree);
        }

        let mut remaining: FxHashSet<&str> = in_degree.keys().copied().collect();
        let mut levels: Vec<Vec<String>> = Vec::new();

        while !remaining.is_empty() {
            let mut level: Vec<&str> = remaining
                .iter()
                .filter(|name| in_degree[*name] == 0)
                .copied()
                .collect();
            if level.is_empty() {
                // Cycle: flush the residue in one level.
                level = remaining.iter().copied().collect();
            }
            level.sort_unstable();

            for name in &level {
                remaining.remove(name);
                for dependent in self.dependents(name) {
                    if remaining.contains(dependent) {
                        *in_degree.get_mut(dependent).expect("dependent tracked") -= 1;
                    }
                }
            }
            levels.push(level.into_iter().map(|s| s.to_string()).collect());
        }

        levels
    }

    /// Projects containing at least one changed file that their ignore
    /// config does not exclude.
    pub fn find_changed_projects(
        &self,
        changed_files: &[String],
        ignores: &FxHashMap<String, IgnoreSet>,
    ) -> FxHashSet<String> {
        let mut result = FxHashSet::default();
        for file in changed_files {
            if file.is_empty() {
                continue;
            }
            for info in &self.projects {
                let Some(rel) = file.strip_prefix(&format!("{}/", info.folder())) else {
                    continue;
                };
                let ignored = ignores
                    .get(info.folder())
                    .is_some_and(|set| set.is_ignored(rel))
                    || rel == crate::project_config::CONFIG_FILE_NAME;
                if !ignored {
                    result.insert(info.name().to_string());
                }
                break;
            }
        }
        result
    }

    /// Subspace names present in the workspace; projects without an explicit
    /// subspace belong to `default`.
    pub fn subspaces(&self) -> FxHashSet<String> {
        let mut result: FxHashSet<String> =
            self.projects.iter().map(|p| p.subspace().to_string()).collect();
        result.insert("default".to_string());
        result
    }

    /// The lockfile path for a subspace.
    pub fn lockfile_path(subspace: &str) -> PathBuf {
        PathBuf::from("common")
            .join("config")
            .join("subspaces")
            .join(subspace)
            .join("pnpm-lock.yaml")
    }
}

/// Strips `//` and `/* */` comments plus trailing commas from JSON text,
/// leaving string contents untouched.
pub fn strip_json_comments(data: &str) -> String {
    let mut result: Vec<String> = Vec::new();
    let mut in_block_comment = false;

    for raw_line in data.lines() {
        let mut line = raw_line;
        if in_block_comment {
            match line.find("*/") {
                Some(idx) => {
                    line = &line[idx + 2..];
                    in_block_comment = false;
                }
                None => continue,
            }
        }

        let bytes = line.as_bytes();
        let mut cleaned: Vec<u8> = Vec::with_capacity(line.len());
        let mut in_string = false;
        let mut escaped = false;
        let mut i = 0;
        while i < bytes.len() {
            let ch = bytes[i];
            if escaped {
                cleaned.push(ch);
                escaped = false;
                i += 1;
                continue;
            }
            if in_string {
                cleaned.push(ch);
                if ch == b'\\' {
                    escaped = true;
                } else if ch == b'"' {
                    in_string = false;
                }
                i += 1;
                continue;
            }
            if ch == b'"' {
                in_string = true;
                cleaned.push(ch);
                i += 1;
                continue;
            }
            if ch == b'/' && i + 1 < bytes.len() {
                if bytes[i + 1] == b'/' {
                    break;
                }
                if bytes[i + 1] == b'*' {
                    match line[i + 2..].find("*/") {
                        Some(end) => {
                            i = i + 2 + end + 2;
                            continue;
                        }
                        None => {
                            in_block_comment = true;
                            break;
                        }
                    }
                }
            }
            cleaned.push(ch);
            i += 1;
        }
        result.push(String::from_utf8_lossy(&cleaned).into_owned());
    }

    let joined = result.join("\n");
    let trailing_comma = regex::Regex::new(r",\s*([\]}])").expect("valid regex");
    trailing_comma.replace_all(&joined, "$1").into_owned()
}
