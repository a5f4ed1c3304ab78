use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::warn;

/// File name of the persisted structure inside a generated project root.
pub const STRUCTURE_FILE: &str = "project_structure.json";

/// Directory names that are never part of a project's own content.
pub const SKIP_DIRS: &[&str] = &[".git", "venv", "__pycache__"];

/// One declared file within a [`ProjectStructure`]: a relative path plus the
/// free-text description that guides its content generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSpec {
    pub path: String,
    #[serde(default)]
    pub description: String,
}

/// The in-memory description of a project's intended layout, parsed from
/// model output and persisted as `project_structure.json`.
///
/// Every field defaults to empty when absent from the model's JSON: a usable
/// partial structure beats a hard failure. Repair passes only ever extend a
/// structure, never remove from it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectStructure {
    pub name: String,
    pub description: String,
    pub folders: Vec<String>,
    pub files: Vec<FileSpec>,
    pub dependencies: BTreeSet<String>,
    pub dev_dependencies: BTreeSet<String>,
    pub commands: BTreeMap<String, String>,
}

impl ProjectStructure {
    /// Parses a structure from model-produced JSON and screens out declared
    /// paths that would escape the project root.
    pub fn from_json(json: &str) -> Result<Self> {
        let mut structure: Self = serde_json::from_str(json)
            .context("JSON does not describe a project structure")?;
        structure.screen_paths();
        Ok(structure)
    }

    /// Drops folders and files whose declared path is absolute, empty, or
    /// contains a parent-directory component. Remaining paths are guaranteed
    /// to stay inside the project root.
    pub fn screen_paths(&mut self) {
        self.folders.retain(|folder| {
            let keep = is_safe_relative_path(folder);
            if !keep {
                warn!(path = %folder, "dropping unsafe declared folder path");
            }
            keep
        });
        self.files.retain(|file| {
            let keep = is_safe_relative_path(&file.path);
            if !keep {
                warn!(path = %file.path, "dropping unsafe declared file path");
            }
            keep
        });
    }

    /// Looks up the declared description for a project-relative path.
    pub fn file_description(&self, rel_path: &str) -> Option<&str> {
        self.files
            .iter()
            .find(|f| f.path == rel_path)
            .map(|f| f.description.as_str())
    }

    pub fn file_paths(&self) -> Vec<&str> {
        self.files.iter().map(|f| f.path.as_str()).collect()
    }

    /// Persists the structure to `project_structure.json` in the project root.
    pub fn save(&self, project_root: &Path) -> Result<()> {
        let path = project_root.join(STRUCTURE_FILE);
        let json = serde_json::to_string_pretty(self).context("Failed to serialize structure")?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn load(project_root: &Path) -> Result<Self> {
        let path = project_root.join(STRUCTURE_FILE);
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Walks up from `start` looking for the nearest directory containing a
    /// `project_structure.json`, returning the project root and the parsed
    /// structure.
    pub fn find_from(start: &Path) -> Option<(PathBuf, Self)> {
        let mut dir = if start.is_dir() {
            start.to_path_buf()
        } else {
            start.parent()?.to_path_buf()
        };

        loop {
            if dir.join(STRUCTURE_FILE).is_file() {
                match Self::load(&dir) {
                    Ok(structure) => return Some((dir, structure)),
                    Err(_) => return None,
                }
            }
            if !dir.pop() {
                return None;
            }
        }
    }
}

/// True when `path` is a non-empty relative path that cannot traverse above
/// its root (no absolute prefix, no `..` components).
pub fn is_safe_relative_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    let p = Path::new(path);
    if p.is_absolute() {
        return false;
    }
    p.components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Extracts the bare package name from a version-qualified dependency string
/// such as `flask==3.0` or `requests>=2.31`.
pub fn dependency_base_name(dep: &str) -> &str {
    let dep = dep.trim();
    let end = dep
        .find(|c| matches!(c, '=' | '>' | '<' | '~' | '!' | '[' | ' '))
        .unwrap_or(dep.len());
    &dep[..end]
}

/// Builds a structure by scanning an existing project directory, used when no
/// `project_structure.json` is present. Hidden entries and bookkeeping
/// directories are skipped.
pub fn scan_project(project_root: &Path) -> Result<ProjectStructure> {
    let name = project_root
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("project")
        .to_string();

    let mut structure = ProjectStructure {
        description: format!("Existing project {name}"),
        name,
        ..Default::default()
    };

    scan_dir(project_root, project_root, &mut structure)?;
    structure.folders.sort();
    structure.files.sort_by(|a, b| a.path.cmp(&b.path));

    let requirements = project_root.join("requirements.txt");
    if requirements.is_file() {
        let content = fs::read_to_string(&requirements)
            .with_context(|| format!("Failed to read {}", requirements.display()))?;
        structure.dependencies = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect();
    }

    Ok(structure)
}

fn scan_dir(root: &Path, current: &Path, structure: &mut ProjectStructure) -> Result<()> {
    let entries = fs::read_dir(current)
        .with_context(|| format!("Failed to read directory: {}", current.display()))?;

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();

        if name.starts_with('.') || SKIP_DIRS.contains(&name.as_str()) {
            continue;
        }

        let rel = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .to_string_lossy()
            .to_string();

        if path.is_dir() {
            structure.folders.push(rel);
            scan_dir(root, &path, structure)?;
        } else if path.is_file() {
            structure.files.push(FileSpec {
                description: format!("Project file {rel}"),
                path: rel,
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_default_to_empty() {
        let structure = ProjectStructure::from_json(r#"{"name": "demo"}"#).unwrap();
        assert_eq!(structure.name, "demo");
        assert!(structure.description.is_empty());
        assert!(structure.folders.is_empty());
        assert!(structure.files.is_empty());
        assert!(structure.dependencies.is_empty());
        assert!(structure.commands.is_empty());
    }

    #[test]
    fn test_screening_drops_traversal_paths() {
        let structure = ProjectStructure::from_json(
            r#"{
                "name": "demo",
                "folders": ["src", "../outside", "/abs"],
                "files": [
                    {"path": "src/main.py", "description": "entry"},
                    {"path": "../../etc/passwd", "description": "bad"},
                    {"path": "", "description": "empty"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(structure.folders, vec!["src".to_string()]);
        assert_eq!(structure.file_paths(), vec!["src/main.py"]);
    }

    #[test]
    fn test_is_safe_relative_path() {
        assert!(is_safe_relative_path("src/app.py"));
        assert!(is_safe_relative_path("./docs/readme.md"));
        assert!(!is_safe_relative_path("/etc/passwd"));
        assert!(!is_safe_relative_path("src/../../escape"));
        assert!(!is_safe_relative_path("  "));
    }

    #[test]
    fn test_dependency_base_name() {
        assert_eq!(dependency_base_name("flask==3.0"), "flask");
        assert_eq!(dependency_base_name("requests>=2.31"), "requests");
        assert_eq!(dependency_base_name("uvicorn[standard]~=0.30"), "uvicorn");
        assert_eq!(dependency_base_name("pyyaml"), "pyyaml");
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let structure = ProjectStructure {
            name: "demo".to_string(),
            files: vec![FileSpec {
                path: "app.py".to_string(),
                description: "entry point".to_string(),
            }],
            dependencies: ["flask==3.0".to_string()].into(),
            ..Default::default()
        };

        structure.save(dir.path()).unwrap();
        let loaded = ProjectStructure::load(dir.path()).unwrap();
        assert_eq!(loaded.name, "demo");
        assert_eq!(loaded.files, structure.files);
        assert_eq!(loaded.dependencies, structure.dependencies);
    }

    #[test]
    fn test_find_from_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("proj");
        let nested = root.join("src").join("pkg");
        fs::create_dir_all(&nested).unwrap();

        let structure = ProjectStructure {
            name: "proj".to_string(),
            ..Default::default()
        };
        structure.save(&root).unwrap();

        let (found_root, found) = ProjectStructure::find_from(&nested.join("mod.py")).unwrap();
        assert_eq!(found_root, root);
        assert_eq!(found.name, "proj");
    }

    #[test]
    fn test_scan_project_infers_structure() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join("src/app.py"), "print('hi')\n").unwrap();
        fs::write(dir.path().join("requirements.txt"), "flask==3.0\n").unwrap();
        fs::write(dir.path().join(".git/config"), "").unwrap();

        let structure = scan_project(dir.path()).unwrap();
        assert_eq!(structure.folders, vec!["src".to_string()]);
        assert!(structure.file_paths().contains(&"src/app.py"));
        assert!(!structure.file_paths().iter().any(|p| p.contains(".git")));
        assert!(structure.dependencies.contains("flask==3.0"));
    }
}
