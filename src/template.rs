use crate::project::{scan_project, ProjectStructure, STRUCTURE_FILE};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// A reusable named template: a stored project structure plus a description,
/// offered to the model as additional context during structure generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub structure: ProjectStructure,
}

/// Summary entry for template listings.
#[derive(Debug, Clone)]
pub struct TemplateSummary {
    pub name: String,
    pub description: String,
    pub file: PathBuf,
}

impl Template {
    pub fn path_for(templates_dir: &Path, name: &str) -> PathBuf {
        templates_dir.join(format!("{name}.yaml"))
    }

    /// Loads a named template. A missing or malformed template degrades to
    /// `None`: generation proceeds without template context rather than
    /// failing.
    pub fn load(templates_dir: &Path, name: &str) -> Option<Self> {
        let path = Self::path_for(templates_dir, name);
        if !path.is_file() {
            warn!(template = name, path = %path.display(), "template not found");
            return None;
        }

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                warn!(template = name, error = %e, "failed to read template");
                return None;
            }
        };

        match serde_yaml::from_str(&content) {
            Ok(template) => Some(template),
            Err(e) => {
                warn!(template = name, error = %e, "malformed template ignored");
                None
            }
        }
    }

    pub fn save(&self, templates_dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(templates_dir).with_context(|| {
            format!("Failed to create templates directory: {}", templates_dir.display())
        })?;

        let path = Self::path_for(templates_dir, &self.name);
        let yaml = serde_yaml::to_string(self).context("Failed to serialize template")?;
        fs::write(&path, yaml)
            .with_context(|| format!("Failed to write template: {}", path.display()))?;
        Ok(path)
    }
}

/// Saves an existing project as a named template, using its persisted
/// structure when available and a directory scan otherwise.
pub fn save_from_project(
    project_path: &Path,
    templates_dir: &Path,
    template_name: &str,
) -> Result<PathBuf> {
    if !project_path.exists() {
        anyhow::bail!("project does not exist: {}", project_path.display());
    }

    let structure = if project_path.join(STRUCTURE_FILE).is_file() {
        ProjectStructure::load(project_path)?
    } else {
        scan_project(project_path)?
    };

    let template = Template {
        name: template_name.to_string(),
        description: if structure.description.is_empty() {
            format!("Template based on {}", project_path.display())
        } else {
            structure.description.clone()
        },
        structure,
    };

    template.save(templates_dir)
}

/// Lists all readable templates in a directory. Unreadable or malformed
/// entries are skipped with a warning.
pub fn list_templates(templates_dir: &Path) -> Vec<TemplateSummary> {
    let entries = match fs::read_dir(templates_dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut templates = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("yaml") {
            continue;
        }

        let fallback_name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();

        match fs::read_to_string(&path)
            .map_err(anyhow::Error::from)
            .and_then(|content| serde_yaml::from_str::<Template>(&content).map_err(Into::into))
        {
            Ok(template) => templates.push(TemplateSummary {
                name: if template.name.is_empty() {
                    fallback_name
                } else {
                    template.name
                },
                description: template.description,
                file: path,
            }),
            Err(e) => {
                warn!(path = %path.display(), error = %format!("{e:#}"), "skipping unreadable template");
            }
        }
    }

    templates.sort_by(|a, b| a.name.cmp(&b.name));
    templates
}
