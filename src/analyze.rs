use crate::extract::extract_json;
use crate::gateway::TextGenerator;
use crate::generator::ProjectGenerator;
use crate::project::{scan_project, ProjectStructure, STRUCTURE_FILE};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// File name of the persisted repair report inside a project root.
pub const FIX_REPORT_FILE: &str = "fix_report.json";

/// Maximum number of files sampled into the analysis prompt.
const MAX_SAMPLE_FILES: usize = 10;

/// Maximum characters of one sampled file fed to the model.
const MAX_SAMPLE_CHARS: usize = 2000;

/// One problem the model identified in the project.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisIssue {
    pub file: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: String,
    pub description: String,
    pub suggestion: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Recommendation {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub priority: String,
}

/// Model-produced review of a project, parsed from its JSON response. Each
/// issue record feeds the repair loop as an independent unit of work.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisReport {
    pub issues: Vec<AnalysisIssue>,
    pub recommendations: Vec<Recommendation>,
    pub overall_quality: String,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixedFile {
    pub file: String,
    pub issue: String,
    pub backup: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkippedFile {
    pub file: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixErrorRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixDetails {
    pub fixed_files: Vec<FixedFile>,
    pub skipped_files: Vec<SkippedFile>,
    pub errors: Vec<FixErrorRecord>,
}

/// Outcome of a whole-project repair run, persisted to `fix_report.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixReport {
    pub project: String,
    pub timestamp: String,
    pub fixed_count: usize,
    pub skipped_count: usize,
    pub error_count: usize,
    pub details: FixDetails,
}

#[derive(Serialize)]
struct CodeSample {
    path: String,
    content: String,
}

/// Feeds a sample of the project's code to the model and parses its JSON
/// review. Errors propagate: without an analysis there is nothing to repair.
pub fn analyze_project<G: TextGenerator + 'static>(
    generator: &ProjectGenerator<G>,
    project_path: &Path,
) -> Result<AnalysisReport> {
    if !project_path.is_dir() {
        anyhow::bail!("project does not exist: {}", project_path.display());
    }

    let structure = load_or_scan(project_path)?;

    let mut samples = Vec::new();
    for spec in structure.files.iter().take(MAX_SAMPLE_FILES) {
        let file_path = project_path.join(&spec.path);
        if !file_path.is_file() {
            continue;
        }
        match fs::read_to_string(&file_path) {
            Ok(content) => {
                let truncated = if content.len() > MAX_SAMPLE_CHARS {
                    let cut = content
                        .char_indices()
                        .map(|(i, _)| i)
                        .take_while(|i| *i <= MAX_SAMPLE_CHARS)
                        .last()
                        .unwrap_or(0);
                    format!("{}...", &content[..cut])
                } else {
                    content
                };
                samples.push(CodeSample {
                    path: spec.path.clone(),
                    content: truncated,
                });
            }
            Err(e) => warn!(file = %spec.path, error = %e, "failed to read sample file"),
        }
    }

    let prompt = format!(
        r#"You are an expert in code review and defect detection. Analyze the following project:

Project name: {name}
Description: {description}

File structure:
{files}

Code samples:
{samples}

Identify every potential problem in this code, in particular:
1. Bugs or programming errors
2. Security problems
3. Bad coding practices
4. Architectural inconsistencies
5. Duplicated or redundant code
6. Performance problems

Respond with a structured JSON object containing your analysis:
{{
  "issues": [
    {{
      "file": "path/to/file.ext",
      "type": "kind of problem (bug, security, ...)",
      "severity": "critical|high|medium|low",
      "description": "Detailed description of the problem",
      "suggestion": "Suggestion for fixing the problem"
    }}
  ],
  "recommendations": [
    {{
      "type": "improvement|refactoring|architecture|test",
      "description": "Description of the recommendation",
      "priority": "high|medium|low"
    }}
  ],
  "overall_quality": "excellent|good|average|poor",
  "summary": "Overall summary of the project quality and the main problems"
}}"#,
        name = structure.name,
        description = structure.description,
        files = serde_json::to_string_pretty(&structure.file_paths()).unwrap_or_default(),
        samples = serde_json::to_string_pretty(&samples).unwrap_or_default(),
    );

    let response = generator.complete(&prompt)?;
    let json = extract_json(&response)?;
    let report: AnalysisReport =
        serde_json::from_str(&json).context("analysis response does not match the report shape")?;

    info!(
        path = %project_path.display(),
        issues = report.issues.len(),
        "project analysis finished"
    );
    Ok(report)
}

/// Repairs each issue of an analysis (computed on demand when not supplied)
/// through a targeted model call per file, backing the original up first.
/// Per-issue failures are recorded and never abort the loop.
pub fn fix_project<G: TextGenerator + 'static>(
    generator: &ProjectGenerator<G>,
    project_path: &Path,
    analysis: Option<AnalysisReport>,
) -> Result<FixReport> {
    if !project_path.is_dir() {
        anyhow::bail!("project does not exist: {}", project_path.display());
    }

    let analysis = match analysis {
        Some(analysis) => analysis,
        None => {
            info!(path = %project_path.display(), "no analysis supplied, analyzing first");
            analyze_project(generator, project_path)?
        }
    };

    let structure = ProjectStructure::load(project_path).ok();
    let mut details = FixDetails::default();

    for issue in &analysis.issues {
        if issue.file.trim().is_empty() {
            details.errors.push(FixErrorRecord {
                file: None,
                error: format!("issue without a file path: {}", issue.description),
            });
            continue;
        }

        let file_path = project_path.join(&issue.file);
        if !file_path.is_file() {
            details.skipped_files.push(SkippedFile {
                file: issue.file.clone(),
                reason: "file not found".to_string(),
            });
            continue;
        }

        let kind = if issue.kind.is_empty() {
            "bug"
        } else {
            issue.kind.as_str()
        };
        let mut error_description = format!("{kind}: {}", issue.description);
        if !issue.suggestion.is_empty() {
            error_description.push_str(&format!("\n\nSuggestion: {}", issue.suggestion));
        }

        match generator.fix_code(&file_path, &error_description, structure.as_ref()) {
            Ok(corrected) => {
                let backup_path = backup_path_for(&file_path);
                if let Err(e) = fs::copy(&file_path, &backup_path) {
                    details.errors.push(FixErrorRecord {
                        file: Some(issue.file.clone()),
                        error: format!("failed to back up before rewriting: {e}"),
                    });
                    continue;
                }
                if let Err(e) = fs::write(&file_path, corrected) {
                    details.errors.push(FixErrorRecord {
                        file: Some(issue.file.clone()),
                        error: format!("failed to write corrected content: {e}"),
                    });
                    continue;
                }

                info!(file = %issue.file, "file repaired");
                details.fixed_files.push(FixedFile {
                    file: issue.file.clone(),
                    issue: kind.to_string(),
                    backup: backup_path
                        .strip_prefix(project_path)
                        .unwrap_or(&backup_path)
                        .to_string_lossy()
                        .to_string(),
                });
            }
            Err(e) => {
                warn!(file = %issue.file, error = %format!("{e:#}"), "repair failed");
                details.errors.push(FixErrorRecord {
                    file: Some(issue.file.clone()),
                    error: format!("{e:#}"),
                });
            }
        }
    }

    let report = FixReport {
        project: project_path.display().to_string(),
        timestamp: Utc::now().to_rfc3339(),
        fixed_count: details.fixed_files.len(),
        skipped_count: details.skipped_files.len(),
        error_count: details.errors.len(),
        details,
    };

    let report_path = project_path.join(FIX_REPORT_FILE);
    let json = serde_json::to_string_pretty(&report).context("Failed to serialize fix report")?;
    fs::write(&report_path, json)
        .with_context(|| format!("Failed to write {}", report_path.display()))?;

    info!(
        fixed = report.fixed_count,
        skipped = report.skipped_count,
        errors = report.error_count,
        "project repair finished"
    );
    Ok(report)
}

fn load_or_scan(project_path: &Path) -> Result<ProjectStructure> {
    if project_path.join(STRUCTURE_FILE).is_file() {
        ProjectStructure::load(project_path)
    } else {
        scan_project(project_path)
    }
}

fn backup_path_for(file_path: &Path) -> std::path::PathBuf {
    let mut name = file_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    name.push_str(".bak");
    file_path.with_file_name(name)
}
