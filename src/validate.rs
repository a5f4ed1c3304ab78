use crate::gateway::TextGenerator;
use crate::generator::ProjectGenerator;
use crate::project::{dependency_base_name, scan_project, ProjectStructure, SKIP_DIRS};
use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

/// File name of the persisted validation report inside a project root.
pub const VALIDATION_REPORT_FILE: &str = "validation_report.json";

/// Edit distance above which an unresolved import is not considered a typo
/// of an internal module.
const MAX_IMPORT_DISTANCE: usize = 2;

/// One detected divergence between declared and actual project state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub file: String,
    #[serde(rename = "type")]
    pub kind: IssueKind,
    pub description: String,
    pub fixed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub solution: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    SyntaxError,
    ImportError,
    MissingDependencies,
    MissingFolder,
    MissingFile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    /// No issues were found.
    Success,
    /// Issues were found and every one was repaired.
    Fixed,
    /// At least one issue could not be repaired.
    IssuesRemaining,
    /// The pass itself failed; the report carries whatever was accumulated.
    Error,
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            ValidationStatus::Success => "success",
            ValidationStatus::Fixed => "fixed",
            ValidationStatus::IssuesRemaining => "issues_remaining",
            ValidationStatus::Error => "error",
        };
        write!(f, "{s}")
    }
}

/// Result of one validation pass, persisted to `validation_report.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub status: ValidationStatus,
    pub issues_found: usize,
    pub issues_fixed: usize,
    #[serde(rename = "details")]
    pub issues: Vec<ValidationIssue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ValidationReport {
    pub fn save(&self, project_root: &Path) -> Result<()> {
        let path = project_root.join(VALIDATION_REPORT_FILE);
        let json = serde_json::to_string_pretty(self).context("Failed to serialize report")?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

/// Inspects a materialized project for divergence between its declared
/// structure and the actual filesystem/code state, repairing what can be
/// repaired automatically.
///
/// Four checks run in sequence, each independently idempotent: import
/// coherence, syntax validity, dependency completeness, and structural
/// completeness. Repairs are additive only.
pub struct ProjectValidator<G: TextGenerator> {
    generator: ProjectGenerator<G>,
}

impl<G: TextGenerator + 'static> ProjectValidator<G> {
    pub fn new(generator: ProjectGenerator<G>) -> Self {
        Self { generator }
    }

    /// Runs the full validation pass. Never returns an error: an internal
    /// failure yields a report with status `error` carrying the partial
    /// issue list accumulated before the failure.
    pub fn validate(&self, project_path: &Path) -> ValidationReport {
        info!(path = %project_path.display(), "validating project");

        let mut issues = Vec::new();
        let outcome = self.run_checks(project_path, &mut issues);

        let issues_found = issues.len();
        let issues_fixed = issues.iter().filter(|i| i.fixed).count();
        let (status, error) = match outcome {
            Ok(()) if issues_found == 0 => (ValidationStatus::Success, None),
            Ok(()) if issues_fixed == issues_found => (ValidationStatus::Fixed, None),
            Ok(()) => (ValidationStatus::IssuesRemaining, None),
            Err(e) => (ValidationStatus::Error, Some(format!("{e:#}"))),
        };

        let report = ValidationReport {
            status,
            issues_found,
            issues_fixed,
            issues,
            error,
        };

        // The report is emitted even when the pass errored out.
        if let Err(e) = report.save(project_path) {
            warn!(error = %format!("{e:#}"), "failed to persist validation report");
        }

        info!(
            status = %report.status,
            found = report.issues_found,
            fixed = report.issues_fixed,
            "validation pass finished"
        );
        report
    }

    fn run_checks(&self, root: &Path, issues: &mut Vec<ValidationIssue>) -> Result<()> {
        if !root.is_dir() {
            anyhow::bail!("project does not exist: {}", root.display());
        }

        let mut structure = match ProjectStructure::load(root) {
            Ok(structure) => structure,
            Err(_) => {
                debug!("no persisted structure, inferring one from the directory tree");
                scan_project(root)?
            }
        };
        let mut structure_dirty = false;

        self.check_imports(root, &structure, issues)?;
        self.check_syntax(root, &structure, issues)?;
        self.check_dependencies(root, &mut structure, &mut structure_dirty, issues)?;
        self.check_structure(root, &structure, issues)?;

        if structure_dirty {
            structure.save(root)?;
        }
        Ok(())
    }

    /// Check 1: every import in every source file must resolve to the
    /// standard library, an internal module, or a declared dependency.
    /// Unresolved imports close to an internal module name are treated as
    /// typos and rewritten; the rest are recorded unfixed.
    fn check_imports(
        &self,
        root: &Path,
        structure: &ProjectStructure,
        issues: &mut Vec<ValidationIssue>,
    ) -> Result<()> {
        let files = collect_python_files(root)?;
        let internal = internal_module_names(root, &files);
        let declared = declared_package_names(structure);

        for file in &files {
            let rel = rel_string(root, file);
            let content = fs::read_to_string(file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let ends_with_newline = content.ends_with('\n');
            let mut lines: Vec<String> = content.lines().map(str::to_string).collect();
            let mut rewritten = false;

            for import in extract_imports(&content) {
                let top = top_level(&import.module);
                if PYTHON_STDLIB.contains(&top)
                    || internal.contains(top)
                    || declared.contains(&top.to_lowercase())
                {
                    continue;
                }

                match closest_internal(top, &internal) {
                    Some(replacement) => {
                        let fixed_line = replace_module_token(&lines[import.line], top, &replacement);
                        debug!(file = %rel, from = top, to = %replacement, "rewriting import");
                        lines[import.line] = fixed_line;
                        rewritten = true;
                        issues.push(ValidationIssue {
                            file: rel.clone(),
                            kind: IssueKind::ImportError,
                            description: format!(
                                "import '{top}' does not resolve to any module in the project"
                            ),
                            fixed: true,
                            solution: Some(format!(
                                "rewrote import to internal module '{replacement}'"
                            )),
                        });
                    }
                    None => {
                        issues.push(ValidationIssue {
                            file: rel.clone(),
                            kind: IssueKind::ImportError,
                            description: format!(
                                "import '{top}' is neither standard library, internal, nor declared"
                            ),
                            fixed: false,
                            solution: None,
                        });
                    }
                }
            }

            if rewritten {
                let mut new_content = lines.join("\n");
                if ends_with_newline {
                    new_content.push('\n');
                }
                fs::write(file, new_content)
                    .with_context(|| format!("Failed to write {}", file.display()))?;
            }
        }

        Ok(())
    }

    /// Check 2: every source file must parse. A failing file gets one
    /// targeted repair generation seeded with the exact diagnostic; the
    /// rewrite is committed only if the repaired text parses.
    fn check_syntax(
        &self,
        root: &Path,
        structure: &ProjectStructure,
        issues: &mut Vec<ValidationIssue>,
    ) -> Result<()> {
        if matches!(check_python_syntax(""), PythonSyntax::Unavailable) {
            warn!("python3 not found, skipping syntax validation");
            return Ok(());
        }

        for file in collect_python_files(root)? {
            let rel = rel_string(root, &file);
            let source = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;

            let diagnostic = match check_python_syntax(&source) {
                PythonSyntax::Valid => continue,
                PythonSyntax::Unavailable => return Ok(()),
                PythonSyntax::Invalid(diagnostic) => diagnostic,
            };

            let mut issue = ValidationIssue {
                file: rel.clone(),
                kind: IssueKind::SyntaxError,
                description: diagnostic.to_string(),
                fixed: false,
                solution: None,
            };

            let error_description = format!("Python syntax error at {diagnostic}");
            match self
                .generator
                .fix_code(&file, &error_description, Some(structure))
            {
                Ok(candidate) => {
                    if matches!(check_python_syntax(&candidate), PythonSyntax::Valid) {
                        fs::write(&file, format!("{candidate}\n"))
                            .with_context(|| format!("Failed to write {}", file.display()))?;
                        issue.fixed = true;
                        issue.solution = Some("file content regenerated and re-validated".to_string());
                    } else {
                        debug!(file = %rel, "repaired content still fails to parse, discarding");
                    }
                }
                Err(e) => {
                    debug!(file = %rel, error = %format!("{e:#}"), "syntax repair generation failed");
                }
            }

            issues.push(issue);
        }

        Ok(())
    }

    /// Check 3: every imported external package must appear in the declared
    /// dependency manifest. Missing packages are appended, never removed.
    fn check_dependencies(
        &self,
        root: &Path,
        structure: &mut ProjectStructure,
        structure_dirty: &mut bool,
        issues: &mut Vec<ValidationIssue>,
    ) -> Result<()> {
        let files = collect_python_files(root)?;
        let internal = internal_module_names(root, &files);

        let mut external = BTreeSet::new();
        for file in &files {
            let content = fs::read_to_string(file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            for import in extract_imports(&content) {
                let top = top_level(&import.module);
                if !PYTHON_STDLIB.contains(&top) && !internal.contains(top) {
                    external.insert(top.to_string());
                }
            }
        }

        let declared = declared_package_names(structure);
        for package in external {
            if declared.contains(&package.to_lowercase()) {
                continue;
            }

            structure.dependencies.insert(package.clone());
            *structure_dirty = true;
            append_requirement(root, &package)?;
            issues.push(ValidationIssue {
                file: "requirements.txt".to_string(),
                kind: IssueKind::MissingDependencies,
                description: format!("package '{package}' is imported but not declared"),
                fixed: true,
                solution: Some(format!("added '{package}' to the dependency manifest")),
            });
        }

        Ok(())
    }

    /// Check 4: every declared folder and file must exist. Missing folders
    /// are created empty; missing files are regenerated through the same
    /// per-file content path used during initial creation.
    fn check_structure(
        &self,
        root: &Path,
        structure: &ProjectStructure,
        issues: &mut Vec<ValidationIssue>,
    ) -> Result<()> {
        for folder in &structure.folders {
            let path = root.join(folder);
            if path.is_dir() {
                continue;
            }

            match fs::create_dir_all(&path) {
                Ok(()) => issues.push(ValidationIssue {
                    file: folder.clone(),
                    kind: IssueKind::MissingFolder,
                    description: format!("declared folder '{folder}' does not exist"),
                    fixed: true,
                    solution: Some("folder created".to_string()),
                }),
                Err(e) => issues.push(ValidationIssue {
                    file: folder.clone(),
                    kind: IssueKind::MissingFolder,
                    description: format!("declared folder '{folder}' could not be created: {e}"),
                    fixed: false,
                    solution: None,
                }),
            }
        }

        for spec in &structure.files {
            let path = root.join(&spec.path);
            if path.is_file() {
                continue;
            }

            info!(file = %spec.path, "regenerating missing declared file");
            let content = self.generator.generate_file_content(spec, structure);
            let write_result = path
                .parent()
                .map(fs::create_dir_all)
                .unwrap_or(Ok(()))
                .and_then(|()| fs::write(&path, content));

            match write_result {
                Ok(()) => issues.push(ValidationIssue {
                    file: spec.path.clone(),
                    kind: IssueKind::MissingFile,
                    description: format!("declared file '{}' does not exist", spec.path),
                    fixed: true,
                    solution: Some("file content regenerated".to_string()),
                }),
                Err(e) => issues.push(ValidationIssue {
                    file: spec.path.clone(),
                    kind: IssueKind::MissingFile,
                    description: format!(
                        "declared file '{}' could not be regenerated: {e}",
                        spec.path
                    ),
                    fixed: false,
                    solution: None,
                }),
            }
        }

        Ok(())
    }
}

/// A parsed interpreter diagnostic.
#[derive(Debug, Clone)]
pub(crate) struct SyntaxDiagnostic {
    pub line: u32,
    pub col: u32,
    pub message: String,
}

impl fmt::Display for SyntaxDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "line {}, column {}: {}", self.line, self.col, self.message)
    }
}

pub(crate) enum PythonSyntax {
    Valid,
    Invalid(SyntaxDiagnostic),
    /// No interpreter on PATH; the check cannot run.
    Unavailable,
}

/// Parses source fed on stdin and reports `lineno:offset:message` on stderr
/// for syntax errors.
const SYNTAX_CHECK_SCRIPT: &str = "\
import sys, ast
try:
    ast.parse(sys.stdin.read())
except SyntaxError as e:
    print(f\"{e.lineno or 0}:{e.offset or 0}:{e.msg}\", file=sys.stderr)
    sys.exit(1)
";

/// Runs the interpreter's parser over `source`.
pub(crate) fn check_python_syntax(source: &str) -> PythonSyntax {
    let child = Command::new("python3")
        .arg("-c")
        .arg(SYNTAX_CHECK_SCRIPT)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn();

    let mut child = match child {
        Ok(child) => child,
        Err(e) => {
            debug!(error = %e, "python3 could not be spawned");
            return PythonSyntax::Unavailable;
        }
    };

    if let Some(mut stdin) = child.stdin.take() {
        if let Err(e) = stdin.write_all(source.as_bytes()) {
            debug!(error = %e, "failed to feed source to interpreter");
        }
    }

    let output = match child.wait_with_output() {
        Ok(output) => output,
        Err(e) => {
            debug!(error = %e, "interpreter did not finish");
            return PythonSyntax::Unavailable;
        }
    };

    if output.status.success() {
        PythonSyntax::Valid
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        PythonSyntax::Invalid(parse_diagnostic(stderr.trim()))
    }
}

fn parse_diagnostic(stderr: &str) -> SyntaxDiagnostic {
    let first_line = stderr.lines().next().unwrap_or("");
    let mut parts = first_line.splitn(3, ':');
    let line = parts
        .next()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0);
    let col = parts
        .next()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0);
    let message = parts.next().map(str::trim).unwrap_or("").to_string();

    SyntaxDiagnostic {
        line,
        col,
        message: if message.is_empty() {
            "invalid syntax".to_string()
        } else {
            message
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ImportRef {
    pub module: String,
    /// Zero-based line index within the source.
    pub line: usize,
}

fn import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(?:from\s+([A-Za-z_][A-Za-z0-9_.]*)\s+import\b|import\s+(.+))")
            .expect("valid regex")
    })
}

/// Extracts imported module names from source. Relative imports
/// (`from . import x`) resolve inside the project by construction and are
/// not reported.
pub(crate) fn extract_imports(source: &str) -> Vec<ImportRef> {
    let mut imports = Vec::new();
    for (idx, line) in source.lines().enumerate() {
        let Some(caps) = import_re().captures(line) else {
            continue;
        };

        if let Some(module) = caps.get(1) {
            imports.push(ImportRef {
                module: module.as_str().to_string(),
                line: idx,
            });
        } else if let Some(list) = caps.get(2) {
            // `import a, b as c` declares several modules on one line.
            for part in list.as_str().split(',') {
                let name = part.split_whitespace().next().unwrap_or("");
                let valid = name
                    .chars()
                    .next()
                    .map(|c| c.is_ascii_alphabetic() || c == '_')
                    .unwrap_or(false)
                    && name
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
                if valid {
                    imports.push(ImportRef {
                        module: name.to_string(),
                        line: idx,
                    });
                }
            }
        }
    }
    imports
}

pub(crate) fn top_level(module: &str) -> &str {
    module.split('.').next().unwrap_or(module)
}

fn collect_python_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    collect_python_files_into(root, &mut files)?;
    files.sort();
    Ok(files)
}

fn collect_python_files_into(dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?;

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();

        if name.starts_with('.') || SKIP_DIRS.contains(&name.as_str()) {
            continue;
        }

        if path.is_dir() {
            collect_python_files_into(&path, files)?;
        } else if path.extension().and_then(|s| s.to_str()) == Some("py") {
            files.push(path);
        }
    }
    Ok(())
}

/// Module names derivable from the on-disk file layout: file stems plus
/// package directory names.
fn internal_module_names(root: &Path, files: &[PathBuf]) -> HashSet<String> {
    let mut names = HashSet::new();
    for file in files {
        let rel = file.strip_prefix(root).unwrap_or(file);
        if let Some(stem) = rel.file_stem().and_then(|s| s.to_str()) {
            names.insert(stem.to_string());
        }
        for component in rel.parent().map(Path::components).into_iter().flatten() {
            if let std::path::Component::Normal(name) = component {
                if let Some(name) = name.to_str() {
                    names.insert(name.to_string());
                }
            }
        }
    }
    names.remove("__init__");
    names
}

fn declared_package_names(structure: &ProjectStructure) -> HashSet<String> {
    structure
        .dependencies
        .iter()
        .chain(structure.dev_dependencies.iter())
        .map(|dep| dependency_base_name(dep).to_lowercase())
        .collect()
}

/// Classic two-row edit distance.
pub(crate) fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}

/// Picks the internal module most similar to `name`, if any is close enough
/// to plausibly be a typo. Ties break lexicographically for determinism.
fn closest_internal(name: &str, internal: &HashSet<String>) -> Option<String> {
    if name.len() < 3 {
        return None;
    }

    internal
        .iter()
        .map(|candidate| (levenshtein(name, candidate), candidate))
        .filter(|(distance, _)| *distance > 0 && *distance <= MAX_IMPORT_DISTANCE)
        .min_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)))
        .map(|(_, candidate)| candidate.clone())
}

fn replace_module_token(line: &str, from: &str, to: &str) -> String {
    match Regex::new(&format!(r"\b{}\b", regex::escape(from))) {
        Ok(re) => re.replace(line, to).into_owned(),
        Err(_) => line.to_string(),
    }
}

/// Appends a package to `requirements.txt` unless an entry with the same
/// base name already exists. The manifest is only ever extended.
fn append_requirement(root: &Path, package: &str) -> Result<()> {
    let path = root.join("requirements.txt");
    let existing = fs::read_to_string(&path).unwrap_or_default();

    let already_present = existing
        .lines()
        .map(str::trim)
        .any(|line| !line.is_empty() && dependency_base_name(line).eq_ignore_ascii_case(package));
    if already_present {
        return Ok(());
    }

    let mut content = existing;
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str(package);
    content.push('\n');
    fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))
}

fn rel_string(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .to_string()
}

/// Fixed exclusion list of standard-library module names used by the import
/// and dependency checks.
const PYTHON_STDLIB: &[&str] = &[
    "__future__", "abc", "argparse", "array", "ast", "asyncio", "base64", "bisect", "calendar",
    "cmath", "codecs", "collections", "concurrent", "configparser", "contextlib", "copy", "csv",
    "ctypes", "dataclasses", "datetime", "decimal", "difflib", "dis", "email", "enum", "errno",
    "fnmatch", "fractions", "functools", "getpass", "glob", "gzip", "hashlib", "heapq", "hmac",
    "html", "http", "importlib", "inspect", "io", "ipaddress", "itertools", "json", "keyword",
    "linecache", "locale", "logging", "lzma", "math", "mimetypes", "multiprocessing", "numbers",
    "operator", "os", "pathlib", "pickle", "pkgutil", "platform", "pprint", "queue", "random",
    "re", "secrets", "select", "shlex", "shutil", "signal", "site", "smtplib", "socket",
    "sqlite3", "ssl", "stat", "statistics", "string", "struct", "subprocess", "sys", "sysconfig",
    "tarfile", "tempfile", "textwrap", "threading", "time", "timeit", "tkinter", "token",
    "tokenize", "traceback", "types", "typing", "unicodedata", "unittest", "urllib", "uuid",
    "venv", "warnings", "weakref", "webbrowser", "xml", "zipfile", "zlib",
];
