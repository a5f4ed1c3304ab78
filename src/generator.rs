use crate::config::GeneratorConfig;
use crate::extract::{clean_code, extract_json};
use crate::gateway::{GatewayError, TextGenerator};
use crate::project::{FileSpec, ProjectStructure};
use crate::template::Template;
use crate::validate::{check_python_syntax, PythonSyntax};
use anyhow::{Context, Result};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Descriptions shorter than this are elaborated by the model before
/// structure generation.
const MIN_DESCRIPTION_WORDS: usize = 5;

const SOURCE_EXTENSIONS: &[&str] = &[
    "py", "js", "ts", "jsx", "tsx", "rs", "go", "java", "c", "cpp", "h", "hpp", "rb", "php", "sh",
    "swift", "kt",
];
const DOC_EXTENSIONS: &[&str] = &["md", "rst", "txt"];
const CONFIG_EXTENSIONS: &[&str] = &["json", "yaml", "yml", "toml", "ini", "cfg"];

/// How a file's content prompt is phrased.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileCategory {
    Source,
    Documentation,
    Config,
    Generic,
}

pub fn categorize(path: &str) -> FileCategory {
    let ext = Path::new(path)
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("");
    if SOURCE_EXTENSIONS.contains(&ext) {
        FileCategory::Source
    } else if DOC_EXTENSIONS.contains(&ext) {
        FileCategory::Documentation
    } else if CONFIG_EXTENSIONS.contains(&ext) {
        FileCategory::Config
    } else {
        FileCategory::Generic
    }
}

/// Outcome of a whole-project generation run.
#[derive(Debug)]
pub struct CreatedProject {
    pub path: PathBuf,
    pub files_generated: usize,
    pub files_failed: usize,
}

/// Turns a natural-language description into a materialized project by
/// composing gateway calls with the response extractor: structure first,
/// then per-file content on a bounded worker pool, then a README.
///
/// Generic over [`TextGenerator`] so tests can substitute a scripted
/// generator for the real gateway.
pub struct ProjectGenerator<G: TextGenerator> {
    config: GeneratorConfig,
    gateway: Arc<G>,
}

impl<G: TextGenerator> Clone for ProjectGenerator<G> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            gateway: Arc::clone(&self.gateway),
        }
    }
}

impl<G: TextGenerator + 'static> ProjectGenerator<G> {
    pub fn new(config: GeneratorConfig, gateway: Arc<G>) -> Self {
        Self { config, gateway }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    pub(crate) fn complete(&self, prompt: &str) -> Result<String, GatewayError> {
        self.gateway.generate(prompt, None)
    }

    /// Asks the model to expand a very short description into a fuller one.
    /// Failure is non-fatal: the original text is used as-is.
    fn elaborate_description(&self, description: &str) -> String {
        if description.split_whitespace().count() >= MIN_DESCRIPTION_WORDS {
            return description.to_string();
        }

        let prompt = format!(
            "As a software development expert, expand the following short project description \
             into a complete description of the application's purpose, main features, and \
             intended users:\n\n{description}\n\n\
             Respond with a single paragraph of plain text, no headings and no lists."
        );

        match self.gateway.generate(&prompt, None) {
            Ok(text) if !text.trim().is_empty() => {
                debug!("short description elaborated");
                text.trim().to_string()
            }
            Ok(_) => description.to_string(),
            Err(e) => {
                warn!(error = %e, "description elaboration failed, using original text");
                description.to_string()
            }
        }
    }

    /// Generates the [`ProjectStructure`] for a description. This is the
    /// hard-failure step of the pipeline: without a structure there is
    /// nothing to build, so every error propagates.
    pub fn generate_structure(
        &self,
        description: &str,
        template: Option<&Template>,
    ) -> Result<ProjectStructure> {
        let description = self.elaborate_description(description);

        let template_context = template
            .map(|t| {
                format!(
                    "\nUse the template \"{}\": {}\nSuggested structure:\n{}\n",
                    t.name,
                    t.description,
                    serde_json::to_string_pretty(&t.structure).unwrap_or_default()
                )
            })
            .unwrap_or_default();

        let prompt = format!(
            r#"As a software development expert, generate a complete project structure for: {description}
{template_context}
Respond ONLY with a valid JSON object of the following shape, without any explanatory text:

{{
  "name": "project_name",
  "description": "Detailed description of the project",
  "folders": [
    "folder1",
    "folder2/subfolder"
  ],
  "files": [
    {{
      "path": "relative/path/file.ext",
      "description": "Detailed description of the content and features"
    }}
  ],
  "dependencies": [
    "dep1",
    "dep2==version"
  ],
  "dev_dependencies": [
    "test-framework",
    "linter"
  ],
  "commands": {{
    "start": "command to launch the application",
    "test": "command to run the tests"
  }}
}}

Make sure the structure is complete and coherent for a working application.
Include every necessary file (configuration, tests, documentation, etc.)."#
        );

        let response = self.gateway.generate(&prompt, None)?;
        let json = extract_json(&response)?;
        let structure = ProjectStructure::from_json(&json)
            .context("model response does not describe a project structure")?;

        if structure.name.trim().is_empty() {
            warn!("model did not provide a project name");
        }
        info!(
            name = %structure.name,
            files = structure.files.len(),
            folders = structure.folders.len(),
            "project structure generated"
        );
        Ok(structure)
    }

    /// Generates content for one declared file. Validation failures trigger a
    /// single retry with a simplified prompt, after which the result is
    /// accepted as-is.
    pub(crate) fn try_generate_file_content(
        &self,
        spec: &FileSpec,
        structure: &ProjectStructure,
    ) -> Result<String> {
        let prompt = self.content_prompt(spec, structure);
        let content = clean_code(&self.gateway.generate(&prompt, None)?);

        match validate_content(&spec.path, &content) {
            Ok(()) => Ok(content),
            Err(reason) => {
                debug!(
                    file = %spec.path,
                    reason,
                    "generated content failed validation, retrying with simplified prompt"
                );
                let retry_prompt = self.simplified_content_prompt(spec, structure, &reason);
                let retried = clean_code(&self.gateway.generate(&retry_prompt, None)?);
                if let Err(second_reason) = validate_content(&spec.path, &retried) {
                    warn!(
                        file = %spec.path,
                        reason = second_reason,
                        "retried content still invalid, accepting as-is"
                    );
                }
                Ok(retried)
            }
        }
    }

    /// Infallible wrapper around [`Self::try_generate_file_content`]: any
    /// error becomes visible placeholder content so one bad file never
    /// aborts the rest of the project.
    pub fn generate_file_content(&self, spec: &FileSpec, structure: &ProjectStructure) -> String {
        match self.try_generate_file_content(spec, structure) {
            Ok(content) => content,
            Err(e) => {
                warn!(file = %spec.path, error = %format!("{e:#}"), "file content generation failed");
                placeholder_content(&spec.path, &e)
            }
        }
    }

    fn content_prompt(&self, spec: &FileSpec, structure: &ProjectStructure) -> String {
        let category_guidance = match categorize(&spec.path) {
            FileCategory::Source => {
                "Make sure that:\n\
                 1. The code is complete, functional, and follows best practices\n\
                 2. The code is well commented and documented\n\
                 3. The code is compatible with the other files in the project\n\
                 4. The code follows the conventions of the language used"
            }
            FileCategory::Documentation => {
                "Make sure the document is well structured, with clear headings and accurate \
                 references to the rest of the project"
            }
            FileCategory::Config => {
                "Make sure the file is correctly formatted and syntactically valid for its format"
            }
            FileCategory::Generic => "Make sure the content matches the file's described purpose",
        };

        format!(
            "Generate the complete content of the file \"{path}\" for a project named \"{name}\".\n\n\
             Project description: {project_desc}\n\
             File description: {file_desc}\n\n\
             Project folders:\n{folders}\n\n\
             Other files in the project:\n{siblings}\n\n\
             Main dependencies:\n{dependencies}\n\n\
             {category_guidance}\n\n\
             Respond ONLY with the content of the file, without any explanation or markdown.",
            path = spec.path,
            name = structure.name,
            project_desc = structure.description,
            file_desc = spec.description,
            folders = serde_json::to_string_pretty(&structure.folders).unwrap_or_default(),
            siblings = serde_json::to_string_pretty(&structure.file_paths()).unwrap_or_default(),
            dependencies =
                serde_json::to_string_pretty(&structure.dependencies).unwrap_or_default(),
        )
    }

    fn simplified_content_prompt(
        &self,
        spec: &FileSpec,
        structure: &ProjectStructure,
        reason: &str,
    ) -> String {
        format!(
            "Generate the content of the file \"{path}\" for the project \"{name}\".\n\
             File purpose: {file_desc}\n\n\
             A previous attempt produced invalid content ({reason}).\n\
             Respond ONLY with plain, syntactically valid file content. No markdown, no prose.",
            path = spec.path,
            name = structure.name,
            file_desc = spec.description,
        )
    }

    /// Generates a README for the project. Never fails: on error a minimal
    /// README is returned instead.
    pub fn generate_readme(&self, structure: &ProjectStructure) -> String {
        let prompt = format!(
            "Generate a complete, well-structured README.md for the project \"{name}\".\n\n\
             Project description: {description}\n\n\
             Project folders:\n{folders}\n\n\
             Main files:\n{files}\n\n\
             Dependencies:\n{dependencies}\n\n\
             Commands:\n{commands}\n\n\
             The README must include:\n\
             1. A title and a clear introduction of the project\n\
             2. Technical prerequisites\n\
             3. Detailed installation instructions\n\
             4. How to configure and run the project\n\
             5. The project structure, explained\n\
             6. API or main features (if applicable)\n\
             7. Concrete usage examples with code\n\
             8. How to contribute\n\
             9. License\n\
             10. Credits and acknowledgements\n\n\
             Use well-organized sections with appropriate heading levels and fenced code blocks.\n\
             Respond ONLY with the markdown content of the README, without any extra explanation.",
            name = structure.name,
            description = structure.description,
            folders = serde_json::to_string_pretty(&structure.folders).unwrap_or_default(),
            files = serde_json::to_string_pretty(&structure.file_paths()).unwrap_or_default(),
            dependencies =
                serde_json::to_string_pretty(&structure.dependencies).unwrap_or_default(),
            commands = serde_json::to_string_pretty(&structure.commands).unwrap_or_default(),
        );

        match self.gateway.generate(&prompt, None) {
            Ok(content) => clean_code(&content),
            Err(e) => {
                warn!(error = %e, "README generation failed, writing fallback");
                format!(
                    "# {}\n\n{}\n\n_Full README generation failed._\n",
                    structure.name, structure.description
                )
            }
        }
    }

    /// Repairs the code of an existing file based on an error description.
    /// When no structure is passed, the nearest persisted one is looked up;
    /// without any structure a simpler prompt is used.
    pub fn fix_code(
        &self,
        file_path: &Path,
        error_description: &str,
        structure: Option<&ProjectStructure>,
    ) -> Result<String> {
        if !file_path.is_file() {
            anyhow::bail!("file does not exist: {}", file_path.display());
        }

        let current_content = fs::read_to_string(file_path)
            .with_context(|| format!("Failed to read {}", file_path.display()))?;

        let discovered;
        let (context_root, structure) = match structure {
            Some(s) => (None, Some(s)),
            None => match ProjectStructure::find_from(file_path) {
                Some((root, s)) => {
                    discovered = s;
                    (Some(root), Some(&discovered))
                }
                None => (None, None),
            },
        };

        let file_name = file_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();

        let prompt = match structure {
            Some(structure) => {
                let rel_path = context_root
                    .as_deref()
                    .and_then(|root| file_path.strip_prefix(root).ok())
                    .map(|p| p.to_string_lossy().to_string())
                    .unwrap_or_else(|| file_name.to_string());
                let file_desc = structure
                    .file_description(&rel_path)
                    .unwrap_or("Project file");

                format!(
                    "Fix the code of the file \"{file_name}\" which has the following problem:\n\
                     {error_description}\n\n\
                     Project description: {project_desc}\n\
                     File description: {file_desc}\n\n\
                     Here is the current code:\n```\n{current_content}\n```\n\n\
                     Respond ONLY with the corrected code, without any explanation or markdown \
                     formatting. Make sure the fix addresses the described problem while \
                     preserving all other functionality.",
                    project_desc = structure.description,
                )
            }
            None => format!(
                "Fix the code of the file \"{file_name}\" which has the following problem:\n\
                 {error_description}\n\n\
                 Here is the current code:\n```\n{current_content}\n```\n\n\
                 Respond ONLY with the corrected code, without any explanation or markdown \
                 formatting. Make sure the fix addresses the described problem while preserving \
                 all other functionality.",
            ),
        };

        let corrected = self.gateway.generate(&prompt, None)?;
        Ok(clean_code(&corrected))
    }

    /// Creates a complete project from a description: structure, folders,
    /// per-file content on a bounded worker pool, README, dependency
    /// manifests, and the persisted structure. Incidental conveniences
    /// (git, venv, editor) run best-effort at the end.
    pub async fn create_project(
        &self,
        description: &str,
        template_name: Option<&str>,
    ) -> Result<CreatedProject> {
        let started = Instant::now();
        info!(description, "creating project");

        let template =
            template_name.and_then(|name| Template::load(&self.config.templates_dir, name));

        let this = self.clone();
        let description_owned = description.to_string();
        let structure = tokio::task::spawn_blocking(move || {
            this.generate_structure(&description_owned, template.as_ref())
        })
        .await
        .context("structure generation task aborted")??;

        let stem = sanitize_name(&structure.name);
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let project_path = self.config.base_path.join(format!("{stem}_{timestamp}"));
        fs::create_dir_all(&project_path)
            .with_context(|| format!("Failed to create {}", project_path.display()))?;
        info!(path = %project_path.display(), "project directory created");

        for folder in &structure.folders {
            let folder_path = project_path.join(folder);
            fs::create_dir_all(&folder_path)
                .with_context(|| format!("Failed to create {}", folder_path.display()))?;
        }

        // Parallel phase: one task per declared file, bounded by the worker
        // count. Each task carries its FileSpec alongside the result, so
        // attribution never depends on completion order. Duplicate declared
        // paths are not detected; the last write wins.
        let structure = Arc::new(structure);
        let semaphore = Arc::new(Semaphore::new(self.config.max_workers));
        let mut tasks = Vec::new();
        for spec in structure.files.clone() {
            let this = self.clone();
            let structure = Arc::clone(&structure);
            let semaphore = Arc::clone(&semaphore);
            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                tokio::task::spawn_blocking(move || {
                    let result = this.try_generate_file_content(&spec, &structure);
                    (spec, result)
                })
                .await
            }));
        }

        let mut files_generated = 0usize;
        let mut files_failed = 0usize;
        for task in tasks {
            let (spec, result) = task
                .await
                .context("file generation task aborted")?
                .context("file generation task panicked")?;

            let content = match result {
                Ok(content) => {
                    files_generated += 1;
                    content
                }
                Err(e) => {
                    files_failed += 1;
                    warn!(
                        file = %spec.path,
                        error = %format!("{e:#}"),
                        "file content generation failed, writing placeholder"
                    );
                    placeholder_content(&spec.path, &e)
                }
            };

            let file_path = project_path.join(&spec.path);
            if let Some(parent) = file_path.parent() {
                if let Err(e) = fs::create_dir_all(parent) {
                    warn!(file = %spec.path, error = %e, "failed to create parent directory");
                    continue;
                }
            }
            match fs::write(&file_path, content) {
                Ok(()) => info!(file = %spec.path, "file written"),
                Err(e) => warn!(file = %spec.path, error = %e, "failed to write file"),
            }
        }

        let readme_path = project_path.join("README.md");
        if !readme_path.exists() {
            let this = self.clone();
            let structure_for_readme = Arc::clone(&structure);
            let readme =
                tokio::task::spawn_blocking(move || this.generate_readme(&structure_for_readme))
                    .await
                    .context("README generation task aborted")?;
            fs::write(&readme_path, readme).context("Failed to write README.md")?;
            info!("README.md generated");
        }

        write_requirements(&project_path, "requirements.txt", &structure.dependencies)?;
        write_requirements(
            &project_path,
            "dev-requirements.txt",
            &structure.dev_dependencies,
        )?;

        structure.save(&project_path)?;

        let config = self.config.clone();
        let setup_path = project_path.clone();
        tokio::task::spawn_blocking(move || {
            if config.init_git {
                init_git_repo(&setup_path);
            }
            if config.setup_venv {
                setup_virtualenv(&setup_path);
            }
            if config.open_in_editor {
                open_editor(&config.editor_cmd, &setup_path);
            }
        })
        .await
        .context("environment setup task aborted")?;

        info!(
            elapsed = ?started.elapsed(),
            files_generated,
            files_failed,
            "project created"
        );

        Ok(CreatedProject {
            path: project_path,
            files_generated,
            files_failed,
        })
    }
}

/// Visible error marker written in place of content that could not be
/// generated.
pub fn placeholder_content(path: &str, error: &anyhow::Error) -> String {
    format!("# ERROR: failed to generate {path}\n# {error:#}\n")
}

/// Syntax-checks generated content for known extensions. Unknown extensions
/// pass; an unavailable interpreter skips the check rather than failing it.
pub(crate) fn validate_content(path: &str, content: &str) -> Result<(), String> {
    let ext = Path::new(path)
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("");

    match ext {
        "py" => match check_python_syntax(content) {
            PythonSyntax::Valid => Ok(()),
            PythonSyntax::Invalid(diagnostic) => Err(diagnostic.to_string()),
            PythonSyntax::Unavailable => {
                debug!("python3 unavailable, skipping syntax check");
                Ok(())
            }
        },
        "json" => serde_json::from_str::<serde_json::Value>(content)
            .map(|_| ())
            .map_err(|e| e.to_string()),
        "yaml" | "yml" => serde_yaml::from_str::<serde_yaml::Value>(content)
            .map(|_| ())
            .map_err(|e| e.to_string()),
        _ => Ok(()),
    }
}

/// Reduces a model-supplied project name to a filesystem-safe directory stem.
fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() {
        "unnamed_project".to_string()
    } else {
        cleaned
    }
}

fn write_requirements(
    project_path: &Path,
    file_name: &str,
    dependencies: &std::collections::BTreeSet<String>,
) -> Result<()> {
    if dependencies.is_empty() {
        return Ok(());
    }

    let mut content = dependencies.iter().cloned().collect::<Vec<_>>().join("\n");
    content.push('\n');
    let path = project_path.join(file_name);
    fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    info!(file = file_name, "dependency manifest written");
    Ok(())
}

const GITIGNORE: &str = "\
# Virtual environments
venv/
.venv/
env/

# Bytecode and build output
__pycache__/
*.py[cod]
build/
dist/
*.egg-info/

# Logs and local data
*.log
logs/
*.db
*.sqlite3

# Local configuration
.env
.env.local
secrets/

# Editors
.idea/
.vscode/
*.swp
.DS_Store
";

const GITATTRIBUTES: &str = "\
# Auto detect text files and perform LF normalization
* text=auto

*.md    text diff=markdown
*.py    text diff=python
*.json  text
*.yaml  text
*.yml   text

*.png   binary
*.jpg   binary
*.gif   binary
*.zip   binary
*.gz    binary
";

/// Initializes a git repository with standard ignore files. Best-effort: any
/// failure is logged as a warning and never propagates.
fn init_git_repo(project_path: &Path) {
    let result = Command::new("git")
        .arg("init")
        .current_dir(project_path)
        .output();

    match result {
        Ok(output) if output.status.success() => {
            if let Err(e) = fs::write(project_path.join(".gitignore"), GITIGNORE) {
                warn!(error = %e, "failed to write .gitignore");
            }
            if let Err(e) = fs::write(project_path.join(".gitattributes"), GITATTRIBUTES) {
                warn!(error = %e, "failed to write .gitattributes");
            }
            info!("git repository initialized");
        }
        Ok(output) => {
            warn!(
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "git init failed"
            );
        }
        Err(e) => warn!(error = %e, "git not available"),
    }
}

/// Creates a virtual environment and installs declared dependencies when a
/// requirements manifest exists. Best-effort.
fn setup_virtualenv(project_path: &Path) {
    let venv_path = project_path.join("venv");
    if !venv_path.exists() {
        let result = Command::new("python3")
            .args(["-m", "venv"])
            .arg(&venv_path)
            .output();
        match result {
            Ok(output) if output.status.success() => info!("virtual environment created"),
            Ok(output) => {
                warn!(
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "virtual environment creation failed"
                );
                return;
            }
            Err(e) => {
                warn!(error = %e, "python3 not available, skipping virtual environment");
                return;
            }
        }
    }

    let requirements = project_path.join("requirements.txt");
    if !requirements.is_file() {
        return;
    }

    let pip = if cfg!(windows) {
        venv_path.join("Scripts").join("pip")
    } else {
        venv_path.join("bin").join("pip")
    };

    let result = Command::new(&pip)
        .arg("install")
        .arg("-r")
        .arg(&requirements)
        .output();
    match result {
        Ok(output) if output.status.success() => info!("dependencies installed"),
        Ok(output) => warn!(
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "dependency installation failed"
        ),
        Err(e) => warn!(error = %e, "pip not available"),
    }
}

/// Launches the configured editor on the project directory. Best-effort and
/// fire-and-forget.
fn open_editor(editor_cmd: &str, project_path: &Path) {
    match Command::new(editor_cmd).arg(project_path).spawn() {
        Ok(_) => info!(editor = editor_cmd, "project opened in editor"),
        Err(e) => warn!(editor = editor_cmd, error = %e, "failed to open editor"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Scripted generator: answers prompts by matching on distinctive
    /// substrings, recording every prompt it sees.
    struct ScriptedGenerator {
        responses: Vec<(&'static str, Result<String, String>)>,
        calls: AtomicUsize,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        fn new(responses: Vec<(&'static str, Result<String, String>)>) -> Self {
            Self {
                responses,
                calls: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    impl TextGenerator for ScriptedGenerator {
        fn generate(
            &self,
            prompt: &str,
            _model_override: Option<&str>,
        ) -> Result<String, GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.to_string());
            for (marker, response) in &self.responses {
                if prompt.contains(marker) {
                    return response
                        .clone()
                        .map_err(|e| GatewayError::Generation(e.clone()));
                }
            }
            Err(GatewayError::Generation("no scripted response".to_string()))
        }
    }

    fn test_config() -> GeneratorConfig {
        GeneratorConfig {
            cache_enabled: false,
            init_git: false,
            setup_venv: false,
            open_in_editor: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_categorize() {
        assert_eq!(categorize("src/app.py"), FileCategory::Source);
        assert_eq!(categorize("README.md"), FileCategory::Documentation);
        assert_eq!(categorize("config.yaml"), FileCategory::Config);
        assert_eq!(categorize("data.bin"), FileCategory::Generic);
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("todo_app"), "todo_app");
        assert_eq!(sanitize_name("my app/v2"), "my_app_v2");
        assert_eq!(sanitize_name("  "), "unnamed_project");
    }

    #[test]
    fn test_generate_structure_defaults_missing_fields() {
        let generator = ProjectGenerator::new(
            test_config(),
            Arc::new(ScriptedGenerator::new(vec![(
                "complete project structure",
                Ok(r#"{"name": "demo", "files": [{"path": "app.py", "description": "entry"}]}"#
                    .to_string()),
            )])),
        );

        let structure = generator
            .generate_structure("a web application for tracking tasks", None)
            .unwrap();
        assert_eq!(structure.name, "demo");
        assert_eq!(structure.files.len(), 1);
        assert!(structure.folders.is_empty());
        assert!(structure.dependencies.is_empty());
    }

    #[test]
    fn test_generate_structure_propagates_gateway_failure() {
        let generator = ProjectGenerator::new(
            test_config(),
            Arc::new(ScriptedGenerator::new(vec![])),
        );

        assert!(generator
            .generate_structure("a web application for tracking tasks", None)
            .is_err());
    }

    #[test]
    fn test_short_description_is_elaborated() {
        let gateway = Arc::new(ScriptedGenerator::new(vec![
            (
                "expand the following short project description",
                Ok("A complete command line tool that tracks tasks.".to_string()),
            ),
            (
                "complete project structure",
                Ok(r#"{"name": "todo"}"#.to_string()),
            ),
        ]));
        let generator = ProjectGenerator::new(test_config(), Arc::clone(&gateway));

        generator.generate_structure("todo app", None).unwrap();

        let prompts = gateway.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("A complete command line tool"));
    }

    #[test]
    fn test_elaboration_failure_falls_back_to_original() {
        let gateway = Arc::new(ScriptedGenerator::new(vec![(
            "complete project structure",
            Ok(r#"{"name": "todo"}"#.to_string()),
        )]));
        let generator = ProjectGenerator::new(test_config(), Arc::clone(&gateway));

        // Elaboration prompt has no scripted response and fails, but
        // structure generation must still succeed with the original text.
        generator.generate_structure("todo app", None).unwrap();
        let prompts = gateway.prompts.lock().unwrap();
        assert!(prompts.last().unwrap().contains("todo app"));
    }

    #[test]
    fn test_invalid_json_content_retried_once() {
        let gateway = Arc::new(ScriptedGenerator::new(vec![
            (
                "previous attempt produced invalid content",
                Ok(r#"{"valid": true}"#.to_string()),
            ),
            (
                "Generate the complete content",
                Ok("{not valid json".to_string()),
            ),
        ]));
        let generator = ProjectGenerator::new(test_config(), Arc::clone(&gateway));

        let spec = FileSpec {
            path: "settings.json".to_string(),
            description: "settings".to_string(),
        };
        let structure = ProjectStructure {
            name: "demo".to_string(),
            files: vec![spec.clone()],
            ..Default::default()
        };

        let content = generator.try_generate_file_content(&spec, &structure).unwrap();
        assert_eq!(content, r#"{"valid": true}"#);
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_file_content_failure_becomes_placeholder() {
        let generator = ProjectGenerator::new(
            test_config(),
            Arc::new(ScriptedGenerator::new(vec![])),
        );

        let spec = FileSpec {
            path: "app.py".to_string(),
            description: "entry".to_string(),
        };
        let structure = ProjectStructure::default();

        let content = generator.generate_file_content(&spec, &structure);
        assert!(content.contains("# ERROR: failed to generate app.py"));
    }

    #[test]
    fn test_readme_fallback_on_failure() {
        let generator = ProjectGenerator::new(
            test_config(),
            Arc::new(ScriptedGenerator::new(vec![])),
        );

        let structure = ProjectStructure {
            name: "demo".to_string(),
            description: "a demo project".to_string(),
            ..Default::default()
        };

        let readme = generator.generate_readme(&structure);
        assert!(readme.contains("# demo"));
        assert!(readme.contains("a demo project"));
    }

    #[test]
    fn test_validate_content_json_and_yaml() {
        assert!(validate_content("ok.json", r#"{"a": 1}"#).is_ok());
        assert!(validate_content("bad.json", "{nope").is_err());
        assert!(validate_content("ok.yml", "key: value\n").is_ok());
        assert!(validate_content("unknown.xyz", "anything").is_ok());
    }
}
