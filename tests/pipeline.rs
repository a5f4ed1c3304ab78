//! End-to-end pipeline tests driven by a scripted generator: no model
//! service, no network. Covers structure synthesis, the bounded parallel
//! file-generation phase, partial-failure policy, and the validator's
//! repair loop.

use prefab::config::GeneratorConfig;
use prefab::gateway::{GatewayError, TextGenerator};
use prefab::generator::ProjectGenerator;
use prefab::validate::{ProjectValidator, ValidationStatus, VALIDATION_REPORT_FILE};
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Answers prompts by matching on distinctive substrings, in order.
struct ScriptedModel {
    responses: Vec<(&'static str, Result<String, String>)>,
}

impl TextGenerator for ScriptedModel {
    fn generate(&self, prompt: &str, _model_override: Option<&str>) -> Result<String, GatewayError> {
        for (marker, response) in &self.responses {
            if prompt.contains(marker) {
                return response
                    .clone()
                    .map_err(|e| GatewayError::Generation(e.clone()));
            }
        }
        Err(GatewayError::Generation(format!(
            "no scripted response for prompt: {}",
            prompt.lines().next().unwrap_or("")
        )))
    }
}

const STRUCTURE_JSON: &str = r#"{
  "name": "todo_app",
  "description": "A command line todo application",
  "folders": ["data"],
  "files": [
    {"path": "todo.py", "description": "Entry point of the application"},
    {"path": "storage.py", "description": "Task persistence"},
    {"path": "models.py", "description": "Task model"},
    {"path": "helpers.py", "description": "Shared helpers"},
    {"path": "cli_args.py", "description": "Argument parsing"}
  ],
  "dependencies": [],
  "dev_dependencies": [],
  "commands": {"start": "python todo.py"}
}"#;

fn scripted_responses() -> Vec<(&'static str, Result<String, String>)> {
    vec![
        (
            "expand the following short project description",
            Ok("A small command line application for managing todo items.".to_string()),
        ),
        (
            "complete project structure",
            Ok(STRUCTURE_JSON.to_string()),
        ),
        (
            "content of the file \"todo.py\"",
            Ok("def main():\n    print('todo')\n\n\nmain()".to_string()),
        ),
        (
            "content of the file \"storage.py\"",
            Ok("TASKS = []".to_string()),
        ),
        (
            "content of the file \"models.py\"",
            Ok("class Task:\n    pass".to_string()),
        ),
        (
            "content of the file \"helpers.py\"",
            Ok("def identity(x):\n    return x".to_string()),
        ),
        (
            "content of the file \"cli_args.py\"",
            Ok("import argparse".to_string()),
        ),
        (
            "README.md for the project",
            Ok("# todo_app\n\nA command line todo application.".to_string()),
        ),
    ]
}

fn test_config(base: &Path) -> GeneratorConfig {
    GeneratorConfig {
        base_path: base.to_path_buf(),
        cache_enabled: false,
        init_git: false,
        setup_venv: false,
        open_in_editor: false,
        max_workers: 3,
        ..Default::default()
    }
}

fn generator_with(
    base: &Path,
    responses: Vec<(&'static str, Result<String, String>)>,
) -> ProjectGenerator<ScriptedModel> {
    ProjectGenerator::new(test_config(base), Arc::new(ScriptedModel { responses }))
}

#[tokio::test]
async fn create_project_materializes_every_declared_file() {
    let dir = tempfile::tempdir().unwrap();
    let generator = generator_with(dir.path(), scripted_responses());

    let created = generator
        .create_project("a CLI todo app", None)
        .await
        .unwrap();

    assert_eq!(created.files_generated, 5);
    assert_eq!(created.files_failed, 0);

    let project_name = created.path.file_name().unwrap().to_string_lossy().to_string();
    assert!(project_name.starts_with("todo_app_"));

    // All five declared files exist with their scripted content, regardless
    // of the order the worker pool finished them in.
    for (path, needle) in [
        ("todo.py", "print('todo')"),
        ("storage.py", "TASKS = []"),
        ("models.py", "class Task:"),
        ("helpers.py", "def identity"),
        ("cli_args.py", "import argparse"),
    ] {
        let content = fs::read_to_string(created.path.join(path)).unwrap();
        assert!(content.contains(needle), "{path} missing expected content");
    }

    assert!(created.path.join("data").is_dir());
    assert!(created.path.join("project_structure.json").is_file());

    let readme = fs::read_to_string(created.path.join("README.md")).unwrap();
    assert!(readme.contains("# todo_app"));

    // No dependencies were declared, so no manifest is written.
    assert!(!created.path.join("requirements.txt").exists());
}

#[tokio::test]
async fn one_failing_file_does_not_abort_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut responses = scripted_responses();
    for (marker, response) in &mut responses {
        if marker.contains("storage.py") {
            *response = Err("model returned garbage".to_string());
        }
    }
    let generator = generator_with(dir.path(), responses);

    let created = generator
        .create_project("a CLI todo app", None)
        .await
        .unwrap();

    assert_eq!(created.files_generated, 4);
    assert_eq!(created.files_failed, 1);

    let placeholder = fs::read_to_string(created.path.join("storage.py")).unwrap();
    assert!(placeholder.contains("# ERROR: failed to generate storage.py"));

    // The other files still carry real generated content.
    let intact = fs::read_to_string(created.path.join("todo.py")).unwrap();
    assert!(intact.contains("print('todo')"));
}

#[tokio::test]
async fn validator_restores_removed_artifacts_and_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let generator = generator_with(dir.path(), scripted_responses());

    let created = generator
        .create_project("a CLI todo app", None)
        .await
        .unwrap();

    // Damage the materialized project: drop a declared folder and a file.
    fs::remove_dir_all(created.path.join("data")).unwrap();
    fs::remove_file(created.path.join("helpers.py")).unwrap();

    let validator = ProjectValidator::new(generator.clone());
    let first = validator.validate(&created.path);

    assert!(first.issues_found >= 2);
    assert_eq!(first.issues_found, first.issues_fixed);
    assert_eq!(first.status, ValidationStatus::Fixed);
    assert!(created.path.join("data").is_dir());
    assert!(created.path.join("helpers.py").is_file());
    assert!(created.path.join(VALIDATION_REPORT_FILE).is_file());

    // Repair is idempotent: a second pass finds nothing.
    let second = validator.validate(&created.path);
    assert_eq!(second.issues_found, 0);
    assert_eq!(second.status, ValidationStatus::Success);
}

#[tokio::test]
async fn freshly_created_valid_project_validates_clean() {
    let dir = tempfile::tempdir().unwrap();
    let generator = generator_with(dir.path(), scripted_responses());

    let created = generator
        .create_project("a CLI todo app", None)
        .await
        .unwrap();

    let report = ProjectValidator::new(generator).validate(&created.path);
    assert_eq!(report.issues_found, 0);
    assert_eq!(report.status, ValidationStatus::Success);
}
