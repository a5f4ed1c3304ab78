use anyhow::{Context, Result};
use prefab::analyze as analysis;
use prefab::analyze::AnalysisReport;
use prefab::config::GeneratorConfig;
use prefab::gateway::ModelGateway;
use prefab::generator::{CreatedProject, ProjectGenerator};
use prefab::template;
use prefab::validate::{ProjectValidator, ValidationStatus, VALIDATION_REPORT_FILE};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

/// Builds the generator over the real gateway. Gateway construction probes
/// transports with blocking I/O, so it runs off the async runtime.
async fn build_generator(config: GeneratorConfig) -> Result<ProjectGenerator<ModelGateway>> {
    let gateway_config = config.clone();
    let gateway = tokio::task::spawn_blocking(move || ModelGateway::new(&gateway_config))
        .await
        .context("gateway startup task aborted")??;
    Ok(ProjectGenerator::new(config, Arc::new(gateway)))
}

pub async fn create(
    config: GeneratorConfig,
    description: String,
    template_name: Option<String>,
) -> Result<()> {
    let generator = build_generator(config).await?;
    let created = generator
        .create_project(&description, template_name.as_deref())
        .await?;
    print_creation_summary(&created);
    Ok(())
}

fn print_creation_summary(created: &CreatedProject) {
    println!("\n{}", "=".repeat(60));
    println!("✓ Project created at: {}", created.path.display());
    println!("  Files generated: {}", created.files_generated);
    if created.files_failed > 0 {
        println!(
            "  Files with placeholder content: {}",
            created.files_failed
        );
    }
    println!("{}", "=".repeat(60));
}

pub async fn validate(config: GeneratorConfig, project_path: PathBuf) -> Result<()> {
    let generator = build_generator(config).await?;
    let path = project_path.clone();
    let report =
        tokio::task::spawn_blocking(move || ProjectValidator::new(generator).validate(&path))
            .await
            .context("validation task aborted")?;

    println!("\nValidation finished: {}", report.status);
    println!("  Issues found: {}", report.issues_found);
    println!("  Issues fixed: {}", report.issues_fixed);

    let unfixed: Vec<_> = report.issues.iter().filter(|i| !i.fixed).collect();
    if !unfixed.is_empty() {
        println!("\nUnresolved issues:");
        for issue in unfixed.iter().take(5) {
            println!("  - {}: {}", issue.file, issue.description);
        }
        if unfixed.len() > 5 {
            println!("  ... and {} more", unfixed.len() - 5);
        }
    }

    println!(
        "\nFull report written to: {}",
        project_path.join(VALIDATION_REPORT_FILE).display()
    );

    if report.status == ValidationStatus::Error {
        anyhow::bail!(
            "validation pass failed: {}",
            report.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }
    Ok(())
}

pub async fn analyze(
    config: GeneratorConfig,
    project_path: PathBuf,
    output: Option<PathBuf>,
) -> Result<()> {
    let generator = build_generator(config).await?;
    let path = project_path.clone();
    let report = tokio::task::spawn_blocking(move || analysis::analyze_project(&generator, &path))
        .await
        .context("analysis task aborted")??;

    let quality = if report.overall_quality.is_empty() {
        "not rated"
    } else {
        report.overall_quality.as_str()
    };
    println!("\n📊 Project analysis finished:");
    println!("- Overall quality: {quality}");
    println!("- Problems detected: {}", report.issues.len());

    if !report.issues.is_empty() {
        println!("\nMain problems:");
        for (i, issue) in report.issues.iter().take(5).enumerate() {
            let severity = if issue.severity.is_empty() {
                "medium"
            } else {
                issue.severity.as_str()
            };
            println!(
                "  {}. [{severity}] {}: {}",
                i + 1,
                issue.file,
                issue.description
            );
        }
        if report.issues.len() > 5 {
            println!("  ... and {} more problems", report.issues.len() - 5);
        }
    }

    if let Some(output) = output {
        let json = serde_json::to_string_pretty(&report)
            .context("Failed to serialize analysis report")?;
        fs::write(&output, json)
            .with_context(|| format!("Failed to write {}", output.display()))?;
        println!("\nFull report saved to: {}", output.display());
    }

    Ok(())
}

pub async fn fix_file(
    config: GeneratorConfig,
    file_path: PathBuf,
    error_description: String,
    backup: bool,
) -> Result<()> {
    if !file_path.is_file() {
        anyhow::bail!("file does not exist: {}", file_path.display());
    }

    println!("🔍 Fixing file: {}", file_path.display());
    if backup {
        let backup_path = file_path.with_file_name(format!(
            "{}.bak",
            file_path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default()
        ));
        fs::copy(&file_path, &backup_path)
            .with_context(|| format!("Failed to back up to {}", backup_path.display()))?;
        println!("📑 Backup created: {}", backup_path.display());
    }

    let generator = build_generator(config).await?;
    let path = file_path.clone();
    let corrected =
        tokio::task::spawn_blocking(move || generator.fix_code(&path, &error_description, None))
            .await
            .context("repair task aborted")??;

    fs::write(&file_path, corrected)
        .with_context(|| format!("Failed to write {}", file_path.display()))?;
    println!("✓ File fixed");
    Ok(())
}

pub async fn fix_project(
    config: GeneratorConfig,
    project_path: PathBuf,
    analysis_path: Option<PathBuf>,
) -> Result<()> {
    let analysis = match analysis_path {
        Some(path) => {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read analysis file: {}", path.display()))?;
            let report: AnalysisReport = serde_json::from_str(&content)
                .with_context(|| format!("Invalid analysis file: {}", path.display()))?;
            println!("📊 Using analysis from: {}", path.display());
            Some(report)
        }
        None => None,
    };

    println!("🔍 Fixing project: {}", project_path.display());
    let generator = build_generator(config).await?;
    let path = project_path.clone();
    let report =
        tokio::task::spawn_blocking(move || analysis::fix_project(&generator, &path, analysis))
            .await
            .context("repair task aborted")??;

    println!("\n✓ Repair finished:");
    println!("- Files fixed: {}", report.fixed_count);
    println!("- Files skipped: {}", report.skipped_count);
    println!("- Errors: {}", report.error_count);

    if report.fixed_count > 0 {
        println!("\nFixed files:");
        for fixed in report.details.fixed_files.iter().take(5) {
            println!("  - {} ({})", fixed.file, fixed.issue);
        }
        if report.details.fixed_files.len() > 5 {
            println!(
                "  ... and {} more files",
                report.details.fixed_files.len() - 5
            );
        }
    }

    println!(
        "\nFull report written to: {}",
        project_path.join(prefab::analyze::FIX_REPORT_FILE).display()
    );
    Ok(())
}

pub fn list_templates(config: &GeneratorConfig) -> Result<()> {
    let templates = template::list_templates(&config.templates_dir);
    if templates.is_empty() {
        println!("No templates available.");
        println!(
            "You can create some in the directory: {}",
            config.templates_dir.display()
        );
        return Ok(());
    }

    println!("\n📋 Available templates:");
    for entry in templates {
        println!("\n- {}", entry.name);
        println!("  Description: {}", entry.description);
        println!("  File: {}", entry.file.display());
    }
    Ok(())
}

pub fn save_template(
    config: &GeneratorConfig,
    project_path: PathBuf,
    template_name: String,
) -> Result<()> {
    let path = template::save_from_project(&project_path, &config.templates_dir, &template_name)?;
    println!("✓ Template '{template_name}' created");
    println!("  Path: {}", path.display());
    Ok(())
}
