use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "prefab")]
#[command(about = "Scaffolds software projects by prompting a locally hosted generation model", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, global = true, help = "Path to a configuration file")]
    config: Option<PathBuf>,

    #[arg(long, global = true, help = "Model identifier to use")]
    model: Option<String>,

    #[arg(long, global = true, help = "Base directory for created projects")]
    path: Option<PathBuf>,

    #[arg(long, global = true, help = "Disable the response cache")]
    no_cache: bool,

    #[arg(long, global = true, help = "Skip git repository initialization")]
    no_git: bool,

    #[arg(long, global = true, help = "Skip virtual environment setup")]
    no_venv: bool,

    #[arg(long, global = true, help = "Enable verbose debug output")]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Create a new project from a description")]
    Create {
        #[arg(help = "Description of the project to create")]
        description: String,

        #[arg(long, short = 't', help = "Template to use")]
        template: Option<String>,
    },

    #[command(about = "Validate a generated project and repair what can be repaired")]
    Validate {
        #[arg(help = "Path to the project to validate")]
        project_path: PathBuf,
    },

    #[command(about = "Analyze a project for potential problems")]
    Analyze {
        #[arg(help = "Path to the project to analyze")]
        project_path: PathBuf,

        #[arg(long, short = 'o', help = "Output file for the analysis report (JSON)")]
        output: Option<PathBuf>,
    },

    #[command(about = "Fix a specific file based on an error description")]
    FixFile {
        #[arg(help = "Path to the file to fix")]
        file_path: PathBuf,

        #[arg(help = "Description of the problem to fix")]
        error_description: String,

        #[arg(long, short = 'b', help = "Create a backup of the original file")]
        backup: bool,
    },

    #[command(about = "Automatically fix the problems found in a project")]
    FixProject {
        #[arg(help = "Path to the project to fix")]
        project_path: PathBuf,

        #[arg(long, short = 'a', help = "JSON file containing an existing analysis")]
        analysis: Option<PathBuf>,
    },

    #[command(about = "List the available templates")]
    ListTemplates,

    #[command(about = "Save an existing project as a template")]
    SaveTemplate {
        #[arg(help = "Path to the project to save")]
        project_path: PathBuf,

        #[arg(help = "Name of the template")]
        template_name: String,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("✗ {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = prefab::GeneratorConfig::load(cli.config.as_deref())?;

    // CLI flags override everything the config resolution produced.
    if let Some(model) = cli.model {
        config.model_name = model;
    }
    if let Some(path) = cli.path {
        config.base_path = path;
    }
    if cli.no_cache {
        config.cache_enabled = false;
    }
    if cli.no_git {
        config.init_git = false;
    }
    if cli.no_venv {
        config.setup_venv = false;
    }

    match cli.command {
        Commands::Create {
            description,
            template,
        } => cli::create(config, description, template).await,
        Commands::Validate { project_path } => cli::validate(config, project_path).await,
        Commands::Analyze {
            project_path,
            output,
        } => cli::analyze(config, project_path, output).await,
        Commands::FixFile {
            file_path,
            error_description,
            backup,
        } => cli::fix_file(config, file_path, error_description, backup).await,
        Commands::FixProject {
            project_path,
            analysis,
        } => cli::fix_project(config, project_path, analysis).await,
        Commands::ListTemplates => cli::list_templates(&config),
        Commands::SaveTemplate {
            project_path,
            template_name,
        } => cli::save_template(&config, project_path, template_name),
    }
}
