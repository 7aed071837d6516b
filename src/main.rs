// gemflows — Run multi-step AI workflows from YAML recipes
// License: Apache-2.0

use anyhow::Context;
use clap::{Parser, Subcommand};
use gemflows::capability::clipboard::SystemClipboard;
use gemflows::capability::file::LocalFileSink;
use gemflows::capability::terminal::TerminalInput;
use gemflows::config::Config;
use gemflows::engine::{Dependencies, Engine};
use gemflows::fetcher::{FetcherOptions, RecipeFetcher};
use gemflows::provider::factory::create_provider;
use gemflows::workflow::parser::{list_keys, load_from_file, parse_workflow};
use gemflows::workflow::{StepKind, Workflow};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const TELEMETRY_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "gemflows",
    about = "gemflows — Run multi-step AI workflows from YAML recipes",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow by recipe name or file path
    Run {
        /// Recipe key (e.g. `blog_post`, `marketing/launch`) or path to a YAML file
        recipe: String,
        /// Config file path
        #[arg(short, long)]
        config: Option<String>,
        /// Local directory searched before the remote catalog
        #[arg(short, long)]
        workflows_dir: Option<String>,
        /// Base URL of the remote recipe catalog
        #[arg(long)]
        recipes_base_url: Option<String>,
    },
    /// List available recipes
    List {
        /// List the remote catalog instead of the local workflows directory
        #[arg(short, long)]
        remote: bool,
        /// Git ref of the remote catalog
        #[arg(long = "ref")]
        git_ref: Option<String>,
        /// Config file path
        #[arg(short, long)]
        config: Option<String>,
        /// Local workflows directory
        #[arg(short, long)]
        workflows_dir: Option<String>,
    },
    /// Show version information
    Version,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    gemflows::logger::init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            recipe,
            config,
            workflows_dir,
            recipes_base_url,
        } => {
            run_cmd(
                &recipe,
                config.as_deref(),
                workflows_dir.as_deref(),
                recipes_base_url.as_deref(),
            )
            .await
        }
        Commands::List {
            remote,
            git_ref,
            config,
            workflows_dir,
        } => list_cmd(remote, git_ref.as_deref(), config.as_deref(), workflows_dir.as_deref()).await,
        Commands::Version => {
            version_cmd();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// Run command
// ---------------------------------------------------------------------------

async fn run_cmd(
    recipe: &str,
    config_path: Option<&str>,
    workflows_dir: Option<&str>,
    recipes_base_url: Option<&str>,
) -> anyhow::Result<()> {
    let cfg = load_config(config_path)?;
    let dir = workflows_dir.unwrap_or(&cfg.recipes.workflows_dir);

    let workflow = resolve_workflow(&cfg, recipe, Path::new(dir), recipes_base_url).await?;

    let clipboard = SystemClipboard::detect().await;
    let telemetry = gemflows::telemetry::from_config(&cfg.telemetry);
    let deps = Dependencies {
        generator: create_provider(&cfg)?,
        input: Arc::new(TerminalInput::new(clipboard.clone())),
        clipboard: Arc::new(clipboard),
        files: Arc::new(LocalFileSink),
        telemetry: telemetry.clone(),
    };

    println!("==> {} ({} steps)", workflow.name, workflow.steps.len());
    if !workflow.description.is_empty() {
        println!("    {}", workflow.description);
    }

    let result = Engine::new(deps).run(&workflow).await;

    // Deliver pending telemetry whether or not the run succeeded.
    if let Some(sink) = &telemetry {
        sink.flush(TELEMETRY_FLUSH_TIMEOUT).await;
    }
    let memory = result?;

    for (id, output) in memory.iter() {
        tracing::debug!(step = %id, output_len = output.len(), "Step output");
    }

    // The last generated text is what the user usually came for.
    let last_generated = workflow
        .steps
        .iter()
        .rev()
        .find(|s| s.kind == StepKind::Generate)
        .and_then(|s| memory.get(&s.id));
    if let Some(text) = last_generated {
        println!("\n{}\n", text);
    }
    println!("<== completed {}", workflow.name);
    Ok(())
}

/// Find the workflow for `recipe`: a YAML file in the local workflows
/// directory wins, then a direct path or the remote catalog.
async fn resolve_workflow(
    cfg: &Config,
    recipe: &str,
    dir: &Path,
    recipes_base_url: Option<&str>,
) -> anyhow::Result<Workflow> {
    if let Some(path) = local_recipe(dir, recipe) {
        tracing::info!(path = %path.display(), "Loading local workflow");
        return load_from_file(&path);
    }

    let fetcher = RecipeFetcher::new(FetcherOptions::from_config(&cfg.recipes, recipes_base_url))?;
    let fetched = fetcher.get(recipe).await?;
    tracing::info!(
        recipe = %fetched.recipe_name,
        source = fetched.source.as_str(),
        url = fetched.url.as_deref().unwrap_or(""),
        "Recipe loaded"
    );
    parse_workflow(&fetched.data).with_context(|| format!("recipe {}", fetched.recipe_name))
}

fn local_recipe(dir: &Path, key: &str) -> Option<PathBuf> {
    if key.is_empty() {
        return None;
    }
    let candidates = if Path::new(key).extension().is_some() {
        vec![dir.join(key)]
    } else {
        vec![
            dir.join(format!("{}.yaml", key)),
            dir.join(format!("{}.yml", key)),
        ]
    };
    candidates.into_iter().find(|p| p.is_file())
}

// ---------------------------------------------------------------------------
// List command
// ---------------------------------------------------------------------------

async fn list_cmd(
    remote: bool,
    git_ref: Option<&str>,
    config_path: Option<&str>,
    workflows_dir: Option<&str>,
) -> anyhow::Result<()> {
    let cfg = load_config(config_path)?;

    let keys = if remote {
        let fetcher = RecipeFetcher::new(FetcherOptions::from_config(&cfg.recipes, None))?;
        fetcher
            .list_remote_keys(git_ref.unwrap_or(&cfg.recipes.github_ref))
            .await?
    } else {
        let dir = workflows_dir.unwrap_or(&cfg.recipes.workflows_dir);
        list_keys(Path::new(dir))?
    };

    if keys.is_empty() {
        println!("No recipes found.");
    }
    for key in keys {
        println!("{}", key);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Version command
// ---------------------------------------------------------------------------

fn version_cmd() {
    println!("gemflows v{}", gemflows::VERSION);
    println!("  Built with Rust");
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn load_config(path: Option<&str>) -> anyhow::Result<Config> {
    let config_path = match path {
        Some(p) => PathBuf::from(p),
        None => Config::default_path().unwrap_or_else(|_| PathBuf::from("config.json")),
    };

    let cfg = Config::load(&config_path)
        .with_context(|| format!("load config {}", config_path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}
