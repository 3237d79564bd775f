//! Command-line interface for alphaforge.
//!
//! Provides commands for running pipelines, cleaning snippets, checking
//! run status and browsing the artifact store.

use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::ResolvedConfig;
use crate::core::{sample_documents, Pipeline};
use crate::domain::context::{FOCUS, SEED_DOCUMENTS};
use crate::domain::{ArtifactKind, ContextValue, PipelineContext, Run, RunState};

/// alphaforge - lineage-tracked generation of trading alpha and feature snippets
#[derive(Parser, Debug)]
#[command(name = "alphaforge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a pipeline (built-in: alpha, feature, report)
    Run {
        /// Pipeline name (looks in pipelines_dir, then built-ins)
        pipeline_name: String,

        /// Research focus passed to the ideation stage
        #[arg(short, long)]
        focus: Option<String>,

        /// Directory of seed *.yaml documents (concept stage)
        #[arg(short, long)]
        input_dir: Option<PathBuf>,

        /// Number of seed documents to sample
        #[arg(long)]
        subset: Option<usize>,

        /// Only sample seed documents with this `tag`
        #[arg(long)]
        tag: Option<String>,

        /// Seed for document sampling
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Run the hygiene pass on a snippet and print the result
    Clean {
        /// Snippet file (reads from stdin if not provided)
        file: Option<PathBuf>,

        /// Overwrite the file instead of printing
        #[arg(short, long, requires = "file")]
        write: bool,
    },

    /// Show the latest run recorded for a lineage key (or run id)
    Status {
        key: String,
    },

    /// List recent runs
    Runs {
        /// Maximum number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// List lineage keys that have an artifact of the given kind
    Artifacts {
        /// idea, concept, formula, bundle, code, code_refined, explanation, report
        kind: ArtifactKind,
    },

    /// Print a stored artifact
    Show {
        kind: ArtifactKind,
        key: String,
    },

    /// List available pipelines
    Pipelines,

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let config = ResolvedConfig::load()?;

        match self.command {
            Commands::Run {
                pipeline_name,
                focus,
                input_dir,
                subset,
                tag,
                seed,
            } => {
                let seeds = SeedOptions {
                    input_dir,
                    subset,
                    tag,
                    seed,
                };
                run_pipeline(&config, &pipeline_name, focus, seeds).await
            }
            Commands::Clean { file, write } => clean_snippet(&config, file, write),
            Commands::Status { key } => show_status(&config, &key).await,
            Commands::Runs { limit } => list_runs(&config, limit).await,
            Commands::Artifacts { kind } => list_artifacts(&config, kind).await,
            Commands::Show { kind, key } => show_artifact(&config, kind, &key).await,
            Commands::Pipelines => list_pipelines(&config),
            Commands::Config => show_config(&config),
        }
    }
}

/// CLI overrides for the `concept:` config section
struct SeedOptions {
    input_dir: Option<PathBuf>,
    subset: Option<usize>,
    tag: Option<String>,
    seed: Option<u64>,
}

/// Run a pipeline by name
async fn run_pipeline(
    config: &ResolvedConfig,
    pipeline_name: &str,
    focus: Option<String>,
    seeds: SeedOptions,
) -> Result<()> {
    let pipeline = Pipeline::resolve(pipeline_name, config.pipelines_dir.as_deref())?;

    let mut inputs = PipelineContext::new();
    if let Some(focus) = focus {
        inputs.insert(FOCUS, ContextValue::Text(focus))?;
    }

    let needs_seeds = pipeline
        .stages
        .iter()
        .any(|s| s.requires().iter().any(|k| k == SEED_DOCUMENTS));
    if needs_seeds {
        let dir = seeds
            .input_dir
            .or_else(|| config.concept.input_dir.clone())
            .context("Pipeline needs seed documents: pass --input-dir or set concept.input_dir")?;
        let size = seeds.subset.unwrap_or(config.concept.subset_size);
        let tag = seeds.tag.or_else(|| config.concept.tag.clone());
        let documents = sample_documents(&dir, size, tag.as_deref(), seeds.seed.or(config.concept.seed))
            .await
            .with_context(|| match &tag {
                Some(tag) => format!("Failed to sample seed documents tagged '{}' from {}", tag, dir.display()),
                None => format!("Failed to sample seed documents from {}", dir.display()),
            })?;
        inputs.insert(
            SEED_DOCUMENTS,
            ContextValue::Document(serde_yaml::Value::Sequence(documents)),
        )?;
    }

    let runner = config.runner()?;
    let outcome = runner.run(&pipeline, inputs).await?;
    let run = &outcome.run;

    match &run.state {
        RunState::Completed => {
            for record in run.artifacts.values() {
                println!("{:<14} {}", record.kind.to_string(), record.path.display());
            }
            eprintln!(
                "\n[Run {} completed: {}]",
                run.id,
                run.lineage_key.as_deref().unwrap_or("-")
            );
            Ok(())
        }
        RunState::Failed { stage, error } => {
            for record in run.artifacts.values() {
                println!("{:<14} {}", record.kind.to_string(), record.path.display());
            }
            anyhow::bail!("Run {} failed at stage '{}': {}", run.id, stage, error)
        }
        RunState::Running => anyhow::bail!("Run {} did not finish", run.id),
    }
}

/// Clean a snippet from a file or stdin
fn clean_snippet(config: &ResolvedConfig, file: Option<PathBuf>, write: bool) -> Result<()> {
    let raw = match &file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read snippet: {}", path.display()))?,
        None => {
            if io::stdin().is_terminal() {
                anyhow::bail!("No input provided. Pass a file or pipe a snippet to stdin");
            }
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read from stdin")?;
            buffer
        }
    };

    let cleaned = config.hygiene_engine().inspect(&raw)?;
    let findings = &cleaned.findings;
    for name in &findings.dead_helpers {
        eprintln!("removed helper: {}", name);
    }
    for line in &findings.removed_imports {
        eprintln!("removed import: {}", line);
    }
    for line in &findings.added_imports {
        eprintln!("added import:   {}", line);
    }
    for param in &findings.unused_parameters {
        eprintln!("unused parameter: {}", param);
    }

    match file {
        Some(path) if write => std::fs::write(&path, &cleaned.code)
            .with_context(|| format!("Failed to write snippet: {}", path.display()))?,
        _ => print!("{}", cleaned.code),
    }
    Ok(())
}

fn state_label(state: &RunState) -> &'static str {
    match state {
        RunState::Running => "running",
        RunState::Completed => "completed",
        RunState::Failed { .. } => "failed",
    }
}

/// Show the status of a run
async fn show_status(config: &ResolvedConfig, key: &str) -> Result<()> {
    let run = config
        .journal()
        .load_run(key)
        .await?
        .with_context(|| format!("No run recorded for '{}'", key))?;
    print_run(&run);
    Ok(())
}

fn print_run(run: &Run) {
    println!("Run ID: {}", run.id);
    println!("Pipeline: {}", run.pipeline_name);
    println!("Lineage key: {}", run.lineage_key.as_deref().unwrap_or("-"));
    println!("State: {}", state_label(&run.state));
    if let RunState::Failed { stage, error } = &run.state {
        println!("Failed stage: {}", stage);
        println!("Error: {}", error);
    }
    println!("Started: {}", run.started_at);
    if let Some(completed) = run.completed_at {
        println!("Completed: {}", completed);
    }
    println!("Stages completed: {}", run.stages_completed);
    println!("\nArtifacts:");
    for record in run.artifacts.values() {
        println!("  {:<14} {} ({})", record.kind.to_string(), record.path.display(), record.digest);
    }
}

/// List recent runs
async fn list_runs(config: &ResolvedConfig, limit: usize) -> Result<()> {
    let runs = config.journal().recent_runs(limit).await?;

    if runs.is_empty() {
        println!("No runs found");
        return Ok(());
    }

    println!("{:<44} {:<12} {:<10}", "LINEAGE KEY", "PIPELINE", "STATE");
    println!("{}", "-".repeat(68));

    for run in runs {
        let key = run.lineage_key.clone().unwrap_or_else(|| run.id.to_string());
        println!("{:<44} {:<12} {:<10}", key, run.pipeline_name, state_label(&run.state));
    }

    Ok(())
}

async fn list_artifacts(config: &ResolvedConfig, kind: ArtifactKind) -> Result<()> {
    let keys = config.store().list(kind).await?;
    if keys.is_empty() {
        println!("No {} artifacts", kind);
    }
    for key in keys {
        println!("{}", key);
    }
    Ok(())
}

async fn show_artifact(config: &ResolvedConfig, kind: ArtifactKind, key: &str) -> Result<()> {
    let payload = config.store().load(kind, key).await?;
    print!("{}", payload.render()?);
    Ok(())
}

fn list_pipelines(config: &ResolvedConfig) -> Result<()> {
    println!("Built-in:");
    for name in Pipeline::builtin_names() {
        if let Some(pipeline) = Pipeline::builtin(name) {
            println!("  {:<12} {}", name, pipeline.description);
        }
    }

    if let Some(dir) = &config.pipelines_dir {
        println!("\nFrom {}:", dir.display());
        for path in pipeline_files(dir) {
            match Pipeline::from_file(&path) {
                Ok(pipeline) => println!("  {:<12} {}", pipeline.name, pipeline.description),
                Err(e) => println!("  {:<12} (invalid: {})", path.display(), e),
            }
        }
    }
    Ok(())
}

fn pipeline_files(dir: &Path) -> Vec<PathBuf> {
    let pattern = dir.join("*.yaml");
    let mut files: Vec<PathBuf> = glob::glob(&pattern.to_string_lossy())
        .map(|paths| paths.filter_map(Result::ok).collect())
        .unwrap_or_default();
    files.sort();
    files
}

fn show_config(config: &ResolvedConfig) -> Result<()> {
    println!(
        "Config file: {}",
        config
            .config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!("Runs: {}", config.journal().runs_dir().display());
    println!();
    print!("{}", serde_yaml::to_string(config).context("Failed to render config")?);
    Ok(())
}
