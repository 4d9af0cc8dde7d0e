use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use sei_extract_core::{
    cleanup_old_logs, discover_archives, export_documents, generate_run_id, BatchOptions,
    BatchRunner, Bucket, ExpertCatalog, ExtractionConfig, ExtractionPipeline, FeeAliases,
    FeeSchedule, FeeTable, RunState,
};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "sei-extract", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extract case records from every archive under a folder.
    Extract {
        /// Folder with .zip archives (and loose .pdf/.txt/.html files).
        #[arg(long, env = "SEI_EXTRACT_INPUT")]
        input: PathBuf,
        /// Receives per-archive records and the consolidated table.
        #[arg(long, env = "SEI_EXTRACT_OUTPUT", default_value = "outputs")]
        output: PathBuf,
        /// Consolidated table path; defaults to a CSV inside --output.
        #[arg(long)]
        table: Option<PathBuf>,
        #[arg(long, env = "SEI_EXTRACT_WORKERS")]
        workers: Option<usize>,
        /// Completed archives between checkpoints.
        #[arg(long, default_value = "25")]
        checkpoint_interval: usize,
        #[arg(long, conflicts_with = "resume")]
        run_id: Option<String>,
        /// Continue a previous run; its state file must exist in --log-dir.
        #[arg(long)]
        resume: Option<String>,
        /// Keep readable records from earlier runs instead of reprocessing
        /// their archives.
        #[arg(long)]
        skip_existing: bool,
        /// CSV with ID, DESCRICAO and VALOR columns.
        #[arg(long, env = "SEI_EXTRACT_FEE_TABLE")]
        fee_table: Option<PathBuf>,
        /// JSON list of keyword aliases pointing at fee table ids.
        #[arg(long, requires = "fee_table")]
        fee_aliases: Option<PathBuf>,
        /// CSV with PERITO and CPF/CNPJ columns.
        #[arg(long, env = "SEI_EXTRACT_EXPERT_CATALOG")]
        expert_catalog: Option<PathBuf>,
        /// Process at most this many pending archives.
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long, env = "SEI_EXTRACT_LOG_DIR", default_value = "logs/extract")]
        log_dir: PathBuf,
        /// Run logs and state files older than this are removed; 0 keeps all.
        #[arg(long, default_value = "30")]
        log_retention_days: u64,
    },
    /// Copy the documents named in an audit log out of their archives.
    Export {
        /// Audit log (`<run id>.sources.jsonl`).
        #[arg(long)]
        sources: PathBuf,
        #[arg(long)]
        output: PathBuf,
        #[arg(long, value_parser = parse_bucket, default_values = ["principal", "apoio"])]
        bucket: Vec<Bucket>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Print the checkpoint of a run.
    State {
        #[arg(long)]
        run_id: String,
        #[arg(long, env = "SEI_EXTRACT_LOG_DIR", default_value = "logs/extract")]
        log_dir: PathBuf,
    },
}

fn parse_bucket(value: &str) -> Result<Bucket, String> {
    Bucket::parse(value).ok_or_else(|| format!("unknown bucket `{value}`"))
}

/// Stderr logging, plus a plain-text copy in `<log_dir>/<run_id>.log` when a
/// run is active.
fn init_tracing(run_log: Option<&Path>) -> anyhow::Result<()> {
    let file_layer = match run_log {
        Some(path) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = File::options()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening run log {}", path.display()))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

fn load_fees(table: Option<&Path>, aliases: Option<&Path>, cutoff: f64) -> anyhow::Result<FeeSchedule> {
    let Some(table_path) = table else {
        return Ok(FeeSchedule::default().with_cutoff(cutoff));
    };
    let table = FeeTable::load(table_path)
        .with_context(|| format!("reading fee table {}", table_path.display()))?;
    let aliases = match aliases {
        Some(path) => FeeAliases::load(path, &table)
            .with_context(|| format!("reading fee aliases {}", path.display()))?,
        None => FeeAliases::default(),
    };
    info!(entries = table.len(), aliases = aliases.len(), "fee table loaded");
    Ok(FeeSchedule::new(table, aliases).with_cutoff(cutoff))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Extract {
            input,
            output,
            table,
            workers,
            checkpoint_interval,
            run_id,
            resume,
            skip_existing,
            fee_table,
            fee_aliases,
            expert_catalog,
            limit,
            log_dir,
            log_retention_days,
        } => {
            let run_id = match &resume {
                Some(run_id) => run_id.clone(),
                None => run_id.unwrap_or_else(generate_run_id),
            };
            init_tracing(Some(&log_dir.join(format!("{run_id}.log"))))?;
            info!(
                version = env!("CARGO_PKG_VERSION"),
                run_id = %run_id,
                started_at = %Utc::now().to_rfc3339(),
                "sei-extract boot"
            );

            if resume.is_none() {
                if let Err(error) = cleanup_old_logs(&log_dir, log_retention_days) {
                    warn!(error = %error, "old log cleanup failed");
                }
            }

            if !input.is_dir() {
                bail!("input folder {} does not exist", input.display());
            }
            let worklist = discover_archives(&input);

            let config = ExtractionConfig::default();
            let fees = load_fees(fee_table.as_deref(), fee_aliases.as_deref(), config.fee_match_cutoff)?;
            let mut pipeline = ExtractionPipeline::new(config).with_fees(fees);
            if let Some(path) = &expert_catalog {
                let catalog = ExpertCatalog::load(path)
                    .with_context(|| format!("reading expert catalog {}", path.display()))?;
                info!(experts = catalog.len(), "expert catalog loaded");
                pipeline = pipeline.with_catalog(catalog);
            }

            let defaults = BatchOptions::default();
            let options = BatchOptions {
                workers: workers.unwrap_or(defaults.workers),
                checkpoint_interval,
                output_dir: output,
                table_path: table,
                log_dir,
                run_id: resume.is_none().then(|| run_id.clone()),
                resume,
                skip_existing,
                limit,
            };

            let summary = BatchRunner::new(pipeline, options).run(worklist).await?;
            if !summary.duplicates.is_empty() {
                warn!(archives = ?summary.duplicates, "archives sharing a file name were ignored");
            }
            if !summary.corrupted.is_empty() {
                warn!(records = ?summary.corrupted, "corrupted records were left out of the table");
            }
            println!(
                "run {}: {} processed, {} failed, {} already done of {} -> {}",
                summary.run_id,
                summary.processed,
                summary.failed,
                summary.skipped,
                summary.total,
                summary.table.display()
            );
        }
        Command::Export {
            sources,
            output,
            bucket,
            limit,
        } => {
            init_tracing(None)?;
            let buckets: BTreeSet<Bucket> = bucket.into_iter().collect();
            let copied = export_documents(&sources, &output, &buckets, limit)?;
            println!("{} documents exported to {}", copied.len(), output.display());
        }
        Command::State { run_id, log_dir } => {
            init_tracing(None)?;
            let Some(state) = RunState::load(&log_dir, &run_id)? else {
                bail!(
                    "no state for run {run_id} at {}",
                    RunState::path(&log_dir, &run_id).display()
                );
            };
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
    }

    Ok(())
}
