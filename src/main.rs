//! # Veritext CLI (`vtx`)
//!
//! Command-line front end for the analysis pipeline: database setup, the
//! HTTP server, one-shot analysis of a local file, and report inspection.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `vtx init` | Create the SQLite database and run schema migrations |
//! | `vtx serve` | Start the HTTP API |
//! | `vtx analyze <path>` | Analyse a file in-process and wait for the result |
//! | `vtx status <id>` | Show a stored job |
//! | `vtx list` | List recent jobs |
//! | `vtx stats` | Dashboard aggregates |
//! | `vtx export <id>` | Write the report data of a completed job as JSON |
//! | `vtx detectors` | List configured detectors |
//!
//! ## Examples
//!
//! ```bash
//! vtx init --config ./config/vtx.toml
//! vtx analyze ./essay.docx --config ./config/vtx.toml
//! vtx export 9b2c… --output ./reports/essay.json
//! RUST_LOG=veritext=debug vtx serve
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use veritext::config::{self, Config};
use veritext::detector::DetectorRegistry;
use veritext::export::{write_report, ReportDocument};
use veritext::jobs::{IngestRequest, JobManager, Payload};
use veritext::migrate;
use veritext::models::{AnalysisJob, JobStatus, Label};
use veritext::server;
use veritext::sqlite_store::SqliteReportStore;
use veritext::stats;

/// Veritext: plagiarism and AI-content analysis pipeline.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/vtx.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "vtx",
    about = "Veritext — plagiarism and AI-content analysis pipeline",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/vtx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Start the HTTP API on `[server].bind`.
    Serve,

    /// Analyse a local document and print the outcome.
    Analyze {
        /// File to analyse (.txt, .pdf or .docx).
        path: PathBuf,

        /// Submit the file contents as pasted text, bypassing format detection.
        #[arg(long)]
        text: bool,

        /// Print the full job snapshot as JSON.
        #[arg(long)]
        json: bool,

        /// Owner reference recorded on the job.
        #[arg(long)]
        owner: Option<String>,

        /// Give up waiting after this many seconds.
        #[arg(long, default_value_t = 300)]
        timeout_secs: u64,
    },

    /// Show a stored job.
    Status {
        /// Job UUID.
        id: String,
    },

    /// List recent jobs, newest first.
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Show dashboard statistics.
    Stats,

    /// Export the report data of a completed job.
    Export {
        /// Job UUID.
        id: String,

        /// Output file path. Prints to stdout if omitted.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// List configured detectors and the required-kind coverage.
    Detectors,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            let jobs = open_manager(&cfg).await?;
            server::run_server(&cfg, jobs).await?;
        }
        Commands::Analyze {
            path,
            text,
            json,
            owner,
            timeout_secs,
        } => {
            let jobs = open_manager(&cfg).await?;
            let job = analyze(&jobs, &path, text, owner, Duration::from_secs(timeout_secs)).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(job.as_ref())?);
            } else {
                print_job(&job);
            }
            if job.status == JobStatus::Failed {
                std::process::exit(1);
            }
        }
        Commands::Status { id } => {
            let jobs = open_manager(&cfg).await?;
            let id = parse_id(&id)?;
            match jobs.get(id).await? {
                Some(job) => print_job(&job),
                None => {
                    eprintln!("Error: job not found: {}", id);
                    std::process::exit(1);
                }
            }
        }
        Commands::List { limit } => {
            let jobs = open_manager(&cfg).await?;
            let summaries = jobs.list(limit).await?;
            if summaries.is_empty() {
                println!("No jobs yet.");
            }
            for s in summaries {
                let detail = match (s.scores, s.error_kind) {
                    (Some(sc), _) => format!(
                        "plagiarism {:>3}%  ai {:>3}%  human {:>3}%",
                        sc.plagiarism, sc.ai, sc.human
                    ),
                    (None, Some(kind)) => kind,
                    (None, None) => String::new(),
                };
                println!(
                    "{}  {:<10}  {}  {:<32}  {}",
                    s.id,
                    s.status,
                    s.created_at.format("%Y-%m-%d %H:%M"),
                    s.filename,
                    detail
                );
            }
        }
        Commands::Stats => {
            let jobs = open_manager(&cfg).await?;
            stats::run_stats(&jobs).await?;
        }
        Commands::Export { id, output } => {
            let jobs = open_manager(&cfg).await?;
            let id = parse_id(&id)?;
            let Some(job) = jobs.get(id).await? else {
                bail!("job not found: {}", id);
            };
            let report = ReportDocument::from_job(&job)?;
            write_report(&report, output.as_deref())?;
        }
        Commands::Detectors => {
            let registry = DetectorRegistry::from_config(&cfg)?;
            print_detectors(&cfg, &registry);
        }
    }

    Ok(())
}

async fn open_manager(config: &Config) -> Result<JobManager> {
    let store = SqliteReportStore::open(&config.db.path).await?;
    let registry = DetectorRegistry::from_config(config)?;
    if registry.is_empty() {
        tracing::warn!("no detectors configured; add [detectors.http.<name>] entries");
    }
    Ok(JobManager::new(config, registry, Arc::new(store)))
}

async fn analyze(
    jobs: &JobManager,
    path: &Path,
    as_text: bool,
    owner: Option<String>,
    timeout: Duration,
) -> Result<Arc<AnalysisJob>> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let payload = if as_text {
        Payload::Text(String::from_utf8(bytes).context("--text requires a UTF-8 file")?)
    } else {
        Payload::Bytes(bytes)
    };

    let id = jobs.ingest(IngestRequest {
        filename,
        payload,
        owner,
    })?;
    eprintln!("Submitted job {}", id);

    jobs.wait(id, timeout).await
}

fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).with_context(|| format!("invalid job id: {}", raw))
}

fn print_job(job: &AnalysisJob) {
    println!("--- Job ---");
    println!("id:         {}", job.id);
    println!("filename:   {}", job.filename);
    println!("status:     {}", job.status);
    println!("created_at: {}", job.created_at.to_rfc3339());
    if let Some(done) = job.completed_at {
        println!("finished:   {}", done.to_rfc3339());
    }
    if let Some(error) = &job.error {
        println!("error:      [{}] {}", error.code(), error);
    }

    let (Some(result), Some(document)) = (&job.result, &job.document) else {
        return;
    };
    let severity = result.scores.severity();
    println!();
    println!("--- Scores ---");
    println!(
        "plagiarism: {}% ({:?})",
        result.scores.plagiarism, severity.plagiarism
    );
    println!("ai:         {}% ({:?})", result.scores.ai, severity.ai);
    println!("human:      {}%", result.scores.human);

    if !result.sources.is_empty() {
        println!();
        println!("--- Sources ({}) ---", result.sources.len());
        for m in &result.sources {
            println!(
                "[{}] {}% {} ({} chars)",
                m.source.id, m.similarity, m.source.title, m.matched_chars
            );
            println!("    {}", m.source.url);
        }
    }

    println!();
    println!("--- Segments ({}) ---", result.segments.len());
    for segment in &result.segments {
        let tag = match &segment.label {
            Label::Original => "original".to_string(),
            Label::Plagiarism {
                source_id,
                similarity,
            } => format!("plagiarism source={} {}%", source_id, similarity),
            Label::AiGenerated { confidence } => format!("ai {}%", confidence),
        };
        println!("[{}..{}] {}", segment.start, segment.end, tag);
        println!("{}", document.slice(segment.start, segment.end));
    }

    for failure in &result.skipped {
        println!();
        println!("skipped: {}", failure);
    }
}

fn print_detectors(config: &Config, registry: &DetectorRegistry) {
    if registry.is_empty() {
        println!("No detectors configured.");
    }
    for detector in registry.detectors() {
        println!(
            "{:<20} {:<14} {}",
            detector.name(),
            detector.kind(),
            detector.description()
        );
    }

    for kind in &config.pipeline.required_kinds {
        if registry.by_kind(*kind).is_empty() {
            println!("WARNING: required kind '{}' has no detector; every job will fail", kind);
        }
    }
}
