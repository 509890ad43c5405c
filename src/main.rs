//! # Grounded RAG CLI (`grag`)
//!
//! ## Usage
//!
//! ```bash
//! grag --config ./config/grag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `grag init` | Create the SQLite database and run schema migrations |
//! | `grag ingest <path> --tenant T` | Ingest a file, or every file under a directory |
//! | `grag search "<query>" --tenant T` | Show the diversified hits for a query |
//! | `grag ask "<query>" --tenant T` | Answer a query with validated citations |
//! | `grag serve` | Start the HTTP server |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG`
//! (default `grounded_rag=info,tower_http=info`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::bail;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use grounded_rag::config::{self, Config};
use grounded_rag::models::TenantId;
use grounded_rag::pipeline::RagPipeline;
use grounded_rag::server;
use grounded_rag::store::SqliteStore;

/// Grounded RAG: tenant-scoped retrieval with cited answers.
#[derive(Parser)]
#[command(name = "grag", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/grag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Ingest a document, or every file under a directory.
    ///
    /// Directory entries use their file stem as document id. Re-ingesting
    /// a document id replaces its previous chunks.
    Ingest {
        /// File path, `file://` URI, or directory.
        path: String,

        #[arg(long)]
        tenant: String,

        /// Document id for a single file. Defaults to the file stem.
        #[arg(long)]
        doc_id: Option<String>,
    },

    /// Show the diversified hits for a query.
    Search {
        query: String,

        #[arg(long)]
        tenant: String,

        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Answer a query from the tenant's documents, with citations.
    Ask {
        query: String,

        #[arg(long)]
        tenant: String,

        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("grounded_rag=info,tower_http=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = if cli.config.exists() {
        config::load_config(&cli.config)?
    } else {
        tracing::warn!(
            path = %cli.config.display(),
            "config file not found, using defaults"
        );
        Config::minimal()
    };

    match cli.command {
        Commands::Init => {
            SqliteStore::open(&cfg.db.path).await?;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Ingest {
            path,
            tenant,
            doc_id,
        } => {
            let tenant = TenantId::new(&tenant)?;
            let pipeline = RagPipeline::from_config(&cfg).await?;
            run_ingest(&pipeline, &tenant, &path, doc_id).await?;
        }
        Commands::Search {
            query,
            tenant,
            top_k,
        } => {
            let tenant = TenantId::new(&tenant)?;
            let pipeline = RagPipeline::from_config(&cfg).await?;
            let hits = pipeline.search(&tenant, &query, top_k).await?;
            if hits.is_empty() {
                println!("No results.");
            }
            for (i, hit) in hits.iter().enumerate() {
                println!(
                    "{}. [{:.3}] {} p.{} {} ({})",
                    i + 1,
                    hit.score,
                    hit.doc_id,
                    hit.page,
                    hit.chunk_id,
                    hit.path
                );
                println!("    {}", hit.preview_text.replace('\n', " "));
            }
        }
        Commands::Ask {
            query,
            tenant,
            top_k,
        } => {
            let tenant = TenantId::new(&tenant)?;
            let pipeline = RagPipeline::from_config(&cfg).await?;
            let response = pipeline.ask(&tenant, &query, top_k).await?;
            println!("{}\n", response.answer);
            println!("Sources:");
            for c in &response.citations {
                println!(
                    "  - {} p.{} {} {} ({})",
                    c.doc_id, c.page, c.chunk_id, c.checksum, c.path
                );
            }
            println!("\n({} ms)", response.latency_ms);
        }
        Commands::Serve => {
            let pipeline = Arc::new(RagPipeline::from_config(&cfg).await?);
            server::run_server(&cfg.server.bind, pipeline).await?;
        }
    }

    Ok(())
}

async fn run_ingest(
    pipeline: &RagPipeline,
    tenant: &TenantId,
    path: &str,
    doc_id: Option<String>,
) -> anyhow::Result<()> {
    let local = path.strip_prefix("file://").unwrap_or(path);
    if !Path::new(local).is_dir() {
        let doc_id = match doc_id {
            Some(d) => d,
            None => file_stem(Path::new(local))?,
        };
        let report = pipeline.ingest(tenant, path, &doc_id).await?;
        println!(
            "Ingested {} ({} chunks, job {})",
            report.doc_id, report.chunks, report.job_id
        );
        return Ok(());
    }

    if doc_id.is_some() {
        bail!("--doc-id cannot be used when ingesting a directory");
    }

    let mut files: Vec<PathBuf> = WalkDir::new(local)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .collect();
    files.sort();

    let doc_ids = directory_doc_ids(&files)?;

    let mut ok = 0usize;
    let mut failed = 0usize;
    for (file, doc_id) in files.iter().zip(&doc_ids) {
        let uri = file.to_string_lossy();
        match pipeline.ingest(tenant, &uri, doc_id).await {
            Ok(report) => {
                ok += 1;
                println!("  {} → {} chunks", report.doc_id, report.chunks);
            }
            Err(e) => {
                failed += 1;
                eprintln!("  {} failed: {}", file.display(), e);
            }
        }
    }
    println!("Ingested {} of {} files ({} failed)", ok, files.len(), failed);
    Ok(())
}

/// One document id per file, taken from its stem. Fails when two files
/// share a stem.
fn directory_doc_ids(files: &[PathBuf]) -> anyhow::Result<Vec<String>> {
    let mut seen: HashMap<String, &PathBuf> = HashMap::new();
    let mut ids = Vec::with_capacity(files.len());
    for file in files {
        let id = file_stem(file)?.trim().to_string();
        if let Some(first) = seen.insert(id.clone(), file) {
            bail!(
                "document id '{}' is derived from both {} and {}; ingest them separately with --doc-id",
                id,
                first.display(),
                file.display()
            );
        }
        ids.push(id);
    }
    Ok(ids)
}

fn file_stem(path: &Path) -> anyhow::Result<String> {
    match path.file_stem().and_then(|s| s.to_str()) {
        Some(stem) if !stem.is_empty() => Ok(stem.to_string()),
        _ => bail!("cannot derive a document id from {}", path.display()),
    }
}
