use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ragindex::config::{Config, DEFAULT_CONFIG_PATH};
use ragindex::index::{ApproximateConfig, VectorIndex};
use ragindex::indexer::IndexBuilder;
use ragindex::models::Document;
use ragindex::qa::Orchestrator;
use ragindex::retriever::Retriever;
use ragindex::{embedder, generator};

#[derive(Parser)]
#[command(name = "ragindex")]
#[command(about = "Chunk, embed and search documents, then answer questions over them", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Chunk and embed text files, then write the index file
    Index {
        /// Text files to index; each file becomes one document named after its
        /// stem, so stems must be unique
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Append to the existing index instead of replacing it
        #[arg(long)]
        append: bool,
    },

    /// Print the chunks most similar to a query as JSON
    Search {
        query: String,

        /// Number of results (defaults to `top_k` from the config)
        #[arg(short)]
        k: Option<usize>,
    },

    /// Answer a question from the indexed documents
    Ask {
        query: String,

        #[arg(short)]
        k: Option<usize>,

        /// Context budget in characters (defaults to `max_context_chars`)
        #[arg(long)]
        max_context_chars: Option<usize>,
    },

    /// Show index metadata
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // 1. Load and check config
    let config = Config::load(&cli.config)?;
    config.validate().context("invalid configuration")?;

    match cli.command {
        Commands::Index { files, append } => index(&config, &files, append).await,
        Commands::Search { query, k } => search(&config, &query, k.unwrap_or(config.top_k)).await,
        Commands::Ask {
            query,
            k,
            max_context_chars,
        } => {
            ask(
                &config,
                &query,
                k.unwrap_or(config.top_k),
                max_context_chars.unwrap_or(config.max_context_chars),
            )
            .await
        }
        Commands::Stats => stats(&config),
    }
}

fn document_id(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Read each file as one document. Chunk ids derive from document ids, so
/// two files with the same stem are rejected before anything is read.
fn read_documents(files: &[PathBuf]) -> Result<Vec<Document>> {
    let mut seen: HashMap<String, &Path> = HashMap::new();
    for path in files {
        let id = document_id(path);
        if let Some(first) = seen.insert(id.clone(), path) {
            anyhow::bail!(
                "{} and {} would both be indexed as document \"{id}\"",
                first.display(),
                path.display()
            );
        }
    }

    files
        .iter()
        .map(|path| {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Ok(Document::new(document_id(path), text))
        })
        .collect()
}

/// Refuse to append documents whose ids the index already holds.
fn ensure_new_documents(index: &VectorIndex, documents: &[Document]) -> Result<()> {
    let existing: HashSet<&str> = index.chunks().map(|c| c.document_id.as_str()).collect();
    if let Some(doc) = documents.iter().find(|d| existing.contains(d.id.as_str())) {
        anyhow::bail!("document \"{}\" is already in the index", doc.id);
    }
    Ok(())
}

fn load_index(config: &Config) -> Result<VectorIndex> {
    let path = Path::new(&config.index.path);
    VectorIndex::load_with(path, ApproximateConfig::from(&config.index))
        .with_context(|| format!("failed to load index {}", path.display()))
}

async fn index(config: &Config, files: &[PathBuf], append: bool) -> Result<()> {
    let documents = read_documents(files)?;
    let embedder = embedder::from_config(config)?;
    let builder = IndexBuilder::from_config(config, embedder);

    let total = builder.chunk_all(&documents)?.len();
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("  {bar:40.cyan/blue} {pos}/{len} chunks {msg}")?
            .progress_chars("█▓░"),
    );
    let counter = pb.clone();
    let builder = builder.on_progress(Arc::new(move |n| counter.inc(n as u64)));

    let index_path = Path::new(&config.index.path);
    let index = if append && index_path.exists() {
        let mut index = load_index(config)?;
        ensure_new_documents(&index, &documents)?;
        let result = builder.extend(&mut index, &documents).await?;
        info!(
            "appended {} chunks from {} documents",
            result.chunks, result.documents
        );
        index
    } else {
        builder.build(&documents).await?
    };
    pb.finish_and_clear();

    index.persist(index_path)?;
    println!(
        "indexed {} documents into {} ({} chunks)",
        documents.len(),
        index_path.display(),
        index.len()
    );
    Ok(())
}

async fn search(config: &Config, query: &str, k: usize) -> Result<()> {
    let index = load_index(config)?;
    let retriever = Retriever::new(
        embedder::from_config(config)?,
        Arc::new(RwLock::new(index)),
        config.request_timeout(),
    );
    let result = retriever.retrieve(query, k).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn ask(config: &Config, query: &str, k: usize, max_context_chars: usize) -> Result<()> {
    let index = load_index(config)?;
    let retriever = Retriever::new(
        embedder::from_config(config)?,
        Arc::new(RwLock::new(index)),
        config.request_timeout(),
    );
    let qa = Orchestrator::from_config(config, retriever, generator::from_config(config)?);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    let answer = qa
        .answer_with_cancel(query, k, max_context_chars, &cancel)
        .await?;
    println!("{}", answer.text);
    if !answer.used_chunk_ids.is_empty() {
        println!("\nsources: {}", answer.used_chunk_ids.join(", "));
    }
    Ok(())
}

fn stats(config: &Config) -> Result<()> {
    let index = load_index(config)?;
    let stats = json!({
        "path": config.index.path,
        "count": index.len(),
        "dim": index.dim(),
        "metric": index.metric(),
        "approximate": index.is_approximate(),
        "format_version": ragindex::index::FORMAT_VERSION,
    });
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
