use anyhow::Context;
use brief_ai_retriever::{
    DocumentRecord, EngineConfig, LoadOutcome, RetrievalEngine, RetrievalResult,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process;

/// A CLI tool to build and query the brief-ai chunk index.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory containing the brief-ai.db database file (overrides the config file)
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Output format
    #[arg(short, long, default_value = "summary", global = true)]
    format: OutputFormat,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the index database and resolve the embedding backend
    Init,
    /// Ingest a plain-text file
    Ingest {
        /// File to ingest
        file: PathBuf,
        /// Document identifier stored with each chunk (defaults to the file path)
        #[arg(long)]
        source: Option<String>,
    },
    /// Find the chunks nearest to a query
    Query {
        /// Query text
        text: String,
        /// Number of results
        #[arg(short, default_value_t = 5)]
        k: usize,
    },
    /// Show index statistics
    Stats,
    /// List ingested documents
    Documents,
}

#[derive(Debug, Clone, PartialEq)]
enum OutputFormat {
    Summary,
    Full,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "summary" => Ok(OutputFormat::Summary),
            "full" => Ok(OutputFormat::Full),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!("Invalid format: {s}")),
        }
    }
}

#[derive(Serialize)]
struct InitOutput {
    database: PathBuf,
    backend: Option<String>,
    model_id: String,
    outcome: String,
}

#[derive(Serialize)]
struct IngestOutput {
    source: String,
    chunks: usize,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::WARN
        })
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(args).await {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn load_config(args: &Args) -> anyhow::Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_toml_file(path).await?,
        None => EngineConfig::default(),
    };
    if let Some(data_dir) = &args.data_dir {
        config = config.with_data_dir(data_dir);
    }
    Ok(config)
}

fn describe_outcome(outcome: &LoadOutcome) -> String {
    match outcome {
        LoadOutcome::Fresh => "created empty index".to_string(),
        LoadOutcome::Restored { slots } => format!("restored {slots} slots"),
        LoadOutcome::Recovered { error, quarantined } => format!(
            "recovered from unreadable index ({error}); old file kept at {}",
            quarantined.display()
        ),
    }
}

fn print_results(results: &[RetrievalResult], format: &OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(results)?);
        }
        OutputFormat::Summary => {
            println!("Found {} chunks:", results.len());
            for result in results {
                println!(
                    "  #{} | Distance: {:.4} | Source: {} | Offset: {} | {}",
                    result.rank,
                    result.distance,
                    result.chunk.source,
                    result.chunk.offset,
                    result
                        .chunk
                        .text
                        .chars()
                        .take(60)
                        .collect::<String>()
                        .replace('\n', " ")
                );
            }
        }
        OutputFormat::Full => {
            for result in results {
                println!("Rank: {}", result.rank);
                println!("Distance: {:.6}", result.distance);
                println!("Source: {}", result.chunk.source);
                println!("Offset: {}", result.chunk.offset);
                println!("Content:\n{}", result.chunk.text);
                println!("---");
            }
        }
    }
    Ok(())
}

fn print_documents(documents: &[DocumentRecord], format: &OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(documents)?);
        }
        OutputFormat::Summary => {
            println!("Found {} documents:", documents.len());
            for doc in documents {
                println!(
                    "  ID: {} | Source: {} | Chunks: {} | Slots: {}..{}",
                    doc.id,
                    doc.source,
                    doc.chunk_count,
                    doc.first_slot,
                    doc.first_slot + doc.chunk_count
                );
            }
        }
        OutputFormat::Full => {
            for doc in documents {
                println!("Document ID: {}", doc.id);
                println!("Source: {}", doc.source);
                println!("Content Hash: {}", doc.content_hash);
                println!("Slots: {}..{}", doc.first_slot, doc.first_slot + doc.chunk_count);
                println!("Ingested At: {}", doc.ingested_at.to_rfc3339());
                println!("---");
            }
        }
    }
    Ok(())
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = load_config(&args).await?;
    let engine = RetrievalEngine::open(config).await?;
    if engine.load_outcome().is_recovered() {
        eprintln!("Warning: {}", describe_outcome(engine.load_outcome()));
    }

    let result = match &args.command {
        Commands::Init => {
            let stats = engine.stats().await?;
            let output = InitOutput {
                database: stats.database_path,
                backend: engine.backend().map(|b| b.chosen.to_string()),
                model_id: stats.model_id,
                outcome: describe_outcome(engine.load_outcome()),
            };
            match args.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
                OutputFormat::Summary | OutputFormat::Full => {
                    println!("Initialized index at {}", output.database.display());
                    if let Some(backend) = &output.backend {
                        println!("Embedding backend: {backend}");
                    }
                    println!("Model: {}", output.model_id);
                    println!("Status: {}", output.outcome);
                    if args.format == OutputFormat::Full {
                        if let Some(resolved) = engine.backend() {
                            for attempt in &resolved.attempts {
                                println!(
                                    "  {}: {}",
                                    attempt.backend,
                                    attempt.error.as_deref().unwrap_or("ok")
                                );
                            }
                        }
                    }
                }
            }
            Ok(())
        }
        Commands::Ingest { file, source } => {
            let text = tokio::fs::read_to_string(file)
                .await
                .with_context(|| format!("cannot read {} as UTF-8 text", file.display()))?;
            let source = source
                .clone()
                .unwrap_or_else(|| file.display().to_string());

            let chunks = engine.ingest(&source, &text).await?;
            let output = IngestOutput { source, chunks };
            match args.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output)?),
                OutputFormat::Summary | OutputFormat::Full => {
                    println!("Ingested {} as {} chunks", output.source, output.chunks);
                }
            }
            Ok(())
        }
        Commands::Query { text, k } => {
            let results = engine.query(text, *k).await?;
            print_results(&results, &args.format)
        }
        Commands::Stats => {
            let stats = engine.stats().await?;
            match args.format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
                OutputFormat::Summary | OutputFormat::Full => {
                    println!("Index Statistics:");
                    println!("  Database: {}", stats.database_path.display());
                    println!("  Model: {}", stats.model_id);
                    println!("  Dimension: {}", stats.dimension);
                    println!("  Chunk size: {} chars", stats.chunk_size);
                    println!("  Vectors: {}", stats.vector_count);
                    println!("  Chunk records: {}", stats.metadata_count);
                    println!("  Documents: {}", stats.document_count);
                }
            }
            Ok(())
        }
        Commands::Documents => {
            let documents = engine.documents().await?;
            print_documents(&documents, &args.format)
        }
    };

    engine.close().await;
    result
}
