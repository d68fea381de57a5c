use std::path::PathBuf;

use clap::Parser;
use ragbot_core::{EmbeddingConfig, GeminiEmbeddingClient, RagbotConfig};
use ragbot_ingest::{build_chunks, write_chunks, InputFormat};
use tracing_subscriber::{fmt, EnvFilter};

/// Load Q&A pairs or prose into the chatbot's knowledge index.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "ragbot.toml")]
    config: String,

    /// Text or JSON file to ingest
    #[arg(short, long)]
    input: PathBuf,

    /// qa, paragraphs or json
    #[arg(short, long, default_value = "qa")]
    format: InputFormat,

    /// Source label stored with every chunk (defaults to the file name)
    #[arg(long)]
    source: Option<String>,

    /// Delete existing chunks with the same source first
    #[arg(long)]
    replace: bool,

    /// Parse and report without embedding or writing
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = RagbotConfig::load(&args.config)?;

    let text = std::fs::read_to_string(&args.input)?;
    let source = args.source.clone().unwrap_or_else(|| {
        args.input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| args.input.display().to_string())
    });

    let chunks = build_chunks(args.format, &text, &source)?;
    tracing::info!(
        input = %args.input.display(),
        format = ?args.format,
        source = %source,
        chunks = chunks.len(),
        "Parsed input"
    );

    if chunks.is_empty() {
        eprintln!("No chunks found in {}", args.input.display());
        std::process::exit(1);
    }

    if args.dry_run {
        for chunk in &chunks {
            println!("--- [{}] ---\n{}", chunk.chunk_index, chunk.content);
        }
        return Ok(());
    }

    let pool = ragbot_core::db::create_pool(&config.database).await?;
    ragbot_core::db::run_migrations(&pool).await?;

    let backend = GeminiEmbeddingClient::with_base_url(
        EmbeddingConfig::from_retrieval(&config.retrieval, None),
        config.retrieval.base_url.clone(),
    )?;

    let report = write_chunks(&pool, &backend, &chunks, args.replace).await?;
    println!(
        "✅ Ingested {} chunks from {} (replaced {})",
        report.inserted, source, report.replaced
    );

    Ok(())
}
