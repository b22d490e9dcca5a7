//! Populate the style memory cache from a trusted corpus file.
//!
//! Reads tab-separated (source, preferred translation) pairs and inserts each
//! as an approved cache entry. Lines without a tab or with an empty side are
//! skipped with a warning; an embedding failure aborts the run so a flaky
//! provider cannot leave a half-populated cache unnoticed.
//!
//! Run with:
//!   DATABASE_URL="postgresql:///styledb" EMBEDDING_ENDPOINT="http://localhost:8089/embed" \
//!     cargo run --bin populate_style_memory -- --corpus pairs.tsv
//!
//! Options:
//!   --corpus <FILE>      TSV file of source<TAB>translation pairs
//!   --approved-by <who>  Recorded as the approver on every entry
//!   --engine <name>      Recorded as the originating engine (default: bulk-import)

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use style_memory_engine::{EngineConfig, HttpEmbeddingProvider, NewStyleMemory, StyleMemoryEngine};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(about = "Bulk-load approved translation pairs into the style memory cache")]
struct Args {
    /// TSV file of source<TAB>translation pairs, one per line.
    #[arg(long)]
    corpus: String,

    /// Recorded as the approver on every inserted entry.
    #[arg(long, default_value = "bulk-import")]
    approved_by: String,

    /// Recorded as the originating engine on every inserted entry.
    #[arg(long, default_value = "bulk-import")]
    engine: String,

    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    #[arg(long, env = "EMBEDDING_ENDPOINT")]
    embedding_endpoint: String,

    #[arg(long, env = "EMBEDDING_MODEL", default_value = "nomic-embed-text")]
    embedding_model: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let config = EngineConfig::from_env();

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&args.database_url)
        .await
        .context("Failed to connect to database")?;
    info!("Connected to database");

    let embedder = Arc::new(HttpEmbeddingProvider::new(
        args.embedding_endpoint.clone(),
        args.embedding_model.clone(),
        Duration::from_secs(config.embed_timeout_secs),
    ));
    let engine = StyleMemoryEngine::new(pool, embedder, config);

    let corpus = std::fs::read_to_string(&args.corpus)
        .with_context(|| format!("Failed to read corpus file {}", args.corpus))?;

    let start = std::time::Instant::now();
    let mut inserted = 0usize;
    let mut skipped = 0usize;

    for (lineno, line) in corpus.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let Some((source, translation)) = line.split_once('\t') else {
            warn!(line = lineno + 1, "no tab separator, skipping");
            skipped += 1;
            continue;
        };
        let (source, translation) = (source.trim(), translation.trim());
        if source.is_empty() || translation.is_empty() {
            warn!(line = lineno + 1, "empty source or translation, skipping");
            skipped += 1;
            continue;
        }

        let id = engine
            .add_style_memory(&NewStyleMemory {
                source_text: source.to_string(),
                preferred_translation: translation.to_string(),
                segment_id: None,
                approved_by: Some(args.approved_by.clone()),
                engine: Some(args.engine.clone()),
                similarity_score: None,
            })
            .await
            .with_context(|| format!("Failed to insert pair at line {}", lineno + 1))?;
        inserted += 1;

        if inserted % 100 == 0 {
            let rate = inserted as f64 / start.elapsed().as_secs_f64();
            info!(inserted, last_id = id, "progress ({:.0} pairs/sec)", rate);
        }
    }

    info!(
        "Population complete: {} inserted, {} skipped in {:.2}s",
        inserted,
        skipped,
        start.elapsed().as_secs_f64()
    );

    Ok(())
}
