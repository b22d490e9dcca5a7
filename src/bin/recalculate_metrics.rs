//! Recompute provenance for every segment, then record the daily metrics
//! snapshot.
//!
//! Resolution runs bounded-concurrent; one segment's failure is reported and
//! the batch continues. The snapshot step is skipped with a notice when
//! today's row already exists, so the job is safe to re-run.
//!
//! Run with:
//!   DATABASE_URL="postgresql:///styledb" EMBEDDING_ENDPOINT="http://localhost:8089/embed" \
//!     cargo run --bin recalculate_metrics
//!
//! Options:
//!   --skip-snapshot    Recompute provenance only, do not write a snapshot

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use style_memory_engine::{EngineConfig, EngineError, HttpEmbeddingProvider, StyleMemoryEngine};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(about = "Recompute segment provenance and record the daily metrics snapshot")]
struct Args {
    /// Recompute provenance only, do not write a snapshot.
    #[arg(long)]
    skip_snapshot: bool,

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

    let report = engine
        .recalculate_all()
        .await
        .context("Batch provenance recalculation failed")?;
    info!(
        "Provenance: {} resolved, {} skipped, {} failed",
        report.resolved,
        report.skipped,
        report.failed.len()
    );
    for (segment_id, error) in &report.failed {
        warn!(segment_id = *segment_id, error = %error, "segment failed to resolve");
    }

    if args.skip_snapshot {
        info!("--skip-snapshot: not writing a snapshot");
        return Ok(());
    }

    let today = chrono::Utc::now().date_naive();
    match engine.compute_metrics_snapshot(today).await {
        Ok(snapshot) => {
            info!(
                "Snapshot {} recorded: BLEU {:.2}, chrF {:.2}, style {:.3}, MOR {:.1}%, AR {:.1}%",
                snapshot.date,
                snapshot.bleu,
                snapshot.chrf,
                snapshot.style_similarity,
                snapshot.manual_override_rate,
                snapshot.attribution_ratio
            );
        }
        Err(EngineError::SnapshotExists(date)) => {
            info!("Snapshot for {date} already recorded, nothing to do");
        }
        Err(e) => return Err(e).context("Failed to record metrics snapshot"),
    }

    Ok(())
}
