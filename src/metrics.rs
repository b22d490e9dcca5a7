//! Corpus-level quality aggregation.
//!
//! BLEU and chrF only score segments where an override actually changed the
//! text: prediction = the first override's previous translation (model-era),
//! reference = the latest accepted text. A segment without overrides has no
//! independent ground truth, so it contributes no pair — scoring a
//! translation against itself is always perfect and meaningless.
//!
//! Each metric is independently computable. An embedding failure degrades
//! the style-similarity figure to its default and is logged; it never fails
//! the snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgExecutor;
use tracing::{info, instrument, warn};

use crate::embedding::EmbeddingProvider;
use crate::ledger::OverrideLedger;
use crate::scoring::{corpus_bleu, corpus_chrf};
use crate::types::{EngineError, MetricSnapshot, MetricsSummary, Segment};

pub struct MetricsAggregator {
    embedder: Arc<dyn EmbeddingProvider>,
}

impl MetricsAggregator {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { embedder }
    }

    /// Aggregate over in-memory snapshots of segments and their ledgers.
    #[instrument(skip_all, fields(segments = segments.len()))]
    pub async fn summarize(
        &self,
        segments: &[Segment],
        ledgers: &HashMap<i64, OverrideLedger>,
    ) -> MetricsSummary {
        let total = segments.len();
        let overridden = segments
            .iter()
            .filter(|s| ledgers.get(&s.id).is_some_and(|l| !l.is_empty()))
            .count();

        let manual_override_rate = if total == 0 {
            0.0
        } else {
            100.0 * overridden as f64 / total as f64
        };

        let translated: Vec<&Segment> = segments.iter().filter(|s| s.is_translated()).collect();
        let from_cache = translated.iter().filter(|s| s.from_style_memory).count();
        let attribution_ratio = if translated.is_empty() {
            0.0
        } else {
            100.0 * from_cache as f64 / translated.len() as f64
        };

        let pairs = Self::scoring_pairs(segments, ledgers);
        let bleu = corpus_bleu(&pairs);
        let chrf = corpus_chrf(&pairs);

        let (style_similarity, skipped) = self.style_similarity(&translated, &pairs).await;

        MetricsSummary {
            bleu,
            chrf,
            style_similarity,
            manual_override_rate,
            attribution_ratio,
            total_segments: total,
            overridden_segments: overridden,
            scored_pairs: pairs.len(),
            skipped_segments: skipped,
        }
    }

    /// Prediction/reference pairs from overridden segments whose edit
    /// changed something. No-op edits and unoverridden segments contribute
    /// nothing.
    fn scoring_pairs(
        segments: &[Segment],
        ledgers: &HashMap<i64, OverrideLedger>,
    ) -> Vec<(String, String)> {
        let mut pairs = Vec::new();
        for seg in segments {
            let Some(ledger) = ledgers.get(&seg.id).filter(|l| !l.is_empty()) else {
                continue;
            };
            let (Some(first), Some(latest)) = (ledger.first(), ledger.latest()) else {
                continue;
            };
            let prediction = first
                .previous_translation
                .clone()
                .or_else(|| seg.current_translation.clone())
                .unwrap_or_default();
            let reference = latest.new_translation.clone();
            if prediction != reference {
                pairs.push((prediction, reference));
            }
        }
        pairs
    }

    /// Mean of stored per-segment scores when any exist (already
    /// translation-to-cache similarity); otherwise a batch recomputation
    /// from the scoring pairs, degrading per-pair failures to a skip.
    async fn style_similarity(
        &self,
        translated: &[&Segment],
        pairs: &[(String, String)],
    ) -> (f64, usize) {
        let stored: Vec<f64> = translated
            .iter()
            .filter_map(|s| s.style_similarity_score)
            .map(|s| s as f64)
            .collect();
        if !stored.is_empty() {
            return (stored.iter().sum::<f64>() / stored.len() as f64, 0);
        }

        let mut sims = Vec::new();
        let mut skipped = 0usize;
        for (prediction, reference) in pairs {
            match self.embedder.text_similarity(prediction, reference).await {
                Ok(s) => sims.push(s as f64),
                Err(e) => {
                    warn!(error = %e, "style similarity fallback failed for one pair");
                    skipped += 1;
                }
            }
        }
        if sims.is_empty() {
            (0.0, skipped)
        } else {
            (sims.iter().sum::<f64>() / sims.len() as f64, skipped)
        }
    }
}

type SnapshotRow = (
    i64,
    NaiveDate,
    f64,
    f64,
    f64,
    f64,
    f64,
    i64,
    i64,
    i64,
    DateTime<Utc>,
);

fn snapshot_from_row(row: SnapshotRow) -> MetricSnapshot {
    MetricSnapshot {
        id: row.0,
        date: row.1,
        bleu: row.2,
        chrf: row.3,
        style_similarity: row.4,
        manual_override_rate: row.5,
        attribution_ratio: row.6,
        total_segments: row.7,
        overridden_segments: row.8,
        skipped_segments: row.9,
        created_at: row.10,
    }
}

const SNAPSHOT_COLUMNS: &str = "id, date, bleu, chrf, style_similarity, manual_override_rate, \
     attribution_ratio, total_segments, overridden_segments, skipped_segments, created_at";

/// Dated, immutable aggregate rows; at most one per calendar date.
pub struct MetricSnapshotRepository;

impl MetricSnapshotRepository {
    pub async fn by_date<'e, E: PgExecutor<'e>>(
        executor: E,
        date: NaiveDate,
    ) -> Result<Option<MetricSnapshot>, EngineError> {
        let row: Option<SnapshotRow> = sqlx::query_as(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM metric_snapshots WHERE date = $1"
        ))
        .bind(date)
        .fetch_optional(executor)
        .await?;
        Ok(row.map(snapshot_from_row))
    }

    pub async fn latest<'e, E: PgExecutor<'e>>(
        executor: E,
    ) -> Result<Option<MetricSnapshot>, EngineError> {
        let row: Option<SnapshotRow> = sqlx::query_as(&format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM metric_snapshots ORDER BY date DESC LIMIT 1"
        ))
        .fetch_optional(executor)
        .await?;
        Ok(row.map(snapshot_from_row))
    }

    /// Insert one snapshot; a second write for the same date fails with
    /// `SnapshotExists` whether it loses the race or arrives later.
    pub async fn insert<'e, E: PgExecutor<'e>>(
        executor: E,
        date: NaiveDate,
        summary: &MetricsSummary,
    ) -> Result<MetricSnapshot, EngineError> {
        let row: Result<SnapshotRow, sqlx::Error> = sqlx::query_as(&format!(
            "INSERT INTO metric_snapshots \
                 (date, bleu, chrf, style_similarity, manual_override_rate, \
                  attribution_ratio, total_segments, overridden_segments, skipped_segments) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {SNAPSHOT_COLUMNS}"
        ))
        .bind(date)
        .bind(summary.bleu)
        .bind(summary.chrf)
        .bind(summary.style_similarity)
        .bind(summary.manual_override_rate)
        .bind(summary.attribution_ratio)
        .bind(summary.total_segments as i64)
        .bind(summary.overridden_segments as i64)
        .bind(summary.skipped_segments as i64)
        .fetch_one(executor)
        .await;

        match row {
            Ok(row) => {
                info!(%date, "metrics snapshot stored");
                Ok(snapshot_from_row(row))
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(EngineError::SnapshotExists(date))
            }
            Err(e) => Err(e.into()),
        }
    }
}
