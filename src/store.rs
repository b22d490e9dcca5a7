//! Semantic cache over approved translations (the style memory store).
//!
//! Entries are created only via explicit approval — an accepted override or a
//! bulk population pass over a trusted corpus — and never mutated afterwards.
//! Queries are cosine nearest-neighbor over pgvector, read-only, with ties
//! broken toward the newest entry (newer editorial judgment wins).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::{PgExecutor, PgPool};
use tracing::{debug, info, instrument};

use crate::config::EngineConfig;
use crate::embedding::EmbeddingProvider;
use crate::types::{EngineError, NearestMatch, NewStyleMemory, StyleMemoryEntry};

/// Read seam the resolver goes through. Production uses the pgvector store;
/// tests substitute a deterministic in-memory cache.
#[async_trait]
pub trait StyleMemorySearch: Send + Sync {
    /// Nearest entries by source-text cosine similarity, descending, at most
    /// `k`, all with similarity ≥ `threshold`. `exclude_segment` omits
    /// entries back-referencing that segment so a segment's own approved
    /// override can never vouch for its original provenance.
    async fn find_nearest(
        &self,
        source_text: &str,
        k: usize,
        threshold: f32,
        exclude_segment: Option<i64>,
    ) -> Result<Vec<NearestMatch>, EngineError>;
}

/// Outcome of the reuse policy for one translation request.
#[derive(Debug, Clone)]
pub enum ReuseDecision {
    /// At or above the direct-hit threshold: the cached translation is
    /// returned verbatim, the model is not invoked.
    Direct(NearestMatch),
    /// In the hint band: surfaced to a human, never substituted.
    Hint(NearestMatch),
    Miss,
}

impl ReuseDecision {
    /// Classify the best of an already-ranked match list.
    pub fn from_matches(mut matches: Vec<NearestMatch>, config: &EngineConfig) -> Self {
        if matches.is_empty() {
            return Self::Miss;
        }
        let best = matches.remove(0);
        if best.similarity >= config.direct_hit_threshold {
            Self::Direct(best)
        } else if best.similarity >= config.hint_threshold {
            Self::Hint(best)
        } else {
            Self::Miss
        }
    }
}

/// pgvector-backed style memory store.
pub struct StyleMemoryStore {
    pool: PgPool,
    embedder: Arc<dyn EmbeddingProvider>,
    config: EngineConfig,
}

impl StyleMemoryStore {
    pub fn new(pool: PgPool, embedder: Arc<dyn EmbeddingProvider>, config: EngineConfig) -> Self {
        Self {
            pool,
            embedder,
            config,
        }
    }

    /// Embed the source text and persist a new entry. The insert is a single
    /// statement, so an embedding failure leaves no partial state.
    #[instrument(skip(self, new), fields(segment_id = ?new.segment_id))]
    pub async fn put(&self, new: &NewStyleMemory) -> Result<i64, EngineError> {
        let embedding = self.embed_checked(&new.source_text).await?;
        let id = Self::insert_with_embedding(&self.pool, new, embedding).await?;
        info!(entry_id = id, "style memory entry added");
        Ok(id)
    }

    /// Compute an embedding and verify it matches the configured dimension.
    pub async fn embed_checked(&self, text: &str) -> Result<Vec<f32>, EngineError> {
        let embedding = self.embedder.embed(text).await?;
        if embedding.len() != self.config.embedding_dim {
            return Err(EngineError::DimensionMismatch {
                expected: self.config.embedding_dim,
                got: embedding.len(),
            });
        }
        Ok(embedding)
    }

    /// Insert a pre-embedded entry. Exposed so override acceptance can write
    /// the cache row inside its own transaction.
    pub async fn insert_with_embedding<'e, E: PgExecutor<'e>>(
        executor: E,
        new: &NewStyleMemory,
        embedding: Vec<f32>,
    ) -> Result<i64, EngineError> {
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO style_memory
                (segment_id, source_text, preferred_translation, embedding,
                 approved_by, engine, similarity_score)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(new.segment_id)
        .bind(&new.source_text)
        .bind(&new.preferred_translation)
        .bind(Vector::from(embedding))
        .bind(&new.approved_by)
        .bind(&new.engine)
        .bind(new.similarity_score)
        .fetch_one(executor)
        .await
        .map_err(EngineError::CacheUnavailable)?;

        Ok(row.0)
    }

    /// Entries approved within the last `days` days. Feeds the retraining
    /// trigger.
    pub async fn override_count_since(&self, days: i32) -> Result<i64, EngineError> {
        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM style_memory
            WHERE created_at >= NOW() - make_interval(days => $1)
            "#,
        )
        .bind(days)
        .fetch_one(&self.pool)
        .await
        .map_err(EngineError::CacheUnavailable)?;
        Ok(row.0)
    }

    /// Most recently approved (source, preferred) pairs, for retraining
    /// export.
    pub async fn recent_entries(&self, limit: i64) -> Result<Vec<(String, String)>, EngineError> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            r#"
            SELECT source_text, preferred_translation
            FROM style_memory
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(EngineError::CacheUnavailable)?;
        Ok(rows)
    }
}

#[async_trait]
impl StyleMemorySearch for StyleMemoryStore {
    async fn find_nearest(
        &self,
        source_text: &str,
        k: usize,
        threshold: f32,
        exclude_segment: Option<i64>,
    ) -> Result<Vec<NearestMatch>, EngineError> {
        let embedding = self.embed_checked(source_text).await?;
        let query_vec = Vector::from(embedding);

        let rows: Vec<(
            i64,
            Option<i64>,
            String,
            String,
            Option<String>,
            Option<String>,
            Option<f32>,
            DateTime<Utc>,
            f64,
        )> = sqlx::query_as(
            r#"
            SELECT
                id, segment_id, source_text, preferred_translation,
                approved_by, engine, similarity_score, created_at,
                1 - (embedding <=> $1::vector) AS similarity
            FROM style_memory
            WHERE 1 - (embedding <=> $1::vector) >= $2
              AND ($3::bigint IS NULL OR segment_id IS DISTINCT FROM $3)
            ORDER BY embedding <=> $1::vector, created_at DESC
            LIMIT $4
            "#,
        )
        .bind(&query_vec)
        .bind(threshold as f64)
        .bind(exclude_segment)
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(EngineError::CacheUnavailable)?;

        debug!(hits = rows.len(), threshold, "style memory query");

        Ok(rows
            .into_iter()
            .map(
                |(
                    id,
                    segment_id,
                    source_text,
                    preferred_translation,
                    approved_by,
                    engine,
                    similarity_score,
                    created_at,
                    similarity,
                )| NearestMatch {
                    entry: StyleMemoryEntry {
                        id,
                        segment_id,
                        source_text,
                        preferred_translation,
                        approved_by,
                        engine,
                        similarity_score,
                        created_at,
                    },
                    similarity: similarity as f32,
                },
            )
            .collect())
    }
}
