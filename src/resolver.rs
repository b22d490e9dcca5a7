//! Provenance resolution.
//!
//! Reconciles three independent inputs — the segment's current translation,
//! its append-only override ledger, and the semantic cache — into one derived
//! field set. `compute` is a pure function over those snapshots: resolving
//! twice with unchanged inputs yields identical output, and nothing is
//! persisted until the whole set is known.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::PgPool;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, instrument};

use crate::config::EngineConfig;
use crate::embedding::EmbeddingProvider;
use crate::ledger::{OverrideLedger, OverrideRepository};
use crate::segment::SegmentRepository;
use crate::store::StyleMemorySearch;
use crate::textdiff;
use crate::types::{EngineError, ResolvedProvenance, Segment};

/// Process-local per-segment serialization. Resolution never runs
/// concurrently with another override's acceptance for the same segment;
/// across different segments there is no ordering.
#[derive(Default)]
pub struct SegmentLocks {
    inner: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl SegmentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, segment_id: i64) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(segment_id)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

pub struct ProvenanceResolver {
    cache: Arc<dyn StyleMemorySearch>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: EngineConfig,
}

impl ProvenanceResolver {
    pub fn new(
        cache: Arc<dyn StyleMemorySearch>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: EngineConfig,
    ) -> Self {
        Self {
            cache,
            embedder,
            config,
        }
    }

    /// Compute the derived field set for one segment.
    ///
    /// Returns `Ok(None)` for segments without a translation — there is
    /// nothing to attribute yet. Any embedding or cache failure is surfaced;
    /// a partially-derived field set is never produced.
    #[instrument(skip(self, segment, ledger), fields(segment_id = segment.id))]
    pub async fn compute(
        &self,
        segment: &Segment,
        ledger: &OverrideLedger,
    ) -> Result<Option<ResolvedProvenance>, EngineError> {
        if ledger.segment_id() != segment.id {
            return Err(EngineError::InconsistentLedger(format!(
                "ledger for segment {} passed to segment {}",
                ledger.segment_id(),
                segment.id
            )));
        }

        // A segment with no translation and no edits has nothing to
        // attribute. An overridden segment resolves regardless — even an
        // edit that emptied the translation stays on the audit trail.
        let resolved = if ledger.is_empty() {
            let Some(current) = segment
                .current_translation
                .as_deref()
                .filter(|t| !t.trim().is_empty())
            else {
                return Ok(None);
            };
            self.resolve_unoverridden(segment, current).await?
        } else {
            let current = segment.current_translation.as_deref().unwrap_or("");
            self.resolve_overridden(segment, ledger, current).await?
        };

        debug!(
            source = resolved.translation_source.as_str(),
            has_override = resolved.has_override,
            "provenance resolved"
        );
        Ok(Some(resolved))
    }

    /// No overrides: the current translation is the original one. A low-bar
    /// probe asks whether any plausible cache match exists; attribution to
    /// the cache requires a direct hit against the source text.
    async fn resolve_unoverridden(
        &self,
        segment: &Segment,
        current: &str,
    ) -> Result<ResolvedProvenance, EngineError> {
        let hits = self
            .cache
            .find_nearest(
                &segment.source_text,
                1,
                self.config.provenance_probe_threshold,
                Some(segment.id),
            )
            .await?;

        let Some(best) = hits.first() else {
            return Ok(ResolvedProvenance::attributed_to_model(None));
        };

        // Translation-to-translation similarity, not the source-to-source
        // score the probe matched on.
        let style_similarity = self
            .embedder
            .text_similarity(current, &best.entry.preferred_translation)
            .await?;

        if best.similarity >= self.config.direct_hit_threshold {
            Ok(ResolvedProvenance::attributed_to_cache(style_similarity))
        } else {
            Ok(ResolvedProvenance::attributed_to_model(Some(
                style_similarity,
            )))
        }
    }

    /// Overridden: measure how much the latest edit changed, then determine
    /// what produced the translation before any human touched it, using the
    /// first override's previous text as the original.
    async fn resolve_overridden(
        &self,
        segment: &Segment,
        ledger: &OverrideLedger,
        current: &str,
    ) -> Result<ResolvedProvenance, EngineError> {
        let first = ledger
            .first()
            .ok_or_else(|| EngineError::InconsistentLedger("non-empty ledger without first".into()))?;
        let latest = ledger
            .latest()
            .ok_or_else(|| EngineError::InconsistentLedger("non-empty ledger without latest".into()))?;

        let previous = latest.previous_translation.as_deref().unwrap_or(current);
        let override_percentage = textdiff::override_percentage(previous, &latest.new_translation);
        // An empty side has no embedding worth comparing against.
        let override_similarity = if previous.trim().is_empty()
            || latest.new_translation.trim().is_empty()
        {
            0.0
        } else {
            self.embedder
                .text_similarity(&latest.new_translation, previous)
                .await?
        };

        // Original-source lookup. Excluding this segment's own cache entries
        // keeps the entry written by override acceptance from vouching for
        // the pre-override translation.
        let original = first
            .previous_translation
            .as_deref()
            .filter(|t| !t.trim().is_empty());

        let mut resolved = match original {
            None => ResolvedProvenance::attributed_to_model(None),
            Some(original_text) => {
                let hits = self
                    .cache
                    .find_nearest(
                        &segment.source_text,
                        1,
                        self.config.provenance_probe_threshold,
                        Some(segment.id),
                    )
                    .await?;

                match hits.first() {
                    None => ResolvedProvenance::attributed_to_model(None),
                    Some(best) => {
                        let style_similarity = self
                            .embedder
                            .text_similarity(original_text, &best.entry.preferred_translation)
                            .await?;
                        if best.similarity >= self.config.direct_hit_threshold {
                            ResolvedProvenance::attributed_to_cache(style_similarity)
                        } else {
                            ResolvedProvenance::attributed_to_model(Some(style_similarity))
                        }
                    }
                }
            }
        };

        resolved.has_override = true;
        resolved.override_percentage = override_percentage;
        resolved.override_similarity_score = Some(override_similarity);
        Ok(resolved)
    }

    /// Load a consistent snapshot, compute, and persist atomically under the
    /// per-segment lock. The revision guard turns a concurrent write into
    /// `ResolutionConflict` rather than a silent overwrite.
    pub async fn resolve_and_persist(
        &self,
        pool: &PgPool,
        locks: &SegmentLocks,
        segment_id: i64,
    ) -> Result<Option<ResolvedProvenance>, EngineError> {
        let _guard = locks.acquire(segment_id).await;

        let segment = SegmentRepository::fetch(pool, segment_id).await?;
        let ledger = OverrideRepository::for_segment(pool, segment_id).await?;
        let resolved = self.compute(&segment, &ledger).await?;

        if let Some(ref fields) = resolved {
            SegmentRepository::persist_provenance(pool, segment.id, segment.revision, fields)
                .await?;
        }
        Ok(resolved)
    }
}
