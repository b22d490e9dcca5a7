//! Composition root: one explicitly constructed engine instance owning the
//! pool, the store, the resolver and the aggregator. No lazily-initialized
//! module state; callers build the engine once and pass it around.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::PgPool;
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

use crate::config::EngineConfig;
use crate::embedding::EmbeddingProvider;
use crate::ledger::{NewOverride, OverrideLedger, OverrideRepository};
use crate::metrics::{MetricSnapshotRepository, MetricsAggregator};
use crate::resolver::{ProvenanceResolver, SegmentLocks};
use crate::segment::SegmentRepository;
use crate::store::{ReuseDecision, StyleMemorySearch, StyleMemoryStore};
use crate::types::{
    EngineError, MetricSnapshot, MetricsSummary, NearestMatch, NewStyleMemory, Override,
    ResolvedProvenance, SegmentStatus, TranslationSource,
};

/// Opaque text → text translation model, possibly remote. The engine only
/// consults it when the reuse policy does not short-circuit.
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    async fn translate(&self, text: &str) -> Result<String, EngineError>;
}

/// An accepted correction plus the provenance recomputed for it.
#[derive(Debug, Clone)]
pub struct OverrideOutcome {
    pub accepted: Override,
    pub provenance: Option<ResolvedProvenance>,
}

/// Result of the reuse-aware translation path.
#[derive(Debug, Clone)]
pub struct TranslationOutcome {
    pub text: String,
    pub source: TranslationSource,
    /// A near match in the hint band, surfaced but never substituted.
    pub hint: Option<NearestMatch>,
}

/// Outcome of a corpus-wide provenance recomputation.
#[derive(Debug, Default)]
pub struct RecalcReport {
    pub resolved: usize,
    /// Segments with nothing to attribute (no translation, no overrides).
    pub skipped: usize,
    pub failed: Vec<(i64, String)>,
}

pub struct StyleMemoryEngine {
    pool: PgPool,
    store: Arc<StyleMemoryStore>,
    resolver: Arc<ProvenanceResolver>,
    aggregator: MetricsAggregator,
    locks: Arc<SegmentLocks>,
    embedder: Arc<dyn EmbeddingProvider>,
    config: EngineConfig,
}

impl StyleMemoryEngine {
    pub fn new(pool: PgPool, embedder: Arc<dyn EmbeddingProvider>, config: EngineConfig) -> Self {
        let store = Arc::new(StyleMemoryStore::new(
            pool.clone(),
            embedder.clone(),
            config.clone(),
        ));
        let resolver = Arc::new(ProvenanceResolver::new(
            store.clone() as Arc<dyn StyleMemorySearch>,
            embedder.clone(),
            config.clone(),
        ));
        let aggregator = MetricsAggregator::new(embedder.clone());
        Self {
            pool,
            store,
            resolver,
            aggregator,
            locks: Arc::new(SegmentLocks::new()),
            embedder,
            config,
        }
    }

    /// Add an approved pair to the semantic cache.
    pub async fn add_style_memory(&self, new: &NewStyleMemory) -> Result<i64, EngineError> {
        self.store.put(new).await
    }

    /// Nearest approved pairs for a source text. Defaults: the configured k
    /// and the hint threshold.
    pub async fn find_nearest(
        &self,
        source_text: &str,
        k: Option<usize>,
        threshold: Option<f32>,
    ) -> Result<Vec<NearestMatch>, EngineError> {
        self.store
            .find_nearest(
                source_text,
                k.unwrap_or(self.config.default_k),
                threshold.unwrap_or(self.config.hint_threshold),
                None,
            )
            .await
    }

    /// Accept a human correction: append the ledger entry, write the cache
    /// entry, recompute provenance, and persist the segment — one
    /// transaction, all or nothing.
    ///
    /// Provenance is computed before the new cache row commits, and the
    /// resolver's queries additionally exclude this segment's own entries,
    /// so the just-approved translation can never vouch for its own
    /// original.
    #[instrument(skip(self, new_translation, reason), fields(segment_id))]
    pub async fn accept_override(
        &self,
        segment_id: i64,
        new_translation: &str,
        author: &str,
        engine: &str,
        reason: Option<&str>,
    ) -> Result<OverrideOutcome, EngineError> {
        let _guard = self.locks.acquire(segment_id).await;

        let mut tx = self.pool.begin().await?;
        let segment = SegmentRepository::fetch_for_update(&mut *tx, segment_id).await?;
        let previous = segment.current_translation.clone();

        // Similarity of the accepted text to what it replaced, recorded on
        // the cache entry at creation time.
        let similarity_score = match previous.as_deref().filter(|p| !p.trim().is_empty()) {
            Some(prev) => Some(self.embedder.text_similarity(new_translation, prev).await?),
            None => None,
        };
        let embedding = self.store.embed_checked(&segment.source_text).await?;

        SegmentRepository::set_translation(
            &mut *tx,
            segment_id,
            new_translation,
            SegmentStatus::Overridden,
        )
        .await?;

        let accepted = OverrideRepository::append(
            &mut *tx,
            &NewOverride {
                segment_id,
                previous_translation: previous,
                new_translation: new_translation.to_string(),
                author: author.to_string(),
                engine: engine.to_string(),
                reason: reason.map(String::from),
            },
        )
        .await?;

        let ledger = OverrideRepository::for_segment(&mut *tx, segment_id).await?;
        let mut updated = segment.clone();
        updated.current_translation = Some(new_translation.to_string());
        updated.status = SegmentStatus::Overridden;

        let provenance = self.resolver.compute(&updated, &ledger).await?;

        StyleMemoryStore::insert_with_embedding(
            &mut *tx,
            &NewStyleMemory {
                source_text: segment.source_text.clone(),
                preferred_translation: new_translation.to_string(),
                segment_id: Some(segment_id),
                approved_by: Some(author.to_string()),
                engine: Some(engine.to_string()),
                similarity_score,
            },
            embedding,
        )
        .await?;

        if let Some(ref fields) = provenance {
            SegmentRepository::persist_provenance(&mut *tx, segment_id, segment.revision, fields)
                .await?;
        }

        tx.commit().await?;
        info!(segment_id, override_id = accepted.id, "override accepted");

        Ok(OverrideOutcome {
            accepted,
            provenance,
        })
    }

    /// Recompute and persist one segment's provenance.
    pub async fn resolve_segment_provenance(
        &self,
        segment_id: i64,
    ) -> Result<Option<ResolvedProvenance>, EngineError> {
        self.resolver
            .resolve_and_persist(&self.pool, &self.locks, segment_id)
            .await
    }

    /// Approved cache entries within the last `days` days (retraining
    /// trigger input).
    pub async fn override_count_since(&self, days: i32) -> Result<i64, EngineError> {
        self.store.override_count_since(days).await
    }

    /// Current corpus-level metrics from live data.
    pub async fn metrics_summary(&self) -> Result<MetricsSummary, EngineError> {
        let segments = SegmentRepository::all(&self.pool).await?;
        let ledgers = self.load_ledgers().await?;
        Ok(self.aggregator.summarize(&segments, &ledgers).await)
    }

    /// Compute and store the daily snapshot. At most one per calendar date;
    /// a repeat fails with `SnapshotExists`.
    pub async fn compute_metrics_snapshot(
        &self,
        as_of: NaiveDate,
    ) -> Result<MetricSnapshot, EngineError> {
        if MetricSnapshotRepository::by_date(&self.pool, as_of)
            .await?
            .is_some()
        {
            return Err(EngineError::SnapshotExists(as_of));
        }
        let summary = self.metrics_summary().await?;
        MetricSnapshotRepository::insert(&self.pool, as_of, &summary).await
    }

    /// Recompute provenance for every segment, bounded by the configured
    /// concurrency so the embedding provider is not overwhelmed. One
    /// segment's failure never aborts the batch; it lands in the report.
    pub async fn recalculate_all(&self) -> Result<RecalcReport, EngineError> {
        let segments = SegmentRepository::all(&self.pool).await?;
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_resolutions));

        let mut handles = Vec::with_capacity(segments.len());
        for segment in segments {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let resolver = self.resolver.clone();
            let locks = self.locks.clone();
            let pool = self.pool.clone();
            let id = segment.id;
            handles.push((
                id,
                tokio::spawn(async move {
                    let _permit = permit;
                    resolver.resolve_and_persist(&pool, &locks, id).await
                }),
            ));
        }

        let mut report = RecalcReport::default();
        for (id, handle) in handles {
            match handle.await {
                Ok(Ok(Some(_))) => report.resolved += 1,
                Ok(Ok(None)) => report.skipped += 1,
                Ok(Err(e)) => {
                    warn!(segment_id = id, error = %e, "resolution failed in batch");
                    report.failed.push((id, e.to_string()));
                }
                Err(e) => {
                    warn!(segment_id = id, error = %e, "resolution task panicked");
                    report.failed.push((id, e.to_string()));
                }
            }
        }
        info!(
            resolved = report.resolved,
            skipped = report.skipped,
            failed = report.failed.len(),
            "batch recalculation finished"
        );
        Ok(report)
    }

    /// Translate with cache reuse: a direct hit returns the approved
    /// translation verbatim; a hint is surfaced alongside the model output;
    /// cache trouble degrades to a plain model call.
    pub async fn translate_with_style_memory(
        &self,
        text: &str,
        translator: &dyn TranslationProvider,
    ) -> Result<TranslationOutcome, EngineError> {
        translate_with_reuse(self.store.as_ref(), translator, &self.config, text).await
    }

    async fn load_ledgers(&self) -> Result<HashMap<i64, OverrideLedger>, EngineError> {
        let overrides = OverrideRepository::all(&self.pool).await?;
        let mut grouped: HashMap<i64, Vec<crate::types::Override>> = HashMap::new();
        for o in overrides {
            grouped.entry(o.segment_id).or_default().push(o);
        }
        let mut ledgers = HashMap::with_capacity(grouped.len());
        for (segment_id, entries) in grouped {
            ledgers.insert(segment_id, OverrideLedger::new(segment_id, entries)?);
        }
        Ok(ledgers)
    }
}

/// Reuse-policy core, separated from the engine so it runs against any cache
/// implementation.
pub(crate) async fn translate_with_reuse(
    cache: &dyn StyleMemorySearch,
    translator: &dyn TranslationProvider,
    config: &EngineConfig,
    text: &str,
) -> Result<TranslationOutcome, EngineError> {
    let matches = match cache
        .find_nearest(text, 1, config.reuse_query_threshold, None)
        .await
    {
        Ok(matches) => matches,
        Err(e) => {
            // The cache is an accelerator on this path, not a dependency.
            warn!(error = %e, "style memory unavailable, falling back to model");
            Vec::new()
        }
    };

    match ReuseDecision::from_matches(matches, config) {
        ReuseDecision::Direct(hit) => {
            info!(similarity = hit.similarity, "using cached translation");
            Ok(TranslationOutcome {
                text: hit.entry.preferred_translation.clone(),
                source: TranslationSource::StyleMemory,
                hint: None,
            })
        }
        ReuseDecision::Hint(hit) => {
            let text = translator.translate(text).await?;
            Ok(TranslationOutcome {
                text,
                source: TranslationSource::Model,
                hint: Some(hit),
            })
        }
        ReuseDecision::Miss => {
            let text = translator.translate(text).await?;
            Ok(TranslationOutcome {
                text,
                source: TranslationSource::Model,
                hint: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StaticCache;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTranslator {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingTranslator {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: true,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TranslationProvider for CountingTranslator {
        async fn translate(&self, text: &str) -> Result<String, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(EngineError::TranslationUnavailable("model down".into()));
            }
            Ok(format!("MT: {text}"))
        }
    }

    #[tokio::test]
    async fn direct_hit_skips_the_model() {
        let cache = StaticCache::empty().with_entry(0.97, "Pişik xalçada oturdu.", None);
        let translator = CountingTranslator::new();
        let out = translate_with_reuse(
            &cache,
            &translator,
            &EngineConfig::default(),
            "The cat sat on the mat.",
        )
        .await
        .unwrap();
        assert_eq!(out.text, "Pişik xalçada oturdu.");
        assert_eq!(out.source, TranslationSource::StyleMemory);
        assert_eq!(translator.calls(), 0);
    }

    #[tokio::test]
    async fn hint_band_calls_model_and_surfaces_hint() {
        let cache = StaticCache::empty().with_entry(0.90, "Pişik xalçada oturdu.", None);
        let translator = CountingTranslator::new();
        let out = translate_with_reuse(
            &cache,
            &translator,
            &EngineConfig::default(),
            "The cat sat on the mat.",
        )
        .await
        .unwrap();
        assert_eq!(out.text, "MT: The cat sat on the mat.");
        assert_eq!(out.source, TranslationSource::Model);
        assert!(out.hint.is_some());
        assert_eq!(translator.calls(), 1);
    }

    #[tokio::test]
    async fn miss_calls_model_with_no_hint() {
        let translator = CountingTranslator::new();
        let out = translate_with_reuse(
            &StaticCache::empty(),
            &translator,
            &EngineConfig::default(),
            "Completely unseen text.",
        )
        .await
        .unwrap();
        assert_eq!(out.source, TranslationSource::Model);
        assert!(out.hint.is_none());
        assert_eq!(translator.calls(), 1);
    }

    #[tokio::test]
    async fn cache_outage_degrades_to_plain_model_call() {
        let translator = CountingTranslator::new();
        let out = translate_with_reuse(
            &StaticCache::failing(),
            &translator,
            &EngineConfig::default(),
            "Some text.",
        )
        .await
        .unwrap();
        assert_eq!(out.source, TranslationSource::Model);
        assert_eq!(translator.calls(), 1);
    }

    #[tokio::test]
    async fn model_failure_propagates() {
        let translator = CountingTranslator::failing();
        let err = translate_with_reuse(
            &StaticCache::empty(),
            &translator,
            &EngineConfig::default(),
            "Some text.",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::TranslationUnavailable(_)));
    }

    #[tokio::test]
    async fn exact_threshold_substitutes_verbatim() {
        let cache = StaticCache::empty().with_entry(0.95, "tam uyğun tərcümə", None);
        let translator = CountingTranslator::new();
        let out = translate_with_reuse(&cache, &translator, &EngineConfig::default(), "src")
            .await
            .unwrap();
        assert_eq!(out.text, "tam uyğun tərcümə");
        assert_eq!(translator.calls(), 0);
    }
}
