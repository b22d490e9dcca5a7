//! Core domain types for the style memory and provenance engine.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle of a translation segment.
///
/// `pending → translated → {overridden, error}`; `error` is terminal only for
/// that attempt (a retry moves the segment back to `translated`), and an
/// overridden segment may be overridden again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentStatus {
    Pending,
    Translated,
    Overridden,
    Error,
}

impl SegmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Translated => "translated",
            Self::Overridden => "overridden",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "translated" => Some(Self::Translated),
            "overridden" => Some(Self::Overridden),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

/// What produced a segment's original (pre-override) translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranslationSource {
    Model,
    StyleMemory,
}

impl TranslationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Model => "model",
            Self::StyleMemory => "style_memory",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "model" => Some(Self::Model),
            "style_memory" => Some(Self::StyleMemory),
            _ => None,
        }
    }
}

/// One unit of source text under translation.
///
/// The provenance fields (`translation_source` through
/// `override_similarity_score`) are owned by the resolver and written only
/// through `SegmentRepository::persist_provenance`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub id: i64,
    pub book_id: i64,
    pub segment_index: i32,
    pub source_text: String,
    pub current_translation: Option<String>,
    pub status: SegmentStatus,
    pub translation_source: TranslationSource,
    pub from_style_memory: bool,
    pub style_similarity_score: Option<f32>,
    pub has_override: bool,
    pub override_percentage: Option<f32>,
    pub override_similarity_score: Option<f32>,
    /// Optimistic-concurrency guard for derived-field writes.
    pub revision: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Segment {
    /// True when the segment carries a non-empty translation.
    pub fn is_translated(&self) -> bool {
        self.current_translation
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty())
    }
}

/// One human correction event. Immutable; ordering by `created_at` is
/// authoritative within a segment's ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Override {
    pub id: i64,
    pub segment_id: i64,
    pub previous_translation: Option<String>,
    pub new_translation: String,
    pub author: String,
    pub engine: String,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One approved (source, preferred translation) pair in the semantic cache.
///
/// The embedding column stays in the database; reads return the entry plus
/// the query similarity, never the raw vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleMemoryEntry {
    pub id: i64,
    pub segment_id: Option<i64>,
    pub source_text: String,
    pub preferred_translation: String,
    pub approved_by: Option<String>,
    pub engine: Option<String>,
    /// Similarity of this entry's translation to the text it replaced,
    /// recorded at creation time.
    pub similarity_score: Option<f32>,
    pub created_at: DateTime<Utc>,
}

/// A cache query result: entry plus cosine similarity of the query source
/// text against the entry's stored source embedding.
#[derive(Debug, Clone)]
pub struct NearestMatch {
    pub entry: StyleMemoryEntry,
    pub similarity: f32,
}

/// Input for a new semantic cache entry.
#[derive(Debug, Clone, Default)]
pub struct NewStyleMemory {
    pub source_text: String,
    pub preferred_translation: String,
    pub segment_id: Option<i64>,
    pub approved_by: Option<String>,
    pub engine: Option<String>,
    pub similarity_score: Option<f32>,
}

/// The resolver's complete output for one segment.
///
/// Constructed only through [`ResolvedProvenance::attributed_to_cache`] and
/// [`ResolvedProvenance::attributed_to_model`], which keep
/// `translation_source` and `from_style_memory` mutually consistent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedProvenance {
    pub translation_source: TranslationSource,
    pub from_style_memory: bool,
    pub style_similarity_score: Option<f32>,
    pub has_override: bool,
    pub override_percentage: Option<f32>,
    pub override_similarity_score: Option<f32>,
}

impl ResolvedProvenance {
    /// Attribution to the semantic cache always carries the
    /// translation-to-translation similarity against the matched entry.
    pub fn attributed_to_cache(style_similarity: f32) -> Self {
        Self {
            translation_source: TranslationSource::StyleMemory,
            from_style_memory: true,
            style_similarity_score: Some(style_similarity),
            has_override: false,
            override_percentage: Some(0.0),
            override_similarity_score: None,
        }
    }

    pub fn attributed_to_model(style_similarity: Option<f32>) -> Self {
        Self {
            translation_source: TranslationSource::Model,
            from_style_memory: false,
            style_similarity_score: style_similarity,
            has_override: false,
            override_percentage: Some(0.0),
            override_similarity_score: None,
        }
    }
}

/// Corpus-level quality signals over a set of segments.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub bleu: f64,
    pub chrf: f64,
    pub style_similarity: f64,
    pub manual_override_rate: f64,
    pub attribution_ratio: f64,
    pub total_segments: usize,
    pub overridden_segments: usize,
    /// Prediction/reference pairs actually scored by BLEU/chrF.
    pub scored_pairs: usize,
    /// Segments whose per-segment computation failed and fell back to
    /// defaults during aggregation.
    pub skipped_segments: usize,
}

/// One dated, immutable aggregate row. At most one per calendar date.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub id: i64,
    pub date: NaiveDate,
    pub bleu: f64,
    pub chrf: f64,
    pub style_similarity: f64,
    pub manual_override_rate: f64,
    pub attribution_ratio: f64,
    pub total_segments: i64,
    pub overridden_segments: i64,
    pub skipped_segments: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("embedding provider unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("translation model unavailable: {0}")]
    TranslationUnavailable(String),

    #[error("style memory store unreachable: {0}")]
    CacheUnavailable(#[source] sqlx::Error),

    #[error("inconsistent override ledger: {0}")]
    InconsistentLedger(String),

    #[error("concurrent resolution detected for segment {segment_id}")]
    ResolutionConflict { segment_id: i64 },

    #[error("segment not found: {0}")]
    SegmentNotFound(i64),

    #[error("metrics snapshot already recorded for {0}")]
    SnapshotExists(NaiveDate),

    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("corrupt row: {0}")]
    CorruptRow(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── status / source round trips ───────────────────────────────

    #[test]
    fn status_round_trip() {
        for s in [
            SegmentStatus::Pending,
            SegmentStatus::Translated,
            SegmentStatus::Overridden,
            SegmentStatus::Error,
        ] {
            assert_eq!(SegmentStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(SegmentStatus::parse("bogus"), None);
    }

    #[test]
    fn source_round_trip() {
        for s in [TranslationSource::Model, TranslationSource::StyleMemory] {
            assert_eq!(TranslationSource::parse(s.as_str()), Some(s));
        }
        assert_eq!(TranslationSource::parse("cache"), None);
    }

    // ── attribution exclusivity ───────────────────────────────────

    #[test]
    fn cache_attribution_is_exclusive() {
        let p = ResolvedProvenance::attributed_to_cache(0.9);
        assert_eq!(p.translation_source, TranslationSource::StyleMemory);
        assert!(p.from_style_memory);
        assert_eq!(p.style_similarity_score, Some(0.9));
    }

    #[test]
    fn model_attribution_is_exclusive() {
        let p = ResolvedProvenance::attributed_to_model(None);
        assert_eq!(p.translation_source, TranslationSource::Model);
        assert!(!p.from_style_memory);
        assert_eq!(p.style_similarity_score, None);
        assert_eq!(p.override_percentage, Some(0.0));
    }

    // ── error display ─────────────────────────────────────────────

    #[test]
    fn display_embedding_unavailable() {
        let e = EngineError::EmbeddingUnavailable("timeout after 30s".into());
        assert_eq!(
            e.to_string(),
            "embedding provider unavailable: timeout after 30s"
        );
    }

    #[test]
    fn display_resolution_conflict() {
        let e = EngineError::ResolutionConflict { segment_id: 42 };
        assert_eq!(e.to_string(), "concurrent resolution detected for segment 42");
    }

    #[test]
    fn display_inconsistent_ledger() {
        let e = EngineError::InconsistentLedger("createdAt collision".into());
        assert_eq!(e.to_string(), "inconsistent override ledger: createdAt collision");
    }

    #[test]
    fn is_translated_rejects_whitespace() {
        let seg = Segment {
            id: 1,
            book_id: 1,
            segment_index: 0,
            source_text: "The cat".into(),
            current_translation: Some("   ".into()),
            status: SegmentStatus::Translated,
            translation_source: TranslationSource::Model,
            from_style_memory: false,
            style_similarity_score: None,
            has_override: false,
            override_percentage: None,
            override_similarity_score: None,
            revision: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(!seg.is_translated());
    }
}
