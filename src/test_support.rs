//! Deterministic in-memory doubles for the provider and cache seams.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use crate::embedding::{normalize, EmbeddingProvider};
use crate::store::StyleMemorySearch;
use crate::types::{
    EngineError, NearestMatch, Override, Segment, SegmentStatus, StyleMemoryEntry,
    TranslationSource,
};

/// Embedding provider with pinned vectors per text and a deterministic
/// fallback for everything else.
pub struct StaticEmbedder {
    vectors: HashMap<String, Vec<f32>>,
    dim: usize,
    fail: bool,
}

impl StaticEmbedder {
    pub fn new(dim: usize) -> Self {
        Self {
            vectors: HashMap::new(),
            dim,
            fail: false,
        }
    }

    pub fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.vectors.insert(text.to_string(), vector);
        self
    }

    pub fn failing() -> Self {
        Self {
            vectors: HashMap::new(),
            dim: 2,
            fail: true,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for StaticEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EngineError> {
        if self.fail {
            return Err(EngineError::EmbeddingUnavailable(
                "static provider down".into(),
            ));
        }
        if let Some(v) = self.vectors.get(text) {
            return Ok(v.clone());
        }
        Ok(hash_vector(text, self.dim))
    }
}

/// Deterministic unit vector derived from the text bytes.
fn hash_vector(text: &str, dim: usize) -> Vec<f32> {
    let mut state: u64 = 0xcbf2_9ce4_8422_2325;
    for b in text.bytes() {
        state ^= b as u64;
        state = state.wrapping_mul(0x0000_0100_0000_01b3);
    }
    let mut v = Vec::with_capacity(dim);
    for _ in 0..dim {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        v.push(((state >> 33) as f32 / u32::MAX as f32) - 0.5);
    }
    normalize(v)
}

/// Cache double: fixed ranked matches, honoring threshold, k and the
/// segment-exclusion filter the way the pgvector store does.
pub struct StaticCache {
    matches: Vec<NearestMatch>,
    fail: bool,
}

impl StaticCache {
    pub fn empty() -> Self {
        Self {
            matches: Vec::new(),
            fail: false,
        }
    }

    pub fn with_entry(
        mut self,
        similarity: f32,
        preferred_translation: &str,
        segment_id: Option<i64>,
    ) -> Self {
        let id = self.matches.len() as i64 + 1;
        self.matches.push(NearestMatch {
            entry: StyleMemoryEntry {
                id,
                segment_id,
                source_text: "cached source".into(),
                preferred_translation: preferred_translation.into(),
                approved_by: Some("editor".into()),
                engine: Some("manual".into()),
                similarity_score: None,
                created_at: Utc.timestamp_opt(1_700_000_000 + id, 0).unwrap(),
            },
            similarity,
        });
        self
    }

    pub fn failing() -> Self {
        Self {
            matches: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl StyleMemorySearch for StaticCache {
    async fn find_nearest(
        &self,
        _source_text: &str,
        k: usize,
        threshold: f32,
        exclude_segment: Option<i64>,
    ) -> Result<Vec<NearestMatch>, EngineError> {
        if self.fail {
            return Err(EngineError::CacheUnavailable(sqlx::Error::PoolTimedOut));
        }
        let mut hits: Vec<NearestMatch> = self
            .matches
            .iter()
            .filter(|m| m.similarity >= threshold)
            .filter(|m| match (exclude_segment, m.entry.segment_id) {
                (Some(excluded), Some(owner)) => owner != excluded,
                _ => true,
            })
            .cloned()
            .collect();
        hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        hits.truncate(k);
        Ok(hits)
    }
}

pub fn segment(id: i64, source: &str, translation: Option<&str>) -> Segment {
    Segment {
        id,
        book_id: 1,
        segment_index: id as i32,
        source_text: source.into(),
        current_translation: translation.map(String::from),
        status: if translation.is_some() {
            SegmentStatus::Translated
        } else {
            SegmentStatus::Pending
        },
        translation_source: TranslationSource::Model,
        from_style_memory: false,
        style_similarity_score: None,
        has_override: false,
        override_percentage: None,
        override_similarity_score: None,
        revision: 0,
        created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        updated_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
    }
}

pub fn override_at(
    id: i64,
    segment_id: i64,
    previous: Option<&str>,
    new: &str,
    at_secs: i64,
) -> Override {
    Override {
        id,
        segment_id,
        previous_translation: previous.map(String::from),
        new_translation: new.into(),
        author: "editor".into(),
        engine: "manual".into(),
        reason: None,
        created_at: Utc.timestamp_opt(at_secs, 0).unwrap(),
    }
}
