//! Style Memory & Provenance Engine
//!
//! Semantic cache of approved translations plus the resolver that reconciles
//! a segment's edit history into one auditable provenance record, and the
//! aggregator that turns segments and their override ledgers into corpus
//! quality metrics.
//!
//! # Architecture
//!
//! ```text
//! Source text
//!       │
//!       ▼
//! ┌─────────────────────────────────────────┐
//! │  Embedding provider (remote, opaque)    │
//! │  "The cat sat…" → [768 dims]            │
//! └─────────────────────────────────────────┘
//!       │
//!       ▼
//! ┌─────────────────────────────────────────┐
//! │  pgvector similarity search             │
//! │  SELECT … ORDER BY embedding <=> $1     │
//! │  → ranked matches with scores           │
//! └─────────────────────────────────────────┘
//!       │
//!       ├── ≥ 0.95 ──► reuse cached translation verbatim
//!       ├── hint band ──► surface to editor, call the model
//!       │
//!       ▼
//! ┌─────────────────────────────────────────┐
//! │  Provenance resolver                    │
//! │  (translation, override ledger, cache)  │
//! │  → source, similarity, override %       │
//! └─────────────────────────────────────────┘
//!       │
//!       ▼
//! ┌─────────────────────────────────────────┐
//! │  Metrics aggregator                     │
//! │  BLEU · chrF · style sim · MOR · AR     │
//! └─────────────────────────────────────────┘
//! ```

pub mod config;
pub mod embedding;
pub mod engine;
pub mod ledger;
pub mod metrics;
pub mod resolver;
pub mod scoring;
pub mod segment;
pub mod store;
pub mod textdiff;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::EngineConfig;
pub use embedding::{cosine_similarity, EmbeddingProvider, HttpEmbeddingProvider};
pub use engine::{
    OverrideOutcome, RecalcReport, StyleMemoryEngine, TranslationOutcome, TranslationProvider,
};
pub use ledger::{NewOverride, OverrideLedger, OverrideRepository};
pub use metrics::{MetricSnapshotRepository, MetricsAggregator};
pub use resolver::{ProvenanceResolver, SegmentLocks};
pub use segment::SegmentRepository;
pub use store::{ReuseDecision, StyleMemorySearch, StyleMemoryStore};
pub use types::*;
