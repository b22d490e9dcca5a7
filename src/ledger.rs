//! Append-only override ledger.
//!
//! Every human correction to a segment's translation lands here, ordered by
//! `created_at`. The first entry captures the translation that existed before
//! any human edit; the latest entry captures the most recently accepted text.
//! Rows are never updated or deleted.

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;

use crate::types::{EngineError, Override};

/// Input for a new ledger entry.
#[derive(Debug, Clone)]
pub struct NewOverride {
    pub segment_id: i64,
    pub previous_translation: Option<String>,
    pub new_translation: String,
    pub author: String,
    pub engine: String,
    pub reason: Option<String>,
}

/// A segment's complete override history with authoritative ordering.
///
/// Construction validates the ledger: every entry must reference the same
/// segment, and `created_at` must be strictly increasing once sorted — a
/// timestamp collision makes first/latest ambiguous and is surfaced as
/// `InconsistentLedger`, never guessed around. `first` and `latest` are O(1).
#[derive(Debug, Clone)]
pub struct OverrideLedger {
    segment_id: i64,
    entries: Vec<Override>,
}

impl OverrideLedger {
    pub fn new(segment_id: i64, mut entries: Vec<Override>) -> Result<Self, EngineError> {
        for entry in &entries {
            if entry.segment_id != segment_id {
                return Err(EngineError::InconsistentLedger(format!(
                    "override {} belongs to segment {}, not {}",
                    entry.id, entry.segment_id, segment_id
                )));
            }
        }
        entries.sort_by_key(|o| o.created_at);
        for pair in entries.windows(2) {
            if pair[0].created_at == pair[1].created_at {
                return Err(EngineError::InconsistentLedger(format!(
                    "overrides {} and {} share created_at {}, ordering is ambiguous",
                    pair[0].id, pair[1].id, pair[0].created_at
                )));
            }
        }
        Ok(Self {
            segment_id,
            entries,
        })
    }

    pub fn empty(segment_id: i64) -> Self {
        Self {
            segment_id,
            entries: Vec::new(),
        }
    }

    pub fn segment_id(&self) -> i64 {
        self.segment_id
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Earliest override; its `previous_translation` is the original,
    /// pre-edit text for provenance purposes.
    pub fn first(&self) -> Option<&Override> {
        self.entries.first()
    }

    /// Most recent override; its `new_translation` is the accepted text.
    pub fn latest(&self) -> Option<&Override> {
        self.entries.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Override> {
        self.entries.iter()
    }

    /// Extend with a just-accepted override that is not yet committed, so
    /// resolution can run against the post-acceptance ledger before the
    /// transaction closes.
    pub fn with_pending(&self, pending: Override) -> Result<Self, EngineError> {
        let mut entries = self.entries.clone();
        entries.push(pending);
        Self::new(self.segment_id, entries)
    }
}

/// Append-only sqlx access to the overrides table.
pub struct OverrideRepository;

impl OverrideRepository {
    /// Append one correction. Callers run this inside the acceptance
    /// transaction so the ledger entry commits together with the cache write
    /// and the segment update.
    pub async fn append<'e, E: PgExecutor<'e>>(
        executor: E,
        new: &NewOverride,
    ) -> Result<Override, EngineError> {
        let row: (
            i64,
            i64,
            Option<String>,
            String,
            String,
            String,
            Option<String>,
            DateTime<Utc>,
        ) = sqlx::query_as(
            r#"
            INSERT INTO overrides
                (segment_id, previous_translation, new_translation, author, engine, reason)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, segment_id, previous_translation, new_translation,
                      author, engine, reason, created_at
            "#,
        )
        .bind(new.segment_id)
        .bind(&new.previous_translation)
        .bind(&new.new_translation)
        .bind(&new.author)
        .bind(&new.engine)
        .bind(&new.reason)
        .fetch_one(executor)
        .await?;

        Ok(Override {
            id: row.0,
            segment_id: row.1,
            previous_translation: row.2,
            new_translation: row.3,
            author: row.4,
            engine: row.5,
            reason: row.6,
            created_at: row.7,
        })
    }

    /// Load a segment's full ledger, oldest first, and validate it.
    pub async fn for_segment<'e, E: PgExecutor<'e>>(
        executor: E,
        segment_id: i64,
    ) -> Result<OverrideLedger, EngineError> {
        let rows: Vec<(
            i64,
            i64,
            Option<String>,
            String,
            String,
            String,
            Option<String>,
            DateTime<Utc>,
        )> = sqlx::query_as(
            r#"
            SELECT id, segment_id, previous_translation, new_translation,
                   author, engine, reason, created_at
            FROM overrides
            WHERE segment_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(segment_id)
        .fetch_all(executor)
        .await?;

        let entries = rows
            .into_iter()
            .map(|row| Override {
                id: row.0,
                segment_id: row.1,
                previous_translation: row.2,
                new_translation: row.3,
                author: row.4,
                engine: row.5,
                reason: row.6,
                created_at: row.7,
            })
            .collect();

        OverrideLedger::new(segment_id, entries)
    }

    /// Every override in the corpus, oldest first, for corpus-level
    /// aggregation. Callers group rows into per-segment ledgers.
    pub async fn all<'e, E: PgExecutor<'e>>(executor: E) -> Result<Vec<Override>, EngineError> {
        let rows: Vec<(
            i64,
            i64,
            Option<String>,
            String,
            String,
            String,
            Option<String>,
            DateTime<Utc>,
        )> = sqlx::query_as(
            r#"
            SELECT id, segment_id, previous_translation, new_translation,
                   author, engine, reason, created_at
            FROM overrides
            ORDER BY segment_id, created_at ASC, id ASC
            "#,
        )
        .fetch_all(executor)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Override {
                id: row.0,
                segment_id: row.1,
                previous_translation: row.2,
                new_translation: row.3,
                author: row.4,
                engine: row.5,
                reason: row.6,
                created_at: row.7,
            })
            .collect())
    }

    /// Total number of recorded corrections.
    pub async fn count_all<'e, E: PgExecutor<'e>>(executor: E) -> Result<i64, EngineError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM overrides")
            .fetch_one(executor)
            .await?;
        Ok(row.0)
    }
}
