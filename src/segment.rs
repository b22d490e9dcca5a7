//! Segment persistence.
//!
//! Derived provenance fields are written in one revision-guarded UPDATE:
//! readers see either the previous complete set or the new complete set,
//! and a stale writer gets `ResolutionConflict` instead of silently
//! overwriting a concurrent resolution.

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;

use crate::types::{EngineError, ResolvedProvenance, Segment, SegmentStatus, TranslationSource};

type SegmentRow = (
    i64,            // id
    i64,            // book_id
    i32,            // segment_index
    String,         // source_text
    Option<String>, // current_translation
    String,         // status
    String,         // translation_source
    bool,           // from_style_memory
    Option<f32>,    // style_similarity_score
    bool,           // has_override
    Option<f32>,    // override_percentage
    Option<f32>,    // override_similarity_score
    i64,            // revision
    DateTime<Utc>,  // created_at
    DateTime<Utc>,  // updated_at
);

const SEGMENT_COLUMNS: &str = "id, book_id, segment_index, source_text, current_translation, \
     status, translation_source, from_style_memory, style_similarity_score, \
     has_override, override_percentage, override_similarity_score, \
     revision, created_at, updated_at";

fn from_row(row: SegmentRow) -> Result<Segment, EngineError> {
    let status = SegmentStatus::parse(&row.5)
        .ok_or_else(|| EngineError::CorruptRow(format!("unknown segment status '{}'", row.5)))?;
    let translation_source = TranslationSource::parse(&row.6).ok_or_else(|| {
        EngineError::CorruptRow(format!("unknown translation source '{}'", row.6))
    })?;
    Ok(Segment {
        id: row.0,
        book_id: row.1,
        segment_index: row.2,
        source_text: row.3,
        current_translation: row.4,
        status,
        translation_source,
        from_style_memory: row.7,
        style_similarity_score: row.8,
        has_override: row.9,
        override_percentage: row.10,
        override_similarity_score: row.11,
        revision: row.12,
        created_at: row.13,
        updated_at: row.14,
    })
}

pub struct SegmentRepository;

impl SegmentRepository {
    pub async fn fetch<'e, E: PgExecutor<'e>>(
        executor: E,
        segment_id: i64,
    ) -> Result<Segment, EngineError> {
        let row: Option<SegmentRow> = sqlx::query_as(&format!(
            "SELECT {SEGMENT_COLUMNS} FROM segments WHERE id = $1"
        ))
        .bind(segment_id)
        .fetch_optional(executor)
        .await?;

        row.map(from_row)
            .transpose()?
            .ok_or(EngineError::SegmentNotFound(segment_id))
    }

    /// Fetch with a row lock; used inside the acceptance transaction to
    /// serialize against concurrent writers of the same segment.
    pub async fn fetch_for_update<'e, E: PgExecutor<'e>>(
        executor: E,
        segment_id: i64,
    ) -> Result<Segment, EngineError> {
        let row: Option<SegmentRow> = sqlx::query_as(&format!(
            "SELECT {SEGMENT_COLUMNS} FROM segments WHERE id = $1 FOR UPDATE"
        ))
        .bind(segment_id)
        .fetch_optional(executor)
        .await?;

        row.map(from_row)
            .transpose()?
            .ok_or(EngineError::SegmentNotFound(segment_id))
    }

    /// All segments of a book in reading order.
    pub async fn for_book<'e, E: PgExecutor<'e>>(
        executor: E,
        book_id: i64,
    ) -> Result<Vec<Segment>, EngineError> {
        let rows: Vec<SegmentRow> = sqlx::query_as(&format!(
            "SELECT {SEGMENT_COLUMNS} FROM segments WHERE book_id = $1 ORDER BY segment_index ASC"
        ))
        .bind(book_id)
        .fetch_all(executor)
        .await?;
        rows.into_iter().map(from_row).collect()
    }

    /// Every segment, for corpus-level aggregation and batch recomputation.
    pub async fn all<'e, E: PgExecutor<'e>>(executor: E) -> Result<Vec<Segment>, EngineError> {
        let rows: Vec<SegmentRow> = sqlx::query_as(&format!(
            "SELECT {SEGMENT_COLUMNS} FROM segments ORDER BY book_id, segment_index"
        ))
        .fetch_all(executor)
        .await?;
        rows.into_iter().map(from_row).collect()
    }

    /// Replace the accepted translation and advance the status machine.
    pub async fn set_translation<'e, E: PgExecutor<'e>>(
        executor: E,
        segment_id: i64,
        translation: &str,
        status: SegmentStatus,
    ) -> Result<(), EngineError> {
        let result = sqlx::query(
            r#"
            UPDATE segments
            SET current_translation = $2, status = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(segment_id)
        .bind(translation)
        .bind(status.as_str())
        .execute(executor)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::SegmentNotFound(segment_id));
        }
        Ok(())
    }

    /// Persist a complete derived-field set atomically. `expected_revision`
    /// must match the revision the computation read from; a mismatch means a
    /// concurrent resolution won and this one must retry from a fresh
    /// snapshot.
    pub async fn persist_provenance<'e, E: PgExecutor<'e>>(
        executor: E,
        segment_id: i64,
        expected_revision: i64,
        resolved: &ResolvedProvenance,
    ) -> Result<i64, EngineError> {
        let result = sqlx::query(
            r#"
            UPDATE segments
            SET translation_source = $3,
                from_style_memory = $4,
                style_similarity_score = $5,
                has_override = $6,
                override_percentage = $7,
                override_similarity_score = $8,
                revision = revision + 1,
                updated_at = NOW()
            WHERE id = $1 AND revision = $2
            "#,
        )
        .bind(segment_id)
        .bind(expected_revision)
        .bind(resolved.translation_source.as_str())
        .bind(resolved.from_style_memory)
        .bind(resolved.style_similarity_score)
        .bind(resolved.has_override)
        .bind(resolved.override_percentage)
        .bind(resolved.override_similarity_score)
        .execute(executor)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::ResolutionConflict { segment_id });
        }
        Ok(expected_revision + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row(status: &str, source: &str) -> SegmentRow {
        (
            1,
            10,
            0,
            "The cat sat on the mat.".into(),
            Some("Pişik xalçada oturdu.".into()),
            status.into(),
            source.into(),
            false,
            None,
            false,
            None,
            None,
            0,
            Utc::now(),
            Utc::now(),
        )
    }

    #[test]
    fn maps_valid_row() {
        let seg = from_row(sample_row("translated", "model")).unwrap();
        assert_eq!(seg.status, SegmentStatus::Translated);
        assert_eq!(seg.translation_source, TranslationSource::Model);
        assert!(seg.is_translated());
    }

    #[test]
    fn unknown_status_is_corrupt() {
        let err = from_row(sample_row("half-done", "model")).unwrap_err();
        assert!(matches!(err, EngineError::CorruptRow(_)));
    }

    #[test]
    fn unknown_source_is_corrupt() {
        let err = from_row(sample_row("translated", "oracle")).unwrap_err();
        assert!(matches!(err, EngineError::CorruptRow(_)));
    }
}
