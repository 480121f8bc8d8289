//! Mark Ledger: the only write path for subject marks.
//!
//! Every accepted edit appends one hash-chained history row and updates the
//! current mark inside the same IMMEDIATE transaction, so readers see either
//! both or neither. Rows are never updated or deleted; the schema installs
//! triggers that abort such statements.

use crate::error::{EngineError, EngineResult};
use crate::model::{MarkCoordinate, SubjectRecord, MARK_MAX, MARK_MIN};
use crate::store;
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

pub fn validate_mark(value: f64) -> EngineResult<()> {
    if !value.is_finite() || !(MARK_MIN..=MARK_MAX).contains(&value) {
        return Err(EngineError::validation_with(
            format!("mark must be a number in [{}, {}]", MARK_MIN, MARK_MAX),
            json!({ "value": value.to_string() }),
        ));
    }
    Ok(())
}

pub fn validate_editor(editor_id: &str) -> EngineResult<()> {
    if editor_id.trim().is_empty() {
        return Err(EngineError::validation("editorId is required"));
    }
    Ok(())
}

fn encode_mark(m: Option<f64>) -> String {
    m.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

pub fn entry_hash(
    prev_hash: &str,
    coord: &MarkCoordinate,
    position: i64,
    previous_mark: Option<f64>,
    new_mark: f64,
    editor_id: &str,
    timestamp: &str,
) -> String {
    let position = position.to_string();
    let previous_mark = encode_mark(previous_mark);
    let new_mark = encode_mark(Some(new_mark));
    let parts: [&str; 10] = [
        prev_hash,
        coord.student_id.as_str(),
        coord.term_id.as_str(),
        coord.sequence_id.as_str(),
        coord.subject_id.as_str(),
        position.as_str(),
        previous_mark.as_str(),
        new_mark.as_str(),
        editor_id,
        timestamp,
    ];
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    format!("{:x}", hasher.finalize())
}

pub fn append_mark(
    conn: &mut Connection,
    coord: &MarkCoordinate,
    value: f64,
    editor_id: &str,
) -> EngineResult<SubjectRecord> {
    coord.validate()?;
    validate_mark(value)?;
    validate_editor(editor_id)?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    store::require_open_sequence(&tx, &coord.term_id, &coord.sequence_id)?;

    let current: Option<Option<f64>> = tx
        .query_row(
            "SELECT current_mark FROM subject_records
             WHERE student_id = ? AND term_id = ? AND sequence_id = ? AND subject_id = ?",
            (
                &coord.student_id,
                &coord.term_id,
                &coord.sequence_id,
                &coord.subject_id,
            ),
            |r| r.get(0),
        )
        .optional()?;
    let Some(previous_mark) = current else {
        return Err(store::subject_not_found(coord));
    };

    let last: Option<(i64, String)> = tx
        .query_row(
            "SELECT position, entry_hash FROM mark_ledger
             WHERE student_id = ? AND term_id = ? AND sequence_id = ? AND subject_id = ?
             ORDER BY position DESC
             LIMIT 1",
            (
                &coord.student_id,
                &coord.term_id,
                &coord.sequence_id,
                &coord.subject_id,
            ),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let (position, prev_hash) = match last {
        Some((p, h)) => (p + 1, h),
        None => (1, GENESIS_HASH.to_string()),
    };

    let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
    let hash = entry_hash(
        &prev_hash,
        coord,
        position,
        previous_mark,
        value,
        editor_id,
        &timestamp,
    );

    tx.execute(
        "INSERT INTO mark_ledger(
            id, student_id, term_id, sequence_id, subject_id, position,
            previous_mark, new_mark, editor_id, recorded_at, prev_hash, entry_hash)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            &coord.student_id,
            &coord.term_id,
            &coord.sequence_id,
            &coord.subject_id,
            position,
            previous_mark,
            value,
            editor_id,
            &timestamp,
            &prev_hash,
            &hash,
        ),
    )?;
    tx.execute(
        "UPDATE subject_records SET current_mark = ?
         WHERE student_id = ? AND term_id = ? AND sequence_id = ? AND subject_id = ?",
        (
            value,
            &coord.student_id,
            &coord.term_id,
            &coord.sequence_id,
            &coord.subject_id,
        ),
    )?;
    tx.commit()?;

    tracing::info!(
        coordinate = %coord,
        editor = editor_id,
        position,
        previous = ?previous_mark,
        new = value,
        "mark recorded"
    );

    store::load_subject_record(conn, coord)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerVerification {
    pub entries: usize,
    pub intact: bool,
    pub first_broken_position: Option<i64>,
    pub head_hash: String,
}

/// Recompute the hash chain of one SubjectRecord. The chain also has to
/// agree with the stored current mark.
pub fn verify(conn: &Connection, coord: &MarkCoordinate) -> EngineResult<LedgerVerification> {
    coord.validate()?;
    let record = store::load_subject_record(conn, coord)?;
    let entries = &record.modified;

    let mut expected_prev = GENESIS_HASH.to_string();
    let mut expected_previous_mark: Option<f64> = None;
    let mut broken: Option<i64> = None;
    for (i, e) in entries.iter().enumerate() {
        let recomputed = entry_hash(
            &e.prev_hash,
            coord,
            e.position,
            e.previous_mark,
            e.new_mark,
            &e.editor_id,
            &e.timestamp,
        );
        let ok = e.position == (i as i64) + 1
            && e.prev_hash == expected_prev
            && e.previous_mark == expected_previous_mark
            && recomputed == e.entry_hash;
        if !ok {
            broken = Some(e.position);
            break;
        }
        expected_prev = e.entry_hash.clone();
        expected_previous_mark = Some(e.new_mark);
    }
    if broken.is_none() && record.current_mark != expected_previous_mark {
        broken = Some(entries.last().map(|e| e.position).unwrap_or(0));
    }

    if let Some(position) = broken {
        tracing::warn!(coordinate = %coord, position, "mark ledger chain is broken");
    }

    Ok(LedgerVerification {
        entries: entries.len(),
        intact: broken.is_none(),
        first_broken_position: broken,
        head_hash: expected_prev,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coord() -> MarkCoordinate {
        MarkCoordinate::new("s1", "t1", "q1", "math")
    }

    #[test]
    fn mark_bounds() {
        assert!(validate_mark(0.0).is_ok());
        assert!(validate_mark(20.0).is_ok());
        assert!(validate_mark(12.75).is_ok());
        assert!(validate_mark(-0.5).is_err());
        assert!(validate_mark(20.01).is_err());
        assert!(validate_mark(f64::NAN).is_err());
        assert!(validate_mark(f64::INFINITY).is_err());
    }

    #[test]
    fn hash_depends_on_every_field() {
        let base = entry_hash(GENESIS_HASH, &coord(), 1, None, 12.0, "t-9", "2025-01-01T00:00:00Z");
        assert_eq!(base.len(), 64);
        assert_eq!(
            base,
            entry_hash(GENESIS_HASH, &coord(), 1, None, 12.0, "t-9", "2025-01-01T00:00:00Z")
        );
        let variants = [
            entry_hash(GENESIS_HASH, &coord(), 2, None, 12.0, "t-9", "2025-01-01T00:00:00Z"),
            entry_hash(GENESIS_HASH, &coord(), 1, Some(0.0), 12.0, "t-9", "2025-01-01T00:00:00Z"),
            entry_hash(GENESIS_HASH, &coord(), 1, None, 12.5, "t-9", "2025-01-01T00:00:00Z"),
            entry_hash(GENESIS_HASH, &coord(), 1, None, 12.0, "t-8", "2025-01-01T00:00:00Z"),
            entry_hash(GENESIS_HASH, &coord(), 1, None, 12.0, "t-9", "2025-01-01T00:00:01Z"),
            entry_hash(
                GENESIS_HASH,
                &MarkCoordinate::new("s1", "t1", "q1", "physics"),
                1,
                None,
                12.0,
                "t-9",
                "2025-01-01T00:00:00Z",
            ),
        ];
        for v in variants {
            assert_ne!(v, base);
        }
    }

    #[test]
    fn blank_editor_is_rejected() {
        assert!(validate_editor("  ").is_err());
        assert!(validate_editor("teacher-1").is_ok());
    }
}
