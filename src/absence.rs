//! Absence Tracker: one counter per (student, sequence), set through the
//! ledger's absence path, with its own append-only change history.

use crate::error::{EngineError, EngineResult};
use crate::ledger::validate_editor;
use crate::model::{require_id, AbsenceEntry, SequenceRecord};
use crate::store;
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use serde_json::json;
use uuid::Uuid;

/// Converts a mark-path value into an absence count. Only whole,
/// non-negative numbers are accepted.
pub fn count_from_mark_value(value: f64) -> EngineResult<i64> {
    if !value.is_finite() || value < 0.0 || value.fract() != 0.0 || value > i64::MAX as f64 {
        return Err(EngineError::validation_with(
            "absences must be a non-negative integer",
            json!({ "value": value.to_string() }),
        ));
    }
    Ok(value as i64)
}

pub fn set_absences(
    conn: &mut Connection,
    student_id: &str,
    term_id: &str,
    sequence_id: &str,
    count: i64,
    editor_id: &str,
) -> EngineResult<SequenceRecord> {
    require_id("studentId", student_id)?;
    require_id("termId", term_id)?;
    require_id("sequenceId", sequence_id)?;
    if count < 0 {
        return Err(EngineError::validation_with(
            "absence count must be >= 0",
            json!({ "count": count }),
        ));
    }
    validate_editor(editor_id)?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    store::require_open_sequence(&tx, term_id, sequence_id)?;

    let previous: Option<i64> = tx
        .query_row(
            "SELECT absences FROM sequence_results
             WHERE student_id = ? AND term_id = ? AND sequence_id = ?",
            (student_id, term_id, sequence_id),
            |r| r.get(0),
        )
        .optional()?;
    let Some(previous) = previous else {
        return Err(EngineError::not_found(
            "sequence record not found for student",
            json!({
                "studentId": student_id,
                "termId": term_id,
                "sequenceId": sequence_id,
            }),
        ));
    };

    let position: i64 = tx.query_row(
        "SELECT COALESCE(MAX(position), 0) + 1 FROM absence_ledger
         WHERE student_id = ? AND sequence_id = ?",
        (student_id, sequence_id),
        |r| r.get(0),
    )?;
    tx.execute(
        "INSERT INTO absence_ledger(
            id, student_id, sequence_id, position, previous_count, new_count, editor_id, recorded_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            Uuid::new_v4().to_string(),
            student_id,
            sequence_id,
            position,
            previous,
            count,
            editor_id,
            Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        ),
    )?;
    tx.execute(
        "UPDATE sequence_results SET absences = ?
         WHERE student_id = ? AND sequence_id = ?",
        (count, student_id, sequence_id),
    )?;
    tx.commit()?;

    tracing::info!(
        student = student_id,
        sequence = sequence_id,
        editor = editor_id,
        previous,
        new = count,
        "absences recorded"
    );

    store::load_sequence_record(conn, student_id, term_id, sequence_id)
}

pub fn history(
    conn: &Connection,
    student_id: &str,
    sequence_id: &str,
) -> EngineResult<Vec<AbsenceEntry>> {
    let mut stmt = conn.prepare(
        "SELECT position, previous_count, new_count, editor_id, recorded_at
         FROM absence_ledger
         WHERE student_id = ? AND sequence_id = ?
         ORDER BY position",
    )?;
    let rows = stmt
        .query_map((student_id, sequence_id), |r| {
            Ok(AbsenceEntry {
                position: r.get(0)?,
                previous_count: r.get(1)?,
                new_count: r.get(2)?,
                editor_id: r.get(3)?,
                timestamp: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn absence_total(conn: &Connection, student_id: &str, term_id: &str) -> EngineResult<i64> {
    let total: i64 = conn.query_row(
        "SELECT COALESCE(SUM(absences), 0) FROM sequence_results
         WHERE student_id = ? AND term_id = ?",
        (student_id, term_id),
        |r| r.get(0),
    )?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_values_convert_only_when_whole() {
        assert_eq!(count_from_mark_value(0.0).unwrap(), 0);
        assert_eq!(count_from_mark_value(7.0).unwrap(), 7);
        assert!(count_from_mark_value(-1.0).is_err());
        assert!(count_from_mark_value(2.5).is_err());
        assert!(count_from_mark_value(f64::NAN).is_err());
    }
}
