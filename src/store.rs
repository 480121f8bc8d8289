//! Record Store: reads of the Year → Term → Sequence → Subject tree and the
//! existence checks the mutating modules share.

use crate::discipline::DisciplineRating;
use crate::error::{EngineError, EngineResult};
use crate::model::{
    LedgerEntry, MarkCoordinate, SequenceRecord, StudentAcademicRecord, SubjectRecord, TermRecord,
};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;

pub fn require_class(conn: &Connection, class_id: &str) -> EngineResult<()> {
    let found = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?;
    if found.is_none() {
        return Err(EngineError::not_found(
            "class not found",
            json!({ "classId": class_id }),
        ));
    }
    Ok(())
}

/// Returns `(label, is_current, archived)`.
pub fn require_year(conn: &Connection, year_id: &str) -> EngineResult<(String, bool, bool)> {
    let row: Option<(String, i64, i64)> = conn
        .query_row(
            "SELECT label, is_current, archived FROM academic_years WHERE id = ?",
            [year_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let Some((label, is_current, archived)) = row else {
        return Err(EngineError::not_found(
            "academic year not found",
            json!({ "academicYearId": year_id }),
        ));
    };
    Ok((label, is_current != 0, archived != 0))
}

pub fn require_term_in_year(conn: &Connection, year_id: &str, term_id: &str) -> EngineResult<()> {
    let found = conn
        .query_row(
            "SELECT 1 FROM terms WHERE id = ? AND year_id = ?",
            (term_id, year_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()?;
    if found.is_none() {
        return Err(EngineError::not_found(
            "term not found in academic year",
            json!({ "academicYearId": year_id, "termId": term_id }),
        ));
    }
    Ok(())
}

pub fn require_sequence_in_term(
    conn: &Connection,
    term_id: &str,
    sequence_id: &str,
) -> EngineResult<()> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sequences WHERE id = ? AND term_id = ?",
            (sequence_id, term_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()?;
    if found.is_none() {
        return Err(EngineError::not_found(
            "sequence not found in term",
            json!({ "termId": term_id, "sequenceId": sequence_id }),
        ));
    }
    Ok(())
}

/// Fails with a validation error when the sequence, its term, or its year
/// has been archived. Closed periods are frozen.
pub fn require_open_sequence(
    conn: &Connection,
    term_id: &str,
    sequence_id: &str,
) -> EngineResult<()> {
    let row: Option<(i64, i64, i64)> = conn
        .query_row(
            "SELECT s.archived, t.archived, y.archived
             FROM sequences s
             JOIN terms t ON t.id = s.term_id
             JOIN academic_years y ON y.id = t.year_id
             WHERE s.id = ? AND s.term_id = ?",
            (sequence_id, term_id),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()?;
    let Some((seq_archived, term_archived, year_archived)) = row else {
        return Err(EngineError::not_found(
            "sequence not found in term",
            json!({ "termId": term_id, "sequenceId": sequence_id }),
        ));
    };
    if seq_archived != 0 || term_archived != 0 || year_archived != 0 {
        return Err(EngineError::validation_with(
            "period is archived and no longer accepts edits",
            json!({ "termId": term_id, "sequenceId": sequence_id }),
        ));
    }
    Ok(())
}

/// Student ids enrolled in a class for one year, in id order.
pub fn class_members(conn: &Connection, class_id: &str, year_id: &str) -> EngineResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT student_id FROM student_records
         WHERE class_id = ? AND year_id = ?
         ORDER BY student_id",
    )?;
    let ids = stmt
        .query_map((class_id, year_id), |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

/// `(sequence_id, label)` of a term, in calendar order.
pub fn term_sequences(conn: &Connection, term_id: &str) -> EngineResult<Vec<(String, String)>> {
    let mut stmt = conn.prepare(
        "SELECT id, label FROM sequences WHERE term_id = ? ORDER BY sort_order, id",
    )?;
    let rows = stmt
        .query_map([term_id], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn mark_history(conn: &Connection, coord: &MarkCoordinate) -> EngineResult<Vec<LedgerEntry>> {
    let mut stmt = conn.prepare(
        "SELECT position, previous_mark, new_mark, editor_id, recorded_at, prev_hash, entry_hash
         FROM mark_ledger
         WHERE student_id = ? AND term_id = ? AND sequence_id = ? AND subject_id = ?
         ORDER BY position",
    )?;
    let entries = stmt
        .query_map(
            (
                &coord.student_id,
                &coord.term_id,
                &coord.sequence_id,
                &coord.subject_id,
            ),
            ledger_entry_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(entries)
}

fn ledger_entry_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<LedgerEntry> {
    Ok(LedgerEntry {
        position: r.get(0)?,
        previous_mark: r.get(1)?,
        new_mark: r.get(2)?,
        editor_id: r.get(3)?,
        timestamp: r.get(4)?,
        prev_hash: r.get(5)?,
        entry_hash: r.get(6)?,
    })
}

pub fn load_subject_record(conn: &Connection, coord: &MarkCoordinate) -> EngineResult<SubjectRecord> {
    let row: Option<(f64, Option<f64>, Option<i64>, Option<String>)> = conn
        .query_row(
            "SELECT sr.coefficient, sr.current_mark, sr.rank, cs.name
             FROM subject_records sr
             JOIN student_records st
               ON st.student_id = sr.student_id
             JOIN terms t ON t.id = sr.term_id AND t.year_id = st.year_id
             LEFT JOIN class_subjects cs
               ON cs.class_id = st.class_id AND cs.year_id = st.year_id
              AND cs.subject_id = sr.subject_id
             WHERE sr.student_id = ? AND sr.term_id = ? AND sr.sequence_id = ? AND sr.subject_id = ?",
            (
                &coord.student_id,
                &coord.term_id,
                &coord.sequence_id,
                &coord.subject_id,
            ),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
        )
        .optional()?;
    let Some((coefficient, current_mark, rank, subject_name)) = row else {
        return Err(subject_not_found(coord));
    };
    Ok(SubjectRecord {
        subject_id: coord.subject_id.clone(),
        subject_name,
        coefficient,
        current_mark,
        rank,
        modified: mark_history(conn, coord)?,
    })
}

pub fn subject_not_found(coord: &MarkCoordinate) -> EngineError {
    EngineError::not_found(
        "subject record not found",
        serde_json::to_value(coord).unwrap_or_else(|_| json!({})),
    )
}

/// One sequence of one student, subjects in curriculum order.
pub fn load_sequence_record(
    conn: &Connection,
    student_id: &str,
    term_id: &str,
    sequence_id: &str,
) -> EngineResult<SequenceRecord> {
    let row: Option<(String, i64, i64, Option<f64>, Option<i64>)> = conn
        .query_row(
            "SELECT s.label, s.archived, r.absences, r.average, r.rank
             FROM sequence_results r
             JOIN sequences s ON s.id = r.sequence_id
             WHERE r.student_id = ? AND r.term_id = ? AND r.sequence_id = ?",
            (student_id, term_id, sequence_id),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
        )
        .optional()?;
    let Some((label, archived, absences, average, rank)) = row else {
        return Err(EngineError::not_found(
            "sequence record not found for student",
            json!({
                "studentId": student_id,
                "termId": term_id,
                "sequenceId": sequence_id,
            }),
        ));
    };

    let mut history: HashMap<String, Vec<LedgerEntry>> = HashMap::new();
    {
        let mut stmt = conn.prepare(
            "SELECT subject_id, position, previous_mark, new_mark, editor_id, recorded_at,
                    prev_hash, entry_hash
             FROM mark_ledger
             WHERE student_id = ? AND term_id = ? AND sequence_id = ?
             ORDER BY subject_id, position",
        )?;
        let rows = stmt.query_map((student_id, term_id, sequence_id), |r| {
            let subject_id: String = r.get(0)?;
            Ok((
                subject_id,
                LedgerEntry {
                    position: r.get(1)?,
                    previous_mark: r.get(2)?,
                    new_mark: r.get(3)?,
                    editor_id: r.get(4)?,
                    timestamp: r.get(5)?,
                    prev_hash: r.get(6)?,
                    entry_hash: r.get(7)?,
                },
            ))
        })?;
        for row in rows {
            let (subject_id, entry) = row?;
            history.entry(subject_id).or_default().push(entry);
        }
    }

    let mut stmt = conn.prepare(
        "SELECT sr.subject_id, cs.name, sr.coefficient, sr.current_mark, sr.rank
         FROM subject_records sr
         JOIN student_records st ON st.student_id = sr.student_id
         JOIN terms t ON t.id = sr.term_id AND t.year_id = st.year_id
         LEFT JOIN class_subjects cs
           ON cs.class_id = st.class_id AND cs.year_id = st.year_id
          AND cs.subject_id = sr.subject_id
         WHERE sr.student_id = ? AND sr.term_id = ? AND sr.sequence_id = ?
         ORDER BY COALESCE(cs.sort_order, 2147483647), sr.subject_id",
    )?;
    let subjects = stmt
        .query_map((student_id, term_id, sequence_id), |r| {
            Ok(SubjectRecord {
                subject_id: r.get(0)?,
                subject_name: r.get(1)?,
                coefficient: r.get(2)?,
                current_mark: r.get(3)?,
                rank: r.get(4)?,
                modified: Vec::new(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|mut s| {
            s.modified = history.remove(&s.subject_id).unwrap_or_default();
            s
        })
        .collect();

    Ok(SequenceRecord {
        sequence_id: sequence_id.to_string(),
        term_id: term_id.to_string(),
        label,
        archived: archived != 0,
        absences,
        average,
        rank,
        subjects,
    })
}

pub fn student_record(
    conn: &Connection,
    student_id: &str,
    year_id: &str,
) -> EngineResult<StudentAcademicRecord> {
    let class_id: Option<String> = conn
        .query_row(
            "SELECT class_id FROM student_records WHERE student_id = ? AND year_id = ?",
            (student_id, year_id),
            |r| r.get(0),
        )
        .optional()?;
    let Some(class_id) = class_id else {
        return Err(EngineError::not_found(
            "student record not found",
            json!({ "studentId": student_id, "academicYearId": year_id }),
        ));
    };
    let (year_label, is_current, _) = require_year(conn, year_id)?;

    let mut term_stmt = conn.prepare(
        "SELECT t.id, t.label, t.archived, r.average, r.rank, r.discipline
         FROM terms t
         LEFT JOIN term_results r ON r.term_id = t.id AND r.student_id = ?
         WHERE t.year_id = ?
         ORDER BY t.sort_order, t.id",
    )?;
    #[allow(clippy::type_complexity)]
    let term_rows: Vec<(String, String, i64, Option<f64>, Option<i64>, Option<String>)> = term_stmt
        .query_map((student_id, year_id), |r| {
            Ok((
                r.get(0)?,
                r.get(1)?,
                r.get(2)?,
                r.get(3)?,
                r.get(4)?,
                r.get(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut terms = Vec::with_capacity(term_rows.len());
    for (term_id, label, archived, average, rank, discipline) in term_rows {
        let mut sequences = Vec::new();
        for (sequence_id, _) in term_sequences(conn, &term_id)? {
            match load_sequence_record(conn, student_id, &term_id, &sequence_id) {
                Ok(seq) => sequences.push(seq),
                // Not materialised for this student yet.
                Err(EngineError::NotFound { .. }) => continue,
                Err(e) => return Err(e),
            }
        }
        terms.push(TermRecord {
            term_id,
            label,
            archived: archived != 0,
            average,
            rank,
            discipline_rating: discipline.as_deref().and_then(DisciplineRating::parse),
            sequences,
        });
    }

    Ok(StudentAcademicRecord {
        student_id: student_id.to_string(),
        class_id,
        academic_year_id: year_id.to_string(),
        year_label,
        is_current,
        terms,
    })
}
