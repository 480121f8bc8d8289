//! Class roster collaborator: classes, per-year curriculum (subject +
//! coefficient + weekly hours) and student enrollment. Enrollment and
//! curriculum changes create the missing parts of each student's record
//! tree; nothing here ever removes a record.

use crate::error::{EngineError, EngineResult};
use crate::model::{require_id, SubjectInput, ABSENCES_SUBJECT};
use crate::store;
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurriculumOutcome {
    pub subjects: usize,
    pub created_records: usize,
    pub coefficients_updated: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollOutcome {
    pub created: bool,
    pub created_records: usize,
}

pub fn upsert_class(conn: &Connection, id: Option<&str>, name: &str) -> EngineResult<String> {
    if name.trim().is_empty() {
        return Err(EngineError::validation("class name must not be empty"));
    }
    let class_id = match id {
        Some(v) => {
            require_id("classId", v)?;
            v.to_string()
        }
        None => Uuid::new_v4().to_string(),
    };
    conn.execute(
        "INSERT INTO classes(id, name) VALUES(?, ?)
         ON CONFLICT(id) DO UPDATE SET name = excluded.name",
        (&class_id, name.trim()),
    )?;
    Ok(class_id)
}

/// Creates any missing term results, sequence results and SubjectRecords
/// for enrolled students of `year_id`, optionally narrowed to one class and
/// one student. Returns the number of SubjectRecords created.
pub fn materialise(
    conn: &Connection,
    year_id: &str,
    class_id: Option<&str>,
    student_id: Option<&str>,
) -> EngineResult<usize> {
    let scope = "st.year_id = ?1
         AND (?2 IS NULL OR st.class_id = ?2)
         AND (?3 IS NULL OR st.student_id = ?3)";

    conn.execute(
        &format!(
            "INSERT OR IGNORE INTO term_results(student_id, term_id)
             SELECT st.student_id, t.id
             FROM student_records st
             JOIN terms t ON t.year_id = st.year_id
             WHERE {scope}"
        ),
        (year_id, class_id, student_id),
    )?;
    conn.execute(
        &format!(
            "INSERT OR IGNORE INTO sequence_results(student_id, term_id, sequence_id)
             SELECT st.student_id, t.id, s.id
             FROM student_records st
             JOIN terms t ON t.year_id = st.year_id
             JOIN sequences s ON s.term_id = t.id
             WHERE {scope}"
        ),
        (year_id, class_id, student_id),
    )?;
    let created = conn.execute(
        &format!(
            "INSERT OR IGNORE INTO subject_records(
                student_id, term_id, sequence_id, subject_id, coefficient)
             SELECT st.student_id, t.id, s.id, cs.subject_id, cs.coefficient
             FROM student_records st
             JOIN terms t ON t.year_id = st.year_id
             JOIN sequences s ON s.term_id = t.id
             JOIN class_subjects cs ON cs.class_id = st.class_id AND cs.year_id = st.year_id
             WHERE {scope}"
        ),
        (year_id, class_id, student_id),
    )?;
    Ok(created)
}

fn validate_subjects(subjects: &[SubjectInput]) -> EngineResult<()> {
    let mut seen: HashSet<&str> = HashSet::new();
    for s in subjects {
        require_id("subjectId", &s.subject_id)?;
        if s.subject_id == ABSENCES_SUBJECT {
            return Err(EngineError::validation_with(
                "subject id is reserved",
                json!({ "subjectId": s.subject_id }),
            ));
        }
        if !s.coefficient.is_finite() || s.coefficient <= 0.0 {
            return Err(EngineError::validation_with(
                "coefficient must be > 0",
                json!({ "subjectId": s.subject_id, "coefficient": s.coefficient.to_string() }),
            ));
        }
        if let Some(h) = s.weekly_hours {
            if !h.is_finite() || h < 0.0 {
                return Err(EngineError::validation_with(
                    "weeklyHours must be >= 0",
                    json!({ "subjectId": s.subject_id }),
                ));
            }
        }
        if !seen.insert(s.subject_id.as_str()) {
            return Err(EngineError::validation_with(
                "duplicate subject in curriculum",
                json!({ "subjectId": s.subject_id }),
            ));
        }
    }
    Ok(())
}

/// Establish or revise a class's curriculum for one year. Coefficient
/// changes propagate to SubjectRecords of sequences that are still open.
pub fn set_curriculum(
    conn: &mut Connection,
    class_id: &str,
    year_id: &str,
    subjects: &[SubjectInput],
) -> EngineResult<CurriculumOutcome> {
    require_id("classId", class_id)?;
    require_id("academicYearId", year_id)?;
    validate_subjects(subjects)?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    store::require_class(&tx, class_id)?;
    store::require_year(&tx, year_id)?;

    let mut coefficients_updated = 0;
    for (i, s) in subjects.iter().enumerate() {
        tx.execute(
            "INSERT INTO class_subjects(class_id, year_id, subject_id, name, coefficient, weekly_hours, sort_order)
             VALUES(?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(class_id, year_id, subject_id) DO UPDATE SET
               name = excluded.name,
               coefficient = excluded.coefficient,
               weekly_hours = excluded.weekly_hours,
               sort_order = excluded.sort_order",
            (
                class_id,
                year_id,
                &s.subject_id,
                s.name.as_deref(),
                s.coefficient,
                s.weekly_hours,
                i as i64,
            ),
        )?;
        coefficients_updated += tx.execute(
            "UPDATE subject_records SET coefficient = ?1
             WHERE subject_id = ?2
               AND coefficient <> ?1
               AND student_id IN (
                   SELECT student_id FROM student_records WHERE class_id = ?3 AND year_id = ?4)
               AND sequence_id IN (
                   SELECT s.id FROM sequences s
                   JOIN terms t ON t.id = s.term_id
                   WHERE t.year_id = ?4 AND s.archived = 0 AND t.archived = 0)",
            (s.coefficient, &s.subject_id, class_id, year_id),
        )?;
    }
    let created_records = materialise(&tx, year_id, Some(class_id), None)?;
    tx.commit()?;

    tracing::info!(
        class = class_id,
        year = year_id,
        subjects = subjects.len(),
        created_records,
        coefficients_updated,
        "curriculum saved"
    );
    Ok(CurriculumOutcome {
        subjects: subjects.len(),
        created_records,
        coefficients_updated,
    })
}

pub fn enroll(
    conn: &mut Connection,
    student_id: &str,
    class_id: &str,
    year_id: &str,
) -> EngineResult<EnrollOutcome> {
    require_id("studentId", student_id)?;
    require_id("classId", class_id)?;
    require_id("academicYearId", year_id)?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    store::require_class(&tx, class_id)?;
    store::require_year(&tx, year_id)?;

    let existing: Option<String> = tx
        .query_row(
            "SELECT class_id FROM student_records WHERE student_id = ? AND year_id = ?",
            (student_id, year_id),
            |r| r.get(0),
        )
        .optional()?;
    let created = match existing {
        Some(ref c) if c != class_id => {
            return Err(EngineError::validation_with(
                "student is already enrolled in another class for this year",
                json!({ "studentId": student_id, "classId": c }),
            ));
        }
        Some(_) => false,
        None => {
            tx.execute(
                "INSERT INTO student_records(student_id, year_id, class_id, created_at)
                 VALUES(?, ?, ?, ?)",
                (
                    student_id,
                    year_id,
                    class_id,
                    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
                ),
            )?;
            true
        }
    };
    let created_records = materialise(&tx, year_id, Some(class_id), Some(student_id))?;
    tx.commit()?;

    tracing::info!(
        student = student_id,
        class = class_id,
        year = year_id,
        created,
        created_records,
        "student enrolled"
    );
    Ok(EnrollOutcome {
        created,
        created_records,
    })
}
