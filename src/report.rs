//! Read-only views for reporting consumers. Nothing here writes.

use crate::calc::{self, SequenceAverage, WeightedMark};
use crate::discipline::DisciplineRating;
use crate::error::EngineResult;
use crate::settings::AveragingSettings;
use crate::store;
use rusqlite::Connection;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceAverageView {
    pub sequence_id: String,
    pub label: String,
    pub average: SequenceAverage,
    pub display: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermAverageView {
    pub term_id: String,
    pub label: String,
    pub average: Option<f64>,
    pub display: Option<f64>,
    pub sequences: Vec<SequenceAverageView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAverages {
    pub student_id: String,
    pub academic_year_id: String,
    pub term_policy: calc::TermPolicy,
    pub terms: Vec<TermAverageView>,
}

/// Fresh averages for one student computed from current marks. Stored
/// averages and ranks are not consulted.
pub fn student_averages(
    conn: &Connection,
    student_id: &str,
    year_id: &str,
    settings: &AveragingSettings,
) -> EngineResult<StudentAverages> {
    let record = store::student_record(conn, student_id, year_id)?;
    let display = |v: Option<f64>| v.map(|x| calc::round_for_display(x, settings.display_decimals));

    let terms = record
        .terms
        .iter()
        .map(|t| {
            let sequences: Vec<SequenceAverageView> = t
                .sequences
                .iter()
                .map(|s| {
                    let average = calc::sequence_average(s.subjects.iter().map(|sub| WeightedMark {
                        mark: sub.current_mark,
                        coefficient: sub.coefficient,
                    }));
                    SequenceAverageView {
                        sequence_id: s.sequence_id.clone(),
                        label: s.label.clone(),
                        display: display(average.value),
                        average,
                    }
                })
                .collect();
            let average =
                calc::term_average(sequences.iter().map(|s| &s.average), settings.term_policy);
            TermAverageView {
                term_id: t.term_id.clone(),
                label: t.label.clone(),
                average,
                display: display(average),
                sequences,
            }
        })
        .collect();

    Ok(StudentAverages {
        student_id: student_id.to_string(),
        academic_year_id: year_id.to_string(),
        term_policy: settings.term_policy,
        terms,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassSummaryRow {
    pub student_id: String,
    pub average: Option<f64>,
    pub display: Option<f64>,
    pub rank: Option<i64>,
    pub discipline_rating: Option<DisciplineRating>,
    pub absences: i64,
}

/// Stored term results for every student of a class, best rank first;
/// students without a rank follow in id order.
pub fn class_summary(
    conn: &Connection,
    class_id: &str,
    year_id: &str,
    term_id: &str,
    settings: &AveragingSettings,
) -> EngineResult<Vec<ClassSummaryRow>> {
    store::require_class(conn, class_id)?;
    store::require_year(conn, year_id)?;
    store::require_term_in_year(conn, year_id, term_id)?;

    let mut stmt = conn.prepare(
        "SELECT st.student_id, r.average, r.rank, r.discipline,
                (SELECT COALESCE(SUM(q.absences), 0) FROM sequence_results q
                 WHERE q.student_id = st.student_id AND q.term_id = ?3)
         FROM student_records st
         LEFT JOIN term_results r ON r.student_id = st.student_id AND r.term_id = ?3
         WHERE st.class_id = ?1 AND st.year_id = ?2
         ORDER BY r.rank IS NULL, r.rank, st.student_id",
    )?;
    let rows = stmt
        .query_map((class_id, year_id, term_id), |r| {
            let average: Option<f64> = r.get(1)?;
            let discipline: Option<String> = r.get(3)?;
            Ok(ClassSummaryRow {
                student_id: r.get(0)?,
                average,
                display: average
                    .map(|x| calc::round_for_display(x, settings.display_decimals)),
                rank: r.get(2)?,
                discipline_rating: discipline.as_deref().and_then(DisciplineRating::parse),
                absences: r.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}
