//! Rank Engine: explicit batch recomputation of class-wide ranks.
//!
//! A batch reads one consistent snapshot inside an IMMEDIATE transaction,
//! ranks with competition ranking and writes every rank in the same
//! transaction. Batches for one [`RankScope`] are mutually exclusive; a
//! second request for a busy scope fails fast instead of queueing.

use crate::absence;
use crate::calc::{self, SequenceAverage, TermPolicy, WeightedMark};
use crate::discipline::{self, DisciplineThresholds};
use crate::error::{EngineError, EngineResult};
use crate::model::{RankOutcome, RankRow, RankScope};
use crate::store;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct RankLocks {
    busy: Mutex<HashSet<RankScope>>,
}

/// Held for the duration of one batch; releases its scope on drop.
#[derive(Debug)]
pub struct RankGuard<'a> {
    locks: &'a RankLocks,
    scope: RankScope,
}

impl RankLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, scope: &RankScope) -> EngineResult<RankGuard<'_>> {
        let mut busy = self.busy.lock().unwrap_or_else(|e| e.into_inner());
        if !busy.insert(scope.clone()) {
            tracing::warn!(scope = %scope, "rank batch rejected: scope busy");
            return Err(EngineError::Concurrency {
                scope: scope.to_string(),
            });
        }
        Ok(RankGuard {
            locks: self,
            scope: scope.clone(),
        })
    }

    pub fn is_busy(&self, scope: &RankScope) -> bool {
        self.busy
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(scope)
    }
}

impl Drop for RankGuard<'_> {
    fn drop(&mut self) {
        let mut busy = self.locks.busy.lock().unwrap_or_else(|e| e.into_inner());
        busy.remove(&self.scope);
    }
}

fn require_scope(conn: &Connection, scope: &RankScope) -> EngineResult<()> {
    scope.validate()?;
    store::require_class(conn, scope.class_id())?;
    store::require_year(conn, scope.year_id())?;
    store::require_term_in_year(conn, scope.year_id(), scope.term_id())?;
    match scope {
        RankScope::Subject {
            class_id,
            year_id,
            term_id,
            sequence_id,
            subject_id,
        } => {
            store::require_sequence_in_term(conn, term_id, sequence_id)?;
            let in_curriculum: i64 = conn.query_row(
                "SELECT COUNT(*) FROM class_subjects
                 WHERE class_id = ? AND year_id = ? AND subject_id = ?",
                (class_id, year_id, subject_id),
                |r| r.get(0),
            )?;
            if in_curriculum == 0 {
                return Err(EngineError::not_found(
                    "subject not in class curriculum",
                    json!({ "classId": class_id, "academicYearId": year_id, "subjectId": subject_id }),
                ));
            }
        }
        RankScope::Sequence {
            term_id,
            sequence_id,
            ..
        } => store::require_sequence_in_term(conn, term_id, sequence_id)?,
        RankScope::Term { .. } => {}
    }
    Ok(())
}

fn to_rows(ranked: Vec<(String, i64, f64)>) -> Vec<RankRow> {
    ranked
        .into_iter()
        .map(|(student_id, rank, value)| RankRow {
            student_id,
            rank,
            value,
        })
        .collect()
}

/// Rank every student of the class on one subject of one sequence.
/// Students without a mark are not ranked.
pub fn rank_subject(conn: &mut Connection, scope: &RankScope) -> EngineResult<RankOutcome> {
    let RankScope::Subject {
        class_id,
        year_id,
        term_id,
        sequence_id,
        subject_id,
    } = scope
    else {
        return Err(EngineError::validation("subject rank needs a subject scope"));
    };

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    require_scope(&tx, scope)?;

    let marks: Vec<(String, f64)> = {
        let mut stmt = tx.prepare(
            "SELECT sr.student_id, sr.current_mark
             FROM subject_records sr
             JOIN student_records st
               ON st.student_id = sr.student_id AND st.year_id = ?2
             WHERE st.class_id = ?1
               AND sr.term_id = ?3 AND sr.sequence_id = ?4 AND sr.subject_id = ?5
               AND sr.current_mark IS NOT NULL",
        )?;
        let rows = stmt
            .query_map(
                (class_id, year_id, term_id, sequence_id, subject_id),
                |r| Ok((r.get(0)?, r.get(1)?)),
            )?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };
    if marks.is_empty() {
        tracing::info!(scope = %scope, "rank batch: no marks, nothing to do");
        return Ok(RankOutcome::empty());
    }

    let ranked = calc::competition_ranks(&marks);
    {
        let mut update = tx.prepare(
            "UPDATE subject_records SET rank = ?
             WHERE student_id = ? AND term_id = ? AND sequence_id = ? AND subject_id = ?",
        )?;
        for (student_id, rank, _) in &ranked {
            update.execute((rank, student_id, term_id, sequence_id, subject_id))?;
        }
    }
    tx.commit()?;

    tracing::info!(scope = %scope, updated = ranked.len(), "rank batch committed");
    Ok(RankOutcome {
        updated: ranked.len(),
        ranks: to_rows(ranked),
    })
}

/// Weighted marks of every enrolled student for every sequence of a term,
/// keyed by (student, sequence).
fn class_term_marks(
    tx: &Transaction<'_>,
    class_id: &str,
    year_id: &str,
    term_id: &str,
) -> EngineResult<HashMap<(String, String), Vec<WeightedMark>>> {
    let mut stmt = tx.prepare(
        "SELECT sr.student_id, sr.sequence_id, sr.coefficient, sr.current_mark
         FROM subject_records sr
         JOIN student_records st
           ON st.student_id = sr.student_id AND st.year_id = ?2
         WHERE st.class_id = ?1 AND sr.term_id = ?3",
    )?;
    let rows = stmt.query_map((class_id, year_id, term_id), |r| {
        Ok((
            r.get::<_, String>(0)?,
            r.get::<_, String>(1)?,
            WeightedMark {
                coefficient: r.get(2)?,
                mark: r.get(3)?,
            },
        ))
    })?;
    let mut out: HashMap<(String, String), Vec<WeightedMark>> = HashMap::new();
    for row in rows {
        let (student_id, sequence_id, mark) = row?;
        out.entry((student_id, sequence_id)).or_default().push(mark);
    }
    Ok(out)
}

/// Compute sequence averages for the class from one snapshot, store them,
/// and rank students that have one.
pub fn rank_sequence(conn: &mut Connection, scope: &RankScope) -> EngineResult<RankOutcome> {
    let RankScope::Sequence {
        class_id,
        year_id,
        term_id,
        sequence_id,
    } = scope
    else {
        return Err(EngineError::validation("sequence rank needs a sequence scope"));
    };

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    require_scope(&tx, scope)?;

    let mut marks = class_term_marks(&tx, class_id, year_id, term_id)?;
    let mut averages: Vec<(String, f64)> = Vec::new();
    for student_id in store::class_members(&tx, class_id, year_id)? {
        let avg = calc::sequence_average(
            marks
                .remove(&(student_id.clone(), sequence_id.clone()))
                .unwrap_or_default(),
        );
        if let Some(v) = avg.value {
            averages.push((student_id, v));
        }
    }
    if averages.is_empty() {
        tracing::info!(scope = %scope, "rank batch: no averages, nothing to do");
        return Ok(RankOutcome::empty());
    }

    let ranked = calc::competition_ranks(&averages);
    {
        let mut update = tx.prepare(
            "UPDATE sequence_results SET average = ?, rank = ?
             WHERE student_id = ? AND sequence_id = ?",
        )?;
        for (student_id, rank, value) in &ranked {
            update.execute((value, rank, student_id, sequence_id))?;
        }
    }
    tx.commit()?;

    tracing::info!(scope = %scope, updated = ranked.len(), "rank batch committed");
    Ok(RankOutcome {
        updated: ranked.len(),
        ranks: to_rows(ranked),
    })
}

/// Compute sequence and term averages plus discipline ratings for the
/// class, store them, and rank students by term average.
pub fn rank_term(
    conn: &mut Connection,
    scope: &RankScope,
    policy: TermPolicy,
    thresholds: &DisciplineThresholds,
) -> EngineResult<RankOutcome> {
    let RankScope::Term {
        class_id,
        year_id,
        term_id,
    } = scope
    else {
        return Err(EngineError::validation("term rank needs a term scope"));
    };

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    require_scope(&tx, scope)?;

    let sequences = store::term_sequences(&tx, term_id)?;
    let mut marks = class_term_marks(&tx, class_id, year_id, term_id)?;

    struct StudentTerm {
        student_id: String,
        sequence_averages: Vec<(String, SequenceAverage)>,
        average: Option<f64>,
        absences: i64,
    }

    let mut students: Vec<StudentTerm> = Vec::new();
    for student_id in store::class_members(&tx, class_id, year_id)? {
        let sequence_averages: Vec<(String, SequenceAverage)> = sequences
            .iter()
            .map(|(sequence_id, _)| {
                let avg = calc::sequence_average(
                    marks
                        .remove(&(student_id.clone(), sequence_id.clone()))
                        .unwrap_or_default(),
                );
                (sequence_id.clone(), avg)
            })
            .collect();
        let average = calc::term_average(sequence_averages.iter().map(|(_, a)| a), policy);
        let absences = absence::absence_total(&tx, &student_id, term_id)?;
        students.push(StudentTerm {
            student_id,
            sequence_averages,
            average,
            absences,
        });
    }

    let averages: Vec<(String, f64)> = students
        .iter()
        .filter_map(|s| s.average.map(|a| (s.student_id.clone(), a)))
        .collect();
    if averages.is_empty() {
        tracing::info!(scope = %scope, "rank batch: no averages, nothing to do");
        return Ok(RankOutcome::empty());
    }
    let ranked = calc::competition_ranks(&averages);
    let rank_of: HashMap<&str, i64> = ranked
        .iter()
        .map(|(id, rank, _)| (id.as_str(), *rank))
        .collect();

    // Sequence averages are rewritten from this snapshot, so their ranks
    // are too; a stored sequence rank never outlives its average.
    let mut sequence_rank_of: HashMap<(String, String), i64> = HashMap::new();
    for (sequence_id, _) in &sequences {
        let values: Vec<(String, f64)> = students
            .iter()
            .filter_map(|s| {
                s.sequence_averages
                    .iter()
                    .find(|(id, _)| id == sequence_id)
                    .and_then(|(_, a)| a.value)
                    .map(|v| (s.student_id.clone(), v))
            })
            .collect();
        for (student_id, rank, _) in calc::competition_ranks(&values) {
            sequence_rank_of.insert((student_id, sequence_id.clone()), rank);
        }
    }

    {
        let mut seq_update = tx.prepare(
            "UPDATE sequence_results SET average = ?, rank = ?
             WHERE student_id = ? AND sequence_id = ?",
        )?;
        let mut term_update = tx.prepare(
            "UPDATE term_results SET average = ?, rank = ?, discipline = ?
             WHERE student_id = ? AND term_id = ?",
        )?;
        for s in &students {
            for (sequence_id, avg) in &s.sequence_averages {
                let rank = sequence_rank_of
                    .get(&(s.student_id.clone(), sequence_id.clone()))
                    .copied();
                seq_update.execute((avg.value, rank, &s.student_id, sequence_id))?;
            }
            let rating = discipline::evaluate(s.average, s.absences, thresholds);
            term_update.execute((
                s.average,
                rank_of.get(s.student_id.as_str()).copied(),
                rating.as_str(),
                &s.student_id,
                term_id,
            ))?;
        }
    }
    tx.commit()?;

    tracing::info!(scope = %scope, updated = ranked.len(), "rank batch committed");
    Ok(RankOutcome {
        updated: ranked.len(),
        ranks: to_rows(ranked),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(subject: &str) -> RankScope {
        RankScope::Subject {
            class_id: "c1".into(),
            year_id: "y1".into(),
            term_id: "t1".into(),
            sequence_id: "q1".into(),
            subject_id: subject.into(),
        }
    }

    #[test]
    fn busy_scope_is_rejected_until_guard_drops() {
        let locks = RankLocks::new();
        let guard = locks.try_acquire(&scope("math")).expect("first acquire");
        let err = locks.try_acquire(&scope("math")).unwrap_err();
        assert_eq!(err.code(), "concurrency_error");
        assert!(locks.try_acquire(&scope("physics")).is_ok());
        drop(guard);
        assert!(!locks.is_busy(&scope("math")));
        assert!(locks.try_acquire(&scope("math")).is_ok());
    }
}
