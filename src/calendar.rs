//! Academic calendar as handed over by the scheduling collaborator: years,
//! their terms and sequences, the current-year flag, and archiving.

use crate::error::{EngineError, EngineResult};
use crate::model::{require_id, SequenceSummary, TermSummary, YearInput, YearSummary};
use crate::roster;
use crate::store;
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveTarget<'a> {
    Year(&'a str),
    Term(&'a str),
    Sequence(&'a str),
}

fn resolve_id(id: Option<&String>, field: &str) -> EngineResult<String> {
    match id {
        Some(v) => {
            require_id(field, v)?;
            Ok(v.clone())
        }
        None => Ok(Uuid::new_v4().to_string()),
    }
}

fn require_label(field: &str, label: &str) -> EngineResult<()> {
    if label.trim().is_empty() {
        return Err(EngineError::validation(format!("{} must not be empty", field)));
    }
    Ok(())
}

/// Insert or update a year with its terms and sequences (order given by
/// list position). Terms and sequences that are omitted are left alone,
/// never removed.
pub fn upsert_year(conn: &mut Connection, input: &YearInput) -> EngineResult<YearSummary> {
    require_label("label", &input.label)?;
    let year_id = resolve_id(input.id.as_ref(), "id")?;

    let mut seen: HashSet<String> = HashSet::new();
    for t in &input.terms {
        require_label("term label", &t.label)?;
        for s in &t.sequences {
            require_label("sequence label", &s.label)?;
        }
        for id in t
            .id
            .iter()
            .chain(t.sequences.iter().filter_map(|s| s.id.as_ref()))
        {
            if !seen.insert(id.clone()) {
                return Err(EngineError::validation_with(
                    "duplicate id in calendar payload",
                    json!({ "id": id }),
                ));
            }
        }
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute(
        "INSERT INTO academic_years(id, label, created_at) VALUES(?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET label = excluded.label",
        (
            &year_id,
            input.label.trim(),
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        ),
    )?;

    for (ti, t) in input.terms.iter().enumerate() {
        let term_id = resolve_id(t.id.as_ref(), "term id")?;
        ensure_parent(&tx, "terms", "year_id", &term_id, &year_id)?;
        tx.execute(
            "INSERT INTO terms(id, year_id, label, sort_order) VALUES(?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET label = excluded.label, sort_order = excluded.sort_order",
            (&term_id, &year_id, t.label.trim(), ti as i64),
        )?;
        for (si, s) in t.sequences.iter().enumerate() {
            let sequence_id = resolve_id(s.id.as_ref(), "sequence id")?;
            ensure_parent(&tx, "sequences", "term_id", &sequence_id, &term_id)?;
            tx.execute(
                "INSERT INTO sequences(id, term_id, label, sort_order) VALUES(?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET label = excluded.label, sort_order = excluded.sort_order",
                (&sequence_id, &term_id, s.label.trim(), si as i64),
            )?;
        }
    }

    let materialised = roster::materialise(&tx, &year_id, None, None)?;
    if input.is_current {
        mark_current(&tx, &year_id)?;
    }
    tx.commit()?;

    tracing::info!(year = %year_id, terms = input.terms.len(), materialised, "academic year saved");
    load_year(conn, &year_id)
}

/// An id may not move between parents once created.
fn ensure_parent(
    tx: &Transaction<'_>,
    table: &str,
    parent_column: &str,
    id: &str,
    parent_id: &str,
) -> EngineResult<()> {
    let sql = format!("SELECT {} FROM {} WHERE id = ?", parent_column, table);
    let existing: Option<String> = tx.query_row(&sql, [id], |r| r.get(0)).optional()?;
    match existing {
        Some(p) if p != parent_id => Err(EngineError::validation_with(
            "id already belongs to another parent",
            json!({ "id": id, "parentId": p }),
        )),
        _ => Ok(()),
    }
}

fn mark_current(conn: &Connection, year_id: &str) -> EngineResult<()> {
    conn.execute(
        "UPDATE academic_years SET is_current = 0 WHERE is_current = 1 AND id <> ?",
        [year_id],
    )?;
    conn.execute(
        "UPDATE academic_years SET is_current = 1 WHERE id = ?",
        [year_id],
    )?;
    Ok(())
}

pub fn set_current_year(conn: &mut Connection, year_id: &str) -> EngineResult<YearSummary> {
    require_id("academicYearId", year_id)?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    store::require_year(&tx, year_id)?;
    mark_current(&tx, year_id)?;
    tx.commit()?;
    tracing::info!(year = year_id, "current academic year changed");
    load_year(conn, year_id)
}

pub fn archive(conn: &Connection, target: ArchiveTarget<'_>) -> EngineResult<()> {
    let (table, id, label) = match target {
        ArchiveTarget::Year(id) => ("academic_years", id, "academic year"),
        ArchiveTarget::Term(id) => ("terms", id, "term"),
        ArchiveTarget::Sequence(id) => ("sequences", id, "sequence"),
    };
    require_id("id", id)?;
    let changed = conn.execute(
        &format!("UPDATE {} SET archived = 1 WHERE id = ?", table),
        [id],
    )?;
    if changed == 0 {
        return Err(EngineError::not_found(
            format!("{} not found", label),
            json!({ "id": id }),
        ));
    }
    tracing::info!(kind = label, id, "period archived");
    Ok(())
}

pub fn load_year(conn: &Connection, year_id: &str) -> EngineResult<YearSummary> {
    let (label, is_current, archived) = store::require_year(conn, year_id)?;
    let mut term_stmt = conn.prepare(
        "SELECT id, label, archived FROM terms WHERE year_id = ? ORDER BY sort_order, id",
    )?;
    let term_rows: Vec<(String, String, i64)> = term_stmt
        .query_map([year_id], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut seq_stmt = conn.prepare(
        "SELECT id, label, archived FROM sequences WHERE term_id = ? ORDER BY sort_order, id",
    )?;
    let mut terms = Vec::with_capacity(term_rows.len());
    for (id, label, archived) in term_rows {
        let sequences = seq_stmt
            .query_map([&id], |r| {
                Ok(SequenceSummary {
                    id: r.get(0)?,
                    label: r.get(1)?,
                    archived: r.get::<_, i64>(2)? != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        terms.push(TermSummary {
            id,
            label,
            archived: archived != 0,
            sequences,
        });
    }

    Ok(YearSummary {
        id: year_id.to_string(),
        label,
        is_current,
        archived,
        terms,
    })
}

pub fn list_years(conn: &Connection) -> EngineResult<Vec<YearSummary>> {
    let mut stmt = conn.prepare("SELECT id FROM academic_years ORDER BY label, id")?;
    let ids = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    ids.iter().map(|id| load_year(conn, id)).collect()
}
