use gradebookd::db;
use gradebookd::model::{MarkCoordinate, MarkOutcome, SubjectInput, SubjectRecord, YearInput};
use gradebookd::Engine;
use serde_json::json;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

/// One year, one term with two sequences, a class of two students taking
/// maths (coef 4) and english (coef 2).
fn school(prefix: &str) -> (PathBuf, Engine) {
    let workspace = temp_dir(prefix);
    let engine = Engine::open(&workspace).expect("open workspace");
    let year: YearInput = serde_json::from_value(json!({
        "id": "y1",
        "label": "2026/2027",
        "isCurrent": true,
        "terms": [{
            "id": "t1",
            "label": "First term",
            "sequences": [
                { "id": "q1", "label": "Sequence 1" },
                { "id": "q2", "label": "Sequence 2" }
            ]
        }]
    }))
    .expect("year payload");
    engine.upsert_year(&year).expect("upsert year");
    engine.upsert_class(Some("c1"), "Form 1").expect("class");
    let subjects: Vec<SubjectInput> = serde_json::from_value(json!([
        { "subjectId": "math", "name": "Mathematics", "coefficient": 4 },
        { "subjectId": "eng", "name": "English", "coefficient": 2 }
    ]))
    .expect("subjects payload");
    engine.set_curriculum("c1", "y1", &subjects).expect("curriculum");
    engine.enroll("s1", "c1", "y1").expect("enroll s1");
    engine.enroll("s2", "c1", "y1").expect("enroll s2");
    (workspace, engine)
}

fn math(student: &str) -> MarkCoordinate {
    MarkCoordinate::new(student, "t1", "q1", "math")
}

fn subject_mark(outcome: MarkOutcome) -> SubjectRecord {
    match outcome {
        MarkOutcome::Subject(r) => r,
        other => panic!("expected subject record, got {:?}", other),
    }
}

fn stored_mark(engine: &Engine, student: &str, sequence: &str, subject: &str) -> Option<f64> {
    let record = engine.student_record(student, "y1").expect("student record");
    record
        .terms
        .iter()
        .flat_map(|t| t.sequences.iter())
        .find(|s| s.sequence_id == sequence)
        .and_then(|s| s.subjects.iter().find(|sub| sub.subject_id == subject))
        .expect("subject record present")
        .current_mark
}

#[test]
fn recorded_mark_is_visible_in_student_record() {
    let (_ws, engine) = school("gradebook-ledger-visible");
    let record = subject_mark(engine.record_mark(&math("s1"), 12.5, "teacher-1").expect("record"));
    assert_eq!(record.current_mark, Some(12.5));
    assert_eq!(record.subject_name.as_deref(), Some("Mathematics"));
    assert_eq!(stored_mark(&engine, "s1", "q1", "math"), Some(12.5));
    assert_eq!(stored_mark(&engine, "s1", "q1", "eng"), None);
    assert_eq!(stored_mark(&engine, "s2", "q1", "math"), None);
}

#[test]
fn every_edit_appends_one_linked_entry() {
    let (_ws, engine) = school("gradebook-ledger-append");
    engine.record_mark(&math("s1"), 10.0, "teacher-1").expect("first");
    engine.record_mark(&math("s1"), 14.0, "teacher-2").expect("second");
    let record = subject_mark(engine.record_mark(&math("s1"), 0.0, "teacher-1").expect("third"));

    assert_eq!(record.current_mark, Some(0.0));
    let history = engine.ledger_history(&math("s1")).expect("history");
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].previous_mark, None);
    assert_eq!(history[1].previous_mark, Some(10.0));
    assert_eq!(history[2].previous_mark, Some(14.0));
    assert_eq!(history[1].editor_id, "teacher-2");
    assert_eq!(
        history.iter().map(|e| e.position).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert_eq!(history[1].prev_hash, history[0].entry_hash);
    assert_eq!(history[2].prev_hash, history[1].entry_hash);

    let verification = engine.verify_ledger(&math("s1")).expect("verify");
    assert!(verification.intact);
    assert_eq!(verification.entries, 3);
    assert_eq!(verification.head_hash, history[2].entry_hash);
}

#[test]
fn rejected_edits_leave_no_trace() {
    let (_ws, engine) = school("gradebook-ledger-reject");
    engine.record_mark(&math("s1"), 11.0, "teacher-1").expect("seed");

    for bad in [20.5, -1.0, f64::NAN] {
        let e = engine
            .record_mark(&math("s1"), bad, "teacher-1")
            .expect_err("out of range");
        assert_eq!(e.code(), "validation_error");
    }
    let e = engine
        .record_mark(&math("s1"), 12.0, "  ")
        .expect_err("blank editor");
    assert_eq!(e.code(), "validation_error");
    let e = engine
        .record_mark(&MarkCoordinate::new("s1", "", "q1", "math"), 12.0, "teacher-1")
        .expect_err("malformed coordinate");
    assert_eq!(e.code(), "validation_error");

    assert_eq!(stored_mark(&engine, "s1", "q1", "math"), Some(11.0));
    assert_eq!(engine.ledger_history(&math("s1")).expect("history").len(), 1);
}

#[test]
fn unknown_coordinates_are_not_found() {
    let (_ws, engine) = school("gradebook-ledger-missing");
    let e = engine
        .record_mark(&MarkCoordinate::new("s1", "t1", "q1", "latin"), 12.0, "teacher-1")
        .expect_err("subject outside curriculum");
    assert_eq!(e.code(), "not_found");
    let e = engine
        .record_mark(&MarkCoordinate::new("s9", "t1", "q1", "math"), 12.0, "teacher-1")
        .expect_err("student not enrolled");
    assert_eq!(e.code(), "not_found");
    let e = engine
        .record_mark(&MarkCoordinate::new("s1", "t1", "q9", "math"), 12.0, "teacher-1")
        .expect_err("unknown sequence");
    assert_eq!(e.code(), "not_found");
}

#[test]
fn archived_periods_reject_edits() {
    let (_ws, engine) = school("gradebook-ledger-archived");
    engine.record_mark(&math("s1"), 9.0, "teacher-1").expect("before archive");
    engine
        .archive(gradebookd::calendar::ArchiveTarget::Sequence("q1"))
        .expect("archive sequence");

    let e = engine
        .record_mark(&math("s1"), 15.0, "teacher-1")
        .expect_err("closed period");
    assert_eq!(e.code(), "validation_error");
    assert_eq!(stored_mark(&engine, "s1", "q1", "math"), Some(9.0));

    // Other sequences of the term stay open.
    engine
        .record_mark(&MarkCoordinate::new("s1", "t1", "q2", "math"), 15.0, "teacher-1")
        .expect("open sequence");

    engine
        .archive(gradebookd::calendar::ArchiveTarget::Term("t1"))
        .expect("archive term");
    let e = engine
        .record_mark(&MarkCoordinate::new("s1", "t1", "q2", "math"), 16.0, "teacher-1")
        .expect_err("closed term");
    assert_eq!(e.code(), "validation_error");
}

#[test]
fn absences_subject_routes_to_absence_counter() {
    let (_ws, engine) = school("gradebook-ledger-absences");
    let coord = MarkCoordinate::new("s1", "t1", "q1", "absences");
    let outcome = engine.record_mark(&coord, 3.0, "teacher-1").expect("absences");
    let MarkOutcome::Absences(sequence) = outcome else {
        panic!("expected sequence");
    };
    assert_eq!(sequence.sequence_id, "q1");
    assert_eq!(sequence.absences, 3);

    engine.record_absence("s1", "t1", "q1", 5, "teacher-2").expect("direct path");
    let history = engine.absence_history("s1", "q1").expect("history");
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].previous_count, 3);
    assert_eq!(history[1].new_count, 5);

    let e = engine.record_mark(&coord, 2.5, "teacher-1").expect_err("fractional");
    assert_eq!(e.code(), "validation_error");
    let e = engine
        .record_absence("s1", "t1", "q1", -1, "teacher-1")
        .expect_err("negative");
    assert_eq!(e.code(), "validation_error");
    assert_eq!(engine.absence_history("s1", "q1").expect("history").len(), 2);
}

#[test]
fn ledger_rows_cannot_be_rewritten() {
    let (ws, engine) = school("gradebook-ledger-immutable");
    engine.record_mark(&math("s1"), 13.0, "teacher-1").expect("record");
    engine.record_absence("s1", "t1", "q1", 2, "teacher-1").expect("absences");

    let conn = db::connect(&db::db_path(&ws)).expect("connect");
    assert!(conn
        .execute("UPDATE mark_ledger SET new_mark = 20", [])
        .is_err());
    assert!(conn.execute("DELETE FROM mark_ledger", []).is_err());
    assert!(conn.execute("DELETE FROM absence_ledger", []).is_err());
    assert_eq!(engine.ledger_history(&math("s1")).expect("history").len(), 1);
}

#[test]
fn verification_detects_tampering() {
    let (ws, engine) = school("gradebook-ledger-tamper");
    engine.record_mark(&math("s1"), 8.0, "teacher-1").expect("first");
    engine.record_mark(&math("s1"), 12.0, "teacher-1").expect("second");
    assert!(engine.verify_ledger(&math("s1")).expect("verify").intact);

    let conn = db::connect(&db::db_path(&ws)).expect("connect");
    conn.execute_batch(
        "DROP TRIGGER mark_ledger_no_update;
         UPDATE mark_ledger SET new_mark = 18 WHERE student_id = 's1' AND position = 1;",
    )
    .expect("tamper");

    let verification = engine.verify_ledger(&math("s1")).expect("verify");
    assert!(!verification.intact);
    assert_eq!(verification.first_broken_position, Some(1));
}
