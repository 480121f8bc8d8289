use gradebookd::discipline::DisciplineRating;
use gradebookd::model::{MarkCoordinate, SubjectInput, YearInput};
use gradebookd::settings::SetupSection;
use gradebookd::Engine;
use serde_json::{json, Map, Value};
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

fn assert_close(actual: Option<f64>, expected: f64) {
    let v = actual.expect("value present");
    assert!((v - expected).abs() < 1e-9, "expected {expected}, got {v}");
}

fn patch(v: Value) -> Map<String, Value> {
    v.as_object().cloned().expect("object")
}

/// s1: q1 maths 16, english blank; q2 maths 10, english 13.
/// s2: q1 maths 8, english 5; nine absences.
/// s3: no marks, twenty absences.
/// s4: q1 maths 13, english 14.
fn term_fixture(prefix: &str) -> Engine {
    let engine = Engine::open(&temp_dir(prefix)).expect("open workspace");
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
    engine.upsert_class(Some("c1"), "Form 3").expect("class");
    let subjects: Vec<SubjectInput> = serde_json::from_value(json!([
        { "subjectId": "math", "coefficient": 4, "weeklyHours": 5 },
        { "subjectId": "eng", "coefficient": 2, "weeklyHours": 3 }
    ]))
    .expect("subjects payload");
    engine.set_curriculum("c1", "y1", &subjects).expect("curriculum");
    for s in ["s1", "s2", "s3", "s4"] {
        engine.enroll(s, "c1", "y1").expect("enroll");
    }

    let marks = [
        ("s1", "q1", "math", 16.0),
        ("s1", "q2", "math", 10.0),
        ("s1", "q2", "eng", 13.0),
        ("s2", "q1", "math", 8.0),
        ("s2", "q1", "eng", 5.0),
        ("s4", "q1", "math", 13.0),
        ("s4", "q1", "eng", 14.0),
    ];
    for (student, sequence, subject, value) in marks {
        engine
            .record_mark(
                &MarkCoordinate::new(student, "t1", sequence, subject),
                value,
                "teacher-1",
            )
            .expect("record mark");
    }
    engine.record_absence("s2", "t1", "q1", 9, "teacher-1").expect("absences");
    engine.record_absence("s3", "t1", "q1", 12, "teacher-1").expect("absences");
    engine.record_absence("s3", "t1", "q2", 8, "teacher-1").expect("absences");
    engine
}

#[test]
fn unmarked_subjects_do_not_dilute_the_average() {
    let engine = term_fixture("gradebook-avg-unmarked");
    let averages = engine.student_averages("s1", "y1").expect("averages");
    let term = &averages.terms[0];
    let q1 = &term.sequences[0].average;
    assert_close(q1.value, 16.0);
    assert_eq!(q1.marked_count, 1);
    assert_eq!(q1.unmarked_count, 1);
    assert_eq!(q1.weighted_sum, 64.0);
    assert_eq!(q1.coefficient_total, 4.0);
    assert_close(term.sequences[1].average.value, 11.0);
    assert_close(term.average, 13.5);

    let none = engine.student_averages("s3", "y1").expect("averages");
    assert_eq!(none.terms[0].average, None);
    assert_eq!(none.terms[0].sequences[0].average.value, None);
}

#[test]
fn term_policy_is_a_setting() {
    let engine = term_fixture("gradebook-avg-policy");
    let updated = engine
        .update_settings(
            SetupSection::Averaging,
            &patch(json!({ "termPolicy": "coefficientWeighted" })),
        )
        .expect("update");
    assert_eq!(updated["termPolicy"], json!("coefficientWeighted"));

    let averages = engine.student_averages("s1", "y1").expect("averages");
    // (16 * 4 + 11 * 6) / 10
    assert_close(averages.terms[0].average, 13.0);

    let e = engine
        .update_settings(SetupSection::Averaging, &patch(json!({ "termPolicy": "median" })))
        .expect_err("unknown policy");
    assert_eq!(e.code(), "validation_error");
}

#[test]
fn display_rounding_leaves_stored_values_alone() {
    let engine = term_fixture("gradebook-avg-display");
    let averages = engine.student_averages("s4", "y1").expect("averages");
    let q1 = &averages.terms[0].sequences[0];
    assert_close(q1.average.value, 80.0 / 6.0);
    assert_eq!(q1.display, Some(13.33));

    engine
        .update_settings(SetupSection::Averaging, &patch(json!({ "displayDecimals": 0 })))
        .expect("update");
    let averages = engine.student_averages("s4", "y1").expect("averages");
    let q1 = &averages.terms[0].sequences[0];
    assert_eq!(q1.display, Some(13.0));
    assert_close(q1.average.value, 80.0 / 6.0);
}

#[test]
fn term_batch_ranks_and_rates_the_class() {
    let engine = term_fixture("gradebook-avg-term-rank");
    let outcome = engine.calculate_term_rank("c1", "y1", "t1").expect("term rank");
    assert_eq!(outcome.updated, 3);

    let rows = engine.class_summary("c1", "y1", "t1").expect("summary");
    let summary: Vec<(&str, Option<i64>, Option<DisciplineRating>, i64)> = rows
        .iter()
        .map(|r| (r.student_id.as_str(), r.rank, r.discipline_rating, r.absences))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("s1", Some(1), Some(DisciplineRating::Good), 0),
            ("s4", Some(2), Some(DisciplineRating::Good), 0),
            ("s2", Some(3), Some(DisciplineRating::Warning), 9),
            ("s3", None, Some(DisciplineRating::Critical), 20),
        ]
    );
    assert_close(rows[0].average, 13.5);
    assert_eq!(rows[3].average, None);

    let record = engine.student_record("s1", "y1").expect("record");
    assert_eq!(record.terms[0].rank, Some(1));
    assert_eq!(record.terms[0].discipline_rating, Some(DisciplineRating::Good));
    assert_close(record.terms[0].sequences[1].average, 11.0);
}

#[test]
fn discipline_thresholds_are_configurable() {
    let engine = term_fixture("gradebook-avg-discipline");
    engine
        .update_settings(
            SetupSection::Discipline,
            &patch(json!({ "warningAbsences": 5, "criticalAbsences": 9 })),
        )
        .expect("update");
    engine.calculate_term_rank("c1", "y1", "t1").expect("term rank");
    let record = engine.student_record("s2", "y1").expect("record");
    assert_eq!(
        record.terms[0].discipline_rating,
        Some(DisciplineRating::Critical)
    );

    let e = engine
        .update_settings(
            SetupSection::Discipline,
            &patch(json!({ "warningAbsences": 30 })),
        )
        .expect_err("warning above critical");
    assert_eq!(e.code(), "validation_error");
}
