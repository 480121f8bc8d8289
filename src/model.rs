use crate::discipline::DisciplineRating;
use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

/// Reserved subject id routing a mark edit to the sequence absence counter.
pub const ABSENCES_SUBJECT: &str = "absences";
pub const MARK_MIN: f64 = 0.0;
pub const MARK_MAX: f64 = 20.0;

/// Composite key of one SubjectRecord.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkCoordinate {
    pub student_id: String,
    pub term_id: String,
    pub sequence_id: String,
    pub subject_id: String,
}

impl MarkCoordinate {
    pub fn new(
        student_id: impl Into<String>,
        term_id: impl Into<String>,
        sequence_id: impl Into<String>,
        subject_id: impl Into<String>,
    ) -> Self {
        Self {
            student_id: student_id.into(),
            term_id: term_id.into(),
            sequence_id: sequence_id.into(),
            subject_id: subject_id.into(),
        }
    }

    pub fn is_absences(&self) -> bool {
        self.subject_id == ABSENCES_SUBJECT
    }

    pub fn validate(&self) -> EngineResult<()> {
        for (field, value) in [
            ("studentId", &self.student_id),
            ("termId", &self.term_id),
            ("sequenceId", &self.sequence_id),
            ("subjectId", &self.subject_id),
        ] {
            require_id(field, value)?;
        }
        Ok(())
    }
}

impl fmt::Display for MarkCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.student_id, self.term_id, self.sequence_id, self.subject_id
        )
    }
}

pub fn require_id(field: &str, value: &str) -> EngineResult<()> {
    if value.trim().is_empty() || value.trim() != value {
        return Err(EngineError::validation_with(
            format!("{} must be a non-empty identifier", field),
            json!({ "field": field, "value": value }),
        ));
    }
    Ok(())
}

/// Unit of work for one rank batch. Two batches with equal scopes never run
/// at the same time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RankScope {
    Subject {
        class_id: String,
        year_id: String,
        term_id: String,
        sequence_id: String,
        subject_id: String,
    },
    Sequence {
        class_id: String,
        year_id: String,
        term_id: String,
        sequence_id: String,
    },
    Term {
        class_id: String,
        year_id: String,
        term_id: String,
    },
}

impl RankScope {
    pub fn class_id(&self) -> &str {
        match self {
            Self::Subject { class_id, .. }
            | Self::Sequence { class_id, .. }
            | Self::Term { class_id, .. } => class_id,
        }
    }

    pub fn year_id(&self) -> &str {
        match self {
            Self::Subject { year_id, .. }
            | Self::Sequence { year_id, .. }
            | Self::Term { year_id, .. } => year_id,
        }
    }

    pub fn term_id(&self) -> &str {
        match self {
            Self::Subject { term_id, .. }
            | Self::Sequence { term_id, .. }
            | Self::Term { term_id, .. } => term_id,
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        require_id("classId", self.class_id())?;
        require_id("academicYearId", self.year_id())?;
        require_id("termId", self.term_id())?;
        match self {
            Self::Subject {
                sequence_id,
                subject_id,
                ..
            } => {
                require_id("sequenceId", sequence_id)?;
                require_id("subjectId", subject_id)?;
                if subject_id == ABSENCES_SUBJECT {
                    return Err(EngineError::validation(
                        "absences are counted, not ranked",
                    ));
                }
            }
            Self::Sequence { sequence_id, .. } => require_id("sequenceId", sequence_id)?,
            Self::Term { .. } => {}
        }
        Ok(())
    }
}

impl fmt::Display for RankScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Subject {
                class_id,
                year_id,
                term_id,
                sequence_id,
                subject_id,
            } => write!(
                f,
                "subject:{}/{}/{}/{}/{}",
                class_id, year_id, term_id, sequence_id, subject_id
            ),
            Self::Sequence {
                class_id,
                year_id,
                term_id,
                sequence_id,
            } => write!(
                f,
                "sequence:{}/{}/{}/{}",
                class_id, year_id, term_id, sequence_id
            ),
            Self::Term {
                class_id,
                year_id,
                term_id,
            } => write!(f, "term:{}/{}/{}", class_id, year_id, term_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub position: i64,
    pub previous_mark: Option<f64>,
    pub new_mark: f64,
    pub editor_id: String,
    pub timestamp: String,
    pub prev_hash: String,
    pub entry_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AbsenceEntry {
    pub position: i64,
    pub previous_count: i64,
    pub new_count: i64,
    pub editor_id: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectRecord {
    pub subject_id: String,
    pub subject_name: Option<String>,
    pub coefficient: f64,
    pub current_mark: Option<f64>,
    pub rank: Option<i64>,
    pub modified: Vec<LedgerEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceRecord {
    pub sequence_id: String,
    pub term_id: String,
    pub label: String,
    pub archived: bool,
    pub absences: i64,
    pub average: Option<f64>,
    pub rank: Option<i64>,
    pub subjects: Vec<SubjectRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermRecord {
    pub term_id: String,
    pub label: String,
    pub archived: bool,
    pub average: Option<f64>,
    pub rank: Option<i64>,
    pub discipline_rating: Option<DisciplineRating>,
    pub sequences: Vec<SequenceRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAcademicRecord {
    pub student_id: String,
    pub class_id: String,
    pub academic_year_id: String,
    pub year_label: String,
    pub is_current: bool,
    pub terms: Vec<TermRecord>,
}

/// Result of a mark edit: a subject mark yields the SubjectRecord, the
/// reserved absences subject yields the Sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MarkOutcome {
    Subject(SubjectRecord),
    Absences(SequenceRecord),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankRow {
    pub student_id: String,
    pub rank: i64,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankOutcome {
    pub updated: usize,
    pub ranks: Vec<RankRow>,
}

impl RankOutcome {
    pub fn empty() -> Self {
        Self {
            updated: 0,
            ranks: Vec::new(),
        }
    }
}

// Calendar and roster payloads handed over by the external collaborators.

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceInput {
    pub id: Option<String>,
    pub label: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TermInput {
    pub id: Option<String>,
    pub label: String,
    #[serde(default)]
    pub sequences: Vec<SequenceInput>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YearInput {
    pub id: Option<String>,
    pub label: String,
    #[serde(default)]
    pub is_current: bool,
    #[serde(default)]
    pub terms: Vec<TermInput>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectInput {
    pub subject_id: String,
    pub name: Option<String>,
    pub coefficient: f64,
    pub weekly_hours: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceSummary {
    pub id: String,
    pub label: String,
    pub archived: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TermSummary {
    pub id: String,
    pub label: String,
    pub archived: bool,
    pub sequences: Vec<SequenceSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearSummary {
    pub id: String,
    pub label: String,
    pub is_current: bool,
    pub archived: bool,
    pub terms: Vec<TermSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinate_rejects_blank_and_padded_ids() {
        assert!(MarkCoordinate::new("s1", "t1", "q1", "math").validate().is_ok());
        assert!(MarkCoordinate::new("", "t1", "q1", "math").validate().is_err());
        assert!(MarkCoordinate::new("s1", " t1", "q1", "math").validate().is_err());
    }

    #[test]
    fn subject_scope_refuses_absences() {
        let scope = RankScope::Subject {
            class_id: "c".into(),
            year_id: "y".into(),
            term_id: "t".into(),
            sequence_id: "q".into(),
            subject_id: ABSENCES_SUBJECT.into(),
        };
        assert_eq!(scope.validate().unwrap_err().code(), "validation_error");
    }
}
