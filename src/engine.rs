use crate::absence;
use crate::calendar::{self, ArchiveTarget};
use crate::db;
use crate::error::EngineResult;
use crate::ledger::{self, LedgerVerification};
use crate::model::{
    AbsenceEntry, LedgerEntry, MarkCoordinate, MarkOutcome, RankOutcome, RankScope,
    SequenceRecord, StudentAcademicRecord, SubjectInput, YearInput, YearSummary,
};
use crate::rank::{self, RankLocks};
use crate::report::{self, ClassSummaryRow, StudentAverages};
use crate::roster::{self, CurriculumOutcome, EnrollOutcome};
use crate::settings::{self, SetupSection};
use crate::store;
use rusqlite::Connection;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Entry point for every operation on one workspace.
///
/// The engine keeps no record state in memory: each call opens its own
/// connection, so an `Engine` can be shared across threads and independent
/// coordinates never wait on each other in Rust code. Only rank batches
/// coordinate in-process, through [`RankLocks`].
#[derive(Debug)]
pub struct Engine {
    db_path: PathBuf,
    rank_locks: RankLocks,
}

impl Engine {
    pub fn open(workspace: &Path) -> anyhow::Result<Self> {
        // Creates or migrates the schema; the connection is not kept.
        db::open_db(workspace)?;
        tracing::info!(workspace = %workspace.display(), "workspace opened");
        Ok(Self {
            db_path: db::db_path(workspace),
            rank_locks: RankLocks::new(),
        })
    }

    pub fn rank_locks(&self) -> &RankLocks {
        &self.rank_locks
    }

    fn connect(&self) -> EngineResult<Connection> {
        Ok(db::connect(&self.db_path)?)
    }

    // Mark Ledger / Absence Tracker

    pub fn record_mark(
        &self,
        coord: &MarkCoordinate,
        value: f64,
        editor_id: &str,
    ) -> EngineResult<MarkOutcome> {
        let mut conn = self.connect()?;
        if coord.is_absences() {
            let count = absence::count_from_mark_value(value)?;
            let seq = absence::set_absences(
                &mut conn,
                &coord.student_id,
                &coord.term_id,
                &coord.sequence_id,
                count,
                editor_id,
            )?;
            return Ok(MarkOutcome::Absences(seq));
        }
        let record = ledger::append_mark(&mut conn, coord, value, editor_id)?;
        Ok(MarkOutcome::Subject(record))
    }

    pub fn record_absence(
        &self,
        student_id: &str,
        term_id: &str,
        sequence_id: &str,
        count: i64,
        editor_id: &str,
    ) -> EngineResult<SequenceRecord> {
        let mut conn = self.connect()?;
        absence::set_absences(&mut conn, student_id, term_id, sequence_id, count, editor_id)
    }

    pub fn ledger_history(&self, coord: &MarkCoordinate) -> EngineResult<Vec<LedgerEntry>> {
        coord.validate()?;
        let conn = self.connect()?;
        Ok(store::load_subject_record(&conn, coord)?.modified)
    }

    pub fn verify_ledger(&self, coord: &MarkCoordinate) -> EngineResult<LedgerVerification> {
        let conn = self.connect()?;
        ledger::verify(&conn, coord)
    }

    pub fn absence_history(
        &self,
        student_id: &str,
        sequence_id: &str,
    ) -> EngineResult<Vec<AbsenceEntry>> {
        let conn = self.connect()?;
        absence::history(&conn, student_id, sequence_id)
    }

    // Record Store reads

    pub fn student_record(
        &self,
        student_id: &str,
        year_id: &str,
    ) -> EngineResult<StudentAcademicRecord> {
        let conn = self.connect()?;
        store::student_record(&conn, student_id, year_id)
    }

    pub fn student_averages(&self, student_id: &str, year_id: &str) -> EngineResult<StudentAverages> {
        let conn = self.connect()?;
        let averaging = settings::averaging(&conn)?;
        report::student_averages(&conn, student_id, year_id, &averaging)
    }

    pub fn class_summary(
        &self,
        class_id: &str,
        year_id: &str,
        term_id: &str,
    ) -> EngineResult<Vec<ClassSummaryRow>> {
        let conn = self.connect()?;
        let averaging = settings::averaging(&conn)?;
        report::class_summary(&conn, class_id, year_id, term_id, &averaging)
    }

    // Rank Engine

    /// Runs one rank batch under the scope's lock.
    pub fn run_rank_batch(&self, scope: &RankScope) -> EngineResult<RankOutcome> {
        scope.validate()?;
        let _guard = self.rank_locks.try_acquire(scope)?;
        let mut conn = self.connect()?;
        match scope {
            RankScope::Subject { .. } => rank::rank_subject(&mut conn, scope),
            RankScope::Sequence { .. } => rank::rank_sequence(&mut conn, scope),
            RankScope::Term { .. } => {
                let averaging = settings::averaging(&conn)?;
                let thresholds = settings::discipline_thresholds(&conn)?;
                rank::rank_term(&mut conn, scope, averaging.term_policy, &thresholds)
            }
        }
    }

    pub fn calculate_rank(
        &self,
        class_id: &str,
        year_id: &str,
        term_id: &str,
        sequence_id: &str,
        subject_id: &str,
    ) -> EngineResult<RankOutcome> {
        self.run_rank_batch(&RankScope::Subject {
            class_id: class_id.to_string(),
            year_id: year_id.to_string(),
            term_id: term_id.to_string(),
            sequence_id: sequence_id.to_string(),
            subject_id: subject_id.to_string(),
        })
    }

    pub fn calculate_sequence_rank(
        &self,
        class_id: &str,
        year_id: &str,
        term_id: &str,
        sequence_id: &str,
    ) -> EngineResult<RankOutcome> {
        self.run_rank_batch(&RankScope::Sequence {
            class_id: class_id.to_string(),
            year_id: year_id.to_string(),
            term_id: term_id.to_string(),
            sequence_id: sequence_id.to_string(),
        })
    }

    pub fn calculate_term_rank(
        &self,
        class_id: &str,
        year_id: &str,
        term_id: &str,
    ) -> EngineResult<RankOutcome> {
        self.run_rank_batch(&RankScope::Term {
            class_id: class_id.to_string(),
            year_id: year_id.to_string(),
            term_id: term_id.to_string(),
        })
    }

    // Calendar and roster collaborators

    pub fn upsert_year(&self, input: &YearInput) -> EngineResult<YearSummary> {
        let mut conn = self.connect()?;
        calendar::upsert_year(&mut conn, input)
    }

    pub fn set_current_year(&self, year_id: &str) -> EngineResult<YearSummary> {
        let mut conn = self.connect()?;
        calendar::set_current_year(&mut conn, year_id)
    }

    pub fn list_years(&self) -> EngineResult<Vec<YearSummary>> {
        let conn = self.connect()?;
        calendar::list_years(&conn)
    }

    pub fn archive(&self, target: ArchiveTarget<'_>) -> EngineResult<()> {
        let conn = self.connect()?;
        calendar::archive(&conn, target)
    }

    pub fn upsert_class(&self, id: Option<&str>, name: &str) -> EngineResult<String> {
        let conn = self.connect()?;
        roster::upsert_class(&conn, id, name)
    }

    pub fn set_curriculum(
        &self,
        class_id: &str,
        year_id: &str,
        subjects: &[SubjectInput],
    ) -> EngineResult<CurriculumOutcome> {
        let mut conn = self.connect()?;
        roster::set_curriculum(&mut conn, class_id, year_id, subjects)
    }

    pub fn enroll(
        &self,
        student_id: &str,
        class_id: &str,
        year_id: &str,
    ) -> EngineResult<EnrollOutcome> {
        let mut conn = self.connect()?;
        roster::enroll(&mut conn, student_id, class_id, year_id)
    }

    // Settings

    pub fn settings(&self) -> EngineResult<Value> {
        let conn = self.connect()?;
        Ok(settings::load_all(&conn)?)
    }

    pub fn update_settings(
        &self,
        section: SetupSection,
        patch: &Map<String, Value>,
    ) -> EngineResult<Value> {
        let conn = self.connect()?;
        settings::update_section(&conn, section, patch)
    }
}
