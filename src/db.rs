use rusqlite::{Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DB_FILE: &str = "gradebook.sqlite3";
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub fn db_path(workspace: &Path) -> PathBuf {
    workspace.join(DB_FILE)
}

/// Open a connection to an existing workspace database. Every engine
/// operation gets its own connection.
pub fn connect(path: &Path) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    Ok(conn)
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let conn = connect(&db_path(workspace))?;
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    tracing::debug!(journal_mode = %mode, "workspace database opened");

    conn.execute(
        "CREATE TABLE IF NOT EXISTS academic_years(
            id TEXT PRIMARY KEY,
            label TEXT NOT NULL,
            is_current INTEGER NOT NULL DEFAULT 0,
            archived INTEGER NOT NULL DEFAULT 0,
            created_at TEXT
        )",
        [],
    )?;
    // At most one row may carry the current flag.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_academic_years_current
         ON academic_years(is_current) WHERE is_current = 1",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS terms(
            id TEXT PRIMARY KEY,
            year_id TEXT NOT NULL,
            label TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            archived INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(year_id) REFERENCES academic_years(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_terms_year ON terms(year_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sequences(
            id TEXT PRIMARY KEY,
            term_id TEXT NOT NULL,
            label TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            archived INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(term_id) REFERENCES terms(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sequences_term ON sequences(term_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_subjects(
            class_id TEXT NOT NULL,
            year_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            name TEXT,
            coefficient REAL NOT NULL CHECK(coefficient > 0),
            sort_order INTEGER NOT NULL,
            PRIMARY KEY(class_id, year_id, subject_id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(year_id) REFERENCES academic_years(id)
        )",
        [],
    )?;
    ensure_class_subjects_weekly_hours(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_records(
            student_id TEXT NOT NULL,
            year_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY(student_id, year_id),
            FOREIGN KEY(year_id) REFERENCES academic_years(id),
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_records_class ON student_records(class_id, year_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS term_results(
            student_id TEXT NOT NULL,
            term_id TEXT NOT NULL,
            average REAL,
            rank INTEGER,
            PRIMARY KEY(student_id, term_id),
            FOREIGN KEY(term_id) REFERENCES terms(id)
        )",
        [],
    )?;
    ensure_term_results_discipline(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sequence_results(
            student_id TEXT NOT NULL,
            term_id TEXT NOT NULL,
            sequence_id TEXT NOT NULL,
            absences INTEGER NOT NULL DEFAULT 0 CHECK(absences >= 0),
            average REAL,
            rank INTEGER,
            PRIMARY KEY(student_id, sequence_id),
            FOREIGN KEY(term_id) REFERENCES terms(id),
            FOREIGN KEY(sequence_id) REFERENCES sequences(id)
        )",
        [],
    )?;

    // Flat table of every SubjectRecord; the primary key prefix serves
    // "all subjects of one student's sequence".
    conn.execute(
        "CREATE TABLE IF NOT EXISTS subject_records(
            student_id TEXT NOT NULL,
            term_id TEXT NOT NULL,
            sequence_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            coefficient REAL NOT NULL CHECK(coefficient > 0),
            current_mark REAL CHECK(current_mark IS NULL OR (current_mark >= 0 AND current_mark <= 20)),
            rank INTEGER,
            PRIMARY KEY(student_id, term_id, sequence_id, subject_id),
            FOREIGN KEY(term_id) REFERENCES terms(id),
            FOREIGN KEY(sequence_id) REFERENCES sequences(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subject_records_cell
         ON subject_records(term_id, sequence_id, subject_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS mark_ledger(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            term_id TEXT NOT NULL,
            sequence_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            previous_mark REAL,
            new_mark REAL NOT NULL,
            editor_id TEXT NOT NULL,
            recorded_at TEXT NOT NULL,
            prev_hash TEXT NOT NULL,
            entry_hash TEXT NOT NULL,
            UNIQUE(student_id, term_id, sequence_id, subject_id, position),
            FOREIGN KEY(student_id, term_id, sequence_id, subject_id)
                REFERENCES subject_records(student_id, term_id, sequence_id, subject_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS absence_ledger(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            sequence_id TEXT NOT NULL,
            position INTEGER NOT NULL,
            previous_count INTEGER NOT NULL,
            new_count INTEGER NOT NULL,
            editor_id TEXT NOT NULL,
            recorded_at TEXT NOT NULL,
            UNIQUE(student_id, sequence_id, position),
            FOREIGN KEY(student_id, sequence_id)
                REFERENCES sequence_results(student_id, sequence_id)
        )",
        [],
    )?;

    for table in ["mark_ledger", "absence_ledger"] {
        for op in ["UPDATE", "DELETE"] {
            conn.execute(
                &format!(
                    "CREATE TRIGGER IF NOT EXISTS {table}_no_{lower}
                     BEFORE {op} ON {table}
                     BEGIN
                         SELECT RAISE(ABORT, '{table} is append-only');
                     END",
                    lower = op.to_ascii_lowercase(),
                ),
                [],
            )?;
        }
    }

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

fn ensure_class_subjects_weekly_hours(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "class_subjects", "weekly_hours")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE class_subjects ADD COLUMN weekly_hours REAL", [])?;
    Ok(())
}

fn ensure_term_results_discipline(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "term_results", "discipline")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE term_results ADD COLUMN discipline TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(
    conn: &Connection,
    key: &str,
) -> rusqlite::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    // A blob that no longer parses is treated as unset.
    Ok(raw.and_then(|s| serde_json::from_str(&s).ok()))
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, value.to_string()),
    )?;
    Ok(())
}
