use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Duration;

use crate::error::ServiceResult;

pub const DB_FILE_NAME: &str = "school.sqlite3";

pub fn open_db(workspace: &Path, busy_timeout: Duration) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(busy_timeout)?;
    create_schema(&conn)?;
    Ok(conn)
}

#[cfg(test)]
pub fn open_in_memory() -> Connection {
    let conn = Connection::open_in_memory().expect("open in-memory db");
    create_schema(&conn).expect("create schema");
    conn
}

pub fn create_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schools(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE COLLATE NOCASE,
            password_hash TEXT NOT NULL,
            role TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS principals(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id),
            FOREIGN KEY(user_id) REFERENCES users(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id),
            UNIQUE(school_id, name)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            user_id TEXT NOT NULL,
            name TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id),
            FOREIGN KEY(user_id) REFERENCES users(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    ensure_teachers_status(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_teachers_school ON teachers(school_id, status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            name TEXT NOT NULL,
            roll TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_school ON students(school_id, status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classrooms(
            id TEXT PRIMARY KEY,
            school_id TEXT NOT NULL,
            name TEXT NOT NULL,
            mentor_id TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            created_at TEXT NOT NULL,
            FOREIGN KEY(school_id) REFERENCES schools(id),
            FOREIGN KEY(mentor_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    // Name uniqueness only binds active classrooms; deleted ones keep their old names.
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS ux_classrooms_active_name
         ON classrooms(school_id, name) WHERE status = 'active'",
        [],
    )?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS ux_classrooms_mentor
         ON classrooms(mentor_id) WHERE mentor_id IS NOT NULL",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classroom_students(
            id TEXT PRIMARY KEY,
            classroom_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(classroom_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classroom_students_student ON classroom_students(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classroom_subjects(
            id TEXT PRIMARY KEY,
            classroom_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classroom_subjects_classroom ON classroom_subjects(classroom_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS timetables(
            id TEXT PRIMARY KEY,
            classroom_id TEXT NOT NULL,
            day TEXT NOT NULL,
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id),
            UNIQUE(classroom_id, day)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS periods(
            id TEXT PRIMARY KEY,
            timetable_id TEXT NOT NULL,
            classroom_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            position INTEGER NOT NULL,
            FOREIGN KEY(timetable_id) REFERENCES timetables(id),
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;
    ensure_periods_position(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_periods_timetable ON periods(timetable_id, position)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_periods_teacher ON periods(teacher_id)",
        [],
    )?;

    // period_id carries no foreign key: replacing a day's periods must not be blocked by
    // attendance already taken against the old ones.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            id TEXT PRIMARY KEY,
            classroom_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            period_id TEXT NOT NULL,
            date TEXT NOT NULL,
            taken_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(classroom_id) REFERENCES classrooms(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(taken_by) REFERENCES teachers(id),
            UNIQUE(classroom_id, subject_id, date, period_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_records_period ON attendance_records(period_id, date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_records_taken_by ON attendance_records(taken_by)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_attendance(
            id TEXT PRIMARY KEY,
            attendance_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            status TEXT NOT NULL,
            FOREIGN KEY(attendance_id) REFERENCES attendance_records(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(attendance_id, student_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_attendance_student ON student_attendance(student_id)",
        [],
    )?;

    Ok(())
}

// Workspaces created before teacher removal existed have no status column.
fn ensure_teachers_status(conn: &Connection) -> rusqlite::Result<()> {
    if table_has_column(conn, "teachers", "status")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE teachers ADD COLUMN status TEXT NOT NULL DEFAULT 'active'",
        [],
    )?;
    Ok(())
}

fn ensure_periods_position(conn: &Connection) -> rusqlite::Result<()> {
    if table_has_column(conn, "periods", "position")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE periods ADD COLUMN position INTEGER NOT NULL DEFAULT 0",
        [],
    )?;

    // Backfill per day in start-time order.
    let mut day_stmt = conn.prepare("SELECT id FROM timetables ORDER BY rowid")?;
    let timetable_ids = day_stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut period_stmt =
        conn.prepare("SELECT id FROM periods WHERE timetable_id = ? ORDER BY start_time, rowid")?;
    for tid in timetable_ids {
        let period_ids = period_stmt
            .query_map([&tid], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        for (i, pid) in period_ids.iter().enumerate() {
            conn.execute(
                "UPDATE periods SET position = ? WHERE id = ?",
                (i as i64, pid),
            )?;
        }
    }
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    let sql = format!("PRAGMA table_info({table})");
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

/// Runs `work` inside one IMMEDIATE transaction: commit on `Ok`, roll back on `Err` and
/// hand the original error back. Not reentrant; SQLite rejects a nested BEGIN.
pub fn in_transaction<T, F>(conn: &Connection, work: F) -> ServiceResult<T>
where
    F: FnOnce(&Transaction<'_>) -> ServiceResult<T>,
{
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    match work(&tx) {
        Ok(value) => {
            tx.commit()?;
            Ok(value)
        }
        Err(error) => {
            if let Err(rollback) = tx.rollback() {
                tracing::warn!(%rollback, "rollback failed");
            }
            tracing::debug!(%error, code = error.code(), "transaction aborted");
            Err(error)
        }
    }
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn now_stamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;

    fn school_count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM schools", [], |r| r.get(0))
            .expect("count schools")
    }

    #[test]
    fn commits_on_success() {
        let conn = open_in_memory();
        let id = in_transaction(&conn, |tx| {
            let id = new_id();
            tx.execute(
                "INSERT INTO schools(id, name, created_at) VALUES(?, ?, ?)",
                (&id, "North", now_stamp()),
            )?;
            Ok(id)
        })
        .expect("transaction");
        assert_eq!(school_count(&conn), 1);
        assert!(!id.is_empty());
    }

    #[test]
    fn rolls_back_and_returns_original_error() {
        let conn = open_in_memory();
        let res: ServiceResult<()> = in_transaction(&conn, |tx| {
            tx.execute(
                "INSERT INTO schools(id, name, created_at) VALUES(?, ?, ?)",
                (new_id(), "North", now_stamp()),
            )?;
            Err(ServiceError::conflict("boom"))
        });
        match res {
            Err(ServiceError::Conflict(m)) => assert_eq!(m, "boom"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(school_count(&conn), 0);
    }

    #[test]
    fn nested_transactions_are_rejected() {
        let conn = open_in_memory();
        let res: ServiceResult<()> = in_transaction(&conn, |tx| in_transaction(tx, |_| Ok(())));
        assert!(matches!(res, Err(ServiceError::Storage(_))));
    }

    #[test]
    fn writers_on_one_workspace_are_serialized() {
        let workspace = std::env::temp_dir().join(format!("schoold-db-{}", new_id()));
        let first = open_db(&workspace, Duration::from_millis(50)).expect("first connection");
        let second = open_db(&workspace, Duration::from_millis(50)).expect("second connection");

        in_transaction(&first, |tx| {
            tx.execute(
                "INSERT INTO schools(id, name, created_at) VALUES(?, ?, ?)",
                (new_id(), "North", now_stamp()),
            )?;
            // The write lock is held from BEGIN, so the second writer cannot even start.
            let blocked: ServiceResult<()> = in_transaction(&second, |_| Ok(()));
            assert!(matches!(blocked, Err(ServiceError::Storage(_))), "{blocked:?}");
            Ok(())
        })
        .expect("first writer");

        in_transaction(&second, |tx| {
            tx.execute(
                "INSERT INTO schools(id, name, created_at) VALUES(?, ?, ?)",
                (new_id(), "South", now_stamp()),
            )?;
            Ok(())
        })
        .expect("second writer");
        assert_eq!(school_count(&first), 2);
        let _ = std::fs::remove_dir_all(&workspace);
    }

    #[test]
    fn backfills_period_positions_on_old_workspaces() {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute_batch(
            "CREATE TABLE periods(
                id TEXT PRIMARY KEY,
                timetable_id TEXT NOT NULL,
                classroom_id TEXT NOT NULL,
                subject_id TEXT NOT NULL,
                teacher_id TEXT NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT NOT NULL
            );
            CREATE TABLE timetables(id TEXT PRIMARY KEY, classroom_id TEXT NOT NULL, day TEXT NOT NULL);
            INSERT INTO timetables VALUES('t1', 'c1', 'Monday');
            INSERT INTO periods VALUES('late', 't1', 'c1', 's', 'x', '10:00', '10:45');
            INSERT INTO periods VALUES('early', 't1', 'c1', 's', 'x', '08:00', '08:45');",
        )
        .expect("old schema");

        create_schema(&conn).expect("migrate");
        let position = |id: &str| -> i64 {
            conn.query_row("SELECT position FROM periods WHERE id = ?", [id], |r| r.get(0))
                .expect("position")
        };
        assert_eq!(position("early"), 0);
        assert_eq!(position("late"), 1);
    }

    #[test]
    fn schema_creation_is_idempotent() {
        let conn = open_in_memory();
        create_schema(&conn).expect("second pass");
    }
}
