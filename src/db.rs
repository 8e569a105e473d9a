use crate::auth;
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

pub const DB_FILE_NAME: &str = "attendance.sqlite3";

const DEFAULT_ADMIN_EMAIL: &str = "admin@college.edu";
const DEFAULT_FACULTY_EMAIL: &str = "faculty@college.edu";
const DEFAULT_SUBJECTS: [(&str, &str, i64); 3] = [
    ("Mathematics-I", "FY", 1),
    ("Physics-I", "FY", 1),
    ("Computer Science-I", "FY", 2),
];

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    debug!(path = %db_path.display(), "opening workspace database");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS admins(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            contact_no INTEGER NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS faculty(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            contact_no INTEGER NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            enrollment_number TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            class_name TEXT NOT NULL,
            semester INTEGER NOT NULL DEFAULT 1,
            face_encoding TEXT NOT NULL,
            photo_url TEXT NOT NULL DEFAULT '',
            dob TEXT,
            admission_date TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            class_name TEXT NOT NULL,
            semester INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_subjects_class ON subjects(class_name, semester)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS timetable_slots(
            id TEXT PRIMARY KEY,
            class_name TEXT NOT NULL,
            semester INTEGER NOT NULL DEFAULT 1,
            subject_id TEXT NOT NULL,
            faculty_id TEXT NOT NULL,
            day_of_week INTEGER NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            room_number TEXT NOT NULL DEFAULT '',
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(faculty_id) REFERENCES faculty(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_timetable_day ON timetable_slots(day_of_week, start_time)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_timetable_faculty ON timetable_slots(faculty_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_sessions(
            id TEXT PRIMARY KEY,
            faculty_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            class_name TEXT NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT,
            duration_minutes INTEGER NOT NULL DEFAULT 10,
            status TEXT NOT NULL DEFAULT 'Active',
            FOREIGN KEY(faculty_id) REFERENCES faculty(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sessions_faculty_status
         ON attendance_sessions(faculty_id, status, start_time)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            id TEXT PRIMARY KEY,
            date TEXT NOT NULL,
            time TEXT NOT NULL,
            status TEXT NOT NULL,
            method TEXT NOT NULL DEFAULT 'FaceID',
            student_id TEXT NOT NULL,
            faculty_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(faculty_id) REFERENCES faculty(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id)
        )",
        [],
    )?;
    // Workspaces created before sessions existed have no session_id column.
    ensure_records_session_id(&conn)?;
    // The per-day uniqueness index cannot be created while duplicates exist.
    dedupe_attendance_records(&conn)?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS uq_attendance_per_day
         ON attendance_records(student_id, subject_id, date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_records_date ON attendance_records(date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_records_faculty ON attendance_records(faculty_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS leave_applications(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            leave_date TEXT NOT NULL,
            reason TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'Pending',
            applied_on TEXT NOT NULL,
            approved_by TEXT,
            approval_date TEXT,
            remarks TEXT NOT NULL DEFAULT '',
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            UNIQUE(student_id, subject_id, leave_date)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_leave_applications_status ON leave_applications(status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

fn ensure_records_session_id(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "attendance_records", "session_id")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE attendance_records ADD COLUMN session_id TEXT REFERENCES attendance_sessions(id)",
        [],
    )?;
    Ok(())
}

fn dedupe_attendance_records(conn: &Connection) -> anyhow::Result<()> {
    // Keep the earliest row (by insertion order) of every (student, subject, date) group.
    let removed = conn.execute(
        "DELETE FROM attendance_records
         WHERE rowid NOT IN (
           SELECT MIN(rowid)
           FROM attendance_records
           GROUP BY student_id, subject_id, date
         )",
        [],
    )?;
    if removed > 0 {
        info!(removed, "removed duplicate attendance records");
    }
    Ok(())
}

/// Creates the default admin, faculty member, and starter subjects when they
/// are missing. Returns a label for every row that was inserted.
pub fn seed_defaults(conn: &Connection) -> anyhow::Result<Vec<String>> {
    let mut created = Vec::new();
    let tx = conn.unchecked_transaction()?;

    let admin_exists = tx
        .query_row(
            "SELECT 1 FROM admins WHERE email = ?",
            [DEFAULT_ADMIN_EMAIL],
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some();
    if !admin_exists {
        tx.execute(
            "INSERT INTO admins(id, name, email, password_hash, contact_no) VALUES(?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                "System Admin",
                DEFAULT_ADMIN_EMAIL,
                auth::hash_password("admin123"),
                1234567890_i64,
            ),
        )?;
        created.push("admin".to_string());
    }

    let faculty_exists = tx
        .query_row(
            "SELECT 1 FROM faculty WHERE email = ?",
            [DEFAULT_FACULTY_EMAIL],
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some();
    if !faculty_exists {
        tx.execute(
            "INSERT INTO faculty(id, name, email, password_hash, contact_no) VALUES(?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                "Dr. Smith",
                DEFAULT_FACULTY_EMAIL,
                auth::hash_password("faculty123"),
                9876543210_i64,
            ),
        )?;
        created.push("faculty".to_string());
    }

    for (name, class_name, semester) in DEFAULT_SUBJECTS {
        let exists = tx
            .query_row(
                "SELECT 1 FROM subjects WHERE name = ? AND class_name = ? AND semester = ?",
                (name, class_name, semester),
                |r| r.get::<_, i64>(0),
            )
            .optional()?
            .is_some();
        if !exists {
            tx.execute(
                "INSERT INTO subjects(id, name, class_name, semester) VALUES(?, ?, ?, ?)",
                (Uuid::new_v4().to_string(), name, class_name, semester),
            )?;
            created.push(format!("subject:{}", name));
        }
    }

    tx.commit()?;
    if !created.is_empty() {
        info!(?created, "seeded default accounts");
    }
    Ok(created)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, value.to_string()),
    )?;
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

#[cfg(test)]
mod tests {
    use super::*;
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

    #[test]
    fn seed_defaults_is_idempotent() {
        let conn = open_db(&temp_dir("attendd-seed")).expect("open db");
        let first = seed_defaults(&conn).expect("seed");
        assert_eq!(
            first,
            vec![
                "admin",
                "faculty",
                "subject:Mathematics-I",
                "subject:Physics-I",
                "subject:Computer Science-I"
            ]
        );
        let second = seed_defaults(&conn).expect("seed again");
        assert!(second.is_empty());
    }

    #[test]
    fn legacy_records_table_is_migrated_and_deduped() {
        let workspace = temp_dir("attendd-migrate");
        {
            let conn = Connection::open(workspace.join(DB_FILE_NAME)).expect("open raw");
            conn.execute_batch(
                "CREATE TABLE attendance_records(
                    id TEXT PRIMARY KEY,
                    date TEXT NOT NULL,
                    time TEXT NOT NULL,
                    status TEXT NOT NULL,
                    method TEXT NOT NULL DEFAULT 'FaceID',
                    student_id TEXT NOT NULL,
                    faculty_id TEXT NOT NULL,
                    subject_id TEXT NOT NULL
                );
                INSERT INTO attendance_records VALUES('r1','2025-01-06','09:00:00','Present','FaceID','s1','f1','m1');
                INSERT INTO attendance_records VALUES('r2','2025-01-06','09:05:00','Late','FaceID','s1','f1','m1');
                INSERT INTO attendance_records VALUES('r3','2025-01-07','09:00:00','Present','Manual','s1','f1','m1');",
            )
            .expect("legacy schema");
        }

        let conn = open_db(&workspace).expect("open migrated");
        assert!(table_has_column(&conn, "attendance_records", "session_id").expect("pragma"));
        let ids: Vec<String> = conn
            .prepare("SELECT id FROM attendance_records ORDER BY id")
            .expect("prepare")
            .query_map([], |r| r.get(0))
            .expect("query")
            .collect::<Result<_, _>>()
            .expect("rows");
        assert_eq!(ids, vec!["r1", "r3"]);
    }

    #[test]
    fn settings_roundtrip_through_json() {
        let conn = open_db(&temp_dir("attendd-settings")).expect("open db");
        assert_eq!(settings_get_json(&conn, "setup.reports").expect("get"), None);
        let v = serde_json::json!({ "defaulterThresholdPercent": 60 });
        settings_set_json(&conn, "setup.reports", &v).expect("set");
        assert_eq!(settings_get_json(&conn, "setup.reports").expect("get"), Some(v));
    }
}
