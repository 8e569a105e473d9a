use crate::auth::Role;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{
    authed, get_optional_i64, get_required_str, new_id, now_time_key, now_timestamp, ANY_ROLE,
    FACULTY,
};
use crate::ipc::types::{AppState, Request};
use crate::session::{remaining_minutes, RecordMethod, RecordStatus, SessionStatus, TransitionError};
use chrono::{Local, NaiveDateTime};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use tracing::info;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

struct SessionRow {
    id: String,
    faculty_id: String,
    subject_id: String,
    class_name: String,
    start_time: String,
    duration_minutes: i64,
    status: SessionStatus,
}

impl SessionRow {
    /// Calendar day the session belongs to.
    fn date_key(&self) -> &str {
        self.start_time.get(..10).unwrap_or(self.start_time.as_str())
    }

    fn remaining_minutes(&self) -> i64 {
        let Ok(started) = NaiveDateTime::parse_from_str(&self.start_time, TIMESTAMP_FORMAT) else {
            return 0;
        };
        let elapsed = (Local::now().naive_local() - started).num_seconds();
        remaining_minutes(self.duration_minutes, elapsed)
    }
}

fn load_session(conn: &Connection, session_id: &str) -> Result<SessionRow, HandlerErr> {
    let row = conn
        .query_row(
            "SELECT id, faculty_id, subject_id, class_name, start_time, duration_minutes, status
             FROM attendance_sessions WHERE id = ?",
            [session_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, i64>(5)?,
                    r.get::<_, String>(6)?,
                ))
            },
        )
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("session not found"))?;
    let status = SessionStatus::parse(&row.6).ok_or_else(|| {
        HandlerErr::new("db_query_failed", format!("unknown session status {}", row.6))
    })?;
    Ok(SessionRow {
        id: row.0,
        faculty_id: row.1,
        subject_id: row.2,
        class_name: row.3,
        start_time: row.4,
        duration_minutes: row.5,
        status,
    })
}

/// Newest session of `faculty_id` in `status`, optionally limited to one subject.
fn newest_with_status(
    conn: &Connection,
    faculty_id: &str,
    subject_id: Option<&str>,
    status: SessionStatus,
) -> Result<Option<SessionRow>, HandlerErr> {
    let id: Option<String> = conn
        .query_row(
            "SELECT id FROM attendance_sessions
             WHERE faculty_id = ?1
               AND status = ?2
               AND (?3 IS NULL OR subject_id = ?3)
             ORDER BY start_time DESC, rowid DESC
             LIMIT 1",
            (faculty_id, status.as_str(), subject_id),
            |r| r.get(0),
        )
        .optional()?;
    match id {
        Some(id) => load_session(conn, &id).map(Some),
        None => Ok(None),
    }
}

/// Session that recognised faces are attributed to: the newest `Active` one
/// for the subject, else the newest `Reopened` one.
pub fn open_session_for(
    conn: &Connection,
    faculty_id: &str,
    subject_id: &str,
) -> Result<Option<(String, SessionStatus)>, HandlerErr> {
    for status in [SessionStatus::Active, SessionStatus::Reopened] {
        if let Some(s) = newest_with_status(conn, faculty_id, Some(subject_id), status)? {
            return Ok(Some((s.id, s.status)));
        }
    }
    Ok(None)
}

fn own_session(conn: &Connection, req: &Request, faculty_id: &str) -> Result<SessionRow, HandlerErr> {
    let session_id = get_required_str(&req.params, "sessionId")?;
    let session = load_session(conn, &session_id)?;
    if session.faculty_id != faculty_id {
        return Err(HandlerErr::forbidden());
    }
    Ok(session)
}

fn transition_err(e: TransitionError) -> HandlerErr {
    HandlerErr::invalid_state(e.to_string())
}

fn sessions_status(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, who) = authed(state, req, ANY_ROLE)?;
    if who.role != Role::Faculty {
        return Ok(json!({ "active": false }));
    }
    if let Some(s) = newest_with_status(conn, &who.user_id, None, SessionStatus::Active)? {
        return Ok(json!({
            "active": true,
            "sessionId": s.id,
            "status": s.status.as_str(),
            "subjectId": s.subject_id,
            "className": s.class_name,
            "startTime": s.start_time,
            "durationMinutes": s.duration_minutes,
            "remainingMinutes": s.remaining_minutes(),
        }));
    }
    if let Some(s) = newest_with_status(conn, &who.user_id, None, SessionStatus::Reopened)? {
        return Ok(json!({
            "active": true,
            "sessionId": s.id,
            "status": s.status.as_str(),
            "subjectId": s.subject_id,
            "className": s.class_name,
            "startTime": s.start_time,
            "durationMinutes": s.duration_minutes,
            "remainingMinutes": 0,
        }));
    }
    Ok(json!({ "active": false }))
}

fn sessions_start(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, who) = authed(state, req, FACULTY)?;
    let p = &req.params;
    let class_name = get_required_str(p, "className")?;
    let subject_id = get_required_str(p, "subjectId")?;
    let duration = match get_optional_i64(p, "durationMinutes")? {
        Some(d) => d,
        None => setup::tunables(conn)?.default_duration_minutes,
    };
    if !(1..=240).contains(&duration) {
        return Err(HandlerErr::bad_params("durationMinutes must be between 1 and 240"));
    }

    let subject_ok = conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [&subject_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if !subject_ok {
        return Err(HandlerErr::not_found("subject not found"));
    }
    if let Some(active) = newest_with_status(conn, &who.user_id, None, SessionStatus::Active)? {
        return Err(
            HandlerErr::conflict("an attendance session is already active")
                .with_details(json!({ "sessionId": active.id })),
        );
    }

    let session_id = new_id();
    let start_time = now_timestamp();
    conn.execute(
        "INSERT INTO attendance_sessions(
           id, faculty_id, subject_id, class_name, start_time, end_time, duration_minutes, status
         ) VALUES(?, ?, ?, ?, ?, NULL, ?, ?)",
        (
            &session_id,
            &who.user_id,
            &subject_id,
            &class_name,
            &start_time,
            duration,
            SessionStatus::Active.as_str(),
        ),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", "attendance_sessions", e))?;
    info!(%session_id, faculty = %who.user_id, %class_name, duration, "session started");
    Ok(json!({
        "sessionId": session_id,
        "status": SessionStatus::Active.as_str(),
        "startTime": start_time,
        "durationMinutes": duration,
    }))
}

fn sessions_end(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, who) = authed(state, req, FACULTY)?;
    let session = own_session(conn, req, &who.user_id)?;
    let next = session.status.end().map_err(transition_err)?;

    let date = session.date_key().to_string();
    let time = now_time_key();
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE attendance_sessions SET status = ?, end_time = ? WHERE id = ?",
        (next.as_str(), now_timestamp(), &session.id),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", "attendance_sessions", e))?;

    let unmarked: Vec<String> = {
        let mut stmt = tx.prepare(
            "SELECT s.id FROM students s
             WHERE s.class_name = ?1
               AND NOT EXISTS (
                 SELECT 1 FROM attendance_records r
                 WHERE r.student_id = s.id AND r.subject_id = ?2 AND r.date = ?3
               )
             ORDER BY s.enrollment_number",
        )?;
        let rows = stmt
            .query_map((&session.class_name, &session.subject_id, &date), |r| r.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };
    for student_id in &unmarked {
        tx.execute(
            "INSERT INTO attendance_records(
               id, date, time, status, method, student_id, faculty_id, subject_id, session_id
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                new_id(),
                &date,
                &time,
                RecordStatus::Absent.as_str(),
                RecordMethod::Auto.as_str(),
                student_id,
                &who.user_id,
                &session.subject_id,
                &session.id,
            ),
        )
        .map_err(|e| HandlerErr::db("db_insert_failed", "attendance_records", e))?;
    }
    tx.commit()?;

    info!(session_id = %session.id, absent = unmarked.len(), "session ended");
    Ok(json!({
        "sessionId": session.id,
        "status": next.as_str(),
        "absentCount": unmarked.len(),
    }))
}

fn sessions_reopen(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, who) = authed(state, req, FACULTY)?;
    let session = own_session(conn, req, &who.user_id)?;
    let next = session.status.reopen().map_err(transition_err)?;
    conn.execute(
        "UPDATE attendance_sessions SET status = ? WHERE id = ?",
        (next.as_str(), &session.id),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", "attendance_sessions", e))?;
    info!(session_id = %session.id, "session reopened");
    Ok(json!({ "sessionId": session.id, "status": next.as_str() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "sessions.status" => sessions_status(state, req),
        "sessions.start" => sessions_start(state, req),
        "sessions.end" => sessions_end(state, req),
        "sessions.reopen" => sessions_reopen(state, req),
        _ => return None,
    };
    Some(respond(&req.id, &req.method, result))
}
