use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{authed, get_optional_i64, get_optional_str, get_required_str, new_id, ADMIN, ANY_ROLE};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use tracing::info;

fn subjects_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, _) = authed(state, req, ANY_ROLE)?;
    let class_name = get_optional_str(&req.params, "className");
    // An unparseable semester filter is ignored rather than rejected.
    let semester = get_optional_i64(&req.params, "semester").unwrap_or(None);
    let mut stmt = conn.prepare(
        "SELECT id, name, class_name, semester
         FROM subjects
         WHERE (?1 IS NULL OR class_name = ?1)
           AND (?2 IS NULL OR semester = ?2)
         ORDER BY class_name, semester, name",
    )?;
    let subjects = stmt
        .query_map((&class_name, semester), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "className": r.get::<_, String>(2)?,
                "semester": r.get::<_, i64>(3)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "subjects": subjects }))
}

fn subjects_create(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, _) = authed(state, req, ADMIN)?;
    let name = get_required_str(&req.params, "name")?;
    let class_name = get_required_str(&req.params, "className")?;
    let semester = get_optional_i64(&req.params, "semester")?.unwrap_or(1);
    if !(1..=6).contains(&semester) {
        return Err(HandlerErr::bad_params("semester must be between 1 and 6"));
    }
    let subject_id = new_id();
    conn.execute(
        "INSERT INTO subjects(id, name, class_name, semester) VALUES(?, ?, ?, ?)",
        (&subject_id, &name, &class_name, semester),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", "subjects", e))?;
    info!(%subject_id, %name, %class_name, "subject added");
    Ok(json!({ "subjectId": subject_id }))
}

fn subjects_delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, _) = authed(state, req, ADMIN)?;
    let subject_id = get_required_str(&req.params, "subjectId")?;
    let exists = conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [&subject_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if !exists {
        return Err(HandlerErr::not_found("subject not found"));
    }
    let references: i64 = conn.query_row(
        "SELECT
           (SELECT COUNT(*) FROM attendance_records WHERE subject_id = ?1)
         + (SELECT COUNT(*) FROM attendance_sessions WHERE subject_id = ?1)
         + (SELECT COUNT(*) FROM timetable_slots WHERE subject_id = ?1)
         + (SELECT COUNT(*) FROM leave_applications WHERE subject_id = ?1)",
        [&subject_id],
        |r| r.get(0),
    )?;
    if references > 0 {
        return Err(HandlerErr::conflict("subject is still in use")
            .with_details(json!({ "references": references })));
    }
    conn.execute("DELETE FROM subjects WHERE id = ?", [&subject_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", "subjects", e))?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "subjects.list" => subjects_list(state, req),
        "subjects.create" => subjects_create(state, req),
        "subjects.delete" => subjects_delete(state, req),
        _ => return None,
    };
    Some(respond(&req.id, &req.method, result))
}
