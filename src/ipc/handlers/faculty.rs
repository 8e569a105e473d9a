use crate::auth::{self, Role};
use crate::ipc::error::{is_unique_violation, respond, HandlerErr};
use crate::ipc::helpers::{authed, get_required_str, new_id, ADMIN};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use tracing::info;

fn faculty_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, _) = authed(state, req, ADMIN)?;
    let mut stmt = conn.prepare(
        "SELECT
           f.id,
           f.name,
           f.email,
           f.contact_no,
           (SELECT COUNT(*) FROM timetable_slots t WHERE t.faculty_id = f.id) AS slot_count
         FROM faculty f
         ORDER BY f.name",
    )?;
    let faculty = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "email": r.get::<_, String>(2)?,
                "contactNo": r.get::<_, i64>(3)?,
                "slotCount": r.get::<_, i64>(4)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "faculty": faculty }))
}

fn parse_contact_no(params: &serde_json::Value) -> Result<i64, HandlerErr> {
    let bad = || HandlerErr::bad_params("contactNo must be numeric");
    match params.get("contactNo") {
        Some(v) if v.is_i64() => v.as_i64().ok_or_else(bad),
        Some(v) => v
            .as_str()
            .and_then(|s| s.trim().parse::<i64>().ok())
            .ok_or_else(bad),
        None => Err(HandlerErr::bad_params("missing contactNo")),
    }
}

fn faculty_create(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, _) = authed(state, req, ADMIN)?;
    let p = &req.params;
    let name = get_required_str(p, "name")?;
    let email = get_required_str(p, "email")?;
    let password = get_required_str(p, "password")?;
    let contact_no = parse_contact_no(p)?;

    let email_taken = conn
        .query_row("SELECT 1 FROM faculty WHERE email = ?", [&email], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if email_taken {
        return Err(HandlerErr::conflict("email already registered"));
    }

    let faculty_id = new_id();
    conn.execute(
        "INSERT INTO faculty(id, name, email, password_hash, contact_no) VALUES(?, ?, ?, ?, ?)",
        (
            &faculty_id,
            &name,
            &email,
            auth::hash_password(&password),
            contact_no,
        ),
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            HandlerErr::conflict("email or contact number already exists")
        } else {
            HandlerErr::db("db_insert_failed", "faculty", e)
        }
    })?;
    info!(%faculty_id, %email, "faculty member added");
    Ok(json!({ "facultyId": faculty_id }))
}

fn faculty_delete(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, _) = authed(state, req, ADMIN)?;
    let faculty_id = get_required_str(&req.params, "facultyId")?;
    let exists = conn
        .query_row("SELECT 1 FROM faculty WHERE id = ?", [&faculty_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if !exists {
        return Err(HandlerErr::not_found("faculty member not found"));
    }

    let references: i64 = conn.query_row(
        "SELECT
           (SELECT COUNT(*) FROM attendance_records WHERE faculty_id = ?1)
         + (SELECT COUNT(*) FROM attendance_sessions WHERE faculty_id = ?1)
         + (SELECT COUNT(*) FROM timetable_slots WHERE faculty_id = ?1)",
        [&faculty_id],
        |r| r.get(0),
    )?;
    if references > 0 {
        return Err(HandlerErr::conflict(
            "faculty member is still referenced by attendance, sessions, or timetable",
        )
        .with_details(json!({ "references": references })));
    }

    conn.execute("DELETE FROM faculty WHERE id = ?", [&faculty_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", "faculty", e))?;
    let revoked = state.revoke_user(Role::Faculty, &faculty_id);
    info!(%faculty_id, revoked, "faculty member deleted");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "faculty.list" => faculty_list(state, req),
        "faculty.create" => faculty_create(state, req),
        "faculty.delete" => faculty_delete(state, req),
        _ => return None,
    };
    Some(respond(&req.id, &req.method, result))
}
