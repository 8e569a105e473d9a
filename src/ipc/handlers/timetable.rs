use crate::auth::Role;
use crate::calc::{parse_hhmm, slots_overlap};
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{
    authed, get_optional_i64, get_optional_str, get_required_str, new_id, ADMIN, ANY_ROLE,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use tracing::info;

const SLOT_COLUMNS: &str = "t.id, t.class_name, t.semester, t.subject_id, s.name, t.faculty_id, f.name,
       t.day_of_week, t.start_time, t.end_time, t.room_number";

fn slot_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "className": r.get::<_, String>(1)?,
        "semester": r.get::<_, i64>(2)?,
        "subjectId": r.get::<_, String>(3)?,
        "subjectName": r.get::<_, String>(4)?,
        "facultyId": r.get::<_, String>(5)?,
        "facultyName": r.get::<_, String>(6)?,
        "dayOfWeek": r.get::<_, i64>(7)?,
        "startTime": r.get::<_, String>(8)?,
        "endTime": r.get::<_, String>(9)?,
        "roomNumber": r.get::<_, String>(10)?,
    }))
}

fn timetable_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, who) = authed(state, req, ANY_ROLE)?;
    let filter = match who.role {
        Role::Admin => "1 = 1",
        Role::Faculty => "t.faculty_id = ?1",
        Role::Student => "t.class_name = (SELECT class_name FROM students WHERE id = ?1)",
    };
    let sql = format!(
        "SELECT {SLOT_COLUMNS}
         FROM timetable_slots t
         JOIN subjects s ON s.id = t.subject_id
         JOIN faculty f ON f.id = t.faculty_id
         WHERE {filter}
         ORDER BY t.day_of_week, t.start_time"
    );
    let mut stmt = conn.prepare(&sql)?;
    let slots = if who.role == Role::Admin {
        stmt.query_map([], slot_json)?
            .collect::<Result<Vec<_>, _>>()?
    } else {
        stmt.query_map([&who.user_id], slot_json)?
            .collect::<Result<Vec<_>, _>>()?
    };
    Ok(json!({ "slots": slots }))
}

fn timetable_add_slot(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, _) = authed(state, req, ADMIN)?;
    let p = &req.params;
    let class_name = get_required_str(p, "className")?;
    let semester = get_optional_i64(p, "semester")?.unwrap_or(1);
    let subject_id = get_required_str(p, "subjectId")?;
    let faculty_id = get_required_str(p, "facultyId")?;
    let day_of_week = get_optional_i64(p, "dayOfWeek")?
        .ok_or_else(|| HandlerErr::bad_params("missing dayOfWeek"))?;
    if !(0..=6).contains(&day_of_week) {
        return Err(HandlerErr::bad_params("dayOfWeek must be between 0 and 6"));
    }
    let start = get_required_str(p, "startTime")
        .ok()
        .and_then(|s| parse_hhmm(&s))
        .ok_or_else(|| HandlerErr::bad_params("startTime must be HH:MM"))?;
    let end = get_required_str(p, "endTime")
        .ok()
        .and_then(|s| parse_hhmm(&s))
        .ok_or_else(|| HandlerErr::bad_params("endTime must be HH:MM"))?;
    if start >= end {
        return Err(HandlerErr::bad_params("startTime must be before endTime"));
    }
    let room_number = get_optional_str(p, "roomNumber").unwrap_or_default();

    let subject_ok = conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [&subject_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if !subject_ok {
        return Err(HandlerErr::not_found("subject not found"));
    }
    let faculty_ok = conn
        .query_row("SELECT 1 FROM faculty WHERE id = ?", [&faculty_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if !faculty_ok {
        return Err(HandlerErr::not_found("faculty member not found"));
    }

    // Same faculty member, or same non-empty room, booked for an overlapping time that day.
    let mut stmt = conn.prepare(
        "SELECT id, faculty_id, room_number, start_time, end_time
         FROM timetable_slots
         WHERE day_of_week = ?1
           AND (faculty_id = ?2 OR (?3 <> '' AND room_number = ?3))",
    )?;
    let candidates = stmt
        .query_map((day_of_week, &faculty_id, &room_number), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    for (slot_id, slot_faculty, s_start, s_end) in candidates {
        let (Some(es), Some(ee)) = (parse_hhmm(&s_start), parse_hhmm(&s_end)) else {
            continue;
        };
        if slots_overlap(es, ee, start, end) {
            let reason = if slot_faculty == faculty_id {
                "faculty"
            } else {
                "room"
            };
            return Err(HandlerErr::conflict(
                "conflict detected: faculty or room is already booked at this time",
            )
            .with_details(json!({ "slotId": slot_id, "reason": reason })));
        }
    }

    let slot_id = new_id();
    conn.execute(
        "INSERT INTO timetable_slots(
           id, class_name, semester, subject_id, faculty_id, day_of_week, start_time, end_time, room_number
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &slot_id,
            &class_name,
            semester,
            &subject_id,
            &faculty_id,
            day_of_week,
            start.format("%H:%M").to_string(),
            end.format("%H:%M").to_string(),
            &room_number,
        ),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", "timetable_slots", e))?;
    info!(%slot_id, %class_name, day_of_week, "timetable slot added");
    Ok(json!({ "slotId": slot_id }))
}

fn timetable_delete_slot(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, _) = authed(state, req, ADMIN)?;
    let slot_id = get_required_str(&req.params, "slotId")?;
    let changed = conn
        .execute("DELETE FROM timetable_slots WHERE id = ?", [&slot_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", "timetable_slots", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("timetable slot not found"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "timetable.list" => timetable_list(state, req),
        "timetable.addSlot" => timetable_add_slot(state, req),
        "timetable.deleteSlot" => timetable_delete_slot(state, req),
        _ => return None,
    };
    Some(respond(&req.id, &req.method, result))
}
