use crate::auth::Role;
use crate::calc::parse_date;
use crate::face::{is_smiling, FaceEncoding, FaceIndex, Landmarks};
use crate::ipc::error::{is_unique_violation, respond, HandlerErr};
use crate::ipc::handlers::{sessions, setup};
use crate::ipc::helpers::{
    authed, get_optional_str, get_required_str, new_id, now_time_key, today_key, FACULTY, STAFF,
};
use crate::ipc::types::{AppState, Request};
use crate::session::{RecordMethod, RecordStatus};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, info, warn};

struct Enrolled {
    name: String,
    enrollment: String,
}

/// Face index of one class plus the display fields for each student.
fn load_class_index(
    conn: &Connection,
    class_name: &str,
) -> Result<(FaceIndex, HashMap<String, Enrolled>), HandlerErr> {
    let mut stmt = conn.prepare(
        "SELECT id, name, enrollment_number, face_encoding
         FROM students
         WHERE class_name = ?
         ORDER BY enrollment_number",
    )?;
    let rows = stmt
        .query_map([class_name], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut index = FaceIndex::new();
    let mut enrolled = HashMap::new();
    for (id, name, enrollment, stored) in rows {
        match FaceEncoding::parse_stored(&stored) {
            Ok(encoding) => {
                index.add(id.clone(), encoding);
                enrolled.insert(id, Enrolled { name, enrollment });
            }
            Err(e) => {
                warn!(student_id = %id, error = %e, "skipping student with unusable face encoding");
            }
        }
    }
    Ok((index, enrolled))
}

struct DetectedFace {
    encoding: FaceEncoding,
    landmarks: Option<Landmarks>,
    location: Value,
}

fn parse_faces(params: &Value) -> Result<Vec<DetectedFace>, HandlerErr> {
    let items = match params.get("faces") {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(v) => v
            .as_array()
            .ok_or_else(|| HandlerErr::bad_params("faces must be an array"))?,
    };
    let mut faces = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        let raw = item
            .get("encoding")
            .ok_or_else(|| HandlerErr::bad_params(format!("faces[{}].encoding missing", idx)))?;
        let encoding = FaceEncoding::from_json(raw)
            .map_err(|e| HandlerErr::bad_params(format!("faces[{}]: {}", idx, e)))?;
        // Unreadable landmarks count as "no smile", not as a bad request.
        let landmarks = item
            .get("landmarks")
            .filter(|v| !v.is_null())
            .and_then(|v| serde_json::from_value::<Landmarks>(v.clone()).ok());
        let location = item.get("location").cloned().unwrap_or(Value::Null);
        faces.push(DetectedFace {
            encoding,
            landmarks,
            location,
        });
    }
    Ok(faces)
}

fn record_status_on(
    conn: &Connection,
    student_id: &str,
    subject_id: &str,
    date: &str,
) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT status FROM attendance_records
         WHERE student_id = ? AND subject_id = ? AND date = ?",
        (student_id, subject_id, date),
        |r| r.get(0),
    )
    .optional()
}

struct NewRecord<'a> {
    date: &'a str,
    status: RecordStatus,
    method: RecordMethod,
    student_id: &'a str,
    faculty_id: &'a str,
    subject_id: &'a str,
    session_id: Option<&'a str>,
}

/// Inserts one attendance record. `Ok(false)` when the student already has a
/// record for that subject and day.
fn insert_record(conn: &Connection, rec: &NewRecord<'_>) -> Result<bool, HandlerErr> {
    let res = conn.execute(
        "INSERT INTO attendance_records(
           id, date, time, status, method, student_id, faculty_id, subject_id, session_id
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            new_id(),
            rec.date,
            now_time_key(),
            rec.status.as_str(),
            rec.method.as_str(),
            rec.student_id,
            rec.faculty_id,
            rec.subject_id,
            rec.session_id,
        ),
    );
    match res {
        Ok(_) => Ok(true),
        Err(e) if is_unique_violation(&e) => Ok(false),
        Err(e) => Err(HandlerErr::db("db_insert_failed", "attendance_records", e)),
    }
}

fn require_subject(conn: &Connection, subject_id: &str) -> Result<(), HandlerErr> {
    let exists = conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [subject_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if !exists {
        return Err(HandlerErr::not_found("subject not found"));
    }
    Ok(())
}

fn attendance_recognize(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let (conn, who) = authed(state, req, FACULTY)?;
    let class_name = get_required_str(&req.params, "className")?;
    let subject_id = get_required_str(&req.params, "subjectId")?;
    let faces = parse_faces(&req.params)?;
    if faces.is_empty() {
        return Ok(json!({ "results": [], "message": "No faces detected" }));
    }
    require_subject(conn, &subject_id)?;

    let tunables = setup::tunables(conn)?;
    let (index, enrolled) = load_class_index(conn, &class_name)?;
    if index.is_empty() {
        warn!(%class_name, "no enrolled faces for class");
    }
    let session = sessions::open_session_for(conn, &who.user_id, &subject_id)?;
    let arrival = session
        .as_ref()
        .map(|(_, status)| status.arrival_status())
        .unwrap_or(RecordStatus::Present);
    let session_id = session.as_ref().map(|(id, _)| id.as_str());
    let today = today_key();

    let mut results = Vec::with_capacity(faces.len());
    let mut marked = 0usize;
    for face in &faces {
        let Some(m) = index.best_match(&face.encoding, tunables.tolerance) else {
            results.push(json!({
                "status": "unknown",
                "message": "Unknown Face",
                "location": face.location,
            }));
            continue;
        };
        let (name, enrollment) = enrolled
            .get(m.student_id)
            .map(|e| (e.name.as_str(), e.enrollment.as_str()))
            .unwrap_or_default();
        let mut result = json!({
            "studentId": m.student_id,
            "name": name,
            "enrollment": enrollment,
            "distance": m.distance,
            "location": face.location,
        });

        if tunables.require_liveness && !face.landmarks.as_ref().is_some_and(is_smiling) {
            result["status"] = json!("liveness_failed");
            result["message"] = json!("Please Smile");
            results.push(result);
            continue;
        }

        let already = record_status_on(conn, m.student_id, &subject_id, &today)?.is_some();
        let created = !already
            && insert_record(
                conn,
                &NewRecord {
                    date: &today,
                    status: arrival,
                    method: RecordMethod::FaceId,
                    student_id: m.student_id,
                    faculty_id: &who.user_id,
                    subject_id: &subject_id,
                    session_id,
                },
            )?;
        if created {
            marked += 1;
            result["status"] = json!("marked");
            result["recordStatus"] = json!(arrival.as_str());
            result["message"] = json!(format!("Marked {}", arrival.as_str()));
        } else {
            result["status"] = json!("existing");
            result["message"] = json!("Already Marked");
        }
        results.push(result);
    }

    debug!(faces = faces.len(), known = index.len(), marked, "recognition pass");
    if marked > 0 {
        info!(%class_name, %subject_id, marked, "attendance marked by face");
    }
    Ok(json!({
        "results": results,
        "sessionId": session_id,
        "sessionStatus": session.as_ref().map(|(_, s)| s.as_str()),
    }))
}

fn attendance_mark_manual(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let (conn, who) = authed(state, req, FACULTY)?;
    let student_id = get_required_str(&req.params, "studentId")?;
    let subject_id = get_required_str(&req.params, "subjectId")?;
    let status = match get_optional_str(&req.params, "status") {
        None => RecordStatus::Present,
        Some(raw) => RecordStatus::parse(&raw).ok_or_else(|| {
            HandlerErr::bad_params("status must be one of: Present, Absent, Late, Leave")
        })?,
    };

    let student_exists = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if !student_exists {
        return Err(HandlerErr::not_found("student not found"));
    }
    require_subject(conn, &subject_id)?;

    let today = today_key();
    if let Some(existing) = record_status_on(conn, &student_id, &subject_id, &today)? {
        return Ok(json!({ "created": false, "status": existing }));
    }
    let session = sessions::open_session_for(conn, &who.user_id, &subject_id)?;
    let created = insert_record(
        conn,
        &NewRecord {
            date: &today,
            status,
            method: RecordMethod::Manual,
            student_id: &student_id,
            faculty_id: &who.user_id,
            subject_id: &subject_id,
            session_id: session.as_ref().map(|(id, _)| id.as_str()),
        },
    )?;
    if created {
        info!(%student_id, %subject_id, status = status.as_str(), "attendance marked manually");
    }
    Ok(json!({ "created": created, "status": status.as_str() }))
}

fn attendance_query(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let (conn, who) = authed(state, req, STAFF)?;
    let p = &req.params;
    let start = match get_optional_str(p, "startDate") {
        None => None,
        Some(s) => Some(
            parse_date(&s).ok_or_else(|| HandlerErr::bad_params("startDate must be YYYY-MM-DD"))?,
        ),
    };
    let end = match get_optional_str(p, "endDate") {
        None => None,
        Some(s) => Some(
            parse_date(&s).ok_or_else(|| HandlerErr::bad_params("endDate must be YYYY-MM-DD"))?,
        ),
    };
    if let (Some(s), Some(e)) = (start, end) {
        if s > e {
            return Err(HandlerErr::bad_params("startDate must not be after endDate"));
        }
    }
    let class_name = get_optional_str(p, "className");
    let faculty_filter = (who.role == Role::Faculty).then(|| who.user_id.clone());

    let mut stmt = conn.prepare(
        "SELECT r.id, r.date, r.time, st.id, st.name, st.enrollment_number, st.class_name,
                sub.id, sub.name, r.status, r.method, f.name, r.session_id
         FROM attendance_records r
         JOIN students st ON st.id = r.student_id
         JOIN subjects sub ON sub.id = r.subject_id
         LEFT JOIN faculty f ON f.id = r.faculty_id
         WHERE (?1 IS NULL OR r.date >= ?1)
           AND (?2 IS NULL OR r.date <= ?2)
           AND (?3 IS NULL OR st.class_name = ?3)
           AND (?4 IS NULL OR r.faculty_id = ?4)
         ORDER BY r.date DESC, r.time DESC, st.enrollment_number",
    )?;
    let records = stmt
        .query_map(
            (
                start.map(|d| d.format("%Y-%m-%d").to_string()),
                end.map(|d| d.format("%Y-%m-%d").to_string()),
                &class_name,
                &faculty_filter,
            ),
            |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "date": r.get::<_, String>(1)?,
                    "time": r.get::<_, String>(2)?,
                    "studentId": r.get::<_, String>(3)?,
                    "studentName": r.get::<_, String>(4)?,
                    "enrollment": r.get::<_, String>(5)?,
                    "className": r.get::<_, String>(6)?,
                    "subjectId": r.get::<_, String>(7)?,
                    "subjectName": r.get::<_, String>(8)?,
                    "status": r.get::<_, String>(9)?,
                    "method": r.get::<_, String>(10)?,
                    "facultyName": r.get::<_, Option<String>>(11)?,
                    "sessionId": r.get::<_, Option<String>>(12)?,
                }))
            },
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "records": records }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "attendance.recognize" => attendance_recognize(state, req),
        "attendance.markManual" => attendance_mark_manual(state, req),
        "attendance.query" => attendance_query(state, req),
        _ => return None,
    };
    Some(respond(&req.id, &req.method, result))
}
