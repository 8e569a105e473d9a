use crate::auth::{Principal, Role};
use crate::calc::parse_date;
use crate::ipc::error::{is_unique_violation, respond, HandlerErr};
use crate::ipc::helpers::{
    authed, get_optional_str, get_required_str, new_id, now_time_key, now_timestamp, STAFF,
    STUDENT,
};
use crate::ipc::types::{AppState, Request};
use crate::session::{LeaveStatus, RecordMethod, RecordStatus};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use tracing::info;

const LEAVE_COLUMNS: &str = "l.id, l.student_id, st.name, st.enrollment_number, st.class_name,
       l.subject_id, sub.name, l.leave_date, l.reason, l.status, l.applied_on,
       l.approved_by, l.approval_date, l.remarks";

fn leave_json(r: &rusqlite::Row<'_>) -> rusqlite::Result<serde_json::Value> {
    Ok(json!({
        "id": r.get::<_, String>(0)?,
        "studentId": r.get::<_, String>(1)?,
        "studentName": r.get::<_, String>(2)?,
        "enrollment": r.get::<_, String>(3)?,
        "className": r.get::<_, String>(4)?,
        "subjectId": r.get::<_, String>(5)?,
        "subjectName": r.get::<_, String>(6)?,
        "leaveDate": r.get::<_, String>(7)?,
        "reason": r.get::<_, String>(8)?,
        "status": r.get::<_, String>(9)?,
        "appliedOn": r.get::<_, String>(10)?,
        "approvedBy": r.get::<_, Option<String>>(11)?,
        "approvalDate": r.get::<_, Option<String>>(12)?,
        "remarks": r.get::<_, String>(13)?,
    }))
}

fn teaches_subject(conn: &Connection, faculty_id: &str, subject_id: &str) -> rusqlite::Result<bool> {
    Ok(conn
        .query_row(
            "SELECT 1 FROM timetable_slots WHERE faculty_id = ? AND subject_id = ? LIMIT 1",
            (faculty_id, subject_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some())
}

fn leaves_apply(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, who) = authed(state, req, STUDENT)?;
    let p = &req.params;
    let subject_id = get_required_str(p, "subjectId")?;
    let leave_date = parse_date(&get_required_str(p, "leaveDate")?)
        .ok_or_else(|| HandlerErr::bad_params("leaveDate must be YYYY-MM-DD"))?
        .format("%Y-%m-%d")
        .to_string();
    let reason = get_required_str(p, "reason")?;

    let subject_ok = conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [&subject_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if !subject_ok {
        return Err(HandlerErr::not_found("subject not found"));
    }

    let leave_id = new_id();
    let res = conn.execute(
        "INSERT INTO leave_applications(
           id, student_id, subject_id, leave_date, reason, status, applied_on, remarks
         ) VALUES(?, ?, ?, ?, ?, ?, ?, '')",
        (
            &leave_id,
            &who.user_id,
            &subject_id,
            &leave_date,
            &reason,
            LeaveStatus::Pending.as_str(),
            now_timestamp(),
        ),
    );
    match res {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => {
            return Err(HandlerErr::conflict(
                "a leave application for this subject and date already exists",
            ));
        }
        Err(e) => return Err(HandlerErr::db("db_insert_failed", "leave_applications", e)),
    }
    info!(%leave_id, student = %who.user_id, %leave_date, "leave applied");
    Ok(json!({ "leaveId": leave_id, "status": LeaveStatus::Pending.as_str() }))
}

fn leaves_mine(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, who) = authed(state, req, STUDENT)?;
    let sql = format!(
        "SELECT {LEAVE_COLUMNS}
         FROM leave_applications l
         JOIN students st ON st.id = l.student_id
         JOIN subjects sub ON sub.id = l.subject_id
         WHERE l.student_id = ?
         ORDER BY l.applied_on DESC, l.rowid DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let leaves = stmt
        .query_map([&who.user_id], leave_json)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "leaves": leaves }))
}

/// Leaves visible to a staff member: everything for admins, taught subjects for faculty.
fn staff_leaves(
    conn: &Connection,
    who: &Principal,
    pending: bool,
) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let status_filter = if pending {
        "l.status = 'Pending'"
    } else {
        "l.status <> 'Pending'"
    };
    let order = if pending {
        "l.applied_on DESC, l.rowid DESC"
    } else {
        "COALESCE(l.approval_date, l.applied_on) DESC"
    };
    let sql = format!(
        "SELECT {LEAVE_COLUMNS}
         FROM leave_applications l
         JOIN students st ON st.id = l.student_id
         JOIN subjects sub ON sub.id = l.subject_id
         WHERE {status_filter}
           AND (?1 IS NULL OR l.subject_id IN (
                 SELECT subject_id FROM timetable_slots WHERE faculty_id = ?1))
         ORDER BY {order}"
    );
    let faculty_filter = (who.role == Role::Faculty).then(|| who.user_id.clone());
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([&faculty_filter], leave_json)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn leaves_pending(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, who) = authed(state, req, STAFF)?;
    Ok(json!({ "leaves": staff_leaves(conn, &who, true)? }))
}

fn leaves_history(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, who) = authed(state, req, STAFF)?;
    Ok(json!({ "leaves": staff_leaves(conn, &who, false)? }))
}

struct PendingLeave {
    id: String,
    student_id: String,
    subject_id: String,
    leave_date: String,
}

fn load_for_decision(
    conn: &Connection,
    who: &Principal,
    leave_id: &str,
) -> Result<PendingLeave, HandlerErr> {
    let (id, student_id, subject_id, leave_date, status) = conn
        .query_row(
            "SELECT id, student_id, subject_id, leave_date, status
             FROM leave_applications WHERE id = ?",
            [leave_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                ))
            },
        )
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("leave application not found"))?;
    if who.role == Role::Faculty && !teaches_subject(conn, &who.user_id, &subject_id)? {
        return Err(HandlerErr::forbidden());
    }
    if LeaveStatus::parse(&status) != Some(LeaveStatus::Pending) {
        return Err(HandlerErr::invalid_state(format!(
            "leave application is already {}",
            status
        )));
    }
    Ok(PendingLeave {
        id,
        student_id,
        subject_id,
        leave_date,
    })
}

/// Faculty the `Leave` record is attributed to: the approver, or for admin
/// approvals the subject's timetable faculty, falling back to any faculty member.
fn record_faculty(conn: &Connection, who: &Principal, subject_id: &str) -> rusqlite::Result<Option<String>> {
    if who.role == Role::Faculty {
        return Ok(Some(who.user_id.clone()));
    }
    let from_timetable: Option<String> = conn
        .query_row(
            "SELECT faculty_id FROM timetable_slots
             WHERE subject_id = ?
             ORDER BY day_of_week, start_time
             LIMIT 1",
            [subject_id],
            |r| r.get(0),
        )
        .optional()?;
    if from_timetable.is_some() {
        return Ok(from_timetable);
    }
    conn.query_row(
        "SELECT id FROM faculty ORDER BY rowid LIMIT 1",
        [],
        |r| r.get(0),
    )
    .optional()
}

fn decide(
    state: &AppState,
    req: &Request,
    decision: LeaveStatus,
) -> Result<serde_json::Value, HandlerErr> {
    let (conn, who) = authed(state, req, STAFF)?;
    let leave_id = get_required_str(&req.params, "leaveId")?;
    let remarks = get_optional_str(&req.params, "remarks").unwrap_or_default();
    let leave = load_for_decision(conn, &who, &leave_id)?;
    let approver = (who.role == Role::Faculty).then(|| who.user_id.clone());

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE leave_applications
         SET status = ?, approved_by = ?, approval_date = ?, remarks = ?
         WHERE id = ?",
        (decision.as_str(), &approver, now_timestamp(), &remarks, &leave.id),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", "leave_applications", e))?;

    let mut record_created = false;
    if decision == LeaveStatus::Approved {
        if let Some(faculty_id) = record_faculty(&tx, &who, &leave.subject_id)? {
            let changed = tx
                .execute(
                    "INSERT INTO attendance_records(
                       id, date, time, status, method, student_id, faculty_id, subject_id, session_id
                     ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, NULL)
                     ON CONFLICT(student_id, subject_id, date) DO NOTHING",
                    (
                        new_id(),
                        &leave.leave_date,
                        now_time_key(),
                        RecordStatus::Leave.as_str(),
                        RecordMethod::Leave.as_str(),
                        &leave.student_id,
                        &faculty_id,
                        &leave.subject_id,
                    ),
                )
                .map_err(|e| HandlerErr::db("db_insert_failed", "attendance_records", e))?;
            record_created = changed > 0;
        }
    }
    tx.commit()?;

    info!(
        leave_id = %leave.id,
        decision = decision.as_str(),
        by = who.role.as_str(),
        record_created,
        "leave decided"
    );
    Ok(json!({
        "leaveId": leave.id,
        "status": decision.as_str(),
        "recordCreated": record_created,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "leaves.apply" => leaves_apply(state, req),
        "leaves.mine" => leaves_mine(state, req),
        "leaves.pending" => leaves_pending(state, req),
        "leaves.history" => leaves_history(state, req),
        "leaves.approve" => decide(state, req, LeaveStatus::Approved),
        "leaves.reject" => decide(state, req, LeaveStatus::Rejected),
        _ => return None,
    };
    Some(respond(&req.id, &req.method, result))
}
