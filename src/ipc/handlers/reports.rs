use crate::calc::{attendance_percentage, find_defaulters, round_off_1_decimal, student_tallies};
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::handlers::setup;
use crate::ipc::helpers::{authed, STAFF, STUDENT};
use crate::ipc::types::{AppState, Request};
use chrono::{Duration, Local};
use rusqlite::Connection;
use serde_json::json;

const SERIES_DAYS: i64 = 7;
const RECENT_LIMIT: i64 = 10;

fn count(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> rusqlite::Result<i64> {
    conn.query_row(sql, params, |r| r.get(0))
}

fn dashboard_stats(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, _) = authed(state, req, STAFF)?;
    let today = Local::now().date_naive();
    let today_key = today.format("%Y-%m-%d").to_string();

    let students = count(conn, "SELECT COUNT(*) FROM students", [])?;
    let subjects = count(conn, "SELECT COUNT(*) FROM subjects", [])?;
    let today_records = count(
        conn,
        "SELECT COUNT(*) FROM attendance_records WHERE date = ?",
        [&today_key],
    )?;

    let mut series = Vec::with_capacity(SERIES_DAYS as usize);
    for back in (0..SERIES_DAYS).rev() {
        let day = (today - Duration::days(back)).format("%Y-%m-%d").to_string();
        let n = count(
            conn,
            "SELECT COUNT(*) FROM attendance_records WHERE date = ?",
            [&day],
        )?;
        series.push(json!({ "date": day, "count": n }));
    }

    Ok(json!({
        "students": students,
        "subjects": subjects,
        "todayRecords": today_records,
        "present": today_records,
        "absent": (students - today_records).max(0),
        "series": series,
    }))
}

fn student_summary(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, who) = authed(state, req, STUDENT)?;
    let total = count(
        conn,
        "SELECT COUNT(*) FROM attendance_records WHERE student_id = ?",
        [&who.user_id],
    )?;
    let present = count(
        conn,
        "SELECT COUNT(*) FROM attendance_records WHERE student_id = ? AND status = 'Present'",
        [&who.user_id],
    )?;

    let mut stmt = conn.prepare(
        "SELECT r.date, r.time, sub.name, r.status, r.method
         FROM attendance_records r
         JOIN subjects sub ON sub.id = r.subject_id
         WHERE r.student_id = ?
         ORDER BY r.date DESC, r.time DESC
         LIMIT ?",
    )?;
    let recent = stmt
        .query_map((&who.user_id, RECENT_LIMIT), |r| {
            Ok(json!({
                "date": r.get::<_, String>(0)?,
                "time": r.get::<_, String>(1)?,
                "subjectName": r.get::<_, String>(2)?,
                "status": r.get::<_, String>(3)?,
                "method": r.get::<_, String>(4)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(json!({
        "total": total,
        "present": present,
        "absent": total - present,
        "percentage": round_off_1_decimal(attendance_percentage(present, total)),
        "recent": recent,
    }))
}

fn defaulters(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, _) = authed(state, req, STAFF)?;
    let threshold = setup::tunables(conn)?.defaulter_threshold_percent;
    let tallies = student_tallies(conn)?;
    let rows = find_defaulters(&tallies, threshold);
    Ok(json!({ "thresholdPercent": threshold, "defaulters": rows }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "dashboard.stats" => dashboard_stats(state, req),
        "attendance.studentSummary" => student_summary(state, req),
        "attendance.defaulters" => defaulters(state, req),
        _ => return None,
    };
    Some(respond(&req.id, &req.method, result))
}
