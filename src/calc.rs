use chrono::{NaiveDate, NaiveTime};
use rusqlite::Connection;
use serde::Serialize;

/// Half-up rounding to one decimal place: `floor(10*x + 0.5) / 10`.
pub fn round_off_1_decimal(x: f64) -> f64 {
    ((10.0 * x) + 0.5).floor() / 10.0
}

/// Share of marked lectures the student attended. Zero when nothing was marked.
pub fn attendance_percentage(present: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    present as f64 / total as f64 * 100.0
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudentTally {
    pub student_id: String,
    pub name: String,
    pub enrollment_number: String,
    pub class_name: String,
    pub present: i64,
    pub total: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Defaulter {
    pub student_id: String,
    pub name: String,
    pub enrollment: String,
    pub class_name: String,
    pub attended: i64,
    pub total: i64,
    pub percentage: f64,
}

/// Per-student counts of `Present` records against all records.
pub fn student_tallies(conn: &Connection) -> rusqlite::Result<Vec<StudentTally>> {
    let mut stmt = conn.prepare(
        "SELECT
           s.id,
           s.name,
           s.enrollment_number,
           s.class_name,
           (SELECT COUNT(*) FROM attendance_records r
             WHERE r.student_id = s.id AND r.status = 'Present') AS present,
           (SELECT COUNT(*) FROM attendance_records r
             WHERE r.student_id = s.id) AS total
         FROM students s
         ORDER BY s.class_name, s.enrollment_number",
    )?;
    let rows = stmt.query_map([], |r| {
        Ok(StudentTally {
            student_id: r.get(0)?,
            name: r.get(1)?,
            enrollment_number: r.get(2)?,
            class_name: r.get(3)?,
            present: r.get(4)?,
            total: r.get(5)?,
        })
    })?;
    rows.collect()
}

/// Students whose attendance percentage is strictly below `threshold_percent`.
pub fn find_defaulters(tallies: &[StudentTally], threshold_percent: f64) -> Vec<Defaulter> {
    tallies
        .iter()
        .filter_map(|t| {
            let pct = attendance_percentage(t.present, t.total);
            if pct >= threshold_percent {
                return None;
            }
            Some(Defaulter {
                student_id: t.student_id.clone(),
                name: t.name.clone(),
                enrollment: t.enrollment_number.clone(),
                class_name: t.class_name.clone(),
                attended: t.present,
                total: t.total,
                percentage: round_off_1_decimal(pct),
            })
        })
        .collect()
}

/// Whether an existing timetable slot collides with a proposed one on the same day.
pub fn slots_overlap(
    existing_start: NaiveTime,
    existing_end: NaiveTime,
    new_start: NaiveTime,
    new_end: NaiveTime,
) -> bool {
    let covers_start = existing_start <= new_start && existing_end > new_start;
    let covers_end = existing_start < new_end && existing_end >= new_end;
    let inside = existing_start >= new_start && existing_end <= new_end;
    covers_start || covers_end || inside
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

pub fn parse_hhmm(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").ok()
}
