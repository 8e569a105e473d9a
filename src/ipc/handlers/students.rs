use crate::auth::{self, Role};
use crate::calc::parse_date;
use crate::face::FaceEncoding;
use crate::ipc::error::{is_unique_violation, respond, HandlerErr};
use crate::ipc::helpers::{
    authed, get_optional_i64, get_optional_str, get_required_str, new_id, today_key, ADMIN,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use std::path::{Component, Path};
use tracing::{info, warn};

const DEFAULT_STUDENT_PASSWORD: &str = "123456";

fn parse_face_encoding(params: &serde_json::Value) -> Result<FaceEncoding, HandlerErr> {
    let raw = params
        .get("faceEncoding")
        .ok_or_else(|| HandlerErr::bad_params("missing faceEncoding (no face detected in photo?)"))?;
    FaceEncoding::from_json(raw).map_err(|e| HandlerErr::bad_params(e.to_string()))
}

/// Photos are stored relative to the workspace and may not climb out of it.
fn is_workspace_relative(photo: &Path) -> bool {
    photo
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn parse_photo_url(params: &serde_json::Value) -> Result<Option<String>, HandlerErr> {
    let Some(photo_url) = get_optional_str(params, "photoUrl") else {
        return Ok(None);
    };
    if !is_workspace_relative(Path::new(&photo_url)) {
        return Err(HandlerErr::bad_params(
            "photoUrl must be a path relative to the workspace",
        ));
    }
    Ok(Some(photo_url))
}

fn students_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, _) = authed(state, req, ADMIN)?;
    let class_name = get_optional_str(&req.params, "className");
    let mut stmt = conn.prepare(
        "SELECT id, name, enrollment_number, class_name, semester, photo_url, dob, admission_date
         FROM students
         WHERE (?1 IS NULL OR class_name = ?1)
         ORDER BY class_name, enrollment_number",
    )?;
    let students = stmt
        .query_map([&class_name], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "enrollmentNumber": r.get::<_, String>(2)?,
                "className": r.get::<_, String>(3)?,
                "semester": r.get::<_, i64>(4)?,
                "photoUrl": r.get::<_, String>(5)?,
                "dob": r.get::<_, Option<String>>(6)?,
                "admissionDate": r.get::<_, String>(7)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "students": students }))
}

fn students_create(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, _) = authed(state, req, ADMIN)?;
    let p = &req.params;
    let name = get_required_str(p, "name")?;
    let enrollment = get_required_str(p, "enrollmentNumber")?;
    let class_name = get_required_str(p, "className")?;
    let dob_raw = get_required_str(p, "dob")?;
    let dob = parse_date(&dob_raw)
        .ok_or_else(|| HandlerErr::bad_params("dob must be YYYY-MM-DD"))?
        .format("%Y-%m-%d")
        .to_string();
    let semester = get_optional_i64(p, "semester")?.unwrap_or(1);
    if !(1..=6).contains(&semester) {
        return Err(HandlerErr::bad_params("semester must be between 1 and 6"));
    }
    let encoding = parse_face_encoding(p)?;
    let password = get_optional_str(p, "password");
    let photo_url = parse_photo_url(p)?.unwrap_or_default();

    let duplicate = conn
        .query_row(
            "SELECT 1 FROM students WHERE enrollment_number = ?",
            [&enrollment],
            |r| r.get::<_, i64>(0),
        )
        .optional()?
        .is_some();
    if duplicate {
        return Err(HandlerErr::conflict(format!(
            "student with enrollment {} already exists",
            enrollment
        )));
    }

    let student_id = new_id();
    conn.execute(
        "INSERT INTO students(
           id, name, enrollment_number, password_hash, class_name, semester,
           face_encoding, photo_url, dob, admission_date
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &name,
            &enrollment,
            auth::hash_password(password.as_deref().unwrap_or(DEFAULT_STUDENT_PASSWORD)),
            &class_name,
            semester,
            encoding.to_stored(),
            &photo_url,
            &dob,
            today_key(),
        ),
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            HandlerErr::conflict("enrollment number already exists")
        } else {
            HandlerErr::db("db_insert_failed", "students", e)
        }
    })?;
    info!(%student_id, %enrollment, %class_name, "student enrolled");
    Ok(json!({ "studentId": student_id }))
}

fn students_update_face(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, _) = authed(state, req, ADMIN)?;
    let student_id = get_required_str(&req.params, "studentId")?;
    let encoding = parse_face_encoding(&req.params)?;
    let photo_url = parse_photo_url(&req.params)?;
    let changed = conn
        .execute(
            "UPDATE students
             SET face_encoding = ?, photo_url = COALESCE(?, photo_url)
             WHERE id = ?",
            (encoding.to_stored(), &photo_url, &student_id),
        )
        .map_err(|e| HandlerErr::db("db_update_failed", "students", e))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("student not found"));
    }
    Ok(json!({ "ok": true }))
}

fn remove_photo(workspace: Option<&Path>, photo_url: &str) {
    let photo = Path::new(photo_url);
    let Some(ws) = workspace else {
        return;
    };
    if photo_url.is_empty() || !is_workspace_relative(photo) {
        return;
    }
    let path = ws.join(photo);
    // Symlinks must not lead outside the workspace either.
    let inside = match (path.canonicalize(), ws.canonicalize()) {
        (Ok(p), Ok(root)) => p.starts_with(root),
        _ => false,
    };
    if !inside || !path.is_file() {
        return;
    }
    if let Err(e) = std::fs::remove_file(&path) {
        warn!(path = %path.display(), "could not remove student photo: {e}");
    }
}

fn students_delete(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let (conn, _) = authed(state, req, ADMIN)?;
    let student_id = get_required_str(&req.params, "studentId")?;
    let photo_url: Option<String> = conn
        .query_row(
            "SELECT photo_url FROM students WHERE id = ?",
            [&student_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(photo_url) = photo_url else {
        return Err(HandlerErr::not_found("student not found"));
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    // No ON DELETE CASCADE: remove dependents first.
    let records = tx
        .execute(
            "DELETE FROM attendance_records WHERE student_id = ?",
            [&student_id],
        )
        .map_err(|e| HandlerErr::db("db_delete_failed", "attendance_records", e))?;
    tx.execute(
        "DELETE FROM leave_applications WHERE student_id = ?",
        [&student_id],
    )
    .map_err(|e| HandlerErr::db("db_delete_failed", "leave_applications", e))?;
    tx.execute("DELETE FROM students WHERE id = ?", [&student_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", "students", e))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    remove_photo(state.workspace.as_deref(), &photo_url);
    let revoked = state.revoke_user(Role::Student, &student_id);
    info!(%student_id, records, revoked, "student deleted");
    Ok(json!({ "ok": true, "recordsDeleted": records }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "students.list" => students_list(state, req),
        "students.create" => students_create(state, req),
        "students.updateFace" => students_update_face(state, req),
        "students.delete" => students_delete(state, req),
        _ => return None,
    };
    Some(respond(&req.id, &req.method, result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_workspace(prefix: &str) -> std::path::PathBuf {
        let p = std::env::temp_dir()
            .join(format!(
                "{}-{}",
                prefix,
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .expect("clock")
                    .as_nanos()
            ))
            .join("workspace");
        std::fs::create_dir_all(&p).expect("create workspace");
        p
    }

    #[test]
    fn relative_photo_paths_must_stay_below_the_workspace() {
        assert!(is_workspace_relative(Path::new("photos/a.jpg")));
        assert!(is_workspace_relative(Path::new("./a.jpg")));
        assert!(!is_workspace_relative(Path::new("../a.jpg")));
        assert!(!is_workspace_relative(Path::new("photos/../../a.jpg")));
        assert!(!is_workspace_relative(Path::new("/tmp/a.jpg")));
    }

    #[test]
    fn remove_photo_leaves_files_outside_the_workspace() {
        let ws = temp_workspace("attendd-remove-photo");
        let outside = ws.parent().expect("parent").join("outside.jpg");
        std::fs::write(&outside, b"jpeg").expect("outside");
        std::fs::write(ws.join("inside.jpg"), b"jpeg").expect("inside");

        remove_photo(Some(ws.as_path()), "../outside.jpg");
        remove_photo(Some(ws.as_path()), &outside.to_string_lossy());
        remove_photo(None, "inside.jpg");
        assert!(outside.exists());
        assert!(ws.join("inside.jpg").exists());

        remove_photo(Some(ws.as_path()), "inside.jpg");
        assert!(!ws.join("inside.jpg").exists());
    }
}
