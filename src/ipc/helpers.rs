use crate::auth::{Principal, Role};
use crate::ipc::error::HandlerErr;
use crate::ipc::types::{AppState, Request};
use chrono::Local;
use rusqlite::Connection;
use serde_json::Value;
use uuid::Uuid;

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    let s = params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))?;
    if s.is_empty() {
        return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
    }
    Ok(s)
}

pub fn get_optional_str(params: &Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Accepts a JSON integer or a numeric string.
pub fn get_optional_i64(params: &Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => {
            if let Some(n) = v.as_i64() {
                return Ok(Some(n));
            }
            v.as_str()
                .and_then(|s| s.trim().parse::<i64>().ok())
                .map(Some)
                .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an integer", key)))
        }
    }
}

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn principal(state: &AppState, req: &Request) -> Result<Principal, HandlerErr> {
    req.token
        .as_deref()
        .and_then(|t| state.sessions.get(t))
        .cloned()
        .ok_or_else(|| HandlerErr::new("unauthenticated", "login required"))
}

/// Database plus the caller, who must hold one of `roles`.
pub fn authed<'a>(
    state: &'a AppState,
    req: &Request,
    roles: &[Role],
) -> Result<(&'a Connection, Principal), HandlerErr> {
    let conn = require_db(state)?;
    let who = principal(state, req)?;
    if !roles.contains(&who.role) {
        return Err(HandlerErr::forbidden());
    }
    Ok((conn, who))
}

pub const ANY_ROLE: &[Role] = &[Role::Admin, Role::Faculty, Role::Student];
pub const STAFF: &[Role] = &[Role::Admin, Role::Faculty];
pub const ADMIN: &[Role] = &[Role::Admin];
pub const FACULTY: &[Role] = &[Role::Faculty];
pub const STUDENT: &[Role] = &[Role::Student];

pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

pub fn today_key() -> String {
    Local::now().date_naive().format("%Y-%m-%d").to_string()
}

pub fn now_time_key() -> String {
    Local::now().time().format("%H:%M:%S").to_string()
}

pub fn now_timestamp() -> String {
    Local::now().naive_local().format("%Y-%m-%d %H:%M:%S").to_string()
}
