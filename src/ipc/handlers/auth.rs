use crate::auth::{self, Principal, Role};
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{get_required_str, principal, require_db};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use tracing::{debug, info};

fn invalid_credentials() -> HandlerErr {
    HandlerErr::new("unauthenticated", "invalid credentials")
}

fn login(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let role_raw = get_required_str(&req.params, "userType")?;
    let role = Role::parse(&role_raw)
        .ok_or_else(|| HandlerErr::bad_params("userType must be admin, faculty, or student"))?;
    // Students type their enrollment number into the same field staff use for email.
    let login = get_required_str(&req.params, "login")
        .or_else(|_| get_required_str(&req.params, "email"))?;
    let password = req
        .params
        .get("password")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params("missing password"))?;

    let conn = require_db(state)?;
    let sql = format!(
        "SELECT id, name, password_hash FROM {} WHERE {} = ?",
        role.table(),
        role.login_column()
    );
    let row: Option<(String, String, String)> = conn
        .query_row(&sql, [&login], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
        .optional()?;

    let Some((user_id, name, hash)) = row else {
        debug!(role = role.as_str(), "login for unknown user");
        return Err(invalid_credentials());
    };
    if !auth::verify_password(&hash, password) {
        debug!(role = role.as_str(), "login with wrong password");
        return Err(invalid_credentials());
    }

    let token = auth::new_session_token();
    state.sessions.insert(
        token.clone(),
        Principal {
            role,
            user_id: user_id.clone(),
            name: name.clone(),
        },
    );
    info!(role = role.as_str(), %user_id, "signed in");
    Ok(json!({
        "token": token,
        "role": role.as_str(),
        "userId": user_id,
        "name": name,
    }))
}

fn logout(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let removed = req
        .token
        .as_deref()
        .and_then(|t| state.sessions.remove(t))
        .is_some();
    Ok(json!({ "loggedOut": removed }))
}

fn whoami(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let who = principal(state, req)?;
    Ok(json!({
        "role": who.role.as_str(),
        "userId": who.user_id,
        "name": who.name,
    }))
}

fn change_password(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = require_db(state)?;
    let who = principal(state, req)?;
    let current = req
        .params
        .get("currentPassword")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params("missing currentPassword"))?;
    let new_password = req
        .params
        .get("newPassword")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if new_password.is_empty() {
        return Err(HandlerErr::bad_params("newPassword must not be empty"));
    }

    let table = who.role.table();
    let hash: Option<String> = conn
        .query_row(
            &format!("SELECT password_hash FROM {} WHERE id = ?", table),
            [&who.user_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(hash) = hash else {
        return Err(HandlerErr::not_found("account no longer exists"));
    };
    if !auth::verify_password(&hash, current) {
        return Err(HandlerErr::new("forbidden", "incorrect current password"));
    }

    conn.execute(
        &format!("UPDATE {} SET password_hash = ? WHERE id = ?", table),
        (auth::hash_password(new_password), &who.user_id),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", table, e))?;
    info!(role = who.role.as_str(), user_id = %who.user_id, "password changed");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "auth.login" => login(state, req),
        "auth.logout" => logout(state, req),
        "auth.whoami" => whoami(state, req),
        "auth.changePassword" => change_password(state, req),
        _ => return None,
    };
    Some(respond(&req.id, &req.method, result))
}
