use crate::db;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{get_required_str, require_db};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;
use tracing::warn;

fn health(state: &AppState) -> Result<serde_json::Value, HandlerErr> {
    Ok(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
    }))
}

fn workspace_select(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let path = PathBuf::from(get_required_str(&req.params, "path")?);
    let seeded = state
        .open_workspace(&path)
        .map_err(|e| HandlerErr::new("db_open_failed", format!("{e:#}")))?;
    Ok(json!({
        "workspacePath": path.to_string_lossy(),
        "seeded": seeded,
    }))
}

fn create_defaults(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let supplied = req
        .params
        .get("initToken")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    match state.config.init_token() {
        Some(expected) if supplied == expected => {}
        _ => {
            warn!("rejected admin.createDefaults with a missing or wrong init token");
            return Err(HandlerErr::new("unauthenticated", "invalid init token"));
        }
    }
    let conn = require_db(state)?;
    let created = db::seed_defaults(conn)?;
    Ok(json!({ "created": created }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "health" => health(state),
        "workspace.select" => workspace_select(state, req),
        "admin.createDefaults" => create_defaults(state, req),
        _ => return None,
    };
    Some(respond(&req.id, &req.method, result))
}
