use crate::db;
use crate::face::DEFAULT_TOLERANCE;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{authed, get_optional_str, get_required_str, ADMIN, ANY_ROLE};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

#[derive(Clone, Copy)]
enum SetupSection {
    Recognition,
    Sessions,
    Reports,
}

impl SetupSection {
    const ALL: [SetupSection; 3] = [Self::Recognition, Self::Sessions, Self::Reports];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "recognition" => Some(Self::Recognition),
            "sessions" => Some(Self::Sessions),
            "reports" => Some(Self::Reports),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Recognition => "recognition",
            Self::Sessions => "sessions",
            Self::Reports => "reports",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Recognition => "setup.recognition",
            Self::Sessions => "setup.sessions",
            Self::Reports => "setup.reports",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Recognition => json!({
            "tolerance": DEFAULT_TOLERANCE,
            "requireLiveness": true
        }),
        SetupSection::Sessions => json!({
            "defaultDurationMinutes": 10
        }),
        SetupSection::Reports => json!({
            "defaulterThresholdPercent": 75
        }),
    }
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v.as_i64().ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_f64_range(v: &Value, key: &str, min: f64, max: f64) -> Result<f64, String> {
    let n = v.as_f64().ok_or_else(|| format!("{} must be a number", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Recognition => match k.as_str() {
                "tolerance" => {
                    obj.insert(k.clone(), Value::from(parse_f64_range(v, k, 0.1, 1.0)?));
                }
                "requireLiveness" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown recognition field: {}", k)),
            },
            SetupSection::Sessions => match k.as_str() {
                "defaultDurationMinutes" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 240)?));
                }
                _ => return Err(format!("unknown sessions field: {}", k)),
            },
            SetupSection::Reports => match k.as_str() {
                "defaulterThresholdPercent" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, 100)?));
                }
                _ => return Err(format!("unknown reports field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let defaults = default_section(section);
    let Some(saved) = db::settings_get_json(conn, section.key())? else {
        return Ok(defaults);
    };
    let Some(saved_obj) = saved.as_object() else {
        warn!(section = section.name(), "ignoring saved setting that is not an object");
        return Ok(defaults);
    };
    let mut merged = defaults.clone();
    match merge_section_patch(section, &mut merged, saved_obj) {
        Ok(()) => Ok(merged),
        Err(msg) => {
            warn!(section = section.name(), %msg, "ignoring invalid saved setting");
            Ok(defaults)
        }
    }
}

/// Effective tunables read by the marking, session and report handlers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tunables {
    pub tolerance: f64,
    pub require_liveness: bool,
    pub default_duration_minutes: i64,
    pub defaulter_threshold_percent: f64,
}

pub fn tunables(conn: &Connection) -> anyhow::Result<Tunables> {
    let recognition = load_section(conn, SetupSection::Recognition)?;
    let sessions = load_section(conn, SetupSection::Sessions)?;
    let reports = load_section(conn, SetupSection::Reports)?;
    Ok(Tunables {
        tolerance: recognition["tolerance"]
            .as_f64()
            .unwrap_or(DEFAULT_TOLERANCE),
        require_liveness: recognition["requireLiveness"].as_bool().unwrap_or(true),
        default_duration_minutes: sessions["defaultDurationMinutes"].as_i64().unwrap_or(10),
        defaulter_threshold_percent: reports["defaulterThresholdPercent"]
            .as_f64()
            .unwrap_or(75.0),
    })
}

fn setup_get(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let (conn, _) = authed(state, req, ANY_ROLE)?;
    if let Some(raw) = get_optional_str(&req.params, "section") {
        let section = SetupSection::parse(&raw)
            .ok_or_else(|| HandlerErr::bad_params("unknown section"))?;
        return Ok(load_section(conn, section)?);
    }
    let mut all = Map::new();
    for section in SetupSection::ALL {
        all.insert(section.name().to_string(), load_section(conn, section)?);
    }
    Ok(Value::Object(all))
}

fn setup_update(state: &AppState, req: &Request) -> Result<Value, HandlerErr> {
    let (conn, who) = authed(state, req, ADMIN)?;
    let raw = get_required_str(&req.params, "section")?;
    let section =
        SetupSection::parse(&raw).ok_or_else(|| HandlerErr::bad_params("unknown section"))?;
    let patch = req
        .params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("patch must be an object"))?;

    let mut current = load_section(conn, section)?;
    merge_section_patch(section, &mut current, patch).map_err(HandlerErr::bad_params)?;
    db::settings_set_json(conn, section.key(), &current)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    info!(section = section.name(), admin = %who.user_id, "setup updated");
    Ok(json!({ "ok": true, "section": section.name(), "values": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let result = match req.method.as_str() {
        "setup.get" => setup_get(state, req),
        "setup.update" => setup_update(state, req),
        _ => return None,
    };
    Some(respond(&req.id, &req.method, result))
}
