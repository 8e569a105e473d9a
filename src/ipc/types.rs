use crate::auth::{Principal, Role};
use crate::config::Config;
use crate::db;
use rusqlite::Connection;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    /// Issued by `auth.login`; identifies the caller for role checks.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub config: Config,
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub sessions: HashMap<String, Principal>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            workspace: None,
            db: None,
            sessions: HashMap::new(),
        }
    }

    /// Opens (or creates) the workspace database and makes it current.
    /// Tokens issued against a previous workspace are dropped.
    pub fn open_workspace(&mut self, path: &Path) -> anyhow::Result<Vec<String>> {
        let conn = db::open_db(path)?;
        let seeded = if self.config.seed_defaults {
            db::seed_defaults(&conn)?
        } else {
            Vec::new()
        };
        self.workspace = Some(path.to_path_buf());
        self.db = Some(conn);
        self.sessions.clear();
        info!(workspace = %path.display(), "workspace opened");
        Ok(seeded)
    }

    /// Drops every token held by the given account; returns how many.
    pub fn revoke_user(&mut self, role: Role, user_id: &str) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, p| !(p.role == role && p.user_id == user_id));
        before - self.sessions.len()
    }
}
