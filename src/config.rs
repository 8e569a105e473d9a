use clap::{ArgAction, Parser};
use std::path::PathBuf;

/// Attendance tracking sidecar. Reads one JSON request per line on stdin and
/// writes one JSON response per line on stdout.
#[derive(Debug, Clone, Parser)]
#[command(name = "attendd", version, about)]
pub struct Config {
    /// Workspace directory to open at startup (holds the SQLite database).
    #[arg(long, env = "ATTENDD_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Create the default admin, faculty, and subjects when a workspace opens.
    #[arg(long, env = "ATTENDD_SEED_DEFAULTS", default_value_t = true, action = ArgAction::Set)]
    pub seed_defaults: bool,

    /// Shared secret required by `admin.createDefaults`.
    #[arg(long, env = "ATTENDD_INIT_TOKEN", hide_env_values = true)]
    pub init_token: Option<String>,

    /// Log filter directive, e.g. `debug` or `attendd=trace`. Falls back to RUST_LOG.
    #[arg(long, env = "ATTENDD_LOG")]
    pub log: Option<String>,
}

impl Config {
    pub fn init_token(&self) -> Option<&str> {
        self.init_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_seed_and_have_no_token() {
        let cfg = Config::try_parse_from(["attendd"]).expect("parse");
        assert!(cfg.seed_defaults);
        assert!(cfg.workspace.is_none());
        assert_eq!(cfg.init_token(), None);
    }

    #[test]
    fn flags_override_defaults() {
        let cfg = Config::try_parse_from([
            "attendd",
            "--workspace",
            "/tmp/ws",
            "--seed-defaults",
            "false",
            "--init-token",
            "  ",
        ])
        .expect("parse");
        assert!(!cfg.seed_defaults);
        assert_eq!(cfg.workspace, Some(PathBuf::from("/tmp/ws")));
        assert_eq!(cfg.init_token(), None);
    }
}
