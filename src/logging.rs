use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "info";

/// Installs the global subscriber. Output goes to stderr: stdout carries the IPC stream.
pub fn init(directive: Option<&str>) {
    let (filter, rejected) = match directive {
        Some(d) => match EnvFilter::try_new(d) {
            Ok(f) => (f, None),
            Err(e) => (EnvFilter::new(DEFAULT_FILTER), Some(e.to_string())),
        },
        None => (
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
            None,
        ),
    };

    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();

    if let Some(e) = rejected {
        tracing::warn!("invalid log filter, using {DEFAULT_FILTER}: {e}");
    }
}
