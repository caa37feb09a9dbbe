//! Observability utilities.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::types::ObservabilityConfig;

/// Environment variable switching the log format (`json` for JSON lines).
pub const LOG_FORMAT_ENV: &str = "IZ_LOG_FORMAT";

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Initialize tracing subscriber once for the process.
///
/// Logs go to stderr, or to `log_file` when given (role processes keep
/// stdout for their advertisement channel). The returned guard flushes the
/// file writer on drop and must live as long as the process logs. Log format
/// defaults to plain text and can be switched to JSON via `IZ_LOG_FORMAT=json`
/// or `json_logs`. `RUST_LOG` overrides the configured level.
pub fn init_tracing(config: &ObservabilityConfig, log_file: Option<&Path>) -> Option<WorkerGuard> {
    let mut guard = None;
    TRACING_INIT.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
        let json = config.json_logs
            || std::env::var(LOG_FORMAT_ENV)
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false);

        let (writer, ansi) = match log_file.map(open_log_file) {
            Some(Ok(file)) => {
                let (non_blocking, worker) = tracing_appender::non_blocking(file);
                guard = Some(worker);
                (BoxMakeWriter::new(non_blocking), false)
            }
            Some(Err(err)) => {
                eprintln!("file logging disabled: {err}");
                (BoxMakeWriter::new(std::io::stderr), false)
            }
            None => (BoxMakeWriter::new(std::io::stderr), true),
        };

        let result = if json {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(writer))
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().compact().with_ansi(ansi).with_writer(writer))
                .try_init()
        };

        if let Err(err) = result {
            eprintln!("tracing init skipped: {err}");
        }
    });
    guard
}

fn open_log_file(path: &Path) -> std::io::Result<std::fs::File> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_tracing_is_idempotent() {
        let config = ObservabilityConfig::default();
        init_tracing(&config, None);
        assert!(init_tracing(&config, None).is_none());
    }

    #[test]
    fn log_file_is_created_with_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log").join("alpha-controller.log");
        open_log_file(&path).unwrap();
        assert!(path.exists());
    }
}
