//! Tracing subscriber bootstrap.
//!
//! Format and level come from configuration; `RUST_LOG` still wins when
//! set. When a log file is configured, output goes through a non-blocking
//! appender whose guard must live as long as the process.

use tracing_subscriber::EnvFilter;

use crate::domain::models::config::LoggingConfig;

/// Initialise the global subscriber. Returns the appender guard when
/// logging to a file; dropping it flushes and stops the writer.
pub fn init(config: &LoggingConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.clone()));

    match &config.file {
        Some(path) => {
            let path = std::path::Path::new(path);
            let directory = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let file_name = path
                .file_name()
                .map_or_else(|| "cellplane.log".into(), |n| n.to_string_lossy().into_owned());
            let appender = tracing_appender::rolling::daily(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);

            if config.format == "json" {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(writer)
                    .json()
                    .init();
            } else {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(writer)
                    .with_ansi(false)
                    .init();
            }
            Some(guard)
        }
        None => {
            if config.format == "json" {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(std::io::stderr)
                    .json()
                    .init();
            } else {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_writer(std::io::stderr)
                    .init();
            }
            None
        }
    }
}
