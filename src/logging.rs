use crate::config::LoggingConfig;
use std::fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Console output plus a daily-rotated JSON log file.
///
/// `RUST_LOG` overrides the configured level. Keep the returned guard alive
/// for the life of the process so buffered file output is flushed.
pub fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    let (file_layer, guard) = match fs::create_dir_all(&config.dir) {
        Ok(()) => {
            let file_appender = tracing_appender::rolling::daily(&config.dir, &config.file_name);
            let (writer, guard) = tracing_appender::non_blocking(file_appender);
            (Some(fmt::layer().json().with_writer(writer)), Some(guard))
        }
        Err(e) => {
            eprintln!("Log directory {} unavailable ({}), logging to console only", config.dir, e);
            (None, None)
        }
    };

    let console_layer = fmt::layer().with_writer(std::io::stdout);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .try_init();

    guard
}
