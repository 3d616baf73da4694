use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

const LOG_FILE_PREFIX: &str = "engine.log";

/// Falls back to `info` when the directive does not parse.
pub fn engine_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

fn file_writer(dir: &Path) -> std::io::Result<(fmt::writer::BoxMakeWriter, WorkerGuard)> {
    std::fs::create_dir_all(dir)?;
    let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    Ok((fmt::writer::BoxMakeWriter::new(writer), guard))
}

/// Installs the global subscriber for a host application.
///
/// The engine only emits `tracing` events. Calling this more than once keeps
/// the first subscriber. Hold the returned guard to keep file output flushing.
pub fn init_tracing(config: &LoggingConfig) -> Option<WorkerGuard> {
    let stdout_layer = fmt::layer().with_target(true);

    let file = config.file_dir.as_deref().and_then(|dir| match file_writer(dir) {
        Ok(pair) => Some(pair),
        Err(err) => {
            eprintln!("log directory {} unavailable: {err}", dir.display());
            None
        }
    });

    match file {
        Some((writer, guard)) => {
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            tracing_subscriber::registry()
                .with(engine_filter(&config.level))
                .with(stdout_layer)
                .with(file_layer)
                .try_init()
                .ok()
                .map(|_| guard)
        }
        None => {
            let _ = tracing_subscriber::registry()
                .with(engine_filter(&config.level))
                .with(stdout_layer)
                .try_init();
            None
        }
    }
}
