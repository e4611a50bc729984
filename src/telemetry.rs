//! Logging setup
//!
//! Installs the global `tracing` subscriber: an env-filtered console layer
//! and, when a log directory is configured, a daily rolling file layer.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

const DEFAULT_FILTER: &str = "support_chat=info,tower_http=info";

/// Keeps the background log writer alive; flushes pending lines on drop.
pub struct TelemetryGuard {
    _file_guard: Option<WorkerGuard>,
}

pub fn init_telemetry(log_dir: Option<&Path>) -> anyhow::Result<TelemetryGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let console = tracing_subscriber::fmt::layer().with_target(true);

    let (file_layer, file_guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "support_chat.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    Registry::default()
        .with(filter)
        .with(console)
        .with(file_layer)
        .try_init()?;

    Ok(TelemetryGuard { _file_guard: file_guard })
}
