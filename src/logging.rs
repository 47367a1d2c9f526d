//! Logging configuration with journald support on Linux.
//!
//! Sets up tracing-based logging that integrates with systemd's journal on
//! Linux systems, with file-based fallback for other platforms or when
//! journald is unavailable.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::Result;

/// Initialize the logging system.
///
/// Log level can be controlled via the `FACEPIPE_LOG` environment variable:
/// - `FACEPIPE_LOG=debug` for verbose output
/// - `FACEPIPE_LOG=info` for standard output (default)
/// - `FACEPIPE_LOG=warn` for warnings and errors only
///
/// With the file backend a [`WorkerGuard`] is returned; the host must keep
/// it alive for the process lifetime or buffered log lines are lost. The
/// journald backend needs no guard and yields `None`.
pub fn init(log_dir: Option<PathBuf>) -> Result<Option<WorkerGuard>> {
    let env_filter =
        EnvFilter::try_from_env("FACEPIPE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(target_os = "linux")]
    {
        // Try to use journald on Linux
        if let Ok(journald_layer) = tracing_journald::layer() {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(journald_layer)
                .init();

            tracing::info!("Logging initialized with journald backend");
            return Ok(None);
        }
    }

    // Fallback to file-based logging
    let log_dir = log_dir.unwrap_or_else(|| {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("facepipe")
            .join("logs")
    });

    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "facepipe.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    tracing::info!("Logging initialized with file backend at {:?}", log_dir);
    Ok(Some(guard))
}
