//! Logging bootstrap for host applications.

use std::path::Path;

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Install the global tracing subscriber: env-filtered stdout plus a
/// non-blocking daily-rolling file under `log_dir`.
///
/// The returned guard must stay alive for the duration of the process or the
/// file writer stops flushing.
pub fn init<P: AsRef<Path>>(log_dir: P) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir.as_ref())?;

    let file_appender = tracing_appender::rolling::daily(log_dir.as_ref(), "caption_solver.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .init();

    Ok(guard)
}
