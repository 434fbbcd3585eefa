//! Tracing setup for processes embedding the frontier.
//!
//! Two outputs: a compact stdout layer and a daily-rotating file under the
//! given directory. Level filtering comes from `RUST_LOG` and defaults to
//! "info".

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global tracing subscriber. The returned guard must stay
/// alive for the life of the process or buffered log lines are dropped.
///
/// Errors when the log directory cannot be created or a subscriber is
/// already installed.
pub fn init_logging<P: AsRef<Path>>(log_dir: P) -> Result<WorkerGuard, Box<dyn std::error::Error>> {
    let log_path = log_dir.as_ref();
    std::fs::create_dir_all(log_path)?;

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;

    let file_appender = tracing_appender::rolling::daily(log_path, "frontier.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_target(true)
        .with_ansi(false)
        .compact();

    let stdout_layer = fmt::layer().with_target(false).compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();

    tracing::debug!("logs written to {}/frontier.log", log_path.display());
    Ok(guard)
}
