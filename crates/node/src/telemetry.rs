// Path: crates/node/src/telemetry.rs

//! Tracing initialization: one append-only log file per node plus stderr.

use anyhow::{anyhow, Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the global `tracing` subscriber, writing to
/// `<log_dir>/<addr>_<nickname>.log` and to stderr.
///
/// Opening the log file is part of startup: a failure here aborts the
/// process. The returned guard must be kept alive for the file writer's
/// worker thread to keep flushing.
pub fn init_tracing(log_dir: &Path, listen_addr: &str, nickname: &str) -> Result<WorkerGuard> {
    let path = log_dir.join(format!("{listen_addr}_{nickname}.log"));
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("cannot open log file {}", path.display()))?;
    let (writer, guard) = tracing_appender::non_blocking(file);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| anyhow!("cannot install tracing subscriber: {e}"))?;
    Ok(guard)
}
