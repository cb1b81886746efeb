//! Log output: stdout, plus an optional append-only file.

use anyhow::Context;
use std::{
    fs::{File, OpenOptions},
    path::Path,
    sync::Mutex,
};
use tracing::Level;
use tracing_subscriber::{
    filter::LevelFilter, fmt::time::ChronoLocal, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Installs the global subscriber. When `log_file` is set, every line written
/// to stdout is also appended to that file without ANSI colors.
pub fn init_tracing(level: Level, log_file: Option<&Path>) -> anyhow::Result<()> {
    let file_layer = log_file
        .map(|path| {
            open_log_file(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))
        })
        .transpose()?
        .map(|file| {
            tracing_subscriber::fmt::layer()
                .with_timer(ChronoLocal::rfc_3339())
                .with_ansi(false)
                .with_writer(Mutex::new(file))
        });

    tracing_subscriber::registry()
        .with(LevelFilter::from_level(level))
        .with(tracing_subscriber::fmt::layer().with_timer(ChronoLocal::rfc_3339()))
        .with(file_layer)
        .init();
    Ok(())
}

fn open_log_file(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}
