//! Process-wide tracing setup.

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LogSettings;
use crate::{Error, Result};

/// JSON logs to stdout filtered by `RUST_LOG` (default `info`), plus an
/// optional append-only log file with its own level.
#[tracing::instrument(level = "info", skip_all)]
pub fn init(settings: &LogSettings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout = tracing_subscriber::fmt::layer()
        .json()
        .with_target(true)
        .with_filter(filter);

    let file = match &settings.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| Error::backend(format!("open log file {}", path.display()), e))?;
            let level = LevelFilter::from_level(settings.file_level.as_tracing());
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(level),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(stdout)
        .with(file)
        .try_init()
        .map_err(|e| Error::BackendMessage(format!("tracing already initialized: {e}")))
}
