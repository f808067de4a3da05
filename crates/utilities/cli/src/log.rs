//! Tracing subscriber setup.

use crate::CliError;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Maps a `-v` count to the default log level.
pub const fn verbosity_level(verbosity: u8) -> LevelFilter {
    match verbosity {
        | 0 => LevelFilter::WARN,
        | 1 => LevelFilter::INFO,
        | 2 => LevelFilter::DEBUG,
        | _ => LevelFilter::TRACE,
    }
}

/// Installs the global tracing subscriber.
///
/// Without an explicit `filter`, `RUST_LOG` is honoured and falls back to the level given by
/// `verbosity`. With `json` set, events are written as one JSON object per line.
pub fn init_tracing_subscriber(
    verbosity: u8,
    json: bool,
    filter: Option<EnvFilter>,
) -> Result<(), CliError> {
    let filter = filter.unwrap_or_else(|| {
        EnvFilter::builder()
            .with_default_directive(verbosity_level(verbosity).into())
            .from_env_lossy()
    });

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    let result = if json { builder.json().try_init() } else { builder.try_init() };
    result.map_err(|err| CliError::TracingInitialization(err.to_string()))
}
