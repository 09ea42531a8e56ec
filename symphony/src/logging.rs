//! Tracing setup for the `symphony` binary.
//!
//! Filtering comes from `RUST_LOG`; when it is unset, `LOG_LEVEL` (e.g. `DEBUG`)
//! applies to the `symphony` target, and the default is `symphony=info`.
//! `LOG_FORMAT=json` switches to one JSON object per line.
//!
//! # Example
//! ```bash
//! RUST_LOG=symphony=debug symphony publish --title "..." --body "..."
//! ```

use anyhow::{Result, anyhow};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Line format for log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl LogFormat {
    /// Parse a `LOG_FORMAT` value; anything other than `json` means text.
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Text,
        }
    }

    pub fn from_env() -> Self {
        Self::from_env_value(std::env::var("LOG_FORMAT").ok().as_deref())
    }
}

/// Filter directive used when `RUST_LOG` is unset.
pub fn default_directive(log_level: Option<&str>) -> String {
    match log_level.map(str::trim).filter(|level| !level.is_empty()) {
        Some(level) => format!("symphony={}", level.to_ascii_lowercase()),
        None => "symphony=info".to_string(),
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(default_directive(std::env::var("LOG_LEVEL").ok().as_deref()))
    })
}

/// Install the global subscriber writing to stderr.
pub fn init(format: LogFormat) {
    let registry = tracing_subscriber::registry().with(env_filter());
    match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(std::io::stderr).compact())
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().with_writer(std::io::stderr).json())
            .init(),
    }
}

/// Install the global subscriber writing each formatted line to `writer`.
///
/// Used by `run` so worker-thread logs travel through the worker's event queue.
pub fn init_queue<W>(format: LogFormat, writer: W) -> Result<()>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let registry = tracing_subscriber::registry().with(env_filter());
    let installed = match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_writer(writer).with_ansi(false).compact())
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().with_writer(writer).json())
            .try_init(),
    };
    installed.map_err(|err| anyhow!("install log subscriber: {err}"))
}
