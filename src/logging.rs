//! `tracing` subscriber setup for the pass's `devirt` events.
//!
//! Per-site decisions are emitted at `debug`, or at `info` when
//! [`DevirtConfig::verbose`] is set, so the subscriber level follows the same switch.

use std::env;
use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::{self, MakeWriter, TestWriter};

use crate::config::DevirtConfig;

/// Target shared by every event the pass and its driver emit.
pub const LOG_TARGET: &str = "devirt";

const FORMAT_ENV: &str = "DEVIRT_LOG_FORMAT";
const LEVEL_ENV: &str = "DEVIRT_LOG_LEVEL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl LogFormat {
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "compact" | "text" => Some(Self::Compact),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogOptions {
    pub format: LogFormat,
    /// Most verbose level let through for the `devirt` target.
    pub level: Level,
}

impl LogOptions {
    /// Options matching where `config` sends per-site events: `debug` when verbose,
    /// otherwise `info` so only run summaries and warnings show.
    #[must_use]
    pub fn for_config(config: &DevirtConfig) -> Self {
        Self {
            format: LogFormat::default(),
            level: if config.verbose {
                Level::DEBUG
            } else {
                Level::INFO
            },
        }
    }

    /// [`Self::for_config`] with `DEVIRT_LOG_FORMAT` and `DEVIRT_LOG_LEVEL` applied.
    #[must_use]
    pub fn from_env(config: &DevirtConfig) -> Self {
        let format = env::var(FORMAT_ENV).ok();
        let level = env::var(LEVEL_ENV).ok();
        Self::for_config(config).with_overrides(format.as_deref(), level.as_deref())
    }

    /// Apply textual overrides, ignoring values that do not parse.
    #[must_use]
    pub fn with_overrides(mut self, format: Option<&str>, level: Option<&str>) -> Self {
        if let Some(format) = format.and_then(LogFormat::parse) {
            self.format = format;
        }
        if let Some(level) = level.and_then(|value| Level::from_str(value).ok()) {
            self.level = level;
        }
        self
    }

    /// Filter directive restricting output to the pass's own target.
    #[must_use]
    pub fn directive(&self) -> String {
        format!("{LOG_TARGET}={}", self.level.as_str().to_ascii_lowercase())
    }
}

/// Build a subscriber for `options` that writes through `writer`.
#[must_use]
pub fn subscriber<W>(
    options: &LogOptions,
    writer: W,
    ansi: bool,
) -> Box<dyn tracing::Subscriber + Send + Sync>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let builder = fmt::fmt()
        .with_env_filter(EnvFilter::new(options.directive()))
        .with_writer(writer)
        .with_ansi(ansi)
        .with_target(true)
        .with_level(true);
    match options.format {
        LogFormat::Json => Box::new(builder.json().finish()),
        LogFormat::Compact => Box::new(builder.compact().finish()),
    }
}

/// Install a stderr subscriber as the global default.
///
/// Returns `false` when another subscriber was already installed; the existing one
/// stays in place.
pub fn init_logging(options: &LogOptions) -> bool {
    use std::io::IsTerminal;

    let ansi = env::var_os("NO_COLOR").is_none() && std::io::stderr().is_terminal();
    tracing::subscriber::set_global_default(subscriber(options, std::io::stderr, ansi)).is_ok()
}

/// Like [`init_logging`], but routes output through the test harness capture.
pub fn init_test_logging(options: &LogOptions) -> bool {
    tracing::subscriber::set_global_default(subscriber(options, TestWriter::new(), false)).is_ok()
}
