//! Subscriber setup for binaries embedding the runner.
//!
//! Log lines go through the progress bar writer, so they never tear the
//! task progress bars drawn by the runner.

use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Environment variable holding filter directives, e.g. `assetline=debug`.
pub const LOG_ENV: &str = "ASSETLINE_LOG";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

fn filter(level: Option<LogLevel>) -> anyhow::Result<EnvFilter> {
    if let Some(level) = level {
        return Ok(EnvFilter::try_new(level.as_directive())?);
    }

    match std::env::var(LOG_ENV) {
        Ok(directives) if !directives.trim().is_empty() => Ok(EnvFilter::try_new(directives)?),
        _ => Ok(EnvFilter::new("info")),
    }
}

/// Installs the global subscriber. An explicit level wins over the
/// directives in [`LOG_ENV`], which win over the `info` default.
pub fn init_logging(level: Option<LogLevel>) -> anyhow::Result<()> {
    let indicatif = IndicatifLayer::new();

    let fmt = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(indicatif.get_stderr_writer());

    tracing_subscriber::registry()
        .with(filter(level)?)
        .with(fmt)
        .with(indicatif)
        .try_init()?;

    Ok(())
}
