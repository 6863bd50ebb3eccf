//! Subscriber setup for binaries and tests.
//!
//! The arena and writer crates only emit events. Whoever owns `main` calls
//! [`init`] or [`init_from_settings`] once; `RUST_LOG` overrides the
//! configured level when set.
//!
//! # Example
//! ```no_run
//! use daq_core::tracing_init::{self, OutputFormat, TracingConfig};
//! use tracing::Level;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TracingConfig::new(Level::DEBUG).with_format(OutputFormat::Json);
//! tracing_init::init(config)?;
//! # Ok(())
//! # }
//! ```

use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_subscriber::fmt::{self, format::FmtSpan};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::Settings;
use crate::error::{AppResult, DaqError};

/// How events are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Multi-line, coloured.
    Pretty,
    /// One line per event, no colour.
    #[default]
    Compact,
    /// One JSON object per event.
    Json,
}

/// Subscriber options.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Default level when `RUST_LOG` is unset.
    pub level: Level,
    /// Event rendering.
    pub format: OutputFormat,
    /// Emit span open/close events.
    pub span_events: bool,
    /// Prefix events with the thread name.
    pub thread_names: bool,
    /// Colour output (pretty format only).
    pub ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::default(),
            span_events: false,
            // receiver and storage loops run on named threads
            thread_names: true,
            ansi: true,
        }
    }
}

impl TracingConfig {
    /// Defaults at `level`.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Self::default()
        }
    }

    /// Defaults at the level named by `settings.log_level`.
    pub fn from_settings(settings: &Settings) -> AppResult<Self> {
        let level = settings.log_level.parse::<Level>().map_err(|e| {
            DaqError::Configuration(format!("invalid log_level '{}': {e}", settings.log_level))
        })?;
        Ok(Self::new(level))
    }

    /// Use `format`.
    #[must_use]
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Toggle span open/close events.
    #[must_use]
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    /// Toggle colour.
    #[must_use]
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.ansi = enabled;
        self
    }
}

/// [`init`] at the configured log level.
pub fn init_from_settings(settings: &Settings) -> AppResult<()> {
    init(TracingConfig::from_settings(settings)?)
}

/// Install the global subscriber.
///
/// Returns `Ok(())` without changes when a global subscriber already exists.
pub fn init(config: TracingConfig) -> AppResult<()> {
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.level).into())
        .from_env_lossy();
    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let base = fmt::layer()
        .with_span_events(span_events)
        .with_thread_names(config.thread_names);
    let layer = match config.format {
        OutputFormat::Pretty => base.pretty().with_ansi(config.ansi).boxed(),
        OutputFormat::Compact => base.compact().with_ansi(false).boxed(),
        OutputFormat::Json => base.json().boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|e| DaqError::Configuration(format!("failed to install subscriber: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_from_settings() {
        let mut settings = Settings {
            log_level: "debug".to_string(),
            ..Settings::default()
        };
        assert_eq!(TracingConfig::from_settings(&settings).unwrap().level, Level::DEBUG);

        settings.log_level = "WARN".to_string();
        assert_eq!(TracingConfig::from_settings(&settings).unwrap().level, Level::WARN);

        settings.log_level = "loud".to_string();
        assert!(matches!(
            TracingConfig::from_settings(&settings),
            Err(DaqError::Configuration(_))
        ));
    }

    #[test]
    fn test_builder() {
        let config = TracingConfig::new(Level::TRACE)
            .with_format(OutputFormat::Pretty)
            .with_span_events(true)
            .with_ansi(false);

        assert_eq!(config.level, Level::TRACE);
        assert_eq!(config.format, OutputFormat::Pretty);
        assert!(config.span_events);
        assert!(!config.ansi);
        assert!(config.thread_names);
    }

    #[test]
    fn test_second_init_is_ok() {
        assert!(init(TracingConfig::default()).is_ok());
        assert!(init(TracingConfig::new(Level::ERROR)).is_ok());
    }
}
