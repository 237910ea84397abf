//! Logging setup for applications built on the client
//!
//! Libraries in this workspace only emit `tracing` events; binaries call
//! [`setup_logging`] once to install a subscriber. `RUST_LOG` directives are
//! honored on top of the configured level.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{EnvFilter, fmt};

use crate::error::{ClientError, ClientResult};

/// Configuration for the logging system
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// The log level to use
    pub level: Level,
    /// Whether to enable JSON formatting
    pub json: bool,
    /// Whether to include file and line information
    pub file_info: bool,
    /// Whether to log span open/close
    pub log_spans: bool,
    /// Application name, logged at startup
    pub app_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: Level::INFO,
            json: false,
            file_info: false,
            log_spans: false,
            app_name: "rws".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn new(level: Level, app_name: impl Into<String>) -> Self {
        LoggingConfig { level, app_name: app_name.into(), ..Default::default() }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    pub fn with_file_info(mut self, file_info: bool) -> Self {
        self.file_info = file_info;
        self
    }

    pub fn with_spans(mut self, log_spans: bool) -> Self {
        self.log_spans = log_spans;
        self
    }

    /// Level from a `-v` count: 0 warn, 1 info, 2 debug, 3+ trace
    pub fn with_verbosity(self, verbosity: u8) -> Self {
        let level = match verbosity {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        };
        self.with_level(level)
    }
}

/// Install the global subscriber
///
/// Fails if a subscriber is already installed.
pub fn setup_logging(config: &LoggingConfig) -> ClientResult<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(config.level.into())
        .from_env_lossy();

    let span_events = if config.log_spans { FmtSpan::NEW | FmtSpan::CLOSE } else { FmtSpan::NONE };

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(span_events)
        .with_file(config.file_info)
        .with_line_number(config.file_info)
        .with_writer(std::io::stderr);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| ClientError::internal_error(format!("failed to install logger: {e}")))?;

    tracing::debug!(app = %config.app_name, version = crate::VERSION, "Logging initialized");
    Ok(())
}

/// Parse a level name such as `debug` or `WARN`
pub fn parse_log_level(level: &str) -> ClientResult<Level> {
    Level::from_str(level).map_err(|_| ClientError::invalid_configuration("log_level", format!("invalid log level: {level}")))
}
