//! # Structured Logging
//!
//! Installs the tracing subscriber that serves as the log sink for render
//! failures and handled errors, and emits one structured record per failure.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

use crate::context::{ErrorContext, Exception};
use crate::types::{Error, ErrorKind, Result};

static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Configuration for the logging system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// The log level to use (trace, debug, info, warn, error)
    pub level: String,
    /// The service name, also used as the log file prefix
    pub service_name: String,
    /// Whether to use JSON formatting
    pub json_format: bool,
    /// Whether to also write to a daily rolling file
    pub file_output: bool,
    /// The directory to store log files in
    pub log_dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            service_name: "error-pages".to_string(),
            json_format: true,
            file_output: false,
            log_dir: None,
        }
    }
}

impl TryFrom<config::Config> for LoggingConfig {
    type Error = config::ConfigError;

    fn try_from(cfg: config::Config) -> std::result::Result<Self, Self::Error> {
        let mut base = LoggingConfig::default();

        if let Ok(level) = cfg.get::<String>("logging.level") {
            base.level = level;
        }
        if let Ok(service_name) = cfg.get::<String>("logging.service_name") {
            base.service_name = service_name;
        }
        if let Ok(json_format) = cfg.get::<bool>("logging.json_format") {
            base.json_format = json_format;
        }
        if let Ok(file_output) = cfg.get::<bool>("logging.file_output") {
            base.file_output = file_output;
        }
        if let Ok(log_dir) = cfg.get::<String>("logging.log_dir") {
            base.log_dir = Some(log_dir);
        }

        Ok(base)
    }
}

/// Installs the global subscriber.
///
/// Returns the file appender guard when file output is enabled; keep it alive
/// for as long as logs should be flushed. Calling it again is a no-op.
pub fn init_logging(config: LoggingConfig) -> Result<Option<WorkerGuard>> {
    if LOGGING_INITIALIZED.swap(true, Ordering::SeqCst) {
        return Ok(None);
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},warn", config.level)));

    let json_layer = config.json_format.then(|| {
        fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_target(true)
    });
    let text_layer = (!config.json_format).then(|| fmt::layer().with_target(true));

    let mut guard = None;
    let file_layer = match (config.file_output, &config.log_dir) {
        (true, Some(log_dir)) => {
            let appender = RollingFileAppender::new(
                Rotation::DAILY,
                log_dir,
                format!("{}.log", config.service_name),
            );
            let (writer, worker_guard) = tracing_appender::non_blocking(appender);
            guard = Some(worker_guard);
            Some(fmt::layer().with_writer(writer).with_ansi(false))
        }
        _ => None,
    };

    let subscriber = Registry::default()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .with(file_layer);

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        LOGGING_INITIALIZED.store(false, Ordering::SeqCst);
        return Err(Error::new(
            ErrorKind::Internal,
            format!("Failed to set global subscriber: {}", e),
        ));
    }

    info!(
        service = %config.service_name,
        level = %config.level,
        json = %config.json_format,
        "Structured logging initialized"
    );

    Ok(guard)
}

/// Emits one record for a handled failure
pub fn log_failure(context: &ErrorContext) {
    error!(
        incident = %context.incident(),
        code = context.code(),
        message = %context.message(),
        file = %context.file(),
        line = context.line(),
        exception = %context.exception().map(Exception::class).unwrap_or("none"),
        "Error handled"
    );
}
