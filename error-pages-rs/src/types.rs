//! # Error Types
//!
//! Standardized error type for the error page pipeline. Configuration faults
//! are raised at setup, render faults are converted into a logged "no output",
//! and widget or listener faults propagate out of the handler.

use std::error::Error as StdError;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::markup::MarkupError;

/// A type alias for Result with the error type defaulting to our Error
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Categorizes the failures this crate can raise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Unknown named factory, missing option or unusable setup
    Configuration,
    /// Template parse or bind failure
    Render,
    /// Fault raised by a diagnostic widget
    Widget,
    /// Fault raised by an event listener
    Event,
    /// Input/output error
    IO,
    /// Unexpected or unhandled error
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Configuration => write!(f, "Configuration Error"),
            ErrorKind::Render => write!(f, "Render Error"),
            ErrorKind::Widget => write!(f, "Widget Error"),
            ErrorKind::Event => write!(f, "Event Error"),
            ErrorKind::IO => write!(f, "I/O Error"),
            ErrorKind::Internal => write!(f, "Internal Error"),
        }
    }
}

/// Core error type of the error page pipeline
#[derive(Debug)]
pub struct Error {
    /// The kind of error that occurred
    pub kind: ErrorKind,
    /// Detailed error message
    pub message: String,
    /// Additional context as key-value pairs
    pub context: serde_json::Map<String, serde_json::Value>,
    /// Underlying cause, if any
    pub cause: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the specified kind and message
    pub fn new<S: Into<String>>(kind: ErrorKind, message: S) -> Self {
        Self {
            kind,
            message: message.into(),
            context: serde_json::Map::new(),
            cause: None,
        }
    }

    /// Creates a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    /// Creates a widget error
    pub fn widget<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::Widget, message)
    }

    /// Creates an event listener error
    pub fn event<S: Into<String>>(message: S) -> Self {
        Self::new(ErrorKind::Event, message)
    }

    /// Adds context information to the error
    pub fn context<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Serialize,
    {
        if let Ok(value) = serde_json::to_value(value) {
            self.context.insert(key.into(), value);
        }
        self
    }

    /// Chains this error with its cause
    pub fn cause<E>(mut self, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Tags a fault raised by the widget `name`
    pub fn in_widget(self, name: &str) -> Self {
        self.raised_in(ErrorKind::Widget, "widget", name)
    }

    /// Tags a fault raised by a listener of `event`
    pub fn in_listener(self, event: &str) -> Self {
        self.raised_in(ErrorKind::Event, "event", event)
    }

    /// Configuration faults keep their kind; any other kind is recorded
    /// under `raised_as`.
    fn raised_in(self, kind: ErrorKind, key: &str, name: &str) -> Self {
        let tagged = self.context(key, name);
        if tagged.kind == ErrorKind::Configuration || tagged.kind == kind {
            return tagged;
        }
        let raised_as = tagged.kind;
        Error { kind, ..tagged }.context("raised_as", raised_as)
    }

    /// Returns true for setup faults that must never be suppressed
    pub fn is_configuration(&self) -> bool {
        self.kind == ErrorKind::Configuration
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;

        if !self.context.is_empty() {
            write!(f, " [")?;
            let mut first = true;
            for (k, v) in &self.context {
                if !first {
                    write!(f, ", ")?;
                }
                write!(f, "{}: {}", k, v)?;
                first = false;
            }
            write!(f, "]")?;
        }

        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause.as_ref().map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::new(ErrorKind::IO, err.to_string()).cause(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorKind::Configuration, format!("JSON error: {}", err)).cause(err)
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::new(ErrorKind::Configuration, format!("Invalid options: {}", err)).cause(err)
    }
}

impl From<MarkupError> for Error {
    fn from(err: MarkupError) -> Self {
        Self::new(ErrorKind::Render, err.to_string()).cause(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = Error::configuration("Widget class devBars not registered")
            .context("widget", "devBar");

        assert_eq!(err.kind, ErrorKind::Configuration);
        assert!(err.is_configuration());
        assert_eq!(err.context.get("widget").unwrap(), "devBar");
    }

    #[test]
    fn test_error_display() {
        let err = Error::widget("preprocess failed").context("widget", "callStack");

        let display = format!("{}", err);
        assert!(display.starts_with("Widget Error: preprocess failed"));
        assert!(display.contains("widget: \"callStack\""));
    }

    #[test]
    fn test_faults_are_tagged_by_origin() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "stack.log missing");
        let err = Error::from(io).in_widget("callStack");

        assert_eq!(err.kind, ErrorKind::Widget);
        assert_eq!(err.context.get("widget").unwrap(), "callStack");
        assert_eq!(err.context.get("raised_as").unwrap(), "IO");
        assert!(StdError::source(&err).is_some());

        let err = Error::new(ErrorKind::Internal, "boom").in_listener("errorStartUp");
        assert_eq!(err.kind, ErrorKind::Event);
        assert_eq!(err.context.get("event").unwrap(), "errorStartUp");

        let err = Error::configuration("unknown resource").in_widget("devBar");
        assert!(err.is_configuration());
        assert!(err.context.get("raised_as").is_none());
    }

    #[test]
    fn test_io_error_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "layout.html missing");
        let err: Error = io.into();

        assert_eq!(err.kind, ErrorKind::IO);
        assert!(StdError::source(&err).is_some());
    }
}
