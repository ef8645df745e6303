//! Centralized error types for A3S Pipeline
//!
//! Two layers of errors exist:
//!
//! - [`PipelineError`] — everything the crate can fail with, from
//!   configuration problems found at compile time to transport failures.
//! - [`HandlerError`] — a structured, client-safe error returned by a handler
//!   in the chain. Only its status code ever reaches the remote client; the
//!   id, trace and wrapped source are for the logs.

use crate::observability::LogField;
use http::StatusCode;
use std::panic::Location;
use thiserror::Error;

/// Pipeline error types
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Invalid configuration, reported with the offending rule's location
    #[error("Configuration error at {location}: {message}")]
    Config { location: String, message: String },

    /// Structured error raised by a handler
    #[error(transparent)]
    Handler(#[from] HandlerError),

    /// HTTP request to an upstream failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl PipelineError {
    /// Configuration error at the given location
    pub fn config(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            location: location.into(),
            message: message.into(),
        }
    }

    /// Re-anchor an error under a parent location.
    ///
    /// Config errors get `location` prefixed to their own location; any other
    /// error raised while compiling becomes a config error at `location`.
    pub fn at(self, location: &str) -> Self {
        match self {
            Self::Config {
                location: inner,
                message,
            } => {
                let location = if inner.is_empty() {
                    location.to_string()
                } else if inner.starts_with('[') {
                    format!("{}{}", location, inner)
                } else {
                    format!("{}.{}", location, inner)
                };
                Self::Config { location, message }
            }
            other => Self::Config {
                location: location.to_string(),
                message: other.to_string(),
            },
        }
    }
}

/// Convenience Result type alias
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Boxed error carried inside a [`HandlerError`]
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A structured error produced while handling a request.
///
/// The status code is safe to expose to the client. The id correlates the
/// client-visible failure with the error log line; the trace records where in
/// the crate the error was raised.
#[derive(Debug)]
pub struct HandlerError {
    /// Status code to respond with
    pub status: StatusCode,
    /// Opaque identifier, unique per error
    pub id: String,
    /// Source location that raised the error
    pub trace: String,
    /// Underlying reason, if any
    pub source: Option<BoxError>,
}

impl HandlerError {
    /// Create a handler error wrapping `source`
    #[track_caller]
    pub fn new(status: StatusCode, source: impl Into<BoxError>) -> Self {
        Self::build(status, Some(source.into()), Location::caller())
    }

    /// Create a handler error with only a status code
    #[track_caller]
    pub fn status(status: StatusCode) -> Self {
        Self::build(status, None, Location::caller())
    }

    fn build(status: StatusCode, source: Option<BoxError>, caller: &Location<'_>) -> Self {
        Self {
            status,
            id: uuid::Uuid::new_v4().simple().to_string(),
            trace: format!("{}:{}", caller.file(), caller.line()),
            source,
        }
    }

    /// The message used in logs: the wrapped reason, or the status text
    pub fn message(&self) -> String {
        match &self.source {
            Some(source) => source.to_string(),
            None => self.to_string(),
        }
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{id={}}} {}: ", self.id, self.trace)?;
        match &self.source {
            Some(source) => write!(f, "{}", source),
            None => write!(
                f,
                "{} {}",
                self.status.as_u16(),
                self.status.canonical_reason().unwrap_or("")
            ),
        }
    }
}

impl std::error::Error for HandlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<PipelineError> for HandlerError {
    #[track_caller]
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Handler(inner) => inner,
            other => HandlerError::new(StatusCode::INTERNAL_SERVER_ERROR, other),
        }
    }
}

/// Values used to log a failed request
#[derive(Debug, Clone)]
pub struct ErrorLogValues {
    /// Status code the client receives
    pub status: StatusCode,
    /// Log message
    pub message: String,
    /// Extra structured fields
    pub fields: Vec<LogField>,
}

impl ErrorLogValues {
    /// Look up a structured field by key
    pub fn field(&self, key: &str) -> Option<&serde_json::Value> {
        self.fields.iter().find(|f| f.key == key).map(|f| &f.value)
    }
}

/// Inspect `err` and derive the status, message and structured fields to log.
///
/// Handler errors carry their own status, id and trace; anything else is a
/// 500 with the error's text and no extra fields.
pub fn log_values(err: &PipelineError) -> ErrorLogValues {
    match err {
        PipelineError::Handler(handler_err) => ErrorLogValues {
            status: handler_err.status,
            message: match &handler_err.source {
                Some(source) => source.to_string(),
                None => err.to_string(),
            },
            fields: vec![
                LogField::new("status", handler_err.status.as_u16()),
                LogField::new("err_id", handler_err.id.as_str()),
                LogField::new("err_trace", handler_err.trace.as_str()),
            ],
        },
        other => ErrorLogValues {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: other.to_string(),
            fields: Vec::new(),
        },
    }
}
