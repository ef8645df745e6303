//! Observability — access logging and log fields
//!
//! Structured access log entries, per-host logger routing, and the extra
//! fields handlers attach to a request's log record.

pub mod access_log;
pub mod fields;
pub mod logging;

pub use access_log::{AccessLog, AccessLogEntry, RequestTracker};
pub use fields::{ExtraLogFields, LogField};
pub use logging::LoggerRouting;
