//! Append-only report and audit outputs with single-writer discipline.

mod audit;
mod report;

pub use audit::ExecutionAuditLog;
pub use report::PositionReportWriter;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("output directory must not be empty")]
    EmptyDirectory,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("operation cancelled")]
    Cancelled,
}

/// Quotes a CSV field when it carries a delimiter, quote, or line break;
/// embedded quotes are doubled.
fn escape_csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
