//! ==============================================================================
//! error.rs - typed errors for the shadow twin
//! ==============================================================================
//!
//! purpose:
//!     errors that callers need to tell apart (the dashboard maps them to
//!     http status codes). everything else uses anyhow like the rest of the host.
//!
//! ==============================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TwinError {
    /// name is not one of the known shadow attributes
    #[error("unknown shadow attribute: {0}")]
    UnknownAttribute(String),

    /// attribute exists but is reported by the badge only
    #[error("attribute {0} is report-only")]
    ReportOnly(&'static str),

    /// value does not fit the attribute's kind or range
    #[error("invalid value for {attribute}: {reason}")]
    InvalidValue {
        attribute: &'static str,
        reason: String,
    },

    /// inbound payload could not be decoded
    #[error("malformed payload on {topic}: {source}")]
    Payload {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    /// the shadow actor or transport peer has shut down
    #[error("{0} channel closed")]
    Closed(&'static str),
}

pub type TwinResult<T> = Result<T, TwinError>;
