//! # Stream Error Taxonomy
//!
//! Three failure families reach a consumer:
//!
//! - **`TransportError`**: the upstream connection could not be opened, answered
//!   with a non-success status, or broke while reading. Always terminal for the
//!   shared upstream.
//! - **`DecodeError`**: a line arrived that is not a `data:`-framed record. The
//!   stream's `ErrorPolicy` decides what happens next.
//! - **`StreamError::Overflow`**: raised by a single subscription's buffer under
//!   the `ERROR` strategy. Siblings and the upstream are not affected.

use thiserror::Error;

/// Failures of the line transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The request could not be built (bad URL, invalid header, ...).
    #[error("invalid request: {0}")]
    Request(String),

    /// The connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The server answered with a non-success status.
    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    /// The response body broke while being read.
    #[error("read failure: {0}")]
    Read(String),
}

/// Failures while turning a line into a record.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The line does not start with the `data:` framing prefix.
    #[error("line is missing the `data:` prefix: {0:?}")]
    MissingPrefix(String),

    /// The payload after the prefix is not a valid record.
    #[error("malformed payload: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for DecodeError {
    fn from(e: serde_json::Error) -> Self {
        DecodeError::Malformed(e.to_string())
    }
}

/// The error a subscriber observes as its terminal signal.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// The subscriber fell behind while using the `ERROR` strategy.
    #[error("overflow: consumer could not keep up (capacity {capacity})")]
    Overflow { capacity: usize },
}

impl StreamError {
    /// Upstream failures are resolved by the stream's `ErrorPolicy`; overflow is not.
    pub fn is_upstream(&self) -> bool {
        !matches!(self, StreamError::Overflow { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_is_local_to_the_subscription() {
        assert!(!StreamError::Overflow { capacity: 1 }.is_upstream());
        assert!(StreamError::from(TransportError::Read("reset".into())).is_upstream());
        assert!(StreamError::from(DecodeError::MissingPrefix("x".into())).is_upstream());
    }

    #[test]
    fn status_error_names_the_url() {
        let e = TransportError::Status { status: 503, url: "http://h/flowable".into() };
        assert_eq!(e.to_string(), "unexpected status 503 from http://h/flowable");
    }
}
