//! # Error Policy
//!
//! Decides, once per stream lifetime, what an upstream failure turns into:
//!
//! | Policy       | Reactive analog       | Outcome for subscribers                        |
//! |--------------|-----------------------|------------------------------------------------|
//! | `Propagate`  | `doOnError`           | the error, stream ends `Failed`                |
//! | `Substitute` | `onErrorReturn`       | one fallback record, then completion           |
//! | `Resume`     | `onErrorResumeNext`   | delivery continues from a fallback stream      |
//!
//! Overflow errors never reach the policy; they are settled inside the
//! subscription's own buffer.

use std::fmt;
use std::sync::Arc;

use crate::error::StreamError;
use crate::record::SensorRecord;
use crate::request::StreamRequest;

/// Per-stream reaction to an upstream failure.
#[derive(Debug, Clone, Default)]
pub enum ErrorPolicy {
    /// Surface the error and end the stream in `Failed`.
    #[default]
    Propagate,
    /// Emit this record, then complete normally.
    Substitute(Arc<SensorRecord>),
    /// Switch the remaining delivery to another stream, which carries its own policy.
    Resume(Box<StreamRequest>),
}

/// What the hub does after resolving a failure.
#[derive(Debug, Clone)]
pub enum PolicyAction {
    Fail(StreamError),
    Substitute(Arc<SensorRecord>),
    Resume(StreamRequest),
}

impl ErrorPolicy {
    /// Builds a `Substitute` policy from a plain record.
    pub fn substitute(record: SensorRecord) -> Self {
        ErrorPolicy::Substitute(Arc::new(record))
    }

    /// Builds a `Resume` policy.
    pub fn resume(fallback: StreamRequest) -> Self {
        ErrorPolicy::Resume(Box::new(fallback))
    }

    /// Short stable name, used in stream identity and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ErrorPolicy::Propagate => "propagate",
            ErrorPolicy::Substitute(_) => "substitute",
            ErrorPolicy::Resume(_) => "resume",
        }
    }

    /// Resolves one upstream failure. Overflow is passed through untouched.
    pub fn resolve(&self, error: StreamError) -> PolicyAction {
        if !error.is_upstream() {
            return PolicyAction::Fail(error);
        }
        match self {
            ErrorPolicy::Propagate => PolicyAction::Fail(error),
            ErrorPolicy::Substitute(record) => {
                log::warn!("Upstream failed ({}); substituting fallback record '{}'", error, record.id);
                PolicyAction::Substitute(Arc::clone(record))
            }
            ErrorPolicy::Resume(fallback) => {
                log::warn!("Upstream failed ({}); resuming from {}", error, fallback.url());
                PolicyAction::Resume((**fallback).clone())
            }
        }
    }
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DecodeError, TransportError};
    use url::Url;

    fn transport_error() -> StreamError {
        TransportError::Connect("refused".into()).into()
    }

    #[test]
    fn propagate_fails_with_the_same_error() {
        match ErrorPolicy::Propagate.resolve(transport_error()) {
            PolicyAction::Fail(e) => assert_eq!(e, transport_error()),
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn substitute_yields_the_fallback_record() {
        let policy = ErrorPolicy::substitute(SensorRecord::new("fallback", "now"));
        match policy.resolve(DecodeError::MissingPrefix("junk".into()).into()) {
            PolicyAction::Substitute(r) => assert_eq!(r.id, "fallback"),
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn resume_yields_the_fallback_request() {
        let fallback = StreamRequest::get(Url::parse("http://localhost/flowable").unwrap());
        let policy = ErrorPolicy::resume(fallback.clone());
        match policy.resolve(transport_error()) {
            PolicyAction::Resume(r) => assert_eq!(r.key(), fallback.key()),
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn overflow_bypasses_every_policy() {
        let policy = ErrorPolicy::substitute(SensorRecord::new("fallback", "now"));
        assert!(matches!(
            policy.resolve(StreamError::Overflow { capacity: 1 }),
            PolicyAction::Fail(StreamError::Overflow { .. })
        ));
    }
}
