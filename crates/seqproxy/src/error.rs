//! Fatal error taxonomy for a harness run.
//!
//! Every variant ends the run. Nothing here is retried: a mismatch means the
//! plan author's expectations were violated, and the process reports it and
//! exits non-zero.

use std::time::Duration;

/// Errors that terminate a harness run.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("unexpected request {received}: all {total} assertions were already consumed")]
    PlanExhausted { total: usize, received: usize },

    #[error("test {index}: expected request to {expected:?}, got {actual:?}")]
    PathMismatch {
        index: usize,
        expected: String,
        actual: String,
    },

    #[error("test {index}: required header {name} not found")]
    HeaderMissing { index: usize, name: String },

    #[error("test {index}: header {name} had incorrect value {actual:?} != {expected:?}")]
    HeaderMismatch {
        index: usize,
        name: String,
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("failed to read request body: {0}")]
    RequestBody(String),

    #[error("forward request to {target} failed: {reason}")]
    UpstreamForward { target: String, reason: String },

    #[error("connection takeover is not supported by this transport")]
    TakeoverUnsupported,

    #[error("response relay failed: {0}")]
    ResponseRelay(#[source] std::io::Error),

    #[error("failed to bind port {0}: {1}")]
    ListenerBind(u16, String),

    #[error("command {command:?} failed: {reason}")]
    DriverCommand { command: String, reason: String },

    #[error("test timed out after {0:?}")]
    Timeout(Duration),

    #[error("server stopped before the plan completed")]
    ServerStopped,
}

impl HarnessError {
    /// Index of the assertion this error was raised against, if any.
    pub fn assertion_index(&self) -> Option<usize> {
        match self {
            HarnessError::PathMismatch { index, .. }
            | HarnessError::HeaderMissing { index, .. }
            | HarnessError::HeaderMismatch { index, .. } => Some(*index),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_mismatch_names_both_paths() {
        let err = HarnessError::PathMismatch {
            index: 0,
            expected: "/a".to_string(),
            actual: "/b".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("\"/a\""));
        assert!(msg.contains("\"/b\""));
    }

    #[test]
    fn test_header_missing_names_header() {
        let err = HarnessError::HeaderMissing {
            index: 3,
            name: "X-Token".to_string(),
        };
        assert_eq!(err.to_string(), "test 3: required header X-Token not found");
        assert_eq!(err.assertion_index(), Some(3));
    }

    #[test]
    fn test_timeout_message() {
        let err = HarnessError::Timeout(Duration::from_secs(1));
        assert_eq!(err.to_string(), "test timed out after 1s");
        assert_eq!(err.assertion_index(), None);
    }
}
