// src/error.rs

use std::time::Duration;

use thiserror::Error;

/// Rejections raised before any probe traffic is allowed.
///
/// Messages deliberately carry only the offending host and the rule that
/// fired. Resolved addresses of blocked targets stay out of error text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid host '{host}': {reason}")]
    InvalidHost { host: String, reason: String },

    #[error("host '{host}' is not covered by the approved scope")]
    OutOfScope { host: String },

    #[error("host '{host}' did not resolve to any address")]
    UnresolvableHost { host: String },

    #[error("host '{host}' resolves into a blocked network range")]
    PrivateNetworkTarget { host: String },
}

/// Failures of a probe execution after validation has passed.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("run '{run_id}' exhausted its request budget of {max}")]
    RequestBudgetExceeded { run_id: String, max: u32 },

    #[error("probe exceeded its time budget after {elapsed:?}")]
    Timeout { elapsed: Duration },

    #[error("run was cancelled")]
    Cancelled,

    #[error("network error: {0}")]
    Network(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Failures reported by run and evidence store collaborators.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store rejected the write: {0}")]
    Rejected(String),

    #[error("store is unavailable: {0}")]
    Unavailable(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn blocked_target_message_names_host_only() {
        let err = ValidationError::PrivateNetworkTarget {
            host: "internal.example.com".into(),
        };
        let text = err.to_string();
        assert!(text.contains("internal.example.com"));
        assert!(!text.contains("10."));
        assert!(!text.contains("192.168"));
    }

    #[test]
    fn validation_error_converts_into_probe_error() {
        let err: ProbeError = ValidationError::OutOfScope {
            host: "other.org".into(),
        }
        .into();
        assert_eq!(
            err.to_string(),
            "host 'other.org' is not covered by the approved scope"
        );
    }
}
