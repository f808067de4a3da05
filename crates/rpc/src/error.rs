//! Error types for the failover clients.

use crate::Role;
use thiserror::Error;

/// A single endpoint's failure while serving a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointFailure {
    /// The endpoint that failed.
    pub url: String,
    /// Rendered error returned by the endpoint.
    pub error: String,
}

/// Errors surfaced by a [`FailoverClient`](crate::FailoverClient).
#[derive(Debug, Error)]
pub enum RpcError {
    /// The client was built without any endpoint.
    #[error("no {0} endpoints configured")]
    NoEndpoints(Role),

    /// An endpoint URL could not be parsed.
    #[error("invalid {role} endpoint '{url}': {reason}")]
    InvalidEndpoint {
        /// The role of the client being built.
        role: Role,
        /// The offending input.
        url: String,
        /// Parser error.
        reason: String,
    },

    /// Every endpoint failed for a single call.
    #[error("{role} {method} failed on all {} endpoints: {}", failures.len(), summarize(failures))]
    Exhausted {
        /// The role of the client.
        role: Role,
        /// The RPC method that was attempted.
        method: &'static str,
        /// One entry per attempted endpoint, in attempt order.
        failures: Vec<EndpointFailure>,
    },
}

impl RpcError {
    /// Returns true if the error is caused by endpoint availability and may resolve on its own.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

fn summarize(failures: &[EndpointFailure]) -> String {
    failures.iter().map(|f| format!("[{}: {}]", f.url, f.error)).collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_display_lists_every_endpoint() {
        let err = RpcError::Exhausted {
            role: Role::Execution,
            method: "eth_blockNumber",
            failures: vec![
                EndpointFailure { url: "http://a".into(), error: "refused".into() },
                EndpointFailure { url: "http://b".into(), error: "timeout".into() },
            ],
        };
        assert_eq!(
            err.to_string(),
            "el eth_blockNumber failed on all 2 endpoints: [http://a: refused] [http://b: timeout]"
        );
        assert!(err.is_retryable());
        assert!(!RpcError::NoEndpoints(Role::Consensus).is_retryable());
    }
}
