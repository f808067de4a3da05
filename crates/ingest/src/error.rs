//! Ingestion errors and their failure classification.

use tally_rpc::RpcError;
use tally_storage::{ErrorClass, StorageError};
use thiserror::Error;

/// How a failed cycle is handled by the [`WorkerRunner`](crate::WorkerRunner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum FailureKind {
    /// Endpoints or the database are temporarily unavailable. The cycle is retried on the next
    /// tick and counts towards the worker's consecutive-failure threshold.
    #[display("retryable")]
    Retryable,
    /// Misconfiguration, authentication, permission or schema errors. Terminates the process.
    #[display("fatal")]
    Fatal,
    /// The database rejected a write on a constraint. Terminates the process.
    #[display("constraint_violation")]
    ConstraintViolation,
}

impl FailureKind {
    /// Returns true if the failure terminates the process.
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Retryable)
    }
}

/// Errors raised by an ingestion cycle.
#[derive(Debug, Error)]
pub enum IngestError {
    /// An RPC call failed.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// A storage operation failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The consensus node returned an empty validator set.
    #[error("empty validator set at height {0}")]
    EmptyValidatorSet(u64),
}

impl IngestError {
    /// Classifies the error.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Rpc(err) if err.is_retryable() => FailureKind::Retryable,
            Self::Rpc(_) => FailureKind::Fatal,
            Self::Storage(err) => match err.class() {
                ErrorClass::Transient => FailureKind::Retryable,
                ErrorClass::Constraint => FailureKind::ConstraintViolation,
                ErrorClass::Fatal => FailureKind::Fatal,
            },
            Self::EmptyValidatorSet(_) => FailureKind::Retryable,
        }
    }
}

/// Reasons a [`WorkerRunner`](crate::WorkerRunner) stops before cancellation.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The worker failed on too many consecutive cycles.
    #[error("{worker} stopped after {failures} consecutive failed cycles: {last}")]
    CircuitOpen {
        /// Worker name.
        worker: &'static str,
        /// Consecutive failed cycles.
        failures: u32,
        /// Error of the last cycle.
        #[source]
        last: IngestError,
    },

    /// The worker hit an error that retrying cannot fix.
    #[error("{worker} hit a {kind} error: {source}")]
    Fatal {
        /// Worker name.
        worker: &'static str,
        /// Classification of the error.
        kind: FailureKind,
        /// The error.
        #[source]
        source: IngestError,
    },
}

impl WorkerError {
    /// Returns true if the error must bring the whole process down.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_rpc::{EndpointFailure, Role};

    #[test]
    fn test_rpc_errors() {
        let exhausted = IngestError::Rpc(RpcError::Exhausted {
            role: Role::Execution,
            method: "eth_blockNumber",
            failures: vec![EndpointFailure { url: "http://a".into(), error: "refused".into() }],
        });
        assert_eq!(exhausted.kind(), FailureKind::Retryable);
        let unconfigured = IngestError::Rpc(RpcError::NoEndpoints(Role::Consensus));
        assert_eq!(unconfigured.kind(), FailureKind::Fatal);
    }

    #[test]
    fn test_storage_errors() {
        let timeout = IngestError::from(crate::test_utils::transient_storage_error());
        assert_eq!(timeout.kind(), FailureKind::Retryable);
        let overflow =
            IngestError::from(StorageError::OutOfRange { column: "blocks.height", value: u64::MAX });
        assert_eq!(overflow.kind(), FailureKind::Fatal);
        assert!(overflow.kind().is_terminal());
    }
}
