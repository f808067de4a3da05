//! Storage errors and their classification.

use sqlx::{error::ErrorKind, postgres::PgDatabaseError};
use thiserror::Error;

/// Errors that may occur while reading from or writing to the store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The database driver returned an error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A value could not be serialized into a JSON column.
    #[error("failed to encode {column}: {source}")]
    Encode {
        /// The target column.
        column: &'static str,
        /// The serializer error.
        #[source]
        source: serde_json::Error,
    },

    /// An integer does not fit the column type.
    #[error("value {value} out of range for column {column}")]
    OutOfRange {
        /// The target column.
        column: &'static str,
        /// The rejected value.
        value: u64,
    },
}

/// How a storage error should be handled by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum ErrorClass {
    /// The database or the network is temporarily unavailable.
    #[display("transient")]
    Transient,
    /// A uniqueness, foreign-key, not-null or check constraint rejected the write.
    #[display("constraint")]
    Constraint,
    /// Retrying cannot help: authentication, permissions, schema drift or a codec bug.
    #[display("fatal")]
    Fatal,
}

/// Driver diagnostics attached to a database error, for structured logging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    /// SQLSTATE code.
    pub code: Option<String>,
    /// Violated constraint, if any.
    pub constraint: Option<String>,
    /// Table the error relates to, if any.
    pub table: Option<String>,
    /// Server-provided detail line.
    pub detail: Option<String>,
}

impl StorageError {
    /// Classifies the error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Database(err) => classify(err),
            Self::Encode { .. } | Self::OutOfRange { .. } => ErrorClass::Fatal,
        }
    }

    /// Returns the driver diagnostics if the error originates from the database server.
    pub fn diagnostics(&self) -> Option<Diagnostics> {
        let Self::Database(sqlx::Error::Database(err)) = self else {
            return None;
        };
        Some(Diagnostics {
            code: err.code().map(|code| code.into_owned()),
            constraint: err.constraint().map(str::to_owned),
            table: err.table().map(str::to_owned),
            detail: err
                .try_downcast_ref::<PgDatabaseError>()
                .and_then(|pg| pg.detail())
                .map(str::to_owned),
        })
    }
}

fn classify(err: &sqlx::Error) -> ErrorClass {
    match err {
        sqlx::Error::Database(db) => match db.kind() {
            ErrorKind::UniqueViolation
            | ErrorKind::ForeignKeyViolation
            | ErrorKind::NotNullViolation
            | ErrorKind::CheckViolation => ErrorClass::Constraint,
            _ => db.code().map_or(ErrorClass::Fatal, |code| classify_sqlstate(&code)),
        },
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::WorkerCrashed => ErrorClass::Transient,
        _ => ErrorClass::Fatal,
    }
}

/// Classifies a PostgreSQL SQLSTATE code by its class prefix.
pub fn classify_sqlstate(code: &str) -> ErrorClass {
    match code.get(..2) {
        Some("23") => ErrorClass::Constraint,
        // connection exception, transaction rollback, insufficient resources, operator intervention
        Some("08" | "40" | "53" | "57") => ErrorClass::Transient,
        _ => ErrorClass::Fatal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("23505", ErrorClass::Constraint)]
    #[case("23503", ErrorClass::Constraint)]
    #[case("08006", ErrorClass::Transient)]
    #[case("40001", ErrorClass::Transient)]
    #[case("57P01", ErrorClass::Transient)]
    #[case("28P01", ErrorClass::Fatal)]
    #[case("42P01", ErrorClass::Fatal)]
    #[case("42601", ErrorClass::Fatal)]
    #[case("", ErrorClass::Fatal)]
    fn test_classify_sqlstate(#[case] code: &str, #[case] expected: ErrorClass) {
        assert_eq!(classify_sqlstate(code), expected);
    }

    #[test]
    fn test_driver_errors() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(StorageError::from(sqlx::Error::Io(io)).class(), ErrorClass::Transient);
        assert_eq!(StorageError::from(sqlx::Error::PoolTimedOut).class(), ErrorClass::Transient);
        assert_eq!(StorageError::from(sqlx::Error::RowNotFound).class(), ErrorClass::Fatal);
        assert!(StorageError::from(sqlx::Error::PoolTimedOut).diagnostics().is_none());
    }

    #[test]
    fn test_codec_errors_are_fatal() {
        let err = StorageError::OutOfRange { column: "blocks.height", value: u64::MAX };
        assert_eq!(err.class(), ErrorClass::Fatal);
        assert_eq!(err.to_string(), format!("value {} out of range for column blocks.height", u64::MAX));
    }
}
