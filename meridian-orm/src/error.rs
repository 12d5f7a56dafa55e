//! # Error Handling Module
//!
//! Central error type for Meridian ORM. Programmer errors (unknown attribute,
//! missing primary key) are expected to panic or propagate through `Result`
//! rather than being silently swallowed; everything reachable from a running
//! application is represented here so callers can match on it.

use thiserror::Error;

/// The main error type for Meridian ORM operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Data validation failed before or after a database operation.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// A Rust value could not be converted to or from its database representation.
    #[error("type conversion error: {0}")]
    Conversion(String),

    /// An argument passed to an ORM method failed validation (programmer error).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Wrapped `sqlx` error, for anything not already translated into a more
    /// specific variant below.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// `find!`/`first!`/`sole` found no matching row.
    #[error("record not found")]
    NotFound,

    /// `sole`/`find_sole_by` matched more than one row.
    #[error("expected exactly one record, found more than one")]
    NotUnique,

    /// `save!` was called and validation failed or a `before_*` callback halted.
    #[error("record not saved: {0}")]
    RecordNotSaved(String),

    /// `destroy!` was halted by a `before_destroy` callback.
    #[error("record not destroyed: {0}")]
    RecordNotDestroyed(String),

    /// Optimistic lock version mismatch on update (see `lock_version`).
    #[error("stale object: expected lock_version {expected}, row has a different value")]
    StaleObjectError {
        /// The lock_version the in-memory instance believed was current.
        expected: i64,
    },

    /// A pool could not produce a healthy connection within its budget.
    #[error("connection error: {0}")]
    ConnectionError(String),

    /// No adapter could be resolved for a `(database, role, shard)` key.
    #[error("no adapter registered for database={database:?} role={role:?} shard={shard:?}")]
    NoAdapterError {
        /// Logical database name requested.
        database: String,
        /// Role requested (`primary`, `writing`, `reading`).
        role: String,
        /// Shard name requested, if any.
        shard: Option<String>,
    },

    /// A pessimistic lock could not be acquired before the statement timeout.
    #[error("lock wait timeout")]
    LockWaitTimeoutError,

    /// The database reported a deadlock; the core does not auto-retry these.
    #[error("deadlock detected")]
    DeadlockError,

    /// An encrypted attribute could not be decrypted with any configured key.
    #[error("decryption failed for attribute: {0}")]
    DecryptionError(String),

    /// A query's WHERE clause would require joining across shards.
    #[error("cross-shard joins are not supported")]
    CrossShardJoinError,

    /// An operation would require a transaction spanning more than one shard.
    #[error("distributed transactions are not supported; use sagas or eventual consistency")]
    DistributedTransactionError,

    /// A unique constraint was violated at the database level.
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    /// A foreign key constraint was violated at the database level.
    #[error("foreign key constraint violated: {0}")]
    ForeignKeyViolation(String),

    /// A NOT NULL constraint was violated at the database level.
    #[error("not-null constraint violated: {0}")]
    NotNullViolation(String),

    /// A driver-level error that doesn't map to any of the above; the
    /// original message is preserved verbatim.
    #[error("adapter error: {0}")]
    AdapterError(String),
}

impl Error {
    /// Creates an `InvalidData` error from a string slice.
    pub fn invalid_data(msg: impl Into<String>) -> Self {
        Error::InvalidData(msg.into())
    }

    /// Creates an `InvalidArgument` error from a string slice.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Creates a `Conversion` error from a string slice.
    pub fn conversion(msg: impl Into<String>) -> Self {
        Error::Conversion(msg.into())
    }

    /// Classifies a raw `sqlx::Error` into the constraint-violation /
    /// deadlock taxonomy by inspecting the driver-native error code, falling
    /// back to `AdapterError` for anything unrecognized. Connection-level
    /// failures become `ConnectionError`.
    pub fn from_sqlx_classified(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                Error::ConnectionError(err.to_string())
            }
            sqlx::Error::Database(db_err) => {
                let message = db_err.message().to_string();
                let code = db_err.code().map(|c| c.to_string());
                match code.as_deref() {
                    // PostgreSQL SQLSTATE / MySQL errno / SQLite extended codes.
                    Some("23505") | Some("1062") => Error::UniqueViolation(message),
                    Some("23503") | Some("1452") => Error::ForeignKeyViolation(message),
                    Some("23502") | Some("1048") => Error::NotNullViolation(message),
                    Some("40P01") | Some("1213") => Error::DeadlockError,
                    _ if db_err.is_unique_violation() => Error::UniqueViolation(message),
                    _ if db_err.is_foreign_key_violation() => Error::ForeignKeyViolation(message),
                    _ if db_err.is_check_violation() => Error::InvalidData(message),
                    _ => Error::AdapterError(message),
                }
            }
            _ => Error::Database(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_adapter_error_renders_key() {
        let e = Error::NoAdapterError { database: "primary".into(), role: "reading".into(), shard: Some("na".into()) };
        let msg = e.to_string();
        assert!(msg.contains("primary"));
        assert!(msg.contains("reading"));
    }

    #[test]
    fn constructors_wrap_strings() {
        assert!(matches!(Error::invalid_data("x"), Error::InvalidData(s) if s == "x"));
        assert!(matches!(Error::invalid_argument("y"), Error::InvalidArgument(s) if s == "y"));
        assert!(matches!(Error::conversion("z"), Error::Conversion(s) if s == "z"));
    }
}
