//! Common error types for FoxProFlow

use thiserror::Error;

/// Common result type for FoxProFlow operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across FoxProFlow services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the error reports a column or table the live schema does not have.
    ///
    /// Writers that adapt to the introspected column set use this to decide
    /// whether a cache refresh and a single retry are worthwhile.
    pub fn is_schema_mismatch(&self) -> bool {
        match self {
            Error::Database(e) => is_schema_mismatch_message(&e.to_string()),
            _ => false,
        }
    }

    /// True when the connection is stuck behind a busy lock or an aborted transaction
    pub fn is_transaction_poisoned(&self) -> bool {
        match self {
            Error::Database(e) => is_poisoned_message(&e.to_string()),
            _ => false,
        }
    }
}

/// Message-level check for schema drift errors
pub fn is_schema_mismatch_message(msg: &str) -> bool {
    let msg = msg.to_lowercase();
    msg.contains("no such column")
        || msg.contains("has no column named")
        || msg.contains("no such table")
        || msg.contains("does not exist")
}

/// Message-level check for lock/aborted-transaction errors
pub fn is_poisoned_message(msg: &str) -> bool {
    let msg = msg.to_lowercase();
    msg.contains("database is locked")
        || msg.contains("current transaction is aborted")
        || msg.contains("in failed sql transaction")
        || msg.contains("cannot start a transaction within a transaction")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_mismatch_messages() {
        assert!(is_schema_mismatch_message("table ops_event_log has no column named severity"));
        assert!(is_schema_mismatch_message("no such column: payload"));
        assert!(is_schema_mismatch_message("relation \"ops.event_log\" does not exist"));
        assert!(!is_schema_mismatch_message("UNIQUE constraint failed"));
    }

    #[test]
    fn test_poisoned_messages() {
        assert!(is_poisoned_message("database is locked"));
        assert!(is_poisoned_message(
            "current transaction is aborted, commands ignored until end of transaction block"
        ));
        assert!(!is_poisoned_message("no such column: x"));
    }

    #[test]
    fn test_non_database_errors_are_not_schema_mismatch() {
        let err = Error::Config("no such column".to_string());
        assert!(!err.is_schema_mismatch());
        assert!(!err.is_transaction_poisoned());
    }
}
