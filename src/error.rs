//! Error types for the table broker.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Every variant renders to a caller-readable message, because the display text is
//! what ends up in the `error` field of a response envelope.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// SQLite extended result code, when the driver reports one
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Schema error: {message} (object: {object})")]
    Schema { message: String, object: String },

    #[error("Transaction error: {message} (transaction: {transaction_id})")]
    Transaction {
        message: String,
        transaction_id: String,
    },

    #[error("{field} cannot be null")]
    MissingField { field: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Unable to decode mutation payload: {message}")]
    PayloadDecode { message: String },

    #[error("Illegal state: {message}")]
    IllegalState { message: String },

    #[error(
        "shutting down worker ({reason}) -- rolling back all transactions and releasing all connections"
    )]
    ShuttingDown { reason: String },

    #[error("Timeout: {operation} timed out")]
    Timeout { operation: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl BrokerError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional result code.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    /// Create a schema error.
    pub fn schema(message: impl Into<String>, object: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
            object: object.into(),
        }
    }

    /// Create a transaction error.
    pub fn transaction(message: impl Into<String>, transaction_id: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            transaction_id: transaction_id.into(),
        }
    }

    /// Create a missing required field error (`"<field> cannot be null"`).
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a mutation payload decode error.
    pub fn payload_decode(message: impl Into<String>) -> Self {
        Self::PayloadDecode {
            message: message.into(),
        }
    }

    /// Create an illegal state error.
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState {
            message: message.into(),
        }
    }

    /// Create the teardown error used to fail queued work.
    pub fn shutting_down(reason: impl Into<String>) -> Self {
        Self::ShuttingDown {
            reason: reason.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }
}

/// Convert sqlx errors to BrokerError.
impl From<sqlx::Error> for BrokerError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => BrokerError::connection(
                msg.to_string(),
                "Check the database URL and file permissions",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                BrokerError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => BrokerError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => BrokerError::timeout("connection pool acquire"),
            sqlx::Error::PoolClosed => BrokerError::connection(
                "Connection pool is closed",
                "Rebind the database service",
            ),
            sqlx::Error::Io(io_err) => BrokerError::connection(
                format!("I/O error: {}", io_err),
                "Check that the database file is reachable",
            ),
            sqlx::Error::Protocol(msg) => BrokerError::connection(
                format!("Protocol error: {}", msg),
                "Check database driver compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                BrokerError::schema(format!("Column not found: {}", col), col.to_string())
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => BrokerError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                BrokerError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => {
                BrokerError::internal(format!("Decode error: {}", source))
            }
            sqlx::Error::WorkerCrashed => BrokerError::internal("Database worker crashed"),
            _ => BrokerError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        BrokerError::invalid_input(format!("Malformed JSON: {}", err))
    }
}

/// Result type alias for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;
