//! Error types for the data-access layer.
//!
//! Every failure the manager can report is one variant of [`DbError`], so
//! callers match on the kind instead of parsing messages.

use thiserror::Error;
use tokio_postgres::error::SqlState;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection setup failed: {message}")]
    Setup { message: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, retryable: bool },

    #[error("Timed out after {elapsed_secs}s waiting for a pooled connection")]
    PoolTimedOut { elapsed_secs: u64 },

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Failed to get connection after {attempts} attempts: {message}")]
    Acquisition { attempts: u32, message: String },

    #[error("Schema '{schema}' does not exist")]
    SchemaNotFound { schema: String },

    #[error("Schema change to '{schema}' failed: {message}")]
    Schema { schema: String, message: String },

    #[error("Database error: {message}")]
    Execution {
        message: String,
        /// e.g. "42P01" for undefined table
        sql_state: Option<String>,
        query: String,
        params: Vec<String>,
    },

    #[error("Transaction failed at statement {}: {message}", .index + 1)]
    Transaction {
        index: usize,
        message: String,
        sql_state: Option<String>,
    },

    #[error("Error exporting table '{table}': {message}")]
    Export { table: String, message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },
}

impl DbError {
    pub fn setup(message: impl Into<String>) -> Self {
        Self::Setup {
            message: message.into(),
        }
    }

    /// Create a connection error that the acquisition loop may retry.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            retryable: true,
        }
    }

    /// Create a connection error that retrying cannot fix (bad credentials, unknown database).
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn schema(schema: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Schema {
            schema: schema.into(),
            message: message.into(),
        }
    }

    pub fn export(table: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Export {
            table: table.into(),
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Wrap a failed statement, keeping the text and parameters for diagnostics.
    pub fn execution(err: &tokio_postgres::Error, query: &str, params: &[String]) -> Self {
        Self::Execution {
            message: pg_message(err),
            sql_state: err.code().map(|c| c.code().to_string()),
            query: query.to_string(),
            params: params.to_vec(),
        }
    }

    pub fn transaction(index: usize, err: &tokio_postgres::Error) -> Self {
        Self::Transaction {
            index,
            message: pg_message(err),
            sql_state: err.code().map(|c| c.code().to_string()),
        }
    }

    /// Classify an error raised while opening a new connection.
    pub fn from_connect(err: &tokio_postgres::Error) -> Self {
        let message = pg_message(err);
        match err.code() {
            Some(code) if is_permanent_connect_failure(code) => Self::rejected(message),
            _ => Self::transient(message),
        }
    }

    /// SQLSTATE of the underlying server error, if any.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Execution { sql_state, .. } | Self::Transaction { sql_state, .. } => {
                sql_state.as_deref()
            }
            _ => None,
        }
    }

    /// Whether connection acquisition should be attempted again after this error.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection { retryable, .. } => *retryable,
            Self::PoolTimedOut { .. } => true,
            _ => false,
        }
    }
}

fn is_permanent_connect_failure(code: &SqlState) -> bool {
    *code == SqlState::INVALID_PASSWORD
        || *code == SqlState::INVALID_AUTHORIZATION_SPECIFICATION
        || *code == SqlState::INVALID_CATALOG_NAME
        || *code == SqlState::INSUFFICIENT_PRIVILEGE
}

/// Prefer the server's message over the driver's wrapper text.
pub(crate) fn pg_message(err: &tokio_postgres::Error) -> String {
    match err.as_db_error() {
        Some(db) => db.message().to_string(),
        None => err.to_string(),
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
