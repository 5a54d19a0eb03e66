//! Error types for scap-feed
//!
//! The pipeline distinguishes three kinds of fatal failures so callers can map
//! them to different exit codes:
//! - transient source errors that exhausted the retry budget ([`FetchError`] with
//!   [`FetchError::is_transient`] returning true)
//! - non-retryable client request errors ([`FetchError::ClientRequest`])
//! - destination write errors ([`Error::Database`], [`Error::Sqlx`], [`Error::Io`])
//!
//! Cancellation is reported as [`Error::Cancelled`] and never swallowed.

use thiserror::Error;

/// Result type alias for scap-feed operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for scap-feed
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "chunk_size")
        key: Option<String>,
    },

    /// Fetching from the upstream source failed
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A written JSON document does not conform to its schema
    #[error("JSON validation failed for {name}: {message}")]
    Validation {
        /// Name of the validated document
        name: String,
        /// Description of the first violations
        message: String,
    },

    /// A stored item could not be converted back into its domain type
    #[error("invalid item: {0}")]
    InvalidItem(String),

    /// The run was cancelled before it completed
    #[error("run cancelled")]
    Cancelled,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Errors raised while talking to a paginated upstream source
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport-level HTTP failure (connect, timeout, reset, ...)
    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The upstream answered with a server-side error status
    #[error("server responded with status {status}")]
    ServerStatus {
        /// HTTP status code
        status: u16,
    },

    /// The response body could not be decoded
    #[error("malformed response body: {0}")]
    Decode(String),

    /// The request itself was rejected (4xx); retrying cannot help
    #[error("request rejected with status {status}: {message}")]
    ClientRequest {
        /// HTTP status code
        status: u16,
        /// Message reported by the upstream, if any
        message: String,
    },
}

impl FetchError {
    /// Whether this failure is of a transient kind that may be retried
    pub fn is_transient(&self) -> bool {
        !matches!(self, FetchError::ClientRequest { .. })
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::Config {
            message: format!("invalid URL: {}", e),
            key: Some("base_url".to_string()),
        }
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Writing a chunk failed and its transaction was rolled back
    #[error("failed to write {table}: {reason}")]
    WriteFailed {
        /// Table the write was directed at
        table: &'static str,
        /// Underlying failure
        reason: String,
    },
}

/// Process exit codes for the fatal error kinds
pub mod exit_code {
    /// Unclassified failure
    pub const GENERIC: i32 = 1;
    /// Invalid configuration
    pub const CONFIG: i32 = 2;
    /// Transient source failures exhausted the retry budget
    pub const TRANSIENT_EXHAUSTED: i32 = 3;
    /// The upstream rejected the request (4xx)
    pub const CLIENT_REQUEST: i32 = 4;
    /// Writing to the destination failed
    pub const DESTINATION: i32 = 5;
    /// Output failed schema validation in strict mode
    pub const VALIDATION: i32 = 6;
    /// Interrupted by a signal
    pub const CANCELLED: i32 = 130;
}

impl Error {
    /// Exit code a command line front end should terminate with for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config { .. } => exit_code::CONFIG,
            Error::Fetch(e) if e.is_transient() => exit_code::TRANSIENT_EXHAUSTED,
            Error::Fetch(_) => exit_code::CLIENT_REQUEST,
            Error::Database(_) | Error::Sqlx(_) | Error::Io(_) => exit_code::DESTINATION,
            Error::Validation { .. } => exit_code::VALIDATION,
            Error::Cancelled => exit_code::CANCELLED,
            Error::Serialization(_) | Error::InvalidItem(_) | Error::Other(_) => {
                exit_code::GENERIC
            }
        }
    }

    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Fetch(e) if e.is_transient() => "fetch_failed",
            Error::Fetch(_) => "client_request_error",
            Error::Database(_) | Error::Sqlx(_) => "database_error",
            Error::Io(_) => "io_error",
            Error::Serialization(_) => "serialization_error",
            Error::Validation { .. } => "validation_error",
            Error::InvalidItem(_) => "invalid_item",
            Error::Cancelled => "cancelled",
            Error::Other(_) => "internal_error",
        }
    }
}
