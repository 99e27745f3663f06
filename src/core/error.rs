//! Error type system for Passage
//!
//! This module provides the crate-wide error type with:
//! - The credential taxonomy (validation, conflict, invalid credentials/token)
//! - Storage and signing failures wrapped with operation context
//! - HTTP status code mapping
//! - Client-safe messages with trace IDs

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rusqlite::ErrorCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Access token verification failures.
///
/// Each kind is distinguishable so that an expired token can trigger a
/// client-side refresh while a bad signature cannot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("access token signature is invalid")]
    InvalidSignature,

    #[error("access token uses an unsupported algorithm")]
    UnsupportedAlgorithm,

    #[error("access token has expired")]
    Expired,

    #[error("access token claims are malformed")]
    MalformedClaims,
}

/// Main error type for the Passage system
#[derive(Debug, thiserror::Error)]
pub enum PassageError {
    // System-level errors
    #[error("System initialization failed: {0}")]
    InitializationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Caller-correctable errors
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Token(#[from] TokenError),

    // Storage errors
    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    #[error("Storage error: {0}")]
    StorageError(String),

    // Crypto errors
    #[error("Signing error: {0}")]
    SigningError(String),

    #[error("Hashing error: {0}")]
    HashingError(String),

    // I/O errors
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Task error: {0}")]
    TaskError(String),
}

impl PassageError {
    /// Classify a failed user insert/update: a unique-constraint violation
    /// means the email is already taken.
    pub fn from_user_write(err: rusqlite::Error, email: &str, operation: &str) -> Self {
        if is_unique_violation(&err) {
            PassageError::Conflict(format!("user with email {} already exists", email))
        } else {
            PassageError::StorageError(format!("{}: {}", operation, err))
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            PassageError::ValidationError(_)
            | PassageError::Conflict(_)
            | PassageError::InvalidCredentials => StatusCode::BAD_REQUEST,

            // 401 Unauthorized
            PassageError::InvalidToken(_) | PassageError::Token(_) => StatusCode::UNAUTHORIZED,

            // 404 Not Found
            PassageError::NotFound(_) => StatusCode::NOT_FOUND,

            // 500 Internal Server Error
            PassageError::InitializationError(_)
            | PassageError::ConfigError(_)
            | PassageError::DatabaseError(_)
            | PassageError::StorageError(_)
            | PassageError::SigningError(_)
            | PassageError::HashingError(_)
            | PassageError::IoError(_)
            | PassageError::TaskError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error type name for API responses
    pub fn error_type(&self) -> &'static str {
        match self {
            PassageError::InitializationError(_) => "InitializationError",
            PassageError::ConfigError(_) => "ConfigError",
            PassageError::ValidationError(_) => "ValidationError",
            PassageError::Conflict(_) => "Conflict",
            PassageError::InvalidCredentials => "InvalidCredentials",
            PassageError::InvalidToken(_) => "InvalidToken",
            PassageError::NotFound(_) => "NotFound",
            PassageError::Token(TokenError::InvalidSignature) => "InvalidSignature",
            PassageError::Token(TokenError::UnsupportedAlgorithm) => "UnsupportedAlgorithm",
            PassageError::Token(TokenError::Expired) => "TokenExpired",
            PassageError::Token(TokenError::MalformedClaims) => "MalformedClaims",
            PassageError::DatabaseError(_) | PassageError::StorageError(_) => "StorageError",
            PassageError::SigningError(_) => "SigningError",
            PassageError::HashingError(_) => "HashingError",
            PassageError::IoError(_) => "IoError",
            PassageError::TaskError(_) => "TaskError",
        }
    }

    /// Message that is safe to hand to a client.
    ///
    /// Internal failures never expose their text, and token failures do not
    /// say whether the token was unknown or expired.
    pub fn public_message(&self) -> String {
        match self {
            PassageError::ValidationError(_)
            | PassageError::Conflict(_)
            | PassageError::InvalidCredentials
            | PassageError::NotFound(_)
            | PassageError::Token(_) => self.to_string(),
            PassageError::InvalidToken(_) => "Invalid or expired token".to_string(),
            _ => "Internal server error".to_string(),
        }
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == ErrorCode::ConstraintViolation
                && (e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
        }
        _ => false,
    }
}

impl From<r2d2::Error> for PassageError {
    fn from(err: r2d2::Error) -> Self {
        PassageError::StorageError(format!("connection pool: {}", err))
    }
}

/// Error response structure for API endpoints
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error type identifier
    pub error: String,
    /// Human-readable error message
    pub message: String,
    /// Unique trace ID for this error
    pub trace_id: String,
}

impl ErrorResponse {
    /// Create a new error response, reusing the request's trace ID when
    /// one is in scope
    pub fn new(error: String, message: String) -> Self {
        Self {
            error,
            message,
            trace_id: crate::api::middleware::current_trace_id()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
        }
    }

    /// Create an error response from a PassageError
    pub fn from_error(error: &PassageError) -> Self {
        Self::new(error.error_type().to_string(), error.public_message())
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} (trace_id: {})", self.error, self.message, self.trace_id)
    }
}

impl IntoResponse for PassageError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        let error_response = ErrorResponse::from_error(&self);

        if status_code.is_server_error() {
            tracing::error!(
                error_type = self.error_type(),
                trace_id = %error_response.trace_id,
                status_code = %status_code,
                "Request failed: {}",
                self
            );
        } else {
            tracing::warn!(
                error_type = self.error_type(),
                trace_id = %error_response.trace_id,
                status_code = %status_code,
                "Request rejected"
            );
        }

        (status_code, Json(error_response)).into_response()
    }
}

/// Result type alias for operations that can fail with PassageError
pub type Result<T> = std::result::Result<T, PassageError>;

/// Context extension trait for adding operation context to storage errors
pub trait ErrorContext<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context to an error using a closure
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::fmt::Display,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| PassageError::StorageError(format!("{}: {}", context.into(), e)))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| PassageError::StorageError(format!("{}: {}", f(), e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            PassageError::ValidationError("test".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            PassageError::Conflict("test".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            PassageError::InvalidCredentials.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            PassageError::InvalidToken("test".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            PassageError::Token(TokenError::Expired).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            PassageError::DatabaseError(rusqlite::Error::InvalidQuery).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_token_errors_are_distinguishable() {
        assert_eq!(PassageError::Token(TokenError::Expired).error_type(), "TokenExpired");
        assert_eq!(
            PassageError::Token(TokenError::InvalidSignature).error_type(),
            "InvalidSignature"
        );
        assert_ne!(
            PassageError::Token(TokenError::UnsupportedAlgorithm).error_type(),
            PassageError::Token(TokenError::MalformedClaims).error_type()
        );
    }

    #[test]
    fn test_internal_errors_do_not_leak() {
        let err = PassageError::StorageError("no such table: users".into());
        let response = ErrorResponse::from_error(&err);
        assert_eq!(response.error, "StorageError");
        assert!(!response.message.contains("users"));

        let err = PassageError::InvalidToken("session expired".into());
        assert_eq!(err.public_message(), "Invalid or expired token");
        assert!(!ErrorResponse::from_error(&err).trace_id.is_empty());
    }

    #[test]
    fn test_unique_violation_becomes_conflict() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (email TEXT UNIQUE); INSERT INTO t VALUES ('a@b.c');")
            .unwrap();
        let err = conn
            .execute("INSERT INTO t VALUES ('a@b.c')", [])
            .unwrap_err();
        assert!(matches!(
            PassageError::from_user_write(err, "a@b.c", "insert user"),
            PassageError::Conflict(_)
        ));

        let err = conn.execute("INSERT INTO missing VALUES (1)", []).unwrap_err();
        assert!(matches!(
            PassageError::from_user_write(err, "a@b.c", "insert user"),
            PassageError::StorageError(msg) if msg.starts_with("insert user: ")
        ));
    }

    #[test]
    fn test_error_context() {
        let result: std::result::Result<(), std::io::Error> =
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"));

        let err = result.context("Failed to save session").unwrap_err();
        assert!(err.to_string().contains("Failed to save session"));
        assert!(err.to_string().contains("disk gone"));
    }
}
