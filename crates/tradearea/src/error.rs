//! Error types for tradearea.
//!
//! This module defines all error types used throughout the tradearea crate.
//! Every error knows the HTTP-style status class it belongs to, so callers
//! can report ownership, validation and conflict failures consistently.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for tradearea operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Domain Errors ===
    /// A request payload failed validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A coordinate lies outside the valid latitude/longitude range.
    #[error("invalid coordinates: lat={lat}, lng={lng}")]
    InvalidCoordinates {
        /// Offending latitude.
        lat: f64,
        /// Offending longitude.
        lng: f64,
    },

    /// A bounding box is empty or inverted.
    #[error("invalid bounds: {0}")]
    InvalidBounds(String),

    /// The requested entity does not exist.
    #[error("{entity} {id} not found")]
    NotFound {
        /// Kind of entity (project, location, ...).
        entity: &'static str,
        /// Identifier that was looked up.
        id: i64,
    },

    /// The entity exists but belongs to another owner.
    #[error("access denied to {entity} {id}")]
    Forbidden {
        /// Kind of entity (project, location, ...).
        entity: &'static str,
        /// Identifier that was looked up.
        id: i64,
    },

    /// The request collides with existing state.
    #[error("conflict: {0}")]
    Conflict(String),

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for tradearea operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new invalid input error.
    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a new conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a not-found error for the given entity.
    #[must_use]
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }

    /// Create a forbidden error for the given entity.
    #[must_use]
    pub fn forbidden(entity: &'static str, id: i64) -> Self {
        Self::Forbidden { entity, id }
    }

    /// The HTTP status class this error maps to.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidInput(_)
            | Self::InvalidCoordinates { .. }
            | Self::InvalidBounds(_)
            | Self::ConfigValidation { .. }
            | Self::Json(_) => 400,
            Self::Forbidden { .. } => 403,
            Self::NotFound { .. } => 404,
            Self::Conflict(_) => 409,
            _ => 500,
        }
    }

    /// Check if this error indicates a missing entity.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this error is an ownership violation.
    #[must_use]
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden { .. })
    }

    /// Check if this error is caused by the caller's input.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::not_found("project", 7);
        assert_eq!(err.to_string(), "project 7 not found");

        let err = Error::invalid("name must not be empty");
        assert_eq!(err.to_string(), "invalid input: name must not be empty");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::invalid("x").status_code(), 400);
        assert_eq!(Error::InvalidBounds("x".into()).status_code(), 400);
        assert_eq!(
            Error::InvalidCoordinates {
                lat: 91.0,
                lng: 0.0
            }
            .status_code(),
            400
        );
        assert_eq!(Error::forbidden("location", 1).status_code(), 403);
        assert_eq!(Error::not_found("location", 1).status_code(), 404);
        assert_eq!(Error::conflict("dup").status_code(), 409);
        assert_eq!(Error::internal("bug").status_code(), 500);
    }

    #[test]
    fn test_error_predicates() {
        assert!(Error::not_found("project", 1).is_not_found());
        assert!(!Error::forbidden("project", 1).is_not_found());
        assert!(Error::forbidden("project", 1).is_forbidden());
        assert!(Error::conflict("dup").is_client_error());
        assert!(!Error::internal("bug").is_client_error());
    }

    #[test]
    fn test_conflict_display() {
        let err = Error::conflict("project name already exists");
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("file not found"));
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn test_from_rusqlite_error() {
        let result = rusqlite::Connection::open_with_flags(
            "/nonexistent/path/db.sqlite",
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
        );
        if let Err(sqlite_err) = result {
            let err: Error = sqlite_err.into();
            assert!(matches!(err, Error::DatabaseQuery(_)));
        }
    }

    #[test]
    fn test_from_json_error() {
        let json_result: std::result::Result<i32, serde_json::Error> =
            serde_json::from_str("not valid json");
        if let Err(json_err) = json_result {
            let err: Error = json_err.into();
            assert!(matches!(err, Error::Json(_)));
            assert_eq!(err.status_code(), 400);
        }
    }

    #[test]
    fn test_database_migration_error_display() {
        let err = Error::DatabaseMigration {
            message: "version mismatch".to_string(),
        };
        assert!(err.to_string().contains("version mismatch"));
    }

    #[test]
    fn test_directory_create_error_display() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = Error::DirectoryCreate {
            path: PathBuf::from("/root/forbidden"),
            source: io_err,
        };
        assert!(err.to_string().contains("/root/forbidden"));
    }
}
