//! Error types for the ORM system
//!
//! Provides error handling for schema assembly, value validation,
//! relationship resolution and statement execution.

use std::fmt;

use crate::config::ConfigError;

/// Result type alias for model operations
pub type ModelResult<T> = Result<T, ModelError>;

/// ORM error type alias
pub type OrmError = ModelError;

/// ORM result type alias
pub type OrmResult<T> = ModelResult<T>;

/// Error types for ORM operations
#[derive(Debug, Clone, PartialEq)]
pub enum ModelError {
    /// Model skeleton could not be resolved or a definition is malformed
    Schema(String),
    /// A field value failed validation (required field missing, bad shape)
    Validation(String),
    /// A relation value references a record of the wrong model
    Relationship(String),
    /// A referenced row does not exist
    NotFound(String),
    /// The database rejected a statement because of a constraint
    Constraint(String),
    /// Any other database error
    Database(String),
    /// Query building error
    Query(String),
    /// Connection error
    Connection(String),
    /// Transaction error
    Transaction(String),
    /// Serialization/deserialization error
    Serialization(String),
    /// Configuration error
    Configuration(String),
}

impl ModelError {
    /// True when the database refused a statement on constraint grounds
    pub fn is_constraint(&self) -> bool {
        matches!(self, ModelError::Constraint(_))
    }
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::Schema(msg) => write!(f, "Schema error: {}", msg),
            ModelError::Validation(msg) => write!(f, "Validation error: {}", msg),
            ModelError::Relationship(msg) => write!(f, "Relationship error: {}", msg),
            ModelError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ModelError::Constraint(msg) => write!(f, "Constraint violation: {}", msg),
            ModelError::Database(msg) => write!(f, "Database error: {}", msg),
            ModelError::Query(msg) => write!(f, "Query error: {}", msg),
            ModelError::Connection(msg) => write!(f, "Connection error: {}", msg),
            ModelError::Transaction(msg) => write!(f, "Transaction error: {}", msg),
            ModelError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            ModelError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for ModelError {}

// Convert from sqlx errors
impl From<sqlx::Error> for ModelError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::error::ErrorKind;

        match &err {
            sqlx::Error::Database(db_err) => match db_err.kind() {
                ErrorKind::NotNullViolation
                | ErrorKind::ForeignKeyViolation
                | ErrorKind::UniqueViolation
                | ErrorKind::CheckViolation => ModelError::Constraint(db_err.message().to_string()),
                _ if db_err.message().to_lowercase().contains("constraint") => {
                    ModelError::Constraint(db_err.message().to_string())
                }
                _ => ModelError::Database(err.to_string()),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                ModelError::Connection(err.to_string())
            }
            _ => ModelError::Database(err.to_string()),
        }
    }
}

// Convert from serde_json errors
impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        ModelError::Serialization(err.to_string())
    }
}

impl From<ConfigError> for ModelError {
    fn from(err: ConfigError) -> Self {
        ModelError::Configuration(err.to_string())
    }
}
