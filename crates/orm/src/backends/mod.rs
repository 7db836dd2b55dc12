//! Database Backend Abstractions
//!
//! This module provides the database handle abstraction the ORM core talks to
//! (PostgreSQL, MySQL, SQLite) and its sqlx-backed implementation.

pub mod core;
pub mod sqlx_any;

// Re-export core traits and types
pub use core::*;
pub use sqlx_any::SqlxConnection;

use crate::error::{ModelError, OrmResult};

/// Database backend type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseBackendType {
    PostgreSQL,
    MySQL,
    SQLite,
}

impl DatabaseBackendType {
    /// Detect the backend from a connection URL scheme
    pub fn from_url(url: &str) -> OrmResult<Self> {
        let scheme = url.split(':').next().unwrap_or_default();
        scheme
            .parse()
            .map_err(|e: String| ModelError::Configuration(format!("{} (url: {})", e, url)))
    }
}

impl std::fmt::Display for DatabaseBackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseBackendType::PostgreSQL => write!(f, "postgresql"),
            DatabaseBackendType::MySQL => write!(f, "mysql"),
            DatabaseBackendType::SQLite => write!(f, "sqlite"),
        }
    }
}

impl std::str::FromStr for DatabaseBackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgresql" | "postgres" | "pgsql" => Ok(DatabaseBackendType::PostgreSQL),
            "mysql" | "mariadb" => Ok(DatabaseBackendType::MySQL),
            "sqlite" => Ok(DatabaseBackendType::SQLite),
            _ => Err(format!("Unsupported database backend: {}", s)),
        }
    }
}
