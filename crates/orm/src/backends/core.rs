//! Core Database Backend Traits
//!
//! This module defines the database handle the ORM core executes statements
//! through, together with the value and row types that cross that boundary.
//! The handle is synchronous: every cascade triggered by relation resolution
//! runs sequentially on the calling thread.

use serde_json::Value as JsonValue;

use crate::backends::DatabaseBackendType;
use crate::error::OrmResult;

/// Abstract database connection trait
pub trait DatabaseConnection {
    /// Backend this connection talks to; selects the SQL builder
    fn backend_type(&self) -> DatabaseBackendType;

    /// Execute a statement and return affected rows count
    fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64>;

    /// Execute a query and return the result rows
    fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<DatabaseRow>>;

    /// Id reported by the backend for the most recent insert
    fn last_insert_id(&mut self) -> OrmResult<Option<i64>>;
}

impl<C: DatabaseConnection + ?Sized> DatabaseConnection for Box<C> {
    fn backend_type(&self) -> DatabaseBackendType {
        (**self).backend_type()
    }

    fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        (**self).execute(sql, params)
    }

    fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<DatabaseRow>> {
        (**self).fetch_all(sql, params)
    }

    fn last_insert_id(&mut self) -> OrmResult<Option<i64>> {
        (**self).last_insert_id()
    }
}

/// One result row, columns kept in select order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatabaseRow {
    columns: Vec<(String, DatabaseValue)>,
}

impl DatabaseRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, column: impl Into<String>, value: DatabaseValue) {
        self.columns.push((column.into(), value));
    }

    /// Get a column value by name
    pub fn get(&self, column: &str) -> Option<&DatabaseValue> {
        self.columns.iter().find(|(name, _)| name == column).map(|(_, v)| v)
    }

    /// Get a column value by position
    pub fn get_by_index(&self, index: usize) -> Option<&DatabaseValue> {
        self.columns.get(index).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &DatabaseValue)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Convert the row into a JSON object
    pub fn to_json(&self) -> JsonValue {
        let map = self
            .columns
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();
        JsonValue::Object(map)
    }
}

impl FromIterator<(String, DatabaseValue)> for DatabaseRow {
    fn from_iter<T: IntoIterator<Item = (String, DatabaseValue)>>(iter: T) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}

/// Database value enumeration for type-safe parameter binding
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int64(i64),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl DatabaseValue {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    /// Integer view of the value, parsing numeric strings
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DatabaseValue::Int64(i) => Some(*i),
            DatabaseValue::Bool(b) => Some(i64::from(*b)),
            DatabaseValue::Float64(f) if f.fract() == 0.0 => Some(*f as i64),
            DatabaseValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Convert to JSON value
    pub fn to_json(&self) -> JsonValue {
        match self {
            DatabaseValue::Null => JsonValue::Null,
            DatabaseValue::Bool(b) => JsonValue::Bool(*b),
            DatabaseValue::Int64(i) => JsonValue::Number(serde_json::Number::from(*i)),
            DatabaseValue::Float64(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            DatabaseValue::String(s) => JsonValue::String(s.clone()),
            DatabaseValue::Bytes(b) => JsonValue::String(String::from_utf8_lossy(b).into_owned()),
        }
    }

    /// Create DatabaseValue from JSON value; arrays and objects are stored as JSON text
    pub fn from_json(json: &JsonValue) -> Self {
        match json {
            JsonValue::Null => DatabaseValue::Null,
            JsonValue::Bool(b) => DatabaseValue::Int64(i64::from(*b)),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    DatabaseValue::Int64(i)
                } else if let Some(f) = n.as_f64() {
                    DatabaseValue::Float64(f)
                } else {
                    DatabaseValue::Null
                }
            }
            JsonValue::String(s) => DatabaseValue::String(s.clone()),
            JsonValue::Array(_) | JsonValue::Object(_) => DatabaseValue::String(json.to_string()),
        }
    }
}

impl From<bool> for DatabaseValue {
    fn from(value: bool) -> Self {
        DatabaseValue::Bool(value)
    }
}

impl From<i32> for DatabaseValue {
    fn from(value: i32) -> Self {
        DatabaseValue::Int64(i64::from(value))
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<f64> for DatabaseValue {
    fn from(value: f64) -> Self {
        DatabaseValue::Float64(value)
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl<T> From<Option<T>> for DatabaseValue
where
    T: Into<DatabaseValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DatabaseValue::Null,
        }
    }
}

/// SQL dialect enumeration for generating database-specific SQL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    PostgreSQL,
    MySQL,
    SQLite,
}

impl SqlDialect {
    /// Get the parameter placeholder style for this dialect
    pub fn parameter_placeholder(&self, index: usize) -> String {
        match self {
            SqlDialect::PostgreSQL => format!("${}", index + 1),
            SqlDialect::MySQL | SqlDialect::SQLite => "?".to_string(),
        }
    }

    /// Get the identifier quote character for this dialect
    pub fn identifier_quote(&self) -> char {
        match self {
            SqlDialect::PostgreSQL | SqlDialect::SQLite => '"',
            SqlDialect::MySQL => '`',
        }
    }
}
