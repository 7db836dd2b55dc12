//! sqlx-backed database handle
//!
//! Wraps a single `sqlx::AnyConnection` and drives it from a current-thread
//! tokio runtime, exposing the synchronous [`DatabaseConnection`] contract.

use sqlx::any::{AnyArguments, AnyRow};
use sqlx::query::Query;
use sqlx::{Any, AnyConnection, Column, Connection, Row, TypeInfo, ValueRef};
use tokio::runtime::{Builder as RuntimeBuilder, Runtime};

use super::core::{DatabaseConnection, DatabaseRow, DatabaseValue};
use super::DatabaseBackendType;
use crate::error::{ModelError, OrmResult};

/// Synchronous connection over `sqlx::AnyConnection`
pub struct SqlxConnection {
    // declared before the runtime so it is dropped while the runtime is alive
    connection: AnyConnection,
    runtime: Runtime,
    backend: DatabaseBackendType,
    last_insert_id: Option<i64>,
}

impl SqlxConnection {
    /// Open a connection for the given URL
    pub fn connect(url: &str) -> OrmResult<Self> {
        sqlx::any::install_default_drivers();

        let backend = DatabaseBackendType::from_url(url)?;
        let runtime = RuntimeBuilder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| ModelError::Connection(format!("Failed to start runtime: {}", e)))?;

        let connection = runtime
            .block_on(AnyConnection::connect(url))
            .map_err(|e| ModelError::Connection(format!("Failed to connect to {}: {}", backend, e)))?;

        tracing::debug!("Opened {} connection", backend);

        Ok(Self {
            connection,
            runtime,
            backend,
            last_insert_id: None,
        })
    }

    /// Close the underlying connection gracefully
    pub fn close(self) -> OrmResult<()> {
        let Self { connection, runtime, .. } = self;
        runtime.block_on(connection.close())?;
        Ok(())
    }
}

impl DatabaseConnection for SqlxConnection {
    fn backend_type(&self) -> DatabaseBackendType {
        self.backend
    }

    fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        let Self { connection, runtime, .. } = self;
        let result = runtime.block_on(bind_params(sql, params).execute(&mut *connection))?;

        if result.last_insert_id().is_some() {
            self.last_insert_id = result.last_insert_id();
        }
        Ok(result.rows_affected())
    }

    fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<DatabaseRow>> {
        let Self { connection, runtime, .. } = self;
        let rows = runtime.block_on(bind_params(sql, params).fetch_all(&mut *connection))?;

        rows.iter().map(convert_row).collect()
    }

    fn last_insert_id(&mut self) -> OrmResult<Option<i64>> {
        // the Any driver only reports insert ids for MySQL
        let query = match self.backend {
            DatabaseBackendType::PostgreSQL => "SELECT LASTVAL()",
            DatabaseBackendType::SQLite => "SELECT last_insert_rowid()",
            DatabaseBackendType::MySQL => return Ok(self.last_insert_id),
        };
        let rows = self.fetch_all(query, &[])?;
        Ok(rows
            .first()
            .and_then(|row| row.get_by_index(0))
            .and_then(DatabaseValue::as_i64)
            .filter(|id| *id > 0))
    }
}

fn bind_params<'q>(sql: &'q str, params: &'q [DatabaseValue]) -> Query<'q, Any, AnyArguments<'q>> {
    // statements carry variable-length IN lists, caching each text is wasteful
    let mut query = sqlx::query::<Any>(sql).persistent(false);
    for param in params {
        query = match param {
            DatabaseValue::Null => query.bind(Option::<String>::None),
            DatabaseValue::Bool(b) => query.bind(*b),
            DatabaseValue::Int64(i) => query.bind(*i),
            DatabaseValue::Float64(f) => query.bind(*f),
            DatabaseValue::String(s) => query.bind(s.as_str()),
            DatabaseValue::Bytes(b) => query.bind(b.as_slice()),
        };
    }
    query
}

fn convert_row(row: &AnyRow) -> OrmResult<DatabaseRow> {
    row.columns()
        .iter()
        .map(|column| Ok((column.name().to_string(), decode_column(row, column.ordinal())?)))
        .collect()
}

fn decode_column(row: &AnyRow, index: usize) -> OrmResult<DatabaseValue> {
    // typed Option decoding rejects SQL NULL under the Any driver
    let raw = row.try_get_raw(index)?;
    if raw.is_null() || raw.type_info().name() == "NULL" {
        return Ok(DatabaseValue::Null);
    }

    if let Ok(value) = row.try_get::<Option<i64>, _>(index) {
        return Ok(value.map_or(DatabaseValue::Null, DatabaseValue::Int64));
    }
    if let Ok(value) = row.try_get::<Option<f64>, _>(index) {
        return Ok(value.map_or(DatabaseValue::Null, DatabaseValue::Float64));
    }
    if let Ok(value) = row.try_get::<Option<String>, _>(index) {
        return Ok(value.map_or(DatabaseValue::Null, DatabaseValue::String));
    }
    if let Ok(value) = row.try_get::<Option<bool>, _>(index) {
        return Ok(value.map_or(DatabaseValue::Null, DatabaseValue::Bool));
    }
    if let Ok(value) = row.try_get::<Option<i32>, _>(index) {
        return Ok(value.map_or(DatabaseValue::Null, |v| DatabaseValue::Int64(i64::from(v))));
    }
    if let Ok(value) = row.try_get::<Option<i16>, _>(index) {
        return Ok(value.map_or(DatabaseValue::Null, |v| DatabaseValue::Int64(i64::from(v))));
    }
    if let Ok(value) = row.try_get::<Option<f32>, _>(index) {
        return Ok(value.map_or(DatabaseValue::Null, |v| DatabaseValue::Float64(f64::from(v))));
    }
    let value = row.try_get::<Option<Vec<u8>>, _>(index)?;
    Ok(value.map_or(DatabaseValue::Null, DatabaseValue::Bytes))
}
