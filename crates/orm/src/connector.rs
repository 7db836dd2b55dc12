//! Database connector
//!
//! The [`Connector`] owns the live connection and the open transaction and
//! hands SQL generation to the [`Builder`] chosen for the backend at connect
//! time. Handles are cheap to clone and share one connection.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::backends::{DatabaseBackendType, DatabaseConnection, DatabaseRow, SqlxConnection};
use crate::builder::{for_backend, Builder, Statement};
use crate::config::ConnectorConfig;
use crate::error::{ModelError, OrmResult};
use crate::search::is_identifier;

/// Shared handle to one database connection
#[derive(Clone)]
pub struct Connector {
    inner: Rc<ConnectorInner>,
}

struct ConnectorInner {
    connection: RefCell<Box<dyn DatabaseConnection>>,
    builder: Box<dyn Builder>,
    backend: DatabaseBackendType,
    in_transaction: Cell<bool>,
    savepoints: Cell<u32>,
}

/// Snapshot of the connector state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectorInfo {
    pub driver: String,
    pub in_transaction: bool,
    pub savepoints: u32,
}

impl Connector {
    /// Connect with a validated configuration
    pub fn connect(config: &ConnectorConfig) -> OrmResult<Self> {
        config.validate()?;
        info!("Connecting to {}", config.redacted_url());
        let connection = SqlxConnection::connect(&config.url)?;
        Self::with_options(
            Box::new(connection),
            &config.init_statements,
            config.begin_transaction,
        )
    }

    /// Connect to `url` with default options
    pub fn open(url: &str) -> OrmResult<Self> {
        Self::connect(&ConnectorConfig::new(url))
    }

    /// Wrap an already open driver connection, opening a transaction
    pub fn with_connection(connection: Box<dyn DatabaseConnection>) -> OrmResult<Self> {
        Self::with_options(connection, &[], true)
    }

    /// Run the dialect's and the caller's init statements, then optionally BEGIN
    pub fn with_options(
        connection: Box<dyn DatabaseConnection>,
        init_statements: &[String],
        begin_transaction: bool,
    ) -> OrmResult<Self> {
        let backend = connection.backend_type();
        let connector = Self {
            inner: Rc::new(ConnectorInner {
                connection: RefCell::new(connection),
                builder: for_backend(backend),
                backend,
                in_transaction: Cell::new(false),
                savepoints: Cell::new(0),
            }),
        };

        for sql in connector.builder().init_statements().iter().chain(init_statements) {
            connector.exec(sql)?;
        }
        if begin_transaction {
            connector.begin()?;
        }
        Ok(connector)
    }

    pub fn builder(&self) -> &dyn Builder {
        self.inner.builder.as_ref()
    }

    pub fn backend_type(&self) -> DatabaseBackendType {
        self.inner.backend
    }

    /// Execute a statement, resolving deferred record ids first
    pub fn execute(&self, statement: &Statement) -> OrmResult<u64> {
        let params = statement.resolve_params()?;
        debug!("Executing: {} {:?}", statement.sql, params);
        self.inner.connection.borrow_mut().execute(&statement.sql, &params)
    }

    pub fn fetch_all(&self, statement: &Statement) -> OrmResult<Vec<DatabaseRow>> {
        let params = statement.resolve_params()?;
        debug!("Fetching: {} {:?}", statement.sql, params);
        self.inner.connection.borrow_mut().fetch_all(&statement.sql, &params)
    }

    /// True when the statement's first column of the first row is positive
    pub fn exists(&self, statement: &Statement) -> OrmResult<bool> {
        let rows = self.fetch_all(statement)?;
        Ok(rows
            .first()
            .and_then(|row| row.get_by_index(0))
            .and_then(|value| value.as_i64())
            .map_or(false, |count| count > 0))
    }

    /// Run parameterless SQL
    pub fn exec(&self, sql: &str) -> OrmResult<()> {
        debug!("Executing: {}", sql);
        self.inner.connection.borrow_mut().execute(sql, &[])?;
        Ok(())
    }

    pub fn last_insert_id(&self) -> OrmResult<i64> {
        self.inner
            .connection
            .borrow_mut()
            .last_insert_id()?
            .ok_or_else(|| ModelError::Database("driver reported no inserted id".to_string()))
    }

    pub fn in_transaction(&self) -> bool {
        self.inner.in_transaction.get()
    }

    pub fn begin(&self) -> OrmResult<()> {
        if self.in_transaction() {
            return Err(ModelError::Transaction("a transaction is already open".to_string()));
        }
        self.exec("BEGIN")?;
        self.inner.in_transaction.set(true);
        self.inner.savepoints.set(0);
        debug!("Transaction started");
        Ok(())
    }

    /// Commit the open transaction and immediately start the next one
    pub fn commit(&self) -> OrmResult<()> {
        if self.in_transaction() {
            self.exec("COMMIT")?;
            self.inner.in_transaction.set(false);
            debug!("Transaction committed");
            self.begin()?;
        }
        Ok(())
    }

    /// Roll back the open transaction; nothing is reopened
    pub fn rollback(&self) -> OrmResult<bool> {
        if !self.in_transaction() {
            return Ok(false);
        }
        self.exec("ROLLBACK")?;
        self.inner.in_transaction.set(false);
        debug!("Transaction rolled back");
        Ok(true)
    }

    /// Commit the open transaction without starting another
    pub fn close(&self) -> OrmResult<()> {
        if self.in_transaction() {
            self.exec("COMMIT")?;
            self.inner.in_transaction.set(false);
            debug!("Transaction committed on close");
        }
        Ok(())
    }

    /// Create a savepoint inside the open transaction
    pub fn savepoint(&self) -> OrmResult<String> {
        self.require_transaction("savepoint")?;
        let count = self.inner.savepoints.get() + 1;
        self.inner.savepoints.set(count);
        let name = format!("sp_{}", count);
        self.exec(&format!("SAVEPOINT {}", name))
            .map_err(|e| ModelError::Transaction(format!("Failed to create savepoint: {}", e)))?;
        Ok(name)
    }

    pub fn rollback_to(&self, savepoint: &str) -> OrmResult<()> {
        self.require_transaction("rollback to savepoint")?;
        Self::check_savepoint(savepoint)?;
        self.exec(&format!("ROLLBACK TO SAVEPOINT {}", savepoint))
            .map_err(|e| ModelError::Transaction(format!("Failed to rollback to savepoint: {}", e)))
    }

    pub fn release(&self, savepoint: &str) -> OrmResult<()> {
        self.require_transaction("release savepoint")?;
        Self::check_savepoint(savepoint)?;
        self.exec(&format!("RELEASE SAVEPOINT {}", savepoint))
            .map_err(|e| ModelError::Transaction(format!("Failed to release savepoint: {}", e)))
    }

    fn require_transaction(&self, action: &str) -> OrmResult<()> {
        if self.in_transaction() {
            Ok(())
        } else {
            Err(ModelError::Transaction(format!("cannot {} outside a transaction", action)))
        }
    }

    fn check_savepoint(name: &str) -> OrmResult<()> {
        if is_identifier(name) {
            Ok(())
        } else {
            Err(ModelError::Transaction(format!("invalid savepoint name '{}'", name)))
        }
    }

    pub fn info(&self) -> ConnectorInfo {
        ConnectorInfo {
            driver: self.backend_type().to_string(),
            in_transaction: self.in_transaction(),
            savepoints: self.inner.savepoints.get(),
        }
    }

    pub fn ptr_eq(&self, other: &Connector) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Drop for ConnectorInner {
    fn drop(&mut self) {
        if self.in_transaction.get() {
            warn!("Connector dropped with an open transaction - rolling back");
            if let Err(e) = self.connection.get_mut().execute("ROLLBACK", &[]) {
                warn!("Rollback on drop failed: {}", e);
            }
        }
    }
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("backend", &self.inner.backend)
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::DatabaseValue;

    /// Driver double that records every statement
    #[derive(Default)]
    struct Script {
        log: Rc<RefCell<Vec<String>>>,
    }

    impl DatabaseConnection for Script {
        fn backend_type(&self) -> DatabaseBackendType {
            DatabaseBackendType::SQLite
        }

        fn execute(&mut self, sql: &str, _params: &[DatabaseValue]) -> OrmResult<u64> {
            self.log.borrow_mut().push(sql.to_string());
            Ok(0)
        }

        fn fetch_all(&mut self, sql: &str, _params: &[DatabaseValue]) -> OrmResult<Vec<DatabaseRow>> {
            self.log.borrow_mut().push(sql.to_string());
            Ok(vec![std::iter::once(("count".to_string(), DatabaseValue::Int64(1))).collect()])
        }

        fn last_insert_id(&mut self) -> OrmResult<Option<i64>> {
            Ok(None)
        }
    }

    fn connector() -> (Connector, Rc<RefCell<Vec<String>>>) {
        let script = Script::default();
        let log = script.log.clone();
        (Connector::with_connection(Box::new(script)).unwrap(), log)
    }

    #[test]
    fn test_init_then_begin() {
        let (_db, log) = connector();
        assert_eq!(*log.borrow(), vec!["PRAGMA foreign_keys = ON", "BEGIN"]);
    }

    #[test]
    fn test_commit_reopens_transaction() {
        let (db, log) = connector();
        db.commit().unwrap();
        assert!(db.in_transaction());
        assert_eq!(log.borrow()[2..], ["COMMIT".to_string(), "BEGIN".to_string()]);

        db.close().unwrap();
        assert!(!db.in_transaction());
        assert!(db.savepoint().is_err());
    }

    #[test]
    fn test_savepoints_are_numbered() {
        let (db, log) = connector();
        let sp = db.savepoint().unwrap();
        assert_eq!(sp, "sp_1");
        db.rollback_to(&sp).unwrap();
        db.release(&sp).unwrap();
        assert!(db.release("x; DROP TABLE t").is_err());
        assert_eq!(log.borrow().last().unwrap(), "RELEASE SAVEPOINT sp_1");
        assert_eq!(db.info().savepoints, 1);
    }

    #[test]
    fn test_drop_rolls_back_open_transaction() {
        let (db, log) = connector();
        drop(db);
        assert_eq!(log.borrow().last().unwrap(), "ROLLBACK");
    }

    #[test]
    fn test_exists_reads_first_column() {
        let (db, _) = connector();
        assert!(db.exists(&Statement::new("SELECT COUNT(*) FROM t")).unwrap());
        assert!(db.last_insert_id().is_err());
    }
}
