//! Shared fixtures: a library schema and connections to in-memory SQLite

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use elif_recordset::{
    register_module, reset, Connector, DatabaseBackendType, DatabaseConnection, DatabaseRow,
    DatabaseValue, FieldValue, FnModule, OrmResult, PropertyDef, Skeleton, SqlxConnection,
};

pub type SqlLog = Rc<RefCell<Vec<String>>>;

/// Driver wrapper that keeps the text of every statement
pub struct Recording {
    inner: SqlxConnection,
    log: SqlLog,
}

impl DatabaseConnection for Recording {
    fn backend_type(&self) -> DatabaseBackendType {
        self.inner.backend_type()
    }

    fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<u64> {
        self.log.borrow_mut().push(sql.to_string());
        self.inner.execute(sql, params)
    }

    fn fetch_all(&mut self, sql: &str, params: &[DatabaseValue]) -> OrmResult<Vec<DatabaseRow>> {
        self.log.borrow_mut().push(sql.to_string());
        self.inner.fetch_all(sql, params)
    }

    fn last_insert_id(&mut self) -> OrmResult<Option<i64>> {
        self.inner.last_insert_id()
    }
}

/// Statements in `log` starting with `prefix`
pub fn count(log: &SqlLog, prefix: &str) -> usize {
    log.borrow().iter().filter(|sql| sql.starts_with(prefix)).count()
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Fresh registry holding the library schema, and a recording connection
pub fn setup() -> (Connector, SqlLog) {
    init_tracing();
    reset();
    register_module(FnModule::new("library", library));

    let log = SqlLog::default();
    let connection = Recording {
        inner: SqlxConnection::connect("sqlite::memory:").expect("sqlite connection"),
        log: log.clone(),
    };
    let db = Connector::with_connection(Box::new(connection)).expect("connector");
    (db, log)
}

fn library(model: &str) -> Option<Skeleton> {
    let skeleton = match model {
        "author" => Skeleton::new()
            .property("name", PropertyDef::new("varchar").length(80).required())
            .property("books", PropertyDef::new("1n").target("book(author)"))
            .unique(&["name"]),
        "book" => Skeleton::new()
            .property("title", PropertyDef::new("varchar").required())
            .property("code", PropertyDef::new("varchar").length(20).store_with("upper"))
            .property("price", PropertyDef::new("float").default_value(0))
            .property("author", PropertyDef::new("n1").target("author").ondelete("SET NULL"))
            .property("tags", PropertyDef::new("nm").target("tag(books)"))
            .property("chapters", PropertyDef::new("1n").target("chapter(book)"))
            .method("upper", |call| {
                Ok(match call.arg(0) {
                    FieldValue::Json(serde_json::Value::String(s)) => FieldValue::from(s.to_uppercase()),
                    other => other,
                })
            })
            .method("@titles", |call| {
                let set = call.set().expect("set receiver");
                let titles = set
                    .pluck("title")?
                    .iter()
                    .map(|title| title.to_json(0))
                    .collect::<Vec<_>>();
                Ok(FieldValue::from(serde_json::Value::from(titles)))
            }),
        "tag" => Skeleton::new()
            .property("name", PropertyDef::new("varchar").length(40))
            .property("books", PropertyDef::new("nm").target("book(tags)")),
        "chapter" => Skeleton::new()
            .property("title", PropertyDef::new("varchar"))
            .property("book", PropertyDef::new("n1").target("book").required().ondelete("CASCADE")),
        "person" => Skeleton::new().property("name", PropertyDef::new("varchar")),
        "employee" => Skeleton::new()
            .property("person", PropertyDef::new("n1").target("person").ondelete("CASCADE"))
            .property("salary", PropertyDef::new("int"))
            .delegate("person"),
        _ => return None,
    };
    Some(skeleton)
}
