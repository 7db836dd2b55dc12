//! Schema binding against in-memory SQLite

mod common;

use common::{count, setup};
use elif_recordset::{
    recordset::{is_bound, reset_bound},
    register_module, Connector, FnModule, PropertyDef, RecordSet, Skeleton,
};
use serial_test::serial;

fn table_exists(db: &Connector, table: &str) -> bool {
    db.exists(&db.builder().exists_table(table)).unwrap()
}

fn column_exists(db: &Connector, table: &str, column: &str) -> bool {
    db.exists(&db.builder().exists_column(table, column)).unwrap()
}

#[test]
#[serial]
fn test_bind_creates_related_tables() {
    let (db, _log) = setup();
    RecordSet::bind(&db, "author").unwrap();

    for table in ["author", "book", "tag", "chapter", "nm_books_tags"] {
        assert!(table_exists(&db, table), "missing table {}", table);
    }
    assert!(column_exists(&db, "book", "author"));
    assert!(!column_exists(&db, "author", "books"));
    for model in ["author", "book", "tag", "chapter"] {
        assert!(is_bound(model));
    }
}

#[test]
#[serial]
fn test_bind_runs_once_per_model() {
    let (db, log) = setup();
    RecordSet::bind(&db, "tag").unwrap();
    let created = count(&log, "CREATE TABLE");
    assert!(created >= 2);

    RecordSet::bind(&db, "tag").unwrap();
    RecordSet::bind(&db, "book").unwrap();
    assert_eq!(count(&log, "CREATE TABLE"), created);
}

#[test]
#[serial]
fn test_rebind_adds_new_columns() {
    let (db, log) = setup();
    RecordSet::bind(&db, "person").unwrap();
    assert!(!column_exists(&db, "person", "email"));

    register_module(FnModule::new("contact", |model| {
        (model == "person").then(|| Skeleton::new().property("email", PropertyDef::new("varchar").length(120)))
    }));
    reset_bound(Some(&["person"]));
    let people = RecordSet::bind(&db, "person").unwrap();

    assert!(column_exists(&db, "person", "email"));
    assert_eq!(count(&log, "ALTER TABLE \"person\" ADD COLUMN"), 1);
    assert!(people.backbone().has_property("email"));
}

#[test]
#[serial]
fn test_delegate_cascade_installs_trigger() {
    let (db, log) = setup();
    RecordSet::bind(&db, "employee").unwrap();
    assert!(table_exists(&db, "person"));
    assert_eq!(count(&log, "CREATE TRIGGER IF NOT EXISTS \"employee_delete_person\""), 1);
}

#[test]
#[serial]
fn test_bind_unknown_model_fails_and_stays_unbound() {
    let (db, _log) = setup();
    assert!(RecordSet::bind(&db, "ghost").is_err());
    assert!(!is_bound("ghost"));
}
