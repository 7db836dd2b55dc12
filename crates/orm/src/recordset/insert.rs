//! INSERT

use super::{Flag, FlagGuard, Inserted, Pending, RecordSet};
use crate::error::{ModelError, OrmResult};
use crate::property::RelationKind;
use crate::record::Record;
use crate::recordset::pending::PendingInsert;
use crate::value::{FieldValue, IntoValues, Values};

impl RecordSet {
    /// Insert rows in one statement and append the new records to the set.
    ///
    /// Relation fields may carry nested rows or ids; those are inserted or
    /// linked once the new ids are known.
    pub fn insert<I, V>(&self, rows: I) -> OrmResult<Vec<Record>>
    where
        I: IntoIterator<Item = V>,
        V: IntoValues,
    {
        let rows = rows
            .into_iter()
            .map(IntoValues::into_values)
            .collect::<OrmResult<Vec<_>>>()?;
        let inserted = self.insert_pending(rows)?;
        if !inserted.pending.is_empty() {
            return Err(ModelError::Relationship(format!(
                "cannot insert into '{}' while its parent record is being inserted",
                self.model_name()
            )));
        }
        Ok(inserted.records)
    }

    /// Insert, deferring execution while the parent record has no id yet.
    ///
    /// Records added by a failed call are taken out of the set again.
    pub(crate) fn insert_pending(&self, rows: Vec<Values>) -> OrmResult<Inserted> {
        let mut added = Vec::with_capacity(rows.len());
        let result = self.insert_rows(rows, &mut added);
        if result.is_err() {
            self.flush(|record, _| added.iter().any(|new| new.ptr_eq(record)), false);
        }
        result
    }

    fn insert_rows(&self, rows: Vec<Values>, added: &mut Vec<Record>) -> OrmResult<Inserted> {
        let db = self.db();
        let backbone = self.backbone();
        let link = self.parent_link();
        let _inserting = FlagGuard::raise(self, Flag::Inserting);

        let mut records = Vec::with_capacity(rows.len());
        let mut param_rows = Vec::with_capacity(rows.len());
        let mut children = Vec::new();

        for mut row in rows {
            if let Some(link) = link.as_ref().filter(|l| l.property().relation() == Some(RelationKind::OneToMany)) {
                row.insert(link.property().target_property()?.to_string(), link.value()?);
            }

            if let Some(delegate) = backbone.delegate() {
                if row.get(delegate).map_or(true, FieldValue::is_null) {
                    let property = backbone.property(delegate).ok_or_else(|| {
                        ModelError::Schema(format!("delegate '{}' is not a property of '{}'", delegate, backbone.name()))
                    })?;
                    let target = Record::add(&db, property.target_model()?, row.clone())?;
                    row.insert(delegate.to_string(), FieldValue::Record(target));
                }
            }

            let record = Record::new();
            self.push(record.clone());
            added.push(record.clone());
            for property in backbone.properties().iter().filter(|p| p.name != "id") {
                let resolved = property.ensure_value(row.remove(&property.name), &record)?;
                record.set_raw(&property.name, resolved.value);
                children.extend(resolved.pending);
            }

            let params = backbone
                .stored_properties()
                .map(|property| property.ensure_stored_value(&record.raw(&property.name), &record))
                .collect::<OrmResult<Vec<_>>>()?;
            param_rows.push(params);
            records.push(record);
        }

        if records.is_empty() {
            return Ok(Inserted {
                records,
                pending: Vec::new(),
            });
        }

        let columns: Vec<&str> = backbone.stored_properties().map(|p| p.name.as_str()).collect();
        let pending = PendingInsert {
            set: self.clone(),
            statement: db.builder().insert(backbone.name(), &columns, param_rows)?,
            records: records.clone(),
            children,
        };

        if link.map_or(false, |l| l.is_inserting()) {
            return Ok(Inserted {
                records,
                pending: vec![Pending::Insert(pending)],
            });
        }
        pending.run()?;
        Ok(Inserted {
            records,
            pending: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{DatabaseBackendType, DatabaseConnection, DatabaseRow, DatabaseValue};
    use crate::connector::Connector;
    use crate::module::{register_module, FnModule, PropertyDef, Skeleton};
    use serial_test::serial;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Counts statements and hands out sequential ids
    #[derive(Default)]
    struct Counter {
        log: Rc<RefCell<Vec<String>>>,
        next_id: i64,
    }

    impl DatabaseConnection for Counter {
        fn backend_type(&self) -> DatabaseBackendType {
            DatabaseBackendType::SQLite
        }

        fn execute(&mut self, sql: &str, _params: &[DatabaseValue]) -> OrmResult<u64> {
            if sql.starts_with("INSERT INTO") {
                self.next_id += sql.matches("), (").count() as i64 + 1;
            }
            self.log.borrow_mut().push(sql.to_string());
            Ok(1)
        }

        fn fetch_all(&mut self, sql: &str, _params: &[DatabaseValue]) -> OrmResult<Vec<DatabaseRow>> {
            self.log.borrow_mut().push(sql.to_string());
            Ok(Vec::new())
        }

        fn last_insert_id(&mut self) -> OrmResult<Option<i64>> {
            Ok(Some(self.next_id))
        }
    }

    fn setup() -> (Connector, Rc<RefCell<Vec<String>>>) {
        crate::reset();
        register_module(FnModule::new("library", |model| match model {
            "author" => Some(
                Skeleton::new()
                    .property("name", PropertyDef::new("varchar"))
                    .property("books", PropertyDef::new("1n").target("book(author)")),
            ),
            "book" => Some(
                Skeleton::new()
                    .property("title", PropertyDef::new("varchar"))
                    .property("author", PropertyDef::new("n1").target("author")),
            ),
            _ => None,
        }));
        let counter = Counter::default();
        let log = counter.log.clone();
        (Connector::with_connection(Box::new(counter)).unwrap(), log)
    }

    #[test]
    #[serial]
    fn test_nested_rows_wait_for_parent_id() {
        let (db, log) = setup();
        let authors = RecordSet::new(&db, "author").unwrap();
        let inserted = authors
            .insert([serde_json::json!({
                "name": "Ann",
                "books": [{"title": "A"}, {"title": "B"}]
            })])
            .unwrap();

        let inserts: Vec<String> = log
            .borrow()
            .iter()
            .filter(|sql| sql.starts_with("INSERT"))
            .cloned()
            .collect();
        assert_eq!(inserts.len(), 2);
        assert!(inserts[0].starts_with(r#"INSERT INTO "author""#));
        assert!(inserts[1].starts_with(r#"INSERT INTO "book""#));

        let author = &inserted[0];
        assert_eq!(author.id(), Some(1));
        let books = author.get("books").unwrap();
        let books = books.as_set().unwrap();
        assert_eq!(books.ids(), vec![2, 3]);
        assert!(books.parent().unwrap().0.ptr_eq(author));
    }

    #[test]
    #[serial]
    fn test_insert_with_no_rows_is_a_no_op() {
        let (db, log) = setup();
        let books = RecordSet::new(&db, "book").unwrap();
        assert!(books.insert(Vec::<Values>::new()).unwrap().is_empty());
        assert!(!log.borrow().iter().any(|sql| sql.starts_with("INSERT")));
    }
}
