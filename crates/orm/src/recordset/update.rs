//! UPDATE and DELETE

use std::collections::HashMap;

use tracing::warn;

use super::{Flag, FlagGuard, RecordSet};
use crate::error::{ModelError, OrmResult};
use crate::property::{Property, RelationKind};
use crate::record::Record;
use crate::value::{FieldValue, IntoValues, Values};

impl RecordSet {
    /// Apply the same values to every record of the set
    pub fn update(&self, values: impl IntoValues) -> OrmResult<RecordSet> {
        self.update_targets(values.into_values()?, self.records())?;
        Ok(self.clone())
    }

    /// Apply values to one record of the set
    pub fn update_record(&self, values: impl IntoValues, record: &Record) -> OrmResult<Record> {
        self.update_targets(values.into_values()?, vec![record.clone()])?;
        Ok(record.clone())
    }

    pub(crate) fn update_targets(&self, values: Values, records: Vec<Record>) -> OrmResult<()> {
        if values.is_empty() || records.is_empty() {
            return Ok(());
        }
        let backbone = self.backbone();

        if let Some(readonly) = values
            .keys()
            .find(|key| backbone.property(key).map_or(false, |p| p.readonly))
        {
            return Err(ModelError::Validation(format!(
                "'{}.{}' is read only",
                backbone.name(),
                readonly
            )));
        }
        if let Some(record) = records.iter().find(|r| r.is_new()) {
            return Err(ModelError::Validation(format!(
                "cannot update an unsaved '{}' record: {:?}",
                backbone.name(),
                record
            )));
        }

        for record in &records {
            record.attach(self);
        }
        let _updating = FlagGuard::raise(self, Flag::Updating);

        if let Some(delegate) = backbone.delegate() {
            let target = backbone
                .property(delegate)
                .ok_or_else(|| ModelError::Schema(format!("delegate '{}' is not a property", delegate)))?
                .target_model()?;
            let delegates = RecordSet::new(&self.db(), target)?;
            for record in &records {
                if let FieldValue::Record(related) = record.get(delegate)? {
                    if !related.id().map_or(false, |id| delegates.contains_id(id)) {
                        delegates.push(related);
                    }
                }
            }
            delegates.update_targets(values.clone(), delegates.records())?;
        }

        // many-to-one values resolve once and are shared by every record
        let mut shared: HashMap<String, FieldValue> = HashMap::new();
        for record in &records {
            for property in backbone.properties() {
                let Some(value) = values.get(&property.name) else { continue };
                if let Some(resolved) = shared.get(&property.name) {
                    record.set_raw(&property.name, resolved.clone());
                    continue;
                }
                let resolved = property.ensure_value(Some(value.clone()), record)?;
                for pending in resolved.pending {
                    pending.run()?;
                }
                if property.relation() == Some(RelationKind::ManyToOne) {
                    shared.insert(property.name.clone(), resolved.value.clone());
                }
                record.set_raw(&property.name, resolved.value);
            }
        }

        let stored: Vec<&Property> = backbone
            .stored_properties()
            .filter(|p| values.contains_key(&p.name))
            .collect();
        if stored.is_empty() {
            return Ok(());
        }

        // computed columns may differ per record
        if stored.iter().any(|p| p.store.is_computed()) {
            for record in &records {
                self.execute_update(&stored, std::slice::from_ref(record))?;
            }
            Ok(())
        } else {
            self.execute_update(&stored, &records)
        }
    }

    /// One UPDATE for `records` using the first record's stored values
    fn execute_update(&self, stored: &[&Property], records: &[Record]) -> OrmResult<()> {
        let Some(first) = records.first() else { return Ok(()) };
        let db = self.db();
        let columns: Vec<&str> = stored.iter().map(|p| p.name.as_str()).collect();
        let params = stored
            .iter()
            .map(|p| p.ensure_stored_value(&first.raw(&p.name), first))
            .collect::<OrmResult<Vec<_>>>()?;
        let ids: Vec<i64> = records.iter().filter_map(Record::id).collect();
        let statement = db.builder().update(self.backbone().name(), &columns, params, &ids)?;
        db.execute(&statement)?;
        Ok(())
    }

    /// Delete every saved record of the set
    pub fn delete(&self) -> OrmResult<()> {
        self.delete_targets(self.records())
    }

    pub fn delete_record(&self, record: &Record) -> OrmResult<()> {
        self.delete_targets(vec![record.clone()])
    }

    fn delete_targets(&self, records: Vec<Record>) -> OrmResult<()> {
        let ids: Vec<i64> = records.iter().filter_map(Record::id).collect();
        if !ids.is_empty() {
            let db = self.db();
            db.execute(&db.builder().delete(self.backbone().name(), &ids))?;
        }

        let removed = |r: &Record, _: usize| records.iter().any(|t| t.ptr_eq(r));
        if let Some(origin) = self.origin() {
            origin.flush(removed, false);
        }
        self.flush(removed, false);
        Ok(())
    }

    /// Detach related rows of the parent that are not in `keep`.
    ///
    /// One-to-many rows get their back reference nulled; when the column
    /// refuses NULL they are deleted instead. Many-to-many junction rows are
    /// deleted.
    pub(crate) fn clear_relation(&self, keep: &[i64]) -> OrmResult<()> {
        let Some((link, kind)) = self.relation() else { return Ok(()) };
        let Some(parent_id) = link.id() else { return Ok(()) };
        let db = self.db();
        let builder = db.builder();
        let table = self.model_name();

        match kind {
            RelationKind::OneToMany => {
                let orphan = builder.orphan_1n(&table, link.property(), parent_id, keep)?;
                let savepoint = if db.in_transaction() { Some(db.savepoint()?) } else { None };
                match db.execute(&orphan) {
                    Ok(_) => {
                        if let Some(savepoint) = &savepoint {
                            db.release(savepoint)?;
                        }
                    }
                    Err(e) if e.is_constraint() => {
                        warn!(
                            "Cannot orphan '{}' rows of {} {}, deleting them: {}",
                            table,
                            link.property().name,
                            parent_id,
                            e
                        );
                        if let Some(savepoint) = &savepoint {
                            db.rollback_to(savepoint)?;
                            db.release(savepoint)?;
                        }
                        db.execute(&builder.clear_1n(&table, link.property(), parent_id, keep)?)?;
                    }
                    Err(e) => {
                        if let Some(savepoint) = &savepoint {
                            db.rollback_to(savepoint)?;
                            db.release(savepoint)?;
                        }
                        return Err(e);
                    }
                }
            }
            RelationKind::ManyToMany => {
                db.execute(&builder.clear_nm(link.property(), parent_id, keep)?)?;
            }
            RelationKind::ManyToOne => {}
        }
        Ok(())
    }
}
