//! Schema binding
//!
//! Binding a model makes sure its table exists and matches the backbone:
//! missing tables are created, missing columns added and, where the dialect
//! allows it, existing columns brought in line. Related models are bound as
//! well, and each model is bound at most once per process.

use dashmap::DashSet;
use once_cell::sync::Lazy;
use tracing::info;

use super::RecordSet;
use crate::backbone::Backbone;
use crate::connector::Connector;
use crate::error::{ModelError, OrmResult};
use crate::property::RelationKind;

static BOUND: Lazy<DashSet<String>> = Lazy::new(DashSet::new);

/// Whether `model` has been bound in this process
pub fn is_bound(model: &str) -> bool {
    BOUND.contains(model)
}

/// Forget bound models so the next bind checks the schema again
pub fn reset_bound(models: Option<&[&str]>) {
    match models {
        Some(models) => {
            for model in models {
                BOUND.remove(*model);
            }
        }
        None => BOUND.clear(),
    }
}

impl RecordSet {
    /// Empty set of `model`, with its table created or updated on first use
    pub fn bind(db: &Connector, model: &str) -> OrmResult<RecordSet> {
        let set = RecordSet::new(db, model)?;
        if BOUND.insert(model.to_string()) {
            if let Err(e) = set.bind_model() {
                BOUND.remove(model);
                return Err(e);
            }
        }
        Ok(set)
    }

    fn bind_model(&self) -> OrmResult<()> {
        let db = self.db();
        db.commit()?;

        let backbone = Backbone::reload(&self.model_name())?;
        self.inner.borrow_mut().backbone = backbone.clone();
        let builder = db.builder();
        let table = backbone.name();

        // referenced tables must exist before the foreign keys pointing at them
        for property in backbone.properties() {
            if property.relation() == Some(RelationKind::ManyToOne) {
                let target = property.target_model()?;
                if target != table {
                    RecordSet::bind(&db, target)?;
                }
            }
        }

        if db.exists(&builder.exists_table(table))? {
            for property in backbone.stored_properties() {
                if db.exists(&builder.exists_column(table, &property.name))? {
                    if let Some(sql) = builder.alter_column(table, property) {
                        db.exec(&sql)?;
                    }
                    continue;
                }
                db.exec(&builder.add_column(table, property))?;
                if property.relation() == Some(RelationKind::ManyToOne) {
                    if let Some(sql) = builder.add_foreign_key(table, property)? {
                        db.exec(&sql)?;
                    }
                }
                info!("Added column '{}.{}'", table, property.name);
            }
        } else {
            let columns: Vec<_> = backbone.stored_properties().collect();
            db.exec(&builder.create_table(table, &backbone.unique(), &columns)?)?;
            info!("Created table '{}'", table);
        }

        for property in backbone.properties() {
            let Some(RelationKind::OneToMany | RelationKind::ManyToMany) = property.relation() else {
                continue;
            };
            let target = property.target_model()?;
            if target != table {
                RecordSet::bind(&db, target)?;
            }
            // the other side creates the junction when its own table is missing
            if property.relation() == Some(RelationKind::ManyToMany)
                && (target == table || db.exists(&builder.exists_table(target))?)
            {
                db.exec(&builder.create_nm_table(table, property)?)?;
            }
        }

        if let Some(delegate) = backbone.delegate() {
            let property = backbone.property(delegate).ok_or_else(|| {
                ModelError::Schema(format!("delegate '{}' is not a property of '{}'", delegate, table))
            })?;
            if property.ondelete.eq_ignore_ascii_case("CASCADE") {
                if let Some(sql) = builder.create_delegate_trigger(table, property)? {
                    db.exec(&sql)?;
                }
            }
        }

        db.commit()?;
        info!("Bound model '{}'", table);
        Ok(())
    }
}
