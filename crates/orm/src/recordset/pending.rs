//! Deferred relation work
//!
//! Rows related to a record that is itself still being inserted cannot be
//! written until that record has an id. Their statements are built up front
//! with the parent id left as a [`Param::RecordId`](crate::builder::Param)
//! and queued here; the parent's insert runs them once its ids are known.

use tracing::debug;

use super::RecordSet;
use crate::builder::Statement;
use crate::error::OrmResult;
use crate::property::RelationKind;
use crate::record::Record;
use crate::value::FieldValue;

/// Work queued until a parent record is inserted
pub(crate) enum Pending {
    Insert(PendingInsert),
    Select(PendingSelect),
}

impl Pending {
    pub fn run(self) -> OrmResult<()> {
        match self {
            Pending::Insert(insert) => insert.run(),
            Pending::Select(select) => select.set.reconcile_selected(&select.ids),
        }
    }
}

/// A built INSERT together with the records it creates
pub(crate) struct PendingInsert {
    pub set: RecordSet,
    pub statement: Statement,
    pub records: Vec<Record>,
    /// Work deferred by the records of this insert
    pub children: Vec<Pending>,
}

impl PendingInsert {
    /// Execute the insert, hand out ids, then run the children
    pub fn run(self) -> OrmResult<()> {
        let db = self.set.db();
        db.execute(&self.statement)?;
        let last_insert_id = db.last_insert_id()?;
        let ids = db.builder().inserted_ids(last_insert_id, self.records.len());
        debug!("Inserted {} '{}' rows: {:?}", ids.len(), self.set.model_name(), ids);

        for (record, id) in self.records.iter().zip(&ids) {
            record.set_raw("id", FieldValue::from(*id));
        }
        for child in self.children {
            child.run()?;
        }

        if let Some((link, RelationKind::ManyToMany)) = self.set.relation() {
            let statement = db.builder().insert_nm(link.property(), link.require_id()?, &ids)?;
            db.execute(&statement)?;
        }
        Ok(())
    }
}

/// Selected ids whose relation to the parent is written later
pub(crate) struct PendingSelect {
    pub set: RecordSet,
    pub ids: Vec<i64>,
}

/// Records created by an insert plus the work left for the caller
pub(crate) struct Inserted {
    pub records: Vec<Record>,
    pub pending: Vec<Pending>,
}
