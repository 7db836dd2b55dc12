//! Record sets
//!
//! A [`RecordSet`] is an ordered collection of records of one model and the
//! entry point for every DML operation: select, insert, update and delete.
//! Sets reached through a one-to-many or many-to-many field remember their
//! parent record and property, so inserting into or selecting into them also
//! maintains the relation.
//!
//! A set is a shared handle; clones see the same records.

mod bind;
mod insert;
mod pending;
mod select;
mod update;

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::backbone::Backbone;
use crate::connector::Connector;
use crate::error::{ModelError, OrmResult};
use crate::method::Receiver;
use crate::property::{Property, RelationKind};
use crate::record::{Record, WeakRecord};
use crate::value::FieldValue;

pub use bind::{is_bound, reset_bound};
pub(crate) use pending::{Inserted, Pending};

/// Shared handle to an ordered collection of records of one model
#[derive(Clone)]
pub struct RecordSet {
    inner: Rc<RefCell<SetState>>,
}

/// Non-owning link to a [`RecordSet`]
#[derive(Clone)]
pub(crate) struct WeakSet(Weak<RefCell<SetState>>);

impl WeakSet {
    pub fn upgrade(&self) -> Option<RecordSet> {
        self.0.upgrade().map(|inner| RecordSet { inner })
    }
}

struct SetState {
    db: Connector,
    backbone: Arc<Backbone>,
    records: Vec<Record>,
    parent: Option<ParentLink>,
    inserting: bool,
    updating: bool,
    /// Set this one was filtered from; deletes are mirrored there
    origin: Option<WeakSet>,
}

/// Parent side of a related set
#[derive(Clone)]
pub(crate) struct ParentLink {
    record: WeakRecord,
    /// Parent id when the link was made, used once the record is gone
    id: Option<i64>,
    property: Property,
}

impl ParentLink {
    fn new(record: &Record, property: &Property) -> Self {
        Self {
            record: record.downgrade(),
            id: record.id(),
            property: property.clone(),
        }
    }

    pub fn record(&self) -> Option<Record> {
        self.record.upgrade()
    }

    pub fn property(&self) -> &Property {
        &self.property
    }

    pub fn id(&self) -> Option<i64> {
        self.record().and_then(|record| record.id()).or(self.id)
    }

    pub fn is_inserting(&self) -> bool {
        self.record().map_or(false, |record| record.is_inserting())
    }

    /// Value for the back reference: the live record while it exists, else its id
    pub fn value(&self) -> OrmResult<FieldValue> {
        if let Some(record) = self.record() {
            return Ok(FieldValue::Record(record));
        }
        self.id
            .map(FieldValue::from)
            .ok_or_else(|| ModelError::Relationship("parent record no longer exists".to_string()))
    }

    pub fn require_id(&self) -> OrmResult<i64> {
        self.id().ok_or_else(|| {
            ModelError::Relationship(format!("parent of '{}' has no id yet", self.property.name))
        })
    }
}

#[derive(Clone, Copy)]
enum Flag {
    Inserting,
    Updating,
}

/// Raises a set flag for the guard's lifetime and restores the previous state
struct FlagGuard {
    set: RecordSet,
    flag: Flag,
    previous: bool,
}

impl FlagGuard {
    fn raise(set: &RecordSet, flag: Flag) -> Self {
        let mut state = set.inner.borrow_mut();
        let slot = match flag {
            Flag::Inserting => &mut state.inserting,
            Flag::Updating => &mut state.updating,
        };
        let previous = std::mem::replace(slot, true);
        drop(state);
        Self {
            set: set.clone(),
            flag,
            previous,
        }
    }
}

impl Drop for FlagGuard {
    fn drop(&mut self) {
        let mut state = self.set.inner.borrow_mut();
        match self.flag {
            Flag::Inserting => state.inserting = self.previous,
            Flag::Updating => state.updating = self.previous,
        }
    }
}

impl RecordSet {
    /// Empty set of `model`
    pub fn new(db: &Connector, model: &str) -> OrmResult<Self> {
        let backbone = Backbone::get_instance(model)?;
        Ok(Self::from_parts(db.clone(), backbone))
    }

    fn from_parts(db: Connector, backbone: Arc<Backbone>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(SetState {
                db,
                backbone,
                records: Vec::new(),
                parent: None,
                inserting: false,
                updating: false,
                origin: None,
            })),
        }
    }

    /// Empty set of `model` related to `parent` through `property`
    pub(crate) fn with_parent(db: &Connector, model: &str, parent: &Record, property: &Property) -> OrmResult<Self> {
        let set = Self::new(db, model)?;
        set.set_parent(parent, property);
        Ok(set)
    }

    pub(crate) fn set_parent(&self, parent: &Record, property: &Property) {
        self.inner.borrow_mut().parent = Some(ParentLink::new(parent, property));
    }

    pub(crate) fn parent_link(&self) -> Option<ParentLink> {
        self.inner.borrow().parent.clone()
    }

    /// Parent record and relation property of a related set
    pub fn parent(&self) -> Option<(Record, Property)> {
        self.parent_link()
            .and_then(|link| link.record().map(|record| (record, link.property)))
    }

    pub fn db(&self) -> Connector {
        self.inner.borrow().db.clone()
    }

    pub fn backbone(&self) -> Arc<Backbone> {
        self.inner.borrow().backbone.clone()
    }

    pub fn model_name(&self) -> String {
        self.inner.borrow().backbone.name().to_string()
    }

    pub(crate) fn is_inserting(&self) -> bool {
        self.inner.borrow().inserting
    }

    pub(crate) fn is_updating(&self) -> bool {
        self.inner.borrow().updating
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Record> {
        self.inner.borrow().records.get(index).cloned()
    }

    pub fn first(&self) -> Option<Record> {
        self.get(0)
    }

    /// Snapshot of the records in order
    pub fn records(&self) -> Vec<Record> {
        self.inner.borrow().records.clone()
    }

    pub fn iter(&self) -> std::vec::IntoIter<Record> {
        self.records().into_iter()
    }

    /// Ids of the saved records, in order
    pub fn ids(&self) -> Vec<i64> {
        self.inner.borrow().records.iter().filter_map(Record::id).collect()
    }

    pub fn contains_id(&self, id: i64) -> bool {
        self.inner.borrow().records.iter().any(|r| r.id() == Some(id))
    }

    /// Append a record, replacing in place a record with the same id
    pub fn push(&self, record: Record) {
        record.attach(self);
        let mut state = self.inner.borrow_mut();
        let existing = record
            .id()
            .and_then(|id| state.records.iter().position(|r| r.id() == Some(id)));
        match existing {
            Some(index) => state.records[index] = record,
            None => state.records.push(record),
        }
    }

    /// Records reached through the relation `field`, without duplicates
    pub fn map(&self, field: &str) -> OrmResult<RecordSet> {
        let backbone = self.backbone();
        let property = backbone
            .property(field)
            .ok_or_else(|| ModelError::Schema(format!("'{}' has no property '{}'", backbone.name(), field)))?;
        if property.relation().is_none() {
            return Err(ModelError::Query(format!(
                "'{}' is not a relation, use pluck to read its values",
                field
            )));
        }

        let mapped = RecordSet::new(&self.db(), property.target_model()?)?;
        for record in self.records() {
            let related = match record.get(field)? {
                FieldValue::Record(related) => vec![related],
                FieldValue::Set(set) => set.records(),
                FieldValue::Json(_) => Vec::new(),
            };
            for related in related {
                let seen = related.id().map_or(false, |id| mapped.contains_id(id));
                if !seen {
                    mapped.push(related);
                }
            }
        }
        Ok(mapped)
    }

    /// Values of `field` for every record, in order
    pub fn pluck(&self, field: &str) -> OrmResult<Vec<FieldValue>> {
        self.records().iter().map(|record| record.get(field)).collect()
    }

    /// New set holding the records accepted by `predicate`.
    ///
    /// The new set keeps a link back to this one so deletes through it are
    /// mirrored here. With `orphan` the parent link is not carried over.
    pub fn filter<F>(&self, predicate: F, orphan: bool) -> RecordSet
    where
        F: Fn(&Record, usize) -> bool,
    {
        let state = self.inner.borrow();
        let filtered = Self::from_parts(state.db.clone(), state.backbone.clone());
        {
            let mut target = filtered.inner.borrow_mut();
            target.origin = Some(self.downgrade());
            if !orphan {
                target.parent = state.parent.clone();
            }
        }
        let records = state.records.clone();
        drop(state);

        for (index, record) in records.into_iter().enumerate() {
            if predicate(&record, index) {
                filtered.push(record);
            }
        }
        filtered
    }

    /// Drop records accepted by `predicate` from this set, nothing else
    pub fn flush<F>(&self, predicate: F, orphan: bool) -> &Self
    where
        F: Fn(&Record, usize) -> bool,
    {
        let mut state = self.inner.borrow_mut();
        let records = std::mem::take(&mut state.records);
        state.records = records
            .into_iter()
            .enumerate()
            .filter(|(index, record)| !predicate(record, *index))
            .map(|(_, record)| record)
            .collect();
        if orphan {
            state.parent = None;
        }
        self
    }

    /// Invoke a set method, registered under `@name`
    pub fn call(&self, name: &str, args: Vec<FieldValue>) -> OrmResult<FieldValue> {
        let backbone = self.backbone();
        let key = format!("@{}", name.trim_start_matches('@'));
        let stack = backbone.method(&key).ok_or_else(|| {
            ModelError::Schema(format!("'{}' has no set method '{}'", backbone.name(), key))
        })?;
        stack.invoke(Receiver::Set(self.clone()), &args)
    }

    pub fn constant(&self, key: &str) -> Option<JsonValue> {
        self.backbone().constant(key).cloned()
    }

    /// Records as a JSON array; relations expand while `depth > 0`
    pub fn to_json(&self, depth: usize) -> JsonValue {
        JsonValue::Array(self.records().iter().map(|record| record.to_json(depth)).collect())
    }

    pub fn ptr_eq(&self, other: &RecordSet) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn downgrade(&self) -> WeakSet {
        WeakSet(Rc::downgrade(&self.inner))
    }

    fn origin(&self) -> Option<RecordSet> {
        self.inner.borrow().origin.as_ref().and_then(WeakSet::upgrade)
    }

    fn relation(&self) -> Option<(ParentLink, RelationKind)> {
        let link = self.parent_link()?;
        let kind = link.property.relation()?;
        Some((link, kind))
    }
}

impl IntoIterator for &RecordSet {
    type Item = Record;
    type IntoIter = std::vec::IntoIter<Record>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl fmt::Debug for RecordSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(state) => f
                .debug_struct("RecordSet")
                .field("model", &state.backbone.name())
                .field("ids", &state.records.iter().filter_map(Record::id).collect::<Vec<_>>())
                .field("parent", &state.parent.as_ref().map(|link| link.property.name.clone()))
                .finish(),
            Err(_) => f.write_str("RecordSet(<borrowed>)"),
        }
    }
}
