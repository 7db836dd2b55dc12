//! Records
//!
//! A [`Record`] is one row of a model. It keeps the raw column values read from
//! the database and resolves typed values lazily on [`Record::get`]: relation
//! fields become related records or sets, scalars are cast, and retrieve
//! methods run. Resolved values are memoized until the field changes.
//!
//! Records are shared handles. Every clone sees the same values, and a record
//! belongs to at most one [`RecordSet`] at a time, which it reaches through a
//! weak link.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use serde_json::{Map, Value as JsonValue};

use crate::backbone::Backbone;
use crate::backends::DatabaseRow;
use crate::connector::Connector;
use crate::error::{ModelError, OrmResult};
use crate::method::Receiver;
use crate::recordset::{RecordSet, WeakSet};
use crate::search::{Limit, OrderBy, Where};
use crate::value::{json_as_i64, FieldValue, IntoValues, Values};

/// Shared handle to one row
#[derive(Clone)]
pub struct Record {
    inner: Rc<RefCell<RecordState>>,
}

/// Non-owning link to a [`Record`]
#[derive(Clone, Default)]
pub struct WeakRecord(Weak<RefCell<RecordState>>);

impl WeakRecord {
    pub fn upgrade(&self) -> Option<Record> {
        self.0.upgrade().map(|inner| Record { inner })
    }
}

#[derive(Default)]
struct RecordState {
    values: HashMap<String, FieldValue>,
    previous: HashMap<String, FieldValue>,
    resolved: HashSet<String>,
    owner: Option<WeakSet>,
    context: Option<(Connector, Arc<Backbone>)>,
}

impl Record {
    /// Detached record with no values
    pub fn new() -> Self {
        Self::from_values(Values::new())
    }

    pub fn from_values(values: Values) -> Self {
        Self {
            inner: Rc::new(RefCell::new(RecordState {
                values,
                ..RecordState::default()
            })),
        }
    }

    /// Record holding a fetched row as raw values
    pub fn from_row(row: &DatabaseRow) -> Self {
        Self::from_values(
            row.iter()
                .map(|(column, value)| (column.to_string(), FieldValue::Json(value.to_json())))
                .collect(),
        )
    }

    /// Find the first row of `model` matching `filter`
    pub fn find(
        db: &Connector,
        model: &str,
        filter: impl Into<Where>,
        order: &[OrderBy],
    ) -> OrmResult<Option<Record>> {
        let set = RecordSet::new(db, model)?;
        set.select_with(filter, order, Some(Limit::new(0, 1)))?;
        Ok(set.first())
    }

    /// Insert one row of `model`
    pub fn add(db: &Connector, model: &str, values: impl IntoValues) -> OrmResult<Record> {
        let set = RecordSet::new(db, model)?;
        set.insert([values.into_values()?])?
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::Database(format!("insert into '{}' produced no record", model)))
    }

    /// Database id; unsaved records have none
    pub fn id(&self) -> Option<i64> {
        self.inner
            .borrow()
            .values
            .get("id")
            .and_then(FieldValue::as_json)
            .and_then(json_as_i64)
            .filter(|id| *id > 0)
    }

    pub fn is_new(&self) -> bool {
        self.id().is_none()
    }

    /// The id as a one-element list, for APIs that take id lists
    pub fn ids(&self) -> Vec<i64> {
        self.id().into_iter().collect()
    }

    /// Model name, once the record belongs to a set
    pub fn model_name(&self) -> Option<String> {
        self.inner
            .borrow()
            .context
            .as_ref()
            .map(|(_, backbone)| backbone.name().to_string())
    }

    pub fn db(&self) -> OrmResult<Connector> {
        self.context().map(|(db, _)| db)
    }

    pub fn backbone(&self) -> OrmResult<Arc<Backbone>> {
        self.context().map(|(_, backbone)| backbone)
    }

    pub(crate) fn context(&self) -> OrmResult<(Connector, Arc<Backbone>)> {
        self.inner
            .borrow()
            .context
            .clone()
            .ok_or_else(|| ModelError::Schema("record does not belong to a model".to_string()))
    }

    /// The set currently holding this record
    pub fn recordset(&self) -> Option<RecordSet> {
        self.inner.borrow().owner.as_ref().and_then(WeakSet::upgrade)
    }

    pub(crate) fn attach(&self, set: &RecordSet) {
        let mut state = self.inner.borrow_mut();
        state.owner = Some(set.downgrade());
        state.context = Some((set.db(), set.backbone()));
    }

    pub(crate) fn is_inserting(&self) -> bool {
        self.recordset().map_or(false, |set| set.is_inserting())
    }

    pub(crate) fn is_updating(&self) -> bool {
        self.recordset().map_or(false, |set| set.is_updating())
    }

    /// Stored value of `name` without resolution
    pub fn raw(&self, name: &str) -> FieldValue {
        self.inner.borrow().values.get(name).cloned().unwrap_or_default()
    }

    /// Replace a stored value, keeping the old one as previous.
    ///
    /// Nothing is validated or written to the database.
    pub fn set_raw(&self, name: &str, value: FieldValue) {
        let mut state = self.inner.borrow_mut();
        let old = state.values.insert(name.to_string(), value).unwrap_or_default();
        state.previous.insert(name.to_string(), old);
        state.resolved.remove(name);
    }

    /// Value `name` held before its last change
    pub fn previous(&self, name: &str) -> FieldValue {
        self.inner.borrow().previous.get(name).cloned().unwrap_or_default()
    }

    /// Typed value of a field, falling back to the delegate record for fields
    /// the model does not define
    pub fn get(&self, name: &str) -> OrmResult<FieldValue> {
        if name == "id" {
            return Ok(self.id().map_or_else(FieldValue::null, FieldValue::from));
        }

        let backbone = self.backbone()?;
        if let Some(property) = backbone.property(name) {
            if self.inner.borrow().resolved.contains(name) {
                return Ok(self.raw(name));
            }
            let value = property.ensure_retrieved_value(self.raw(name), self)?;
            let mut state = self.inner.borrow_mut();
            state.values.insert(name.to_string(), value.clone());
            state.resolved.insert(name.to_string());
            return Ok(value);
        }

        match backbone.delegate() {
            Some(delegate) if !backbone.has_property(delegate) => Err(ModelError::Schema(format!(
                "'{}' has no property '{}' and its delegate '{}' is not a property",
                backbone.name(),
                name,
                delegate
            ))),
            Some(delegate) => match self.get(delegate)? {
                FieldValue::Record(target) => target.get(name),
                _ => Err(ModelError::NotFound(format!(
                    "'{}' has no '{}' and its delegate '{}' is empty",
                    backbone.name(),
                    name,
                    delegate
                ))),
            },
            None => Err(ModelError::Schema(format!(
                "'{}' has no property '{}'",
                backbone.name(),
                name
            ))),
        }
    }

    /// Update a single field
    pub fn set(&self, name: &str, value: impl Into<FieldValue>) -> OrmResult<()> {
        self.update([(name, value.into())])?;
        Ok(())
    }

    pub fn update(&self, values: impl IntoValues) -> OrmResult<Record> {
        self.owner_or_standalone()?.update_record(values.into_values()?, self)?;
        Ok(self.clone())
    }

    pub fn delete(&self) -> OrmResult<()> {
        self.owner_or_standalone()?.delete_record(self)
    }

    /// Invoke a model method on this record
    pub fn call(&self, name: &str, args: Vec<FieldValue>) -> OrmResult<FieldValue> {
        let backbone = self.backbone()?;
        let stack = backbone.method(name).ok_or_else(|| {
            ModelError::Schema(format!("'{}' has no method '{}'", backbone.name(), name))
        })?;
        stack.invoke(Receiver::Record(self.clone()), &args)
    }

    pub fn constant(&self, key: &str) -> Option<JsonValue> {
        self.backbone().ok().and_then(|b| b.constant(key).cloned())
    }

    /// Raw values as a JSON object; relations expand while `depth > 0`
    pub fn to_json(&self, depth: usize) -> JsonValue {
        let state = self.inner.borrow();
        let mut map = Map::new();
        match &state.context {
            Some((_, backbone)) => {
                for property in backbone.properties() {
                    let value = state.values.get(&property.name).cloned().unwrap_or_default();
                    map.insert(property.name.clone(), value.to_json(depth));
                }
            }
            None => {
                for (name, value) in &state.values {
                    map.insert(name.clone(), value.to_json(depth));
                }
            }
        }
        JsonValue::Object(map)
    }

    pub fn ptr_eq(&self, other: &Record) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn downgrade(&self) -> WeakRecord {
        WeakRecord(Rc::downgrade(&self.inner))
    }

    /// The owning set, or a fresh one-record set when the owner is gone
    fn owner_or_standalone(&self) -> OrmResult<RecordSet> {
        if let Some(set) = self.recordset() {
            return Ok(set);
        }
        let (db, backbone) = self.context()?;
        let set = RecordSet::new(&db, backbone.name())?;
        set.push(self.clone());
        Ok(set)
    }
}

impl Default for Record {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(state) => f
                .debug_struct("Record")
                .field(
                    "model",
                    &state.context.as_ref().map(|(_, backbone)| backbone.name().to_string()),
                )
                .field("id", &state.values.get("id").and_then(FieldValue::as_json))
                .finish(),
            Err(_) => f.write_str("Record(<borrowed>)"),
        }
    }
}
