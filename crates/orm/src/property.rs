//! Model properties
//!
//! A [`Property`] describes one field of a model: either a scalar column or one
//! of the three relation kinds. Besides the schema attributes it owns value
//! handling in both directions:
//!
//! - `ensure_value` validates and resolves caller input, inserting or selecting
//!   related rows as needed,
//! - `ensure_stored_value` coerces a value into a bindable parameter,
//! - `ensure_retrieved_value` turns a raw column value back into a typed value,
//!   resolving relations lazily.

use serde_json::Value as JsonValue;

use crate::backends::DatabaseValue;
use crate::builder::Param;
use crate::error::{ModelError, OrmResult};
use crate::module::PropertyDef;
use crate::record::Record;
use crate::recordset::{Pending, RecordSet};
use crate::search::{is_identifier, Search, Where};
use crate::value::{json_as_i64, FieldValue, Values};

/// Relation kind of a property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    /// `n1`: foreign-key column on this model
    ManyToOne,
    /// `1n`: target rows carry a foreign key back to this model
    OneToMany,
    /// `nm`: junction table
    ManyToMany,
}

impl RelationKind {
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "n1" => Some(RelationKind::ManyToOne),
            "1n" => Some(RelationKind::OneToMany),
            "nm" => Some(RelationKind::ManyToMany),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::ManyToOne => "n1",
            RelationKind::OneToMany => "1n",
            RelationKind::ManyToMany => "nm",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Required {
    #[default]
    No,
    Yes,
    /// Required, failing with this message
    Message(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Store {
    #[default]
    Yes,
    No,
    /// Stored value is computed by this record method
    Method(String),
}

impl Store {
    pub fn is_computed(&self) -> bool {
        matches!(self, Store::Method(_))
    }
}

/// Junction table identity of an `nm` relation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Junction {
    pub name: String,
    pub field_a: String,
    pub field_b: String,
}

impl Junction {
    /// Both sides of the relation sort the same pair, so they agree on the identity
    pub fn new(name: &str, target_property: &str) -> Self {
        let mut pair = [name, target_property];
        pair.sort_unstable();
        Self {
            name: format!("nm_{}_{}", pair[0], pair[1]),
            field_a: pair[0].to_string(),
            field_b: pair[1].to_string(),
        }
    }
}

const REFERENTIAL_ACTIONS: [&str; 5] = ["NO ACTION", "CASCADE", "SET NULL", "RESTRICT", "SET DEFAULT"];

#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub name: String,
    pub label: String,
    /// Scalar SQL type name, or `n1`/`1n`/`nm`
    pub kind: String,
    pub length: Option<u32>,
    pub required: Required,
    pub default: JsonValue,
    pub store: Store,
    pub retrieve: Option<String>,
    pub readonly: bool,
    pub ondelete: String,
    pub onupdate: String,
    /// Extra column SQL appended to the definition
    pub sql: Option<String>,
    pub target: Option<String>,
    pub target_model: Option<String>,
    pub target_property: Option<String>,
    pub junction: Option<Junction>,
}

impl Property {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            label: label_for(&name),
            name,
            kind: String::new(),
            length: None,
            required: Required::No,
            default: JsonValue::Null,
            store: Store::Yes,
            retrieve: None,
            readonly: false,
            ondelete: "NO ACTION".to_string(),
            onupdate: "NO ACTION".to_string(),
            sql: None,
            target: None,
            target_model: None,
            target_property: None,
            junction: None,
        }
    }

    /// The built-in primary key every model starts with
    pub fn primary_key() -> Self {
        Self {
            label: "ID".to_string(),
            kind: "int".to_string(),
            readonly: true,
            store: Store::No,
            ..Self::new("id")
        }
    }

    /// Merge a definition: the type is set once, named attributes overwrite
    pub fn define(&mut self, def: &PropertyDef) -> OrmResult<()> {
        if self.kind.is_empty() {
            if let Some(kind) = &def.kind {
                self.kind = kind.trim().to_lowercase();
            }
        }
        for (key, value) in &def.options {
            self.apply(key, value)?;
        }
        self.normalize()
    }

    fn apply(&mut self, key: &str, value: &JsonValue) -> OrmResult<()> {
        let invalid = || {
            ModelError::Schema(format!("invalid value {} for attribute '{}' of '{}'", value, key, self.name))
        };
        match key {
            "label" => self.label = value.as_str().ok_or_else(invalid)?.to_string(),
            "length" => {
                let length = value.as_u64().ok_or_else(invalid)?;
                self.length = Some(u32::try_from(length).map_err(|_| invalid())?);
            }
            "required" => {
                self.required = match value {
                    JsonValue::Bool(true) => Required::Yes,
                    JsonValue::Bool(false) | JsonValue::Null => Required::No,
                    JsonValue::String(message) => Required::Message(message.clone()),
                    _ => return Err(invalid()),
                }
            }
            "default" => self.default = value.clone(),
            "store" => {
                self.store = match value {
                    JsonValue::Bool(true) => Store::Yes,
                    JsonValue::Bool(false) => Store::No,
                    JsonValue::String(method) => Store::Method(method.clone()),
                    _ => return Err(invalid()),
                }
            }
            "retrieve" => self.retrieve = value.as_str().map(String::from),
            "readonly" => self.readonly = value.as_bool().ok_or_else(invalid)?,
            "ondelete" | "onupdate" => {
                let action = value.as_str().ok_or_else(invalid)?.trim().to_uppercase();
                if !REFERENTIAL_ACTIONS.contains(&action.as_str()) {
                    return Err(invalid());
                }
                if key == "ondelete" {
                    self.ondelete = action;
                } else {
                    self.onupdate = action;
                }
            }
            "sql" => self.sql = value.as_str().map(String::from),
            "target" => self.target = Some(value.as_str().ok_or_else(invalid)?.trim().to_string()),
            _ => tracing::debug!("Ignoring unknown attribute '{}' on '{}'", key, self.name),
        }
        Ok(())
    }

    fn normalize(&mut self) -> OrmResult<()> {
        match self.relation() {
            Some(RelationKind::ManyToOne) => {
                self.store = Store::Yes;
                self.target_model = self.target.clone();
            }
            Some(kind) => {
                if let Some(target) = &self.target {
                    let (model, property) = parse_target(target).ok_or_else(|| {
                        ModelError::Schema(format!(
                            "'{}' target '{}' must look like 'model(property)'",
                            self.name, target
                        ))
                    })?;
                    if kind == RelationKind::ManyToMany {
                        self.junction = Some(Junction::new(&self.name, &property));
                    }
                    self.target_model = Some(model);
                    self.target_property = Some(property);
                }
                self.store = Store::No;
            }
            None => {
                if self.kind == "varchar" && self.length.is_none() {
                    self.length = Some(255);
                }
            }
        }
        Ok(())
    }

    /// Final consistency check once every module has contributed
    pub fn validate(&self) -> OrmResult<()> {
        if self.kind.is_empty() {
            return Err(ModelError::Schema(format!("property '{}' has no type", self.name)));
        }
        if self.relation().is_some() && self.target_model.is_none() {
            return Err(ModelError::Schema(format!(
                "relation '{}' ({}) has no target",
                self.name, self.kind
            )));
        }
        Ok(())
    }

    pub fn relation(&self) -> Option<RelationKind> {
        RelationKind::parse(&self.kind)
    }

    pub fn is_stored(&self) -> bool {
        self.store != Store::No
    }

    pub fn is_required(&self) -> bool {
        self.required != Required::No
    }

    pub fn target_model(&self) -> OrmResult<&str> {
        self.target_model
            .as_deref()
            .ok_or_else(|| ModelError::Schema(format!("'{}' is not a relation", self.name)))
    }

    pub fn target_property(&self) -> OrmResult<&str> {
        self.target_property
            .as_deref()
            .ok_or_else(|| ModelError::Schema(format!("'{}' has no target property", self.name)))
    }

    pub fn junction(&self) -> OrmResult<&Junction> {
        self.junction
            .as_ref()
            .ok_or_else(|| ModelError::Schema(format!("'{}' is not a many-to-many relation", self.name)))
    }

    /// Validate and resolve caller input for `record`
    pub(crate) fn ensure_value(&self, input: Option<FieldValue>, record: &Record) -> OrmResult<Resolved> {
        let mut value = input.unwrap_or_default();
        if value.is_null() && !self.default.is_null() {
            value = FieldValue::Json(self.default.clone());
        }
        if value.is_null() {
            match &self.required {
                Required::No => {}
                Required::Yes => {
                    return Err(ModelError::Validation(format!("value required for '{}'", self.name)))
                }
                Required::Message(message) => return Err(ModelError::Validation(message.clone())),
            }
        }

        match self.relation() {
            Some(RelationKind::ManyToOne) if !value.is_empty() => {
                Ok(Resolved::value(self.ensure_record(value, record)?))
            }
            Some(RelationKind::OneToMany | RelationKind::ManyToMany) => self.ensure_record_set(value, record),
            _ => Ok(Resolved::value(value)),
        }
    }

    fn ensure_record(&self, value: FieldValue, record: &Record) -> OrmResult<FieldValue> {
        let target = self.target_model()?;
        let (db, _) = record.context()?;

        match value {
            FieldValue::Record(related) => {
                self.check_model(&related, target)?;
                Ok(FieldValue::Record(related))
            }
            FieldValue::Set(_) => Err(ModelError::Relationship(format!(
                "'{}' expects a single '{}' record",
                self.name, target
            ))),
            FieldValue::Json(JsonValue::Object(map)) => {
                let set = RecordSet::new(&db, target)?;
                let row: Values = map.into_iter().map(|(k, v)| (k, FieldValue::Json(v))).collect();
                let inserted = set.insert([row])?;
                inserted
                    .into_iter()
                    .next()
                    .map(FieldValue::Record)
                    .ok_or_else(|| ModelError::NotFound(format!("no value inserted for '{}'", self.name)))
            }
            FieldValue::Json(key) => {
                let set = RecordSet::new(&db, target)?;
                set.select(Where::from_json(&key)?)?;
                set.first()
                    .map(FieldValue::Record)
                    .ok_or_else(|| ModelError::NotFound(format!("no value found for '{}'", self.name)))
            }
        }
    }

    fn ensure_record_set(&self, value: FieldValue, record: &Record) -> OrmResult<Resolved> {
        let target = self.target_model()?;
        let updating = record.is_updating();

        let mut inserts: Vec<Values> = Vec::new();
        let mut selects: Vec<i64> = Vec::new();
        match value {
            FieldValue::Set(set) => {
                if set.model_name() != target {
                    return Err(self.mismatch(&set.model_name(), target));
                }
                selects = set.ids();
            }
            FieldValue::Record(related) => {
                self.check_model(&related, target)?;
                selects.push(related.id().ok_or_else(|| {
                    ModelError::Validation(format!("'{}' received an unsaved record", self.name))
                })?);
            }
            FieldValue::Json(JsonValue::Null) => {}
            FieldValue::Json(JsonValue::Array(items)) => {
                for item in items {
                    match item {
                        JsonValue::Object(map) => {
                            inserts.push(map.into_iter().map(|(k, v)| (k, FieldValue::Json(v))).collect())
                        }
                        other => selects.push(json_as_i64(&other).ok_or_else(|| {
                            ModelError::Validation(format!("'{}' expects ids or objects, got {}", self.name, other))
                        })?),
                    }
                }
            }
            FieldValue::Json(JsonValue::Object(map)) => {
                inserts.push(map.into_iter().map(|(k, v)| (k, FieldValue::Json(v))).collect())
            }
            FieldValue::Json(other) => selects.push(json_as_i64(&other).ok_or_else(|| {
                ModelError::Validation(format!("'{}' expects ids or objects, got {}", self.name, other))
            })?),
        }

        if inserts.is_empty() && selects.is_empty() && !updating {
            return Ok(Resolved::value(FieldValue::null()));
        }

        let (db, _) = record.context()?;
        let child = RecordSet::with_parent(&db, target, record, self)?;
        let mut pending = Vec::new();
        if !inserts.is_empty() {
            pending.extend(child.insert_pending(inserts)?.pending);
        }
        if !selects.is_empty() {
            pending.extend(child.select_pending(Where::Ids(selects), &[], None)?);
        }
        if updating {
            child.clear_relation(&child.ids())?;
        }

        Ok(Resolved {
            value: FieldValue::Set(child),
            pending,
        })
    }

    fn check_model(&self, related: &Record, target: &str) -> OrmResult<()> {
        match related.model_name() {
            Some(model) if model == target => Ok(()),
            Some(model) => Err(self.mismatch(&model, target)),
            None => Err(self.mismatch("(detached)", target)),
        }
    }

    fn mismatch(&self, got: &str, target: &str) -> ModelError {
        ModelError::Relationship(format!(
            "'{}' expects '{}' records, got '{}'",
            self.name, target, got
        ))
    }

    /// Coerce a value into a bindable parameter
    pub(crate) fn ensure_stored_value(&self, value: &FieldValue, record: &Record) -> OrmResult<Param> {
        let value = match &self.store {
            Store::Method(method) => record.call(method, vec![value.clone()])?,
            _ => value.clone(),
        };

        Ok(match value {
            FieldValue::Record(related) => Param::RecordId(related),
            FieldValue::Set(set) => Param::Value(DatabaseValue::String(serde_json::to_string(&set.ids())?)),
            FieldValue::Json(json) => Param::Value(DatabaseValue::from_json(&json)),
        })
    }

    /// Turn a raw column value into its typed form
    pub(crate) fn ensure_retrieved_value(&self, value: FieldValue, record: &Record) -> OrmResult<FieldValue> {
        let resolved = match self.relation() {
            Some(RelationKind::ManyToOne) => match value.as_json().and_then(json_as_i64) {
                Some(id) => {
                    let (db, _) = record.context()?;
                    let set = RecordSet::new(&db, self.target_model()?)?;
                    set.select(Where::Id(id))?;
                    set.first().map_or_else(FieldValue::null, FieldValue::Record)
                }
                None => value,
            },
            Some(RelationKind::OneToMany) if !matches!(value, FieldValue::Set(_)) => {
                let (db, _) = record.context()?;
                let set = RecordSet::new(&db, self.target_model()?)?;
                if let Some(id) = record.id() {
                    set.select(Search::and().with(format!("{}:=", self.target_property()?), id))?;
                }
                set.set_parent(record, self);
                FieldValue::Set(set)
            }
            Some(RelationKind::ManyToMany) if !matches!(value, FieldValue::Set(_)) => {
                let (db, _) = record.context()?;
                let set = RecordSet::with_parent(&db, self.target_model()?, record, self)?;
                if let Some(id) = record.id() {
                    let statement = db.builder().select_nm(self, id)?;
                    for row in db.fetch_all(&statement)? {
                        set.push(Record::from_row(&row));
                    }
                }
                FieldValue::Set(set)
            }
            Some(_) => value,
            None => match value {
                FieldValue::Json(json) => FieldValue::Json(self.cast(json)),
                other => other,
            },
        };

        match &self.retrieve {
            Some(method) => record.call(method, vec![resolved]),
            None => Ok(resolved),
        }
    }

    fn cast(&self, json: JsonValue) -> JsonValue {
        if json.is_null() {
            return json;
        }
        match self.kind.as_str() {
            "bool" | "boolean" => JsonValue::Bool(match &json {
                JsonValue::Bool(b) => *b,
                JsonValue::Number(n) => n.as_f64() != Some(0.0),
                JsonValue::String(s) => !(s.is_empty() || s == "0" || s.eq_ignore_ascii_case("false")),
                _ => true,
            }),
            "int" | "integer" | "tinyint" | "smallint" | "mediumint" | "bigint" => {
                json_as_i64(&json).map_or(json, JsonValue::from)
            }
            "float" | "double" | "real" | "decimal" | "numeric" => match &json {
                JsonValue::Number(n) => n.as_f64().map_or(json.clone(), JsonValue::from),
                JsonValue::String(s) => s.trim().parse::<f64>().map_or(json.clone(), JsonValue::from),
                _ => json,
            },
            _ => json,
        }
    }
}

/// Outcome of `ensure_value`: the value to keep on the record, plus any
/// operations deferred until the record's own insert has produced an id
pub(crate) struct Resolved {
    pub value: FieldValue,
    pub pending: Vec<Pending>,
}

impl Resolved {
    fn value(value: FieldValue) -> Self {
        Self {
            value,
            pending: Vec::new(),
        }
    }
}

fn parse_target(target: &str) -> Option<(String, String)> {
    let (model, rest) = target.split_once('(')?;
    let property = rest.strip_suffix(')')?;
    let (model, property) = (model.trim(), property.trim());
    (is_identifier(model) && is_identifier(property)).then(|| (model.to_string(), property.to_string()))
}

/// `author_id` becomes `Author id`
fn label_for(name: &str) -> String {
    let text = name.replace('_', " ");
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => text,
    }
}
