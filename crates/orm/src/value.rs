//! Field values
//!
//! A record field holds either plain JSON (scalars, arrays, objects, null) or a
//! resolved relation: a single related [`Record`] or a related [`RecordSet`].

use std::collections::HashMap;

use serde_json::Value as JsonValue;

use crate::error::{ModelError, OrmResult};
use crate::record::Record;
use crate::recordset::RecordSet;

/// Value held by one field of a record
#[derive(Debug, Clone)]
pub enum FieldValue {
    Json(JsonValue),
    Record(Record),
    Set(RecordSet),
}

/// Field name to value map used for insert rows and update maps
pub type Values = HashMap<String, FieldValue>;

impl FieldValue {
    pub fn null() -> Self {
        FieldValue::Json(JsonValue::Null)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Json(JsonValue::Null))
    }

    /// Falsy in the loose sense: null, false, 0, "", empty array/object or empty set
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Json(JsonValue::Null) => true,
            FieldValue::Json(JsonValue::Bool(b)) => !b,
            FieldValue::Json(JsonValue::Number(n)) => n.as_f64() == Some(0.0),
            FieldValue::Json(JsonValue::String(s)) => s.is_empty() || s == "0",
            FieldValue::Json(JsonValue::Array(a)) => a.is_empty(),
            FieldValue::Json(JsonValue::Object(o)) => o.is_empty(),
            FieldValue::Record(_) => false,
            FieldValue::Set(set) => set.is_empty(),
        }
    }

    pub fn as_json(&self) -> Option<&JsonValue> {
        match self {
            FieldValue::Json(json) => Some(json),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            FieldValue::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&RecordSet> {
        match self {
            FieldValue::Set(set) => Some(set),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_json().and_then(JsonValue::as_str)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Json(JsonValue::Number(n)) => n.as_f64(),
            FieldValue::Json(JsonValue::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.as_json().and_then(JsonValue::as_bool)
    }

    /// Integer view; numeric strings are parsed and records yield their id
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Json(json) => json_as_i64(json),
            FieldValue::Record(record) => record.id(),
            FieldValue::Set(_) => None,
        }
    }

    /// JSON rendering; relations expand while `depth > 0`, else collapse to ids
    pub fn to_json(&self, depth: usize) -> JsonValue {
        match self {
            FieldValue::Json(json) => json.clone(),
            FieldValue::Record(record) if depth > 0 => record.to_json(depth - 1),
            FieldValue::Record(record) => record.id().map_or(JsonValue::Null, JsonValue::from),
            FieldValue::Set(set) if depth > 0 => set.to_json(depth - 1),
            FieldValue::Set(set) => JsonValue::from(set.ids()),
        }
    }
}

pub(crate) fn json_as_i64(json: &JsonValue) -> Option<i64> {
    match json {
        JsonValue::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl Default for FieldValue {
    fn default() -> Self {
        FieldValue::null()
    }
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (FieldValue::Json(a), FieldValue::Json(b)) => a == b,
            (FieldValue::Record(a), FieldValue::Record(b)) => a.ptr_eq(b),
            (FieldValue::Set(a), FieldValue::Set(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl From<JsonValue> for FieldValue {
    fn from(value: JsonValue) -> Self {
        FieldValue::Json(value)
    }
}

impl From<Record> for FieldValue {
    fn from(value: Record) -> Self {
        FieldValue::Record(value)
    }
}

impl From<RecordSet> for FieldValue {
    fn from(value: RecordSet) -> Self {
        FieldValue::Set(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Json(JsonValue::from(value))
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Json(JsonValue::from(value))
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Json(JsonValue::from(value))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Json(JsonValue::from(value))
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Json(JsonValue::from(value))
    }
}

/// Conversion into a [`Values`] map
pub trait IntoValues {
    fn into_values(self) -> OrmResult<Values>;
}

impl IntoValues for Values {
    fn into_values(self) -> OrmResult<Values> {
        Ok(self)
    }
}

impl IntoValues for JsonValue {
    fn into_values(self) -> OrmResult<Values> {
        match self {
            JsonValue::Object(map) => Ok(map
                .into_iter()
                .map(|(key, value)| (key, FieldValue::Json(value)))
                .collect()),
            other => Err(ModelError::Validation(format!(
                "expected an object of field values, got {}",
                other
            ))),
        }
    }
}

impl<K: Into<String>, V: Into<FieldValue>, const N: usize> IntoValues for [(K, V); N] {
    fn into_values(self) -> OrmResult<Values> {
        Ok(self
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_emptiness_follows_loose_truthiness() {
        assert!(FieldValue::null().is_empty());
        assert!(FieldValue::from(json!([])).is_empty());
        assert!(FieldValue::from(0i64).is_empty());
        assert!(FieldValue::from("0").is_empty());
        assert!(!FieldValue::from(json!([{"title": "T"}])).is_empty());
        assert!(!FieldValue::from("x").is_empty());
    }

    #[test]
    fn test_integer_view() {
        assert_eq!(FieldValue::from(json!(5)).as_i64(), Some(5));
        assert_eq!(FieldValue::from("12").as_i64(), Some(12));
        assert_eq!(FieldValue::from(json!(3.0)).as_i64(), Some(3));
        assert_eq!(FieldValue::from("abc").as_i64(), None);
    }

    #[test]
    fn test_json_object_into_values() {
        let values = json!({"name": "X", "age": 3}).into_values().unwrap();
        assert_eq!(values["name"], FieldValue::from("X"));
        assert!(json!([1, 2]).into_values().is_err());
    }

    #[test]
    fn test_pairs_into_values() {
        let values = [("status", "closed")].into_values().unwrap();
        assert_eq!(values.get("status"), Some(&FieldValue::from("closed")));
    }
}
