//! Schema modules
//!
//! Application modules contribute model skeletons: for a model name each module
//! returns an ordered list of members (field definitions, methods, constants and
//! `@extend`). Modules are consulted in registration order and their
//! contributions merged into the model's [`crate::Backbone`].

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use once_cell::sync::Lazy;
use serde_json::{Map, Value as JsonValue};

use crate::error::{ModelError, OrmResult};
use crate::method::{method, MethodCall, MethodFn};
use crate::value::FieldValue;

static MODULES: Lazy<RwLock<Vec<Arc<dyn SchemaModule>>>> = Lazy::new(|| RwLock::new(Vec::new()));

/// Source of model skeletons
pub trait SchemaModule: Send + Sync {
    fn name(&self) -> &str;

    /// Members this module contributes to `model`, if any
    fn skeleton(&self, model: &str) -> OrmResult<Option<Skeleton>>;
}

/// Register a module; later modules override earlier ones attribute by attribute
pub fn register_module<M: SchemaModule + 'static>(module: M) {
    let mut modules = MODULES.write().unwrap_or_else(|e| e.into_inner());
    tracing::debug!("Registering schema module '{}'", module.name());
    modules.push(Arc::new(module));
}

pub fn clear_modules() {
    MODULES.write().unwrap_or_else(|e| e.into_inner()).clear();
}

pub(crate) fn modules() -> Vec<Arc<dyn SchemaModule>> {
    MODULES.read().unwrap_or_else(|e| e.into_inner()).clone()
}

/// Unmerged definition of one field
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyDef {
    /// Positional type; only the first definition that carries one sets it
    pub kind: Option<String>,
    /// Named attributes; later definitions overwrite per key
    pub options: Map<String, JsonValue>,
}

impl PropertyDef {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            options: Map::new(),
        }
    }

    /// Attributes only, keeping whatever type an earlier module set
    pub fn attrs() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn length(self, length: u32) -> Self {
        self.with("length", length)
    }

    pub fn required(self) -> Self {
        self.with("required", true)
    }

    pub fn required_message(self, message: impl Into<String>) -> Self {
        self.with("required", message.into())
    }

    pub fn default_value(self, value: impl Into<JsonValue>) -> Self {
        self.with("default", value)
    }

    pub fn target(self, target: impl Into<String>) -> Self {
        self.with("target", target.into())
    }

    pub fn label(self, label: impl Into<String>) -> Self {
        self.with("label", label.into())
    }

    pub fn store(self, store: bool) -> Self {
        self.with("store", store)
    }

    /// Store the value computed by the named record method
    pub fn store_with(self, method: impl Into<String>) -> Self {
        self.with("store", method.into())
    }

    pub fn retrieve_with(self, method: impl Into<String>) -> Self {
        self.with("retrieve", method.into())
    }

    pub fn readonly(self) -> Self {
        self.with("readonly", true)
    }

    pub fn ondelete(self, action: impl Into<String>) -> Self {
        self.with("ondelete", action.into())
    }

    pub fn onupdate(self, action: impl Into<String>) -> Self {
        self.with("onupdate", action.into())
    }

    /// Accepts `"varchar"`, `["varchar", {"length": 100}]` or `{"type": "varchar", ...}`
    pub fn from_json(json: &JsonValue) -> OrmResult<Self> {
        match json {
            JsonValue::String(kind) => Ok(Self::new(kind.clone())),
            JsonValue::Array(items) => {
                let mut def = Self::attrs();
                for item in items {
                    match item {
                        JsonValue::String(kind) if def.kind.is_none() => def.kind = Some(kind.clone()),
                        JsonValue::Null => {}
                        JsonValue::Object(options) => def.options.extend(options.clone()),
                        other => {
                            return Err(ModelError::Schema(format!(
                                "unexpected item {} in field definition",
                                other
                            )))
                        }
                    }
                }
                Ok(def)
            }
            JsonValue::Object(options) => {
                let mut options = options.clone();
                let kind = match options.remove("type") {
                    Some(JsonValue::String(kind)) => Some(kind),
                    None | Some(JsonValue::Null) => None,
                    Some(other) => {
                        return Err(ModelError::Schema(format!("invalid field type {}", other)))
                    }
                };
                Ok(Self { kind, options })
            }
            other => Err(ModelError::Schema(format!("invalid field definition {}", other))),
        }
    }
}

/// One contributed member
#[derive(Clone)]
pub enum Member {
    Property(PropertyDef),
    Method(MethodFn),
    Extend(String),
    Constant(JsonValue),
}

impl std::fmt::Debug for Member {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Member::Property(def) => f.debug_tuple("Property").field(def).finish(),
            Member::Method(_) => f.write_str("Method(..)"),
            Member::Extend(model) => f.debug_tuple("Extend").field(model).finish(),
            Member::Constant(value) => f.debug_tuple("Constant").field(value).finish(),
        }
    }
}

/// Ordered member list a module contributes for one model
#[derive(Debug, Clone, Default)]
pub struct Skeleton {
    members: Vec<(String, Member)>,
}

impl Skeleton {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn property(mut self, name: impl Into<String>, def: PropertyDef) -> Self {
        self.members.push((name.into(), Member::Property(def)));
        self
    }

    /// Record method; use an `@`-prefixed name for a recordset method
    pub fn method<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&MethodCall<'_>) -> OrmResult<FieldValue> + Send + Sync + 'static,
    {
        self.members.push((name.into(), Member::Method(method(f))));
        self
    }

    pub fn extend(mut self, model: impl Into<String>) -> Self {
        self.members.push(("@extend".to_string(), Member::Extend(model.into())));
        self
    }

    /// Model-level constant such as `@delegate` or `@unique`
    pub fn constant(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.members.push((key.into(), Member::Constant(value.into())));
        self
    }

    pub fn delegate(self, field: impl Into<String>) -> Self {
        self.constant("@delegate", field.into())
    }

    pub fn unique(self, fields: &[&str]) -> Self {
        self.constant("@unique", fields.to_vec())
    }

    pub fn members(&self) -> &[(String, Member)] {
        &self.members
    }

    pub fn into_members(self) -> Vec<(String, Member)> {
        self.members
    }

    /// Build from a JSON object; `@extend` and other `@` keys become
    /// extension and constants, the rest field definitions
    pub fn from_json(json: &JsonValue) -> OrmResult<Self> {
        let object = json
            .as_object()
            .ok_or_else(|| ModelError::Schema(format!("model skeleton must be an object, got {}", json)))?;

        let mut skeleton = Skeleton::new();
        for (key, value) in object {
            skeleton = match key.as_str() {
                "@extend" => match value.as_str() {
                    Some(model) => skeleton.extend(model),
                    None => return Err(ModelError::Schema("@extend expects a model name".to_string())),
                },
                k if k.starts_with('@') => skeleton.constant(k, value.clone()),
                k => skeleton.property(k, PropertyDef::from_json(value)?),
            };
        }
        Ok(skeleton)
    }
}

/// Module backed by a closure
pub struct FnModule<F> {
    name: String,
    loader: F,
}

impl<F> FnModule<F>
where
    F: Fn(&str) -> Option<Skeleton> + Send + Sync,
{
    pub fn new(name: impl Into<String>, loader: F) -> Self {
        Self {
            name: name.into(),
            loader,
        }
    }
}

impl<F> SchemaModule for FnModule<F>
where
    F: Fn(&str) -> Option<Skeleton> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn skeleton(&self, model: &str) -> OrmResult<Option<Skeleton>> {
        Ok((self.loader)(model))
    }
}

/// Module reading `{root}/models/{model}.json`
#[derive(Debug, Clone)]
pub struct DirectoryModule {
    name: String,
    root: PathBuf,
}

impl DirectoryModule {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
        }
    }

    fn model_path(&self, model: &str) -> PathBuf {
        self.root.join("models").join(format!("{}.json", model))
    }
}

impl SchemaModule for DirectoryModule {
    fn name(&self) -> &str {
        &self.name
    }

    fn skeleton(&self, model: &str) -> OrmResult<Option<Skeleton>> {
        let path = self.model_path(model);
        if !path.is_file() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path).map_err(|e| {
            ModelError::Schema(format!("cannot read {}: {}", path.display(), e))
        })?;
        let json: JsonValue = serde_json::from_str(&content)?;
        Skeleton::from_json(&json).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_property_def_shapes() {
        let def = PropertyDef::from_json(&json!(["varchar", {"length": 100, "required": true}])).unwrap();
        assert_eq!(def.kind.as_deref(), Some("varchar"));
        assert_eq!(def.options["length"], json!(100));

        let def = PropertyDef::from_json(&json!({"type": "1n", "target": "book(author)"})).unwrap();
        assert_eq!(def.kind.as_deref(), Some("1n"));
        assert_eq!(def.options["target"], json!("book(author)"));

        let def = PropertyDef::from_json(&json!({"label": "Full name"})).unwrap();
        assert!(def.kind.is_none());
    }

    #[test]
    fn test_skeleton_from_json() {
        let skeleton = Skeleton::from_json(&json!({
            "@extend": "person",
            "@unique": ["email"],
            "email": "varchar"
        }))
        .unwrap();

        let keys: Vec<_> = skeleton.members().iter().map(|(k, _)| k.as_str()).collect();
        assert!(keys.contains(&"@extend"));
        assert!(matches!(
            skeleton.members().iter().find(|(k, _)| k == "@unique"),
            Some((_, Member::Constant(_)))
        ));
        assert!(matches!(
            skeleton.members().iter().find(|(k, _)| k == "email"),
            Some((_, Member::Property(_)))
        ));
    }

    #[test]
    fn test_directory_module_reads_model_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("models")).unwrap();
        std::fs::write(
            dir.path().join("models").join("tag.json"),
            r#"{"label": ["varchar", {"length": 40}]}"#,
        )
        .unwrap();

        let module = DirectoryModule::new("tags", dir.path());
        let skeleton = module.skeleton("tag").unwrap().unwrap();
        assert_eq!(skeleton.members().len(), 1);
        assert!(module.skeleton("missing").unwrap().is_none());
    }
}
