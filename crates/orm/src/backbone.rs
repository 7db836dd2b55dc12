//! Model backbones
//!
//! A [`Backbone`] is the merged definition of one model: its properties, method
//! stacks and constants, assembled from every registered schema module. One
//! backbone is built per model name and shared process-wide.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::{Lazy, OnceCell};
use serde_json::Value as JsonValue;

use crate::error::{ModelError, OrmResult};
use crate::method::MethodStack;
use crate::module::{modules, Member, PropertyDef};
use crate::property::{Property, RelationKind};
use crate::search::is_identifier;

static BACKBONES: Lazy<DashMap<String, Arc<OnceCell<Arc<Backbone>>>>> = Lazy::new(DashMap::new);

thread_local! {
    /// Models whose backbone is being built on this thread, for `@extend` cycles
    static BUILDING: RefCell<Vec<String>> = RefCell::new(Vec::new());
}

struct BuildGuard;

impl BuildGuard {
    fn enter(name: &str) -> OrmResult<Self> {
        BUILDING.with(|building| {
            let mut building = building.borrow_mut();
            if building.iter().any(|model| model == name) {
                return Err(ModelError::Schema(format!(
                    "cyclic @extend: {} -> {}",
                    building.join(" -> "),
                    name
                )));
            }
            building.push(name.to_string());
            Ok(BuildGuard)
        })
    }
}

impl Drop for BuildGuard {
    fn drop(&mut self) {
        BUILDING.with(|building| {
            building.borrow_mut().pop();
        });
    }
}

#[derive(Clone, Default)]
pub struct Backbone {
    name: String,
    constants: HashMap<String, JsonValue>,
    properties: Vec<Property>,
    index: HashMap<String, usize>,
    methods: HashMap<String, MethodStack>,
}

impl Backbone {
    /// Shared backbone for `name`, built on first use
    pub fn get_instance(name: &str) -> OrmResult<Arc<Backbone>> {
        // Clone the cell out so no map guard is held while building
        let cell = BACKBONES.entry(name.to_string()).or_default().clone();
        if let Some(backbone) = cell.get() {
            return Ok(backbone.clone());
        }
        let _guard = BuildGuard::enter(name)?;
        cell.get_or_try_init(|| Self::build(name).map(Arc::new)).cloned()
    }

    /// Rebuild `name` from the modules and replace the shared instance
    pub fn reload(name: &str) -> OrmResult<Arc<Backbone>> {
        let _guard = BuildGuard::enter(name)?;
        let backbone = Arc::new(Self::build(name)?);
        let cell = OnceCell::new();
        let _ = cell.set(backbone.clone());
        BACKBONES.insert(name.to_string(), Arc::new(cell));
        Ok(backbone)
    }

    /// Forget every built backbone
    pub fn reset() {
        BACKBONES.clear();
    }

    fn build(name: &str) -> OrmResult<Backbone> {
        if !is_identifier(name) {
            return Err(ModelError::Schema(format!("invalid model name '{}'", name)));
        }

        let mut backbone = Backbone {
            name: name.to_string(),
            ..Default::default()
        };
        backbone.put_property(Property::primary_key());

        for module in modules() {
            if let Some(skeleton) = module.skeleton(name)? {
                tracing::debug!("Module '{}' contributes to model '{}'", module.name(), name);
                for (key, member) in skeleton.into_members() {
                    backbone.set_member(&key, member)?;
                }
            }
        }

        if backbone.properties.len() < 2 {
            return Err(ModelError::Schema(format!(
                "no definition could be resolved for model '{}'",
                name
            )));
        }
        for property in &backbone.properties {
            property.validate()?;
        }
        if let Some(delegate) = backbone.delegate() {
            let is_many_to_one = backbone
                .property(delegate)
                .map_or(false, |property| property.relation() == Some(RelationKind::ManyToOne));
            if !is_many_to_one {
                return Err(ModelError::Schema(format!(
                    "delegate '{}' of model '{}' must be a many-to-one property",
                    delegate, name
                )));
            }
        }
        Ok(backbone)
    }

    fn set_member(&mut self, key: &str, member: Member) -> OrmResult<()> {
        match member {
            Member::Extend(model) => {
                let other = Self::get_instance(&model)?;
                for property in &other.properties {
                    self.put_property(property.clone());
                }
                for (name, stack) in &other.methods {
                    self.methods.insert(name.clone(), stack.clone());
                }
                self.constants.insert("@extend".to_string(), JsonValue::String(model));
            }
            Member::Method(f) => self.methods.entry(key.to_string()).or_default().push(f),
            Member::Constant(value) => {
                self.constants.insert(key.to_string(), value);
            }
            Member::Property(def) => self.set_property(key, &def)?,
        }
        Ok(())
    }

    fn set_property(&mut self, name: &str, def: &PropertyDef) -> OrmResult<()> {
        match self.index.get(name) {
            Some(&i) => self.properties[i].define(def),
            None => {
                if !is_identifier(name) {
                    return Err(ModelError::Schema(format!(
                        "invalid field name '{}' on model '{}'",
                        name, self.name
                    )));
                }
                let mut property = Property::new(name);
                property.define(def)?;
                self.put_property(property);
                Ok(())
            }
        }
    }

    fn put_property(&mut self, property: Property) {
        match self.index.get(&property.name) {
            Some(&i) => self.properties[i] = property,
            None => {
                self.index.insert(property.name.clone(), self.properties.len());
                self.properties.push(property);
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Properties in definition order, `id` first
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.index.get(name).map(|&i| &self.properties[i])
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn stored_properties(&self) -> impl Iterator<Item = &Property> {
        self.properties.iter().filter(|p| p.is_stored())
    }

    pub fn method(&self, name: &str) -> Option<&MethodStack> {
        self.methods.get(name)
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn constant(&self, key: &str) -> Option<&JsonValue> {
        self.constants.get(key)
    }

    /// Field whose target record stands in for undefined properties
    pub fn delegate(&self) -> Option<&str> {
        self.constant("@delegate").and_then(JsonValue::as_str)
    }

    /// `@unique` columns, given as a list or a comma separated string
    pub fn unique(&self) -> Vec<String> {
        match self.constant("@unique") {
            Some(JsonValue::Array(items)) => items
                .iter()
                .filter_map(JsonValue::as_str)
                .map(String::from)
                .collect(),
            Some(JsonValue::String(fields)) => fields
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(String::from)
                .collect(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Debug for Backbone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backbone")
            .field("name", &self.name)
            .field("properties", &self.properties.iter().map(|p| &p.name).collect::<Vec<_>>())
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("constants", &self.constants)
            .finish()
    }
}
