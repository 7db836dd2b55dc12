//! # elif-recordset: record and recordset ORM
//!
//! Models are assembled at runtime from schema modules into backbones. Rows are
//! handled through [`Record`] and [`RecordSet`], which resolve many-to-one,
//! one-to-many and many-to-many relations and write nested rows in the right
//! order. SQL is generated per dialect (SQLite, MySQL, PostgreSQL) by the
//! [`Builder`] the [`Connector`] picks at connect time.

pub mod backbone;
pub mod backends;
pub mod builder;
pub mod config;
pub mod connector;
pub mod error;
pub mod method;
pub mod module;
pub mod property;
pub mod record;
pub mod recordset;
pub mod search;
pub mod value;

// Re-export core types
pub use backbone::Backbone;
pub use backends::{DatabaseBackendType, DatabaseConnection, DatabaseRow, DatabaseValue, SqlxConnection};
pub use builder::{Builder, Param, Statement};
pub use config::{ConfigError, ConnectorConfig};
pub use connector::{Connector, ConnectorInfo};
pub use error::*;
pub use method::{method, MethodCall, MethodFn, MethodStack, Receiver};
pub use module::{clear_modules, register_module, DirectoryModule, FnModule, PropertyDef, SchemaModule, Skeleton};
pub use property::{Junction, Property, RelationKind, Required, Store};
pub use record::{Record, WeakRecord};
pub use recordset::RecordSet;
pub use search::{Limit, Operator, OrderBy, Search, Union, Where};
pub use value::{FieldValue, IntoValues, Values};

/// Drop every cached backbone, registered module and bound-model mark
pub fn reset() {
    Backbone::reset();
    clear_modules();
    recordset::reset_bound(None);
}
