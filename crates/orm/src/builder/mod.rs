//! SQL builders
//!
//! A [`Builder`] turns structured options into SQL text plus bound parameters.
//! Builders hold no state. The shared statement shapes live in the trait's
//! default methods; each dialect overrides where it diverges (quoting, id
//! ordering after a multi-row insert, LIMIT syntax, DDL types and ALTER support).

pub mod mysql;
pub mod postgres;
pub mod sqlite;

use std::fmt;

use serde_json::Value as JsonValue;

pub use mysql::MySqlBuilder;
pub use postgres::PostgresBuilder;
pub use sqlite::SqliteBuilder;

use crate::backends::{DatabaseBackendType, DatabaseValue, SqlDialect};
use crate::error::{ModelError, OrmResult};
use crate::property::{Property, RelationKind};
use crate::record::Record;
use crate::search::{is_identifier, split_key, Limit, Operator, OrderBy, Search, Term};

/// A bound statement parameter
#[derive(Debug, Clone)]
pub enum Param {
    Value(DatabaseValue),
    /// Id of a record that may not be inserted yet; read when the statement runs
    RecordId(Record),
}

impl Param {
    pub fn resolve(&self) -> OrmResult<DatabaseValue> {
        match self {
            Param::Value(value) => Ok(value.clone()),
            Param::RecordId(record) => record.id().map(DatabaseValue::Int64).ok_or_else(|| {
                ModelError::Relationship(format!(
                    "referenced '{}' record has no id yet",
                    record.model_name().unwrap_or_default()
                ))
            }),
        }
    }
}

impl From<DatabaseValue> for Param {
    fn from(value: DatabaseValue) -> Self {
        Param::Value(value)
    }
}

impl From<i64> for Param {
    fn from(value: i64) -> Self {
        Param::Value(DatabaseValue::Int64(value))
    }
}

impl From<&str> for Param {
    fn from(value: &str) -> Self {
        Param::Value(DatabaseValue::from(value))
    }
}

impl From<&JsonValue> for Param {
    fn from(value: &JsonValue) -> Self {
        Param::Value(DatabaseValue::from_json(value))
    }
}

/// SQL text with its positional parameters
#[derive(Debug, Clone, Default)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Param>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Concrete parameter values; fails while a referenced record lacks an id
    pub fn resolve_params(&self) -> OrmResult<Vec<DatabaseValue>> {
        self.params.iter().map(Param::resolve).collect()
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

impl From<String> for Statement {
    fn from(sql: String) -> Self {
        Statement::new(sql)
    }
}

/// Dialect specific SQL generation
pub trait Builder: fmt::Debug {
    fn dialect(&self) -> SqlDialect;

    /// Statements run once right after connecting
    fn init_statements(&self) -> Vec<String> {
        Vec::new()
    }

    fn quote(&self, identifier: &str) -> String {
        let q = self.dialect().identifier_quote();
        let escaped = identifier.replace(q, &format!("{}{}", q, q));
        format!("{}{}{}", q, escaped, q)
    }

    fn column(&self, table: &str, field: &str) -> String {
        format!("{}.{}", self.quote(table), self.quote(field))
    }

    /// Append a placeholder for `param`; nulls are written inline
    fn bind(&self, sql: &mut String, params: &mut Vec<Param>, param: Param) {
        if matches!(param, Param::Value(DatabaseValue::Null)) {
            sql.push_str("NULL");
            return;
        }
        sql.push_str(&self.dialect().parameter_placeholder(params.len()));
        params.push(param);
    }

    fn bind_list(&self, sql: &mut String, params: &mut Vec<Param>, ids: &[i64]) {
        sql.push('(');
        for (i, id) in ids.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            self.bind(sql, params, Param::from(*id));
        }
        sql.push(')');
    }

    /// Ids assigned by a multi-row insert of `count` rows, in row order.
    /// The default treats `last_insert_id` as the id of the last row.
    fn inserted_ids(&self, last_insert_id: i64, count: usize) -> Vec<i64> {
        (0..count as i64).rev().map(|offset| last_insert_id - offset).collect()
    }

    fn limit_clause(&self, limit: &Limit) -> String {
        format!(" LIMIT {}, {}", limit.offset, limit.count)
    }

    /// Value for the id column when a row has no stored fields
    fn default_id_value(&self) -> &'static str {
        "NULL"
    }

    /// `INSERT ... VALUES {values}` that skips rows already present
    fn insert_ignore(&self, table: &str, columns: &[&str], values: &str) -> String;

    /// Compile one search level, wrapping it in parentheses
    fn search(&self, table: &str, search: &Search, sql: &mut String, params: &mut Vec<Param>) -> OrmResult<()> {
        let terms: Vec<&Term> = search
            .terms
            .iter()
            .filter(|term| !matches!(term, Term::Group(group) if group.is_empty()))
            .collect();

        sql.push('(');
        for (i, term) in terms.into_iter().enumerate() {
            if i > 0 {
                sql.push_str(search.union.separator());
            }
            match term {
                Term::Condition { key, value } => self.condition(table, key, value, sql, params)?,
                Term::Group(group) => self.search(table, group, sql, params)?,
            }
        }
        sql.push(')');
        Ok(())
    }

    fn condition(
        &self,
        table: &str,
        key: &str,
        value: &JsonValue,
        sql: &mut String,
        params: &mut Vec<Param>,
    ) -> OrmResult<()> {
        let (field, operator) = split_key(key)?;
        let column = self.column(table, field);

        match operator {
            Operator::Eq if value.is_null() => sql.push_str(&format!("{} IS NULL", column)),
            Operator::Compare("!=" | "<>") if value.is_null() => {
                sql.push_str(&format!("{} IS NOT NULL", column))
            }
            Operator::Eq => {
                sql.push_str(&format!("{} = ", column));
                self.bind(sql, params, Param::from(value));
            }
            Operator::Compare(op) => {
                sql.push_str(&format!("{} {} ", column, op));
                self.bind(sql, params, Param::from(value));
            }
            Operator::Between => match value.as_array().map(Vec::as_slice) {
                Some([low, high]) => {
                    sql.push_str(&format!("{} BETWEEN ", column));
                    self.bind(sql, params, Param::from(low));
                    sql.push_str(" AND ");
                    self.bind(sql, params, Param::from(high));
                }
                _ => {
                    return Err(ModelError::Query(format!(
                        "'{}' expects a [low, high] pair, got {}",
                        key, value
                    )))
                }
            },
            Operator::In | Operator::NotIn => {
                let items = match value {
                    JsonValue::Array(items) => items.iter().collect::<Vec<_>>(),
                    single => vec![single],
                };
                let negated = operator == Operator::NotIn;
                if items.is_empty() {
                    sql.push_str(if negated { "1 = 1" } else { "1 = 0" });
                    return Ok(());
                }
                sql.push_str(&format!("{} {} (", column, if negated { "NOT IN" } else { "IN" }));
                for (i, item) in items.into_iter().enumerate() {
                    if i > 0 {
                        sql.push_str(", ");
                    }
                    self.bind(sql, params, Param::from(item));
                }
                sql.push(')');
            }
        }
        Ok(())
    }

    fn select(
        &self,
        table: &str,
        search: Option<&Search>,
        order: &[OrderBy],
        limit: Option<&Limit>,
    ) -> OrmResult<Statement> {
        let mut sql = format!("SELECT {}.* FROM {}", self.quote(table), self.quote(table));
        let mut params = Vec::new();

        if let Some(search) = search.filter(|search| !search.is_empty()) {
            sql.push_str(" WHERE ");
            self.search(table, search, &mut sql, &mut params)?;
        }

        sql.push_str(" ORDER BY ");
        if order.is_empty() {
            sql.push_str(&self.column(table, "id"));
        }
        for (i, term) in order.iter().enumerate() {
            if !is_identifier(&term.field) {
                return Err(ModelError::Query(format!("invalid order field '{}'", term.field)));
            }
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str(&self.column(table, &term.field));
            if term.descending {
                sql.push_str(" DESC");
            }
        }

        if let Some(limit) = limit {
            sql.push_str(&self.limit_clause(limit));
        }
        Ok(Statement { sql, params })
    }

    /// One multi-row INSERT; every row must match `columns`
    fn insert(&self, table: &str, columns: &[&str], rows: Vec<Vec<Param>>) -> OrmResult<Statement> {
        if rows.is_empty() {
            return Err(ModelError::Query(format!("nothing to insert into '{}'", table)));
        }

        let mut sql = format!("INSERT INTO {} (", self.quote(table));
        let mut params = Vec::new();

        if columns.is_empty() {
            sql.push_str(&self.quote("id"));
            sql.push_str(") VALUES ");
            let row = format!("({})", self.default_id_value());
            sql.push_str(&vec![row; rows.len()].join(", "));
            return Ok(Statement { sql, params });
        }

        let quoted: Vec<String> = columns.iter().map(|c| self.quote(c)).collect();
        sql.push_str(&quoted.join(", "));
        sql.push_str(") VALUES ");
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != columns.len() {
                return Err(ModelError::Query(format!(
                    "row {} has {} values for {} columns",
                    i,
                    row.len(),
                    columns.len()
                )));
            }
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push('(');
            for (j, param) in row.into_iter().enumerate() {
                if j > 0 {
                    sql.push_str(", ");
                }
                self.bind(&mut sql, &mut params, param);
            }
            sql.push(')');
        }
        Ok(Statement { sql, params })
    }

    fn update(&self, table: &str, columns: &[&str], values: Vec<Param>, ids: &[i64]) -> OrmResult<Statement> {
        if columns.is_empty() || columns.len() != values.len() {
            return Err(ModelError::Query(format!(
                "update of '{}' needs one value per column",
                table
            )));
        }
        if ids.is_empty() {
            return Err(ModelError::Query(format!("update of '{}' without target ids", table)));
        }

        let mut sql = format!("UPDATE {} SET ", self.quote(table));
        let mut params = Vec::new();
        for (i, (column, value)) in columns.iter().zip(values).enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push_str(&format!("{} = ", self.quote(column)));
            self.bind(&mut sql, &mut params, value);
        }
        sql.push_str(&format!(" WHERE {} IN ", self.quote("id")));
        self.bind_list(&mut sql, &mut params, ids);
        Ok(Statement { sql, params })
    }

    fn delete(&self, table: &str, ids: &[i64]) -> Statement {
        let mut sql = format!("DELETE FROM {} WHERE {} IN ", self.quote(table), self.quote("id"));
        let mut params = Vec::new();
        self.bind_list(&mut sql, &mut params, ids);
        Statement { sql, params }
    }

    /// Junction rows linking `parent_id` (the side owning `property`) to `ids`
    fn insert_nm(&self, property: &Property, parent_id: i64, ids: &[i64]) -> OrmResult<Statement> {
        let junction = property.junction()?;
        let mut values = String::new();
        let mut params = Vec::new();
        for (i, id) in ids.iter().enumerate() {
            if i > 0 {
                values.push_str(", ");
            }
            // The column named after the property holds the target id
            let pair = if junction.field_a == property.name {
                [*id, parent_id]
            } else {
                [parent_id, *id]
            };
            self.bind_list(&mut values, &mut params, &pair);
        }
        let sql = self.insert_ignore(&junction.name, &[&junction.field_a, &junction.field_b], &values);
        Ok(Statement { sql, params })
    }

    fn select_nm(&self, property: &Property, parent_id: i64) -> OrmResult<Statement> {
        let junction = property.junction()?;
        let target = property.target_model()?;
        let mut sql = format!(
            "SELECT {}.* FROM {} INNER JOIN {} ON {} = {} WHERE {} = ",
            self.quote(target),
            self.quote(target),
            self.quote(&junction.name),
            self.column(&junction.name, &property.name),
            self.column(target, "id"),
            self.column(&junction.name, property.target_property()?),
        );
        let mut params = Vec::new();
        self.bind(&mut sql, &mut params, Param::from(parent_id));
        sql.push_str(&format!(" ORDER BY {}", self.column(target, "id")));
        Ok(Statement { sql, params })
    }

    /// Null the back reference of `table` rows still pointing at `parent_id`
    fn orphan_1n(&self, table: &str, property: &Property, parent_id: i64, exclude: &[i64]) -> OrmResult<Statement> {
        let field = self.quote(property.target_property()?);
        let mut sql = format!("UPDATE {} SET {} = NULL WHERE {} = ", self.quote(table), field, field);
        let mut params = Vec::new();
        self.bind(&mut sql, &mut params, Param::from(parent_id));
        self.exclude_clause(&mut sql, &mut params, "id", exclude);
        Ok(Statement { sql, params })
    }

    fn clear_1n(&self, table: &str, property: &Property, parent_id: i64, exclude: &[i64]) -> OrmResult<Statement> {
        let mut sql = format!(
            "DELETE FROM {} WHERE {} = ",
            self.quote(table),
            self.quote(property.target_property()?)
        );
        let mut params = Vec::new();
        self.bind(&mut sql, &mut params, Param::from(parent_id));
        self.exclude_clause(&mut sql, &mut params, "id", exclude);
        Ok(Statement { sql, params })
    }

    fn clear_nm(&self, property: &Property, parent_id: i64, exclude: &[i64]) -> OrmResult<Statement> {
        let junction = property.junction()?;
        let mut sql = format!(
            "DELETE FROM {} WHERE {} = ",
            self.quote(&junction.name),
            self.quote(property.target_property()?)
        );
        let mut params = Vec::new();
        self.bind(&mut sql, &mut params, Param::from(parent_id));
        self.exclude_clause(&mut sql, &mut params, &property.name, exclude);
        Ok(Statement { sql, params })
    }

    fn exclude_clause(&self, sql: &mut String, params: &mut Vec<Param>, column: &str, exclude: &[i64]) {
        if !exclude.is_empty() {
            sql.push_str(&format!(" AND {} NOT IN ", self.quote(column)));
            self.bind_list(sql, params, exclude);
        }
    }

    // -- DDL --

    /// Statement returning a positive count when `table` exists
    fn exists_table(&self, table: &str) -> Statement;

    /// Statement returning a positive count when `table.column` exists
    fn exists_column(&self, table: &str, column: &str) -> Statement;

    /// Column type for a stored property
    fn column_type(&self, property: &Property) -> String;

    fn primary_key_definition(&self) -> String;

    /// Column type of both junction table columns
    fn junction_column_type(&self) -> &'static str {
        "INTEGER"
    }

    /// Trailing table options of CREATE TABLE
    fn table_options(&self) -> &'static str {
        ""
    }

    fn column_definition(&self, property: &Property) -> String {
        let mut definition = format!("{} {}", self.quote(&property.name), self.column_type(property));
        if property.is_required() {
            definition.push_str(" NOT NULL");
        }
        if property.relation().is_none() && !property.default.is_null() {
            definition.push_str(&format!(" DEFAULT {}", literal(&property.default)));
        }
        if let Some(sql) = &property.sql {
            definition.push(' ');
            definition.push_str(sql);
        }
        definition
    }

    fn foreign_key_clause(&self, property: &Property) -> OrmResult<String> {
        Ok(format!(
            "FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {} ON UPDATE {}",
            self.quote(&property.name),
            self.quote(property.target_model()?),
            self.quote("id"),
            property.ondelete,
            property.onupdate
        ))
    }

    /// CREATE TABLE with the given stored columns; `n1` columns get foreign keys
    fn create_table(&self, table: &str, uniques: &[String], properties: &[&Property]) -> OrmResult<String> {
        let mut lines = vec![self.primary_key_definition()];
        lines.extend(properties.iter().map(|p| self.column_definition(p)));
        if !uniques.is_empty() {
            let columns: Vec<String> = uniques.iter().map(|u| self.quote(u)).collect();
            lines.push(format!("UNIQUE ({})", columns.join(", ")));
        }
        for property in properties {
            if property.relation() == Some(RelationKind::ManyToOne) {
                lines.push(self.foreign_key_clause(property)?);
            }
        }
        Ok(format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n){}",
            self.quote(table),
            lines.join(",\n    "),
            self.table_options()
        ))
    }

    /// Junction table for `property` declared on `table`
    fn create_nm_table(&self, table: &str, property: &Property) -> OrmResult<String> {
        let junction = property.junction()?;
        let target = property.target_model()?;
        let (table_a, table_b) = if junction.field_a == property.name {
            (target, table)
        } else {
            (table, target)
        };
        let kind = self.junction_column_type();
        let (a, b) = (self.quote(&junction.field_a), self.quote(&junction.field_b));
        Ok(format!(
            "CREATE TABLE IF NOT EXISTS {j} (\n    {a} {kind} NOT NULL,\n    {b} {kind} NOT NULL,\n    \
             PRIMARY KEY ({a}, {b}),\n    \
             FOREIGN KEY ({a}) REFERENCES {ta} ({id}) ON DELETE CASCADE ON UPDATE CASCADE,\n    \
             FOREIGN KEY ({b}) REFERENCES {tb} ({id}) ON DELETE CASCADE ON UPDATE CASCADE\n){opts}",
            j = self.quote(&junction.name),
            a = a,
            b = b,
            kind = kind,
            ta = self.quote(table_a),
            tb = self.quote(table_b),
            id = self.quote("id"),
            opts = self.table_options(),
        ))
    }

    /// Bring an existing column in line with its definition, when supported
    fn alter_column(&self, table: &str, property: &Property) -> Option<String>;

    fn add_column(&self, table: &str, property: &Property) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.quote(table),
            self.column_definition(property)
        )
    }

    fn add_foreign_key(&self, table: &str, property: &Property) -> OrmResult<Option<String>> {
        Ok(Some(format!(
            "ALTER TABLE {} ADD CONSTRAINT {} {}",
            self.quote(table),
            self.quote(&format!("fk_{}_{}", table, property.name)),
            self.foreign_key_clause(property)?
        )))
    }

    /// Trigger removing the delegate row once its owner row is deleted
    fn create_delegate_trigger(&self, table: &str, delegate: &Property) -> OrmResult<Option<String>>;
}

/// Builder for the given backend
pub fn for_backend(backend: DatabaseBackendType) -> Box<dyn Builder> {
    match backend {
        DatabaseBackendType::SQLite => Box::new(SqliteBuilder),
        DatabaseBackendType::MySQL => Box::new(MySqlBuilder),
        DatabaseBackendType::PostgreSQL => Box::new(PostgresBuilder),
    }
}

/// SQL literal for a column DEFAULT
pub(crate) fn literal(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "NULL".to_string(),
        JsonValue::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}

/// Lower-cased base of a declared type, `VARCHAR(20)` becoming `varchar`
pub(crate) fn base_type(kind: &str) -> String {
    kind.split('(').next().unwrap_or(kind).trim().to_lowercase()
}

pub(crate) fn is_integer_type(kind: &str) -> bool {
    matches!(kind, "int" | "integer" | "tinyint" | "smallint" | "mediumint" | "bigint")
}

pub(crate) fn is_float_type(kind: &str) -> bool {
    matches!(kind, "float" | "double" | "real" | "decimal" | "numeric")
}

pub(crate) fn is_temporal_type(kind: &str) -> bool {
    matches!(kind, "date" | "datetime" | "time" | "timestamp")
}
