//! SQLite dialect

use super::{base_type, is_float_type, is_integer_type, Builder, Param, Statement};
use crate::backends::SqlDialect;
use crate::error::OrmResult;
use crate::property::{Property, RelationKind};

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteBuilder;

impl Builder for SqliteBuilder {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::SQLite
    }

    fn init_statements(&self) -> Vec<String> {
        vec!["PRAGMA foreign_keys = ON".to_string()]
    }

    fn insert_ignore(&self, table: &str, columns: &[&str], values: &str) -> String {
        let columns: Vec<String> = columns.iter().map(|c| self.quote(c)).collect();
        format!(
            "INSERT OR IGNORE INTO {} ({}) VALUES {}",
            self.quote(table),
            columns.join(", "),
            values
        )
    }

    fn exists_table(&self, table: &str) -> Statement {
        Statement {
            sql: "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?".to_string(),
            params: vec![Param::from(table)],
        }
    }

    fn exists_column(&self, table: &str, column: &str) -> Statement {
        Statement {
            sql: "SELECT COUNT(*) FROM pragma_table_info(?) WHERE name = ?".to_string(),
            params: vec![Param::from(table), Param::from(column)],
        }
    }

    fn column_type(&self, property: &Property) -> String {
        match property.relation() {
            Some(RelationKind::ManyToOne) => return "INTEGER".to_string(),
            Some(_) => return "TEXT".to_string(),
            None => {}
        }
        let kind = base_type(&property.kind);
        match kind.as_str() {
            "bool" | "boolean" => "INTEGER".to_string(),
            k if is_integer_type(k) => "INTEGER".to_string(),
            k if is_float_type(k) => "REAL".to_string(),
            "varchar" | "char" => format!("VARCHAR({})", property.length.unwrap_or(255)),
            // dates and json are kept as text
            _ => "TEXT".to_string(),
        }
    }

    fn primary_key_definition(&self) -> String {
        format!("{} INTEGER PRIMARY KEY", self.quote("id"))
    }

    // Existing columns cannot be modified without rebuilding the table
    fn alter_column(&self, _table: &str, _property: &Property) -> Option<String> {
        None
    }

    /// `n1` columns carry their reference inline; SQLite has no ADD CONSTRAINT
    fn add_column(&self, table: &str, property: &Property) -> String {
        let mut sql = format!(
            "ALTER TABLE {} ADD COLUMN {}",
            self.quote(table),
            self.column_definition(property)
        );
        if let (Some(RelationKind::ManyToOne), Some(target)) = (property.relation(), &property.target_model) {
            sql.push_str(&format!(
                " REFERENCES {} ({}) ON DELETE {} ON UPDATE {}",
                self.quote(target),
                self.quote("id"),
                property.ondelete,
                property.onupdate
            ));
        }
        sql
    }

    fn add_foreign_key(&self, _table: &str, _property: &Property) -> OrmResult<Option<String>> {
        Ok(None)
    }

    fn create_delegate_trigger(&self, table: &str, delegate: &Property) -> OrmResult<Option<String>> {
        Ok(Some(format!(
            "CREATE TRIGGER IF NOT EXISTS {} AFTER DELETE ON {} FOR EACH ROW BEGIN \
             DELETE FROM {} WHERE {} = OLD.{}; END",
            self.quote(&format!("{}_delete_{}", table, delegate.name)),
            self.quote(table),
            self.quote(delegate.target_model()?),
            self.quote("id"),
            self.quote(&delegate.name)
        )))
    }
}
