//! PostgreSQL dialect

use super::{base_type, is_float_type, is_integer_type, Builder, Param, Statement};
use crate::backends::SqlDialect;
use crate::error::OrmResult;
use crate::property::{Property, RelationKind};
use crate::search::Limit;

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresBuilder;

impl Builder for PostgresBuilder {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::PostgreSQL
    }

    fn limit_clause(&self, limit: &Limit) -> String {
        format!(" LIMIT {} OFFSET {}", limit.count, limit.offset)
    }

    fn default_id_value(&self) -> &'static str {
        "DEFAULT"
    }

    fn insert_ignore(&self, table: &str, columns: &[&str], values: &str) -> String {
        let columns: Vec<String> = columns.iter().map(|c| self.quote(c)).collect();
        format!(
            "INSERT INTO {} ({}) VALUES {} ON CONFLICT DO NOTHING",
            self.quote(table),
            columns.join(", "),
            values
        )
    }

    fn exists_table(&self, table: &str) -> Statement {
        Statement {
            sql: "SELECT COUNT(*) FROM information_schema.tables \
                  WHERE table_schema = current_schema() AND table_name = $1"
                .to_string(),
            params: vec![Param::from(table)],
        }
    }

    fn exists_column(&self, table: &str, column: &str) -> Statement {
        Statement {
            sql: "SELECT COUNT(*) FROM information_schema.columns \
                  WHERE table_schema = current_schema() AND table_name = $1 AND column_name = $2"
                .to_string(),
            params: vec![Param::from(table), Param::from(column)],
        }
    }

    fn column_type(&self, property: &Property) -> String {
        match property.relation() {
            Some(RelationKind::ManyToOne) => return "INTEGER".to_string(),
            Some(_) => return "JSONB".to_string(),
            None => {}
        }
        let kind = base_type(&property.kind);
        match kind.as_str() {
            "bool" | "boolean" => "SMALLINT".to_string(),
            "bigint" => "BIGINT".to_string(),
            k if is_integer_type(k) => "INTEGER".to_string(),
            k if is_float_type(k) => "DOUBLE PRECISION".to_string(),
            "varchar" | "char" => format!("VARCHAR({})", property.length.unwrap_or(255)),
            // temporal values and json travel as text through the driver
            _ => "TEXT".to_string(),
        }
    }

    fn primary_key_definition(&self) -> String {
        format!("{} SERIAL PRIMARY KEY", self.quote("id"))
    }

    fn alter_column(&self, table: &str, property: &Property) -> Option<String> {
        let column = self.quote(&property.name);
        Some(format!(
            "ALTER TABLE {} ALTER COLUMN {} TYPE {}, ALTER COLUMN {} {} NOT NULL",
            self.quote(table),
            column,
            self.column_type(property),
            column,
            if property.is_required() { "SET" } else { "DROP" }
        ))
    }

    // Row triggers need a trigger function; delegate rows are left to the foreign key
    fn create_delegate_trigger(&self, _table: &str, _delegate: &Property) -> OrmResult<Option<String>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::PropertyDef;
    use crate::search::Search;

    #[test]
    fn test_numbered_placeholders_skip_inline_nulls() {
        let search = Search::and()
            .with("name", "Ann")
            .with("deleted_at", serde_json::Value::Null)
            .with("age:between", serde_json::json!([1, 9]));
        let statement = PostgresBuilder
            .select("person", Some(&search), &[], Some(&Limit::new(20, 10)))
            .unwrap();

        assert!(statement.sql.contains(r#""person"."age" BETWEEN $2 AND $3"#));
        assert!(statement.sql.contains(r#""person"."name" = $1"#));
        assert!(statement.sql.contains(r#""person"."deleted_at" IS NULL"#));
        assert!(statement.sql.ends_with("LIMIT 10 OFFSET 20"));
        assert_eq!(statement.params.len(), 3);
    }

    #[test]
    fn test_ids_descend_from_lastval() {
        assert_eq!(PostgresBuilder.inserted_ids(12, 3), vec![10, 11, 12]);
    }

    #[test]
    fn test_alter_column_toggles_not_null() {
        let mut title = Property::new("title");
        title.define(&PropertyDef::new("varchar").length(80).required()).unwrap();
        assert_eq!(
            PostgresBuilder.alter_column("book", &title).unwrap(),
            r#"ALTER TABLE "book" ALTER COLUMN "title" TYPE VARCHAR(80), ALTER COLUMN "title" SET NOT NULL"#
        );
    }

    #[test]
    fn test_no_delegate_trigger() {
        let mut person = Property::new("person");
        person
            .define(&PropertyDef::new("n1").target("person").ondelete("CASCADE"))
            .unwrap();
        assert!(PostgresBuilder.create_delegate_trigger("employee", &person).unwrap().is_none());
    }
}
