//! MySQL / MariaDB dialect

use super::{base_type, is_float_type, is_integer_type, is_temporal_type, Builder, Param, Statement};
use crate::backends::SqlDialect;
use crate::error::OrmResult;
use crate::property::{Property, RelationKind};

#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlBuilder;

impl Builder for MySqlBuilder {
    fn dialect(&self) -> SqlDialect {
        SqlDialect::MySQL
    }

    /// `LAST_INSERT_ID()` is the id of the first row of a multi-row insert
    fn inserted_ids(&self, last_insert_id: i64, count: usize) -> Vec<i64> {
        (0..count as i64).map(|offset| last_insert_id + offset).collect()
    }

    fn insert_ignore(&self, table: &str, columns: &[&str], values: &str) -> String {
        let columns: Vec<String> = columns.iter().map(|c| self.quote(c)).collect();
        format!(
            "INSERT IGNORE INTO {} ({}) VALUES {}",
            self.quote(table),
            columns.join(", "),
            values
        )
    }

    fn exists_table(&self, table: &str) -> Statement {
        Statement {
            sql: "SELECT COUNT(*) FROM information_schema.tables \
                  WHERE table_schema = DATABASE() AND table_name = ?"
                .to_string(),
            params: vec![Param::from(table)],
        }
    }

    fn exists_column(&self, table: &str, column: &str) -> Statement {
        Statement {
            sql: "SELECT COUNT(*) FROM information_schema.columns \
                  WHERE table_schema = DATABASE() AND table_name = ? AND column_name = ?"
                .to_string(),
            params: vec![Param::from(table), Param::from(column)],
        }
    }

    fn column_type(&self, property: &Property) -> String {
        match property.relation() {
            Some(RelationKind::ManyToOne) => return "INT UNSIGNED".to_string(),
            Some(_) => return "JSON".to_string(),
            None => {}
        }
        let kind = base_type(&property.kind);
        match kind.as_str() {
            "bool" | "boolean" => "TINYINT(1)".to_string(),
            "int" | "integer" => "INT".to_string(),
            k if is_integer_type(k) => k.to_uppercase(),
            "float" | "double" | "real" => "DOUBLE".to_string(),
            k if is_float_type(k) => match property.length {
                Some(length) => format!("DECIMAL({}, 2)", length),
                None => "DECIMAL(12, 2)".to_string(),
            },
            "varchar" | "char" => format!("VARCHAR({})", property.length.unwrap_or(255)),
            // temporal values travel as text through the driver
            k if is_temporal_type(k) => "VARCHAR(32)".to_string(),
            _ => "TEXT".to_string(),
        }
    }

    fn primary_key_definition(&self) -> String {
        format!("{} INT UNSIGNED PRIMARY KEY AUTO_INCREMENT", self.quote("id"))
    }

    fn junction_column_type(&self) -> &'static str {
        "INT UNSIGNED"
    }

    fn table_options(&self) -> &'static str {
        " ENGINE=InnoDB"
    }

    fn alter_column(&self, table: &str, property: &Property) -> Option<String> {
        Some(format!(
            "ALTER TABLE {} MODIFY COLUMN {}",
            self.quote(table),
            self.column_definition(property)
        ))
    }

    fn create_delegate_trigger(&self, table: &str, delegate: &Property) -> OrmResult<Option<String>> {
        Ok(Some(format!(
            "CREATE TRIGGER IF NOT EXISTS {} AFTER DELETE ON {} FOR EACH ROW \
             DELETE FROM {} WHERE {} = OLD.{}",
            self.quote(&format!("{}_delete_{}", table, delegate.name)),
            self.quote(table),
            self.quote(delegate.target_model()?),
            self.quote("id"),
            self.quote(&delegate.name)
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::PropertyDef;
    use crate::search::{Limit, Search};

    fn property(name: &str, def: PropertyDef) -> Property {
        let mut property = Property::new(name);
        property.define(&def).unwrap();
        property
    }

    #[test]
    fn test_ids_ascend_from_first() {
        assert_eq!(MySqlBuilder.inserted_ids(10, 3), vec![10, 11, 12]);
    }

    #[test]
    fn test_backtick_quoting() {
        let statement = MySqlBuilder
            .select("book", Some(&Search::and().with("title:like", "A%")), &[], Some(&Limit::new(0, 1)))
            .unwrap();
        assert_eq!(
            statement.sql,
            "SELECT `book`.* FROM `book` WHERE (`book`.`title` LIKE ?) ORDER BY `book`.`id` LIMIT 0, 1"
        );
    }

    #[test]
    fn test_column_types() {
        assert_eq!(MySqlBuilder.column_type(&property("a", PropertyDef::new("boolean"))), "TINYINT(1)");
        assert_eq!(
            MySqlBuilder.column_type(&property("b", PropertyDef::new("n1").target("author"))),
            "INT UNSIGNED"
        );
        assert_eq!(
            MySqlBuilder.column_type(&property("c", PropertyDef::new("1n").target("book(author)"))),
            "JSON"
        );
    }

    #[test]
    fn test_alter_and_foreign_key() {
        let title = property("title", PropertyDef::new("varchar").length(80));
        assert_eq!(
            MySqlBuilder.alter_column("book", &title).unwrap(),
            "ALTER TABLE `book` MODIFY COLUMN `title` VARCHAR(80)"
        );

        let author = property("author", PropertyDef::new("n1").target("author").ondelete("SET NULL"));
        assert_eq!(
            MySqlBuilder.add_foreign_key("book", &author).unwrap().unwrap(),
            "ALTER TABLE `book` ADD CONSTRAINT `fk_book_author` FOREIGN KEY (`author`) \
             REFERENCES `author` (`id`) ON DELETE SET NULL ON UPDATE NO ACTION"
        );
    }

    #[test]
    fn test_junction_insert_ignores_duplicates() {
        let tags = property("tags", PropertyDef::new("nm").target("tag(posts)"));
        let statement = MySqlBuilder.insert_nm(&tags, 1, &[2]).unwrap();
        assert_eq!(
            statement.sql,
            "INSERT IGNORE INTO `nm_posts_tags` (`posts`, `tags`) VALUES (?, ?)"
        );
    }
}
