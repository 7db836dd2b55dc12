//! Select filters
//!
//! `Where` is what callers hand to `select`; `Search` is the recursive
//! and/or tree of `"field:operator"` conditions compiled by the builders.

use serde_json::Value as JsonValue;

use crate::error::{ModelError, OrmResult};
use crate::value::json_as_i64;

/// How the terms of one nesting level are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Union {
    #[default]
    And,
    Or,
}

impl Union {
    pub fn separator(&self) -> &'static str {
        match self {
            Union::And => " AND ",
            Union::Or => " OR ",
        }
    }

    fn parse(s: &str) -> OrmResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "and" => Ok(Union::And),
            "or" => Ok(Union::Or),
            other => Err(ModelError::Query(format!("unknown union operator '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    /// `key` is `"field"` or `"field:operator"`
    Condition { key: String, value: JsonValue },
    Group(Search),
}

/// Recursive search expression
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Search {
    pub union: Union,
    pub terms: Vec<Term>,
}

impl Search {
    /// Empty search whose terms are AND-combined
    pub fn and() -> Self {
        Self::default()
    }

    /// Empty search whose terms are OR-combined
    pub fn or() -> Self {
        Self {
            union: Union::Or,
            terms: Vec::new(),
        }
    }

    /// Add a `"field:operator"` condition
    pub fn with(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.terms.push(Term::Condition {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Add a nested group
    pub fn group(mut self, group: Search) -> Self {
        self.terms.push(Term::Group(group));
        self
    }

    /// True when no condition is reachable, even through nested groups
    pub fn is_empty(&self) -> bool {
        self.terms
            .iter()
            .all(|term| matches!(term, Term::Group(group) if group.is_empty()))
    }

    /// Parse the JSON shorthand: an object of conditions, or an array whose
    /// string items set the union and whose object/array items are groups
    pub fn from_json(json: &JsonValue) -> OrmResult<Self> {
        match json {
            JsonValue::Object(map) => Ok(map.iter().fold(Search::and(), |search, (key, value)| {
                search.with(key.clone(), value.clone())
            })),
            JsonValue::Array(items) => {
                let mut search = Search::and();
                for item in items {
                    match item {
                        JsonValue::String(union) => search.union = Union::parse(union)?,
                        JsonValue::Object(_) | JsonValue::Array(_) => {
                            search.terms.push(Term::Group(Search::from_json(item)?))
                        }
                        other => {
                            return Err(ModelError::Query(format!(
                                "unexpected search item {}",
                                other
                            )))
                        }
                    }
                }
                Ok(search)
            }
            other => Err(ModelError::Query(format!("cannot build a search from {}", other))),
        }
    }
}

/// Comparison operator parsed from a condition key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    In,
    NotIn,
    Between,
    Compare(&'static str),
}

impl Operator {
    pub fn parse(op: &str) -> OrmResult<Self> {
        let normalized = op.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
        Ok(match normalized.as_str() {
            "" | "=" | "==" => Operator::Eq,
            "in" => Operator::In,
            "not in" => Operator::NotIn,
            "between" => Operator::Between,
            "!=" => Operator::Compare("!="),
            "<>" => Operator::Compare("<>"),
            "<" => Operator::Compare("<"),
            "<=" => Operator::Compare("<="),
            ">" => Operator::Compare(">"),
            ">=" => Operator::Compare(">="),
            "like" => Operator::Compare("LIKE"),
            "not like" => Operator::Compare("NOT LIKE"),
            other => {
                return Err(ModelError::Query(format!("unsupported operator '{}'", other)))
            }
        })
    }
}

/// Split `"field:operator"` into a validated field name and operator
pub fn split_key(key: &str) -> OrmResult<(&str, Operator)> {
    let (field, op) = key.split_once(':').unwrap_or((key, "="));
    let field = field.trim();
    if !is_identifier(field) {
        return Err(ModelError::Query(format!("invalid field name '{}'", field)));
    }
    Ok((field, Operator::parse(op)?))
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Filter handed to `RecordSet::select`
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Where {
    #[default]
    All,
    Id(i64),
    Name(String),
    Ids(Vec<i64>),
    Search(Search),
}

impl Where {
    /// Normalize the loose shorthand: a number is an id, a numeric string an id,
    /// any other string a name lookup, a list of scalars an id list
    pub fn from_json(json: &JsonValue) -> OrmResult<Self> {
        match json {
            JsonValue::Null => Ok(Where::All),
            JsonValue::Number(_) => json_as_i64(json)
                .map(Where::Id)
                .ok_or_else(|| ModelError::Query(format!("invalid id {}", json))),
            JsonValue::String(s) => Ok(Where::from(s.as_str())),
            JsonValue::Array(items) if items.iter().all(is_scalar) => items
                .iter()
                .map(|item| {
                    json_as_i64(item)
                        .ok_or_else(|| ModelError::Query(format!("invalid id {}", item)))
                })
                .collect::<OrmResult<Vec<_>>>()
                .map(Where::Ids),
            other => Search::from_json(other).map(Where::Search),
        }
    }

    /// Matches every row of the table
    pub fn is_unrestricted(&self) -> bool {
        match self {
            Where::All => true,
            Where::Search(search) => search.is_empty(),
            _ => false,
        }
    }

    /// The search to compile, `None` meaning every row
    pub fn into_search(self) -> Option<Search> {
        match self {
            Where::All => None,
            Where::Id(id) => Some(Search::and().with("id:=", id)),
            Where::Name(name) => Some(Search::and().with("name:=", name)),
            Where::Ids(ids) => Some(Search::and().with("id:in", ids)),
            Where::Search(search) => Some(search),
        }
    }
}

fn is_scalar(json: &JsonValue) -> bool {
    matches!(json, JsonValue::Number(_) | JsonValue::String(_))
}

impl From<i64> for Where {
    fn from(id: i64) -> Self {
        Where::Id(id)
    }
}

impl From<i32> for Where {
    fn from(id: i32) -> Self {
        Where::Id(i64::from(id))
    }
}

impl From<&str> for Where {
    fn from(s: &str) -> Self {
        match s.trim().parse::<i64>() {
            Ok(id) => Where::Id(id),
            Err(_) => Where::Name(s.to_string()),
        }
    }
}

impl From<String> for Where {
    fn from(s: String) -> Self {
        Where::from(s.as_str())
    }
}

impl From<Vec<i64>> for Where {
    fn from(ids: Vec<i64>) -> Self {
        Where::Ids(ids)
    }
}

impl From<&[i64]> for Where {
    fn from(ids: &[i64]) -> Self {
        Where::Ids(ids.to_vec())
    }
}

impl From<Search> for Where {
    fn from(search: Search) -> Self {
        Where::Search(search)
    }
}

/// `LIMIT offset, count`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit {
    pub offset: u64,
    pub count: u64,
}

impl Limit {
    pub fn new(offset: u64, count: u64) -> Self {
        Self { offset, count }
    }

    /// Parse `"offset-count"` or a bare `"count"`
    pub fn parse(s: &str) -> OrmResult<Self> {
        let invalid = || ModelError::Query(format!("invalid limit '{}'", s));
        match s.split_once('-') {
            Some((offset, count)) => Ok(Self::new(
                offset.trim().parse().map_err(|_| invalid())?,
                count.trim().parse().map_err(|_| invalid())?,
            )),
            None => Ok(Self::new(0, s.trim().parse().map_err(|_| invalid())?)),
        }
    }
}

impl From<u64> for Limit {
    fn from(count: u64) -> Self {
        Limit::new(0, count)
    }
}

/// One ORDER BY term
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }

    /// Parse `"name desc, id"`
    pub fn parse(s: &str) -> OrmResult<Vec<Self>> {
        s.split(',')
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .map(|term| {
                let mut parts = term.split_whitespace();
                let field = parts.next().unwrap_or_default();
                if !is_identifier(field) {
                    return Err(ModelError::Query(format!("invalid order field '{}'", field)));
                }
                let descending = match parts.next().map(str::to_lowercase).as_deref() {
                    None | Some("asc") => false,
                    Some("desc") => true,
                    Some(other) => {
                        return Err(ModelError::Query(format!("invalid order direction '{}'", other)))
                    }
                };
                Ok(Self {
                    field: field.to_string(),
                    descending,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_where_shorthand() {
        assert_eq!(Where::from_json(&json!(5)).unwrap(), Where::Id(5));
        assert_eq!(Where::from_json(&json!("7")).unwrap(), Where::Id(7));
        assert_eq!(Where::from_json(&json!("Ann")).unwrap(), Where::Name("Ann".into()));
        assert_eq!(Where::from_json(&json!([1, "2"])).unwrap(), Where::Ids(vec![1, 2]));
    }

    #[test]
    fn test_nested_union_groups() {
        let search = Search::from_json(&json!([
            "or",
            {"name:like": "A%"},
            {"age:>": 30}
        ]))
        .unwrap();

        assert_eq!(search.union, Union::Or);
        assert_eq!(search.terms.len(), 2);
        assert!(matches!(search.terms[0], Term::Group(_)));
    }

    #[test]
    fn test_unrestricted_filters() {
        assert!(Where::All.is_unrestricted());
        assert!(Where::Search(Search::and()).is_unrestricted());
        assert!(Where::Search(Search::or().group(Search::and())).is_unrestricted());
        assert!(Where::from_json(&json!({})).unwrap().is_unrestricted());
        assert!(!Where::Id(1).is_unrestricted());
        assert!(!Where::Search(Search::and().group(Search::and().with("id", 1))).is_unrestricted());
    }

    #[test]
    fn test_split_key() {
        assert_eq!(split_key("age:>=").unwrap(), ("age", Operator::Compare(">=")));
        assert_eq!(split_key("id").unwrap(), ("id", Operator::Eq));
        assert_eq!(split_key("id:NOT  IN").unwrap(), ("id", Operator::NotIn));
        assert!(split_key("id; drop table x:=").is_err());
        assert!(split_key("id:regexp").is_err());
    }

    #[test]
    fn test_limit_and_order_parsing() {
        assert_eq!(Limit::parse("0-1").unwrap(), Limit::new(0, 1));
        assert_eq!(Limit::parse("20").unwrap(), Limit::new(0, 20));
        assert!(Limit::parse("a-b").is_err());

        let order = OrderBy::parse("name desc, id").unwrap();
        assert_eq!(order, vec![OrderBy::desc("name"), OrderBy::asc("id")]);
        assert!(OrderBy::parse("name; drop").is_err());
    }
}
