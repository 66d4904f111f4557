//! Client query filters.
//!
//! Clients send filters as JSON: a single condition
//! `{"field": "title", "operator": "=", "value": "x"}`, a list of
//! conditions, or nested groups `{"query": [...], "boolean": "or"}`.
//! Every field must be whitelisted by the resource and the number of
//! conditions is capped.

use crate::expr::{Column, CompareOp, Expr};
use jsonapi_orm_core::validate::is_valid_field_name;
use jsonapi_orm_core::{Error, KeyValue, Result, Value};
use serde_json::Value as Json;
use std::collections::HashMap;
use std::fmt;

const DEFAULT_MAX_CONDITIONS: usize = 5;

/// How a condition is joined to the conditions before it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Boolean {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConditionType {
    /// `field op value`
    #[default]
    Basic,
    /// `field IS NULL`
    Null,
    /// `field IS NOT NULL`
    NotNull,
}

/// One validated filter condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub op: CompareOp,
    pub condition_type: ConditionType,
    pub value: Value,
    pub boolean: Boolean,
}

impl Condition {
    /// Default translation into an expression.
    pub fn to_expr(&self, table: Option<&str>) -> Expr {
        let column = match table {
            Some(table) if !self.field.contains('.') => Column::qualified(table, self.field.clone()),
            _ => Column::parse(&self.field),
        };
        match self.condition_type {
            ConditionType::Null => Expr::is_null(column),
            ConditionType::NotNull => Expr::is_not_null(column),
            ConditionType::Basic => Expr::compare(column, self.op, self.value.clone()),
        }
    }
}

type FilterHandler = Box<dyn Fn(&Condition) -> Result<Expr> + Send + Sync>;

/// Builds filter expressions from client input.
pub struct FilterComposer {
    table: Option<String>,
    allowed: Vec<String>,
    max_conditions: usize,
    handlers: HashMap<String, FilterHandler>,
}

impl fmt::Debug for FilterComposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterComposer")
            .field("table", &self.table)
            .field("allowed", &self.allowed)
            .field("max_conditions", &self.max_conditions)
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FilterComposer {
    /// Create a composer allowing `allowed` fields and at most
    /// `max_conditions` conditions (values below 1 fall back to 5).
    pub fn new<I, S>(allowed: I, max_conditions: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            table: None,
            allowed: allowed.into_iter().map(Into::into).collect(),
            max_conditions: if max_conditions >= 1 {
                max_conditions
            } else {
                DEFAULT_MAX_CONDITIONS
            },
            handlers: HashMap::new(),
        }
    }

    /// Qualify unqualified fields with `table`.
    #[must_use]
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Register a custom handler for `field`; the field becomes allowed.
    #[must_use]
    pub fn handler<F>(mut self, field: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&Condition) -> Result<Expr> + Send + Sync + 'static,
    {
        let field = field.into();
        if !self.allowed.contains(&field) {
            self.allowed.push(field.clone());
        }
        self.handlers.insert(field, Box::new(handler));
        self
    }

    /// Compose an expression from a filter document.
    ///
    /// Returns `Ok(None)` for empty input.
    pub fn compose(&self, input: &Json) -> Result<Option<Expr>> {
        let mut count = 0;
        let expr = self.compose_node(input, &mut count)?;
        if let Some(expr) = &expr {
            tracing::debug!(conditions = count, filter = ?expr, "Composed client filter");
        }
        Ok(expr)
    }

    /// Compose equality conditions from `filter[field]=value` pairs.
    ///
    /// Values are read the way resource ids are: integer text becomes an
    /// integer and a hyphenated UUID becomes a UUID.
    pub fn compose_pairs<'a, I>(&self, pairs: I) -> Result<Option<Expr>>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut count = 0;
        let mut terms = Vec::new();
        for (field, value) in pairs {
            let value = KeyValue::parse_id(value)
                .as_ref()
                .map_or_else(|| Value::Text(String::new()), KeyValue::to_value);
            let condition = Condition {
                field: field.to_string(),
                op: CompareOp::Eq,
                condition_type: ConditionType::Basic,
                value,
                boolean: Boolean::And,
            };
            self.check_field(&condition.field)?;
            terms.push((Boolean::And, self.make(&condition, &mut count)?));
        }
        Ok(combine(terms))
    }

    fn compose_node(&self, node: &Json, count: &mut usize) -> Result<Option<Expr>> {
        let is_empty = match node {
            Json::Object(map) => map.is_empty(),
            Json::Array(items) => items.is_empty(),
            _ => true,
        };
        if is_empty {
            return Ok(None);
        }

        if node.get("field").is_some() {
            let condition = self.parse_condition(node)?;
            return self.make(&condition, count).map(Some);
        }

        if let Some(inner) = node.get("query") {
            return self.compose_node(inner, count);
        }

        let items: Vec<&Json> = match node {
            Json::Array(items) => items.iter().collect(),
            Json::Object(map) => map.values().collect(),
            _ => Vec::new(),
        };

        let mut terms = Vec::new();
        for item in items {
            if let Ok(condition) = self.parse_condition(item) {
                let boolean = condition.boolean;
                terms.push((boolean, self.make(&condition, count)?));
                continue;
            }

            let Some(inner) = item.get("query").filter(|q| q.is_array() || q.is_object()) else {
                // Surface the reason this item is not a valid condition.
                self.parse_condition(item)?;
                continue;
            };
            if let Some(group) = self.compose_node(inner, count)? {
                terms.push((parse_boolean(item), group));
            }
        }
        Ok(combine(terms))
    }

    fn make(&self, condition: &Condition, count: &mut usize) -> Result<Expr> {
        if *count >= self.max_conditions {
            return Err(Error::validation(format!(
                "Too many query conditions. Maximum: {}",
                self.max_conditions
            )));
        }
        *count += 1;

        match self.handlers.get(&condition.field) {
            Some(handler) => handler(condition),
            None => Ok(condition.to_expr(self.table.as_deref())),
        }
    }

    fn check_field(&self, field: &str) -> Result<()> {
        if !is_valid_field_name(field) || !self.allowed.iter().any(|f| f == field) {
            return Err(Error::validation(format!(
                "Field ({field}) is not allowed for query"
            )));
        }
        Ok(())
    }

    fn parse_condition(&self, node: &Json) -> Result<Condition> {
        let Json::Object(map) = node else {
            return Err(Error::validation("Invalid query object"));
        };

        let field = match map.get("field") {
            Some(Json::String(field)) => field.clone(),
            _ => return Err(Error::validation("Missing field name for query")),
        };
        self.check_field(&field)?;

        let condition_type = match map.get("type").and_then(Json::as_str) {
            None => ConditionType::Basic,
            Some(t) => match t.to_ascii_lowercase().as_str() {
                "null" => ConditionType::Null,
                "notnull" => ConditionType::NotNull,
                _ => ConditionType::Basic,
            },
        };

        let value = match map.get("value") {
            Some(v) if !v.is_null() => Value::from_json(v),
            _ if condition_type != ConditionType::Basic => Value::Null,
            _ => {
                return Err(Error::validation(format!(
                    "Invalid query, missing query value for field ({field})"
                )));
            }
        };

        let op = match map.get("operator") {
            None => CompareOp::Eq,
            Some(op) => op
                .as_str()
                .filter(|op| *op != "<>")
                .and_then(CompareOp::parse)
                .ok_or_else(|| {
                    Error::validation(format!("Operator for field ({field}) is not allowed"))
                })?,
        };

        Ok(Condition {
            field,
            op,
            condition_type,
            value,
            boolean: parse_boolean(node),
        })
    }
}

fn parse_boolean(node: &Json) -> Boolean {
    match node.get("boolean").and_then(Json::as_str) {
        Some(b) if b.eq_ignore_ascii_case("or") => Boolean::Or,
        _ => Boolean::And,
    }
}

/// Fold `(boolean, expr)` terms left to right with SQL precedence: runs of
/// AND terms form groups, OR starts a new group.
fn combine(terms: Vec<(Boolean, Expr)>) -> Option<Expr> {
    let mut groups: Vec<Vec<Expr>> = Vec::new();
    for (boolean, expr) in terms {
        match (boolean, groups.last_mut()) {
            (Boolean::And, Some(group)) => group.push(expr),
            _ => groups.push(vec![expr]),
        }
    }

    let mut disjuncts: Vec<Expr> = groups
        .into_iter()
        .map(|mut group| {
            if group.len() == 1 {
                group.remove(0)
            } else {
                Expr::And(group)
            }
        })
        .collect();

    match disjuncts.len() {
        0 => None,
        1 => disjuncts.pop(),
        _ => Some(Expr::Or(disjuncts)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn composer() -> FilterComposer {
        FilterComposer::new(["title", "views", "deleted_at"], 5)
    }

    #[test]
    fn single_condition() {
        let expr = composer()
            .compose(&json!({"field": "title", "value": "Hello"}))
            .unwrap()
            .unwrap();
        assert_eq!(expr, Expr::eq("title", "Hello"));
    }

    #[test]
    fn list_with_or_and_null_types() {
        let expr = composer()
            .compose(&json!([
                {"field": "views", "operator": ">=", "value": 10},
                {"field": "deleted_at", "type": "null"},
                {"field": "title", "value": "pinned", "boolean": "or"}
            ]))
            .unwrap()
            .unwrap();
        assert_eq!(
            expr,
            Expr::Or(vec![
                Expr::And(vec![
                    Expr::compare("views", CompareOp::Ge, 10_i64),
                    Expr::is_null("deleted_at"),
                ]),
                Expr::eq("title", "pinned"),
            ])
        );
    }

    #[test]
    fn nested_groups() {
        let expr = composer()
            .compose(&json!({"query": [
                {"field": "views", "operator": ">", "value": 1},
                {"boolean": "or", "query": [
                    {"field": "title", "value": "a"},
                    {"field": "title", "value": "b", "boolean": "or"}
                ]}
            ]}))
            .unwrap()
            .unwrap();
        assert_eq!(expr.condition_count(), 3);
        assert!(matches!(expr, Expr::Or(_)));
    }

    #[test]
    fn empty_input_is_no_filter() {
        assert!(composer().compose(&json!({})).unwrap().is_none());
        assert!(composer().compose(&json!([])).unwrap().is_none());
        assert!(composer().compose(&json!(null)).unwrap().is_none());
    }

    #[test]
    fn rejects_fields_operators_and_missing_values() {
        let err = composer()
            .compose(&json!({"field": "password", "value": "x"}))
            .unwrap_err();
        assert_eq!(err.title(), "Field (password) is not allowed for query");
        assert_eq!(err.status_code(), 400);

        let err = composer()
            .compose(&json!([{"field": "title", "operator": "like", "value": "x"}]))
            .unwrap_err();
        assert_eq!(err.title(), "Operator for field (title) is not allowed");

        let err = composer()
            .compose(&json!([{"field": "title"}]))
            .unwrap_err();
        assert_eq!(
            err.title(),
            "Invalid query, missing query value for field (title)"
        );

        let err = composer().compose(&json!([{"value": 1}])).unwrap_err();
        assert_eq!(err.title(), "Missing field name for query");
    }

    #[test]
    fn caps_condition_count() {
        let composer = FilterComposer::new(["views"], 2);
        let err = composer
            .compose(&json!([
                {"field": "views", "value": 1},
                {"field": "views", "value": 2},
                {"field": "views", "value": 3}
            ]))
            .unwrap_err();
        assert_eq!(err.title(), "Too many query conditions. Maximum: 2");

        assert_eq!(FilterComposer::new(["views"], 0).max_conditions, 5);
    }

    #[test]
    fn custom_handler_and_table_qualification() {
        let composer = FilterComposer::new(["title"], 5)
            .table("posts")
            .handler("search", |condition| {
                Ok(Expr::eq("posts.title", condition.value.clone())
                    .or(Expr::eq("posts.body", condition.value.clone())))
            });
        let expr = composer
            .compose(&json!([
                {"field": "title", "value": "x"},
                {"field": "search", "value": "y"}
            ]))
            .unwrap()
            .unwrap();
        let Expr::And(terms) = expr else {
            panic!("expected AND group");
        };
        assert_eq!(terms[0], Expr::eq(Column::qualified("posts", "title"), "x"));
        assert!(matches!(terms[1], Expr::Or(_)));
    }

    #[test]
    fn pairs() {
        let expr = composer()
            .compose_pairs([("title", "x"), ("views", "3")])
            .unwrap()
            .unwrap();
        assert_eq!(expr.condition_count(), 2);
        assert!(composer().compose_pairs([("secret", "x")]).is_err());
    }

    #[test]
    fn pair_values_match_integer_columns() {
        let expr = composer().compose_pairs([("views", "3")]).unwrap().unwrap();
        assert_eq!(expr, Expr::eq("views", Value::BigInt(3)));

        let views = Value::Int(3);
        assert!(expr.evaluate(&|_: &Column| Some(&views)));
        let title = Value::Text("3".into());
        assert!(expr.evaluate(&|_: &Column| Some(&title)));

        let expr = composer().compose_pairs([("title", "x3")]).unwrap().unwrap();
        assert_eq!(expr, Expr::eq("title", "x3"));
    }
}
