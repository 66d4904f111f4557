//! Filter expressions for batched queries.
//!
//! The expression tree only covers what relationship resolution and client
//! filters need: comparisons, `IN` lists, `IS [NOT] NULL`, and AND/OR groups.
//! It renders to portable SQL with `?` placeholders and can be evaluated
//! directly by in-process executors.

use jsonapi_orm_core::{KeyValue, Value};
use std::cmp::Ordering;
use std::fmt;

static NULL: Value = Value::Null;

/// A column reference with an optional table qualifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Column {
    pub table: Option<String>,
    pub name: String,
}

impl Column {
    /// Unqualified column.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            table: None,
            name: name.into(),
        }
    }

    /// Column qualified by `table`.
    pub fn qualified(table: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            name: name.into(),
        }
    }

    /// Parse `"table.column"` or `"column"`.
    pub fn parse(reference: &str) -> Self {
        match reference.split_once('.') {
            Some((table, name)) => Self::qualified(table, name),
            None => Self::new(reference),
        }
    }

    /// Render as a quoted SQL identifier.
    pub fn to_sql(&self) -> String {
        match &self.table {
            Some(table) => format!("{}.{}", quote_identifier(table), quote_identifier(&self.name)),
            None => quote_identifier(&self.name),
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.table {
            Some(table) => write!(f, "{}.{}", table, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

impl From<&str> for Column {
    fn from(reference: &str) -> Self {
        Column::parse(reference)
    }
}

impl From<String> for Column {
    fn from(reference: String) -> Self {
        Column::parse(&reference)
    }
}

/// Quote an identifier, doubling embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// Equal (=)
    Eq,
    /// Not equal (<>)
    Ne,
    /// Less than (<)
    Lt,
    /// Less than or equal (<=)
    Le,
    /// Greater than (>)
    Gt,
    /// Greater than or equal (>=)
    Ge,
}

impl CompareOp {
    /// Parse a client-supplied operator.
    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "=" => Some(CompareOp::Eq),
            "!=" | "<>" => Some(CompareOp::Ne),
            "<" => Some(CompareOp::Lt),
            "<=" => Some(CompareOp::Le),
            ">" => Some(CompareOp::Gt),
            ">=" => Some(CompareOp::Ge),
            _ => None,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }

    /// Whether an ordering between left and right operand satisfies this operator.
    pub fn accepts(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
        }
    }
}

/// A boolean filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// `column op value`
    Compare {
        column: Column,
        op: CompareOp,
        value: Value,
    },
    /// `column IN (values...)`
    In { column: Column, values: Vec<Value> },
    /// `column IS NULL` / `column IS NOT NULL`
    IsNull { column: Column, negated: bool },
    /// All sub-expressions hold
    And(Vec<Expr>),
    /// Any sub-expression holds
    Or(Vec<Expr>),
}

impl Expr {
    pub fn compare(column: impl Into<Column>, op: CompareOp, value: impl Into<Value>) -> Self {
        Expr::Compare {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(column: impl Into<Column>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Eq, value)
    }

    /// `column IN (keys...)`.
    pub fn in_keys(column: impl Into<Column>, keys: &[KeyValue]) -> Self {
        Expr::In {
            column: column.into(),
            values: keys.iter().map(KeyValue::to_value).collect(),
        }
    }

    pub fn in_values(column: impl Into<Column>, values: Vec<Value>) -> Self {
        Expr::In {
            column: column.into(),
            values,
        }
    }

    pub fn is_null(column: impl Into<Column>) -> Self {
        Expr::IsNull {
            column: column.into(),
            negated: false,
        }
    }

    pub fn is_not_null(column: impl Into<Column>) -> Self {
        Expr::IsNull {
            column: column.into(),
            negated: true,
        }
    }

    /// Combine with AND, flattening nested AND groups.
    #[must_use]
    pub fn and(self, other: Expr) -> Self {
        match (self, other) {
            (Expr::And(mut left), Expr::And(right)) => {
                left.extend(right);
                Expr::And(left)
            }
            (Expr::And(mut left), right) => {
                left.push(right);
                Expr::And(left)
            }
            (left, right) => Expr::And(vec![left, right]),
        }
    }

    /// Combine with OR, flattening nested OR groups.
    #[must_use]
    pub fn or(self, other: Expr) -> Self {
        match (self, other) {
            (Expr::Or(mut left), Expr::Or(right)) => {
                left.extend(right);
                Expr::Or(left)
            }
            (Expr::Or(mut left), right) => {
                left.push(right);
                Expr::Or(left)
            }
            (left, right) => Expr::Or(vec![left, right]),
        }
    }

    /// Number of leaf conditions in this expression.
    pub fn condition_count(&self) -> usize {
        match self {
            Expr::And(exprs) | Expr::Or(exprs) => exprs.iter().map(Expr::condition_count).sum(),
            _ => 1,
        }
    }

    /// Render SQL, appending bound parameters to `params`.
    pub fn build(&self, params: &mut Vec<Value>) -> String {
        match self {
            Expr::Compare { column, op, value } => {
                params.push(value.clone());
                format!("{} {} ?", column.to_sql(), op.as_str())
            }
            Expr::In { column, values } => {
                if values.is_empty() {
                    // An empty IN list matches nothing.
                    return "1 = 0".to_string();
                }
                params.extend(values.iter().cloned());
                let placeholders = vec!["?"; values.len()].join(", ");
                format!("{} IN ({})", column.to_sql(), placeholders)
            }
            Expr::IsNull { column, negated } => {
                if *negated {
                    format!("{} IS NOT NULL", column.to_sql())
                } else {
                    format!("{} IS NULL", column.to_sql())
                }
            }
            Expr::And(exprs) => Self::build_group(exprs, " AND ", "1 = 1", params),
            Expr::Or(exprs) => Self::build_group(exprs, " OR ", "1 = 0", params),
        }
    }

    fn build_group(exprs: &[Expr], separator: &str, empty: &str, params: &mut Vec<Value>) -> String {
        match exprs {
            [] => empty.to_string(),
            [single] => single.build(params),
            _ => {
                let parts: Vec<String> = exprs.iter().map(|e| e.build(params)).collect();
                format!("({})", parts.join(separator))
            }
        }
    }

    /// Evaluate against a row, resolving columns through `lookup`.
    ///
    /// Missing columns read as NULL. Comparisons with NULL (other than
    /// `IS NULL`) are false, as in SQL.
    pub fn evaluate<'a, F>(&self, lookup: &F) -> bool
    where
        F: Fn(&Column) -> Option<&'a Value>,
    {
        match self {
            Expr::Compare { column, op, value } => {
                let actual = lookup(column).unwrap_or(&NULL);
                if actual.is_null() || value.is_null() {
                    return false;
                }
                actual.compare(value).is_some_and(|ordering| op.accepts(ordering))
            }
            Expr::In { column, values } => {
                let actual = lookup(column).unwrap_or(&NULL);
                !actual.is_null() && values.iter().any(|v| actual.loose_eq(v))
            }
            Expr::IsNull { column, negated } => {
                let is_null = lookup(column).is_none_or(Value::is_null);
                is_null != *negated
            }
            Expr::And(exprs) => exprs.iter().all(|e| e.evaluate(lookup)),
            Expr::Or(exprs) => exprs.iter().any(|e| e.evaluate(lookup)),
        }
    }
}
