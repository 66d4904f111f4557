//! Batched lookup queries.
//!
//! A `BatchQuery` is built fresh for each relationship resolution: one table,
//! a `WHERE key IN (...)` constraint, an optional pivot or through join, an
//! optional `GROUP BY`, and ordering. Executors either render it to SQL with
//! [`BatchQuery::to_sql`] or evaluate it directly.

use crate::clause::{Limit, Offset, OrderBy};
use crate::expr::{Column, Expr, quote_identifier};
use jsonapi_orm_core::{KeyValue, ModelDef, Value};

/// Alias of the synthetic column carrying the parent key on through queries.
pub const THROUGH_KEY: &str = "__through_key";

/// Join onto a pivot table for many-to-many lookups.
///
/// Executors load the pivot's key columns (and any extra `columns`) onto
/// each returned record's pivot map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PivotJoin {
    pub table: String,
    pub foreign_pivot_key: String,
    pub related_pivot_key: String,
    /// Column of the related table the pivot's related key points at
    pub related_key: String,
    pub columns: Vec<String>,
}

impl PivotJoin {
    /// Pivot columns exposed on each related record.
    pub fn selected_columns(&self) -> Vec<&str> {
        let mut columns = vec![
            self.foreign_pivot_key.as_str(),
            self.related_pivot_key.as_str(),
        ];
        for column in &self.columns {
            if !columns.contains(&column.as_str()) {
                columns.push(column);
            }
        }
        columns
    }
}

/// Join onto an intermediate table for through lookups.
///
/// Executors expose `table.first_key` on each returned record as the
/// [`THROUGH_KEY`] attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThroughJoin {
    pub table: String,
    /// Column of the intermediate table pointing at the parent
    pub first_key: String,
    /// Column of the related table pointing at the intermediate table
    pub second_key: String,
    /// Column of the intermediate table `second_key` points at
    pub second_local_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Join {
    Pivot(PivotJoin),
    Through(ThroughJoin),
}

/// A single batched lookup (or a raw table operation for pivot writes).
#[derive(Debug, Clone, PartialEq)]
pub struct BatchQuery {
    model: String,
    table: String,
    filter: Option<Expr>,
    join: Option<Join>,
    group_by: Option<Column>,
    order_by: Vec<OrderBy>,
    limit: Option<Limit>,
    offset: Option<Offset>,
}

impl BatchQuery {
    /// Query `table`, producing records of `model`.
    pub fn new(model: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            table: table.into(),
            filter: None,
            join: None,
            group_by: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Query the table of a registered model.
    pub fn for_model(def: &ModelDef) -> Self {
        Self::new(def.model.clone(), def.table.clone())
    }

    /// Raw table access (pivot rows); records are tagged with the table name.
    pub fn for_table(table: impl Into<String>) -> Self {
        let table = table.into();
        Self::new(table.clone(), table)
    }

    /// Add a condition, AND-ed with existing ones.
    #[must_use]
    pub fn filter(mut self, expr: Expr) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    /// `WHERE column IN (keys...)`.
    #[must_use]
    pub fn where_in(self, column: impl Into<Column>, keys: &[KeyValue]) -> Self {
        self.filter(Expr::in_keys(column, keys))
    }

    /// `WHERE column = value`.
    #[must_use]
    pub fn where_eq(self, column: impl Into<Column>, value: impl Into<Value>) -> Self {
        self.filter(Expr::eq(column, value))
    }

    #[must_use]
    pub fn join_pivot(mut self, join: PivotJoin) -> Self {
        self.join = Some(Join::Pivot(join));
        self
    }

    #[must_use]
    pub fn join_through(mut self, join: ThroughJoin) -> Self {
        self.join = Some(Join::Through(join));
        self
    }

    /// `GROUP BY column`: one row per distinct value, first in result order.
    #[must_use]
    pub fn group_by(mut self, column: impl Into<Column>) -> Self {
        self.group_by = Some(column.into());
        self
    }

    #[must_use]
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(Limit(limit));
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(Offset(offset));
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn filter_expr(&self) -> Option<&Expr> {
        self.filter.as_ref()
    }

    pub fn join(&self) -> Option<&Join> {
        self.join.as_ref()
    }

    pub fn group_by_column(&self) -> Option<&Column> {
        self.group_by.as_ref()
    }

    pub fn order_terms(&self) -> &[OrderBy] {
        &self.order_by
    }

    pub fn limit_value(&self) -> Option<u64> {
        self.limit.map(|Limit(n)| n)
    }

    pub fn offset_value(&self) -> Option<u64> {
        self.offset.map(|Offset(n)| n)
    }

    fn select_list(&self) -> String {
        let mut select = format!("{}.*", quote_identifier(&self.table));
        match &self.join {
            Some(Join::Pivot(pivot)) => {
                for column in pivot.selected_columns() {
                    select.push_str(&format!(
                        ", {} AS {}",
                        Column::qualified(pivot.table.clone(), column).to_sql(),
                        quote_identifier(&format!("pivot_{column}"))
                    ));
                }
            }
            Some(Join::Through(through)) => {
                select.push_str(&format!(
                    ", {} AS {}",
                    Column::qualified(through.table.clone(), through.first_key.clone()).to_sql(),
                    quote_identifier(THROUGH_KEY)
                ));
            }
            None => {}
        }
        select
    }

    fn join_clause(&self) -> String {
        match &self.join {
            Some(Join::Pivot(pivot)) => format!(
                " INNER JOIN {} ON {} = {}",
                quote_identifier(&pivot.table),
                Column::qualified(pivot.table.clone(), pivot.related_pivot_key.clone()).to_sql(),
                Column::qualified(self.table.clone(), pivot.related_key.clone()).to_sql(),
            ),
            Some(Join::Through(through)) => format!(
                " INNER JOIN {} ON {} = {}",
                quote_identifier(&through.table),
                Column::qualified(through.table.clone(), through.second_local_key.clone())
                    .to_sql(),
                Column::qualified(self.table.clone(), through.second_key.clone()).to_sql(),
            ),
            None => String::new(),
        }
    }

    fn where_clause(&self, params: &mut Vec<Value>) -> String {
        self.filter
            .as_ref()
            .map(|expr| format!(" WHERE {}", expr.build(params)))
            .unwrap_or_default()
    }

    /// Render a SELECT statement with `?` placeholders.
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = format!(
            "SELECT {} FROM {}{}",
            self.select_list(),
            quote_identifier(&self.table),
            self.join_clause()
        );
        sql.push_str(&self.where_clause(&mut params));
        if let Some(group_by) = &self.group_by {
            sql.push_str(&format!(" GROUP BY {}", group_by.to_sql()));
        }
        if !self.order_by.is_empty() {
            let terms: Vec<String> = self.order_by.iter().map(OrderBy::to_sql).collect();
            sql.push_str(&format!(" ORDER BY {}", terms.join(", ")));
        }
        if let Some(Limit(limit)) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(Offset(offset)) = self.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
        (sql, params)
    }

    /// Render a COUNT statement over the same table, join, and filter.
    pub fn to_count_sql(&self) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = format!(
            "SELECT COUNT(*) FROM {}{}",
            quote_identifier(&self.table),
            self.join_clause()
        );
        sql.push_str(&self.where_clause(&mut params));
        (sql, params)
    }

    /// Render a DELETE statement over the table and filter.
    pub fn to_delete_sql(&self) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        let mut sql = format!("DELETE FROM {}", quote_identifier(&self.table));
        sql.push_str(&self.where_clause(&mut params));
        (sql, params)
    }
}
