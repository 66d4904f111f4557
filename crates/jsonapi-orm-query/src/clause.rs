//! ORDER BY, LIMIT, and OFFSET clauses.

use crate::expr::Column;
use jsonapi_orm_core::{RelationOrder, SortDirection};

/// ORDER BY term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: Column,
    pub direction: OrderDirection,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

impl OrderBy {
    /// Create an ascending order by clause.
    pub fn asc(column: impl Into<Column>) -> Self {
        Self {
            column: column.into(),
            direction: OrderDirection::Asc,
        }
    }

    /// Create a descending order by clause.
    pub fn desc(column: impl Into<Column>) -> Self {
        Self {
            column: column.into(),
            direction: OrderDirection::Desc,
        }
    }

    /// Order term declared on a relationship descriptor, qualified by the
    /// related table.
    pub fn from_relation(order: &RelationOrder, table: &str) -> Self {
        let column = if order.column.contains('.') {
            Column::parse(&order.column)
        } else {
            Column::qualified(table, order.column.clone())
        };
        Self {
            column,
            direction: match order.direction {
                SortDirection::Asc => OrderDirection::Asc,
                SortDirection::Desc => OrderDirection::Desc,
            },
        }
    }

    /// Generate SQL for this ORDER BY term.
    pub fn to_sql(&self) -> String {
        let direction = match self.direction {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        };
        format!("{} {}", self.column.to_sql(), direction)
    }
}

/// LIMIT clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit(pub u64);

/// OFFSET clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Offset(pub u64);
