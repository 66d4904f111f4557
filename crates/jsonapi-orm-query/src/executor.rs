//! The query executor contract.
//!
//! Relationship resolution and relationship writes never talk to a database
//! directly; they go through this trait. It exposes exactly the operations
//! the core needs: batched reads, counts, raw table inserts and deletes,
//! saving a record, and a transaction boundary.

use crate::expr::Expr;
use crate::query::BatchQuery;
use jsonapi_orm_core::{KeyValue, ModelDef, Record, Result, Value};
use std::collections::BTreeMap;

/// A raw table row (pivot inserts).
pub type Row = BTreeMap<String, Value>;

/// Executes batched queries against a store.
///
/// Errors returned by implementations are propagated unchanged by every
/// caller in this workspace; nothing retries.
pub trait QueryExecutor {
    /// Run a SELECT and return the matching records in result order.
    fn get(&self, query: &BatchQuery) -> Result<Vec<Record>>;

    /// Count the rows matching the query's table, join, and filter.
    fn count(&self, query: &BatchQuery) -> Result<u64>;

    /// Insert raw rows into `table`, returning the number inserted.
    fn insert(&self, table: &str, rows: &[Row]) -> Result<u64>;

    /// Delete the rows of the query's table matching its filter.
    fn delete(&self, query: &BatchQuery) -> Result<u64>;

    /// Insert or update `record` in the table of `def`, marking it persisted.
    fn save(&self, def: &ModelDef, record: &mut Record) -> Result<()>;

    /// Run `f` atomically: every write inside is rolled back when `f` fails.
    fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Self) -> Result<T>,
        Self: Sized;

    /// Run a SELECT limited to one row.
    fn first(&self, query: &BatchQuery) -> Result<Option<Record>> {
        let limited = query.clone().limit(1);
        Ok(self.get(&limited)?.into_iter().next())
    }

    /// Find a record of `def` by primary key.
    fn find(&self, def: &ModelDef, key: &KeyValue) -> Result<Option<Record>> {
        let query = BatchQuery::for_model(def).filter(Expr::eq(
            crate::expr::Column::qualified(def.table.clone(), def.primary_key.clone()),
            key.to_value(),
        ));
        self.first(&query)
    }

    /// Whether any row matches the query.
    fn exists(&self, query: &BatchQuery) -> Result<bool> {
        Ok(self.count(query)? > 0)
    }
}
