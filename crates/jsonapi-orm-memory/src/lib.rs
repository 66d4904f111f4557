//! In-process query executor for the JSON:API ORM layer.
//!
//! `MemoryStore` keeps tables of rows behind a `Mutex` and evaluates
//! [`BatchQuery`] values directly: `IN` filters, pivot and through joins,
//! `GROUP BY` (first row per group), ordering, and paging. Every statement is
//! rendered to SQL and appended to a statement log so callers can assert how
//! many queries a resolution issued.
//!
//! Transactions snapshot the whole store and restore it when the closure
//! fails. Nested transactions take their own snapshot.

mod table;

use jsonapi_orm_core::{Error, ModelDef, QueryErrorKind, Record, Result, Value};
use jsonapi_orm_query::{BatchQuery, QueryExecutor, Row, THROUGH_KEY};
use std::sync::{Mutex, MutexGuard};
use table::{State, no_such_table};

/// Kind of a logged statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Count,
    Insert,
    Delete,
    Save,
}

/// One statement issued against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub kind: StatementKind,
    pub table: String,
    /// Rendered SQL with `?` placeholders.
    pub sql: String,
}

/// In-memory store implementing [`QueryExecutor`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    log: Mutex<Vec<Statement>>,
    fail_next: Mutex<Option<String>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty table. Existing tables are left untouched.
    pub fn create_table(&self, name: &str) {
        lock(&self.state).tables.entry(name.to_string()).or_default();
    }

    /// Builder form of [`MemoryStore::create_table`].
    #[must_use]
    pub fn with_table(self, name: &str) -> Self {
        self.create_table(name);
        self
    }

    /// Insert rows without logging a statement (test fixtures).
    pub fn seed<I>(&self, table: &str, rows: I)
    where
        I: IntoIterator<Item = Row>,
    {
        let mut state = lock(&self.state);
        let table = state.tables.entry(table.to_string()).or_default();
        for row in rows {
            table.observe_id(row.get("id"));
            table.rows.push(row);
        }
    }

    /// Snapshot of a table's rows in insertion order.
    pub fn rows(&self, table: &str) -> Result<Vec<Row>> {
        Ok(lock(&self.state).table(table)?.rows.clone())
    }

    /// Every statement issued so far.
    pub fn statements(&self) -> Vec<Statement> {
        lock(&self.log).clone()
    }

    /// Number of logged statements of `kind`.
    pub fn count_of(&self, kind: StatementKind) -> usize {
        lock(&self.log).iter().filter(|s| s.kind == kind).count()
    }

    /// Number of SELECT statements issued so far.
    pub fn select_count(&self) -> usize {
        self.count_of(StatementKind::Select)
    }

    /// Number of SELECT statements issued against `table`.
    pub fn selects_on(&self, table: &str) -> usize {
        lock(&self.log)
            .iter()
            .filter(|s| s.kind == StatementKind::Select && s.table == table)
            .count()
    }

    pub fn clear_log(&self) {
        lock(&self.log).clear();
    }

    /// Make the next statement fail with a database error.
    pub fn fail_next(&self, message: impl Into<String>) {
        *lock(&self.fail_next) = Some(message.into());
    }

    fn check_failure(&self, table: &str) -> Result<()> {
        match lock(&self.fail_next).take() {
            Some(message) => {
                tracing::debug!(table = %table, "Injected failure");
                Err(Error::query(QueryErrorKind::Database, message))
            }
            None => Ok(()),
        }
    }

    fn record(&self, kind: StatementKind, table: &str, sql: String) -> Result<()> {
        self.check_failure(table)?;
        self.log(kind, table, sql);
        Ok(())
    }

    fn log(&self, kind: StatementKind, table: &str, sql: String) {
        tracing::trace!(kind = ?kind, table = %table, sql = %sql, "Executing statement");
        lock(&self.log).push(Statement {
            kind,
            table: table.to_string(),
            sql,
        });
    }
}

impl QueryExecutor for MemoryStore {
    fn get(&self, query: &BatchQuery) -> Result<Vec<Record>> {
        self.record(StatementKind::Select, query.table(), query.to_sql().0)?;
        lock(&self.state).select(query)
    }

    fn count(&self, query: &BatchQuery) -> Result<u64> {
        self.record(StatementKind::Count, query.table(), query.to_count_sql().0)?;
        lock(&self.state).count(query)
    }

    fn insert(&self, table: &str, rows: &[Row]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let columns: Vec<&str> = rows[0].keys().map(String::as_str).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            jsonapi_orm_query::quote_identifier(table),
            columns
                .iter()
                .map(|c| jsonapi_orm_query::quote_identifier(c))
                .collect::<Vec<_>>()
                .join(", "),
            vec![format!("({})", vec!["?"; columns.len()].join(", ")); rows.len()].join(", ")
        );
        self.record(StatementKind::Insert, table, sql)?;

        let mut state = lock(&self.state);
        let target = state.tables.entry(table.to_string()).or_default();
        for row in rows {
            target.observe_id(row.get("id"));
            target.rows.push(row.clone());
        }
        Ok(rows.len() as u64)
    }

    fn delete(&self, query: &BatchQuery) -> Result<u64> {
        self.record(StatementKind::Delete, query.table(), query.to_delete_sql().0)?;
        lock(&self.state).delete(query)
    }

    fn save(&self, def: &ModelDef, record: &mut Record) -> Result<()> {
        self.check_failure(&def.table)?;
        let mut state = lock(&self.state);
        let table = state
            .tables
            .get_mut(&def.table)
            .ok_or_else(|| no_such_table(&def.table))?;

        let pk = def.primary_key.as_str();
        if record.get_attribute(pk).is_none_or(Value::is_blank) {
            let id = table.allocate_id();
            record.set_attribute(pk, Value::BigInt(id));
        }
        let Some(key) = record.get_attribute(pk).cloned() else {
            return Err(Error::query(
                QueryErrorKind::Constraint,
                format!("{} has no primary key value", def.model),
            ));
        };
        table.observe_id(Some(&key));

        let row: Row = record
            .attributes()
            .iter()
            .filter(|(name, _)| name.as_str() != THROUGH_KEY)
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();

        let existing = table
            .rows
            .iter()
            .position(|candidate| candidate.get(pk).is_some_and(|v| v.loose_eq(&key)));
        let sql = if let Some(index) = existing {
            table.rows[index].extend(row);
            format!(
                "UPDATE {} SET ... WHERE {} = ?",
                jsonapi_orm_query::quote_identifier(&def.table),
                jsonapi_orm_query::quote_identifier(pk)
            )
        } else {
            table.rows.push(row);
            format!(
                "INSERT INTO {} ...",
                jsonapi_orm_query::quote_identifier(&def.table)
            )
        };
        drop(state);

        self.log(StatementKind::Save, &def.table, sql);
        record.mark_persisted();
        Ok(())
    }

    fn transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Self) -> Result<T>,
    {
        let snapshot = lock(&self.state).clone();
        tracing::debug!("Transaction started");
        match f(self) {
            Ok(value) => {
                tracing::debug!("Transaction committed");
                Ok(value)
            }
            Err(e) => {
                *lock(&self.state) = snapshot;
                tracing::debug!(error = %e, "Transaction rolled back");
                Err(e)
            }
        }
    }
}

/// Build a row from `(column, value)` pairs.
pub fn row<I, K, V>(pairs: I) -> Row
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonapi_orm_core::KeyValue;
    use jsonapi_orm_query::{Column, Expr, OrderBy, PivotJoin, ThroughJoin};

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.seed(
            "users",
            [
                row([("id", Value::from(1)), ("name", Value::from("ann"))]),
                row([("id", Value::from(2)), ("name", Value::from("bob"))]),
            ],
        );
        store.seed(
            "posts",
            [
                row([("id", Value::from(10)), ("user_id", Value::from(1)), ("title", Value::from("b"))]),
                row([("id", Value::from(11)), ("user_id", Value::from(1)), ("title", Value::from("a"))]),
                row([("id", Value::from(12)), ("user_id", Value::from(2)), ("title", Value::from("c"))]),
            ],
        );
        store
    }

    #[test]
    fn select_with_in_and_order() {
        let store = store();
        let query = BatchQuery::new("Post", "posts")
            .where_in("posts.user_id", &[KeyValue::Int(1)])
            .order_by(OrderBy::asc("posts.title"));
        let records = store.get(&query).unwrap();
        let titles: Vec<_> = records
            .iter()
            .map(|r| r.get_attribute("title").and_then(Value::as_str).unwrap().to_string())
            .collect();
        assert_eq!(titles, vec!["a", "b"]);
        assert!(records.iter().all(|r| r.exists() && r.model() == "Post"));
        assert_eq!(store.select_count(), 1);
        assert_eq!(store.selects_on("posts"), 1);
    }

    #[test]
    fn group_by_keeps_first_row() {
        let store = store();
        let query = BatchQuery::new("Post", "posts")
            .where_in("posts.user_id", &[KeyValue::Int(1), KeyValue::Int(2)])
            .group_by("posts.user_id");
        let ids: Vec<_> = store
            .get(&query)
            .unwrap()
            .iter()
            .map(|r| r.key("id").unwrap())
            .collect();
        assert_eq!(ids, vec![KeyValue::Int(10), KeyValue::Int(12)]);
    }

    #[test]
    fn pivot_join_exposes_pivot_columns() {
        let store = store();
        store.seed(
            "tags",
            [
                row([("id", Value::from(1)), ("name", Value::from("rust"))]),
                row([("id", Value::from(2)), ("name", Value::from("sql"))]),
            ],
        );
        store.seed(
            "post_tag",
            [
                row([("post_id", 10), ("tag_id", 2)]),
                row([("post_id", 10), ("tag_id", 1)]),
                row([("post_id", 11), ("tag_id", 1)]),
            ],
        );
        let query = BatchQuery::new("Tag", "tags")
            .join_pivot(PivotJoin {
                table: "post_tag".into(),
                foreign_pivot_key: "post_id".into(),
                related_pivot_key: "tag_id".into(),
                related_key: "id".into(),
                columns: Vec::new(),
            })
            .where_in("post_tag.post_id", &[KeyValue::Int(10)]);
        let records = store.get(&query).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].key("id"), Some(KeyValue::Int(2)));
        assert_eq!(records[0].pivot_value("post_id"), Some(&Value::Int(10)));
        assert_eq!(records[1].pivot_value("tag_id"), Some(&Value::Int(1)));
    }

    #[test]
    fn through_join_exposes_through_key() {
        let store = store();
        store.seed(
            "authors",
            [
                row([("id", 1), ("country_id", 7)]),
                row([("id", 2), ("country_id", 8)]),
            ],
        );
        let query = BatchQuery::new("Post", "posts")
            .join_through(ThroughJoin {
                table: "authors".into(),
                first_key: "country_id".into(),
                second_key: "user_id".into(),
                second_local_key: "id".into(),
            })
            .where_in(Column::qualified("authors", "country_id"), &[KeyValue::Int(7)]);
        let records = store.get(&query).unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.get_attribute(THROUGH_KEY) == Some(&Value::Int(7))));
    }

    #[test]
    fn missing_table_is_a_query_error() {
        let store = MemoryStore::new();
        let err = store.get(&BatchQuery::new("Post", "posts")).unwrap_err();
        assert!(matches!(err, Error::Query(_)));
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn insert_delete_and_count() {
        let store = store().with_table("post_tag");
        let inserted = store
            .insert(
                "post_tag",
                &[row([("post_id", 10), ("tag_id", 1)]), row([("post_id", 11), ("tag_id", 1)])],
            )
            .unwrap();
        assert_eq!(inserted, 2);
        let query = BatchQuery::for_table("post_tag").filter(Expr::eq("post_id", 10));
        assert_eq!(store.count(&query).unwrap(), 1);
        assert_eq!(store.delete(&query).unwrap(), 1);
        assert_eq!(store.rows("post_tag").unwrap().len(), 1);
        assert_eq!(store.count_of(StatementKind::Insert), 1);
        assert_eq!(store.count_of(StatementKind::Delete), 1);
    }

    #[test]
    fn save_inserts_then_updates() {
        let store = store();
        let def = ModelDef::new("Post", "posts");
        let mut post = Record::new("Post").with("user_id", 2).with("title", "new");
        store.save(&def, &mut post).unwrap();
        assert!(post.exists());
        assert_eq!(post.key("id"), Some(KeyValue::Int(13)));

        post.set_attribute("title", "renamed");
        store.save(&def, &mut post).unwrap();
        let found = store.find(&def, &KeyValue::Int(13)).unwrap().unwrap();
        assert_eq!(found.get_attribute("title"), Some(&Value::from("renamed")));
        assert_eq!(store.rows("posts").unwrap().len(), 4);
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let store = store();
        let def = ModelDef::new("Post", "posts");
        let result: Result<()> = store.transaction(|tx| {
            let mut post = Record::new("Post").with("user_id", 1);
            tx.save(&def, &mut post)?;
            Err(Error::Custom("boom".into()))
        });
        assert!(result.is_err());
        assert_eq!(store.rows("posts").unwrap().len(), 3);

        store
            .transaction(|tx| tx.insert("posts", &[row([("id", 20)])]))
            .unwrap();
        assert_eq!(store.rows("posts").unwrap().len(), 4);
    }

    #[test]
    fn injected_failure_fires_once() {
        let store = store();
        store.fail_next("disk I/O error");
        let query = BatchQuery::new("User", "users");
        let err = store.get(&query).unwrap_err();
        assert!(err.to_string().contains("disk I/O error"));
        assert_eq!(store.get(&query).unwrap().len(), 2);
        assert_eq!(store.select_count(), 1);
    }
}
