//! Table storage and query evaluation.

use jsonapi_orm_core::{Error, QueryErrorKind, Record, Result, Value};
use jsonapi_orm_query::{BatchQuery, Column, Join, OrderDirection, Row, THROUGH_KEY};
use std::cmp::Ordering;
use std::collections::BTreeMap;

static NULL: Value = Value::Null;

/// Rows of one table in insertion order.
#[derive(Debug, Clone, Default)]
pub(crate) struct Table {
    pub(crate) rows: Vec<Row>,
    pub(crate) next_id: i64,
}

impl Table {
    /// Next auto-increment id, kept above every integer id seen so far.
    pub(crate) fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    pub(crate) fn observe_id(&mut self, value: Option<&Value>) {
        if let Some(id) = value.and_then(Value::as_i64) {
            self.next_id = self.next_id.max(id);
        }
    }
}

/// All tables of a store.
#[derive(Debug, Clone, Default)]
pub(crate) struct State {
    pub(crate) tables: BTreeMap<String, Table>,
}

/// A candidate result row: the main row plus the joined row, if any.
struct Joined<'a> {
    main: &'a Row,
    joined: Option<&'a Row>,
}

impl State {
    pub(crate) fn table(&self, name: &str) -> Result<&Table> {
        self.tables.get(name).ok_or_else(|| no_such_table(name))
    }

    fn joined_rows<'a>(&'a self, query: &BatchQuery) -> Result<Vec<Joined<'a>>> {
        let main = self.table(query.table())?;
        let mut rows = Vec::new();
        match query.join() {
            None => rows.extend(main.rows.iter().map(|row| Joined { main: row, joined: None })),
            Some(Join::Pivot(pivot)) => {
                // Pivot rows drive the order so related records come back in
                // attach order.
                let pivot_table = self.table(&pivot.table)?;
                for pivot_row in &pivot_table.rows {
                    let Some(link) = pivot_row.get(&pivot.related_pivot_key) else {
                        continue;
                    };
                    for row in &main.rows {
                        if row.get(&pivot.related_key).is_some_and(|key| !key.is_null() && key.loose_eq(link)) {
                            rows.push(Joined {
                                main: row,
                                joined: Some(pivot_row),
                            });
                        }
                    }
                }
            }
            Some(Join::Through(through)) => {
                let through_table = self.table(&through.table)?;
                for row in &main.rows {
                    let Some(link) = row.get(&through.second_key) else {
                        continue;
                    };
                    for through_row in &through_table.rows {
                        if through_row
                            .get(&through.second_local_key)
                            .is_some_and(|key| !key.is_null() && key.loose_eq(link))
                        {
                            rows.push(Joined {
                                main: row,
                                joined: Some(through_row),
                            });
                        }
                    }
                }
            }
        }
        Ok(rows)
    }

    fn matching<'a>(&'a self, query: &BatchQuery) -> Result<Vec<Joined<'a>>> {
        let join_table = match query.join() {
            Some(Join::Pivot(pivot)) => Some(pivot.table.as_str()),
            Some(Join::Through(through)) => Some(through.table.as_str()),
            None => None,
        };
        let mut rows = self.joined_rows(query)?;
        if let Some(filter) = query.filter_expr() {
            rows.retain(|row| {
                filter.evaluate(&|column: &Column| lookup(row, column, query.table(), join_table))
            });
        }
        Ok(rows)
    }

    /// Evaluate a SELECT.
    pub(crate) fn select(&self, query: &BatchQuery) -> Result<Vec<Record>> {
        let join_table = match query.join() {
            Some(Join::Pivot(pivot)) => Some(pivot.table.as_str()),
            Some(Join::Through(through)) => Some(through.table.as_str()),
            None => None,
        };
        let mut rows = self.matching(query)?;

        if let Some(group_by) = query.group_by_column() {
            let mut seen: Vec<&Value> = Vec::new();
            rows.retain(|row| {
                let value = lookup(row, group_by, query.table(), join_table).unwrap_or(&NULL);
                if seen.iter().any(|v| v.compare(value) == Some(Ordering::Equal)) {
                    false
                } else {
                    seen.push(value);
                    true
                }
            });
        }

        if !query.order_terms().is_empty() {
            rows.sort_by(|a, b| {
                for term in query.order_terms() {
                    let left = lookup(a, &term.column, query.table(), join_table).unwrap_or(&NULL);
                    let right = lookup(b, &term.column, query.table(), join_table).unwrap_or(&NULL);
                    let ordering = left.compare(right).unwrap_or(Ordering::Equal);
                    let ordering = match term.direction {
                        OrderDirection::Asc => ordering,
                        OrderDirection::Desc => ordering.reverse(),
                    };
                    if ordering != Ordering::Equal {
                        return ordering;
                    }
                }
                Ordering::Equal
            });
        }

        let offset = usize::try_from(query.offset_value().unwrap_or(0)).unwrap_or(usize::MAX);
        let limit = query
            .limit_value()
            .map_or(usize::MAX, |limit| usize::try_from(limit).unwrap_or(usize::MAX));

        Ok(rows
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|row| to_record(query, &row))
            .collect())
    }

    /// Evaluate a COUNT over table, join, and filter.
    pub(crate) fn count(&self, query: &BatchQuery) -> Result<u64> {
        Ok(self.matching(query)?.len() as u64)
    }

    /// Delete matching rows of the query's table.
    pub(crate) fn delete(&mut self, query: &BatchQuery) -> Result<u64> {
        let name = query.table().to_string();
        let table = self.tables.get_mut(&name).ok_or_else(|| no_such_table(&name))?;
        let before = table.rows.len();
        if let Some(filter) = query.filter_expr() {
            table.rows.retain(|row| {
                let joined = Joined { main: row, joined: None };
                !filter.evaluate(&|column: &Column| lookup(&joined, column, &name, None))
            });
        } else {
            table.rows.clear();
        }
        Ok((before - table.rows.len()) as u64)
    }
}

fn lookup<'a>(
    row: &Joined<'a>,
    column: &Column,
    main_table: &str,
    join_table: Option<&str>,
) -> Option<&'a Value> {
    match column.table.as_deref() {
        Some(table) if Some(table) == join_table => row.joined.and_then(|j| j.get(&column.name)),
        Some(table) if table == main_table => row.main.get(&column.name),
        Some(_) => None,
        None => row
            .main
            .get(&column.name)
            .or_else(|| row.joined.and_then(|j| j.get(&column.name))),
    }
}

fn to_record(query: &BatchQuery, row: &Joined<'_>) -> Record {
    let mut record = Record::persisted(query.model());
    for (name, value) in row.main {
        record.set_attribute(name.clone(), value.clone());
    }
    match (query.join(), row.joined) {
        (Some(Join::Pivot(pivot)), Some(pivot_row)) => {
            let columns = pivot
                .selected_columns()
                .into_iter()
                .map(|column| {
                    let value = pivot_row.get(column).cloned().unwrap_or(Value::Null);
                    (column.to_string(), value)
                })
                .collect();
            record.set_pivot(columns);
        }
        (Some(Join::Through(through)), Some(through_row)) => {
            let key = through_row.get(&through.first_key).cloned().unwrap_or(Value::Null);
            record.set_attribute(THROUGH_KEY, key);
        }
        _ => {}
    }
    record
}

pub(crate) fn no_such_table(name: &str) -> Error {
    Error::query(QueryErrorKind::NotFound, format!("no such table: {name}"))
}
