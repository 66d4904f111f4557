//! Batched query composition for the JSON:API ORM layer.
//!
//! `jsonapi-orm-query` is the **query construction layer**. It provides:
//!
//! - `BatchQuery`: one `WHERE key IN (...)` lookup with optional pivot or
//!   through join, `GROUP BY`, ordering, and paging
//! - `QueryExecutor`: the contract a store implements to run those queries
//! - Client-facing parameter handling: filters, `sort`, `include`, and
//!   sparse fieldsets
//!
//! Executors live outside this crate (`jsonapi-orm-memory` ships an
//! in-process one).

pub mod clause;
pub mod executor;
pub mod expr;
pub mod filter;
pub mod include;
pub mod query;
pub mod sort;
pub mod sparse;

pub use clause::{Limit, Offset, OrderBy, OrderDirection};
pub use executor::{QueryExecutor, Row};
pub use expr::{Column, CompareOp, Expr, quote_identifier};
pub use filter::{Boolean, Condition, ConditionType, FilterComposer};
pub use include::{IncludePath, parse_include};
pub use query::{BatchQuery, Join, PivotJoin, THROUGH_KEY, ThroughJoin};
pub use sort::parse_sort;
pub use sparse::SparseFieldsets;
