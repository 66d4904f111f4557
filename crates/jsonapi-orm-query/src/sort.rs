//! `sort` parameter parsing.
//!
//! `?sort=-created_at,title` sorts by `created_at` descending, then `title`
//! ascending. Fields must be whitelisted by the resource.

use crate::clause::OrderBy;
use crate::expr::Column;
use jsonapi_orm_core::{Error, Result};

const DEFAULT_MAX_FIELDS: usize = 2;

/// Parse a `sort` parameter into ORDER BY terms qualified by `table`.
///
/// Empty segments are ignored. More than `max_fields` fields (values below 1
/// fall back to 2) or a field outside `allowed` is a validation error.
pub fn parse_sort(
    input: &str,
    table: &str,
    allowed: &[String],
    max_fields: usize,
) -> Result<Vec<OrderBy>> {
    let max_fields = if max_fields >= 1 {
        max_fields
    } else {
        DEFAULT_MAX_FIELDS
    };
    let fields: Vec<&str> = input
        .split(',')
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .collect();

    if fields.len() > max_fields {
        return Err(Error::validation(format!(
            "Too many fields for sorting. Maximum: {max_fields}"
        )));
    }

    fields
        .into_iter()
        .map(|field| {
            let (name, descending) = match field.strip_prefix('-') {
                Some(name) => (name, true),
                None => (field, false),
            };
            if !allowed.iter().any(|allowed| allowed == name) {
                return Err(Error::validation(format!(
                    "Field {name} is not allowed for sorting"
                )));
            }
            let column = Column::qualified(table, name);
            Ok(if descending {
                OrderBy::desc(column)
            } else {
                OrderBy::asc(column)
            })
        })
        .collect()
}
