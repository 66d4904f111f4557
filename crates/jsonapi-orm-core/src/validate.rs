//! Identifier validation for configuration and request parameters.
//!
//! Resource types and field names end up in URLs and in query columns, so
//! both are checked against fixed patterns before use.

use std::sync::OnceLock;

use regex::Regex;

const RESOURCE_TYPE_PATTERN: &str = r"^[A-Za-z][A-Za-z0-9_\-]*$";
const FIELD_NAME_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$";

fn compiled(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| match Regex::new(pattern) {
        Ok(regex) => Some(regex),
        Err(e) => {
            tracing::warn!(
                pattern = pattern,
                error = %e,
                "Invalid identifier pattern, treating every value as invalid"
            );
            None
        }
    })
    .as_ref()
}

fn matches(cell: &'static OnceLock<Option<Regex>>, pattern: &str, value: &str) -> bool {
    compiled(cell, pattern).is_some_and(|regex| regex.is_match(value))
}

/// Check a JSON:API resource type (`posts`, `blog-posts`, `user_profiles`).
pub fn is_valid_resource_type(value: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    matches(&PATTERN, RESOURCE_TYPE_PATTERN, value)
}

/// Check a column name, optionally qualified by one table (`posts.title`).
pub fn is_valid_field_name(value: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    matches(&PATTERN, FIELD_NAME_PATTERN, value)
}
