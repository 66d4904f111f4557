//! Relationship key normalization and extraction.
//!
//! Every batched relationship query is constrained by `WHERE key IN (...)`.
//! The keys come from parent records, related rows, and pivot rows, which may
//! store the same logical id with different integer widths (or, for payload
//! ids, as strings). `KeyValue` collapses those representations so grouping in
//! memory matches what the database matched.

use crate::record::Record;
use crate::value::{Value, format_uuid, parse_uuid};
use std::collections::HashSet;
use std::fmt;

/// A hashable, normalized relationship key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyValue {
    Int(i64),
    Text(String),
    Uuid([u8; 16]),
}

impl KeyValue {
    /// Normalize a stored value into a key.
    ///
    /// NULL, empty text, and non-key types (floats, booleans, JSON) yield
    /// `None` and never contribute to an `IN` list.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Text(s) if s.is_empty() => None,
            Value::Text(s) => Some(KeyValue::Text(s.clone())),
            Value::Uuid(bytes) => Some(KeyValue::Uuid(*bytes)),
            Value::TinyInt(_) | Value::SmallInt(_) | Value::Int(_) | Value::BigInt(_) => {
                value.as_i64().map(KeyValue::Int)
            }
            _ => None,
        }
    }

    /// Parse a resource identifier as it appears in a request document.
    ///
    /// JSON:API ids are strings; an id made only of digits (with an optional
    /// leading minus) is read as an integer key so it matches integer
    /// primary keys, and a hyphenated UUID is read as a UUID key.
    pub fn parse_id(id: &str) -> Option<Self> {
        if id.is_empty() {
            return None;
        }
        if let Some(bytes) = parse_uuid(id) {
            return Some(KeyValue::Uuid(bytes));
        }
        match id.parse::<i64>() {
            Ok(value) if !id.starts_with('+') => Some(KeyValue::Int(value)),
            _ => Some(KeyValue::Text(id.to_string())),
        }
    }

    /// Convert back into a value for query parameters and attribute writes.
    pub fn to_value(&self) -> Value {
        match self {
            KeyValue::Int(v) => Value::BigInt(*v),
            KeyValue::Text(s) => Value::Text(s.clone()),
            KeyValue::Uuid(bytes) => Value::Uuid(*bytes),
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Int(v) => write!(f, "{v}"),
            KeyValue::Text(s) => write!(f, "{s}"),
            KeyValue::Uuid(bytes) => write!(f, "{}", format_uuid(bytes)),
        }
    }
}

impl From<&KeyValue> for Value {
    fn from(key: &KeyValue) -> Self {
        key.to_value()
    }
}

impl From<KeyValue> for Value {
    fn from(key: KeyValue) -> Self {
        key.to_value()
    }
}

/// Extract the unique keys stored under `key_attr` across `records`.
///
/// Keys are returned in first-seen order; NULL and empty values are dropped.
/// An empty result means the caller must skip the query entirely.
pub fn extract_keys(records: &[Record], key_attr: &str) -> Vec<KeyValue> {
    extract_keys_from(records.iter(), key_attr)
}

/// Same as [`extract_keys`] over any iterator of record references.
pub fn extract_keys_from<'a, I>(records: I, key_attr: &str) -> Vec<KeyValue>
where
    I: IntoIterator<Item = &'a Record>,
{
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    for record in records {
        if let Some(key) = record.key(key_attr) {
            if seen.insert(key.clone()) {
                keys.push(key);
            }
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: impl Into<Value>) -> Record {
        Record::persisted("User").with("id", id)
    }

    #[test]
    fn integer_widths_normalize() {
        assert_eq!(KeyValue::from_value(&Value::Int(4)), Some(KeyValue::Int(4)));
        assert_eq!(
            KeyValue::from_value(&Value::SmallInt(4)),
            KeyValue::from_value(&Value::BigInt(4))
        );
        assert_eq!(KeyValue::from_value(&Value::Double(4.0)), None);
        assert_eq!(KeyValue::from_value(&Value::Null), None);
        assert_eq!(KeyValue::from_value(&Value::Text(String::new())), None);
    }

    #[test]
    fn payload_ids() {
        assert_eq!(KeyValue::parse_id("12"), Some(KeyValue::Int(12)));
        assert_eq!(KeyValue::parse_id("-3"), Some(KeyValue::Int(-3)));
        assert_eq!(
            KeyValue::parse_id("+3"),
            Some(KeyValue::Text("+3".to_string()))
        );
        assert_eq!(
            KeyValue::parse_id("abc-1"),
            Some(KeyValue::Text("abc-1".to_string()))
        );
        assert_eq!(KeyValue::parse_id(""), None);
        assert_eq!(
            KeyValue::parse_id("11111111-1111-1111-1111-11111111111F"),
            Some(KeyValue::Uuid([
                0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11,
                0x11, 0x1f
            ]))
        );
        assert_eq!(
            KeyValue::parse_id("11111111-1111-1111-1111-11111111111g"),
            Some(KeyValue::Text("11111111-1111-1111-1111-11111111111g".to_string()))
        );
    }

    #[test]
    fn extract_dedups_in_first_seen_order() {
        let records = vec![
            user(3_i64),
            user(1_i32),
            user(3_i32),
            user(Value::Null),
            user(""),
            user(2_i64),
            Record::persisted("User"),
        ];
        assert_eq!(
            extract_keys(&records, "id"),
            vec![KeyValue::Int(3), KeyValue::Int(1), KeyValue::Int(2)]
        );
    }

    #[test]
    fn extract_from_empty_input() {
        assert!(extract_keys(&[], "id").is_empty());
    }

    #[test]
    fn display_round_trips_through_parse() {
        for key in [KeyValue::Int(42), KeyValue::Text("slug".into()), KeyValue::Uuid([0xab; 16])] {
            assert_eq!(KeyValue::parse_id(&key.to_string()), Some(key));
        }
    }
}
