//! Records and their relationship slots.
//!
//! A `Record` is the in-memory representation of one row of a model. Its
//! attributes are read and written through explicit accessors; relationship
//! slots are filled by the resolver and are absent until loaded.

use crate::key::KeyValue;
use crate::value::Value;
use std::collections::BTreeMap;

/// Contents of a loaded relationship slot.
#[derive(Debug, Clone, PartialEq)]
pub enum RelationSlot {
    /// To-one relationship: the related record, or null.
    One(Option<Record>),
    /// To-many relationship in query order (possibly empty).
    Many(Vec<Record>),
}

impl RelationSlot {
    /// Iterate over the records held in this slot.
    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        let (one, many): (Option<&Record>, &[Record]) = match self {
            RelationSlot::One(record) => (record.as_ref(), &[]),
            RelationSlot::Many(records) => (None, records),
        };
        one.into_iter().chain(many.iter())
    }

    /// Mutable variant of [`RelationSlot::iter`].
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Record> {
        let (one, many): (Option<&mut Record>, &mut [Record]) = match self {
            RelationSlot::One(record) => (record.as_mut(), Default::default()),
            RelationSlot::Many(records) => (None, records),
        };
        one.into_iter().chain(many.iter_mut())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            RelationSlot::One(record) => record.is_none(),
            RelationSlot::Many(records) => records.is_empty(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RelationSlot::One(record) => usize::from(record.is_some()),
            RelationSlot::Many(records) => records.len(),
        }
    }
}

/// One row of a model, with attributes and loaded relationship slots.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    model: String,
    attributes: BTreeMap<String, Value>,
    relations: BTreeMap<String, RelationSlot>,
    pivot: Option<BTreeMap<String, Value>>,
    exists: bool,
}

impl Record {
    /// Create a new, not yet persisted record of `model`.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    /// Create a record that is known to exist in the store.
    pub fn persisted(model: impl Into<String>) -> Self {
        Self {
            exists: true,
            ..Self::new(model)
        }
    }

    /// Builder-style attribute setter.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// The model this record belongs to.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Whether the record has been persisted.
    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn mark_persisted(&mut self) {
        self.exists = true;
    }

    /// Read an attribute. Missing attributes read as `None`.
    pub fn get_attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Write an attribute, returning the previous value.
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.attributes.insert(name.into(), value.into())
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<Value> {
        self.attributes.remove(name)
    }

    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.attributes
    }

    /// Normalized key read from `name`, if the attribute holds a usable key.
    pub fn key(&self, name: &str) -> Option<KeyValue> {
        self.attributes.get(name).and_then(KeyValue::from_value)
    }

    /// Whether the relationship `name` has been loaded.
    pub fn relation_loaded(&self, name: &str) -> bool {
        self.relations.contains_key(name)
    }

    pub fn relation(&self, name: &str) -> Option<&RelationSlot> {
        self.relations.get(name)
    }

    pub fn relation_mut(&mut self, name: &str) -> Option<&mut RelationSlot> {
        self.relations.get_mut(name)
    }

    pub fn set_relation(&mut self, name: impl Into<String>, slot: RelationSlot) {
        self.relations.insert(name.into(), slot);
    }

    /// Forget a loaded relationship so it reads as not loaded again.
    pub fn unset_relation(&mut self, name: &str) -> Option<RelationSlot> {
        self.relations.remove(name)
    }

    pub fn relations(&self) -> &BTreeMap<String, RelationSlot> {
        &self.relations
    }

    pub fn relations_mut(&mut self) -> impl Iterator<Item = (&String, &mut RelationSlot)> {
        self.relations.iter_mut()
    }

    /// The loaded to-one relationship, if loaded and non-null.
    pub fn related_one(&self, name: &str) -> Option<&Record> {
        match self.relations.get(name) {
            Some(RelationSlot::One(record)) => record.as_ref(),
            _ => None,
        }
    }

    /// The loaded to-many relationship, or an empty slice.
    pub fn related_many(&self, name: &str) -> &[Record] {
        match self.relations.get(name) {
            Some(RelationSlot::Many(records)) => records,
            _ => &[],
        }
    }

    /// Pivot columns loaded alongside a many-to-many related record.
    pub fn pivot(&self) -> Option<&BTreeMap<String, Value>> {
        self.pivot.as_ref()
    }

    pub fn set_pivot(&mut self, pivot: BTreeMap<String, Value>) {
        self.pivot = Some(pivot);
    }

    /// Read one pivot column.
    pub fn pivot_value(&self, column: &str) -> Option<&Value> {
        self.pivot.as_ref().and_then(|pivot| pivot.get(column))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_accessors() {
        let mut post = Record::new("Post").with("id", 1_i64).with("title", "Hello");
        assert_eq!(post.get_attribute("title"), Some(&Value::Text("Hello".into())));
        assert!(post.get_attribute("missing").is_none());

        let previous = post.set_attribute("title", "Bye");
        assert_eq!(previous, Some(Value::Text("Hello".into())));
        assert_eq!(post.key("id"), Some(KeyValue::Int(1)));
        assert!(!post.exists());
        post.mark_persisted();
        assert!(post.exists());
    }

    #[test]
    fn relation_slots_distinguish_not_loaded_from_empty() {
        let mut user = Record::persisted("User").with("id", 1_i64);
        assert!(!user.relation_loaded("posts"));
        assert!(user.related_many("posts").is_empty());

        user.set_relation("posts", RelationSlot::Many(Vec::new()));
        assert!(user.relation_loaded("posts"));
        assert!(user.relation("posts").is_some_and(RelationSlot::is_empty));

        user.set_relation("profile", RelationSlot::One(None));
        assert!(user.related_one("profile").is_none());
        assert_eq!(user.relation("profile").map(RelationSlot::len), Some(0));
    }

    #[test]
    fn slot_iteration() {
        let one = RelationSlot::One(Some(Record::new("Profile").with("id", 3_i64)));
        assert_eq!(one.iter().count(), 1);

        let mut many = RelationSlot::Many(vec![Record::new("Post"), Record::new("Post")]);
        for record in many.iter_mut() {
            record.set_attribute("seen", true);
        }
        assert!(many
            .iter()
            .all(|record| record.get_attribute("seen") == Some(&Value::Bool(true))));
    }

    #[test]
    fn pivot_values() {
        let mut tag = Record::persisted("Tag").with("id", 9_i64);
        assert!(tag.pivot_value("post_id").is_none());
        let mut pivot = BTreeMap::new();
        pivot.insert("post_id".to_string(), Value::BigInt(1));
        tag.set_pivot(pivot);
        assert_eq!(tag.pivot_value("post_id"), Some(&Value::BigInt(1)));
    }
}
