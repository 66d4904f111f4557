//! Sparse fieldsets over built documents.
//!
//! `?includes[posts]=title,body` keeps only the listed attributes of `posts`
//! resources; `?excludes[users]=email` drops the listed attributes of
//! `users` resources. Both apply to `data` and `included`.

use serde_json::Value as Json;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SparseFieldsets {
    includes: BTreeMap<String, Vec<String>>,
    excludes: BTreeMap<String, Vec<String>>,
}

fn split_fields(fields: &str) -> Vec<String> {
    fields
        .split(',')
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .map(str::to_string)
        .collect()
}

fn bracketed<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    key.strip_prefix(prefix)?
        .strip_prefix('[')?
        .strip_suffix(']')
        .filter(|inner| !inner.is_empty())
}

impl SparseFieldsets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep only `fields` (comma separated) on resources of `resource_type`.
    #[must_use]
    pub fn include(mut self, resource_type: impl Into<String>, fields: &str) -> Self {
        let fields = split_fields(fields);
        if !fields.is_empty() {
            self.includes.insert(resource_type.into(), fields);
        }
        self
    }

    /// Drop `fields` (comma separated) from resources of `resource_type`.
    #[must_use]
    pub fn exclude(mut self, resource_type: impl Into<String>, fields: &str) -> Self {
        let fields = split_fields(fields);
        if !fields.is_empty() {
            self.excludes.insert(resource_type.into(), fields);
        }
        self
    }

    /// Collect `includes[type]` / `excludes[type]` query parameters; other
    /// parameters are ignored.
    pub fn from_query_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        pairs.into_iter().fold(Self::new(), |sets, (key, value)| {
            if let Some(resource_type) = bracketed(key, "includes") {
                sets.include(resource_type, value)
            } else if let Some(resource_type) = bracketed(key, "excludes") {
                sets.exclude(resource_type, value)
            } else {
                sets
            }
        })
    }

    pub fn is_empty(&self) -> bool {
        self.includes.is_empty() && self.excludes.is_empty()
    }

    /// Filter the attributes of every resource object in `data` and `included`.
    pub fn apply(&self, document: &mut Json) {
        if self.is_empty() {
            return;
        }
        for member in ["data", "included"] {
            match document.get_mut(member) {
                Some(Json::Array(resources)) => {
                    for resource in resources {
                        self.apply_to_resource(resource);
                    }
                }
                Some(resource) if resource.is_object() => self.apply_to_resource(resource),
                _ => {}
            }
        }
    }

    fn apply_to_resource(&self, resource: &mut Json) {
        let Some(resource_type) = resource.get("type").and_then(Json::as_str).map(str::to_string)
        else {
            return;
        };
        let Some(Json::Object(attributes)) = resource.get_mut("attributes") else {
            return;
        };
        if let Some(keep) = self.includes.get(&resource_type) {
            attributes.retain(|name, _| keep.contains(name));
        }
        if let Some(drop) = self.excludes.get(&resource_type) {
            attributes.retain(|name, _| !drop.contains(name));
        }
    }
}
