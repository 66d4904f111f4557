//! Relationship descriptors.
//!
//! A `RelationshipDescriptor` is the declarative description of one
//! relationship of a model: its kind, the keys that connect the two sides,
//! and, depending on the kind, a pivot table, a morph type column, or an
//! intermediate "through" table. Descriptors are loaded once with the
//! application configuration and shared read-only by every request.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The closed set of relationship kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    /// `User` has one `Profile` (`profiles.user_id`).
    HasOne,
    /// `User` has many `Post`s (`posts.user_id`).
    HasMany,
    /// `Post` belongs to `User` (`posts.user_id`).
    BelongsTo,
    /// `Post`s have many `Tag`s via a pivot table.
    BelongsToMany,
    /// `Post` has one `Image` whose `imageable_type` names the owner.
    MorphOne,
    /// `Post` has many `Comment`s whose `commentable_type` names the owner.
    MorphMany,
    /// `Comment` belongs to whichever model `commentable_type` names.
    MorphTo,
    /// `Post`s have many `Tag`s via a pivot table with a morph type column.
    MorphToMany,
    /// `Mechanic` has one `Owner` through `Car`.
    HasOneThrough,
    /// `Country` has many `Post`s through `User`.
    HasManyThrough,
}

impl RelationshipKind {
    /// Whether the relationship holds at most one record.
    pub const fn is_to_one(self) -> bool {
        matches!(
            self,
            RelationshipKind::HasOne
                | RelationshipKind::BelongsTo
                | RelationshipKind::MorphOne
                | RelationshipKind::MorphTo
                | RelationshipKind::HasOneThrough
        )
    }

    /// Whether the relationship is stored in a pivot table.
    pub const fn uses_pivot(self) -> bool {
        matches!(
            self,
            RelationshipKind::BelongsToMany | RelationshipKind::MorphToMany
        )
    }

    /// Whether the relationship carries a morph type column.
    pub const fn is_morph(self) -> bool {
        matches!(
            self,
            RelationshipKind::MorphOne
                | RelationshipKind::MorphMany
                | RelationshipKind::MorphTo
                | RelationshipKind::MorphToMany
        )
    }

    /// Whether the relationship goes through an intermediate table.
    pub const fn is_through(self) -> bool {
        matches!(
            self,
            RelationshipKind::HasOneThrough | RelationshipKind::HasManyThrough
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            RelationshipKind::HasOne => "has_one",
            RelationshipKind::HasMany => "has_many",
            RelationshipKind::BelongsTo => "belongs_to",
            RelationshipKind::BelongsToMany => "belongs_to_many",
            RelationshipKind::MorphOne => "morph_one",
            RelationshipKind::MorphMany => "morph_many",
            RelationshipKind::MorphTo => "morph_to",
            RelationshipKind::MorphToMany => "morph_to_many",
            RelationshipKind::HasOneThrough => "has_one_through",
            RelationshipKind::HasManyThrough => "has_many_through",
        }
    }
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pivot table of a many-to-many relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotTable {
    /// The pivot table name (e.g., `"post_tag"`).
    pub table: String,
    /// Pivot column pointing at the parent (e.g., `"post_id"`).
    pub foreign_pivot_key: String,
    /// Pivot column pointing at the related record (e.g., `"tag_id"`).
    pub related_pivot_key: String,
    /// Filled with the write time on insert, when set.
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl PivotTable {
    #[must_use]
    pub fn new(
        table: impl Into<String>,
        foreign_pivot_key: impl Into<String>,
        related_pivot_key: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            foreign_pivot_key: foreign_pivot_key.into(),
            related_pivot_key: related_pivot_key.into(),
            created_at: None,
            updated_at: None,
        }
    }

    /// Use `created_at`/`updated_at` timestamp columns on pivot inserts.
    #[must_use]
    pub fn with_timestamps(mut self) -> Self {
        self.created_at = Some("created_at".to_string());
        self.updated_at = Some("updated_at".to_string());
        self
    }
}

/// Intermediate table of a through relationship.
///
/// For `Country -> User -> Post`: `table = "users"`, `first_key =
/// "country_id"` (on users), `second_key = "user_id"` (on posts),
/// `second_local_key = "id"` (on users).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThroughTable {
    pub table: String,
    pub first_key: String,
    pub second_key: String,
    #[serde(default = "default_key_column")]
    pub second_local_key: String,
}

impl ThroughTable {
    #[must_use]
    pub fn new(
        table: impl Into<String>,
        first_key: impl Into<String>,
        second_key: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            first_key: first_key.into(),
            second_key: second_key.into(),
            second_local_key: default_key_column(),
        }
    }

    #[must_use]
    pub fn second_local_key(mut self, column: impl Into<String>) -> Self {
        self.second_local_key = column.into();
        self
    }
}

fn default_key_column() -> String {
    "id".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// An `ORDER BY` term pushed into the batched query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationOrder {
    pub column: String,
    #[serde(default)]
    pub direction: SortDirection,
}

/// Declarative description of one relationship.
///
/// `kind` is fixed at declaration time and decides which of the other
/// fields are meaningful; [`RelationshipDescriptor::validate`] rejects
/// combinations that do not fit the kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipDescriptor {
    /// Relationship name (the slot name on the parent record).
    pub name: String,
    pub kind: RelationshipKind,
    /// Related model. Unused by `MorphTo`, which reads it off each parent.
    #[serde(default)]
    pub related_model: Option<String>,
    /// Column holding the foreign key: on the related table for
    /// has-one/has-many/morph-one/morph-many, on the parent for
    /// belongs-to/morph-to. Unused by pivot and through kinds.
    #[serde(default)]
    pub foreign_key: String,
    /// Parent-side key; defaults to the parent's primary key.
    #[serde(default)]
    pub local_key: Option<String>,
    /// Related-side key matched by belongs-to, morph-to, and pivot joins;
    /// defaults to the related model's primary key.
    #[serde(default)]
    pub owner_key: Option<String>,
    #[serde(default)]
    pub pivot: Option<PivotTable>,
    #[serde(default)]
    pub morph_type_column: Option<String>,
    /// Discriminator stored for the owning side; defaults to the parent
    /// model's morph alias.
    #[serde(default)]
    pub morph_value: Option<String>,
    /// Stored discriminator -> model name.
    #[serde(default)]
    pub morph_map: BTreeMap<String, String>,
    #[serde(default)]
    pub through: Option<ThroughTable>,
    #[serde(default)]
    pub order_by: Vec<RelationOrder>,
}

impl RelationshipDescriptor {
    /// Create a descriptor with only the name and kind set.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: RelationshipKind) -> Self {
        Self {
            name: name.into(),
            kind,
            related_model: None,
            foreign_key: String::new(),
            local_key: None,
            owner_key: None,
            pivot: None,
            morph_type_column: None,
            morph_value: None,
            morph_map: BTreeMap::new(),
            through: None,
            order_by: Vec::new(),
        }
    }

    fn keyed(
        name: impl Into<String>,
        kind: RelationshipKind,
        related_model: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        let mut descriptor = Self::new(name, kind);
        descriptor.related_model = Some(related_model.into());
        descriptor.foreign_key = foreign_key.into();
        descriptor
    }

    #[must_use]
    pub fn has_one(
        name: impl Into<String>,
        related_model: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self::keyed(name, RelationshipKind::HasOne, related_model, foreign_key)
    }

    #[must_use]
    pub fn has_many(
        name: impl Into<String>,
        related_model: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self::keyed(name, RelationshipKind::HasMany, related_model, foreign_key)
    }

    #[must_use]
    pub fn belongs_to(
        name: impl Into<String>,
        related_model: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self::keyed(name, RelationshipKind::BelongsTo, related_model, foreign_key)
    }

    #[must_use]
    pub fn belongs_to_many(
        name: impl Into<String>,
        related_model: impl Into<String>,
        pivot: PivotTable,
    ) -> Self {
        let mut descriptor = Self::new(name, RelationshipKind::BelongsToMany);
        descriptor.related_model = Some(related_model.into());
        descriptor.pivot = Some(pivot);
        descriptor
    }

    /// Polymorphic one-to-one using the `{morph}_id`/`{morph}_type` columns.
    #[must_use]
    pub fn morph_one(
        name: impl Into<String>,
        related_model: impl Into<String>,
        morph: &str,
    ) -> Self {
        let mut descriptor = Self::keyed(
            name,
            RelationshipKind::MorphOne,
            related_model,
            format!("{morph}_id"),
        );
        descriptor.morph_type_column = Some(format!("{morph}_type"));
        descriptor
    }

    /// Polymorphic one-to-many using the `{morph}_id`/`{morph}_type` columns.
    #[must_use]
    pub fn morph_many(
        name: impl Into<String>,
        related_model: impl Into<String>,
        morph: &str,
    ) -> Self {
        let mut descriptor = Self::morph_one(name, related_model, morph);
        descriptor.kind = RelationshipKind::MorphMany;
        descriptor
    }

    /// Inverse polymorphic relationship reading `{morph}_id`/`{morph}_type`
    /// off the parent.
    #[must_use]
    pub fn morph_to(name: impl Into<String>, morph: &str) -> Self {
        let mut descriptor = Self::new(name, RelationshipKind::MorphTo);
        descriptor.foreign_key = format!("{morph}_id");
        descriptor.morph_type_column = Some(format!("{morph}_type"));
        descriptor
    }

    /// Polymorphic many-to-many; `morph` names the pivot's
    /// `{morph}_type` column.
    #[must_use]
    pub fn morph_to_many(
        name: impl Into<String>,
        related_model: impl Into<String>,
        pivot: PivotTable,
        morph: &str,
    ) -> Self {
        let mut descriptor = Self::belongs_to_many(name, related_model, pivot);
        descriptor.kind = RelationshipKind::MorphToMany;
        descriptor.morph_type_column = Some(format!("{morph}_type"));
        descriptor
    }

    #[must_use]
    pub fn has_one_through(
        name: impl Into<String>,
        related_model: impl Into<String>,
        through: ThroughTable,
    ) -> Self {
        let mut descriptor = Self::new(name, RelationshipKind::HasOneThrough);
        descriptor.related_model = Some(related_model.into());
        descriptor.through = Some(through);
        descriptor
    }

    #[must_use]
    pub fn has_many_through(
        name: impl Into<String>,
        related_model: impl Into<String>,
        through: ThroughTable,
    ) -> Self {
        let mut descriptor = Self::has_one_through(name, related_model, through);
        descriptor.kind = RelationshipKind::HasManyThrough;
        descriptor
    }

    #[must_use]
    pub fn local_key(mut self, column: impl Into<String>) -> Self {
        self.local_key = Some(column.into());
        self
    }

    #[must_use]
    pub fn owner_key(mut self, column: impl Into<String>) -> Self {
        self.owner_key = Some(column.into());
        self
    }

    /// Override the discriminator stored for the owning side.
    #[must_use]
    pub fn morph_value(mut self, value: impl Into<String>) -> Self {
        self.morph_value = Some(value.into());
        self
    }

    /// Map a stored discriminator to a model name.
    #[must_use]
    pub fn map_morph(mut self, stored: impl Into<String>, model: impl Into<String>) -> Self {
        self.morph_map.insert(stored.into(), model.into());
        self
    }

    #[must_use]
    pub fn order_by(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by.push(RelationOrder {
            column: column.into(),
            direction,
        });
        self
    }

    // ========================================================================
    // Required-field accessors
    // ========================================================================

    pub fn require_related_model(&self) -> Result<&str> {
        self.related_model
            .as_deref()
            .ok_or_else(|| self.missing("related_model"))
    }

    pub fn require_pivot(&self) -> Result<&PivotTable> {
        self.pivot.as_ref().ok_or_else(|| self.missing("pivot"))
    }

    pub fn require_through(&self) -> Result<&ThroughTable> {
        self.through.as_ref().ok_or_else(|| self.missing("through"))
    }

    pub fn require_morph_type_column(&self) -> Result<&str> {
        self.morph_type_column
            .as_deref()
            .ok_or_else(|| self.missing("morph_type_column"))
    }

    fn missing(&self, field: &str) -> Error {
        Error::configuration(format!(
            "Relationship {} ({}) requires {}",
            self.name, self.kind, field
        ))
    }

    /// Resolve a stored discriminator through the morph map.
    ///
    /// Unmapped discriminators are returned unchanged; callers decide whether
    /// they name a known model.
    pub fn resolve_morph_type<'a>(&'a self, stored: &'a str) -> &'a str {
        self.morph_map.get(stored).map_or(stored, String::as_str)
    }

    /// Check that the populated fields fit the kind.
    pub fn validate(&self) -> Result<()> {
        let kind = self.kind;
        let invalid = |reason: &str| {
            Err(Error::configuration(format!(
                "Invalid relationship {} ({}): {}",
                self.name, kind, reason
            )))
        };

        if self.name.is_empty() {
            return invalid("name is empty");
        }
        if kind != RelationshipKind::MorphTo && self.related_model.is_none() {
            return invalid("related_model is required");
        }
        if !kind.uses_pivot() && !kind.is_through() && self.foreign_key.is_empty() {
            return invalid("foreign_key is required");
        }
        if kind.uses_pivot() != self.pivot.is_some() {
            return invalid(if kind.uses_pivot() {
                "pivot table is required"
            } else {
                "pivot table is only valid for many-to-many relationships"
            });
        }
        if kind.is_morph() != self.morph_type_column.is_some() {
            return invalid(if kind.is_morph() {
                "morph_type_column is required"
            } else {
                "morph_type_column is only valid for polymorphic relationships"
            });
        }
        if kind.is_through() != self.through.is_some() {
            return invalid(if kind.is_through() {
                "through table is required"
            } else {
                "through table is only valid for through relationships"
            });
        }
        if !self.morph_map.is_empty() && kind != RelationshipKind::MorphTo {
            return invalid("morph_map is only valid for morph_to relationships");
        }
        Ok(())
    }
}

/// Find a descriptor by relationship name.
pub fn find_descriptor<'a>(
    descriptors: &'a [RelationshipDescriptor],
    name: &str,
) -> Option<&'a RelationshipDescriptor> {
    descriptors.iter().find(|d| d.name == name)
}
