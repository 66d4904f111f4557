//! Relationship writes.
//!
//! A [`RelationshipWriter`] applies the `relationships` member of a write
//! request to a parent record. All relationships of one call are written in
//! a single executor transaction: the first failure (missing target, policy
//! denial, hook error, executor error) rolls back every write of the call.
//!
//! # Modes
//!
//! Many-to-many relationships are diffed against their pivot table:
//!
//! | Request | Mode | Effect |
//! |---------|------|--------|
//! | resource save, direct `PATCH` | replace | delete every pivot row of the parent, insert the payload |
//! | direct `POST` | append | insert the payload ids not already linked |
//! | direct `DELETE` | delete | delete the payload ids' pivot rows |

use crate::authorization::{AuthorizationGate, Subject};
use crate::events::{WriteEvent, WriteHooks};
use crate::resolver::morph_value;
use jsonapi_orm_core::{
    ApiConfig, Error, KeyValue, ModelDef, NotFoundError, Record, RelationshipDescriptor,
    RelationshipKind, Result, TypeRegistry, ValidationError, Value,
};
use jsonapi_orm_query::{BatchQuery, Column, QueryExecutor, Row};
use serde_json::Value as Json;
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// Payloads
// ============================================================================

/// A `{type, id}` resource identifier object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceIdentifier {
    pub resource_type: String,
    pub id: String,
}

impl ResourceIdentifier {
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    /// The id as a lookup key.
    pub fn key(&self) -> Option<KeyValue> {
        KeyValue::parse_id(&self.id)
    }

    fn from_json(value: &Json, pointer: &str) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| invalid(pointer, "Resource identifier must be an object"))?;
        let resource_type = object
            .get("type")
            .and_then(Json::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| invalid(&format!("{pointer}/type"), "Resource identifier requires a type"))?;
        let id = match object.get("id") {
            Some(Json::String(id)) if !id.is_empty() => id.clone(),
            Some(Json::Number(id)) => id.to_string(),
            _ => {
                return Err(invalid(
                    &format!("{pointer}/id"),
                    "Resource identifier requires an id",
                ));
            }
        };
        Ok(Self::new(resource_type, id))
    }
}

impl fmt::Display for ResourceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource_type, self.id)
    }
}

/// The parsed `data` member of one relationship object.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RelationshipPayload {
    /// No `data` member: nothing to write.
    #[default]
    Absent,
    /// `"data": null`
    Null,
    /// `"data": {...}`
    One(ResourceIdentifier),
    /// `"data": [...]`
    Many(Vec<ResourceIdentifier>),
}

impl RelationshipPayload {
    /// Parse one relationship object, e.g. `{"data": [{"type": "tags", "id": "1"}]}`.
    pub fn from_json(name: &str, body: &Json) -> Result<Self> {
        let pointer = format!("/data/relationships/{name}/data");
        let Some(object) = body.as_object() else {
            return Err(invalid(
                &format!("/data/relationships/{name}"),
                format!("Relationship {name} must be an object"),
            ));
        };
        match object.get("data") {
            None => Ok(Self::Absent),
            Some(Json::Null) => Ok(Self::Null),
            Some(value @ Json::Object(_)) => ResourceIdentifier::from_json(value, &pointer).map(Self::One),
            Some(Json::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(index, item)| ResourceIdentifier::from_json(item, &format!("{pointer}/{index}")))
                .collect::<Result<Vec<_>>>()
                .map(Self::Many),
            Some(_) => Err(invalid(
                &pointer,
                format!("Invalid data format for relationship {name}"),
            )),
        }
    }

    /// Parse the whole `relationships` member of a resource object.
    pub fn parse_all(relationships: &Json) -> Result<Vec<(String, RelationshipPayload)>> {
        let Some(object) = relationships.as_object() else {
            return Err(invalid("/data/relationships", "Relationships must be an object"));
        };
        object
            .iter()
            .map(|(name, body)| Ok((name.clone(), Self::from_json(name, body)?)))
            .collect()
    }

    /// Identifiers carried by the payload, in payload order.
    pub fn identifiers(&self) -> &[ResourceIdentifier] {
        match self {
            Self::One(identifier) => std::slice::from_ref(identifier),
            Self::Many(identifiers) => identifiers,
            Self::Absent | Self::Null => &[],
        }
    }
}

fn invalid(pointer: &str, message: impl Into<String>) -> Error {
    ValidationError::new(message).with_pointer(pointer).into()
}

// ============================================================================
// Request context
// ============================================================================

/// HTTP method of the calling request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMethod {
    Get,
    Post,
    Patch,
    Put,
    Delete,
}

impl RequestMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestMethod::Get => "GET",
            RequestMethod::Post => "POST",
            RequestMethod::Patch => "PATCH",
            RequestMethod::Put => "PUT",
            RequestMethod::Delete => "DELETE",
        }
    }

    pub fn parse(method: &str) -> Option<Self> {
        match method.to_ascii_uppercase().as_str() {
            "GET" => Some(RequestMethod::Get),
            "POST" => Some(RequestMethod::Post),
            "PATCH" => Some(RequestMethod::Patch),
            "PUT" => Some(RequestMethod::Put),
            "DELETE" => Some(RequestMethod::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How pivot rows are diffed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Replace,
    Append,
    Delete,
}

/// The request a write belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteContext {
    /// Whether this is a relationship endpoint (`/posts/1/relationships/tags`)
    /// rather than a resource save.
    pub direct: bool,
    pub method: RequestMethod,
}

impl WriteContext {
    /// Relationships written as part of a resource create or update.
    pub fn resource_save() -> Self {
        Self {
            direct: false,
            method: RequestMethod::Patch,
        }
    }

    /// A relationship endpoint request.
    pub fn direct(method: RequestMethod) -> Self {
        Self { direct: true, method }
    }

    pub fn mode(&self) -> WriteMode {
        if !self.direct {
            return WriteMode::Replace;
        }
        match self.method {
            RequestMethod::Post => WriteMode::Append,
            RequestMethod::Delete => WriteMode::Delete,
            RequestMethod::Get | RequestMethod::Patch | RequestMethod::Put => WriteMode::Replace,
        }
    }

    /// Whether a relationship endpoint accepts this method for `kind`.
    fn allows(&self, kind: RelationshipKind) -> bool {
        if !self.direct {
            return true;
        }
        match kind {
            RelationshipKind::BelongsToMany | RelationshipKind::MorphToMany => matches!(
                self.method,
                RequestMethod::Post | RequestMethod::Patch | RequestMethod::Put | RequestMethod::Delete
            ),
            RelationshipKind::HasMany | RelationshipKind::MorphMany => self.method == RequestMethod::Post,
            RelationshipKind::HasOne
            | RelationshipKind::BelongsTo
            | RelationshipKind::MorphOne
            | RelationshipKind::MorphTo => {
                matches!(self.method, RequestMethod::Patch | RequestMethod::Put)
            }
            RelationshipKind::HasOneThrough | RelationshipKind::HasManyThrough => false,
        }
    }
}

// ============================================================================
// Writer
// ============================================================================

/// Replacement for the built-in write path of one relationship.
pub type WriteHandler<E> =
    Box<dyn Fn(&E, &mut Record, &RelationshipPayload, WriteMode) -> Result<()> + Send + Sync>;

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
}

/// Applies relationship payloads to parent records.
pub struct RelationshipWriter<'a, E> {
    config: &'a ApiConfig,
    registry: &'a TypeRegistry,
    executor: &'a E,
    gate: AuthorizationGate<'a>,
    hooks: WriteHooks,
    handlers: HashMap<(String, String), WriteHandler<E>>,
    clock: fn() -> i64,
}

impl<E> fmt::Debug for RelationshipWriter<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationshipWriter")
            .field("gate", &self.gate)
            .field("hooks", &self.hooks)
            .field("handlers", &self.handlers.len())
            .finish_non_exhaustive()
    }
}

/// How a payload entry maps onto the parent's relationships.
struct Target<'d> {
    descriptor: Option<&'d RelationshipDescriptor>,
    use_observers: bool,
}

impl<'a, E: QueryExecutor> RelationshipWriter<'a, E> {
    pub fn new(config: &'a ApiConfig, registry: &'a TypeRegistry, executor: &'a E) -> Self {
        Self {
            config,
            registry,
            executor,
            gate: AuthorizationGate::new(config, registry),
            hooks: WriteHooks::default(),
            handlers: HashMap::new(),
            clock: unix_now,
        }
    }

    /// Authorize writes through `gate` (usually one carrying the principal).
    #[must_use]
    pub fn with_gate(mut self, gate: AuthorizationGate<'a>) -> Self {
        self.gate = gate;
        self
    }

    /// Source of pivot timestamps, in seconds since the epoch.
    #[must_use]
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    pub fn hooks_mut(&mut self) -> &mut WriteHooks {
        &mut self.hooks
    }

    /// Write `relationship` of `model` through `handler` instead of the
    /// built-in path.
    pub fn register_handler<F>(
        &mut self,
        model: impl Into<String>,
        relationship: impl Into<String>,
        handler: F,
    ) where
        F: Fn(&E, &mut Record, &RelationshipPayload, WriteMode) -> Result<()> + Send + Sync + 'static,
    {
        self.handlers
            .insert((model.into(), relationship.into()), Box::new(handler));
    }

    /// Write every payload to `parent` in one transaction, in payload order.
    #[tracing::instrument(level = "debug", skip_all, fields(model = %parent.model(), relationships = payloads.len(), direct = ctx.direct))]
    pub fn write(
        &mut self,
        parent: &mut Record,
        payloads: &[(String, RelationshipPayload)],
        ctx: &WriteContext,
    ) -> Result<()> {
        // The parent is restored along with the store when any write fails.
        let snapshot = parent.clone();
        let executor = self.executor;
        let outcome = executor.transaction(|tx| {
            for (name, payload) in payloads {
                self.write_one(tx, parent, name, payload, ctx)?;
            }
            Ok(())
        });
        if let Err(err) = outcome {
            *parent = snapshot;
            return Err(err);
        }
        tracing::info!(
            model = %parent.model(),
            relationships = payloads.len(),
            method = %ctx.method,
            "Wrote relationships"
        );
        Ok(())
    }

    fn write_one(
        &mut self,
        tx: &E,
        parent: &mut Record,
        name: &str,
        payload: &RelationshipPayload,
        ctx: &WriteContext,
    ) -> Result<()> {
        let model = parent.model().to_string();
        let Some(target) = self.target(&model, name)? else {
            tracing::debug!(relationship = name, "Relationship is not writable; skipped");
            return Ok(());
        };
        let handler_key = (model, name.to_string());

        if let Some(handler) = self.handlers.get(&handler_key) {
            if target.use_observers {
                self.hooks.fire(WriteEvent::Saving, parent, name, payload)?;
            }
            handler(tx, parent, payload, ctx.mode())?;
            if target.use_observers {
                self.hooks.fire(WriteEvent::Saved, parent, name, payload)?;
            }
            parent.unset_relation(name);
            return Ok(());
        }

        let descriptor = target.descriptor.ok_or_else(|| {
            Error::configuration(format!("No handler found for relationship {name}"))
        })?;
        if descriptor.kind.is_through() {
            return Err(read_only());
        }
        if *payload == RelationshipPayload::Absent {
            return Ok(());
        }
        if !ctx.allows(descriptor.kind) {
            return Err(Error::unsupported(format!(
                "Request method {} is not supported for relationship {name}",
                ctx.method
            )));
        }

        if target.use_observers {
            self.hooks.fire(WriteEvent::Saving, parent, name, payload)?;
        }
        tracing::debug!(
            relationship = name,
            kind = %descriptor.kind,
            mode = ?ctx.mode(),
            identifiers = payload.identifiers().len(),
            "Writing relationship"
        );
        match descriptor.kind {
            RelationshipKind::BelongsTo => self.write_belongs_to(tx, parent, descriptor, payload)?,
            RelationshipKind::MorphTo => self.write_morph_to(tx, parent, descriptor, payload)?,
            RelationshipKind::HasOne
            | RelationshipKind::HasMany
            | RelationshipKind::MorphOne
            | RelationshipKind::MorphMany => self.write_has(tx, parent, descriptor, payload)?,
            RelationshipKind::BelongsToMany | RelationshipKind::MorphToMany => {
                self.write_pivot(tx, parent, descriptor, payload, ctx.mode())?;
            }
            RelationshipKind::HasOneThrough | RelationshipKind::HasManyThrough => {
                return Err(read_only());
            }
        }
        if target.use_observers {
            self.hooks.fire(WriteEvent::Saved, parent, name, payload)?;
        }

        parent.unset_relation(name);
        parent.unset_relation(&descriptor.name);
        Ok(())
    }

    /// Map an exposed relationship name to its descriptor. `None` when the
    /// relationship is configured read-only.
    fn target(&self, model: &str, name: &str) -> Result<Option<Target<'a>>> {
        let registry = self.registry;
        let unknown = || {
            let resource_type = registry.resource_type_of(model).unwrap_or(model);
            invalid(
                &format!("/data/relationships/{name}"),
                format!("Relationship {name} is not defined on resource {resource_type}"),
            )
        };

        let Some(resource) = self.config.resource_config(model) else {
            let descriptor = registry.descriptor(model, name).ok_or_else(unknown)?;
            return Ok(Some(Target {
                descriptor: Some(descriptor),
                use_observers: true,
            }));
        };
        let config = resource.relationships.get(name).ok_or_else(unknown)?;
        if !config.write {
            return Ok(None);
        }
        Ok(Some(Target {
            descriptor: config
                .relation
                .as_deref()
                .and_then(|relation| registry.descriptor(model, relation)),
            use_observers: config.use_observers,
        }))
    }

    // ------------------------------------------------------------------------
    // To-one on the parent
    // ------------------------------------------------------------------------

    fn write_belongs_to(
        &self,
        tx: &E,
        parent: &mut Record,
        descriptor: &RelationshipDescriptor,
        payload: &RelationshipPayload,
    ) -> Result<()> {
        let related = self.registry.require_model(descriptor.require_related_model()?)?;
        let value = match payload {
            RelationshipPayload::Null => Value::Null,
            RelationshipPayload::One(identifier) => {
                let target = self.find_target(tx, identifier, Some(related), &descriptor.name)?;
                let owner_key = descriptor.owner_key.as_deref().unwrap_or(&related.primary_key);
                target.get_attribute(owner_key).cloned().unwrap_or(Value::Null)
            }
            _ => return Err(data_format(&descriptor.name, "an object")),
        };
        parent.set_attribute(descriptor.foreign_key.clone(), value);
        self.save_record(tx, parent)
    }

    fn write_morph_to(
        &self,
        tx: &E,
        parent: &mut Record,
        descriptor: &RelationshipDescriptor,
        payload: &RelationshipPayload,
    ) -> Result<()> {
        let type_column = descriptor.require_morph_type_column()?;
        let (key, discriminator) = match payload {
            RelationshipPayload::Null => (Value::Null, Value::Null),
            RelationshipPayload::One(identifier) => {
                let target = self.find_target(tx, identifier, None, &descriptor.name)?;
                let def = self.registry.require_model(target.model())?;
                let owner_key = descriptor.owner_key.as_deref().unwrap_or(&def.primary_key);
                let stored = descriptor
                    .morph_map
                    .iter()
                    .find(|(_, model)| **model == def.model)
                    .map_or(def.morph_alias.as_str(), |(stored, _)| stored.as_str());
                (
                    target.get_attribute(owner_key).cloned().unwrap_or(Value::Null),
                    Value::from(stored),
                )
            }
            _ => return Err(data_format(&descriptor.name, "an object")),
        };
        parent.set_attribute(descriptor.foreign_key.clone(), key);
        parent.set_attribute(type_column, discriminator);
        self.save_record(tx, parent)
    }

    // ------------------------------------------------------------------------
    // Foreign key on the related records
    // ------------------------------------------------------------------------

    fn write_has(
        &self,
        tx: &E,
        parent: &mut Record,
        descriptor: &RelationshipDescriptor,
        payload: &RelationshipPayload,
    ) -> Result<()> {
        let registry = self.registry;
        let parent_def = registry.require_model(parent.model())?;
        let related = registry.require_model(descriptor.require_related_model()?)?;
        let parent_key = required_key(parent, descriptor.local_key.as_deref().unwrap_or(&parent_def.primary_key), &descriptor.name)?;
        let morph = if descriptor.kind.is_morph() {
            Some((descriptor.require_morph_type_column()?, morph_value(descriptor, parent_def)))
        } else {
            None
        };

        let to_one = descriptor.kind.is_to_one();
        let identifiers = match payload {
            RelationshipPayload::Null if to_one => &[][..],
            RelationshipPayload::One(_) if to_one => payload.identifiers(),
            RelationshipPayload::Many(identifiers) if !to_one => identifiers.as_slice(),
            _ if to_one => return Err(data_format(&descriptor.name, "an object")),
            _ => return Err(data_format(&descriptor.name, "an array")),
        };

        let mut targets = Vec::new();
        for identifier in unique(identifiers) {
            targets.push(self.find_target(tx, identifier, Some(related), &descriptor.name)?);
        }

        if to_one {
            // The previous link is cleared, whether replaced or nulled.
            let keep: Vec<KeyValue> = targets.iter().filter_map(|t| t.key(&related.primary_key)).collect();
            let mut current = BatchQuery::for_model(related)
                .where_eq(Column::qualified(related.table.clone(), descriptor.foreign_key.clone()), parent_key.clone());
            if let Some((column, value)) = &morph {
                current = current.where_eq(Column::qualified(related.table.clone(), *column), value.clone());
            }
            for mut linked in tx.get(&current)? {
                if linked.key(&related.primary_key).is_some_and(|key| keep.contains(&key)) {
                    continue;
                }
                linked.set_attribute(descriptor.foreign_key.clone(), Value::Null);
                if let Some((column, _)) = &morph {
                    linked.set_attribute(*column, Value::Null);
                }
                self.save_record(tx, &mut linked)?;
            }
        }

        for mut target in targets {
            target.set_attribute(descriptor.foreign_key.clone(), parent_key.clone());
            if let Some((column, value)) = &morph {
                target.set_attribute(*column, value.clone());
            }
            self.save_record(tx, &mut target)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Pivot tables
    // ------------------------------------------------------------------------

    fn write_pivot(
        &self,
        tx: &E,
        parent: &Record,
        descriptor: &RelationshipDescriptor,
        payload: &RelationshipPayload,
        mode: WriteMode,
    ) -> Result<()> {
        let registry = self.registry;
        let pivot = descriptor.require_pivot()?;
        let parent_def = registry.require_model(parent.model())?;
        let related = registry.require_model(descriptor.require_related_model()?)?;
        let parent_key = required_key(parent, descriptor.local_key.as_deref().unwrap_or(&parent_def.primary_key), &descriptor.name)?;
        let owner_key = descriptor.owner_key.as_deref().unwrap_or(&related.primary_key);

        let RelationshipPayload::Many(identifiers) = payload else {
            return Err(data_format(&descriptor.name, "an array"));
        };

        let mut keys: Vec<KeyValue> = Vec::new();
        let mut requested: Vec<&ResourceIdentifier> = Vec::new();
        for identifier in identifiers {
            expect_type(identifier, related, &descriptor.name)?;
            let key = identifier_key(identifier)?;
            if !keys.contains(&key) {
                keys.push(key);
                requested.push(identifier);
            }
        }

        // One existence query for the whole payload.
        let targets = if keys.is_empty() {
            Vec::new()
        } else {
            tx.get(&BatchQuery::for_model(related).where_in(
                Column::qualified(related.table.clone(), related.primary_key.clone()),
                &keys,
            ))?
        };
        let mut related_keys = Vec::with_capacity(keys.len());
        for (identifier, key) in requested.iter().zip(&keys) {
            let target = targets
                .iter()
                .find(|t| t.key(&related.primary_key).as_ref() == Some(key))
                .ok_or_else(|| missing_target(identifier))?;
            self.gate.check("update", Subject::Record(target), true)?;
            let related_key = target.key(owner_key).ok_or_else(|| {
                Error::validation(format!(
                    "Relationship resource {identifier} has no {owner_key} value"
                ))
            })?;
            related_keys.push(related_key);
        }
        self.gate.check("update", Subject::Record(parent), true)?;

        let morph = if descriptor.kind.is_morph() {
            Some((descriptor.require_morph_type_column()?, morph_value(descriptor, parent_def)))
        } else {
            None
        };
        let table = pivot.table.as_str();
        let mut existing = BatchQuery::for_table(table)
            .where_eq(Column::qualified(table, pivot.foreign_pivot_key.clone()), parent_key.clone());
        if let Some((column, value)) = &morph {
            existing = existing.where_eq(Column::qualified(table, *column), value.clone());
        }
        let related_column = Column::qualified(table, pivot.related_pivot_key.clone());

        let (removed, inserted) = match mode {
            WriteMode::Replace => {
                let removed = tx.delete(&existing)?;
                let rows = self.pivot_rows(descriptor, &parent_key, morph.as_ref(), &related_keys)?;
                (removed, insert_rows(tx, table, &rows)?)
            }
            WriteMode::Append => {
                let linked: Vec<KeyValue> = if related_keys.is_empty() {
                    Vec::new()
                } else {
                    tx.get(&existing.where_in(related_column, &related_keys))?
                        .iter()
                        .filter_map(|row| row.key(&pivot.related_pivot_key))
                        .collect()
                };
                let missing: Vec<KeyValue> = related_keys
                    .into_iter()
                    .filter(|key| !linked.contains(key))
                    .collect();
                let rows = self.pivot_rows(descriptor, &parent_key, morph.as_ref(), &missing)?;
                (0, insert_rows(tx, table, &rows)?)
            }
            WriteMode::Delete => {
                if related_keys.is_empty() {
                    (0, 0)
                } else {
                    (tx.delete(&existing.where_in(related_column, &related_keys))?, 0)
                }
            }
        };
        tracing::debug!(
            relationship = %descriptor.name,
            table = table,
            mode = ?mode,
            removed = removed,
            inserted = inserted,
            "Synced pivot rows"
        );
        Ok(())
    }

    fn pivot_rows(
        &self,
        descriptor: &RelationshipDescriptor,
        parent_key: &Value,
        morph: Option<&(&str, String)>,
        related_keys: &[KeyValue],
    ) -> Result<Vec<Row>> {
        let pivot = descriptor.require_pivot()?;
        let now = Value::Timestamp((self.clock)());
        Ok(related_keys
            .iter()
            .map(|key| {
                let mut row = Row::new();
                row.insert(pivot.foreign_pivot_key.clone(), parent_key.clone());
                row.insert(pivot.related_pivot_key.clone(), key.to_value());
                if let Some((column, value)) = morph {
                    row.insert((*column).to_string(), Value::from(value.as_str()));
                }
                for column in [&pivot.created_at, &pivot.updated_at].into_iter().flatten() {
                    row.insert(column.clone(), now.clone());
                }
                row
            })
            .collect())
    }

    // ------------------------------------------------------------------------
    // Shared steps
    // ------------------------------------------------------------------------

    /// Load the record `identifier` points at, checking its type against
    /// `expected` when given.
    fn find_target(
        &self,
        tx: &E,
        identifier: &ResourceIdentifier,
        expected: Option<&ModelDef>,
        relationship: &str,
    ) -> Result<Record> {
        let def = match expected {
            Some(expected) => {
                expect_type(identifier, expected, relationship)?;
                expected
            }
            None => self.registry.model_for_type(&identifier.resource_type).ok_or_else(|| {
                invalid(
                    &format!("/data/relationships/{relationship}/data/type"),
                    format!(
                        "Invalid resource type ({}) for relationship {relationship}",
                        identifier.resource_type
                    ),
                )
            })?,
        };
        let key = identifier_key(identifier)?;
        tx.find(def, &key)?.ok_or_else(|| missing_target(identifier))
    }

    /// Authorize and persist one record.
    fn save_record(&self, tx: &E, record: &mut Record) -> Result<()> {
        let def = self.registry.require_model(record.model())?;
        if record.exists() {
            self.gate.check("update", Subject::Record(record), true)?;
        } else {
            self.gate.check("create", Subject::Model(record.model()), true)?;
        }
        tx.save(def, record)
    }
}

fn read_only() -> Error {
    Error::unsupported("This request method is not available")
}

fn data_format(relationship: &str, shape: &str) -> Error {
    invalid(
        &format!("/data/relationships/{relationship}/data"),
        format!("Invalid data format for relationship {relationship}. Relationship data must be {shape}"),
    )
}

fn expect_type(identifier: &ResourceIdentifier, expected: &ModelDef, relationship: &str) -> Result<()> {
    if identifier.resource_type == expected.resource_type {
        return Ok(());
    }
    Err(invalid(
        &format!("/data/relationships/{relationship}/data/type"),
        format!(
            "Invalid resource type ({}) for relationship {relationship}. Resource type must be: {}",
            identifier.resource_type, expected.resource_type
        ),
    ))
}

fn identifier_key(identifier: &ResourceIdentifier) -> Result<KeyValue> {
    identifier
        .key()
        .ok_or_else(|| Error::validation(format!("Invalid resource id for {identifier}")))
}

fn missing_target(identifier: &ResourceIdentifier) -> Error {
    Error::NotFound(
        NotFoundError::new(identifier.resource_type.clone(), Some(identifier.id.clone())).with_message(
            format!(
                "Relationship resource {} (ID: {}) is not found",
                identifier.resource_type, identifier.id
            ),
        ),
    )
}

fn required_key(record: &Record, column: &str, relationship: &str) -> Result<Value> {
    record
        .get_attribute(column)
        .filter(|value| !value.is_blank())
        .cloned()
        .ok_or_else(|| {
            Error::validation(format!(
                "Cannot write relationship {relationship} on a {} without a {column}",
                record.model()
            ))
        })
}

fn unique(identifiers: &[ResourceIdentifier]) -> Vec<&ResourceIdentifier> {
    let mut seen: Vec<&ResourceIdentifier> = Vec::new();
    for identifier in identifiers {
        if !seen.contains(&identifier) {
            seen.push(identifier);
        }
    }
    seen
}

fn insert_rows<E: QueryExecutor>(tx: &E, table: &str, rows: &[Row]) -> Result<u64> {
    if rows.is_empty() {
        return Ok(0);
    }
    tx.insert(table, rows)
}
