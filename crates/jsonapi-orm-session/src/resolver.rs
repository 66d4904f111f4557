//! Batched relationship resolution.
//!
//! Resolving a relationship over a collection of parents issues exactly one
//! query (one per related model for `MorphTo`), groups the results by key in
//! memory, and assigns each parent its slice:
//!
//! 1. Collect the parents' keys (deduplicated, blanks dropped)
//! 2. Short-circuit with empty slots when there are none
//! 3. Run one `WHERE key IN (...)` query
//! 4. Group the related records by the key that points back at a parent
//! 5. Fill every parent's slot; to-many slots default to empty, to-one to null
//!
//! Slots are only written after every query succeeded, so a failed query
//! leaves the parents untouched.

use crate::context::RequestContext;
use crate::mixed::partition_by_model;
use crate::n1_detection::BatchLoadTracker;
use crate::pagination::{LinkSet, PageRequest, TotalCount, paginate};
use jsonapi_orm_core::{
    ApiConfig, Error, KeyValue, ModelDef, Record, RelationSlot, RelationshipDescriptor,
    RelationshipKind, Result, TypeRegistry, Value, extract_keys_from,
};
use jsonapi_orm_query::{
    BatchQuery, Column, IncludePath, OrderBy, PivotJoin, QueryExecutor, THROUGH_KEY, ThroughJoin,
};
use std::collections::HashMap;

/// Related records grouped by the key pointing back at their parent.
pub type ResultGroup = HashMap<KeyValue, Vec<Record>>;

/// Where the grouping key is read on a related record.
#[derive(Debug, Clone)]
enum GroupKey {
    Attribute(String),
    /// Loaded pivot column (many-to-many)
    Pivot(String),
    /// Synthetic through-key column
    Through,
}

impl GroupKey {
    fn read(&self, record: &Record) -> Option<KeyValue> {
        match self {
            GroupKey::Attribute(column) => record.key(column),
            GroupKey::Pivot(column) => record.pivot_value(column).and_then(KeyValue::from_value),
            GroupKey::Through => record.key(THROUGH_KEY),
        }
    }
}

/// The batched query of one relationship, before the key list is applied.
#[derive(Debug, Clone)]
struct Plan {
    query: BatchQuery,
    /// Parent attribute whose values form the key list
    parent_key: String,
    /// Column constrained by the key list
    in_column: Column,
    group_key: GroupKey,
}

fn group_records(records: Vec<Record>, group_key: &GroupKey) -> ResultGroup {
    let mut groups = ResultGroup::new();
    for mut record in records {
        let key = group_key.read(&record);
        if matches!(group_key, GroupKey::Through) {
            record.remove_attribute(THROUGH_KEY);
        }
        if let Some(key) = key {
            groups.entry(key).or_default().push(record);
        }
    }
    groups
}

fn assign<F>(parents: &mut [&mut Record], name: &str, to_one: bool, groups: &ResultGroup, parent_key: F)
where
    F: Fn(&Record) -> Option<KeyValue>,
{
    for parent in parents.iter_mut() {
        let group = parent_key(parent).and_then(|key| groups.get(&key));
        let slot = if to_one {
            RelationSlot::One(group.and_then(|records| records.first().cloned()))
        } else {
            RelationSlot::Many(group.cloned().unwrap_or_default())
        };
        parent.set_relation(name, slot);
    }
}

/// Discriminator stored for `parent_def` by a polymorphic relationship.
pub(crate) fn morph_value(descriptor: &RelationshipDescriptor, parent_def: &ModelDef) -> String {
    descriptor
        .morph_value
        .clone()
        .unwrap_or_else(|| parent_def.morph_alias.clone())
}

/// One page of a single parent's relationship.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipPage {
    pub records: Vec<Record>,
    pub request: PageRequest,
    pub links: LinkSet,
}

/// Resolves relationships over collections of parents.
#[derive(Debug)]
pub struct BatchResolver<'a, E> {
    config: &'a ApiConfig,
    registry: &'a TypeRegistry,
    executor: &'a E,
    tracker: BatchLoadTracker,
}

impl<'a, E: QueryExecutor> BatchResolver<'a, E> {
    pub fn new(config: &'a ApiConfig, registry: &'a TypeRegistry, executor: &'a E) -> Self {
        Self {
            config,
            registry,
            executor,
            tracker: BatchLoadTracker::new(),
        }
    }

    pub fn config(&self) -> &'a ApiConfig {
        self.config
    }

    pub fn registry(&self) -> &'a TypeRegistry {
        self.registry
    }

    pub fn tracker(&self) -> &BatchLoadTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut BatchLoadTracker {
        &mut self.tracker
    }

    /// Resolve `descriptor` on every parent, filling its relationship slot.
    ///
    /// Parents must all be records of the same model. An empty slice is a
    /// no-op and issues no query.
    #[tracing::instrument(level = "debug", skip(self, parents, descriptor), fields(relationship = %descriptor.name, kind = %descriptor.kind))]
    pub fn resolve(&mut self, parents: &mut [Record], descriptor: &RelationshipDescriptor) -> Result<()> {
        let mut refs: Vec<&mut Record> = parents.iter_mut().collect();
        self.resolve_refs(&mut refs, descriptor)
    }

    /// [`BatchResolver::resolve`] over borrowed parents, e.g. records held in
    /// other records' relationship slots.
    pub fn resolve_refs(
        &mut self,
        parents: &mut [&mut Record],
        descriptor: &RelationshipDescriptor,
    ) -> Result<()> {
        let Some(first) = parents.first() else {
            return Ok(());
        };
        let parent_model = first.model().to_string();
        if let Some(other) = parents.iter().find(|p| p.model() != parent_model) {
            return Err(Error::configuration(format!(
                "Cannot resolve relationship {} over mixed parents ({} and {})",
                descriptor.name,
                parent_model,
                other.model()
            )));
        }
        let parent_def = self.registry.require_model(&parent_model)?;

        let (queries, related_types) = match descriptor.kind {
            RelationshipKind::MorphTo => self.resolve_morph_to(parents, descriptor)?,
            _ => {
                let plan = self.plan(parent_def, descriptor)?;
                let queries = self.resolve_planned(parents, descriptor, plan)?;
                (queries, 1)
            }
        };
        self.tracker
            .record(&parent_model, &descriptor.name, queries, related_types);

        tracing::info!(
            parent = %parent_model,
            relationship = %descriptor.name,
            parents = parents.len(),
            queries = queries,
            "Resolved relationship"
        );
        Ok(())
    }

    /// Build the batched query for every kind except `MorphTo`.
    fn plan(&self, parent_def: &ModelDef, descriptor: &RelationshipDescriptor) -> Result<Plan> {
        let related = self
            .registry
            .require_model(descriptor.require_related_model()?)?;
        let table = related.table.as_str();
        let local_key = descriptor
            .local_key
            .clone()
            .unwrap_or_else(|| parent_def.primary_key.clone());
        let owner_key = descriptor
            .owner_key
            .clone()
            .unwrap_or_else(|| related.primary_key.clone());

        let mut query = BatchQuery::for_model(related);
        for order in &descriptor.order_by {
            query = query.order_by(OrderBy::from_relation(order, table));
        }

        let plan = match descriptor.kind {
            RelationshipKind::HasOne
            | RelationshipKind::HasMany
            | RelationshipKind::MorphOne
            | RelationshipKind::MorphMany => {
                let foreign_key = Column::qualified(table, descriptor.foreign_key.clone());
                if descriptor.kind.is_morph() {
                    query = query.where_eq(
                        Column::qualified(table, descriptor.require_morph_type_column()?),
                        morph_value(descriptor, parent_def),
                    );
                }
                if descriptor.kind.is_to_one() {
                    query = query.group_by(foreign_key.clone());
                }
                Plan {
                    query,
                    parent_key: local_key,
                    in_column: foreign_key,
                    group_key: GroupKey::Attribute(descriptor.foreign_key.clone()),
                }
            }
            RelationshipKind::BelongsTo => Plan {
                query,
                parent_key: descriptor.foreign_key.clone(),
                in_column: Column::qualified(table, owner_key.clone()),
                group_key: GroupKey::Attribute(owner_key),
            },
            RelationshipKind::BelongsToMany | RelationshipKind::MorphToMany => {
                let pivot = descriptor.require_pivot()?;
                let columns = [&pivot.created_at, &pivot.updated_at]
                    .into_iter()
                    .flatten()
                    .cloned()
                    .collect();
                query = query.join_pivot(PivotJoin {
                    table: pivot.table.clone(),
                    foreign_pivot_key: pivot.foreign_pivot_key.clone(),
                    related_pivot_key: pivot.related_pivot_key.clone(),
                    related_key: owner_key,
                    columns,
                });
                if descriptor.kind.is_morph() {
                    query = query.where_eq(
                        Column::qualified(pivot.table.clone(), descriptor.require_morph_type_column()?),
                        morph_value(descriptor, parent_def),
                    );
                }
                Plan {
                    query,
                    parent_key: local_key,
                    in_column: Column::qualified(pivot.table.clone(), pivot.foreign_pivot_key.clone()),
                    group_key: GroupKey::Pivot(pivot.foreign_pivot_key.clone()),
                }
            }
            RelationshipKind::HasOneThrough | RelationshipKind::HasManyThrough => {
                let through = descriptor.require_through()?;
                query = query.join_through(ThroughJoin {
                    table: through.table.clone(),
                    first_key: through.first_key.clone(),
                    second_key: through.second_key.clone(),
                    second_local_key: through.second_local_key.clone(),
                });
                Plan {
                    query,
                    parent_key: local_key,
                    in_column: Column::qualified(through.table.clone(), through.first_key.clone()),
                    group_key: GroupKey::Through,
                }
            }
            RelationshipKind::MorphTo => {
                return Err(Error::configuration(format!(
                    "Relationship {} resolves one query per related model",
                    descriptor.name
                )));
            }
        };
        Ok(plan)
    }

    fn resolve_planned(
        &mut self,
        parents: &mut [&mut Record],
        descriptor: &RelationshipDescriptor,
        plan: Plan,
    ) -> Result<usize> {
        let to_one = descriptor.kind.is_to_one();
        let parent_key = |parent: &Record| parent.key(&plan.parent_key);

        let keys = extract_keys_from(parents.iter().map(|p| &**p), &plan.parent_key);
        if keys.is_empty() {
            tracing::debug!(relationship = %descriptor.name, "No parent keys; skipping query");
            assign(parents, &descriptor.name, to_one, &ResultGroup::new(), parent_key);
            return Ok(0);
        }

        let query = plan.query.clone().where_in(plan.in_column.clone(), &keys);
        tracing::trace!(sql = %query.to_sql().0, keys = keys.len(), "Batched relationship query");
        let related = self.executor.get(&query)?;
        tracing::debug!(
            relationship = %descriptor.name,
            keys = keys.len(),
            related = related.len(),
            "Grouping related records"
        );

        let groups = group_records(related, &plan.group_key);
        assign(parents, &descriptor.name, to_one, &groups, parent_key);
        Ok(1)
    }

    /// Inverse polymorphic resolution: parents are grouped by their own
    /// discriminator and each related model gets one query.
    fn resolve_morph_to(
        &mut self,
        parents: &mut [&mut Record],
        descriptor: &RelationshipDescriptor,
    ) -> Result<(usize, usize)> {
        let registry = self.registry;
        let type_column = descriptor.require_morph_type_column()?;
        let foreign_key = descriptor.foreign_key.as_str();

        let mut groups: Vec<(&ModelDef, Vec<usize>)> = Vec::new();
        for (index, parent) in parents.iter().enumerate() {
            let Some(stored) = parent
                .get_attribute(type_column)
                .and_then(Value::as_str)
                .filter(|stored| !stored.is_empty())
            else {
                continue;
            };
            let model = descriptor.resolve_morph_type(stored);
            let Some(def) = registry.model(model).or_else(|| registry.model_for_morph(model)) else {
                tracing::debug!(
                    relationship = %descriptor.name,
                    discriminator = stored,
                    "Unmapped morph type; assigning null"
                );
                continue;
            };
            match groups.iter_mut().find(|(group, _)| group.model == def.model) {
                Some((_, indices)) => indices.push(index),
                None => groups.push((def, vec![index])),
            }
        }

        let mut related_by_parent: Vec<Option<Record>> = vec![None; parents.len()];
        let mut queries = 0;
        for (def, indices) in &groups {
            let keys = extract_keys_from(indices.iter().map(|&i| &*parents[i]), foreign_key);
            if keys.is_empty() {
                continue;
            }
            let owner_key = descriptor
                .owner_key
                .clone()
                .unwrap_or_else(|| def.primary_key.clone());
            let mut query = BatchQuery::for_model(def);
            for order in &descriptor.order_by {
                query = query.order_by(OrderBy::from_relation(order, &def.table));
            }
            let query = query.where_in(Column::qualified(def.table.clone(), owner_key.clone()), &keys);
            tracing::trace!(sql = %query.to_sql().0, model = %def.model, "Batched morph_to query");
            let related = self.executor.get(&query)?;
            queries += 1;

            let group = group_records(related, &GroupKey::Attribute(owner_key));
            for &index in indices {
                related_by_parent[index] = parents[index]
                    .key(foreign_key)
                    .and_then(|key| group.get(&key))
                    .and_then(|records| records.first().cloned());
            }
        }

        for (parent, related) in parents.iter_mut().zip(related_by_parent) {
            parent.set_relation(&descriptor.name, RelationSlot::One(related));
        }
        Ok((queries, queries))
    }

    /// Fetch one page of `parent`'s relationship.
    ///
    /// The page number and size come from `ctx`. No COUNT is issued: the
    /// `next` link is optimistic unless `ctx` asks for a look-ahead row.
    #[tracing::instrument(level = "debug", skip(self, parent, descriptor, ctx), fields(relationship = %descriptor.name))]
    pub fn resolve_page(
        &mut self,
        parent: &Record,
        descriptor: &RelationshipDescriptor,
        ctx: &RequestContext,
    ) -> Result<RelationshipPage> {
        let request = PageRequest::for_relationship(ctx, self.config);

        if descriptor.kind.is_to_one() {
            let mut single = parent.clone();
            self.resolve(std::slice::from_mut(&mut single), descriptor)?;
            let records: Vec<Record> = single
                .unset_relation(&descriptor.name)
                .map(|slot| slot.iter().cloned().collect())
                .unwrap_or_default();
            let request = PageRequest::new(1, request.limit);
            let links = paginate(1, request.limit, TotalCount::Known(records.len() as u64), records.len());
            return Ok(RelationshipPage {
                records,
                request,
                links,
            });
        }

        let parent_def = self.registry.require_model(parent.model())?;
        let plan = self.plan(parent_def, descriptor)?;
        let Some(key) = parent.key(&plan.parent_key) else {
            return Ok(RelationshipPage {
                records: Vec::new(),
                request,
                links: paginate(request.page, request.limit, TotalCount::Known(0), 0),
            });
        };

        let fetch = if ctx.looks_ahead() {
            request.limit + 1
        } else {
            request.limit
        };
        let query = plan
            .query
            .where_in(plan.in_column, &[key])
            .limit(fetch)
            .offset(request.offset());
        let mut records = self.executor.get(&query)?;
        self.tracker.record(parent.model(), &descriptor.name, 1, 1);

        let total = if ctx.looks_ahead() {
            let has_more = records.len() as u64 > request.limit;
            records.truncate(usize::try_from(request.limit).unwrap_or(usize::MAX));
            TotalCount::LookAhead { has_more }
        } else {
            TotalCount::Unknown
        };
        for record in &mut records {
            record.remove_attribute(THROUGH_KEY);
        }

        let links = paginate(request.page, request.limit, total, records.len());
        tracing::debug!(
            page = request.page,
            limit = request.limit,
            fetched = records.len(),
            next = ?links.next,
            "Resolved relationship page"
        );
        Ok(RelationshipPage {
            records,
            request,
            links,
        })
    }

    /// Resolve an `include` tree over `records`, level by level.
    ///
    /// Every level is resolved once per model present at that level, so
    /// nested paths cost one query per relationship per model no matter how
    /// many records they fan out to.
    pub fn include(&mut self, records: &mut [Record], paths: &[IncludePath]) -> Result<()> {
        self.include_refs(records.iter_mut().collect(), paths)
    }

    fn include_refs(&mut self, records: Vec<&mut Record>, paths: &[IncludePath]) -> Result<()> {
        if records.is_empty() || paths.is_empty() {
            return Ok(());
        }

        for (model, mut group) in partition_by_model(records) {
            for path in paths {
                let descriptor = self.include_descriptor(&model, &path.relationship)?;
                self.resolve_refs(&mut group, descriptor)?;
                if path.nested.is_empty() {
                    continue;
                }
                let children: Vec<&mut Record> = group
                    .iter_mut()
                    .filter_map(|parent| parent.relation_mut(&path.relationship))
                    .flat_map(RelationSlot::iter_mut)
                    .collect();
                self.include_refs(children, &path.nested)?;
            }
        }
        Ok(())
    }

    /// Descriptor behind an exposed relationship name.
    fn include_descriptor(&self, model: &str, name: &str) -> Result<&'a RelationshipDescriptor> {
        let registry = self.registry;
        let relation = self
            .config
            .resource_config(model)
            .and_then(|resource| resource.relationships.get(name))
            .and_then(|config| config.relation.as_deref())
            .unwrap_or(name);
        registry.descriptor(model, relation).ok_or_else(|| {
            let resource_type = registry.resource_type_of(model).unwrap_or(model);
            Error::validation(format!(
                "Relationship {name} is not defined on resource {resource_type}"
            ))
        })
    }
}
