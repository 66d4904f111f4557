//! Type registry: resource types, models, and their relationship descriptors.
//!
//! The registry is the bidirectional map between logical JSON:API resource
//! types (`"posts"`) and concrete models (`"Post"`), populated at startup and
//! read-only afterwards.

use crate::config::ApiConfig;
use crate::error::{Error, Result};
use crate::relationship::{RelationshipDescriptor, find_descriptor};
use std::collections::{BTreeMap, HashMap};

/// Metadata of one registered model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelDef {
    pub model: String,
    pub resource_type: String,
    pub table: String,
    pub primary_key: String,
    /// Discriminator stored in morph type columns for this model
    pub morph_alias: String,
    pub descriptors: Vec<RelationshipDescriptor>,
}

impl ModelDef {
    /// Create a model definition with conventional defaults: the table is
    /// named after the resource type, the primary key is `id`, and the morph
    /// alias is the model name.
    #[must_use]
    pub fn new(model: impl Into<String>, resource_type: impl Into<String>) -> Self {
        let model = model.into();
        let resource_type = resource_type.into();
        Self {
            table: resource_type.clone(),
            morph_alias: model.clone(),
            model,
            resource_type,
            primary_key: "id".to_string(),
            descriptors: Vec::new(),
        }
    }

    #[must_use]
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    #[must_use]
    pub fn primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    #[must_use]
    pub fn morph_alias(mut self, alias: impl Into<String>) -> Self {
        self.morph_alias = alias.into();
        self
    }

    #[must_use]
    pub fn relationship(mut self, descriptor: RelationshipDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    pub fn descriptor(&self, name: &str) -> Option<&RelationshipDescriptor> {
        find_descriptor(&self.descriptors, name)
    }
}

/// Bidirectional resource type <-> model registry.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    models: BTreeMap<String, ModelDef>,
    by_type: HashMap<String, String>,
    by_morph: HashMap<String, String>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from every resource in `config`.
    pub fn from_config(config: &ApiConfig) -> Result<Self> {
        let mut registry = Self::new();
        for (model, resource) in &config.resources {
            let mut def = ModelDef::new(model.clone(), resource.resource_type.clone())
                .table(resource.table_name())
                .primary_key(resource.primary_key.clone());
            if let Some(alias) = &resource.morph_alias {
                def = def.morph_alias(alias.clone());
            }
            def.descriptors.clone_from(&resource.descriptors);
            registry.register(def)?;
        }
        Ok(registry)
    }

    /// Register a model, rejecting duplicate models, resource types, and
    /// morph aliases.
    pub fn register(&mut self, def: ModelDef) -> Result<()> {
        if self.models.contains_key(&def.model) {
            return Err(Error::configuration(format!(
                "Model {} is already registered",
                def.model
            )));
        }
        if let Some(existing) = self.by_type.get(&def.resource_type) {
            return Err(Error::configuration(format!(
                "Resource type \"{}\" is already mapped to model {}",
                def.resource_type, existing
            )));
        }
        if let Some(existing) = self.by_morph.get(&def.morph_alias) {
            return Err(Error::configuration(format!(
                "Morph alias \"{}\" is already used by model {}",
                def.morph_alias, existing
            )));
        }
        for descriptor in &def.descriptors {
            descriptor.validate()?;
        }

        tracing::debug!(
            model = %def.model,
            resource_type = %def.resource_type,
            relationships = def.descriptors.len(),
            "Registered model"
        );
        self.by_type
            .insert(def.resource_type.clone(), def.model.clone());
        self.by_morph
            .insert(def.morph_alias.clone(), def.model.clone());
        self.models.insert(def.model.clone(), def);
        Ok(())
    }

    /// Builder-style [`TypeRegistry::register`].
    pub fn with_model(mut self, def: ModelDef) -> Result<Self> {
        self.register(def)?;
        Ok(self)
    }

    pub fn model(&self, model: &str) -> Option<&ModelDef> {
        self.models.get(model)
    }

    /// Like [`TypeRegistry::model`], failing with a configuration error.
    pub fn require_model(&self, model: &str) -> Result<&ModelDef> {
        self.models
            .get(model)
            .ok_or_else(|| Error::configuration(format!("Model {model} is not registered")))
    }

    pub fn model_for_type(&self, resource_type: &str) -> Option<&ModelDef> {
        self.by_type
            .get(resource_type)
            .and_then(|model| self.models.get(model))
    }

    pub fn resource_type_of(&self, model: &str) -> Option<&str> {
        self.models.get(model).map(|def| def.resource_type.as_str())
    }

    /// Model stored under a morph discriminator. Model names are accepted
    /// as discriminators too.
    pub fn model_for_morph(&self, discriminator: &str) -> Option<&ModelDef> {
        self.by_morph
            .get(discriminator)
            .and_then(|model| self.models.get(model))
            .or_else(|| self.models.get(discriminator))
    }

    pub fn descriptor(&self, model: &str, name: &str) -> Option<&RelationshipDescriptor> {
        self.models.get(model).and_then(|def| def.descriptor(name))
    }

    pub fn models(&self) -> impl Iterator<Item = &ModelDef> {
        self.models.values()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
