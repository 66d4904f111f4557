//! Policy checks.
//!
//! The [`Authorizer`] is the current principal: it answers whether an action
//! is allowed on a record or on a whole resource type. The gate turns those
//! answers into errors or silent filtering.

use jsonapi_orm_core::{ApiConfig, AuthorizationError, Record, Result, TypeRegistry};

/// What an action is checked against.
#[derive(Debug, Clone, Copy)]
pub enum Subject<'r> {
    /// One record (`view`, `update`, ...).
    Record(&'r Record),
    /// Every record of a model (`viewAny`, `create`, ...).
    Model(&'r str),
}

impl Subject<'_> {
    pub fn model(&self) -> &str {
        match self {
            Subject::Record(record) => record.model(),
            Subject::Model(model) => model,
        }
    }
}

/// Policy provider for the current principal.
pub trait Authorizer {
    fn can(&self, action: &str, subject: &Subject<'_>) -> bool;
}

impl<F> Authorizer for F
where
    F: Fn(&str, &Subject<'_>) -> bool,
{
    fn can(&self, action: &str, subject: &Subject<'_>) -> bool {
        self(action, subject)
    }
}

/// Checks actions against the configured authorizer.
///
/// With `use_policies` off every check passes. With policies on and no
/// principal attached, every check fails.
#[derive(Clone, Copy)]
pub struct AuthorizationGate<'a> {
    registry: &'a TypeRegistry,
    principal: Option<&'a dyn Authorizer>,
    use_policies: bool,
    deep: bool,
}

impl std::fmt::Debug for AuthorizationGate<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationGate")
            .field("principal", &self.principal.is_some())
            .field("use_policies", &self.use_policies)
            .field("deep", &self.deep)
            .finish()
    }
}

impl<'a> AuthorizationGate<'a> {
    pub fn new(config: &ApiConfig, registry: &'a TypeRegistry) -> Self {
        Self {
            registry,
            principal: None,
            use_policies: config.use_policies,
            deep: config.deep_authorization,
        }
    }

    /// Attach the current principal.
    #[must_use]
    pub fn with_principal(mut self, principal: &'a dyn Authorizer) -> Self {
        self.principal = Some(principal);
        self
    }

    /// Check `action` on `subject`.
    ///
    /// Returns `Ok(false)` on denial unless `throw_on_fail` is set, in which
    /// case the denial is returned as an [`AuthorizationError`].
    pub fn check(&self, action: &str, subject: Subject<'_>, throw_on_fail: bool) -> Result<bool> {
        if !self.use_policies {
            return Ok(true);
        }
        let allowed = self
            .principal
            .is_some_and(|principal| principal.can(action, &subject));
        if allowed {
            return Ok(true);
        }

        let error = self.denial(action, &subject);
        tracing::debug!(
            action = action,
            resource_type = %error.resource_type,
            resource_id = ?error.resource_id,
            principal = self.principal.is_some(),
            "Authorization denied"
        );
        if throw_on_fail {
            Err(error.into())
        } else {
            Ok(false)
        }
    }

    fn denial(&self, action: &str, subject: &Subject<'_>) -> AuthorizationError {
        let model = subject.model();
        let def = self.registry.model(model);
        let resource_type = def.map_or(model, |def| def.resource_type.as_str());
        let resource_id = match subject {
            Subject::Record(record) => {
                let pk = def.map_or("id", |def| def.primary_key.as_str());
                record.key(pk).map(|key| key.to_string())
            }
            Subject::Model(_) => None,
        };
        AuthorizationError::new(action, resource_type, resource_id)
    }

    /// Drop records the principal may not see.
    ///
    /// Records are grouped by model in first-seen order; a group failing
    /// `viewAny` is dropped whole. With deep authorization on, surviving
    /// records are then checked one by one with `view`. The result keeps
    /// each model's records together, so records of different models are no
    /// longer interleaved as they were in the input.
    pub fn filter_unauthorized(&self, records: Vec<Record>) -> Vec<Record> {
        if !self.use_policies {
            return records;
        }

        let mut groups: Vec<(String, Vec<Record>)> = Vec::new();
        for record in records {
            match groups.iter_mut().find(|(model, _)| model == record.model()) {
                Some((_, group)) => group.push(record),
                None => groups.push((record.model().to_string(), vec![record])),
            }
        }

        let mut kept = Vec::new();
        for (model, group) in groups {
            if !self.soft_check("viewAny", Subject::Model(&model)) {
                tracing::debug!(model = %model, dropped = group.len(), "Dropped unauthorized records");
                continue;
            }
            if self.deep {
                kept.extend(
                    group
                        .into_iter()
                        .filter(|record| self.soft_check("view", Subject::Record(record))),
                );
            } else {
                kept.extend(group);
            }
        }
        kept
    }

    fn soft_check(&self, action: &str, subject: Subject<'_>) -> bool {
        self.check(action, subject, false).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonapi_orm_core::{Error, ModelDef};

    fn registry() -> TypeRegistry {
        TypeRegistry::new()
            .with_model(ModelDef::new("Post", "posts"))
            .unwrap()
            .with_model(ModelDef::new("Video", "videos"))
            .unwrap()
    }

    fn records() -> Vec<Record> {
        vec![
            Record::persisted("Post").with("id", 1),
            Record::persisted("Video").with("id", 2),
            Record::persisted("Post").with("id", 3).with("hidden", true),
            Record::persisted("Video").with("id", 4),
        ]
    }

    #[test]
    fn policies_off_allows_everything() {
        let registry = registry();
        let gate = AuthorizationGate::new(&ApiConfig::default(), &registry);
        assert!(gate.check("delete", Subject::Model("Post"), true).unwrap());
        assert_eq!(gate.filter_unauthorized(records()).len(), 4);
    }

    #[test]
    fn missing_principal_denies() {
        let registry = registry();
        let config = ApiConfig::default().use_policies(true);
        let gate = AuthorizationGate::new(&config, &registry);
        assert!(!gate.check("view", Subject::Model("Post"), false).unwrap());
        assert!(gate.filter_unauthorized(records()).is_empty());
    }

    #[test]
    fn denial_carries_type_and_id() {
        let registry = registry();
        let config = ApiConfig::default().use_policies(true);
        let deny = |_: &str, _: &Subject<'_>| false;
        let gate = AuthorizationGate::new(&config, &registry).with_principal(&deny);

        let post = Record::persisted("Post").with("id", 7);
        let err = gate.check("update", Subject::Record(&post), true).unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert_eq!(err.title(), "You don't have permission to update resource [posts:7]");

        let err = gate.check("create", Subject::Model("Video"), true).unwrap_err();
        match err {
            Error::Authorization(e) => {
                assert_eq!(e.resource_type, "videos");
                assert_eq!(e.resource_id, None);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn failing_view_any_drops_only_that_type() {
        let registry = registry();
        let config = ApiConfig::default().use_policies(true);
        let policy = |action: &str, subject: &Subject<'_>| {
            !(action == "viewAny" && subject.model() == "Video")
        };
        let gate = AuthorizationGate::new(&config, &registry).with_principal(&policy);

        let kept = gate.filter_unauthorized(records());
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().all(|r| r.model() == "Post"));
    }

    #[test]
    fn deep_check_drops_single_records_and_groups_by_type() {
        let registry = registry();
        let config = ApiConfig::default().use_policies(true).deep_authorization(true);
        let policy = |action: &str, subject: &Subject<'_>| match subject {
            Subject::Record(record) => {
                action == "view" && record.get_attribute("hidden").is_none()
            }
            Subject::Model(_) => true,
        };
        let gate = AuthorizationGate::new(&config, &registry).with_principal(&policy);

        let kept: Vec<_> = gate
            .filter_unauthorized(records())
            .iter()
            .map(|r| (r.model().to_string(), r.key("id").unwrap().to_string()))
            .collect();
        assert_eq!(
            kept,
            vec![
                ("Post".to_string(), "1".to_string()),
                ("Video".to_string(), "2".to_string()),
                ("Video".to_string(), "4".to_string()),
            ]
        );
    }
}
