//! Relationship write hooks.

use crate::write::RelationshipPayload;
use jsonapi_orm_core::{Record, Result};

/// Hook callback: receives the parent record, the relationship name, and
/// the raw payload. Returning `Err` aborts the write and rolls back the
/// surrounding transaction.
type RelationshipHookFn = Box<dyn FnMut(&Record, &str, &RelationshipPayload) -> Result<()> + Send>;

/// Points in a relationship write at which hooks fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteEvent {
    /// Before the relationship is persisted.
    Saving,
    /// After the relationship was persisted.
    Saved,
}

/// Registered relationship write hooks.
#[derive(Default)]
pub struct WriteHooks {
    saving: Vec<RelationshipHookFn>,
    saved: Vec<RelationshipHookFn>,
}

impl std::fmt::Debug for WriteHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteHooks")
            .field("saving", &self.saving.len())
            .field("saved", &self.saved.len())
            .finish()
    }
}

impl WriteHooks {
    pub fn on_saving(
        &mut self,
        f: impl FnMut(&Record, &str, &RelationshipPayload) -> Result<()> + Send + 'static,
    ) {
        self.saving.push(Box::new(f));
    }

    pub fn on_saved(
        &mut self,
        f: impl FnMut(&Record, &str, &RelationshipPayload) -> Result<()> + Send + 'static,
    ) {
        self.saved.push(Box::new(f));
    }

    pub fn is_empty(&self) -> bool {
        self.saving.is_empty() && self.saved.is_empty()
    }

    pub(crate) fn fire(
        &mut self,
        event: WriteEvent,
        parent: &Record,
        relationship: &str,
        payload: &RelationshipPayload,
    ) -> Result<()> {
        let callbacks = match event {
            WriteEvent::Saving => &mut self.saving,
            WriteEvent::Saved => &mut self.saved,
        };
        for cb in callbacks.iter_mut() {
            cb(parent, relationship, payload)?;
        }
        Ok(())
    }
}
