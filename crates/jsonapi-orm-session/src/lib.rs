//! Relationship resolution and writes for the JSON:API ORM layer.
//!
//! `jsonapi-orm-session` is the **request layer**. It works on records the
//! caller already loaded and fills or persists their relationships through a
//! [`QueryExecutor`](jsonapi_orm_query::QueryExecutor).
//!
//! # Role In The Architecture
//!
//! - **Batched resolution**: one query per relationship per related model,
//!   never one per parent.
//! - **Mixed collections**: included graphs holding several models are
//!   partitioned and resolved per model.
//! - **Authorization**: policy checks that either fail the request or
//!   silently drop records.
//! - **Writes**: relationship payloads applied inside one transaction,
//!   including pivot diffing.
//! - **Pagination**: page arithmetic and link sets, with relationship pages
//!   driven by an explicit [`RequestContext`].
//!
//! # Example
//!
//! ```ignore
//! let mut resolver = BatchResolver::new(&config, &registry, &store);
//! resolver.resolve(&mut posts, registry.descriptor("Post", "comments").unwrap())?;
//!
//! let gate = AuthorizationGate::new(&config, &registry).with_principal(&user);
//! let visible = gate.filter_unauthorized(posts);
//!
//! let mut writer = RelationshipWriter::new(&config, &registry, &store).with_gate(gate);
//! writer.write(&mut post, &payloads, &WriteContext::direct(RequestMethod::Post))?;
//! ```

pub mod authorization;
pub mod context;
pub mod events;
pub mod mixed;
pub mod n1_detection;
pub mod pagination;
pub mod resolver;
pub mod write;

pub use authorization::{AuthorizationGate, Authorizer, Subject};
pub use context::RequestContext;
pub use events::{WriteEvent, WriteHooks};
pub use n1_detection::{BatchLoadStats, BatchLoadTracker};
pub use pagination::{
    LinkSet, PageBounds, PageMeta, PageRequest, TotalCount, last_page, paginate,
};
pub use resolver::{BatchResolver, RelationshipPage, ResultGroup};
pub use write::{
    RelationshipPayload, RelationshipWriter, RequestMethod, ResourceIdentifier, WriteContext,
    WriteHandler, WriteMode,
};
