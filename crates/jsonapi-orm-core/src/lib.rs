//! Core types for the JSON:API ORM layer.
//!
//! This crate provides the data the rest of the workspace operates on:
//!
//! - `Value` and `KeyValue` for attribute values and normalized relationship keys
//! - `Record` with explicit attribute accessors and relationship slots
//! - `RelationshipDescriptor` describing one relationship of a model
//! - `TypeRegistry` mapping resource types to models
//! - `ApiConfig` and the error taxonomy shared by every layer

pub mod config;
pub mod error;
pub mod key;
pub mod record;
pub mod registry;
pub mod relationship;
pub mod validate;
pub mod value;

pub use config::{ApiConfig, RelationshipConfig, ResourceConfig};
pub use error::{
    AuthorizationError, ConfigurationError, Error, NotFoundError, QueryError, QueryErrorKind,
    Result, UnsupportedError, ValidationError,
};
pub use key::{KeyValue, extract_keys, extract_keys_from};
pub use record::{RelationSlot, Record};
pub use registry::{ModelDef, TypeRegistry};
pub use relationship::{
    PivotTable, RelationOrder, RelationshipDescriptor, RelationshipKind, SortDirection,
    ThroughTable, find_descriptor,
};
pub use value::{Value, format_uuid, parse_uuid};
