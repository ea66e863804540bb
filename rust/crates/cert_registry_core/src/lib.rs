//! Certificate registry core.
//!
//! Declarative entity descriptors interpreted by one generic read pipeline:
//! column renaming, read transforms, batched cross-entity population and
//! keyed reshaping of results. Storage and sibling registries are reached
//! only through the [`ports`] traits, so everything here runs against the
//! in-memory store in tests.

pub mod descriptor;
pub mod entities;
pub mod error;
pub mod mapping;
pub mod memory;
pub mod populate;
pub mod ports;
pub mod query;
pub mod search;
pub mod seed;
pub mod service;
pub mod trim;

/// A record as a JSON object. Store rows are keyed by physical column,
/// service results by public field name.
pub type Record = serde_json::Map<String, serde_json::Value>;

pub use descriptor::{EntityDescriptor, FieldDef, FieldPolicy, FieldType, PopulateRule};
pub use error::{RegistryError, Result};
pub use mapping::{reduce, MappingOptions, MappingRequest, Reshaped};
pub use memory::MemoryStore;
pub use ports::{CallParams, PopulateByPropOptions, RecordStore, RemoteResolver, ResolveOptions};
pub use query::{Condition, FindQuery, Op, Predicate, SortKey};
pub use service::{
    EntityService, FindParams, ListPage, ListParams, PopulateByPropParams, Registry, ResolveParams,
};
