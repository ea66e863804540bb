//! Collaborator port traits.
//!
//! The core reaches storage and sibling entities only through these two
//! traits. `MemoryStore` and `Registry` implement them in-process;
//! `cert_registry_postgres` and `cert_registry_client` provide the
//! production adapters.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::query::{Condition, FindQuery, Predicate};
use crate::Record;

/// Persistence of column-keyed rows for one table at a time.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Rows matching every predicate of the query, in sort order.
    async fn find(&self, table: &str, query: &FindQuery) -> Result<Vec<Record>>;

    async fn find_one(&self, table: &str, query: &FindQuery) -> Result<Option<Record>> {
        let mut query = query.clone();
        query.limit = Some(1);
        Ok(self.find(table, &query).await?.into_iter().next())
    }

    async fn count(&self, table: &str, filter: &[Predicate]) -> Result<u64>;

    /// Insert rows and return them as stored.
    async fn create_many(&self, table: &str, rows: Vec<Record>) -> Result<Vec<Record>>;
}

/// Static parameters a population rule passes along with its lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallParams {
    /// Fields of the related records to return; all when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
    /// `Some(false)` disables the related entity's default scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<bool>,
    /// Extra conditions on the related records.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub query: Vec<Condition>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveOptions {
    #[serde(default)]
    pub populate: Vec<String>,
    /// `populate` was forwarded from the calling entity; names the target
    /// does not declare are dropped instead of checked.
    #[serde(default)]
    pub inherited_populate: bool,
    /// Fail with `NotFound` when any id is missing. Population never sets it.
    #[serde(default)]
    pub throw_if_not_exist: bool,
    #[serde(default, flatten)]
    pub params: CallParams,
    /// Nesting level of this call within a populate chain.
    #[serde(default)]
    pub depth: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PopulateByPropOptions {
    /// Field of the related entity pointing back at the ids.
    pub query_key: String,
    #[serde(default)]
    pub populate: Vec<String>,
    #[serde(default)]
    pub inherited_populate: bool,
    #[serde(default, flatten)]
    pub params: CallParams,
    #[serde(default)]
    pub depth: u32,
}

/// Resolution of related records by id set, possibly across a process
/// boundary. Implementations must not fail merely because ids are absent.
#[async_trait]
pub trait RemoteResolver: Send + Sync {
    /// Mapping from stringified id to record. Missing ids are simply absent.
    async fn resolve(
        &self,
        entity: &str,
        ids: &[Value],
        options: &ResolveOptions,
    ) -> Result<Map<String, Value>>;

    /// Rows of `entity` whose `query_key` is one of `ids`, ungrouped.
    async fn populate_by_prop(
        &self,
        entity: &str,
        ids: &[Value],
        options: &PopulateByPropOptions,
    ) -> Result<Vec<Record>>;
}
