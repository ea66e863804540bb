//! Entity registry and the generic read pipeline.
//!
//! `Registry` owns the descriptors and the store. `Registry::entity`
//! hands out a borrowed [`EntityService`] that runs every operation of one
//! entity through the same steps: plan columns, build predicates, fetch,
//! rename and transform, populate, compute virtual fields, project and
//! reshape.
//!
//! The registry is also the in-process [`RemoteResolver`]: population of a
//! locally registered entity calls straight back into it, anything else goes
//! to the configured remote resolver.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::descriptor::{EntityDescriptor, FieldKind, FieldPolicy};
use crate::error::{RegistryError, Result};
use crate::mapping::{index_by, key_string, reduce, MappingOptions, MappingRequest, Reshaped};
use crate::populate::{populate, source_key};
use crate::ports::{PopulateByPropOptions, RecordStore, RemoteResolver, ResolveOptions};
use crate::query::{Condition, FindQuery, Op, Predicate, SortKey};
use crate::trim::coerce;
use crate::Record;

pub const DEFAULT_MAX_POPULATE_DEPTH: u32 = 8;
pub const DEFAULT_PAGE_SIZE: u64 = 10;
pub const MAX_PAGE_SIZE: u64 = 100;
/// Largest `limit` or `offset` accepted by a read.
pub const MAX_WINDOW: u64 = i64::MAX as u64;

pub struct Registry {
    descriptors: HashMap<String, Arc<EntityDescriptor>>,
    store: Arc<dyn RecordStore>,
    remote: Option<Arc<dyn RemoteResolver>>,
    policy: FieldPolicy,
    max_populate_depth: u32,
}

impl Registry {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            descriptors: HashMap::new(),
            store,
            remote: None,
            policy: FieldPolicy::default(),
            max_populate_depth: DEFAULT_MAX_POPULATE_DEPTH,
        }
    }

    pub fn with_policy(mut self, policy: FieldPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_populate_depth(mut self, depth: u32) -> Self {
        self.max_populate_depth = depth;
        self
    }

    /// Resolver for entities that are not registered here.
    pub fn with_remote(mut self, remote: Arc<dyn RemoteResolver>) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Validate and add a descriptor. Re-registering a name replaces it.
    pub fn register(mut self, descriptor: EntityDescriptor) -> Result<Self> {
        descriptor.validate()?;
        tracing::debug!(entity = %descriptor.name, table = %descriptor.table, "registered entity");
        self.descriptors
            .insert(descriptor.name.clone(), Arc::new(descriptor));
        Ok(self)
    }

    pub fn entity(&self, name: &str) -> Result<EntityService<'_>> {
        let descriptor = self
            .descriptors
            .get(name)
            .ok_or_else(|| RegistryError::UnknownEntity(name.to_string()))?;
        Ok(EntityService {
            registry: self,
            descriptor: descriptor.as_ref(),
        })
    }

    pub fn has_entity(&self, name: &str) -> bool {
        self.descriptors.contains_key(name)
    }

    pub fn entity_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.descriptors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn policy(&self) -> FieldPolicy {
        self.policy
    }

    pub fn max_populate_depth(&self) -> u32 {
        self.max_populate_depth
    }

    fn check_depth(&self, entity: &str, depth: u32) -> Result<()> {
        if depth > self.max_populate_depth {
            return Err(RegistryError::Validation(format!(
                "populate nesting on {entity} exceeds {} levels",
                self.max_populate_depth
            )));
        }
        Ok(())
    }

    fn remote_for(&self, entity: &str) -> Result<&dyn RemoteResolver> {
        self.remote
            .as_deref()
            .ok_or_else(|| RegistryError::UnknownEntity(entity.to_string()))
    }
}

#[async_trait]
impl RemoteResolver for Registry {
    async fn resolve(
        &self,
        entity: &str,
        ids: &[Value],
        options: &ResolveOptions,
    ) -> Result<Map<String, Value>> {
        if !self.has_entity(entity) {
            return self.remote_for(entity)?.resolve(entity, ids, options).await;
        }
        let params = ResolveParams {
            ids: ids.to_vec(),
            fields: options.params.fields.clone(),
            populate: options.populate.clone(),
            inherited_populate: options.inherited_populate,
            query: options.params.query.clone(),
            scope: options.params.scope,
            mapping: true,
            throw_if_not_exist: options.throw_if_not_exist,
            depth: options.depth,
        };
        match self.entity(entity)?.resolve(params).await? {
            Reshaped::Keyed(mapping) => Ok(mapping),
            Reshaped::List(_) => Ok(Map::new()),
        }
    }

    async fn populate_by_prop(
        &self,
        entity: &str,
        ids: &[Value],
        options: &PopulateByPropOptions,
    ) -> Result<Vec<Record>> {
        if !self.has_entity(entity) {
            return self
                .remote_for(entity)?
                .populate_by_prop(entity, ids, options)
                .await;
        }
        let params = PopulateByPropParams {
            ids: ids.to_vec(),
            query_key: options.query_key.clone(),
            query: options.params.query.clone(),
            fields: options.params.fields.clone(),
            populate: options.populate.clone(),
            inherited_populate: options.inherited_populate,
            scope: options.params.scope,
            mapping: None,
            depth: options.depth,
        };
        match self.entity(entity)?.populate_by_prop(params).await? {
            Reshaped::List(rows) => Ok(rows),
            Reshaped::Keyed(_) => Ok(Vec::new()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FindParams {
    /// Conditions on public fields.
    pub query: Vec<Condition>,
    /// Fields to return; all when absent.
    pub fields: Option<Vec<String>>,
    pub sort: Vec<SortKey>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub populate: Vec<String>,
    /// `Some(false)` skips the default scope.
    pub scope: Option<bool>,
    /// Reshape the whole result keyed by a field.
    pub mapping: Option<MappingRequest>,
}

#[derive(Debug, Clone, Default)]
pub struct ListParams {
    /// 1-based; defaults to 1.
    pub page: Option<u64>,
    pub page_size: Option<u64>,
    /// `limit` and `offset` are replaced by the page window.
    pub find: FindParams,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPage {
    pub rows: Reshaped,
    pub total: u64,
    pub page: u64,
    pub page_size: u64,
    pub total_pages: u64,
}

#[derive(Debug, Clone)]
pub struct ResolveParams {
    pub ids: Vec<Value>,
    pub fields: Option<Vec<String>>,
    pub populate: Vec<String>,
    /// `populate` came from the calling entity; unknown names are dropped.
    pub inherited_populate: bool,
    pub query: Vec<Condition>,
    pub scope: Option<bool>,
    /// Key the result by id instead of returning rows in id order.
    pub mapping: bool,
    pub throw_if_not_exist: bool,
    pub depth: u32,
}

impl Default for ResolveParams {
    fn default() -> Self {
        Self {
            ids: Vec::new(),
            fields: None,
            populate: Vec::new(),
            inherited_populate: false,
            query: Vec::new(),
            scope: None,
            mapping: true,
            throw_if_not_exist: false,
            depth: 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PopulateByPropParams {
    pub ids: Vec<Value>,
    pub query_key: String,
    pub query: Vec<Condition>,
    pub fields: Option<Vec<String>>,
    pub populate: Vec<String>,
    pub inherited_populate: bool,
    pub scope: Option<bool>,
    /// Reshape keyed by `query_key`; rows come back flat when absent.
    pub mapping: Option<MappingOptions>,
    pub depth: u32,
}

/// `limit` and `offset` must fit a signed 64-bit SQL parameter.
fn check_window(limit: Option<u64>, offset: Option<u64>) -> Result<()> {
    for (name, value) in [("limit", limit), ("offset", offset)] {
        if value.is_some_and(|v| v > MAX_WINDOW) {
            return Err(RegistryError::Validation(format!(
                "{name} must not exceed {MAX_WINDOW}"
            )));
        }
    }
    Ok(())
}

/// Position of a read within a populate chain.
#[derive(Debug, Clone, Copy, Default)]
struct Nesting {
    depth: u32,
    inherited: bool,
}

/// Columns to fetch and fields to return for one read.
struct ReadPlan {
    columns: Vec<String>,
    output: Vec<String>,
    populate: Vec<String>,
}

fn push_unique(list: &mut Vec<String>, item: &str) {
    if !list.iter().any(|x| x == item) {
        list.push(item.to_string());
    }
}

fn ensure_field(fields: &mut Option<Vec<String>>, name: &str) {
    if let Some(list) = fields {
        push_unique(list, name);
    }
}

fn coerce_op(field_type: crate::descriptor::FieldType, op: Op) -> Op {
    match op {
        Op::Eq(value) => Op::Eq(coerce(field_type, value)),
        Op::In(values) => Op::In(values.into_iter().map(|v| coerce(field_type, v)).collect()),
        other => other,
    }
}

/// Operations of one registered entity.
#[derive(Clone, Copy)]
pub struct EntityService<'a> {
    registry: &'a Registry,
    descriptor: &'a EntityDescriptor,
}

impl<'a> EntityService<'a> {
    pub fn descriptor(&self) -> &'a EntityDescriptor {
        self.descriptor
    }

    pub fn name(&self) -> &'a str {
        &self.descriptor.name
    }

    pub async fn find(&self, params: FindParams) -> Result<Reshaped> {
        let rows = self
            .read(
                &params.query,
                params.fields.as_deref(),
                &params.sort,
                params.limit,
                params.offset,
                &params.populate,
                params.scope,
                Nesting::default(),
            )
            .await?;
        self.reshape(rows, params.mapping.as_ref())
    }

    pub async fn find_one(&self, mut params: FindParams) -> Result<Option<Record>> {
        params.limit = Some(1);
        params.mapping = None;
        let rows = self
            .read(
                &params.query,
                params.fields.as_deref(),
                &params.sort,
                params.limit,
                params.offset,
                &params.populate,
                params.scope,
                Nesting::default(),
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    pub async fn list(&self, params: ListParams) -> Result<ListPage> {
        let page = params.page.unwrap_or(1);
        let page_size = params.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if page == 0 {
            return Err(RegistryError::Validation("page must be at least 1".into()));
        }
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(RegistryError::Validation(format!(
                "pageSize must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }

        let offset = (page - 1)
            .checked_mul(page_size)
            .ok_or_else(|| RegistryError::Validation(format!("page {page} is out of range")))?;

        let find = params.find;
        let total = self.count(&find.query, find.scope).await?;
        let rows = self
            .read(
                &find.query,
                find.fields.as_deref(),
                &find.sort,
                Some(page_size),
                Some(offset),
                &find.populate,
                find.scope,
                Nesting::default(),
            )
            .await?;

        Ok(ListPage {
            rows: self.reshape(rows, find.mapping.as_ref())?,
            total,
            page,
            page_size,
            total_pages: total.div_ceil(page_size),
        })
    }

    pub async fn count(&self, query: &[Condition], scope: Option<bool>) -> Result<u64> {
        let filter = self.predicates(query, scope)?;
        self.registry.store.count(&self.descriptor.table, &filter).await
    }

    /// Single record by primary key.
    pub async fn get(&self, id: Value, fields: Option<Vec<String>>, populate: &[String]) -> Result<Record> {
        let query = [Condition::new(self.descriptor.primary_key.clone(), Op::Eq(id.clone()))];
        let rows = self
            .read(&query, fields.as_deref(), &[], Some(1), None, populate, None, Nesting::default())
            .await?;
        rows.into_iter().next().ok_or_else(|| {
            RegistryError::NotFound(format!(
                "{} {} not found",
                self.descriptor.name,
                key_string(&id).unwrap_or_default()
            ))
        })
    }

    /// Batched lookup by primary key.
    pub async fn resolve(&self, mut params: ResolveParams) -> Result<Reshaped> {
        self.registry.check_depth(&self.descriptor.name, params.depth)?;
        let pk = self.descriptor.primary_key.clone();
        if params.ids.is_empty() {
            return Ok(self.empty(params.mapping));
        }

        // Ids are keyed the way the stored primary key reads back, so "01"
        // and 1 address the same row.
        if let Some(pk_field) = self.descriptor.get(&pk) {
            let pk_type = pk_field.field_type;
            params.ids = params.ids.into_iter().map(|id| coerce(pk_type, id)).collect();
        }

        ensure_field(&mut params.fields, &pk);
        let mut query = params.query;
        query.push(Condition::new(pk.clone(), Op::In(params.ids.clone())));

        let rows = self
            .read(
                &query,
                params.fields.as_deref(),
                &[],
                None,
                None,
                &params.populate,
                params.scope,
                Nesting {
                    depth: params.depth,
                    inherited: params.inherited_populate,
                },
            )
            .await?;
        let mut by_id = index_by(rows, &pk);

        if params.throw_if_not_exist {
            if let Some(missing) = params
                .ids
                .iter()
                .filter_map(key_string)
                .find(|id| !by_id.contains_key(id))
            {
                return Err(RegistryError::NotFound(format!(
                    "{} {missing} not found",
                    self.descriptor.name
                )));
            }
        }

        if params.mapping {
            let mut mapping = Map::new();
            for id in params.ids.iter().filter_map(key_string) {
                if let Some(record) = by_id.remove(&id) {
                    mapping.insert(id, Value::Object(record));
                }
            }
            Ok(Reshaped::Keyed(mapping))
        } else {
            Ok(Reshaped::List(
                params
                    .ids
                    .iter()
                    .filter_map(key_string)
                    .filter_map(|id| by_id.get(&id).cloned())
                    .collect(),
            ))
        }
    }

    /// Rows whose `query_key` points at one of `ids`.
    pub async fn populate_by_prop(&self, mut params: PopulateByPropParams) -> Result<Reshaped> {
        self.registry.check_depth(&self.descriptor.name, params.depth)?;
        if self.descriptor.column_of(&params.query_key).is_none() {
            return Err(RegistryError::Validation(format!(
                "cannot query {} by '{}'",
                self.descriptor.name, params.query_key
            )));
        }
        if params.ids.is_empty() {
            return Ok(self.empty(params.mapping.is_some()));
        }

        ensure_field(&mut params.fields, &params.query_key);
        let mut query = params.query;
        query.push(Condition::new(params.query_key.clone(), Op::In(params.ids)));

        let rows = self
            .read(
                &query,
                params.fields.as_deref(),
                &[],
                None,
                None,
                &params.populate,
                params.scope,
                Nesting {
                    depth: params.depth,
                    inherited: params.inherited_populate,
                },
            )
            .await?;

        Ok(match &params.mapping {
            Some(options) => reduce(rows, &params.query_key, options),
            None => Reshaped::List(rows),
        })
    }

    /// Run the entity's declared search action.
    pub async fn search(&self, criteria: &HashMap<String, String>) -> Result<Record> {
        let spec = self.descriptor.search.as_ref().ok_or_else(|| {
            RegistryError::Validation(format!("{} has no search action", self.descriptor.name))
        })?;
        let conditions = spec.build_conditions(criteria)?;

        let plan = self.plan(None, &spec.populate, false)?;
        let filter = self.predicates(&conditions, None)?;
        let rows = self.fetch(&plan, filter, Vec::new(), Some(2), None).await?;
        let found = spec.select_single(rows)?;

        tracing::info!(entity = %self.descriptor.name, "search matched one record");
        let mut records = self.finish(&plan, vec![found], &spec.populate, 0).await?;
        records
            .pop()
            .ok_or_else(|| RegistryError::NotFound(spec.not_found_message.clone()))
    }

    /// Insert public-keyed records. Used for seeding and imports only.
    pub async fn create_many(&self, records: Vec<Record>) -> Result<Vec<Record>> {
        let rows = records
            .into_iter()
            .map(|r| self.descriptor.to_row(r))
            .collect::<Result<Vec<_>>>()?;
        let count = rows.len();
        let stored = self
            .registry
            .store
            .create_many(&self.descriptor.table, rows)
            .await?;
        tracing::info!(entity = %self.descriptor.name, rows = count, "created records");
        Ok(stored.into_iter().map(|row| self.read_row(row)).collect())
    }

    fn empty(&self, keyed: bool) -> Reshaped {
        if keyed {
            Reshaped::Keyed(Map::new())
        } else {
            Reshaped::List(Vec::new())
        }
    }

    fn reshape(&self, rows: Vec<Record>, mapping: Option<&MappingRequest>) -> Result<Reshaped> {
        match mapping {
            Some(request) => {
                self.descriptor
                    .check_known(std::slice::from_ref(&request.key_field), self.registry.policy)?;
                Ok(reduce(rows, &request.key_field, &request.options))
            }
            None => Ok(Reshaped::List(rows)),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn read(
        &self,
        query: &[Condition],
        fields: Option<&[String]>,
        sort: &[SortKey],
        limit: Option<u64>,
        offset: Option<u64>,
        populate: &[String],
        scope: Option<bool>,
        nesting: Nesting,
    ) -> Result<Vec<Record>> {
        check_window(limit, offset)?;
        let plan = self.plan(fields, populate, nesting.inherited)?;
        let filter = self.predicates(query, scope)?;
        let sort = self.sort_columns(sort)?;
        let rows = self.fetch(&plan, filter, sort, limit, offset).await?;
        self.finish(&plan, rows, populate, nesting.depth).await
    }

    fn plan(&self, fields: Option<&[String]>, populate: &[String], inherited: bool) -> Result<ReadPlan> {
        let d = self.descriptor;
        // An inherited list names the caller's fields; the ones this entity
        // lacks are skipped below.
        if !inherited {
            d.check_known(populate, self.registry.policy)?;
        }

        let mut columns = Vec::new();
        let mut output = Vec::new();
        push_unique(&mut columns, d.pk_column());
        for spec in d.resolve_columns(fields, self.registry.policy)? {
            push_unique(&mut output, spec.public);
            if let Some(column) = spec.column {
                push_unique(&mut columns, column);
            }
        }

        let mut wanted = Vec::new();
        for name in populate {
            let Some(field) = d.get(name) else { continue };
            let Some(key) = source_key(d, field) else {
                continue;
            };
            if let Some(column) = d.column_of(key) {
                push_unique(&mut columns, column);
            }
            push_unique(&mut output, name);
            push_unique(&mut wanted, name);
        }

        Ok(ReadPlan {
            columns,
            output,
            populate: wanted,
        })
    }

    fn predicates(&self, query: &[Condition], scope: Option<bool>) -> Result<Vec<Predicate>> {
        let d = self.descriptor;
        let scoped: &[Condition] = if scope == Some(false) {
            &[]
        } else {
            &d.default_scope
        };

        query
            .iter()
            .chain(scoped)
            .map(|condition| -> Result<Predicate> {
                let field = d
                    .get(&condition.field)
                    .filter(|f| !f.is_virtual())
                    .ok_or_else(|| {
                        RegistryError::Validation(format!(
                            "cannot filter {} by '{}'",
                            d.name, condition.field
                        ))
                    })?;
                Ok(Predicate::new(
                    field.column.clone(),
                    coerce_op(field.field_type, condition.op.clone()),
                ))
            })
            .collect()
    }

    fn sort_columns(&self, sort: &[SortKey]) -> Result<Vec<SortKey>> {
        let names: Vec<String> = sort.iter().map(|s| s.field.clone()).collect();
        self.descriptor.check_known(&names, self.registry.policy)?;
        Ok(sort
            .iter()
            .filter_map(|s| {
                self.descriptor.column_of(&s.field).map(|column| SortKey {
                    field: column.to_string(),
                    descending: s.descending,
                })
            })
            .collect())
    }

    async fn fetch(
        &self,
        plan: &ReadPlan,
        filter: Vec<Predicate>,
        sort: Vec<SortKey>,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> Result<Vec<Record>> {
        let query = FindQuery {
            filter,
            columns: plan.columns.clone(),
            sort,
            limit,
            offset,
        };
        let rows = self
            .registry
            .store
            .find(&self.descriptor.table, &query)
            .await?;
        tracing::debug!(entity = %self.descriptor.name, rows = rows.len(), "fetched rows");
        Ok(rows.into_iter().map(|row| self.read_row(row)).collect())
    }

    /// Store row to public record with read transforms applied.
    fn read_row(&self, row: Record) -> Record {
        let mut record = self.descriptor.from_row(row);
        for field in &self.descriptor.fields {
            if let (Some(transform), Some(value)) = (field.transform, record.get_mut(&field.name)) {
                *value = transform.apply(value.take());
            }
        }
        record
    }

    async fn finish(
        &self,
        plan: &ReadPlan,
        rows: Vec<Record>,
        caller_populate: &[String],
        depth: u32,
    ) -> Result<Vec<Record>> {
        let mut records = populate(
            self.registry,
            self.descriptor,
            rows,
            &plan.populate,
            caller_populate,
            depth,
        )
        .await?;

        let output: HashSet<&str> = plan.output.iter().map(String::as_str).collect();
        for record in &mut records {
            for field in &self.descriptor.fields {
                if let FieldKind::Virtual(compute) = field.kind {
                    if output.contains(field.name.as_str()) {
                        let value = compute(record);
                        record.insert(field.name.clone(), value);
                    }
                }
            }
            record.retain(|key, _| output.contains(key.as_str()));
        }
        Ok(records)
    }
}
