//! Generic per-entity routes, `/api/:entity/...`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query};
use axum::{Extension, Json};
use cert_registry_core::service::{ListPage, ListParams, PopulateByPropParams, ResolveParams};
use cert_registry_core::{Record, Registry, Reshaped};
use serde_json::{json, Value};

use super::params::{PopulateByPropBody, ReadQuery, ResolveBody};
use crate::error::AppError;

/// GET /api/:entity: one page of records.
pub async fn list(
    Extension(registry): Extension<Arc<Registry>>,
    Path(entity): Path<String>,
    query: Result<Query<ReadQuery>, QueryRejection>,
) -> Result<Json<ListPage>, AppError> {
    let Query(query) = query?;
    let (page, page_size) = (query.page, query.page_size);
    let params = ListParams {
        page,
        page_size,
        find: query.into_find()?,
    };
    Ok(Json(registry.entity(&entity)?.list(params).await?))
}

/// GET /api/:entity/all: every matching record, optionally reshaped.
pub async fn find(
    Extension(registry): Extension<Arc<Registry>>,
    Path(entity): Path<String>,
    query: Result<Query<ReadQuery>, QueryRejection>,
) -> Result<Json<Reshaped>, AppError> {
    let Query(query) = query?;
    let params = query.into_find()?;
    Ok(Json(registry.entity(&entity)?.find(params).await?))
}

/// GET /api/:entity/count
pub async fn count(
    Extension(registry): Extension<Arc<Registry>>,
    Path(entity): Path<String>,
    query: Result<Query<ReadQuery>, QueryRejection>,
) -> Result<Json<Value>, AppError> {
    let Query(query) = query?;
    let scope = query.scope;
    let find = query.into_find()?;
    let count = registry.entity(&entity)?.count(&find.query, scope).await?;
    Ok(Json(json!(count)))
}

/// GET /api/:entity/:id
pub async fn get(
    Extension(registry): Extension<Arc<Registry>>,
    Path((entity, id)): Path<(String, String)>,
    query: Result<Query<ReadQuery>, QueryRejection>,
) -> Result<Json<Record>, AppError> {
    let Query(query) = query?;
    let record = registry
        .entity(&entity)?
        .get(Value::String(id), query.fields(), &query.populate())
        .await?;
    Ok(Json(record))
}

/// GET /api/:entity/search: the entity's declared search action.
pub async fn search(
    Extension(registry): Extension<Arc<Registry>>,
    Path(entity): Path<String>,
    Query(criteria): Query<HashMap<String, String>>,
) -> Result<Json<Record>, AppError> {
    tracing::debug!(entity = %entity, ?criteria, "search");
    Ok(Json(registry.entity(&entity)?.search(&criteria).await?))
}

/// POST /api/:entity/resolve
pub async fn resolve(
    Extension(registry): Extension<Arc<Registry>>,
    Path(entity): Path<String>,
    body: Result<Json<ResolveBody>, JsonRejection>,
) -> Result<Json<Reshaped>, AppError> {
    let Json(body) = body?;
    let params = ResolveParams {
        ids: body.ids.into_vec(),
        fields: body.fields.map(|f| f.into_vec()),
        populate: body.populate.map(|p| p.into_vec()).unwrap_or_default(),
        inherited_populate: body.inherited_populate,
        query: body.query.map(|q| q.into_conditions()).unwrap_or_default(),
        scope: body.scope,
        mapping: body.mapping,
        throw_if_not_exist: body.throw_if_not_exist,
        depth: body.depth,
    };
    Ok(Json(registry.entity(&entity)?.resolve(params).await?))
}

/// POST /api/:entity/populate-by-prop
pub async fn populate_by_prop(
    Extension(registry): Extension<Arc<Registry>>,
    Path(entity): Path<String>,
    body: Result<Json<PopulateByPropBody>, JsonRejection>,
) -> Result<Json<Reshaped>, AppError> {
    let Json(body) = body?;
    let mapping = body.mapping_options();
    let params = PopulateByPropParams {
        ids: body.ids.into_vec(),
        query_key: body.query_key,
        query: body.query.map(|q| q.into_conditions()).unwrap_or_default(),
        fields: body.fields.map(|f| f.into_vec()),
        populate: body.populate.map(|p| p.into_vec()).unwrap_or_default(),
        inherited_populate: body.inherited_populate,
        scope: body.scope,
        mapping,
        depth: body.depth,
    };
    Ok(Json(registry.entity(&entity)?.populate_by_prop(params).await?))
}
