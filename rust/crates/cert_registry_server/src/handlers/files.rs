//! Certificate document routes.

use std::sync::Arc;

use axum::extract::Path;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use cert_registry_core::RegistryError;

use crate::error::AppError;
use crate::files::{FileLink, FileService};

const FILE_ENTITY: &str = "certificates";

fn file_service(
    files: Option<Arc<FileService>>,
    entity: &str,
) -> Result<Arc<FileService>, AppError> {
    if entity != FILE_ENTITY {
        return Err(RegistryError::NotFound(format!("{entity} have no files")).into());
    }
    files.ok_or(AppError::Unavailable("document drive"))
}

/// GET /api/certificates/files/:id
pub async fn list_files(
    Extension(files): Extension<Option<Arc<FileService>>>,
    Path((entity, id)): Path<(String, String)>,
) -> Result<Json<Vec<FileLink>>, AppError> {
    let files = file_service(files, &entity)?;
    Ok(Json(files.links(&id).await))
}

/// GET /api/certificates/download/:id/:name
pub async fn download(
    Extension(files): Extension<Option<Arc<FileService>>>,
    Path((entity, id, name)): Path<(String, String, String)>,
) -> Result<Response, AppError> {
    let files = file_service(files, &entity)?;
    let download = files.open(&id).await?;
    tracing::info!(item = %id, name = %name, status = download.status, "streaming certificate file");

    let status = StatusCode::from_u16(download.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = (status, download.body).into_response();
    let headers = response.headers_mut();
    if let Some(content_type) = download
        .content_type
        .and_then(|ct| HeaderValue::from_str(&ct).ok())
    {
        headers.insert(header::CONTENT_TYPE, content_type);
    }
    let disposition = format!("attachment; filename=\"{}\"", name.replace('"', ""));
    if let Ok(value) = HeaderValue::from_bytes(disposition.as_bytes()) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}
