//! HTTP error mapping.
//!
//! Every failure leaves the server as `{ "error": <message>, "code": <CODE> }`
//! with the status of its `RegistryError` variant. `cert_registry_client`
//! parses the same body back into the variant.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use cert_registry_core::RegistryError;
use serde_json::json;

#[derive(Debug)]
pub enum AppError {
    Registry(RegistryError),
    /// A feature switched off by configuration.
    Unavailable(&'static str),
}

impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        Self::Registry(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Registry(RegistryError::Upstream(err))
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Registry(RegistryError::Validation(rejection.body_text()))
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Registry(RegistryError::Validation(rejection.body_text()))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message, code) = match self {
            AppError::Registry(err) => {
                let status = StatusCode::from_u16(err.http_status())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                if status.is_server_error() {
                    tracing::error!(error = %err, "request failed");
                } else {
                    tracing::debug!(error = %err, "request rejected");
                }
                (status, err.message(), err.code())
            }
            AppError::Unavailable(feature) => (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("{feature} is not configured"),
                "UNAVAILABLE",
            ),
        };
        (status, Json(json!({ "error": message, "code": code }))).into_response()
    }
}
