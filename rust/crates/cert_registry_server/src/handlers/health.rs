//! GET /health

use std::sync::Arc;

use axum::{Extension, Json};
use cert_registry_core::Registry;
use serde_json::{json, Value};

pub async fn health(Extension(registry): Extension<Arc<Registry>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "entities": registry.entity_names(),
    }))
}
