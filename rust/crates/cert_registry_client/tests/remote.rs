//! HttpResolver against a live axum listener on an ephemeral port.

use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use cert_registry_client::HttpResolver;
use cert_registry_core::ports::{PopulateByPropOptions, RemoteResolver, ResolveOptions};
use cert_registry_core::RegistryError;
use serde_json::{json, Value};
use tokio::net::TcpListener;

async fn resolve_countries(Json(body): Json<Value>) -> Json<Value> {
    let mut mapping = serde_json::Map::new();
    for id in body["ids"].as_array().cloned().unwrap_or_default() {
        if id == json!("LT") {
            mapping.insert("LT".into(), json!({"id": "LT", "name": "Lietuva", "echo": body.clone()}));
        }
    }
    Json(Value::Object(mapping))
}

async fn loads_by_certificate(Json(body): Json<Value>) -> Json<Value> {
    Json(json!([
        {"id": 1, "certificate": body["ids"][0], "queryKey": body["queryKey"]},
        {"id": 2, "certificate": body["ids"][0], "queryKey": body["queryKey"]},
    ]))
}

async fn risks_refused() -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": "populate nesting on risks exceeds 8 levels", "code": "VALIDATION_ERROR"})),
    )
}

async fn lookups_broken() -> (StatusCode, &'static str) {
    (StatusCode::INTERNAL_SERVER_ERROR, "boom")
}

async fn spawn_registry() -> String {
    let app = Router::new()
        .route("/api/countries/resolve", post(resolve_countries))
        .route("/api/loads/populate-by-prop", post(loads_by_certificate))
        .route("/api/risks/resolve", post(risks_refused))
        .route("/api/lookups/resolve", post(lookups_broken));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn resolver(base: &str) -> HttpResolver {
    ["countries", "loads", "risks", "lookups"]
        .into_iter()
        .fold(HttpResolver::new().unwrap(), |r, entity| {
            r.route(entity, base).unwrap()
        })
}

#[tokio::test]
async fn resolve_returns_the_remote_mapping() {
    let base = spawn_registry().await;
    let options = ResolveOptions {
        populate: vec!["region".into()],
        depth: 1,
        ..Default::default()
    };

    let mapping = resolver(&base)
        .resolve("countries", &[json!("LT"), json!("XX")], &options)
        .await
        .unwrap();

    assert_eq!(mapping.len(), 1);
    assert_eq!(mapping["LT"]["name"], json!("Lietuva"));
    let echo = &mapping["LT"]["echo"];
    assert_eq!(echo["mapping"], json!(true));
    assert_eq!(echo["throwIfNotExist"], json!(false));
    assert_eq!(echo["populate"], json!(["region"]));
    assert_eq!(echo["depth"], json!(1));
}

#[tokio::test]
async fn populate_by_prop_returns_flat_rows() {
    let base = spawn_registry().await;
    let options = PopulateByPropOptions {
        query_key: "certificate".into(),
        ..Default::default()
    };

    let rows = resolver(&base)
        .populate_by_prop("loads", &[json!(7)], &options)
        .await
        .unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["certificate"], json!(7));
    assert_eq!(rows[1]["queryKey"], json!("certificate"));
}

#[tokio::test]
async fn error_bodies_map_back_to_the_same_variant() {
    let base = spawn_registry().await;
    let err = resolver(&base)
        .resolve("risks", &[json!(1)], &ResolveOptions::default())
        .await
        .unwrap_err();

    match err {
        RegistryError::Validation(message) => {
            assert_eq!(message, "populate nesting on risks exceeds 8 levels")
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[tokio::test]
async fn unstructured_failures_are_upstream() {
    let base = spawn_registry().await;
    let err = resolver(&base)
        .resolve("lookups", &[json!(1)], &ResolveOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, RegistryError::Upstream(_)));
    assert_eq!(err.http_status(), 502);
}

#[tokio::test]
async fn unreachable_registry_is_upstream() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let resolver = HttpResolver::new()
        .unwrap()
        .route("countries", &format!("http://{addr}"))
        .unwrap();
    let err = resolver
        .resolve("countries", &[json!("LT")], &ResolveOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, RegistryError::Upstream(_)));
}
