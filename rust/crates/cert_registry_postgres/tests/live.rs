//! Round trips against a real database.
//!
//! Run with: DATABASE_URL=postgres://... cargo test -p cert_registry_postgres -- --ignored

use std::sync::Arc;

use cert_registry_core::entities::register_catalog;
use cert_registry_core::ports::RecordStore;
use cert_registry_core::query::{FindQuery, Op, Predicate, SortKey};
use cert_registry_core::service::{FindParams, Registry};
use cert_registry_core::Record;
use cert_registry_postgres::{connect, DatabaseConfig, PgRecordStore};
use serde_json::json;
use sqlx::PgPool;

const SCHEMA: &str = "cert_registry_test";

async fn pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = connect(&DatabaseConfig::new(url)).await.unwrap();

    sqlx::query(&format!("DROP SCHEMA IF EXISTS {SCHEMA} CASCADE"))
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query(&format!("CREATE SCHEMA {SCHEMA}"))
        .execute(&pool)
        .await
        .unwrap();
    sqlx::query(&format!(
        r#"CREATE TABLE {SCHEMA}.salys (
            id varchar(2) PRIMARY KEY,
            "salPavad" character(20),
            "salIso2" character(2)
        )"#
    ))
    .execute(&pool)
    .await
    .unwrap();
    sqlx::query(&format!(
        r#"CREATE TABLE {SCHEMA}.postai (
            id serial PRIMARY KEY,
            "postPavad" character(30),
            "postKodas" text,
            "postTrump" text,
            "postSalis" varchar(2),
            "postAdresas" text,
            "postAktyvus" boolean DEFAULT true
        )"#
    ))
    .execute(&pool)
    .await
    .unwrap();
    pool
}

fn rows(v: serde_json::Value) -> Vec<Record> {
    serde_json::from_value(v).unwrap()
}

#[tokio::test]
#[ignore]
async fn insert_filter_and_count() {
    let store = PgRecordStore::new(pool().await, SCHEMA);

    let inserted = store
        .create_many(
            "salys",
            rows(json!([
                {"id": "LT", "salPavad": "Lietuva", "salIso2": "LT"},
                {"id": "LV", "salPavad": "Latvija", "salIso2": "LV"},
            ])),
        )
        .await
        .unwrap();
    assert_eq!(inserted.len(), 2);

    let query = FindQuery {
        filter: vec![Predicate::new("salPavad", Op::Contains("tvi".into()))],
        columns: vec!["id".into()],
        sort: vec![SortKey::parse("id")],
        ..Default::default()
    };
    let found = store.find("salys", &query).await.unwrap();
    assert_eq!(found, rows(json!([{"id": "LV"}])));

    let in_filter = [Predicate::new("id", Op::In(vec![json!("LT"), json!("EE")]))];
    assert_eq!(store.count("salys", &in_filter).await.unwrap(), 1);
}

#[tokio::test]
#[ignore]
async fn registry_populates_through_postgres() {
    let store = Arc::new(PgRecordStore::new(pool().await, SCHEMA));
    let only = vec!["countries".to_string(), "posts".to_string()];
    let registry = register_catalog(Registry::new(store), Some(only.as_slice())).unwrap();

    registry
        .entity("countries")
        .unwrap()
        .create_many(rows(json!([{"id": "LT", "name": "Lietuva", "iso": "LT"}])))
        .await
        .unwrap();
    registry
        .entity("posts")
        .unwrap()
        .create_many(rows(json!([{"id": 1, "name": "Kybartai", "country": "LT"}])))
        .await
        .unwrap();

    let posts = registry
        .entity("posts")
        .unwrap()
        .find(FindParams {
            populate: vec!["country".into()],
            ..Default::default()
        })
        .await
        .unwrap();
    let posts = posts.as_list().unwrap();
    assert_eq!(posts[0]["name"], json!("Kybartai"));
    assert_eq!(posts[0]["country"]["name"], json!("Lietuva"));
    assert_eq!(posts[0]["active"], json!(true));
}
