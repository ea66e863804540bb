//! Fixture seeding for empty tables.

use std::path::Path;

use anyhow::Context;

use crate::error::Result;
use crate::service::{EntityService, Registry};
use crate::Record;

/// Entities in an order where every population target is seeded before
/// the records that point at it.
pub const SEED_ORDER: [&str; 8] = [
    "countries",
    "lookups",
    "risks",
    "posts",
    "activityLocations",
    "certificates",
    "loads",
    "products",
];

/// Insert `rows` only when the entity has no records at all, deleted ones
/// included. Returns the number of rows inserted.
pub async fn seed_if_empty(entity: EntityService<'_>, rows: Vec<Record>) -> Result<usize> {
    let existing = entity.count(&[], Some(false)).await?;
    if existing > 0 {
        tracing::debug!(entity = %entity.name(), existing, "table not empty, skipping seed");
        return Ok(0);
    }
    if rows.is_empty() {
        return Ok(0);
    }
    let created = entity.create_many(rows).await?;
    tracing::info!(entity = %entity.name(), rows = created.len(), "seeded table");
    Ok(created.len())
}

/// Seed every registered entity from `<dir>/<entity>.json` in
/// [`SEED_ORDER`]. Missing files are skipped.
pub async fn load_fixtures(registry: &Registry, dir: &Path) -> Result<Vec<(String, usize)>> {
    let mut seeded = Vec::new();
    for name in SEED_ORDER {
        if !registry.has_entity(name) {
            continue;
        }
        let path = dir.join(format!("{name}.json"));
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::debug!(entity = name, path = %path.display(), "no fixture file");
            continue;
        }

        let text = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading fixture {}", path.display()))?;
        let rows: Vec<Record> = serde_json::from_str(&text)
            .with_context(|| format!("parsing fixture {}", path.display()))?;

        let inserted = seed_if_empty(registry.entity(name)?, rows).await?;
        seeded.push((name.to_string(), inserted));
    }
    Ok(seeded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{EntityDescriptor, FieldDef};
    use crate::memory::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    fn registry(store: Arc<MemoryStore>) -> Registry {
        Registry::new(store)
            .register(
                EntityDescriptor::new("countries", "salys")
                    .field(FieldDef::string("id"))
                    .field(FieldDef::string("name").column("salPavad")),
            )
            .unwrap()
    }

    fn rows(v: serde_json::Value) -> Vec<Record> {
        serde_json::from_value(v).unwrap()
    }

    #[tokio::test]
    async fn seeds_only_an_empty_table() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry(store.clone());
        let countries = registry.entity("countries").unwrap();

        let first = seed_if_empty(countries, rows(json!([{"id": "LT", "name": "Lietuva"}])))
            .await
            .unwrap();
        let second = seed_if_empty(countries, rows(json!([{"id": "LV", "name": "Latvija"}])))
            .await
            .unwrap();

        assert_eq!((first, second), (1, 0));
        assert_eq!(store.len("salys").await, 1);
    }

    #[tokio::test]
    async fn loads_fixture_files_in_order() {
        let dir = std::env::temp_dir().join(format!("cert-registry-seed-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("countries.json"),
            r#"[{"id": "LT", "name": "Lietuva"}, {"id": "LV", "name": "Latvija"}]"#,
        )
        .unwrap();

        let store = Arc::new(MemoryStore::new());
        let registry = registry(store.clone());
        let seeded = load_fixtures(&registry, &dir).await.unwrap();
        std::fs::remove_dir_all(&dir).ok();

        assert_eq!(seeded, vec![("countries".to_string(), 2)]);
        assert_eq!(store.len("salys").await, 2);
    }

    #[tokio::test]
    async fn malformed_fixture_is_an_error() {
        let dir = std::env::temp_dir().join(format!("cert-registry-bad-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("countries.json"), "{not json").unwrap();

        let registry = registry(Arc::new(MemoryStore::new()));
        let result = load_fixtures(&registry, &dir).await;
        std::fs::remove_dir_all(&dir).ok();

        assert!(result.is_err());
    }
}
