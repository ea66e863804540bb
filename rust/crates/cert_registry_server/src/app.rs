//! Wiring of store, registry and document drive from a [`ServerConfig`].

use std::sync::Arc;

use anyhow::Context;
use cert_registry_client::HttpResolver;
use cert_registry_core::entities::register_catalog;
use cert_registry_core::seed::load_fixtures;
use cert_registry_core::{MemoryStore, RecordStore, Registry};
use cert_registry_postgres::{connect, PgRecordStore};

use crate::config::ServerConfig;
use crate::files::{DocumentDrive, FileService, MemoryTokenCache};

pub async fn build_registry(config: &ServerConfig) -> anyhow::Result<Registry> {
    let store: Arc<dyn RecordStore> = match &config.database {
        Some(db) => {
            let pool = connect(db).await.context("Failed to connect to database")?;
            tracing::info!("Connected to database");
            Arc::new(PgRecordStore::new(pool, db.schema.clone()))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, records are kept in memory");
            Arc::new(MemoryStore::new())
        }
    };

    let mut registry = Registry::new(store)
        .with_policy(config.field_policy)
        .with_max_populate_depth(config.max_populate_depth);

    if !config.remotes.is_empty() {
        let mut resolver = HttpResolver::new()?;
        for (entity, url) in &config.remotes {
            resolver = resolver.route(entity.clone(), url)?;
        }
        tracing::info!(entities = ?resolver.entities(), "remote registries configured");
        registry = registry.with_remote(Arc::new(resolver));
    }

    let registry = register_catalog(registry, config.entities.as_deref())?;
    tracing::info!(entities = ?registry.entity_names(), "registry ready");

    if let Some(dir) = &config.seed_fixtures_dir {
        let seeded = load_fixtures(&registry, dir)
            .await
            .with_context(|| format!("Failed to seed from {}", dir.display()))?;
        for (entity, rows) in seeded {
            tracing::info!(entity = %entity, rows, "fixtures loaded");
        }
    }
    Ok(registry)
}

pub fn build_files(config: &ServerConfig) -> anyhow::Result<Option<Arc<FileService>>> {
    let Some(drive) = &config.drive else {
        tracing::info!("document drive not configured, certificate file routes disabled");
        return Ok(None);
    };
    let drive = DocumentDrive::new(drive.clone(), Arc::new(MemoryTokenCache::new()))?;
    Ok(Some(Arc::new(FileService::new(
        Arc::new(drive),
        config.server_host.clone(),
    ))))
}
