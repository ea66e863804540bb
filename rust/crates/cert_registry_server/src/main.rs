//! cert_registry_server: REST server for the export certificate registry.
//!
//! Configuration comes from environment variables (and `.env`), see
//! [`cert_registry_server::config`].

use std::sync::Arc;

use anyhow::Context;
use cert_registry_server::app::{build_files, build_registry};
use cert_registry_server::config::ServerConfig;
use cert_registry_server::router::build_router;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,cert_registry_server=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;
    let registry = Arc::new(build_registry(&config).await?);
    let files = build_files(&config)?;

    let app = build_router(registry, files);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;
    tracing::info!("cert_registry_server listening on {}", config.bind_addr);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
