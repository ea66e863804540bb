//! PostgreSQL adapter for the certificate registry.
//!
//! [`PgRecordStore`] implements the core `RecordStore` port over a
//! `PgPool`. All SQL is built at runtime with `sqlx::QueryBuilder`; no
//! database is needed at compile time.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

mod store;

pub use store::PgRecordStore;

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub database_url: String,
    /// Schema holding the registry tables.
    pub schema: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl DatabaseConfig {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            schema: "public".to_string(),
            max_connections: 7,
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

/// Open a connection pool for `config`.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    tracing::info!(
        url = %mask_database_url(&config.database_url),
        schema = %config.schema,
        max_connections = config.max_connections,
        "connecting to database"
    );

    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect(&config.database_url)
        .await
        .inspect_err(|e| tracing::warn!(error = %e, "database connection failed"))
}

/// Hide the password of a connection URL for logging.
pub fn mask_database_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        Err(_) => "***".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_password_only() {
        assert_eq!(
            mask_database_url("postgres://registry:s3cret@db:5432/certs"),
            "postgres://registry:***@db:5432/certs"
        );
        assert_eq!(
            mask_database_url("postgres://db:5432/certs"),
            "postgres://db:5432/certs"
        );
        assert_eq!(mask_database_url("not a url"), "***");
    }
}
