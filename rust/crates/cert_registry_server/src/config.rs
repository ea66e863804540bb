//! Server configuration from environment variables.
//!
//!   DATABASE_URL        : Postgres connection string (absent: in-memory store)
//!   DB_SCHEMA           : schema holding the tables (default: public)
//!   DATABASE_POOL_SIZE  : max pool connections (default: 7)
//!   BIND_ADDR           : listen address (default: 0.0.0.0:3000)
//!   SERVER_HOST         : public base URL used in file links (default: http://localhost:3000)
//!   SEED_FIXTURES_DIR   : seed empty tables from `<dir>/<entity>.json`
//!   STRICT_FIELDS       : `true` rejects unknown field names
//!   MAX_POPULATE_DEPTH  : nested populate limit (default: 8)
//!   REGISTRY_ENTITIES   : comma list of entities served here (default: all)
//!   REMOTE_REGISTRIES   : `entity=url` pairs, comma separated, for entities served elsewhere
//!   SHARE_POINT_*       : TENANT_ID, CLIENT_ID, CLIENT_SECRET, DRIVE_ID for certificate files

use std::net::SocketAddr;
use std::path::PathBuf;

use cert_registry_core::service::DEFAULT_MAX_POPULATE_DEPTH;
use cert_registry_core::FieldPolicy;
use cert_registry_postgres::DatabaseConfig;
use thiserror::Error;

use crate::files::DriveConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name}: invalid value '{value}' ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("document drive needs all of SHARE_POINT_TENANT_ID, SHARE_POINT_CLIENT_ID, SHARE_POINT_CLIENT_SECRET, SHARE_POINT_DRIVE_ID; missing {0}")]
    IncompleteDrive(&'static str),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database: Option<DatabaseConfig>,
    pub bind_addr: SocketAddr,
    pub server_host: url::Url,
    pub seed_fixtures_dir: Option<PathBuf>,
    pub field_policy: FieldPolicy,
    pub max_populate_depth: u32,
    /// Entities registered locally; `None` registers the whole catalog.
    pub entities: Option<Vec<String>>,
    pub remotes: Vec<(String, String)>,
    pub drive: Option<DriveConfig>,
}

fn invalid(name: &'static str, value: &str, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        name,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        _ => Err(invalid(name, value, "expected true or false")),
    }
}

fn comma_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let database = match var("DATABASE_URL") {
            Some(url) => {
                let mut db = DatabaseConfig::new(url);
                if let Some(schema) = var("DB_SCHEMA") {
                    db.schema = schema;
                }
                if let Some(size) = var("DATABASE_POOL_SIZE") {
                    db.max_connections = size
                        .parse()
                        .map_err(|e| invalid("DATABASE_POOL_SIZE", &size, e))?;
                }
                Some(db)
            }
            None => None,
        };

        let bind = var("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:3000".into());
        let bind_addr: SocketAddr = bind.parse().map_err(|e| invalid("BIND_ADDR", &bind, e))?;

        let host = var("SERVER_HOST").unwrap_or_else(|| "http://localhost:3000".into());
        let server_host = url::Url::parse(&host).map_err(|e| invalid("SERVER_HOST", &host, e))?;
        if server_host.cannot_be_a_base() {
            return Err(invalid("SERVER_HOST", &host, "not a base url"));
        }

        let strict = var("STRICT_FIELDS")
            .map(|v| parse_bool("STRICT_FIELDS", &v))
            .transpose()?
            .unwrap_or(false);
        let field_policy = if strict {
            FieldPolicy::Reject
        } else {
            FieldPolicy::Ignore
        };

        let max_populate_depth = match var("MAX_POPULATE_DEPTH") {
            Some(v) => v.parse().map_err(|e| invalid("MAX_POPULATE_DEPTH", &v, e))?,
            None => DEFAULT_MAX_POPULATE_DEPTH,
        };

        let mut remotes = Vec::new();
        if let Some(raw) = var("REMOTE_REGISTRIES") {
            for pair in comma_list(&raw) {
                let (entity, url) = pair
                    .split_once('=')
                    .ok_or_else(|| invalid("REMOTE_REGISTRIES", &pair, "expected entity=url"))?;
                remotes.push((entity.trim().to_string(), url.trim().to_string()));
            }
        }

        Ok(Self {
            database,
            bind_addr,
            server_host,
            seed_fixtures_dir: var("SEED_FIXTURES_DIR").map(PathBuf::from),
            field_policy,
            max_populate_depth,
            entities: var("REGISTRY_ENTITIES").map(|v| comma_list(&v)),
            remotes,
            drive: drive_config(&var)?,
        })
    }
}

fn drive_config(var: &impl Fn(&str) -> Option<String>) -> Result<Option<DriveConfig>, ConfigError> {
    const KEYS: [&str; 4] = [
        "SHARE_POINT_TENANT_ID",
        "SHARE_POINT_CLIENT_ID",
        "SHARE_POINT_CLIENT_SECRET",
        "SHARE_POINT_DRIVE_ID",
    ];
    match KEYS.map(|k| var(k)) {
        [None, None, None, None] => Ok(None),
        [Some(tenant), Some(client), Some(secret), Some(drive)] => {
            Ok(Some(DriveConfig::new(tenant, client, secret, drive)))
        }
        partial => {
            let missing = partial.iter().position(Option::is_none).unwrap_or_default();
            Err(ConfigError::IncompleteDrive(KEYS[missing]))
        }
    }
}
