//! `RemoteResolver` over HTTP/JSON.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use cert_registry_core::error::{RegistryError, Result};
use cert_registry_core::ports::{PopulateByPropOptions, RemoteResolver, ResolveOptions};
use cert_registry_core::Record;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResolveBody<'a> {
    ids: &'a [Value],
    mapping: bool,
    #[serde(flatten)]
    options: &'a ResolveOptions,
}

#[derive(Serialize)]
struct PopulateByPropBody<'a> {
    ids: &'a [Value],
    #[serde(flatten)]
    options: &'a PopulateByPropOptions,
}

/// Error body returned by registry servers.
#[derive(Deserialize)]
struct ErrorBody {
    error: String,
    code: String,
}

/// Resolves entities served by other registry processes.
///
/// Each entity is routed to the base URL of the server that registers it.
/// Calls for entities without a route fail with `UnknownEntity`.
#[derive(Debug, Clone)]
pub struct HttpResolver {
    client: Client,
    routes: HashMap<String, Url>,
}

impl HttpResolver {
    pub fn new() -> anyhow::Result<Self> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            routes: HashMap::new(),
        })
    }

    /// Route `entity` to the registry at `base_url`.
    pub fn route(mut self, entity: impl Into<String>, base_url: &str) -> anyhow::Result<Self> {
        let mut base =
            Url::parse(base_url).with_context(|| format!("invalid registry url '{base_url}'"))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        self.routes.insert(entity.into(), base);
        Ok(self)
    }

    /// Entities with a configured route, sorted.
    pub fn entities(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn endpoint(&self, entity: &str, action: &str) -> Result<Url> {
        let base = self
            .routes
            .get(entity)
            .ok_or_else(|| RegistryError::UnknownEntity(entity.to_string()))?;
        let url = base
            .join(&format!("api/{entity}/{action}"))
            .with_context(|| format!("building {action} url for {entity}"))?;
        Ok(url)
    }

    async fn post<B, T>(&self, url: Url, body: &B) -> Result<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let response = self
            .client
            .post(url.clone())
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?;

        let status = response.status();
        if status.is_success() {
            let parsed = response
                .json::<T>()
                .await
                .with_context(|| format!("decoding response from {url}"))?;
            return Ok(parsed);
        }

        let text = response.text().await.unwrap_or_default();
        tracing::warn!(%url, status = status.as_u16(), "remote registry call failed");
        Err(match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => RegistryError::from_code(&body.code, body.error),
            Err(_) => RegistryError::Upstream(anyhow!("{url} returned {status}: {text}")),
        })
    }
}

#[async_trait]
impl RemoteResolver for HttpResolver {
    async fn resolve(
        &self,
        entity: &str,
        ids: &[Value],
        options: &ResolveOptions,
    ) -> Result<Map<String, Value>> {
        let url = self.endpoint(entity, "resolve")?;
        tracing::debug!(entity, ids = ids.len(), %url, "remote resolve");
        let body = ResolveBody {
            ids,
            mapping: true,
            options,
        };
        self.post(url, &body).await
    }

    async fn populate_by_prop(
        &self,
        entity: &str,
        ids: &[Value],
        options: &PopulateByPropOptions,
    ) -> Result<Vec<Record>> {
        let url = self.endpoint(entity, "populate-by-prop")?;
        tracing::debug!(entity, ids = ids.len(), query_key = %options.query_key, %url, "remote populate by prop");
        let body = PopulateByPropBody { ids, options };
        self.post(url, &body).await
    }
}
