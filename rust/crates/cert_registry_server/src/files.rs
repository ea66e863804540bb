//! Certificate documents kept in a SharePoint drive.
//!
//! Files of a certificate live in a drive folder named after the
//! certificate. Only items whose list-item field `documentType` is
//! `Sertifikatas` are offered; each gets a download link back through this
//! server, which streams the content from the drive.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use axum::body::Body;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tokio::time::Instant;
use url::Url;

pub const CERTIFICATE_DOCUMENT_TYPE: &str = "Sertifikatas";

const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";
const DEFAULT_GRAPH: &str = "https://graph.microsoft.com/v1.0/drives";
const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";
/// Seconds shaved off a token's lifetime before it is cached.
const TOKEN_MARGIN_SECS: u64 = 60;

// ── Token cache ───────────────────────────────────────────────

/// Short-lived key/value store for access tokens.
#[async_trait]
pub trait TokenCache: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: String, ttl: Duration);
}

#[derive(Debug, Default)]
pub struct MemoryTokenCache {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl MemoryTokenCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenCache for MemoryTokenCache {
    async fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((value, expires)) if Instant::now() < *expires => Some(value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (value, Instant::now() + ttl));
    }
}

// ── Drive access ──────────────────────────────────────────────

#[derive(Clone)]
pub struct DriveConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
    pub drive_id: String,
    /// Token authority, `{authority}/{tenant}/oauth2/v2.0/token`.
    pub authority_url: String,
    /// Drives endpoint of the Graph API.
    pub graph_url: String,
}

impl DriveConfig {
    pub fn new(
        tenant_id: String,
        client_id: String,
        client_secret: String,
        drive_id: String,
    ) -> Self {
        Self {
            tenant_id,
            client_id,
            client_secret,
            drive_id,
            authority_url: DEFAULT_AUTHORITY.to_string(),
            graph_url: DEFAULT_GRAPH.to_string(),
        }
    }

    pub fn with_endpoints(mut self, authority_url: &str, graph_url: &str) -> Self {
        self.authority_url = authority_url.trim_end_matches('/').to_string();
        self.graph_url = graph_url.trim_end_matches('/').to_string();
        self
    }

    /// `{graph}/{drive}/...` with every segment percent-encoded.
    fn graph_endpoint(&self, segments: &[&str]) -> anyhow::Result<Url> {
        let mut url = Url::parse(&self.graph_url)
            .with_context(|| format!("Invalid graph url {}", self.graph_url))?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Graph url {} cannot take a path", self.graph_url))?
            .pop_if_empty()
            .push(&self.drive_id)
            .extend(segments);
        Ok(url)
    }

    fn children_url(&self, folder: &str) -> anyhow::Result<Url> {
        let folder = format!("{folder}:");
        self.graph_endpoint(&["root:", folder.as_str(), "children"])
    }

    fn content_url(&self, item_id: &str) -> anyhow::Result<Url> {
        self.graph_endpoint(&["items", item_id, "content"])
    }
}

impl fmt::Debug for DriveConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriveConfig")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("drive_id", &self.drive_id)
            .field("authority_url", &self.authority_url)
            .field("graph_url", &self.graph_url)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveItem {
    pub id: String,
    pub name: String,
    pub size: u64,
}

/// Content of a drive item on its way to the caller.
pub struct Download {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Body,
}

/// Where certificate documents come from.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Certificate documents in `folder`.
    async fn list_documents(&self, folder: &str) -> anyhow::Result<Vec<DriveItem>>;

    async fn open(&self, item_id: &str) -> anyhow::Result<Download>;
}

#[derive(Deserialize)]
struct TokenGrant {
    token_type: String,
    access_token: String,
    expires_in: u64,
}

#[derive(Deserialize)]
struct ChildrenPage {
    #[serde(default)]
    value: Vec<GraphItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphItem {
    id: String,
    name: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    list_item: Option<ListItem>,
}

#[derive(Deserialize)]
struct ListItem {
    #[serde(default)]
    fields: Map<String, Value>,
}

impl GraphItem {
    fn is_certificate(&self) -> bool {
        self.list_item
            .as_ref()
            .and_then(|item| item.fields.get("documentType"))
            .and_then(Value::as_str)
            == Some(CERTIFICATE_DOCUMENT_TYPE)
    }
}

/// SharePoint drive over the Graph API, authenticated with client credentials.
pub struct DocumentDrive {
    http: Client,
    config: DriveConfig,
    cache: Arc<dyn TokenCache>,
}

impl DocumentDrive {
    const NAME: &'static str = "sharepoint";

    pub fn new(config: DriveConfig, cache: Arc<dyn TokenCache>) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            http,
            config,
            cache,
        })
    }

    fn token_key() -> String {
        format!("{}.token", Self::NAME)
    }

    /// Cached `"<type> <token>"` authorization value, fetched on a miss.
    async fn token(&self) -> anyhow::Result<String> {
        let key = Self::token_key();
        if let Some(token) = self.cache.get(&key).await {
            return Ok(token);
        }

        let url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.config.authority_url, self.config.tenant_id
        );
        let grant: TokenGrant = self
            .http
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("scope", GRAPH_SCOPE),
            ])
            .send()
            .await
            .context("Failed to request drive token")?
            .error_for_status()
            .context("Drive token request refused")?
            .json()
            .await
            .context("Failed to parse drive token response")?;

        let token = format!("{} {}", grant.token_type, grant.access_token);
        let ttl = Duration::from_secs(grant.expires_in.saturating_sub(TOKEN_MARGIN_SECS));
        self.cache.set(&key, token.clone(), ttl).await;
        tracing::debug!(expires_in = grant.expires_in, "fetched drive token");
        Ok(token)
    }
}

#[async_trait]
impl DocumentSource for DocumentDrive {
    async fn list_documents(&self, folder: &str) -> anyhow::Result<Vec<DriveItem>> {
        let url = self.config.children_url(folder)?;
        let token = self.token().await?;

        let page: ChildrenPage = self
            .http
            .get(url)
            .query(&[("select", "id,name,size,file"), ("expand", "listItem")])
            .header(AUTHORIZATION, token)
            .send()
            .await
            .context("Failed to list drive folder")?
            .error_for_status()
            .context("Drive folder listing refused")?
            .json()
            .await
            .context("Failed to parse drive folder listing")?;

        Ok(page
            .value
            .into_iter()
            .filter(GraphItem::is_certificate)
            .map(|item| DriveItem {
                id: item.id,
                name: item.name,
                size: item.size,
            })
            .collect())
    }

    async fn open(&self, item_id: &str) -> anyhow::Result<Download> {
        let url = self.config.content_url(item_id)?;
        let token = self.token().await?;
        let response = self
            .http
            .get(url)
            .header(AUTHORIZATION, token)
            .send()
            .await
            .context("Failed to download drive item")?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        Ok(Download {
            status: response.status().as_u16(),
            content_type,
            body: Body::from_stream(response.bytes_stream()),
        })
    }
}

// ── File links ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileLink {
    pub url: String,
    pub name: String,
    pub size: u64,
}

/// Certificate file listing and download behind the REST routes.
pub struct FileService {
    source: Arc<dyn DocumentSource>,
    server_host: Url,
}

impl FileService {
    pub fn new(source: Arc<dyn DocumentSource>, server_host: Url) -> Self {
        Self {
            source,
            server_host,
        }
    }

    /// Download URL served by this server for a drive item.
    pub fn download_url(&self, item_id: &str, name: &str) -> String {
        let mut url = self.server_host.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["api", "certificates", "download", item_id, name]);
        }
        url.to_string()
    }

    /// Links to the certificate documents of `folder`. A failing drive yields
    /// an empty list.
    pub async fn links(&self, folder: &str) -> Vec<FileLink> {
        match self.source.list_documents(folder).await {
            Ok(items) => items
                .into_iter()
                .map(|item| FileLink {
                    url: self.download_url(&item.id, &item.name),
                    name: item.name,
                    size: item.size,
                })
                .collect(),
            Err(e) => {
                tracing::warn!(folder, error = %e, "listing certificate files failed");
                Vec::new()
            }
        }
    }

    pub async fn open(&self, item_id: &str) -> anyhow::Result<Download> {
        self.source.open(item_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn cache_expires_entries() {
        let cache = MemoryTokenCache::new();
        cache.set("a", "Bearer 1".into(), Duration::from_secs(3600)).await;
        cache.set("b", "Bearer 2".into(), Duration::ZERO).await;

        assert_eq!(cache.get("a").await.as_deref(), Some("Bearer 1"));
        assert_eq!(cache.get("b").await, None);
        assert_eq!(cache.get("c").await, None);
    }

    #[test]
    fn only_certificate_documents_pass() {
        let page: ChildrenPage = serde_json::from_value(json!({
            "value": [
                {"id": "1", "name": "cert.pdf", "size": 10,
                 "listItem": {"fields": {"documentType": "Sertifikatas"}}},
                {"id": "2", "name": "invoice.pdf", "size": 20,
                 "listItem": {"fields": {"documentType": "Sąskaita"}}},
                {"id": "3", "name": "loose.pdf"}
            ]
        }))
        .unwrap();
        let kept: Vec<&str> = page
            .value
            .iter()
            .filter(|item| item.is_certificate())
            .map(|item| item.id.as_str())
            .collect();
        assert_eq!(kept, vec!["1"]);
    }

    struct NoDocuments;

    #[async_trait]
    impl DocumentSource for NoDocuments {
        async fn list_documents(&self, _folder: &str) -> anyhow::Result<Vec<DriveItem>> {
            anyhow::bail!("drive offline")
        }

        async fn open(&self, _item_id: &str) -> anyhow::Result<Download> {
            anyhow::bail!("drive offline")
        }
    }

    fn service(host: &str) -> FileService {
        FileService::new(Arc::new(NoDocuments), Url::parse(host).unwrap())
    }

    #[test]
    fn download_urls_are_encoded_under_the_host() {
        assert_eq!(
            service("https://registry.example.lt").download_url("01ABC", "cert 1.pdf"),
            "https://registry.example.lt/api/certificates/download/01ABC/cert%201.pdf"
        );
        assert_eq!(
            service("https://example.lt/registry/").download_url("9", "a.pdf"),
            "https://example.lt/registry/api/certificates/download/9/a.pdf"
        );
    }

    #[tokio::test]
    async fn listing_failures_yield_no_links() {
        assert!(service("http://localhost:3000").links("A123").await.is_empty());
    }

    #[test]
    fn graph_urls_encode_route_values() {
        let config = DriveConfig::new("t".into(), "c".into(), "s".into(), "drive 1".into())
            .with_endpoints("https://login.example.lt", "https://graph.example.lt/v1.0/drives/");
        assert_eq!(
            config.children_url("A1?x=1#top").unwrap().as_str(),
            "https://graph.example.lt/v1.0/drives/drive%201/root:/A1%3Fx=1%23top:/children"
        );
        assert_eq!(
            config.content_url("01/../secret").unwrap().as_str(),
            "https://graph.example.lt/v1.0/drives/drive%201/items/01%2F..%2Fsecret/content"
        );
    }

    #[test]
    fn debug_hides_the_secret() {
        let config = DriveConfig::new("t".into(), "c".into(), "hunter2".into(), "d".into());
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
