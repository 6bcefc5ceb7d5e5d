//! # 📡 THE ELASTICSEARCH BACKEND
//!
//! *Previously, on swapdex...*
//!
//! 🎬 COLD OPEN: INT. SERVER ROOM, 3:47 AM
//!
//! The alias points at an index nobody remembers creating. There are eleven
//! `products_2023...` indices eating the disk. "I'll just reindex it," they
//! whispered. "And then swap the alias," they added, with the confidence of
//! someone who has never had to explain a deleted index to their manager.
//!
//! 🚀 This module speaks just enough Elasticsearch HTTP for a blue/green
//! reindex: create an index, `_bulk` into it, list the catalog, and fire one
//! atomic `_aliases` request. No search. No mappings management. No retries.
//! It sends, it reports, it moves on. We should all be so lucky.
//!
//! 🦆 (mandatory duck, no context provided, none shall be requested)

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, trace};

use crate::backends::{BulkItemOutcome, Rejection, SearchBackend};
use crate::common::Document;
use crate::errors::BackendError;
use crate::retention::AliasAction;

/// 📡 Where the cluster lives and how to get past the bouncer.
///
/// 🔧 auth is tri-modal: `api_key`, `username` + `password`, or "I hope
/// anonymous works". API key wins when both are set. This is not a democracy.
#[derive(Debug, Deserialize, Clone)]
pub struct ElasticsearchConfig {
    /// 📡 Scheme + host + port. Yes, all of it.
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    /// 🦖 `_type` for each bulk action. Only 6.x clusters want this (`"_doc"`).
    #[serde(default)]
    pub document_type: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// ⏱️ Per request. Bulk requests can be meaty; we're not monsters.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// 📦 `_bulk` response, only the parts we read.
#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    items: Vec<HashMap<String, BulkResponseItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkResponseItem {
    #[serde(rename = "_id", default)]
    id: Option<String>,
    #[serde(default)]
    status: u16,
    #[serde(default)]
    error: Option<BulkItemError>,
}

/// 🚫 `type` and `reason` are usually there. Usually. Some clusters send `null`.
#[derive(Debug, Deserialize)]
struct BulkItemError {
    #[serde(rename = "type", default)]
    error_type: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Acknowledged {
    #[serde(default)]
    acknowledged: bool,
}

#[derive(Debug, Deserialize)]
struct CatIndex {
    index: String,
}

/// 📡 A [`SearchBackend`] over the Elasticsearch REST API.
///
/// Holds one `reqwest::Client`, reused across requests, because spinning up a
/// new client per request is the networking equivalent of buying a new car
/// every time you need groceries. Cheap to clone: the client is ref-counted.
#[derive(Debug, Clone)]
pub struct ElasticsearchBackend {
    client: reqwest::Client,
    config: ElasticsearchConfig,
}

impl ElasticsearchBackend {
    /// 🚀 Build the HTTP client and ping the cluster root.
    ///
    /// If the URL is wrong or the credentials are, we want to know now, not
    /// after the generation has been created and half the documents are in.
    pub async fn new(config: ElasticsearchConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        let backend = Self { client, config };

        // -- 📡 "Hello? Is this thing on?" -- a developer, gesturing at a cluster
        let ping = backend
            .authorize(backend.client.get(&backend.config.url))
            .send()
            .await?;
        Self::expect_success(ping).await?;
        debug!("✅ cluster at {} answered the door", backend.config.url);

        Ok(backend)
    }

    /// 🔗 `{url}/{path}` without the double-slash tax.
    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.url.trim_end_matches('/'), path)
    }

    /// 🔒 API key beats basic auth. Same dance on every request.
    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(ref api_key) = self.config.api_key {
            request.header("Authorization", format!("ApiKey {}", api_key))
        } else if let Some(ref username) = self.config.username {
            request.basic_auth(username, self.config.password.as_ref())
        } else {
            request
        }
    }

    /// 📭 Turn a non-2xx into [`BackendError::Status`], body included,
    /// because Elasticsearch error bodies are poetry. Dark poetry.
    async fn expect_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, BackendError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(BackendError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn decode<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, BackendError> {
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|err| BackendError::Decode(err.to_string()))
    }

    /// 📦 NDJSON for `_bulk`: an action line, then the raw body, per document.
    ///
    /// The target index lives in the URL, so action lines only carry `_id`
    /// (and `_type` for the dinosaurs). Bodies are written as-is, no
    /// re-serialization; `Document::new` already turned away anything with a
    /// newline in it, so one body is one line. The trailing newline on the
    /// whole body matters.
    /// It MATTERS.
    fn render_bulk_body(&self, documents: &[Document]) -> Vec<u8> {
        let estimated: usize = documents.iter().map(|d| d.size() + d.id.len() + 32).sum();
        let mut body = Vec::with_capacity(estimated);
        for document in documents {
            let action = match self.config.document_type {
                Some(ref doc_type) => json!({ "index": { "_id": document.id, "_type": doc_type } }),
                None => json!({ "index": { "_id": document.id } }),
            };
            body.extend_from_slice(action.to_string().as_bytes());
            body.push(b'\n');
            body.extend_from_slice(&document.body);
            body.push(b'\n');
        }
        body
    }
}

/// 🎯 Map one `_bulk` response item onto our outcome type.
fn outcome_from_item(fallback_id: &str, item: BulkResponseItem) -> BulkItemOutcome {
    let id = item.id.unwrap_or_else(|| fallback_id.to_string());
    match item.error {
        Some(error) => BulkItemOutcome {
            id,
            rejection: Some(Rejection {
                error_type: error.error_type.unwrap_or_default(),
                reason: error.reason.unwrap_or_default(),
            }),
        },
        // -- 🤨 a failing status without an error object; rare, but not impossible
        None if item.status >= 300 => BulkItemOutcome::rejected(
            id,
            "http_status",
            format!("item status {}", item.status),
        ),
        None => BulkItemOutcome::acknowledged(id),
    }
}

#[async_trait]
impl SearchBackend for ElasticsearchBackend {
    async fn create_index(&self, name: &str, settings: Option<&str>) -> Result<(), BackendError> {
        let mut request = self.authorize(self.client.put(self.endpoint(name)));
        if let Some(settings) = settings {
            request = request
                .header("Content-Type", "application/json")
                .body(settings.to_string());
        }

        let response = Self::expect_success(request.send().await?).await?;
        let ack: Acknowledged = Self::decode(response).await?;
        if !ack.acknowledged {
            return Err(BackendError::NotAcknowledged(format!("create index {name}")));
        }
        debug!("🏗️ created index {}", name);
        Ok(())
    }

    async fn bulk_index(
        &self,
        index: &str,
        documents: &[Document],
        refresh: bool,
    ) -> Result<Vec<BulkItemOutcome>, BackendError> {
        let path = if refresh {
            format!("{index}/_bulk?refresh=true")
        } else {
            format!("{index}/_bulk")
        };
        let body = self.render_bulk_body(documents);
        trace!("📡 POST {} with {} docs, {} bytes", path, documents.len(), body.len());

        let response = self
            .authorize(self.client.post(self.endpoint(&path)))
            // ⚠️ application/x-ndjson, not application/json. VERY important.
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await?;
        let response = Self::expect_success(response).await?;
        let parsed: BulkResponse = Self::decode(response).await?;

        Ok(parsed
            .items
            .into_iter()
            .zip(documents)
            // -- ✂️ stop at the first malformed item; later documents must not inherit its neighbour's fate
            .map_while(|(item, document)| {
                // -- 📬 one key per item: "index", "create", whichever the cluster chose
                item.into_values()
                    .next()
                    .map(|item| outcome_from_item(&document.id, item))
            })
            .collect())
    }

    async fn list_indices(&self) -> Result<Vec<String>, BackendError> {
        let response = self
            .authorize(self.client.get(self.endpoint("_cat/indices?format=json&h=index")))
            .send()
            .await?;
        let response = Self::expect_success(response).await?;
        let indices: Vec<CatIndex> = Self::decode(response).await?;
        Ok(indices.into_iter().map(|cat| cat.index).collect())
    }

    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<(), BackendError> {
        let body = json!({ "actions": actions });
        let response = self
            .authorize(self.client.post(self.endpoint("_aliases")))
            .header("Content-Type", "application/json")
            .body(body.to_string())
            .send()
            .await?;
        let response = Self::expect_success(response).await?;
        let ack: Acknowledged = Self::decode(response).await?;
        if !ack.acknowledged {
            return Err(BackendError::NotAcknowledged(format!(
                "alias update with {} actions",
                actions.len()
            )));
        }
        Ok(())
    }

    async fn aliased_indices(&self, alias: &str) -> Result<Vec<String>, BackendError> {
        let response = self
            .authorize(self.client.get(self.endpoint(&format!("_alias/{alias}"))))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let response = Self::expect_success(response).await?;
        let by_index: BTreeMap<String, serde_json::Value> = Self::decode(response).await?;
        Ok(by_index.into_keys().collect())
    }
}
