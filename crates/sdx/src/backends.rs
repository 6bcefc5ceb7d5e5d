//! 🔌 Backends: where the real I/O happens.
//!
//! 🎭 This module is the casting agency. Need to talk to a real Elasticsearch
//! cluster? Need a cluster-shaped thing living entirely in RAM so tests can
//! run on a plane? We've got a backend for that. We've got exactly two.
//!
//! The writer and the switcher only ever see [`SearchBackend`]. Four operation
//! kinds, plus one alias lookup so we can double-check the cutover:
//!
//! | operation         | Elasticsearch                          |
//! |-------------------|----------------------------------------|
//! | `create_index`    | `PUT /{index}`                         |
//! | `bulk_index`      | `POST /{index}/_bulk`                  |
//! | `list_indices`    | `GET /_cat/indices?format=json`        |
//! | `update_aliases`  | `POST /_aliases` (atomic, all or none) |
//! | `aliased_indices` | `GET /_alias/{alias}`                  |
//!
//! ⚠️ `update_aliases` being atomic is a contract we inherit from the backend,
//! not something we verify. If your backend can half-apply an alias update,
//! the switch protocol needs a two-phase redesign. 🦆

use async_trait::async_trait;
use serde::Deserialize;

use crate::common::Document;
use crate::errors::BackendError;
use crate::retention::AliasAction;

pub mod elasticsearch;
pub mod in_mem;

pub use elasticsearch::{ElasticsearchBackend, ElasticsearchConfig};
pub use in_mem::InMemoryBackend;

/// 🚫 The backend's structured "no" for one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub error_type: String,
    pub reason: String,
}

/// 📬 What the backend said about one document of a bulk request.
///
/// Outcomes come back in request order: `outcomes[i]` belongs to `documents[i]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItemOutcome {
    pub id: String,
    pub rejection: Option<Rejection>,
}

impl BulkItemOutcome {
    pub fn acknowledged(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rejection: None,
        }
    }

    pub fn rejected(
        id: impl Into<String>,
        error_type: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            rejection: Some(Rejection {
                error_type: error_type.into(),
                reason: reason.into(),
            }),
        }
    }
}

/// 🔍 The remote search index, seen from the core.
///
/// # Contract
/// - `bulk_index` returns `Err` only for batch-level failures (nothing usable
///   came back). Per-document rejections are `Ok` with a `rejection` inside.
/// - `update_aliases` applies every action or none of them.
/// - Nothing here retries. A failure is reported, never swallowed.
#[async_trait]
pub trait SearchBackend: std::fmt::Debug + Send + Sync {
    /// 🏗️ Create a physical index, optionally with a settings/mappings payload.
    async fn create_index(&self, name: &str, settings: Option<&str>) -> Result<(), BackendError>;

    /// 📦 Index `documents` into `index` in one request.
    async fn bulk_index(
        &self,
        index: &str,
        documents: &[Document],
        refresh: bool,
    ) -> Result<Vec<BulkItemOutcome>, BackendError>;

    /// 📚 Names of every index in the catalog.
    async fn list_indices(&self) -> Result<Vec<String>, BackendError>;

    /// 🔀 Apply all `actions` atomically.
    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<(), BackendError>;

    /// 🔗 Which indices currently carry `alias`. Unknown alias → empty.
    async fn aliased_indices(&self, alias: &str) -> Result<Vec<String>, BackendError>;
}

/// 🎛️ Which backend to talk to. Externally tagged:
///
/// ```toml
/// [backend.Elasticsearch]
/// url = "http://localhost:9200"
/// ```
#[derive(Debug, Deserialize, Clone)]
pub enum BackendConfig {
    Elasticsearch(ElasticsearchConfig),
    /// 🧪 Everything in RAM. For dry runs and for tests. Not for prod.
    InMemory,
}

/// 🎭 The many faces of a backend. Dispatches by `match`, so the writer's
/// flush task never needs a trait object.
#[derive(Debug, Clone)]
pub enum Backend {
    Elasticsearch(ElasticsearchBackend),
    InMemory(InMemoryBackend),
}

impl Backend {
    /// 🚀 Resolve and connect the configured backend.
    pub async fn from_config(config: &BackendConfig) -> Result<Self, BackendError> {
        match config {
            BackendConfig::Elasticsearch(es) => {
                Ok(Backend::Elasticsearch(ElasticsearchBackend::new(es.clone()).await?))
            }
            BackendConfig::InMemory => Ok(Backend::InMemory(InMemoryBackend::new())),
        }
    }
}

#[async_trait]
impl SearchBackend for Backend {
    async fn create_index(&self, name: &str, settings: Option<&str>) -> Result<(), BackendError> {
        match self {
            Backend::Elasticsearch(es) => es.create_index(name, settings).await,
            Backend::InMemory(mem) => mem.create_index(name, settings).await,
        }
    }

    async fn bulk_index(
        &self,
        index: &str,
        documents: &[Document],
        refresh: bool,
    ) -> Result<Vec<BulkItemOutcome>, BackendError> {
        match self {
            Backend::Elasticsearch(es) => es.bulk_index(index, documents, refresh).await,
            Backend::InMemory(mem) => mem.bulk_index(index, documents, refresh).await,
        }
    }

    async fn list_indices(&self) -> Result<Vec<String>, BackendError> {
        match self {
            Backend::Elasticsearch(es) => es.list_indices().await,
            Backend::InMemory(mem) => mem.list_indices().await,
        }
    }

    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<(), BackendError> {
        match self {
            Backend::Elasticsearch(es) => es.update_aliases(actions).await,
            Backend::InMemory(mem) => mem.update_aliases(actions).await,
        }
    }

    async fn aliased_indices(&self, alias: &str) -> Result<Vec<String>, BackendError> {
        match self {
            Backend::Elasticsearch(es) => es.aliased_indices(alias).await,
            Backend::InMemory(mem) => mem.aliased_indices(alias).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn the_one_where_the_in_memory_config_needs_no_network() {
        let backend = Backend::from_config(&BackendConfig::InMemory)
            .await
            .expect("💀 RAM should always be reachable");
        backend
            .create_index("products_1", None)
            .await
            .expect("💀 could not create an index in RAM");
        assert_eq!(
            backend.list_indices().await.expect("💀 listing failed"),
            vec!["products_1".to_string()]
        );
    }
}
