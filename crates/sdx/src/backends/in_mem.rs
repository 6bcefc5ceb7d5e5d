//! # Previously, on swapdex...
//!
//! 🎬 The cluster was down. Or the laptop was on a plane. Or CI had no Docker.
//! Someone still needed to prove that an alias swap deletes exactly the right
//! indices. So someone wrote a cluster that lives entirely in RAM, gone the
//! moment you blink.
//!
//! That someone was this module.
//!
//! [`InMemoryBackend`] is a complete [`SearchBackend`]: indices, documents,
//! aliases, and an alias update that is genuinely all-or-nothing (we apply the
//! actions to a scratch copy and only swap it in if every action succeeded).
//! It also has a drawer full of fault injectors, because testing the happy
//! path only is how you end up reading this at 3am.
//!
//! 🦆
//!
//! ⚠️ This is for tests and dry runs. If you're deploying this to prod,
//! please also deploy a therapist.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::trace;

use crate::backends::{BulkItemOutcome, Rejection, SearchBackend};
use crate::common::Document;
use crate::errors::BackendError;
use crate::retention::AliasAction;

/// 🗄️ One index, as RAM remembers it.
#[derive(Debug, Clone, Default)]
struct StoredIndex {
    settings: Option<String>,
    documents: BTreeMap<String, Vec<u8>>,
    aliases: BTreeSet<String>,
}

/// 💣 Things we can make go wrong on purpose.
#[derive(Debug, Default)]
struct Faults {
    index_creation: Option<String>,
    failing_bulk_requests: usize,
    rejections: HashMap<String, Rejection>,
    dropped_items: usize,
    reversed_items: bool,
    bulk_delay: Option<Duration>,
    alias_updates: Option<String>,
}

#[derive(Debug, Default)]
struct ClusterState {
    indices: BTreeMap<String, StoredIndex>,
    faults: Faults,
    bulk_requests: u64,
}

/// 📦 A search cluster that never forgets, until the process exits.
///
/// Clone-able: every clone shares the same state behind an `Arc<Mutex<..>>`,
/// so a test can hand one clone to the writer and keep another to peek inside.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    state: Arc<Mutex<ClusterState>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 💣 Make every following `create_index` fail with `reason`.
    pub async fn fail_index_creation(&self, reason: impl Into<String>) {
        self.state.lock().await.faults.index_creation = Some(reason.into());
    }

    /// 💣 Make the next `count` bulk requests fail at the transport level.
    pub async fn fail_next_bulk_requests(&self, count: usize) {
        self.state.lock().await.faults.failing_bulk_requests = count;
    }

    /// 💣 Reject document `id` with a structured error, every time it shows up.
    pub async fn reject_document(
        &self,
        id: impl Into<String>,
        error_type: impl Into<String>,
        reason: impl Into<String>,
    ) {
        self.state.lock().await.faults.rejections.insert(
            id.into(),
            Rejection {
                error_type: error_type.into(),
                reason: reason.into(),
            },
        );
    }

    /// 💣 Leave the last `count` items out of every bulk response.
    /// The documents are still stored; the response just forgets to mention them.
    pub async fn drop_bulk_response_items(&self, count: usize) {
        self.state.lock().await.faults.dropped_items = count;
    }

    /// 💣 Answer every bulk request with its items in reverse order.
    /// The documents are still stored; the response just lists them backwards.
    pub async fn reverse_bulk_response_items(&self) {
        self.state.lock().await.faults.reversed_items = true;
    }

    /// 🐌 Make every bulk request take at least `delay`.
    pub async fn delay_bulk_requests(&self, delay: Duration) {
        self.state.lock().await.faults.bulk_delay = Some(delay);
    }

    /// 💣 Make every following alias update fail with `reason`.
    pub async fn fail_alias_updates(&self, reason: impl Into<String>) {
        self.state.lock().await.faults.alias_updates = Some(reason.into());
    }

    /// 🔍 Snapshot of the documents stored in `index`.
    pub async fn documents(&self, index: &str) -> Option<BTreeMap<String, Vec<u8>>> {
        self.state
            .lock()
            .await
            .indices
            .get(index)
            .map(|stored| stored.documents.clone())
    }

    /// 🔍 The settings payload `index` was created with.
    pub async fn settings(&self, index: &str) -> Option<String> {
        self.state
            .lock()
            .await
            .indices
            .get(index)
            .and_then(|stored| stored.settings.clone())
    }

    /// 📊 How many bulk requests reached us, failed ones included.
    pub async fn bulk_request_count(&self) -> u64 {
        self.state.lock().await.bulk_requests
    }
}

/// 🔀 Apply one alias action to a scratch copy of the catalog.
fn apply_alias_action(
    indices: &mut BTreeMap<String, StoredIndex>,
    action: &AliasAction,
) -> Result<(), BackendError> {
    match action {
        AliasAction::Add { alias, index } => {
            let stored = indices
                .get_mut(index)
                .ok_or_else(|| BackendError::IndexNotFound(index.clone()))?;
            stored.aliases.insert(alias.clone());
        }
        AliasAction::Remove { alias, index } => {
            // -- ✂️ unbinding an alias that is not there is a no-op, same as a real cluster
            let stored = indices
                .get_mut(index)
                .ok_or_else(|| BackendError::IndexNotFound(index.clone()))?;
            stored.aliases.remove(alias);
        }
        AliasAction::RemoveIndex { index } => {
            indices
                .remove(index)
                .ok_or_else(|| BackendError::IndexNotFound(index.clone()))?;
        }
    }
    Ok(())
}

#[async_trait]
impl SearchBackend for InMemoryBackend {
    async fn create_index(&self, name: &str, settings: Option<&str>) -> Result<(), BackendError> {
        let mut state = self.state.lock().await;
        if let Some(reason) = &state.faults.index_creation {
            return Err(BackendError::Status {
                status: 400,
                body: reason.clone(),
            });
        }
        if state.indices.contains_key(name) {
            return Err(BackendError::Status {
                status: 400,
                body: format!("resource_already_exists_exception: index [{name}] already exists"),
            });
        }
        state.indices.insert(
            name.to_string(),
            StoredIndex {
                settings: settings.map(str::to_string),
                ..StoredIndex::default()
            },
        );
        trace!("🏗️ created in-memory index {}", name);
        Ok(())
    }

    async fn bulk_index(
        &self,
        index: &str,
        documents: &[Document],
        _refresh: bool,
    ) -> Result<Vec<BulkItemOutcome>, BackendError> {
        // -- 🐌 sleep outside the lock so a slow "network" doesn't freeze test inspection
        let delay = self.state.lock().await.faults.bulk_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock().await;
        state.bulk_requests += 1;

        if state.faults.failing_bulk_requests > 0 {
            state.faults.failing_bulk_requests -= 1;
            return Err(BackendError::Transport(
                "connection reset by peer (injected)".to_string(),
            ));
        }

        let ClusterState {
            indices, faults, ..
        } = &mut *state;
        let stored = indices
            .get_mut(index)
            .ok_or_else(|| BackendError::IndexNotFound(index.to_string()))?;

        let mut outcomes: Vec<BulkItemOutcome> = documents
            .iter()
            .map(|document| match faults.rejections.get(&document.id) {
                Some(rejection) => BulkItemOutcome {
                    id: document.id.clone(),
                    rejection: Some(rejection.clone()),
                },
                None => {
                    stored
                        .documents
                        .insert(document.id.clone(), document.body.clone());
                    BulkItemOutcome::acknowledged(document.id.clone())
                }
            })
            .collect();

        let keep = outcomes.len().saturating_sub(faults.dropped_items);
        outcomes.truncate(keep);
        if faults.reversed_items {
            outcomes.reverse();
        }
        Ok(outcomes)
    }

    async fn list_indices(&self) -> Result<Vec<String>, BackendError> {
        Ok(self.state.lock().await.indices.keys().cloned().collect())
    }

    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<(), BackendError> {
        let mut state = self.state.lock().await;
        if let Some(reason) = &state.faults.alias_updates {
            return Err(BackendError::Status {
                status: 500,
                body: reason.clone(),
            });
        }

        // -- 🔒 all or nothing: rehearse on a copy, commit only a clean run
        let mut scratch = state.indices.clone();
        for action in actions {
            apply_alias_action(&mut scratch, action)?;
        }
        state.indices = scratch;
        Ok(())
    }

    async fn aliased_indices(&self, alias: &str) -> Result<Vec<String>, BackendError> {
        Ok(self
            .state
            .lock()
            .await
            .indices
            .iter()
            .filter(|(_, stored)| stored.aliases.contains(alias))
            .map(|(name, _)| name.clone())
            .collect())
    }
}
