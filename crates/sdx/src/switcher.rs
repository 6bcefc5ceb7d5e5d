//! 🔀 The GenerationSwitcher: blue/green reindex, one alias at a time.
//!
//! 🎬 *[the alias `products` points at last week's index. readers are happy.]*
//! *[a new index is born next to it. it fills up in silence.]*
//! *[one atomic request later, every reader is looking at the new one, and
//! nobody saw the seams.]*
//!
//! Lifecycle: `new` creates the generation (state `Created`), somebody fills it
//! through a writer, `switch` repoints the alias and collects the old
//! generations according to the retention policy (state `Switched`).
//!
//! The whole cutover is ONE `update_aliases` call: `Add` for us first, then the
//! retention plan. Either all of it lands or none of it does, so readers never
//! see zero or two generations behind the alias. The backend promises that
//! atomicity; we just refuse to split the request. 🦆

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use crate::backends::SearchBackend;
use crate::errors::{Error, Result};
use crate::generation::{Generation, old_generations};
use crate::retention::{AliasAction, Retention, plan};

/// 🔧 What the switcher needs to know up front.
#[derive(Debug, Deserialize, Clone)]
pub struct SwitcherConfig {
    /// 🏷️ The stable alias readers query.
    pub alias: String,
    /// 📜 Optional settings/mappings payload for the new generation, sent as-is.
    #[serde(default)]
    pub settings: Option<String>,
}

/// 🚦 Where a switcher is in its short life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchState {
    /// 🏗️ Generation exists, alias still points elsewhere.
    Created,
    /// ✅ Alias points here now. Terminal.
    Switched,
}

/// 🧾 Receipt of a successful switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchReport {
    /// 📛 The generation the alias now points at.
    pub generation: String,
    /// 🔀 The exact action list that was applied, `Add` first.
    pub actions: Vec<AliasAction>,
}

impl SwitchReport {
    /// ✂️ Old generations that were unbound but kept.
    pub fn unbound(&self) -> Vec<&str> {
        self.actions
            .iter()
            .filter_map(|action| match action {
                AliasAction::Remove { index, .. } => Some(index.as_str()),
                _ => None,
            })
            .collect()
    }

    /// 💀 Old generations that were deleted.
    pub fn deleted(&self) -> Vec<&str> {
        self.actions
            .iter()
            .filter_map(|action| match action {
                AliasAction::RemoveIndex { index } => Some(index.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// 🔀 Owns one generation of one alias, from birth to cutover.
#[derive(Debug)]
pub struct GenerationSwitcher<B> {
    backend: Arc<B>,
    alias: String,
    generation: Generation,
    state: SwitchState,
}

impl<B: SearchBackend> GenerationSwitcher<B> {
    /// 🏗️ Create a fresh generation of `config.alias`, named after the current UTC time.
    ///
    /// If the backend refuses, there is no switcher. Do not write anywhere.
    pub async fn new(backend: Arc<B>, config: SwitcherConfig) -> Result<Self> {
        Self::new_at(backend, config, Utc::now()).await
    }

    /// 🕰️ Same as [`GenerationSwitcher::new`], with the clock supplied by the caller.
    pub async fn new_at(backend: Arc<B>, config: SwitcherConfig, now: DateTime<Utc>) -> Result<Self> {
        if config.alias.is_empty() {
            return Err(Error::Construction {
                what: "generation".to_string(),
                reason: "alias is empty".to_string(),
            });
        }

        let generation = Generation::new(&config.alias, now);
        backend
            .create_index(&generation.name, config.settings.as_deref())
            .await
            .map_err(|err| Error::Construction {
                what: format!("generation {}", generation.name),
                reason: err.to_string(),
            })?;
        info!(
            "🏗️ created generation {} for alias {}",
            generation.name, config.alias
        );

        Ok(Self {
            backend,
            alias: config.alias,
            generation,
            state: SwitchState::Created,
        })
    }

    /// 📛 The physical index to point writers at.
    pub fn name(&self) -> &str {
        &self.generation.name
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn generation(&self) -> &Generation {
        &self.generation
    }

    pub fn state(&self) -> SwitchState {
        self.state
    }

    /// 🔀 Point the alias at this generation and apply `retention` to the old ones.
    ///
    /// On any error the alias binding is exactly what it was before the call and
    /// the switcher stays `Created`, so the caller may try again.
    pub async fn switch(&mut self, retention: Retention) -> Result<SwitchReport> {
        if self.state == SwitchState::Switched {
            return Err(Error::AlreadySwitched(self.generation.name.clone()));
        }

        let catalog = self
            .backend
            .list_indices()
            .await
            .map_err(|source| Error::Catalog {
                alias: self.alias.clone(),
                source,
            })?;
        let old = old_generations(&self.alias, &self.generation.name, catalog);
        debug!(
            "📚 alias {} has {} old generations: {:?}",
            self.alias,
            old.len(),
            old
        );

        let mut actions = Vec::with_capacity(old.len() + 1);
        actions.push(AliasAction::Add {
            alias: self.alias.clone(),
            index: self.generation.name.clone(),
        });
        actions.extend(plan(&self.alias, &old, retention));

        self.backend
            .update_aliases(&actions)
            .await
            .map_err(|source| Error::AliasUpdate {
                alias: self.alias.clone(),
                source,
            })?;
        self.state = SwitchState::Switched;

        let report = SwitchReport {
            generation: self.generation.name.clone(),
            actions,
        };
        info!(
            "🔀 alias {} now points at {} ({} unbound, {} deleted)",
            self.alias,
            report.generation,
            report.unbound().len(),
            report.deleted().len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::InMemoryBackend;
    use crate::errors::BackendError;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 3, 4, 5)
            .single()
            .expect("💀 the calendar disagrees with this test")
    }

    fn config(alias: &str) -> SwitcherConfig {
        SwitcherConfig {
            alias: alias.to_string(),
            settings: None,
        }
    }

    /// 🧪 Run `days` full cycles of alias `products`, one per day, with `retention`.
    async fn switch_days(backend: &Arc<InMemoryBackend>, days: u32, retention: Retention) {
        for day in 1..=days {
            let mut switcher = GenerationSwitcher::new_at(Arc::clone(backend), config("products"), at(day))
                .await
                .expect("💀 generation should be created");
            switcher.switch(retention).await.expect("💀 switch should work");
        }
    }

    #[tokio::test]
    async fn the_one_where_the_first_generation_is_born() {
        let backend = Arc::new(InMemoryBackend::new());
        let switcher = GenerationSwitcher::new_at(
            Arc::clone(&backend),
            SwitcherConfig {
                alias: "products".to_string(),
                settings: Some(r#"{"settings":{"number_of_shards":1}}"#.to_string()),
            },
            at(2),
        )
        .await
        .expect("💀 generation should be created");

        assert_eq!(switcher.name(), "products_20240102030405");
        assert_eq!(switcher.alias(), "products");
        assert_eq!(switcher.state(), SwitchState::Created);
        assert_eq!(
            backend.settings("products_20240102030405").await.as_deref(),
            Some(r#"{"settings":{"number_of_shards":1}}"#)
        );
        // -- 🙈 nobody reads it yet
        assert!(
            backend
                .aliased_indices("products")
                .await
                .expect("💀 lookup")
                .is_empty()
        );
    }

    #[tokio::test]
    async fn the_one_where_the_backend_refuses_to_create_anything() {
        let backend = Arc::new(InMemoryBackend::new());
        backend.fail_index_creation("cluster_block_exception").await;
        let result = GenerationSwitcher::new_at(backend, config("products"), at(2)).await;
        match result {
            Err(Error::Construction { reason, .. }) => {
                assert!(reason.contains("cluster_block_exception"))
            }
            other => panic!("💀 expected a construction error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn the_one_where_an_empty_alias_never_reaches_the_backend() {
        let backend = Arc::new(InMemoryBackend::new());
        let result = GenerationSwitcher::new_at(Arc::clone(&backend), config(""), at(2)).await;
        assert!(matches!(result, Err(Error::Construction { .. })));
        assert!(backend.list_indices().await.expect("💀 list").is_empty());
    }

    #[tokio::test]
    async fn the_one_where_the_very_first_switch_has_nothing_to_clean() {
        let backend = Arc::new(InMemoryBackend::new());
        let mut switcher = GenerationSwitcher::new_at(Arc::clone(&backend), config("products"), at(2))
            .await
            .expect("💀 generation should be created");

        let report = switcher
            .switch(Retention::Latest(0))
            .await
            .expect("💀 switch should work");

        assert_eq!(
            report.actions,
            vec![AliasAction::Add {
                alias: "products".to_string(),
                index: "products_20240102030405".to_string(),
            }]
        );
        assert_eq!(switcher.state(), SwitchState::Switched);
        assert_eq!(
            backend.aliased_indices("products").await.expect("💀 lookup"),
            vec!["products_20240102030405".to_string()]
        );
    }

    #[tokio::test]
    async fn the_one_where_retention_one_keeps_one_backup() {
        let backend = Arc::new(InMemoryBackend::new());
        switch_days(&backend, 3, Retention::KeepAll).await;

        let mut switcher = GenerationSwitcher::new_at(Arc::clone(&backend), config("products"), at(4))
            .await
            .expect("💀 generation should be created");
        let report = switcher
            .switch(Retention::Latest(1))
            .await
            .expect("💀 switch should work");

        assert_eq!(report.generation, "products_20240104030405");
        assert_eq!(
            report.deleted(),
            vec!["products_20240101030405", "products_20240102030405"]
        );
        assert_eq!(report.unbound(), vec!["products_20240103030405"]);
        assert_eq!(
            backend.list_indices().await.expect("💀 list"),
            vec![
                "products_20240103030405".to_string(),
                "products_20240104030405".to_string(),
            ]
        );
        assert_eq!(
            backend.aliased_indices("products").await.expect("💀 lookup"),
            vec!["products_20240104030405".to_string()],
            "exactly one generation behind the alias"
        );
    }

    #[tokio::test]
    async fn the_one_where_keep_all_deletes_nothing_but_still_moves_the_alias() {
        let backend = Arc::new(InMemoryBackend::new());
        switch_days(&backend, 4, Retention::from(-1)).await;

        assert_eq!(backend.list_indices().await.expect("💀 list").len(), 4);
        assert_eq!(
            backend.aliased_indices("products").await.expect("💀 lookup"),
            vec!["products_20240104030405".to_string()]
        );
    }

    #[tokio::test]
    async fn the_one_where_zero_retention_leaves_only_the_new_generation() {
        let backend = Arc::new(InMemoryBackend::new());
        switch_days(&backend, 3, Retention::KeepAll).await;
        switch_days_from(&backend, 4, Retention::Latest(0)).await;

        assert_eq!(
            backend.list_indices().await.expect("💀 list"),
            vec!["products_20240104030405".to_string()]
        );
    }

    async fn switch_days_from(backend: &Arc<InMemoryBackend>, day: u32, retention: Retention) {
        let mut switcher = GenerationSwitcher::new_at(Arc::clone(backend), config("products"), at(day))
            .await
            .expect("💀 generation should be created");
        switcher.switch(retention).await.expect("💀 switch should work");
    }

    #[tokio::test]
    async fn the_one_where_the_neighbours_are_left_alone() {
        let backend = Arc::new(InMemoryBackend::new());
        for bystander in ["orders_20240101030405", "products_backup", ".kibana"] {
            backend
                .create_index(bystander, None)
                .await
                .expect("💀 could not create bystander");
        }
        switch_days(&backend, 2, Retention::Latest(0)).await;

        assert_eq!(
            backend.list_indices().await.expect("💀 list"),
            vec![
                ".kibana".to_string(),
                "orders_20240101030405".to_string(),
                "products_20240102030405".to_string(),
                "products_backup".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn the_one_where_the_alias_update_bounces_and_nothing_moves() {
        let backend = Arc::new(InMemoryBackend::new());
        switch_days(&backend, 1, Retention::KeepAll).await;

        let mut switcher = GenerationSwitcher::new_at(Arc::clone(&backend), config("products"), at(2))
            .await
            .expect("💀 generation should be created");
        backend.fail_alias_updates("es_rejected_execution_exception").await;

        let result = switcher.switch(Retention::Latest(0)).await;
        assert!(matches!(
            result,
            Err(Error::AliasUpdate {
                source: BackendError::Status { status: 500, .. },
                ..
            })
        ));
        assert_eq!(switcher.state(), SwitchState::Created);
        assert_eq!(
            backend.aliased_indices("products").await.expect("💀 lookup"),
            vec!["products_20240101030405".to_string()],
            "the old binding must survive a failed switch"
        );
        assert_eq!(backend.list_indices().await.expect("💀 list").len(), 2);
    }

    #[tokio::test]
    async fn the_one_where_switching_twice_is_a_caller_bug() {
        let backend = Arc::new(InMemoryBackend::new());
        let mut switcher = GenerationSwitcher::new_at(Arc::clone(&backend), config("products"), at(2))
            .await
            .expect("💀 generation should be created");
        switcher
            .switch(Retention::KeepAll)
            .await
            .expect("💀 first switch should work");

        let again = switcher.switch(Retention::Latest(0)).await;
        assert!(matches!(again, Err(Error::AlreadySwitched(name)) if name == "products_20240102030405"));
    }
}
