//! 🔧 App Configuration: the sacred TOML-to-struct pipeline, now with aliases.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the fridge.
//! In the junk drawer. Nothing." -- every developer at 3am 🦆
//!
//! 🏗️ Powered by Figment: `SDX_*` environment variables first, then an optional
//! TOML file on top. TOML wins on conflicts.
//!
//! ```toml
//! [backend.Elasticsearch]
//! url = "http://localhost:9200"
//!
//! [source]
//! file_name = "products.ndjson"
//!
//! [writer]
//! flush_interval_ms = 1000
//!
//! [generation]
//! alias = "products"
//! retention = 1
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::Deserialize;
use tracing::info;

use crate::backends::BackendConfig;
use crate::retention::Retention;
use crate::source::SourceConfig;
use crate::writer::WriterConfig;

/// 📦 Everything one ingestion cycle needs to know.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub source: SourceConfig,
    #[serde(default)]
    pub writer: WriterConfig,
    pub generation: GenerationConfig,
}

/// 🕰️ The blue/green part: which alias, what to create, what to keep.
#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// 🏷️ stable alias readers query
    pub alias: String,
    /// 📜 inline settings/mappings body for the new generation
    #[serde(default)]
    pub settings: Option<String>,
    /// 📜 or the same thing from a file; inline wins if both are set
    #[serde(default)]
    pub settings_file: Option<String>,
    /// 🗑️ old generations kept after the switch; negative keeps all
    #[serde(default)]
    pub retention: Retention,
    /// 🚧 more failed documents than this and we don't switch
    #[serde(default)]
    pub max_failed_documents: u64,
    /// ⏱️ how long `close` may take to flush the tail
    #[serde(default = "default_close_timeout_secs")]
    pub close_timeout_secs: u64,
}

fn default_close_timeout_secs() -> u64 {
    60
}

impl GenerationConfig {
    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }
}

/// 🚀 Load the config: env vars (`SDX_*`), plus the TOML file if one was given.
pub fn load_config(config_file_name: Option<&Path>) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new().merge(Env::prefixed("SDX_").split("__"));
    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (SDX_*). \
             The file exists in our hearts, but apparently not on disk, or not in this shape.",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (SDX_*). \
                 No file was provided, so this one's all on the environment."
            .to_string(),
    };

    config.extract().context(context_msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_test_config(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("💀 no temp file. the filesystem said 'new phone who dis'.");
        file.write_all(contents.as_bytes())
            .expect("💀 failed to write test config");
        file
    }

    #[test]
    fn the_one_where_a_full_config_lands_in_the_right_boxes() {
        let file = write_test_config(
            r#"
            [backend.Elasticsearch]
            url = "http://localhost:9200"
            api_key = "c2VjcmV0"

            [source]
            file_name = "products.ndjson"
            id_field = "sku"

            [writer]
            flush_interval_ms = 250
            max_batch_docs = 500

            [generation]
            alias = "products"
            retention = 2
            max_failed_documents = 10
            "#,
        );

        let config = load_config(Some(file.path())).expect("💀 full config should parse");

        match &config.backend {
            BackendConfig::Elasticsearch(es) => {
                assert_eq!(es.url, "http://localhost:9200");
                assert_eq!(es.api_key.as_deref(), Some("c2VjcmV0"));
                assert_eq!(es.request_timeout_secs, 30);
            }
            other => panic!("💀 expected the Elasticsearch backend, serde took us to {other:?}"),
        }
        assert_eq!(config.source.id_field, "sku");
        assert_eq!(config.source.batch_size_docs, 1000);
        assert_eq!(config.writer.flush_interval_ms, 250);
        assert_eq!(config.writer.max_batch_docs, 500);
        assert!(config.writer.refresh);
        assert_eq!(config.generation.retention, Retention::Latest(2));
        assert_eq!(config.generation.max_failed_documents, 10);
        assert_eq!(config.generation.close_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn the_one_where_defaults_show_up_uninvited_but_helpful() {
        let file = write_test_config(
            r#"
            backend = "InMemory"

            [source]
            file_name = "products.ndjson"

            [generation]
            alias = "products"
            "#,
        );

        let config: AppConfig = Figment::new()
            .merge(Toml::file(file.path()))
            .extract()
            .expect("💀 defaults should fill the gaps");

        assert!(matches!(config.backend, BackendConfig::InMemory));
        assert_eq!(config.writer.flush_interval_ms, 1000);
        assert_eq!(config.writer.max_batch_docs, 10000);
        assert_eq!(config.writer.max_batch_bytes, 5 * 1024 * 1024);
        assert_eq!(config.generation.retention, Retention::KeepAll);
        assert_eq!(config.generation.max_failed_documents, 0);
        assert!(config.generation.settings.is_none());
    }

    #[test]
    fn the_one_where_negative_retention_means_keep_everything() {
        let file = write_test_config(
            r#"
            backend = "InMemory"

            [source]
            file_name = "products.ndjson"

            [generation]
            alias = "products"
            retention = -1
            "#,
        );

        let config: AppConfig = Figment::new()
            .merge(Toml::file(file.path()))
            .extract()
            .expect("💀 negative retention should parse");
        assert_eq!(config.generation.retention, Retention::KeepAll);
    }

    #[test]
    fn the_one_where_the_alias_is_not_optional() {
        let file = write_test_config(
            r#"
            backend = "InMemory"

            [source]
            file_name = "products.ndjson"

            [generation]
            retention = 1
            "#,
        );

        let result: Result<AppConfig, _> = Figment::new().merge(Toml::file(file.path())).extract();
        assert!(result.is_err());
    }
}
