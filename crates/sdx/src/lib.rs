//! 🔀 sdx: swapdex. Fill a fresh index, flip the alias, sweep up the old ones.
//!
//! Two halves:
//! - [`BatchedWriter`]: producers `submit` documents without waiting; bulk
//!   requests go out on a timer or when a batch fills up; every document hears
//!   back exactly once through an [`OutcomeSink`].
//! - [`GenerationSwitcher`]: blue/green reindex behind a stable alias, with a
//!   retention policy for the generations left behind.
//!
//! [`run`] glues both to an NDJSON file for the CLI. 🦆

pub mod app_config;
pub mod backends;
pub mod common;
pub mod errors;
pub mod generation;
pub mod progress;
pub mod retention;
pub mod source;
mod supervisors;
pub mod switcher;
pub mod writer;

use anyhow::Result;

use crate::app_config::AppConfig;
use crate::supervisors::Supervisor;

pub use backends::{Backend, BackendConfig, ElasticsearchBackend, InMemoryBackend, SearchBackend};
pub use common::Document;
pub use errors::{BackendError, DocumentError, Error};
pub use retention::{AliasAction, Retention};
pub use supervisors::RunSummary;
pub use switcher::{GenerationSwitcher, SwitchReport, SwitchState, SwitcherConfig};
pub use writer::{BatchedWriter, Callbacks, OutcomeSink, WriterConfig, WriterStats};

/// 🚀 One full ingestion cycle: new generation, backfill, gate, switch.
pub async fn run(app_config: AppConfig) -> Result<RunSummary> {
    Supervisor::new(app_config).run().await
}
