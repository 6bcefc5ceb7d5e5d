//! 🎬 *[camera pans across a dimly lit server room]*
//! 🎬 "In a world where aliases point at stale data..."
//! 🎬 "One supervisor dared to reindex them all."
//! 🎬 *[record scratch]* 🦆
//!
//! 📦 The Supervisor runs one whole ingestion cycle, start to cutover:
//!
//! 1. 📜 resolve the settings payload for the new generation
//! 2. 🏗️ create the generation (no generation, no run)
//! 3. 📦 point a [`BatchedWriter`] at it
//! 4. 📂 stream the NDJSON source into the writer, batch by batch
//! 5. 🗑️ close the writer, waiting for the tail of outcomes
//! 6. 🚧 the failure gate: too many failed documents, or any bulk request that
//!    failed as a whole, and we stop here. The alias keeps pointing at the old
//!    generation and the new one stays around, unaliased, for inspection.
//! 7. 🔀 switch the alias and apply retention
//!
//! The writer is always closed, even when the source blows up halfway, so no
//! flush task outlives the run.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use tracing::{debug, info, trace, warn};

use crate::app_config::{AppConfig, GenerationConfig};
use crate::backends::{Backend, SearchBackend};
use crate::errors::{DocumentError, Error};
use crate::progress::ProgressMetrics;
use crate::source::NdjsonSource;
use crate::switcher::{GenerationSwitcher, SwitcherConfig};
use crate::writer::{BatchedWriter, OutcomeSink, WriterStats};

/// 🔎 How many failure messages we keep around for the summary.
const FAILURE_SAMPLES: usize = 5;

/// 🧾 What one successful cycle did.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub alias: String,
    /// 📛 the generation the alias points at now
    pub generation: String,
    pub documents_read: u64,
    pub bytes_read: u64,
    pub writer: WriterStats,
    /// ✂️ old generations kept, just without the alias
    pub unbound: Vec<String>,
    /// 💀 old generations deleted
    pub deleted: Vec<String>,
    /// 🔎 the first few per-document failures, `id: reason`
    pub failure_samples: Vec<String>,
    pub elapsed: Duration,
}

/// 📬 The run's outcome sink: logs what went wrong and keeps a few examples.
/// Counting is the writer's job; see [`BatchedWriter::stats`].
#[derive(Debug, Default)]
struct LoggingOutcomes {
    batch_errors: AtomicU64,
    samples: Mutex<Vec<String>>,
}

impl LoggingOutcomes {
    fn keep_sample(&self, sample: String) {
        let mut samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        if samples.len() < FAILURE_SAMPLES {
            samples.push(sample);
        }
    }

    fn samples(&self) -> Vec<String> {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl OutcomeSink for LoggingOutcomes {
    fn on_index_success(&self, id: &str) {
        trace!("✅ indexed {}", id);
    }

    fn on_index_failure(&self, id: &str, error: DocumentError) {
        warn!("💀 document {} was not indexed: {}", id, error);
        self.keep_sample(format!("{id}: {error}"));
    }

    fn on_error(&self, error: Error) {
        self.batch_errors.fetch_add(1, Ordering::Relaxed);
        warn!("🚨 {}", error);
        self.keep_sample(error.to_string());
    }
}

/// 📦 The Supervisor: hovers over one ingestion cycle asking "is it done yet?"
pub(crate) struct Supervisor {
    app_config: AppConfig,
}

impl Supervisor {
    pub(crate) fn new(app_config: AppConfig) -> Self {
        Self { app_config }
    }

    /// 🚀 Connect the configured backend and run the cycle against it.
    pub(crate) async fn run(&self) -> Result<RunSummary> {
        let backend = Backend::from_config(&self.app_config.backend)
            .await
            .context("💀 Could not connect to the search backend")?;
        ingest(&self.app_config, Arc::new(backend)).await
    }
}

/// 📜 Inline settings win; otherwise read the file; otherwise no body at all.
async fn resolve_settings(generation: &GenerationConfig) -> Result<Option<String>> {
    if let Some(settings) = &generation.settings {
        return Ok(Some(settings.clone()));
    }
    match &generation.settings_file {
        Some(path) => {
            let settings = tokio::fs::read_to_string(Path::new(path))
                .await
                .with_context(|| format!("💀 Could not read settings file '{path}'"))?;
            Ok(Some(settings))
        }
        None => Ok(None),
    }
}

/// 🔄 Source → writer, one batch at a time.
async fn stream(
    source: &mut NdjsonSource,
    writer: &BatchedWriter,
    progress: &mut ProgressMetrics,
) -> Result<()> {
    while let Some(batch) = source.next_batch().await? {
        let count = batch.documents.len() as u64;
        for document in batch.documents {
            writer
                .submit(document.id, document.body)
                .context("💀 The writer refused a document")?;
        }
        progress.record_outcomes(writer.stats());
        progress.update(batch.bytes_read, count);
    }
    Ok(())
}

/// 🎬 One full cycle against an already connected backend.
pub(crate) async fn ingest<B>(config: &AppConfig, backend: Arc<B>) -> Result<RunSummary>
where
    B: SearchBackend + 'static,
{
    let started = Instant::now();
    let alias = config.generation.alias.clone();

    let settings = resolve_settings(&config.generation).await?;
    let mut switcher = GenerationSwitcher::new(
        Arc::clone(&backend),
        SwitcherConfig {
            alias: alias.clone(),
            settings,
        },
    )
    .await
    .with_context(|| format!("💀 Could not create a new generation for alias '{alias}'"))?;
    let generation = switcher.name().to_string();

    let outcomes = Arc::new(LoggingOutcomes::default());
    let writer = BatchedWriter::new(
        Arc::clone(&backend),
        generation.clone(),
        config.writer.clone(),
        outcomes.clone(),
    )?;

    let mut source = NdjsonSource::open(config.source.clone()).await?;
    let mut progress = ProgressMetrics::new(generation.clone(), source.file_size());

    let streamed = stream(&mut source, &writer, &mut progress).await;
    // -- 🗑️ close no matter what, so the flush task never outlives the run
    let closed = writer.close(config.generation.close_timeout()).await;
    let stats = writer.stats();
    progress.record_outcomes(stats);
    progress.finish();

    streamed.with_context(|| {
        format!("💀 Ingestion into {generation} stopped early; the alias was not switched")
    })?;
    closed.with_context(|| {
        format!("💀 Could not finish flushing {generation}; the alias was not switched")
    })?;
    debug!("📊 writer stats for {}: {:?}", generation, stats);

    // 🚧 the failure gate
    let batch_errors = outcomes.batch_errors.load(Ordering::Relaxed);
    if batch_errors > 0 {
        bail!(
            "💀 {} bulk requests into {} failed as a whole; the alias '{}' was not switched and {} was left in place",
            batch_errors,
            generation,
            alias,
            generation
        );
    }
    if stats.failed > config.generation.max_failed_documents {
        bail!(
            "💀 {} documents failed to index into {} (allowed: {}); the alias '{}' was not switched and {} was left in place",
            stats.failed,
            generation,
            config.generation.max_failed_documents,
            alias,
            generation
        );
    }

    let report = switcher
        .switch(config.generation.retention)
        .await
        .with_context(|| format!("💀 Could not switch alias '{alias}' to {generation}"))?;

    let summary = RunSummary {
        alias,
        generation,
        documents_read: progress.total_docs(),
        bytes_read: progress.total_bytes(),
        writer: stats,
        unbound: report.unbound().into_iter().map(str::to_string).collect(),
        deleted: report.deleted().into_iter().map(str::to_string).collect(),
        failure_samples: outcomes.samples(),
        elapsed: started.elapsed(),
    };
    info!(
        "✅ {} now serves {} documents from {} in {:?}",
        summary.alias, summary.writer.indexed, summary.generation, summary.elapsed
    );
    Ok(summary)
}
