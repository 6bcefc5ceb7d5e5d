//! 🎬 *[a thousand producers call `submit` at once. none of them wait for the network.]*
//! *[somewhere, a timer ticks. a batch is captured. the bulk request flies.]*
//! *[every document hears back exactly once. nobody is forgotten. nobody hears twice.]*
//!
//! 📦 The BatchedWriter: the loading dock between your producers and `_bulk`.
//!
//! 🧠 Knowledge graph:
//! - `submit` pushes into a pending batch behind a `std::sync::Mutex`. No `.await`,
//!   no I/O. The only work under the lock is a `Vec::push` and, when the batch is
//!   full, handing the whole `Vec` to the flush task.
//! - One flush task per writer (tokio), fed by an unbounded `async_channel`. It
//!   flushes whatever arrives through the channel (size-triggered, manual, final)
//!   and, on every `flush_interval` tick, whatever is pending at that moment.
//! - Hand-offs to the channel happen while holding the pending lock. That is the
//!   whole ordering story: a batch captured before `close` is always queued before
//!   the final batch, and the channel is closed under the same lock, so nothing
//!   can sneak in after it.
//! - Outcomes go to an [`OutcomeSink`]. Exactly one of `on_index_success` /
//!   `on_index_failure` per document of a delivered bulk response. A bulk request
//!   that fails as a whole gets one `on_error` and no per-document outcomes.
//!
//! ⚠️ Flushing is NOT automatic on drop. Rust does not do async drop.
//! Call `close()`. Always. If you don't, the pending documents silently
//! vanish like a developer at 4:59pm on a Friday. 🦆

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_channel::{Receiver, Sender};
use serde::Deserialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

use crate::backends::{BulkItemOutcome, SearchBackend};
use crate::common::Document;
use crate::errors::{DocumentError, Error, Result};

/// 🔧 Knobs for one writer.
#[derive(Debug, Deserialize, Clone)]
pub struct WriterConfig {
    /// ⏱️ Flush whatever is pending this often, whatever its size.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// 📦 Flush early once this many documents are pending.
    #[serde(default = "default_max_batch_docs")]
    pub max_batch_docs: usize,
    /// 📏 Flush early once the pending bodies add up to this many bytes.
    #[serde(default = "default_max_batch_bytes")]
    pub max_batch_bytes: usize,
    /// 🔄 Ask the backend to make each bulk visible to search immediately.
    #[serde(default = "default_refresh")]
    pub refresh: bool,
}

fn default_flush_interval_ms() -> u64 {
    1000
}

fn default_max_batch_docs() -> usize {
    10000
}

// -- 📏 5 MiB, the usual bulk sweet spot before clusters start sighing
fn default_max_batch_bytes() -> usize {
    5 * 1024 * 1024
}

fn default_refresh() -> bool {
    true
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval_ms(),
            max_batch_docs: default_max_batch_docs(),
            max_batch_bytes: default_max_batch_bytes(),
            refresh: default_refresh(),
        }
    }
}

impl WriterConfig {
    /// ⏱️ The timer period. `0` means "not set", which means the 1 s default.
    pub fn flush_interval(&self) -> Duration {
        match self.flush_interval_ms {
            0 => Duration::from_millis(default_flush_interval_ms()),
            ms => Duration::from_millis(ms),
        }
    }
}

/// 📬 Where outcomes are delivered.
///
/// Called from the writer's flush task, concurrently with new submissions.
/// Implementations must not assume single-threaded delivery, and should be
/// quick: a slow sink slows every following flush.
pub trait OutcomeSink: Send + Sync {
    /// ✅ The backend acknowledged document `id`.
    fn on_index_success(&self, id: &str);
    /// 💀 Document `id` was not indexed.
    fn on_index_failure(&self, id: &str, error: DocumentError);
    /// 🚨 A whole bulk request failed. Its documents get no outcome from it.
    fn on_error(&self, error: Error);
}

type SuccessFn = Box<dyn Fn(&str) + Send + Sync>;
type FailureFn = Box<dyn Fn(&str, DocumentError) + Send + Sync>;
type ErrorFn = Box<dyn Fn(Error) + Send + Sync>;

/// 🎣 An [`OutcomeSink`] made of closures, for when a whole type is too much
/// ceremony. Unset hooks are skipped; an unset batch-error hook still logs.
///
/// ```ignore
/// let outcomes = Callbacks::new()
///     .on_success(|id| println!("indexed {id}"))
///     .on_failure(|id, err| eprintln!("{id}: {err}"))
///     .on_batch_error(|err| eprintln!("{err}"));
/// ```
#[derive(Default)]
pub struct Callbacks {
    on_success: Option<SuccessFn>,
    on_failure: Option<FailureFn>,
    on_batch_error: Option<ErrorFn>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_success(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Box::new(hook));
        self
    }

    pub fn on_failure(mut self, hook: impl Fn(&str, DocumentError) + Send + Sync + 'static) -> Self {
        self.on_failure = Some(Box::new(hook));
        self
    }

    pub fn on_batch_error(mut self, hook: impl Fn(Error) + Send + Sync + 'static) -> Self {
        self.on_batch_error = Some(Box::new(hook));
        self
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 closures don't do Debug, so we just admit which ones exist
        f.debug_struct("Callbacks")
            .field("on_success", &self.on_success.is_some())
            .field("on_failure", &self.on_failure.is_some())
            .field("on_batch_error", &self.on_batch_error.is_some())
            .finish()
    }
}

impl OutcomeSink for Callbacks {
    fn on_index_success(&self, id: &str) {
        if let Some(hook) = &self.on_success {
            hook(id);
        }
    }

    fn on_index_failure(&self, id: &str, error: DocumentError) {
        if let Some(hook) = &self.on_failure {
            hook(id, error);
        }
    }

    fn on_error(&self, error: Error) {
        match &self.on_batch_error {
            Some(hook) => hook(error),
            None => warn!("💀 bulk request failed and nobody was listening: {}", error),
        }
    }
}

/// 📊 Running totals, readable at any time via [`BatchedWriter::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriterStats {
    /// 📥 documents accepted by `submit`
    pub added: u64,
    /// 📡 documents sent in bulk requests, whatever happened next
    pub flushed: u64,
    /// ✅ documents acknowledged
    pub indexed: u64,
    /// 💀 documents with a failure outcome
    pub failed: u64,
    /// 📦 bulk requests attempted
    pub requests: u64,
    /// 🚨 bulk requests that failed as a whole
    pub failed_requests: u64,
}

#[derive(Debug, Default)]
struct Counters {
    added: AtomicU64,
    flushed: AtomicU64,
    indexed: AtomicU64,
    failed: AtomicU64,
    requests: AtomicU64,
    failed_requests: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    fn snapshot(&self) -> WriterStats {
        WriterStats {
            added: self.added.load(Ordering::Relaxed),
            flushed: self.flushed.load(Ordering::Relaxed),
            indexed: self.indexed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
        }
    }
}

/// 🧺 The batch being filled right now.
#[derive(Debug, Default)]
struct PendingBatch {
    documents: Vec<Document>,
    bytes: usize,
    closed: bool,
}

impl PendingBatch {
    /// ✂️ Capture everything pending. Whatever arrives next starts a new batch.
    fn take(&mut self) -> Vec<Document> {
        self.bytes = 0;
        std::mem::take(&mut self.documents)
    }
}

/// 📨 A captured batch on its way to the flush task.
struct FlushRequest {
    documents: Vec<Document>,
    done: Option<oneshot::Sender<()>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // -- 🔒 a panicking outcome sink must not wedge every later submit
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 🚚 The part that actually talks to the backend. Lives inside the flush task.
struct Flusher<B> {
    backend: Arc<B>,
    index: String,
    refresh: bool,
    outcomes: Arc<dyn OutcomeSink>,
    counters: Arc<Counters>,
}

impl<B: SearchBackend> Flusher<B> {
    async fn flush(&self, documents: Vec<Document>) {
        // -- 💤 no empty bulk requests. the cluster doesn't want them and neither do we.
        if documents.is_empty() {
            return;
        }

        let count = documents.len() as u64;
        Counters::bump(&self.counters.requests, 1);
        Counters::bump(&self.counters.flushed, count);
        debug!("📡 flushing {} documents into {}", count, self.index);

        match self
            .backend
            .bulk_index(&self.index, &documents, self.refresh)
            .await
        {
            Ok(outcomes) => self.deliver(&documents, outcomes),
            Err(err) => {
                Counters::bump(&self.counters.failed_requests, 1);
                warn!(
                    "💀 bulk request of {} documents into {} failed as a whole: {}",
                    count, self.index, err
                );
                self.outcomes.on_error(Error::Bulk(err));
            }
        }
    }

    /// 📬 One outcome per document, matched by position.
    ///
    /// Every item must name the document at its position. The first one that
    /// doesn't means the response can't be lined up anymore, so that document
    /// and every one after it are reported as lost rather than guessed at.
    fn deliver(&self, documents: &[Document], outcomes: Vec<BulkItemOutcome>) {
        let mut outcomes = outcomes.into_iter();
        let mut lined_up = true;
        for document in documents {
            let outcome = if lined_up { outcomes.next() } else { None };
            match outcome {
                Some(outcome) if outcome.id != document.id => {
                    lined_up = false;
                    warn!(
                        "🧩 bulk response from {} answered for '{}' where '{}' was expected; distrusting the rest",
                        self.index, outcome.id, document.id
                    );
                    self.lost(
                        document,
                        format!(
                            "bulk response from {} named '{}' in this document's place",
                            self.index, outcome.id
                        ),
                    );
                }
                Some(BulkItemOutcome {
                    rejection: None, ..
                }) => {
                    Counters::bump(&self.counters.indexed, 1);
                    self.outcomes.on_index_success(&document.id);
                }
                Some(BulkItemOutcome {
                    rejection: Some(rejection),
                    ..
                }) => {
                    Counters::bump(&self.counters.failed, 1);
                    self.outcomes.on_index_failure(
                        &document.id,
                        DocumentError::Rejected {
                            error_type: rejection.error_type,
                            reason: rejection.reason,
                        },
                    );
                }
                None if lined_up => self.lost(
                    document,
                    format!(
                        "bulk response from {} carried no item for this document",
                        self.index
                    ),
                ),
                None => self.lost(
                    document,
                    format!(
                        "bulk response from {} lost track of its items before this document",
                        self.index
                    ),
                ),
            }
        }
    }

    fn lost(&self, document: &Document, reason: String) {
        Counters::bump(&self.counters.failed, 1);
        self.outcomes
            .on_index_failure(&document.id, DocumentError::Transport(reason));
    }
}

/// 🔄 The flush task: drain the channel, tick the timer, repeat until closed.
async fn run_flush_loop<B: SearchBackend>(
    flusher: Flusher<B>,
    inbox: Receiver<FlushRequest>,
    pending: Arc<Mutex<PendingBatch>>,
    interval: Duration,
) {
    // -- ⏱️ first tick one full interval from now, not immediately
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            request = inbox.recv() => match request {
                Ok(FlushRequest { documents, done }) => {
                    flusher.flush(documents).await;
                    if let Some(done) = done {
                        // -- 🤷 the caller may have stopped waiting; that's their business
                        let _ = done.send(());
                    }
                }
                Err(_) => {
                    // -- 🏁 closed and drained. lights off.
                    debug!("🏁 flush task for {} is done", flusher.index);
                    return;
                }
            },
            _ = ticker.tick() => {
                let documents = lock(&pending).take();
                if !documents.is_empty() {
                    trace!("⏱️ timer captured {} documents for {}", documents.len(), flusher.index);
                }
                flusher.flush(documents).await;
            }
        }
    }
}

/// 📦 Accumulates document upserts and flushes them as bulk requests.
///
/// See the module docs for the concurrency story. Share it behind an `Arc`
/// if several tasks submit; every method takes `&self`.
pub struct BatchedWriter {
    index: String,
    config: WriterConfig,
    pending: Arc<Mutex<PendingBatch>>,
    counters: Arc<Counters>,
    requests: Sender<FlushRequest>,
    flush_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for BatchedWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchedWriter")
            .field("index", &self.index)
            .field("config", &self.config)
            .field("stats", &self.counters.snapshot())
            .finish()
    }
}

impl BatchedWriter {
    /// 🏗️ Create a writer for `index` and spawn its flush task.
    ///
    /// Must be called from inside a tokio runtime.
    pub fn new<B>(
        backend: Arc<B>,
        index: impl Into<String>,
        config: WriterConfig,
        outcomes: Arc<dyn OutcomeSink>,
    ) -> Result<Self>
    where
        B: SearchBackend + 'static,
    {
        let index = index.into();
        if index.is_empty() {
            return Err(Error::Construction {
                what: "batched writer".to_string(),
                reason: "target index name is empty".to_string(),
            });
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(Error::Construction {
                what: format!("batched writer for {index}"),
                reason: "no tokio runtime to run the flush task on".to_string(),
            });
        }

        let (requests, inbox) = async_channel::unbounded();
        let pending = Arc::new(Mutex::new(PendingBatch::default()));
        let counters = Arc::new(Counters::default());
        let flusher = Flusher {
            backend,
            index: index.clone(),
            refresh: config.refresh,
            outcomes,
            counters: Arc::clone(&counters),
        };
        let flush_task = tokio::spawn(run_flush_loop(
            flusher,
            inbox,
            Arc::clone(&pending),
            config.flush_interval(),
        ));
        debug!(
            "🚀 writer for {} is up, flushing every {:?}",
            index,
            config.flush_interval()
        );

        Ok(Self {
            index,
            config,
            pending,
            counters,
            requests,
            flush_task: Mutex::new(Some(flush_task)),
        })
    }

    /// 📛 The index this writer feeds.
    pub fn index(&self) -> &str {
        &self.index
    }

    /// 📥 Enqueue one document. Returns as soon as it is in the pending batch.
    ///
    /// The outcome arrives later through the [`OutcomeSink`].
    pub fn submit(&self, id: impl Into<String>, body: impl Into<Vec<u8>>) -> Result<()> {
        let document = Document::new(id, body)?;

        let mut pending = lock(&self.pending);
        if pending.closed {
            return Err(Error::WriterClosed);
        }
        pending.bytes += document.size();
        pending.documents.push(document);
        Counters::bump(&self.counters.added, 1);

        if pending.documents.len() >= self.config.max_batch_docs
            || pending.bytes >= self.config.max_batch_bytes
        {
            let documents = pending.take();
            trace!("📦 batch full at {} documents, handing it off", documents.len());
            self.requests
                .try_send(FlushRequest {
                    documents,
                    done: None,
                })
                .map_err(|_| Error::FlushTask(format!("flush task for {} is gone", self.index)))?;
        }
        Ok(())
    }

    /// 🚿 Flush what is pending now and wait until its outcomes are delivered.
    pub async fn flush(&self) -> Result<()> {
        let (done, flushed) = oneshot::channel();
        {
            let mut pending = lock(&self.pending);
            if pending.closed {
                return Err(Error::WriterClosed);
            }
            let documents = pending.take();
            self.requests
                .try_send(FlushRequest {
                    documents,
                    done: Some(done),
                })
                .map_err(|_| Error::FlushTask(format!("flush task for {} is gone", self.index)))?;
        }
        flushed.await.map_err(|_| {
            Error::FlushTask(format!(
                "flush task for {} stopped before finishing the flush",
                self.index
            ))
        })
    }

    /// 🗑️ Final flush, then shut the flush task down.
    ///
    /// The writer is closed for good the moment this is called, whatever happens
    /// next: timeout, error, or the caller dropping this future halfway. Waits up
    /// to `timeout` for every outcome of the final flush (and of any batch queued
    /// before it); on timeout the flush task is aborted. A second call returns
    /// [`Error::WriterClosed`] and flushes nothing.
    pub async fn close(&self, timeout: Duration) -> Result<()> {
        {
            let mut pending = lock(&self.pending);
            if pending.closed {
                return Err(Error::WriterClosed);
            }
            pending.closed = true;
            let documents = pending.take();
            debug!(
                "🗑️ closing writer for {}: final flush of {} documents",
                self.index,
                documents.len()
            );
            // -- 💀 a dead flush task shows up below when we join it
            let _ = self.requests.try_send(FlushRequest {
                documents,
                done: None,
            });
            self.requests.close();
        }

        let flush_task = lock(&self.flush_task).take();
        let Some(mut flush_task) = flush_task else {
            return Ok(());
        };
        match tokio::time::timeout(timeout, &mut flush_task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(join_error)) => Err(Error::FlushTask(join_error.to_string())),
            Err(_) => {
                warn!(
                    "⏱️ writer for {} did not finish its final flush within {:?}; aborting it",
                    self.index, timeout
                );
                flush_task.abort();
                Err(Error::CloseTimedOut(timeout))
            }
        }
    }

    /// 🔒 Has `close` been called?
    pub fn is_closed(&self) -> bool {
        lock(&self.pending).closed
    }

    /// 📊 Totals so far.
    pub fn stats(&self) -> WriterStats {
        self.counters.snapshot()
    }
}

impl Drop for BatchedWriter {
    fn drop(&mut self) {
        let pending = lock(&self.pending);
        if !pending.closed && !pending.documents.is_empty() {
            warn!(
                "💀 writer for {} dropped without close(); {} pending documents were never flushed",
                self.index,
                pending.documents.len()
            );
        }
    }
}
