//! 💀 Errors: the taxonomy of things going sideways.
//!
//! 🎬 *[a bulk request leaves the building. it does not come back.]*
//!
//! Three layers of sadness, smallest first:
//! - [`BackendError`]: the search backend (or the wire in front of it) said no.
//! - [`DocumentError`]: one single document got bounced. Delivered to
//!   `on_index_failure`, never returned from anything.
//! - [`Error`]: what the writer and the switcher hand back to callers.
//!
//! The application layer (`run`, config, the CLI) wraps these in `anyhow`
//! context chains. The library keeps them typed so callers can `match`
//! instead of grepping strings at 3am. 🦆

use std::time::Duration;

use thiserror::Error;

/// 📡 A failure talking to the search backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// 🔌 The request never got a response: connect, DNS, TLS, timeout, reset.
    #[error("transport error: {0}")]
    Transport(String),

    /// 📭 The backend answered with a non-2xx status.
    #[error("backend responded with status {status}: {body}")]
    Status { status: u16, body: String },

    /// 🤷 The backend answered 2xx but did not acknowledge the change.
    #[error("backend did not acknowledge the request: {0}")]
    NotAcknowledged(String),

    /// 🧩 The response body was not what the contract promised.
    #[error("could not decode backend response: {0}")]
    Decode(String),

    /// 🔍 An action referenced an index the backend has never heard of.
    #[error("no such index: {0}")]
    IndexNotFound(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        BackendError::Transport(err.to_string())
    }
}

/// 🎯 Why one specific document was not indexed.
///
/// Exactly one of the two arms is ever the source: either the transport lost
/// track of the document, or the backend looked at it and rejected it with a
/// structured `type` + `reason`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DocumentError {
    #[error("index error: {0}")]
    Transport(String),

    #[error("index error: {error_type}: {reason}")]
    Rejected { error_type: String, reason: String },
}

/// 🚨 The caller-facing error of the writer and the switcher.
#[derive(Debug, Error)]
pub enum Error {
    /// 🏗️ A writer or a generation could not be created. Abort the whole
    /// ingestion attempt; do not write against an unconfirmed generation.
    #[error("could not create {what}: {reason}")]
    Construction { what: String, reason: String },

    #[error("document id must not be empty")]
    EmptyDocumentId,

    /// 📜 Bulk requests are one line per body; a raw newline would split it in two.
    #[error("body of document '{0}' contains a newline; serialize it compactly")]
    MultilineDocumentBody(String),

    #[error("writer closed")]
    WriterClosed,

    #[error("timed out after {0:?} waiting for the final flush")]
    CloseTimedOut(Duration),

    #[error("flush task failed: {0}")]
    FlushTask(String),

    /// 📦 A whole bulk request failed. Delivered through `on_error`; none of
    /// the documents in that batch get a per-document outcome from it.
    #[error("index error: {0}")]
    Bulk(#[source] BackendError),

    #[error("could not list generations of alias '{alias}': {source}")]
    Catalog {
        alias: String,
        #[source]
        source: BackendError,
    },

    #[error("alias update for '{alias}' was rejected: {source}")]
    AliasUpdate {
        alias: String,
        #[source]
        source: BackendError,
    },

    #[error("generation '{0}' has already been switched in")]
    AlreadySwitched(String),
}

pub type Result<T> = std::result::Result<T, Error>;
