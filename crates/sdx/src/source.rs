//! 📂 NdjsonSource: one JSON document per line, read in batches.
//!
//! 🧠 Knowledge graph:
//! - Each non-blank line is one document. The body is the line exactly as it
//!   was written (minus the line ending); we never re-serialize it.
//! - The document id comes from `id_field` at the top level of the object. A
//!   string is taken as-is, an integer is rendered in decimal. Anything else
//!   stops the run: an id we made up would be a duplicate waiting to happen.
//! - Errors carry the 1-based line number, because "invalid JSON somewhere in
//!   a 40 GB file" is not an error message, it is a hostage situation.

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use serde_json::Value;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::trace;

use crate::common::Document;

/// 🔧 Where the documents come from.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub file_name: String,
    /// 🔑 top-level field holding the document id
    #[serde(default = "default_id_field")]
    pub id_field: String,
    /// 📦 documents handed out per `next_batch`
    #[serde(default = "default_batch_size_docs")]
    pub batch_size_docs: usize,
}

fn default_id_field() -> String {
    "id".to_string()
}

fn default_batch_size_docs() -> usize {
    1000
}

/// 📦 One batch of documents plus the raw bytes it took to read them.
#[derive(Debug, Default)]
pub struct SourceBatch {
    pub documents: Vec<Document>,
    pub bytes_read: u64,
}

/// 📂 Reads an NDJSON file lazily, `batch_size_docs` documents at a time.
pub struct NdjsonSource {
    reader: BufReader<File>,
    config: SourceConfig,
    file_size: u64,
    line_number: usize,
}

impl std::fmt::Debug for NdjsonSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NdjsonSource")
            .field("config", &self.config)
            .field("file_size", &self.file_size)
            .field("line_number", &self.line_number)
            .finish()
    }
}

impl NdjsonSource {
    /// 🚀 Open the file. Its size feeds the progress bar; unknown size is 0.
    pub async fn open(config: SourceConfig) -> Result<Self> {
        let file = File::open(&config.file_name).await.with_context(|| {
            format!(
                "💀 Could not open source file '{}'. It may not exist, or it may not want to talk to us.",
                config.file_name
            )
        })?;
        // -- 📏 metadata can fail on weird filesystems; fly blind rather than abort
        let file_size = file.metadata().await.map(|m| m.len()).unwrap_or(0);

        Ok(Self {
            reader: BufReader::new(file),
            config,
            file_size,
            line_number: 0,
        })
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// 📄 Next batch of documents, or `None` at end of file.
    pub async fn next_batch(&mut self) -> Result<Option<SourceBatch>> {
        let mut batch = SourceBatch {
            documents: Vec::with_capacity(self.config.batch_size_docs.min(10_000)),
            bytes_read: 0,
        };
        let mut line = String::new();

        while batch.documents.len() < self.config.batch_size_docs.max(1) {
            line.clear();
            let bytes_read = self
                .reader
                .read_line(&mut line)
                .await
                .with_context(|| {
                    format!(
                        "💀 Read failed after line {} of '{}'",
                        self.line_number, self.config.file_name
                    )
                })?;
            if bytes_read == 0 {
                break;
            }
            self.line_number += 1;
            batch.bytes_read += bytes_read as u64;

            let trimmed = line.trim_end_matches('\n').trim_end_matches('\r');
            if trimmed.trim().is_empty() {
                continue;
            }
            let document = parse_line(trimmed, &self.config.id_field).with_context(|| {
                format!(
                    "💀 Line {} of '{}' is not a usable document",
                    self.line_number, self.config.file_name
                )
            })?;
            batch.documents.push(document);
        }

        trace!(
            "📖 read {} documents ({} bytes) from {}",
            batch.documents.len(),
            batch.bytes_read,
            self.config.file_name
        );

        // -- 🏁 a trailing run of blank lines still ends the file, not the run
        if batch.documents.is_empty() {
            Ok(None)
        } else {
            Ok(Some(batch))
        }
    }
}

/// 🔑 Pull the id out of one line and wrap the line as a document.
fn parse_line(line: &str, id_field: &str) -> Result<Document> {
    let parsed: Value = serde_json::from_str(line).context("invalid JSON")?;
    let id = match parsed.get(id_field) {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Number(n)) if n.is_i64() || n.is_u64() => n.to_string(),
        Some(other) => {
            return Err(anyhow!(
                "field '{}' must be a string or an integer, found {}",
                id_field,
                other
            ));
        }
        None => return Err(anyhow!("missing id field '{}'", id_field)),
    };
    Ok(Document::new(id, line)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn ndjson(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("💀 no temp file for us");
        file.write_all(contents.as_bytes())
            .expect("💀 temp file refused our bytes");
        file
    }

    fn config(file: &NamedTempFile, batch_size_docs: usize) -> SourceConfig {
        SourceConfig {
            file_name: file.path().display().to_string(),
            id_field: default_id_field(),
            batch_size_docs,
        }
    }

    #[tokio::test]
    async fn the_one_where_lines_become_batches() {
        let file = ndjson(concat!(
            "{\"id\":\"a\",\"n\":1}\n",
            "\n",
            "{\"id\":\"b\",\"n\":2}\r\n",
            "{\"id\":3,\"n\":3}\n",
        ));
        let mut source = NdjsonSource::open(config(&file, 2))
            .await
            .expect("💀 source should open");

        let first = source
            .next_batch()
            .await
            .expect("💀 read failed")
            .expect("💀 expected a first batch");
        let ids: Vec<&str> = first.documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(first.documents[1].body, br#"{"id":"b","n":2}"#.to_vec());

        let second = source
            .next_batch()
            .await
            .expect("💀 read failed")
            .expect("💀 expected a second batch");
        assert_eq!(second.documents.len(), 1);
        assert_eq!(second.documents[0].id, "3");

        assert!(source.next_batch().await.expect("💀 read failed").is_none());
    }

    #[tokio::test]
    async fn the_one_where_a_custom_id_field_is_honoured() {
        let file = ndjson("{\"sku\":\"X-1\",\"id\":\"ignored\"}\n");
        let mut source = NdjsonSource::open(SourceConfig {
            id_field: "sku".to_string(),
            ..config(&file, 10)
        })
        .await
        .expect("💀 source should open");
        let batch = source
            .next_batch()
            .await
            .expect("💀 read failed")
            .expect("💀 expected a batch");
        assert_eq!(batch.documents[0].id, "X-1");
    }

    #[tokio::test]
    async fn the_one_where_broken_json_names_its_line() {
        let file = ndjson("{\"id\":\"a\"}\n{not json\n");
        let mut source = NdjsonSource::open(config(&file, 10))
            .await
            .expect("💀 source should open");
        let err = source
            .next_batch()
            .await
            .expect_err("💀 broken JSON must not slip through");
        assert!(format!("{err:#}").contains("Line 2"), "got: {err:#}");
    }

    #[tokio::test]
    async fn the_one_where_a_document_has_no_name() {
        let file = ndjson("{\"name\":\"anonymous\"}\n");
        let mut source = NdjsonSource::open(config(&file, 10))
            .await
            .expect("💀 source should open");
        let err = source.next_batch().await.expect_err("💀 missing id must fail");
        assert!(format!("{err:#}").contains("missing id field 'id'"), "got: {err:#}");
    }

    #[test]
    fn the_one_where_ids_must_be_strings_or_integers() {
        assert!(parse_line(r#"{"id":1.5}"#, "id").is_err());
        assert!(parse_line(r#"{"id":null}"#, "id").is_err());
        assert!(parse_line(r#"{"id":""}"#, "id").is_err());
        assert_eq!(
            parse_line(r#"{"id":-7}"#, "id").expect("💀 negative ints are ids too").id,
            "-7"
        );
    }

    #[tokio::test]
    async fn the_one_where_the_file_is_not_there() {
        let result = NdjsonSource::open(SourceConfig {
            file_name: "/definitely/not/here.ndjson".to_string(),
            id_field: default_id_field(),
            batch_size_docs: 10,
        })
        .await;
        assert!(result.is_err());
    }
}
