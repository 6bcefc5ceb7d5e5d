//! 📦 Common data structures: the building blocks of swapdex
//!
//! 🎬 COLD OPEN: INT. DATA CENTER, 3:47 AM
//!
//! A `Document` arrives. It has an id. It has a body. It does not know which
//! generation it is headed for, and frankly it does not care. It just wants
//! to be indexed exactly once and then be left alone. Relatable.
//!
//! 🦆

use crate::errors::{Error, Result};

/// 🎯 One document, one destiny.
///
/// `id` is the backend-unique key (non-empty, enforced by [`Document::new`]).
/// `body` is the pre-serialized payload. We never parse it, never re-encode it,
/// never judge it. We ship the bytes exactly as handed to us.
///
/// ⚠️ Bulk bodies are newline-delimited, so a body containing a raw `\n` is
/// refused up front. Pretty-printed JSON has to be compacted by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub id: String,
    pub body: Vec<u8>,
}

impl Document {
    /// 🏗️ Build a document. Refuses an empty id, because "" is not an identity,
    /// it is a cry for help.
    pub fn new(id: impl Into<String>, body: impl Into<Vec<u8>>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::EmptyDocumentId);
        }
        let body = body.into();
        if body.contains(&b'\n') {
            return Err(Error::MultilineDocumentBody(id));
        }
        Ok(Self { id, body })
    }

    /// 📏 Payload size in bytes, for batch accounting.
    pub fn size(&self) -> usize {
        self.body.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_an_empty_id_is_turned_away_at_the_door() {
        let result = Document::new("", b"{}".to_vec());
        assert!(matches!(result, Err(Error::EmptyDocumentId)));
    }

    #[test]
    fn the_one_where_a_pretty_printed_body_would_tear_the_bulk_apart() {
        let result = Document::new("a", "{\n  \"name\": \"apple\"\n}");
        match result {
            Err(Error::MultilineDocumentBody(id)) => assert_eq!(id, "a"),
            other => panic!("💀 a multi-line body slipped through: {other:?}"),
        }

        // -- 🧪 escaped newlines inside JSON strings are just two bytes, not a line break
        let escaped = Document::new("b", r#"{"poem":"roses\nviolets"}"#);
        assert!(escaped.is_ok());
    }

    #[test]
    fn the_one_where_the_body_is_carried_byte_for_byte() {
        let doc = Document::new("doc-42", r#"{"towel":true}"#)
            .expect("💀 a perfectly good id was rejected");
        assert_eq!(doc.id, "doc-42");
        assert_eq!(doc.body, br#"{"towel":true}"#.to_vec());
        assert_eq!(doc.size(), 14);
    }
}
