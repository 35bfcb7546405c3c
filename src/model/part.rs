//! Leaf parts of a message's MIME tree.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Charset assumed when a part declares none.
pub const DEFAULT_CHARSET: &str = "utf-8";

/// A stored leaf part.
///
/// The payload is transfer-decoded; `body` is never serialized, clients
/// fetch it through the part URL instead.
#[derive(Debug, Clone, Serialize)]
pub struct MessagePart {
    pub id: i64,
    pub message_id: i64,
    pub cid: String,
    #[serde(rename = "type")]
    pub content_type: String,
    pub is_attachment: bool,
    pub filename: Option<String>,
    pub charset: Option<String>,
    #[serde(skip)]
    pub body: Vec<u8>,
    pub size: u64,
    pub created_at: DateTime<Utc>,
}

impl MessagePart {
    /// Declared charset, or [`DEFAULT_CHARSET`].
    pub fn effective_charset(&self) -> &str {
        self.charset.as_deref().unwrap_or(DEFAULT_CHARSET)
    }
}

/// A leaf part produced by decomposition, before it has an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPart {
    pub cid: String,
    pub content_type: String,
    pub is_attachment: bool,
    pub filename: Option<String>,
    pub charset: Option<String>,
    pub body: Vec<u8>,
}

impl ParsedPart {
    pub fn size(&self) -> u64 {
        self.body.len() as u64
    }
}
