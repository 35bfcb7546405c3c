//! Stored messages, their recipients, and the output of decomposition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

use super::part::ParsedPart;

/// Recipients of a message, split by header kind.
///
/// `to` holds the SMTP envelope recipients; `cc` and `bcc` come from the
/// message's own headers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipients {
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
}

/// On-disk encodings of the `recipients` column.
///
/// Early databases stored a bare JSON array of envelope recipients; current
/// ones store a `{"to", "cc", "bcc"}` object. Both decode into [`Recipients`].
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StoredRecipients {
    Structured(Recipients),
    Legacy(Vec<String>),
}

impl From<StoredRecipients> for Recipients {
    fn from(stored: StoredRecipients) -> Self {
        match stored {
            StoredRecipients::Structured(recipients) => recipients,
            StoredRecipients::Legacy(to) => Recipients {
                to,
                cc: Vec::new(),
                bcc: Vec::new(),
            },
        }
    }
}

impl Recipients {
    /// Decode a `recipients` column value in either encoding.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str::<StoredRecipients>(json).map(Self::from)
    }

    /// Encode in the current (structured) form.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Which columns a message lookup loads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// `id`, `sender`, `recipients`, `subject`, `size`, `created_at`.
    Lightweight,
    /// Every column, including the raw `source`.
    Full,
}

impl Projection {
    /// Map a `full` request flag onto a projection.
    pub fn from_full_flag(full: bool) -> Self {
        if full {
            Self::Full
        } else {
            Self::Lightweight
        }
    }
}

/// A stored message.
///
/// `source` and `content_type` are only populated by [`Projection::Full`].
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: i64,
    pub sender: String,
    pub recipients: Recipients,
    pub subject: String,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_source"
    )]
    pub source: Option<Vec<u8>>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// Raw sources are mail text in practice; JSON gets a lossy UTF-8 view.
fn serialize_source<S: Serializer>(source: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
    match source {
        Some(bytes) => s.serialize_str(&String::from_utf8_lossy(bytes)),
        None => s.serialize_none(),
    }
}

/// A decomposed message that has not been stored yet.
#[derive(Debug, Clone)]
pub struct ParsedMessage {
    /// Decoded envelope sender.
    pub sender: String,
    /// Decoded `From` header, falling back to the envelope sender.
    pub from: String,
    pub recipients: Recipients,
    /// Decoded `Subject` header, empty when absent.
    pub subject: String,
    /// Top-level MIME type (`multipart/mixed`, `text/plain`, …).
    pub content_type: String,
    /// Exactly the bytes that were received.
    pub source: Vec<u8>,
    /// Leaf parts in depth-first document order.
    pub parts: Vec<ParsedPart>,
}

impl ParsedMessage {
    pub fn size(&self) -> u64 {
        self.source.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_recipients_roundtrip() {
        let recipients = Recipients {
            to: vec!["a@x.com".into()],
            cc: vec!["Bee <b@x.com>".into()],
            bcc: vec![],
        };
        let json = recipients.to_json().unwrap();
        assert_eq!(Recipients::from_json(&json).unwrap(), recipients);
    }

    #[test]
    fn test_legacy_flat_array() {
        let recipients = Recipients::from_json(r#"["a@x.com", "b@x.com"]"#).unwrap();
        assert_eq!(recipients.to, vec!["a@x.com", "b@x.com"]);
        assert!(recipients.cc.is_empty());
        assert!(recipients.bcc.is_empty());
    }

    #[test]
    fn test_structured_missing_cc_bcc() {
        let recipients = Recipients::from_json(r#"{"to": ["a@x.com"]}"#).unwrap();
        assert_eq!(recipients.to, vec!["a@x.com"]);
        assert!(recipients.cc.is_empty());
    }

    #[test]
    fn test_garbage_recipients_rejected() {
        assert!(Recipients::from_json("42").is_err());
    }

    #[test]
    fn test_lightweight_json_omits_source() {
        let msg = Message {
            id: 1,
            sender: "a@x.com".into(),
            recipients: Recipients::default(),
            subject: String::new(),
            size: 3,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            source: None,
            content_type: None,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert!(value.get("source").is_none());
        assert!(value.get("type").is_none());
        assert_eq!(value["recipients"]["cc"], serde_json::json!([]));
    }
}
