//! MIME decomposition: turns an SMTP envelope plus raw message bytes into a
//! [`ParsedMessage`] whose leaf parts are flattened in document order.

use mail_parser::{Message, MessageParser, MessagePart, MimeHeaders, PartType};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{Result, SinkError};
use crate::model::address::split_addresses;
use crate::model::part::DEFAULT_CHARSET;
use crate::model::{ParsedMessage, ParsedPart, Recipients};
use crate::parser::header::{decode_encoded_words, decode_header, strip_angle_brackets, HeaderBlock};

/// Type assumed for parts (and messages) without a `Content-Type` header.
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain";

/// Maximum depth of embedded `message/rfc822` parts we descend into.
/// Deeper messages are kept as a single opaque part.
const MAX_DEPTH: usize = 10;

/// Decompose a received message. Never fails.
///
/// If the bytes cannot be parsed as MIME at all, the message is kept as a
/// single undecoded `text/plain` part holding the raw bytes, so that no
/// delivered message is ever dropped.
pub fn decompose(sender: &str, recipients: &[String], raw: &[u8]) -> ParsedMessage {
    match try_decompose(sender, recipients, raw) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(error = %e, size = raw.len(), "Storing message without MIME decomposition");
            undecoded(sender, recipients, raw)
        }
    }
}

/// Decompose a received message, reporting MIME parse failures.
pub fn try_decompose(sender: &str, recipients: &[String], raw: &[u8]) -> Result<ParsedMessage> {
    let parsed = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| SinkError::Decode("message has no parseable MIME structure".into()))?;

    let content_type = parsed
        .parts
        .first()
        .map(part_content_type)
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

    let mut parts = Vec::new();
    collect_leaves(&parsed, 0, 0, &mut parts);
    if parts.is_empty() {
        return Err(SinkError::Decode("message has no leaf parts".into()));
    }
    debug!(parts = parts.len(), content_type = %content_type, "Decomposed message");

    Ok(envelope(sender, recipients, raw, content_type, parts))
}

/// Build the message record shared by the decoded and undecoded paths.
fn envelope(
    sender: &str,
    recipients: &[String],
    raw: &[u8],
    content_type: String,
    parts: Vec<ParsedPart>,
) -> ParsedMessage {
    let headers = HeaderBlock::parse(raw);
    let address_header = |name: &str| {
        headers
            .get_decoded(name)
            .map(|value| split_addresses(&value))
            .unwrap_or_default()
    };

    let sender = decode_encoded_words(sender);
    ParsedMessage {
        from: headers.get_decoded("from").unwrap_or_else(|| sender.clone()),
        sender,
        recipients: Recipients {
            to: recipients.iter().map(|r| decode_encoded_words(r)).collect(),
            cc: address_header("cc"),
            bcc: address_header("bcc"),
        },
        subject: decode_header(headers.get("subject")),
        content_type,
        source: raw.to_vec(),
        parts,
    }
}

fn undecoded(sender: &str, recipients: &[String], raw: &[u8]) -> ParsedMessage {
    let part = ParsedPart {
        cid: synthesize_cid(),
        content_type: DEFAULT_CONTENT_TYPE.to_string(),
        is_attachment: false,
        filename: None,
        charset: None,
        body: raw.to_vec(),
    };
    envelope(
        sender,
        recipients,
        raw,
        DEFAULT_CONTENT_TYPE.to_string(),
        vec![part],
    )
}

/// Depth-first walk from `part_id`, pushing every non-container part.
fn collect_leaves(message: &Message<'_>, part_id: usize, depth: usize, out: &mut Vec<ParsedPart>) {
    let Some(part) = message.parts.get(part_id) else {
        return;
    };

    match &part.body {
        PartType::Multipart(children) => {
            for &child in children {
                collect_leaves(message, child as usize, depth, out);
            }
        }
        PartType::Message(nested) if depth < MAX_DEPTH => {
            collect_leaves(nested, 0, depth + 1, out);
        }
        _ => out.push(leaf(message, part)),
    }
}

fn leaf(message: &Message<'_>, part: &MessagePart<'_>) -> ParsedPart {
    let content_type = part_content_type(part);

    let body = if part.is_encoding_problem {
        warn!(content_type = %content_type, "Part payload could not be decoded; storing it empty");
        Vec::new()
    } else {
        part.contents().to_vec()
    };

    let cid = raw_content_id(message, part)
        .filter(|id| !id.is_empty())
        .unwrap_or_else(synthesize_cid);

    let filename = part
        .attachment_name()
        .map(decode_encoded_words)
        .filter(|name| !name.is_empty());

    // Text payloads arrive already converted to UTF-8.
    let charset = match part.body {
        PartType::Text(_) | PartType::Html(_) => Some(DEFAULT_CHARSET.to_string()),
        _ => part
            .content_type()
            .and_then(|ct| ct.attribute("charset"))
            .map(|cs| cs.trim().to_ascii_lowercase()),
    };

    ParsedPart {
        cid,
        content_type,
        is_attachment: filename.is_some(),
        filename,
        charset,
        body,
    }
}

/// The part's `Content-ID` with exactly one pair of angle brackets removed.
///
/// Read from the raw header block, since the parsed value has already lost
/// its outer brackets.
fn raw_content_id(message: &Message<'_>, part: &MessagePart<'_>) -> Option<String> {
    let block = message
        .raw_message
        .get(part.offset_header..part.offset_body)?;
    let headers = HeaderBlock::parse(block);
    Some(strip_angle_brackets(headers.get("content-id")?).to_string())
}

/// Lowercase `type/subtype` of a part, or [`DEFAULT_CONTENT_TYPE`].
fn part_content_type(part: &MessagePart<'_>) -> String {
    part.content_type()
        .map(|ct| match ct.subtype() {
            Some(sub) => format!("{}/{}", ct.ctype(), sub),
            None => ct.ctype().to_string(),
        })
        .map(|ct| ct.to_ascii_lowercase())
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string())
}

fn synthesize_cid() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decompose_str(raw: &str) -> ParsedMessage {
        decompose("sender@x.com", &["rcpt@x.com".to_string()], raw.as_bytes())
    }

    fn text(part: &ParsedPart) -> String {
        String::from_utf8_lossy(&part.body).trim().to_string()
    }

    #[test]
    fn test_single_part_message() {
        let msg = decompose_str("Subject: Hi\r\nContent-Type: text/plain\r\n\r\nhello\r\n");
        assert_eq!(msg.parts.len(), 1);
        assert_eq!(msg.content_type, "text/plain");
        assert_eq!(msg.parts[0].content_type, "text/plain");
        assert_eq!(text(&msg.parts[0]), "hello");
        assert!(!msg.parts[0].is_attachment);
    }

    #[test]
    fn test_missing_content_type_defaults_to_plain() {
        let msg = decompose_str("Subject: Hi\r\n\r\nhello\r\n");
        assert_eq!(msg.content_type, "text/plain");
        assert_eq!(msg.parts[0].content_type, "text/plain");
    }

    #[test]
    fn test_nested_multipart_is_flattened_in_order() {
        let raw = concat!(
            "Subject: nested\r\n",
            "Content-Type: multipart/mixed; boundary=\"outer\"\r\n",
            "\r\n",
            "--outer\r\n",
            "Content-Type: multipart/alternative; boundary=\"inner\"\r\n",
            "\r\n",
            "--inner\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "plain body\r\n",
            "--inner\r\n",
            "Content-Type: text/html\r\n",
            "\r\n",
            "<p>html body</p>\r\n",
            "--inner--\r\n",
            "--outer\r\n",
            "Content-Type: application/octet-stream\r\n",
            "Content-Disposition: attachment; filename=\"data.bin\"\r\n",
            "Content-Transfer-Encoding: base64\r\n",
            "\r\n",
            "aGVsbG8gd29ybGQ=\r\n",
            "--outer--\r\n",
        );
        let msg = decompose_str(raw);
        assert_eq!(msg.content_type, "multipart/mixed");
        let types: Vec<&str> = msg.parts.iter().map(|p| p.content_type.as_str()).collect();
        assert_eq!(types, vec!["text/plain", "text/html", "application/octet-stream"]);
        assert_eq!(text(&msg.parts[0]), "plain body");
        assert_eq!(msg.parts[2].body, b"hello world");
        assert!(msg.parts[2].is_attachment);
        assert_eq!(msg.parts[2].filename.as_deref(), Some("data.bin"));
    }

    #[test]
    fn test_content_id_brackets_stripped() {
        let raw = concat!(
            "Content-Type: multipart/related; boundary=\"b\"\r\n",
            "\r\n",
            "--b\r\n",
            "Content-Type: text/html\r\n",
            "\r\n",
            "<img src=\"cid:abc\">\r\n",
            "--b\r\n",
            "Content-Type: image/png\r\n",
            "Content-Id: <abc>\r\n",
            "Content-Transfer-Encoding: base64\r\n",
            "\r\n",
            "iVBORw0KGgo=\r\n",
            "--b--\r\n",
        );
        let msg = decompose_str(raw);
        assert_eq!(msg.parts.len(), 2);
        assert_eq!(msg.parts[1].cid, "abc");
        assert!(!msg.parts[1].is_attachment);
    }

    #[test]
    fn test_content_id_stripped_only_once() {
        let raw = concat!(
            "Content-Type: multipart/related; boundary=\"b\"\r\n",
            "\r\n",
            "--b\r\n",
            "Content-Type: image/gif\r\n",
            "Content-Id: <<abc>>\r\n",
            "\r\n",
            "GIF89a\r\n",
            "--b\r\n",
            "Content-Type: image/gif\r\n",
            "Content-ID: plain-id\r\n",
            "\r\n",
            "GIF89a\r\n",
            "--b--\r\n",
        );
        let msg = decompose_str(raw);
        assert_eq!(msg.parts[0].cid, "<abc>");
        assert_eq!(msg.parts[1].cid, "plain-id");
    }

    #[test]
    fn test_undecodable_payload_stored_empty() {
        let raw = concat!(
            "Content-Type: multipart/mixed; boundary=\"b\"\r\n",
            "\r\n",
            "--b\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "fine\r\n",
            "--b\r\n",
            "Content-Type: application/octet-stream\r\n",
            "Content-Transfer-Encoding: base64\r\n",
            "\r\n",
            "!!!! not base64 ####\r\n",
            "--b--\r\n",
        );
        let msg = decompose_str(raw);
        assert_eq!(msg.parts.len(), 2);
        assert_eq!(text(&msg.parts[0]), "fine");
        assert!(msg.parts[1].body.is_empty());
        assert_eq!(msg.parts[1].size(), 0);
        assert_eq!(msg.parts[1].content_type, "application/octet-stream");
    }

    #[test]
    fn test_synthesized_cids_are_unique() {
        let raw = concat!(
            "Content-Type: multipart/alternative; boundary=\"b\"\r\n",
            "\r\n",
            "--b\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "one\r\n",
            "--b\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "two\r\n",
            "--b--\r\n",
        );
        let msg = decompose_str(raw);
        assert_eq!(msg.parts.len(), 2);
        assert!(!msg.parts[0].cid.is_empty());
        assert_ne!(msg.parts[0].cid, msg.parts[1].cid);
    }

    #[test]
    fn test_text_is_folded_to_utf8() {
        let raw = concat!(
            "Content-Type: text/plain; charset=iso-8859-1\r\n",
            "Content-Transfer-Encoding: quoted-printable\r\n",
            "\r\n",
            "caf=E9\r\n",
        );
        let msg = decompose_str(raw);
        assert_eq!(text(&msg.parts[0]), "café");
        assert_eq!(msg.parts[0].charset.as_deref(), Some("utf-8"));
    }

    #[test]
    fn test_envelope_and_headers() {
        let raw = concat!(
            "From: Someone <someone@x.com>\r\n",
            "Subject: =?UTF-8?Q?Caf=C3=A9?=\r\n",
            "CC: Alice <alice@x.com>, bob@x.com\r\n",
            "\r\n",
            "body\r\n",
        );
        let msg = decompose(
            "=?UTF-8?B?SG9sYQ==?= <s@x.com>",
            &["to@x.com".to_string()],
            raw.as_bytes(),
        );
        assert_eq!(msg.sender, "Hola <s@x.com>");
        assert_eq!(msg.from, "Someone <someone@x.com>");
        assert_eq!(msg.subject, "Café");
        assert_eq!(msg.recipients.to, vec!["to@x.com"]);
        assert_eq!(msg.recipients.cc, vec!["Alice <alice@x.com>", "bob@x.com"]);
        assert!(msg.recipients.bcc.is_empty());
        assert_eq!(msg.source, raw.as_bytes());
        assert_eq!(msg.size(), raw.len() as u64);
    }

    #[test]
    fn test_embedded_message_is_descended() {
        let raw = concat!(
            "Content-Type: multipart/mixed; boundary=\"b\"\r\n",
            "\r\n",
            "--b\r\n",
            "Content-Type: text/plain\r\n",
            "\r\n",
            "see attached\r\n",
            "--b\r\n",
            "Content-Type: message/rfc822\r\n",
            "\r\n",
            "Subject: inner\r\n",
            "Content-Type: text/html\r\n",
            "\r\n",
            "<b>inner</b>\r\n",
            "--b--\r\n",
        );
        let msg = decompose_str(raw);
        let types: Vec<&str> = msg.parts.iter().map(|p| p.content_type.as_str()).collect();
        assert_eq!(types, vec!["text/plain", "text/html"]);
    }

    #[test]
    fn test_empty_input_still_yields_one_part() {
        let msg = decompose("a@x.com", &[], b"");
        assert_eq!(msg.parts.len(), 1);
        assert_eq!(msg.from, "a@x.com");
        assert_eq!(msg.size(), 0);
        assert!(msg.parts[0].body.is_empty());
    }
}
