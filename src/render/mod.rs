//! Renderings of stored messages: plain text, rewritten HTML, raw source,
//! and single parts addressed by content-id.

pub mod rewrite;

use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SinkError};
use crate::model::part::DEFAULT_CHARSET;
use crate::model::{MessagePart, Projection};
use crate::parser::header::decode_charset;
use crate::store::{MessageStore, HTML_TYPES, PLAIN_TYPES};

pub use rewrite::rewrite_cid_references;

/// The ways a whole message can be rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderKind {
    /// First plain-text body part.
    Plain,
    /// First HTML body part, with `cid:` references rewritten.
    Html,
    /// Raw source, served as text.
    Source,
    /// Raw source, served as a downloadable message.
    Eml,
}

impl RenderKind {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Html => "html",
            Self::Source => "source",
            Self::Eml => "eml",
        }
    }
}

impl FromStr for RenderKind {
    type Err = SinkError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "plain" => Ok(Self::Plain),
            "html" => Ok(Self::Html),
            "source" => Ok(Self::Source),
            "eml" => Ok(Self::Eml),
            other => Err(SinkError::Validation(format!("unknown format '{other}'"))),
        }
    }
}

impl fmt::Display for RenderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Bytes ready to be served, with the metadata a response needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub content_type: String,
    pub charset: Option<String>,
    pub filename: Option<String>,
    pub is_attachment: bool,
    pub body: Vec<u8>,
}

impl Rendered {
    /// Value for a `Content-Type` header.
    pub fn content_type_header(&self) -> String {
        match &self.charset {
            Some(charset) => format!("{}; charset={charset}", self.content_type),
            None => self.content_type.clone(),
        }
    }

    /// Value for a `Content-Disposition` header, for attachments only.
    pub fn content_disposition(&self) -> Option<String> {
        if !self.is_attachment {
            return None;
        }
        Some(match &self.filename {
            Some(name) => format!(
                "attachment; filename=\"{}\"",
                name.replace(['"', '\\', '\r', '\n'], "_")
            ),
            None => "attachment".to_string(),
        })
    }

    fn raw(content_type: &str, body: Vec<u8>) -> Self {
        Self {
            content_type: content_type.to_string(),
            charset: None,
            filename: None,
            is_attachment: false,
            body,
        }
    }
}

/// URL under which a part is served.
pub fn part_url(message_id: i64, cid: &str) -> String {
    format!("/messages/{message_id}/parts/{}", urlencoding::encode(cid))
}

/// Render a message in the requested way.
///
/// Fails with `NotFound("message")` when the message is absent and with
/// `NotFound("part")` when it has no part suitable for the rendering.
pub fn render_message(store: &MessageStore, id: i64, kind: RenderKind) -> Result<Rendered> {
    match kind {
        RenderKind::Plain => store
            .first_part_of_type(id, PLAIN_TYPES)?
            .map(|part| render_part(&part))
            .ok_or(SinkError::NotFound("part")),
        RenderKind::Html => store
            .first_part_of_type(id, HTML_TYPES)?
            .map(|part| render_html_part(&part))
            .ok_or(SinkError::NotFound("part")),
        RenderKind::Source | RenderKind::Eml => {
            let message = store
                .get_message(id, Projection::Full)?
                .ok_or(SinkError::NotFound("message"))?;
            let content_type = if kind == RenderKind::Eml {
                "message/rfc822"
            } else {
                "text/plain"
            };
            Ok(Rendered::raw(content_type, message.source.unwrap_or_default()))
        }
    }
}

/// Serve a part as stored, transcoding declared non-UTF-8 text to UTF-8.
pub fn render_part(part: &MessagePart) -> Rendered {
    let body = match part.charset.as_deref() {
        Some(charset) if !is_utf8(charset) => decode_charset(charset, &part.body).into_bytes(),
        _ => part.body.clone(),
    };
    let is_text = part.charset.is_some() || part.content_type.starts_with("text/");
    Rendered {
        content_type: part.content_type.clone(),
        charset: is_text.then(|| DEFAULT_CHARSET.to_string()),
        filename: part.filename.clone(),
        is_attachment: part.is_attachment,
        body,
    }
}

fn render_html_part(part: &MessagePart) -> Rendered {
    let html = decode_charset(part.effective_charset(), &part.body);
    let mut rendered = render_part(part);
    rendered.body = rewrite_cid_references(&html, part.message_id).into_bytes();
    rendered
}

fn is_utf8(label: &str) -> bool {
    encoding_rs::Encoding::for_label(label.trim().as_bytes()) == Some(encoding_rs::UTF_8)
}
