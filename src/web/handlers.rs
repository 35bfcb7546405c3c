//! Message routes.

use std::collections::BTreeMap;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::error::ApiError;
use super::AppState;
use crate::error::{Result, SinkError};
use crate::model::{Message, MessagePart, Projection};
use crate::render::{self, part_url, RenderKind, Rendered};
use crate::store::{MessageStore, HTML_TYPES, PLAIN_TYPES};

#[derive(Debug, Default, Deserialize)]
pub struct FullArg {
    full: Option<String>,
}

impl FullArg {
    fn projection(&self) -> Projection {
        Projection::from_full_flag(bool_arg(self.full.as_deref()))
    }
}

/// `yes`, `true` and `1` (any case) are true; everything else is false.
pub fn bool_arg(value: Option<&str>) -> bool {
    matches!(
        value.map(str::to_ascii_lowercase).as_deref(),
        Some("yes" | "true" | "1")
    )
}

/// A message with links to its renderings and attachments.
#[derive(Debug, Serialize)]
pub struct MessageInfo {
    #[serde(flatten)]
    message: Message,
    href: String,
    formats: BTreeMap<&'static str, String>,
    attachments: Vec<AttachmentInfo>,
}

#[derive(Debug, Serialize)]
pub struct AttachmentInfo {
    message_id: i64,
    cid: String,
    #[serde(rename = "type")]
    content_type: String,
    filename: Option<String>,
    size: u64,
    href: String,
}

impl From<MessagePart> for AttachmentInfo {
    fn from(part: MessagePart) -> Self {
        Self {
            href: part_url(part.message_id, &part.cid),
            message_id: part.message_id,
            cid: part.cid,
            content_type: part.content_type,
            filename: part.filename,
            size: part.size,
        }
    }
}

/// Run a store call on the blocking pool.
async fn blocking<T, F>(f: F) -> std::result::Result<T, ApiError>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .map_err(ApiError::from)
}

fn parse_id(raw: &str) -> Result<i64> {
    raw.parse()
        .map_err(|_| SinkError::Validation(format!("invalid message id '{raw}'")))
}

/// `GET /messages/`
pub async fn list_messages(
    State(state): State<AppState>,
    Query(arg): Query<FullArg>,
) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    let projection = arg.projection();
    let messages = blocking(move || state.store.list_messages(projection)).await?;
    Ok(Json(json!({ "messages": messages })))
}

/// `DELETE /messages/`
pub async fn delete_all(State(state): State<AppState>) -> std::result::Result<StatusCode, ApiError> {
    blocking(move || state.store.delete_all()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /messages/<id>`
pub async fn delete_message(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> std::result::Result<StatusCode, ApiError> {
    let id = parse_id(&raw_id)?;
    let removed = blocking(move || state.store.delete_message(id)).await?;
    if !removed {
        return Err(SinkError::NotFound("message").into());
    }
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /messages/<id>.<json|plain|html|source|eml>`
pub async fn get_message_file(
    State(state): State<AppState>,
    Path(file): Path<String>,
    Query(arg): Query<FullArg>,
) -> std::result::Result<Response, ApiError> {
    let (raw_id, extension) = file
        .split_once('.')
        .ok_or_else(|| SinkError::Validation(format!("expected <id>.<format>, got '{file}'")))?;
    let id = parse_id(raw_id)?;

    if extension == "json" {
        let projection = arg.projection();
        let info = blocking(move || message_info(&state.store, id, projection)).await?;
        return Ok(Json(info).into_response());
    }

    let kind: RenderKind = extension.parse()?;
    let rendered = blocking(move || render::render_message(&state.store, id, kind)).await?;
    Ok(rendered_response(rendered))
}

/// `GET /messages/<id>/parts/<cid>`
pub async fn get_part(
    State(state): State<AppState>,
    Path((raw_id, cid)): Path<(String, String)>,
) -> std::result::Result<Response, ApiError> {
    let id = parse_id(&raw_id)?;
    let part = blocking(move || {
        state
            .store
            .part_by_cid(id, &cid)?
            .ok_or(SinkError::NotFound("part"))
    })
    .await?;
    Ok(rendered_response(render::render_part(&part)))
}

/// `DELETE /`
pub async fn terminate(State(state): State<AppState>) -> std::result::Result<StatusCode, ApiError> {
    if state.no_quit {
        return Err(ApiError::new(StatusCode::FORBIDDEN, "quitting is disabled"));
    }
    info!("Terminate request received");
    state.shutdown.trigger();
    Ok(StatusCode::NO_CONTENT)
}

fn message_info(store: &MessageStore, id: i64, projection: Projection) -> Result<MessageInfo> {
    let message = store
        .get_message(id, projection)?
        .ok_or(SinkError::NotFound("message"))?;

    let mut formats = BTreeMap::new();
    formats.insert("source", format!("/messages/{id}.source"));
    if store.has_part_of_type(id, PLAIN_TYPES)? {
        formats.insert("plain", format!("/messages/{id}.plain"));
    }
    if store.has_part_of_type(id, HTML_TYPES)? {
        formats.insert("html", format!("/messages/{id}.html"));
    }

    let attachments = store
        .attachments(id)?
        .into_iter()
        .map(AttachmentInfo::from)
        .collect();

    Ok(MessageInfo {
        message,
        href: format!("/messages/{id}.eml"),
        formats,
        attachments,
    })
}

fn rendered_response(rendered: Rendered) -> Response {
    let content_type = HeaderValue::from_str(&rendered.content_type_header());
    let disposition = rendered
        .content_disposition()
        .and_then(|d| HeaderValue::from_str(&d).ok());

    let mut response = rendered.body.into_response();
    let headers = response.headers_mut();
    if let Ok(value) = content_type {
        headers.insert(header::CONTENT_TYPE, value);
    }
    if let Some(value) = disposition {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bool_arg() {
        assert!(bool_arg(Some("yes")));
        assert!(bool_arg(Some("TRUE")));
        assert!(bool_arg(Some("1")));
        assert!(!bool_arg(Some("no")));
        assert!(!bool_arg(Some("")));
        assert!(!bool_arg(None));
    }

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("12").unwrap(), 12);
        assert!(matches!(parse_id("x"), Err(SinkError::Validation(_))));
    }
}
