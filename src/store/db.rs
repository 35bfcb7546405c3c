//! SQLite-backed message store.
//!
//! One connection sits behind a mutex, which serializes every statement.
//! Mutations run in a single transaction and are announced on the
//! [`NotificationBus`] only after the commit succeeded, while the lock is
//! still held, so subscribers see events in commit order.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{Duration, NaiveDateTime, Utc};
use rusqlite::types::ValueRef;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use crate::error::{Result, SinkError};
use crate::model::{Message, MessagePart, ParsedMessage, Projection, Recipients};
use crate::notify::{Event, NotificationBus};
use crate::store::schema;

/// Types that count as an HTML rendering of a message.
pub const HTML_TYPES: &[&str] = &["text/html", "application/xhtml+xml"];

/// Types that count as a plain-text rendering of a message.
pub const PLAIN_TYPES: &[&str] = &["text/plain"];

const LIGHTWEIGHT_COLUMNS: &str = "id, sender, recipients, subject, size, created_at";
const FULL_COLUMNS: &str = "id, sender, recipients, subject, size, created_at, source, type";
const PART_COLUMNS: &str =
    "id, message_id, cid, type, is_attachment, filename, charset, body, size, created_at";

struct StoreState {
    conn: Connection,
    /// Last `created_at` handed out; keeps the sort key strictly increasing.
    last_created: Option<NaiveDateTime>,
}

impl StoreState {
    fn next_timestamp(&mut self) -> NaiveDateTime {
        let now = Utc::now().naive_utc();
        let at = match self.last_created {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        };
        self.last_created = Some(at);
        at
    }
}

/// Persistent store of received messages and their parts.
pub struct MessageStore {
    state: Mutex<StoreState>,
    bus: NotificationBus,
}

impl MessageStore {
    /// Open (or create) a store. `None` keeps everything in memory.
    pub fn open(path: Option<&Path>, bus: NotificationBus) -> Result<Self> {
        let conn = match path {
            Some(path) => {
                info!(path = %path.display(), "Using database");
                Connection::open(path)?
            }
            None => {
                info!("Using in-memory database");
                Connection::open_in_memory()?
            }
        };
        Self::from_connection(conn, bus)
    }

    pub fn open_in_memory(bus: NotificationBus) -> Result<Self> {
        Self::open(None, bus)
    }

    fn from_connection(conn: Connection, bus: NotificationBus) -> Result<Self> {
        schema::initialize(&conn)?;

        let newest: Option<String> =
            conn.query_row("SELECT MAX(created_at) FROM message", [], |row| row.get(0))?;
        let last_created = newest
            .as_deref()
            .and_then(schema::parse_timestamp)
            .map(|at| at.naive_utc());

        Ok(Self {
            state: Mutex::new(StoreState { conn, last_created }),
            bus,
        })
    }

    /// The bus this store announces its mutations on.
    pub fn bus(&self) -> &NotificationBus {
        &self.bus
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>> {
        self.state.lock().map_err(|_| SinkError::LockPoisoned)
    }

    /// Store a decomposed message with all of its parts, atomically.
    ///
    /// Returns the new message id and broadcasts `add_message`.
    pub fn insert(&self, message: &ParsedMessage) -> Result<i64> {
        let recipients = message.recipients.to_json()?;

        let mut state = self.lock()?;
        let created_at = schema::format_timestamp(state.next_timestamp());

        let tx = state.conn.transaction()?;
        tx.execute(
            "INSERT INTO message (sender, recipients, subject, source, type, size, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                message.sender,
                recipients,
                message.subject,
                message.source,
                message.content_type,
                message.size() as i64,
                created_at,
            ],
        )?;
        let id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                "INSERT INTO message_part
                    (message_id, cid, type, is_attachment, filename, charset, body, size, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for part in &message.parts {
                stmt.execute(params![
                    id,
                    part.cid,
                    part.content_type,
                    part.is_attachment,
                    part.filename,
                    part.charset,
                    part.body,
                    part.size() as i64,
                    created_at,
                ])?;
            }
        }
        tx.commit()?;

        debug!(id, parts = message.parts.len(), "Stored message");
        self.bus.broadcast(Event::AddMessage(id));
        Ok(id)
    }

    /// Look up one message.
    pub fn get_message(&self, id: i64, projection: Projection) -> Result<Option<Message>> {
        let state = self.lock()?;
        let sql = format!("SELECT {} FROM message WHERE id = ?1", columns(projection));
        let row = state
            .conn
            .query_row(&sql, [id], |row| MessageRow::read(row, projection))
            .optional()?;
        row.map(MessageRow::into_message).transpose()
    }

    /// All messages in insertion order.
    pub fn list_messages(&self, projection: Projection) -> Result<Vec<Message>> {
        let state = self.lock()?;
        let sql = format!(
            "SELECT {} FROM message ORDER BY created_at ASC, id ASC",
            columns(projection)
        );
        let mut stmt = state.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| MessageRow::read(row, projection))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(MessageRow::into_message).collect()
    }

    /// Attachment parts of a message, ordered by filename.
    pub fn attachments(&self, id: i64) -> Result<Vec<MessagePart>> {
        self.query_parts(
            &format!(
                "SELECT {PART_COLUMNS} FROM message_part
                 WHERE message_id = ?1 AND is_attachment = 1
                 ORDER BY filename ASC, id ASC"
            ),
            vec![id.into()],
        )
    }

    /// The non-attachment part with the lowest id whose type is in `types`.
    pub fn first_part_of_type(&self, id: i64, types: &[&str]) -> Result<Option<MessagePart>> {
        let sql = format!(
            "SELECT {PART_COLUMNS} FROM message_part
             WHERE message_id = ? AND is_attachment = 0 AND type IN ({})
             ORDER BY id ASC LIMIT 1",
            placeholders(types.len())
        );
        let mut parts = self.query_parts(&sql, type_params(id, types))?;
        Ok(parts.pop())
    }

    /// Whether [`first_part_of_type`](Self::first_part_of_type) would find a part.
    pub fn has_part_of_type(&self, id: i64, types: &[&str]) -> Result<bool> {
        let sql = format!(
            "SELECT 1 FROM message_part
             WHERE message_id = ? AND is_attachment = 0 AND type IN ({})
             LIMIT 1",
            placeholders(types.len())
        );
        let state = self.lock()?;
        let found = state
            .conn
            .query_row(&sql, params_from_iter(type_params(id, types)), |_| Ok(()))
            .optional()?;
        Ok(found.is_some())
    }

    /// A part by content-id. Duplicated cids resolve to the lowest part id.
    pub fn part_by_cid(&self, id: i64, cid: &str) -> Result<Option<MessagePart>> {
        let mut parts = self.query_parts(
            &format!(
                "SELECT {PART_COLUMNS} FROM message_part
                 WHERE message_id = ?1 AND cid = ?2
                 ORDER BY id ASC LIMIT 1"
            ),
            vec![id.into(), cid.to_string().into()],
        )?;
        Ok(parts.pop())
    }

    /// Every part of a message in document order.
    pub fn parts(&self, id: i64) -> Result<Vec<MessagePart>> {
        self.query_parts(
            &format!("SELECT {PART_COLUMNS} FROM message_part WHERE message_id = ?1 ORDER BY id ASC"),
            vec![id.into()],
        )
    }

    /// Delete a message and its parts.
    ///
    /// Returns whether a message was removed; only then is `delete_message`
    /// broadcast.
    pub fn delete_message(&self, id: i64) -> Result<bool> {
        let mut state = self.lock()?;
        let tx = state.conn.transaction()?;
        tx.execute("DELETE FROM message_part WHERE message_id = ?1", [id])?;
        let removed = tx.execute("DELETE FROM message WHERE id = ?1", [id])?;
        tx.commit()?;

        if removed == 0 {
            debug!(id, "Nothing to delete");
            return Ok(false);
        }
        debug!(id, "Deleted message");
        self.bus.broadcast(Event::DeleteMessage(id));
        Ok(true)
    }

    /// Delete every message. Always broadcasts `delete_messages`.
    pub fn delete_all(&self) -> Result<()> {
        let mut state = self.lock()?;
        let tx = state.conn.transaction()?;
        tx.execute("DELETE FROM message_part", [])?;
        let removed = tx.execute("DELETE FROM message", [])?;
        tx.commit()?;

        debug!(removed, "Deleted all messages");
        self.bus.broadcast(Event::DeleteMessages);
        Ok(())
    }

    fn query_parts(&self, sql: &str, params: Vec<rusqlite::types::Value>) -> Result<Vec<MessagePart>> {
        let state = self.lock()?;
        let mut stmt = state.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params_from_iter(params), PartRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(PartRow::into_part).collect()
    }
}

fn columns(projection: Projection) -> &'static str {
    match projection {
        Projection::Lightweight => LIGHTWEIGHT_COLUMNS,
        Projection::Full => FULL_COLUMNS,
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn type_params(id: i64, types: &[&str]) -> Vec<rusqlite::types::Value> {
    std::iter::once(id.into())
        .chain(types.iter().map(|t| t.to_string().into()))
        .collect()
}

/// Read a payload column. Older databases may hold text, or NULL for an
/// empty payload.
fn bytes_column(row: &Row<'_>, name: &str) -> rusqlite::Result<Vec<u8>> {
    match row.get_ref(name)? {
        ValueRef::Blob(bytes) | ValueRef::Text(bytes) => Ok(bytes.to_vec()),
        ValueRef::Null => Ok(Vec::new()),
        other => Err(rusqlite::Error::InvalidColumnType(
            row.as_ref().column_index(name)?,
            name.to_string(),
            other.data_type(),
        )),
    }
}

/// A `message` row as stored, before recipients and timestamps are decoded.
struct MessageRow {
    id: i64,
    sender: Option<String>,
    recipients: Option<String>,
    subject: Option<String>,
    size: Option<i64>,
    created_at: Option<String>,
    source: Option<Vec<u8>>,
    content_type: Option<String>,
}

impl MessageRow {
    fn read(row: &Row<'_>, projection: Projection) -> rusqlite::Result<Self> {
        let (source, content_type) = match projection {
            Projection::Lightweight => (None, None),
            Projection::Full => (Some(bytes_column(row, "source")?), row.get("type")?),
        };
        Ok(Self {
            id: row.get("id")?,
            sender: row.get("sender")?,
            recipients: row.get("recipients")?,
            subject: row.get("subject")?,
            size: row.get("size")?,
            created_at: row.get("created_at")?,
            source,
            content_type,
        })
    }

    fn into_message(self) -> Result<Message> {
        let id = self.id;
        let corrupt = |reason: String| SinkError::CorruptRecord { id, reason };

        let recipients = match self.recipients.as_deref() {
            Some(json) => Recipients::from_json(json)
                .map_err(|e| corrupt(format!("recipients: {e}")))?,
            None => Recipients::default(),
        };
        let created_at = self
            .created_at
            .as_deref()
            .and_then(schema::parse_timestamp)
            .ok_or_else(|| corrupt(format!("created_at: {:?}", self.created_at)))?;

        Ok(Message {
            id,
            sender: self.sender.unwrap_or_default(),
            recipients,
            subject: self.subject.unwrap_or_default(),
            size: self.size.unwrap_or(0).max(0) as u64,
            created_at,
            source: self.source,
            content_type: self.content_type,
        })
    }
}

struct PartRow {
    id: i64,
    message_id: i64,
    cid: Option<String>,
    content_type: Option<String>,
    is_attachment: Option<bool>,
    filename: Option<String>,
    charset: Option<String>,
    body: Vec<u8>,
    size: Option<i64>,
    created_at: Option<String>,
}

impl PartRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            message_id: row.get("message_id")?,
            cid: row.get("cid")?,
            content_type: row.get("type")?,
            is_attachment: row.get("is_attachment")?,
            filename: row.get("filename")?,
            charset: row.get("charset")?,
            body: bytes_column(row, "body")?,
            size: row.get("size")?,
            created_at: row.get("created_at")?,
        })
    }

    fn into_part(self) -> Result<MessagePart> {
        let created_at = self
            .created_at
            .as_deref()
            .and_then(schema::parse_timestamp)
            .ok_or_else(|| SinkError::CorruptRecord {
                id: self.message_id,
                reason: format!("part {} created_at: {:?}", self.id, self.created_at),
            })?;

        Ok(MessagePart {
            id: self.id,
            message_id: self.message_id,
            cid: self.cid.unwrap_or_default(),
            content_type: self
                .content_type
                .unwrap_or_else(|| crate::parser::mime::DEFAULT_CONTENT_TYPE.to_string()),
            is_attachment: self.is_attachment.unwrap_or(false),
            filename: self.filename,
            charset: self.charset,
            size: self.size.unwrap_or(0).max(0) as u64,
            body: self.body,
            created_at,
        })
    }
}
