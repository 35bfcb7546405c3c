//! SQLite schema for the message store.
//!
//! Tables are created with `IF NOT EXISTS`, so databases written by older
//! versions (flat recipient arrays, second-resolution timestamps, no foreign
//! key on `message_part`) open unchanged.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::Connection;
use tracing::debug;

/// Format used when writing `created_at`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Format used when reading `created_at`; the fraction is optional.
const TIMESTAMP_PARSE_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

const CREATE_TABLES: &str = "
    CREATE TABLE IF NOT EXISTS message (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        sender TEXT,
        recipients TEXT,
        subject TEXT,
        source BLOB,
        size INTEGER,
        type TEXT,
        created_at TIMESTAMP
    );

    CREATE TABLE IF NOT EXISTS message_part (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        message_id INTEGER NOT NULL REFERENCES message(id) ON DELETE CASCADE,
        cid TEXT,
        type TEXT,
        is_attachment INTEGER,
        filename TEXT,
        charset TEXT,
        body BLOB,
        size INTEGER,
        created_at TIMESTAMP
    );

    CREATE INDEX IF NOT EXISTS message_part_message_id ON message_part (message_id);
";

/// Enable foreign keys and create any missing tables.
pub fn initialize(conn: &Connection) -> rusqlite::Result<()> {
    debug!("Creating tables");
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.execute_batch(CREATE_TABLES)
}

pub fn format_timestamp(at: NaiveDateTime) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a stored `created_at` value (UTC, with or without fraction).
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value.trim(), TIMESTAMP_PARSE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}
