//! Persistence and queries for received messages.

pub mod db;
pub mod schema;

pub use db::{MessageStore, HTML_TYPES, PLAIN_TYPES};
