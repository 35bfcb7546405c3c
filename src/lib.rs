//! `mailsink`: a developer SMTP catcher.
//!
//! Messages delivered over SMTP are decomposed into their MIME parts,
//! stored in SQLite, and served over HTTP together with a live stream of
//! store changes. Nothing is ever relayed.

pub mod config;
pub mod error;
pub mod ingest;
pub mod model;
pub mod notify;
pub mod parser;
pub mod render;
pub mod smtp;
pub mod store;
pub mod web;
