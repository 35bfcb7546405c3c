//! Core data model: stored messages, their parts, and address handling.

pub mod address;
pub mod message;
pub mod part;

pub use message::{Message, ParsedMessage, Projection, Recipients};
pub use part::{MessagePart, ParsedPart};
