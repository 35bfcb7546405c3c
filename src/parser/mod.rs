//! Message parsing: header decoding and MIME decomposition.

pub mod header;
pub mod mime;

pub use mime::{decompose, try_decompose};
