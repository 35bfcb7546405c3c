//! Minimal SMTP receiver feeding the message store.
//!
//! Supports HELO/EHLO, MAIL, RCPT, DATA, RSET, NOOP and QUIT. There is no
//! relaying, TLS or authentication.

pub mod reply;
pub mod server;
pub mod session;

pub use reply::Reply;
pub use server::SmtpServer;
pub use session::{Action, Envelope, Session};
