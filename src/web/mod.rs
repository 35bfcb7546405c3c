//! HTTP surface over the message store.

pub mod error;
pub mod events;
pub mod handlers;

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{delete, get};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::error::{Result, SinkError};
use crate::notify::DEFAULT_PING_INTERVAL;
use crate::store::MessageStore;

pub use error::ApiError;

/// Shared state handed to every route.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MessageStore>,
    /// Idle window before an event stream sends a heartbeat.
    pub ping_interval: Duration,
    /// Refuse `DELETE /`.
    pub no_quit: bool,
    pub shutdown: Shutdown,
}

impl AppState {
    pub fn new(store: Arc<MessageStore>) -> Self {
        Self {
            store,
            ping_interval: DEFAULT_PING_INTERVAL,
            no_quit: false,
            shutdown: Shutdown::new(),
        }
    }
}

/// One-shot shutdown signal, observable from any number of tasks.
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once [`trigger`](Self::trigger) has been called.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns once triggered.
        let _ = rx.wait_for(|down| *down).await;
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", delete(handlers::terminate))
        .route(
            "/messages/",
            get(handlers::list_messages).delete(handlers::delete_all),
        )
        .route(
            "/messages/:file",
            get(handlers::get_message_file).delete(handlers::delete_message),
        )
        .route("/messages/:id/parts/:cid", get(handlers::get_part))
        .route("/event-stream", get(events::event_stream))
        .with_state(state)
}

/// Serve HTTP until the state's shutdown signal fires.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    let addr = listener
        .local_addr()
        .map_err(|e| SinkError::io("reading HTTP listener address", e))?;
    info!(addr = %addr, "HTTP server listening");

    let shutdown = state.shutdown.clone();
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await
        .map_err(|e| SinkError::io("serving HTTP", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_wait_after_trigger() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.is_triggered());
        shutdown.trigger();
        shutdown.wait().await;
        assert!(shutdown.is_triggered());
    }
}
