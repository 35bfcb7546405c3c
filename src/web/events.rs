//! `GET /event-stream`: live updates as a `text/event-stream` response.
//!
//! The response body owns its [`Subscription`](crate::notify::Subscription),
//! so the subscriber is deregistered as soon as the client disconnects and
//! the body is dropped.

use std::convert::Infallible;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use super::AppState;

pub async fn event_stream(State(state): State<AppState>) -> Response {
    let subscription = state.store.bus().subscribe();
    debug!(subscriber = subscription.id(), "Event stream opened");
    let idle = state.ping_interval;
    let shutdown = state.shutdown.clone();

    let frames = futures::stream::unfold(
        (subscription, shutdown),
        move |(mut subscription, shutdown)| async move {
            let event = tokio::select! {
                event = subscription.recv(idle) => event?,
                () = shutdown.wait() => return None,
            };
            Some((
                Ok::<_, Infallible>(Bytes::from(event.encode())),
                (subscription, shutdown),
            ))
        },
    );

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(frames),
    )
        .into_response()
}
