//! SSE HTTP endpoints
//!
//! `GET /api/v2/sse/events` streams user-scoped events;
//! `GET /api/v2/sse/campaigns/{id}/events` streams one campaign. The caller's
//! identity arrives in the `X-User-Id` header (set by the auth middleware in
//! front of this service). Frames are flushed per event by the streaming body.

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::Stream;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::campaign::CampaignId;
use crate::sse::broadcaster::SseBroadcaster;

/// Shared state for the SSE routes
#[derive(Clone)]
pub struct SseState {
    /// The process-wide broadcaster
    pub broadcaster: Arc<SseBroadcaster>,
    /// Origin echoed back in CORS headers when configured
    pub allowed_origin: Option<String>,
}

/// Router exposing the SSE endpoints
pub fn router(state: SseState) -> Router {
    Router::new()
        .route("/api/v2/sse/events", get(user_events))
        .route("/api/v2/sse/campaigns/:id/events", get(campaign_events))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Frame stream that unregisters its client when the connection drops
struct ClientStream {
    frames: mpsc::Receiver<String>,
    broadcaster: Arc<SseBroadcaster>,
    client_id: Uuid,
}

impl Stream for ClientStream {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match self.frames.poll_recv(cx) {
            Poll::Ready(Some(frame)) => {
                // The frame is going onto the wire; the client is reading
                self.broadcaster.touch(self.client_id);
                Poll::Ready(Some(Ok(Bytes::from(frame))))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ClientStream {
    fn drop(&mut self) {
        self.broadcaster.unregister(self.client_id);
    }
}

fn user_id_from(headers: &HeaderMap) -> Result<String, StatusCode> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(String::from)
        .ok_or(StatusCode::UNAUTHORIZED)
}

fn stream_response(state: &SseState, user_id: &str, campaign_id: Option<CampaignId>) -> Result<Response, StatusCode> {
    let handle = state
        .broadcaster
        .register(user_id, campaign_id)
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;

    let stream = ClientStream {
        frames: handle.frames,
        broadcaster: Arc::clone(&state.broadcaster),
        client_id: handle.id,
    };

    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("X-Accel-Buffering", "no");
    if let Some(origin) = &state.allowed_origin {
        builder = builder
            .header(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin)
            .header(header::ACCESS_CONTROL_ALLOW_CREDENTIALS, "true");
    }
    builder
        .body(Body::from_stream(stream))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// User-scoped stream
async fn user_events(State(state): State<SseState>, headers: HeaderMap) -> Result<Response, StatusCode> {
    let user_id = user_id_from(&headers)?;
    stream_response(&state, &user_id, None)
}

/// Campaign-scoped stream
async fn campaign_events(
    State(state): State<SseState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, StatusCode> {
    let user_id = user_id_from(&headers)?;
    let campaign_id = CampaignId::parse_str(&id).map_err(|_| StatusCode::BAD_REQUEST)?;
    stream_response(&state, &user_id, Some(campaign_id))
}
