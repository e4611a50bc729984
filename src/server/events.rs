//! `GET /api/events`: the caller's chat list notifications as SSE.

use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::debug;

use super::extract::AuthUser;
use super::AppState;

pub const EVENT_NAME: &str = "chatList";

pub async fn chat_events(
    State(state): State<AppState>,
    user: AuthUser,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("User {} subscribed to chat events", user.id);
    let user_id = user.id;

    let stream = BroadcastStream::new(state.events.subscribe()).filter_map(move |item| {
        // Lagged receivers skip what they missed; the client refetches anyway.
        let event = item.ok()?;
        if event.user_id != user_id {
            return None;
        }
        Event::default().event(EVENT_NAME).json_data(&event.kind).ok().map(Ok)
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
