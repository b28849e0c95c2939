//! Server-sent event streams over the core's live subscriptions.
//!
//! Every response owns its subscription.  When the client disconnects axum
//! drops the body, which drops the subscription and aborts its task.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::Router;
use chatly_core::UnreadTracker;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use serde::Serialize;
use tracing::{debug, warn};

use crate::api::{member_chat, AppState, CurrentUser};
use crate::error::ServerError;
use crate::views::{ChatView, MessageView};

/// Event name of full-state snapshots.
pub const SNAPSHOT_EVENT: &str = "snapshot";
/// Event name of unread totals.
pub const UNREAD_EVENT: &str = "unread";

type EventStream = Sse<BoxStream<'static, Result<Event, Infallible>>>;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/events/chats", get(chat_events))
        .route("/events/chats/:id/messages", get(message_events))
        .route("/events/notifications", get(notification_events))
        .route("/events/friend-requests", get(request_events))
        .route("/events/unread", get(unread_events))
}

fn json_event<T: Serialize>(name: &'static str, data: &T) -> Event {
    Event::default()
        .event(name)
        .json_data(data)
        .unwrap_or_else(|e| {
            warn!(event = name, error = %e, "failed to encode event");
            Event::default().event("fault").data(e.to_string())
        })
}

fn event_stream<S, T>(name: &'static str, items: S) -> EventStream
where
    S: Stream<Item = T> + Send + 'static,
    T: Serialize,
{
    let events = items
        .map(move |item| Ok::<_, Infallible>(json_event(name, &item)))
        .boxed();
    Sse::new(events).keep_alive(KeepAlive::default())
}

async fn chat_events(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
) -> EventStream {
    debug!(user = %me, "chat list stream opened");
    let chats = state.chatly.chats().subscribe_for_user(&me);
    let views = chats.map(move |s| s.map(|chat| ChatView::new(chat, &me)));
    event_stream(SNAPSHOT_EVENT, views)
}

async fn message_events(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(id): Path<String>,
) -> Result<EventStream, ServerError> {
    let chat = member_chat(&state, &id, &me).await?;
    debug!(user = %me, chat = %chat.id, "message stream opened");
    let messages = state.chatly.messages().subscribe(chat.id);
    let views = messages.map(move |s| s.map(|m| MessageView::new(m, &chat, &me)));
    Ok(event_stream(SNAPSHOT_EVENT, views))
}

async fn notification_events(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
) -> EventStream {
    debug!(user = %me, "notification stream opened");
    event_stream(SNAPSHOT_EVENT, state.chatly.notifications().subscribe(&me))
}

async fn request_events(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
) -> EventStream {
    debug!(user = %me, "friend request stream opened");
    event_stream(SNAPSHOT_EVENT, state.chatly.friends().subscribe_incoming(&me))
}

async fn unread_events(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
) -> EventStream {
    debug!(user = %me, "unread stream opened");
    let tracker = UnreadTracker::spawn(
        me.clone(),
        state.chatly.chats().subscribe_for_user(&me),
        state.chatly.messages().clone(),
    );
    event_stream(UNREAD_EVENT, tracker.into_stream())
}
