use std::str::FromStr;
use std::sync::Arc;

use axum::{
    async_trait,
    extract::{DefaultBodyLimit, FromRequestParts, Multipart, Path, Query, State},
    http::{header, request::Parts, Method},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use chatly_core::{
    Chatly, CoreError, MarkRead, ProfileUpdate, RequestEntry, RequestOutcome, UnreadCounts,
};
use chatly_shared::{ChatId, FriendStatus, Presence, RequestAction, RequestId, UserId};
use chatly_store::{
    Block, Chat, FriendRequest, MessagePayload, Notification, User, UserSummary,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::blob_store::LocalBlobStore;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::events;
use crate::views::{ChatView, MessageView};

/// Header carrying the caller's uid.  The external auth layer in front of
/// the server is trusted to set it.
pub const USER_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub chatly: Chatly,
    pub blobs: Arc<LocalBlobStore>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    let body_limit = state.config.max_blob_size + 64 * 1024;

    Router::new()
        .route("/health", get(health_check))
        .route("/users", post(register).get(search_users))
        .route("/users/me", get(me).patch(update_profile))
        .route("/users/me/presence", put(set_presence))
        .route("/users/:id", get(get_user))
        .route("/friends", get(list_friends))
        .route("/friends/:id", delete(remove_friend))
        .route("/friends/:id/status", get(friend_status))
        .route("/friend-requests", get(list_requests).post(send_request))
        .route("/friend-requests/:id/respond", post(respond))
        .route("/friend-requests/to/:id", delete(cancel_request))
        .route("/blocks", get(list_blocks).post(block_user))
        .route("/notifications", get(list_notifications))
        .route("/notifications/unread-count", get(notification_unread_count))
        .route("/notifications/read", post(mark_notifications_read))
        .route("/chats", get(list_chats).post(open_chat))
        .route("/chats/unread", get(unread_totals))
        .route("/chats/:id", get(get_chat))
        .route("/chats/:id/messages", get(list_messages).post(send_message))
        .route("/chats/:id/files", post(upload_file))
        .route("/chats/:id/read", post(mark_chat_read))
        .route("/chats/:id/unread-count", get(chat_unread_count))
        .route("/messages", post(send_direct))
        .route("/files/*path", get(serve_file))
        .merge(events::routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─── Identity ───

fn header_user(parts: &Parts) -> Result<UserId, ServerError> {
    let raw = parts
        .headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(ServerError::Unauthorized)?;
    UserId::parse(raw).map_err(|_| ServerError::Unauthorized)
}

/// Uid from the header, not yet checked against the directory.  Only
/// registration uses this.
pub struct Caller(pub UserId);

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _: &AppState) -> Result<Self, Self::Rejection> {
        header_user(parts).map(Caller)
    }
}

/// A caller with a registered profile.
pub struct CurrentUser(pub UserId);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let id = header_user(parts)?;
        match state.chatly.users().get(&id).await {
            Ok(_) => Ok(CurrentUser(id)),
            Err(CoreError::NotFound(_)) => Err(ServerError::Unauthorized),
            Err(e) => Err(e.into()),
        }
    }
}

fn parse_id<T: FromStr>(raw: &str, what: &str) -> Result<T, ServerError> {
    raw.parse()
        .map_err(|_| ServerError::BadRequest(format!("invalid {what} id: {raw}")))
}

fn parse_user(raw: &str) -> Result<UserId, ServerError> {
    UserId::parse(raw).map_err(|e| ServerError::BadRequest(e.to_string()))
}

// ─── Users ───

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterRequest {
    email: String,
    full_name: String,
}

async fn register(
    State(state): State<AppState>,
    Caller(id): Caller,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<User>, ServerError> {
    let user = state
        .chatly
        .users()
        .register(id, &req.email, &req.full_name)
        .await?;
    Ok(Json(user))
}

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
}

async fn search_users(
    State(state): State<AppState>,
    CurrentUser(_): CurrentUser,
    Query(query): Query<SearchQuery>,
) -> Json<Vec<User>> {
    Json(state.chatly.users().search(&query.q).await)
}

async fn me(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
) -> Result<Json<User>, ServerError> {
    Ok(Json(state.chatly.users().get(&me).await?))
}

async fn update_profile(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Json(update): Json<ProfileUpdate>,
) -> Result<Json<User>, ServerError> {
    Ok(Json(state.chatly.users().update_profile(&me, update).await?))
}

#[derive(Deserialize)]
struct PresenceRequest {
    presence: Presence,
}

async fn set_presence(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Json(req): Json<PresenceRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    state.chatly.users().set_presence(&me, req.presence).await?;
    Ok(Json(serde_json::json!({ "presence": req.presence })))
}

async fn get_user(
    State(state): State<AppState>,
    CurrentUser(_): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<User>, ServerError> {
    let id = parse_user(&id)?;
    Ok(Json(state.chatly.users().get(&id).await?))
}

// ─── Friends ───

async fn list_friends(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
) -> Json<Vec<User>> {
    Json(state.chatly.friends().list_friends(&me).await)
}

async fn remove_friend(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let other = parse_user(&id)?;
    state.chatly.friends().remove_friendship(&me, &other).await?;
    Ok(Json(serde_json::json!({ "removed": true })))
}

#[derive(Serialize)]
struct StatusResponse {
    status: FriendStatus,
}

async fn friend_status(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, ServerError> {
    let other = parse_user(&id)?;
    let status = state.chatly.friends().status(&me, &other).await?;
    Ok(Json(StatusResponse { status }))
}

async fn list_requests(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
) -> Json<Vec<RequestEntry>> {
    Json(state.chatly.friends().requests(&me).await)
}

#[derive(Deserialize)]
struct UserTarget {
    to: String,
}

async fn send_request(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Json(req): Json<UserTarget>,
) -> Result<Json<FriendRequest>, ServerError> {
    let to = parse_user(&req.to)?;
    Ok(Json(state.chatly.friends().send_request(&me, &to).await?))
}

#[derive(Deserialize)]
struct RespondRequest {
    action: RequestAction,
}

async fn respond(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(id): Path<String>,
    Json(req): Json<RespondRequest>,
) -> Result<Json<RequestOutcome>, ServerError> {
    let id: RequestId = parse_id(&id, "request")?;
    Ok(Json(state.chatly.respond(id, &me, req.action).await?))
}

async fn cancel_request(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let to = parse_user(&id)?;
    let cancelled = state.chatly.friends().cancel(&me, &to).await?;
    Ok(Json(serde_json::json!({ "cancelled": cancelled })))
}

async fn list_blocks(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
) -> Json<Vec<UserSummary>> {
    Json(state.chatly.friends().blocked_users(&me).await)
}

#[derive(Deserialize)]
struct BlockRequest {
    user: String,
}

async fn block_user(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Json(req): Json<BlockRequest>,
) -> Result<Json<Block>, ServerError> {
    let user = parse_user(&req.user)?;
    Ok(Json(state.chatly.friends().block(&me, &user).await?))
}

// ─── Notifications ───

async fn list_notifications(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
) -> Json<Vec<Notification>> {
    Json(state.chatly.notifications().list(&me).await)
}

#[derive(Serialize)]
struct CountResponse {
    count: u32,
}

async fn notification_unread_count(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
) -> Json<CountResponse> {
    let count = state.chatly.notifications().unread_count(&me).await;
    Json(CountResponse { count })
}

async fn mark_notifications_read(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Json(which): Json<MarkRead>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let updated = state.chatly.notifications().mark_read(&me, which).await?;
    Ok(Json(serde_json::json!({ "updated": updated })))
}

// ─── Chats & messages ───

async fn list_chats(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
) -> Json<Vec<ChatView>> {
    let chats = state.chatly.chats().list_for_user(&me).await;
    Json(chats.into_iter().map(|c| ChatView::new(c, &me)).collect())
}

#[derive(Deserialize)]
struct OpenChatRequest {
    with: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OpenChatResponse {
    chat_id: ChatId,
}

async fn open_chat(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Json(req): Json<OpenChatRequest>,
) -> Result<Json<OpenChatResponse>, ServerError> {
    let other = parse_user(&req.with)?;
    if !state.chatly.friends().are_friends(&me, &other).await? {
        return Err(CoreError::Forbidden(format!("{me} and {other} are not friends")).into());
    }
    let chat_id = state.chatly.chats().find_or_create_between(&me, &other).await?;
    Ok(Json(OpenChatResponse { chat_id }))
}

async fn unread_totals(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
) -> Json<UnreadCounts> {
    let mut counts = UnreadCounts::default();
    for chat in state.chatly.chats().list_for_user(&me).await {
        let n = state.chatly.messages().unread_count(chat.id, &me).await;
        counts.per_chat.insert(chat.id, n);
        counts.total += n;
    }
    Json(counts)
}

pub(crate) async fn member_chat(
    state: &AppState,
    raw: &str,
    me: &UserId,
) -> Result<Chat, ServerError> {
    let id: ChatId = parse_id(raw, "chat")?;
    let chat = state.chatly.chats().chat(id).await?;
    if !chat.has_member(me) {
        return Err(CoreError::Forbidden(format!("not a member of chat {id}")).into());
    }
    Ok(chat)
}

async fn get_chat(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<ChatView>, ServerError> {
    let chat = member_chat(&state, &id, &me).await?;
    Ok(Json(ChatView::new(chat, &me)))
}

async fn list_messages(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<Vec<MessageView>>, ServerError> {
    let chat = member_chat(&state, &id, &me).await?;
    let messages = state.chatly.messages().messages(chat.id, &me).await?;
    Ok(Json(
        messages
            .into_iter()
            .map(|m| MessageView::new(m, &chat, &me))
            .collect(),
    ))
}

async fn send_message(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(id): Path<String>,
    Json(payload): Json<MessagePayload>,
) -> Result<Json<MessageView>, ServerError> {
    let chat = member_chat(&state, &id, &me).await?;
    let message = state.chatly.messages().append(chat.id, &me, payload).await?;
    Ok(Json(MessageView::new(message, &chat, &me)))
}

#[derive(Deserialize)]
struct DirectMessage {
    to: String,
    #[serde(flatten)]
    payload: MessagePayload,
}

async fn send_direct(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Json(req): Json<DirectMessage>,
) -> Result<Json<MessageView>, ServerError> {
    let to = parse_user(&req.to)?;
    let message = state.chatly.send_to(&me, &to, req.payload).await?;
    let chat = state.chatly.chats().chat(message.chat_id).await?;
    Ok(Json(MessageView::new(message, &chat, &me)))
}

async fn upload_file(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Result<Json<MessageView>, ServerError> {
    let chat = member_chat(&state, &id, &me).await?;
    let id = chat.id;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("Multipart error: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ServerError::BadRequest("file field has no file name".into()))?;
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| ServerError::BadRequest(format!("Failed to read field: {}", e)))?;

        let size = data.len();
        let message = state
            .chatly
            .messages()
            .send_file(id, &me, &file_name, &content_type, data)
            .await?;
        info!(chat = %id, file = %file_name, size, "File uploaded via API");
        return Ok(Json(MessageView::new(message, &chat, &me)));
    }

    Err(ServerError::BadRequest(
        "Missing 'file' field in multipart form".to_string(),
    ))
}

async fn mark_chat_read(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let id: ChatId = parse_id(&id, "chat")?;
    let marked = state.chatly.messages().mark_read(id, &me).await?;
    Ok(Json(serde_json::json!({ "marked": marked })))
}

async fn chat_unread_count(
    State(state): State<AppState>,
    CurrentUser(me): CurrentUser,
    Path(id): Path<String>,
) -> Result<Json<CountResponse>, ServerError> {
    let chat = member_chat(&state, &id, &me).await?;
    let count = state.chatly.messages().unread_count(chat.id, &me).await;
    Ok(Json(CountResponse { count }))
}

async fn serve_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<impl IntoResponse, ServerError> {
    let data = state.blobs.read(&path).await?;
    let content_type = content_type_for(&path);
    Ok(([(header::CONTENT_TYPE, content_type)], data))
}

fn content_type_for(path: &str) -> &'static str {
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "txt" => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
