pub mod store;

use axum::{
    debug_handler,
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tower_sessions::Session;

use crate::{messages::Message, session, AppError, AppResult, AppState};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    pub title: String,
    pub message: String,
    pub sender_id: String,
    pub last_message_preview: Option<String>,
    pub created_at: i64,
    pub last_message_at: i64,
}

#[derive(Debug, Serialize)]
pub struct ChatWithMessages {
    #[serde(flatten)]
    pub chat: Chat,
    pub messages: Vec<Message>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateChatRequest {
    pub title: Option<String>,
    pub message: Option<String>,
    pub image_path: Option<String>,
    pub last_message_at: Option<i64>,
    pub last_message_preview: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/session-id", get(session::session_id))
        .route("/logout", post(session::logout))
        .route("/allChats", get(all_chats))
        .route("/randomChats", get(random_chats))
        .route("/allOldChats", post(reap_old_chats))
        .route("/", post(create_chat))
        .route("/{id}", get(chat_by_id).put(update_chat).delete(delete_chat))
        .route("/{id}/messages", get(chat_with_messages))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<i64>,
}

#[debug_handler]
pub async fn recent_chats(
    State(db_pool): State<SqlitePool>,
    Query(ListQuery { page }): Query<ListQuery>,
) -> AppResult<Json<store::RecentPage>> {
    let page = store::recent_chats(&db_pool, page.unwrap_or(1), store::PAGE_SIZE).await?;
    Ok(Json(page))
}

#[debug_handler]
pub(crate) async fn create_chat(
    State(db_pool): State<SqlitePool>,
    session: Session,
    Json(req): Json<CreateChatRequest>,
) -> AppResult<Json<Value>> {
    let sender_id = session::ensure_user_id(&session).await?;
    let chat = store::create_chat(&db_pool, req, &sender_id).await?;
    Ok(Json(json!({ "chatId": chat.id })))
}

#[debug_handler]
pub(crate) async fn all_chats(State(db_pool): State<SqlitePool>) -> AppResult<Json<Vec<Chat>>> {
    Ok(Json(store::all_chats(&db_pool).await?))
}

#[debug_handler]
pub(crate) async fn random_chats(
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<Vec<ChatWithMessages>>> {
    Ok(Json(store::random_chats(&db_pool).await?))
}

#[debug_handler]
pub(crate) async fn reap_old_chats(State(db_pool): State<SqlitePool>) -> AppResult<Json<Value>> {
    let count = store::reap_stale(&db_pool).await?;
    Ok(Json(json!({ "count": count })))
}

#[debug_handler]
pub(crate) async fn chat_by_id(
    State(db_pool): State<SqlitePool>,
    Path(id): Path<String>,
) -> AppResult<Json<Chat>> {
    let chat = store::chat_by_id(&db_pool, &id)
        .await?
        .ok_or(AppError::NotFound("Chat"))?;
    Ok(Json(chat))
}

#[debug_handler]
pub(crate) async fn chat_with_messages(
    State(db_pool): State<SqlitePool>,
    Path(id): Path<String>,
) -> AppResult<Json<ChatWithMessages>> {
    let chat = store::chat_with_messages(&db_pool, &id)
        .await?
        .ok_or(AppError::NotFound("Chat"))?;
    Ok(Json(chat))
}

#[debug_handler]
pub(crate) async fn update_chat(
    State(db_pool): State<SqlitePool>,
    Path(id): Path<String>,
    Json(data): Json<Chat>,
) -> AppResult<Json<Chat>> {
    Ok(Json(store::update_chat(&db_pool, &id, data).await?))
}

#[debug_handler]
pub(crate) async fn delete_chat(
    State(db_pool): State<SqlitePool>,
    Path(id): Path<String>,
) -> AppResult<Json<Chat>> {
    Ok(Json(store::delete_chat(&db_pool, &id).await?))
}
