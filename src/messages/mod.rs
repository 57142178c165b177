pub mod store;

use axum::{
    debug_handler,
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tower_sessions::Session;

use crate::{session, AppError, AppResult, AppState};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub chat_id: String,
    pub content: String,
    pub sender_id: String,
    pub image_path: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMessageRequest {
    pub chat_id: Option<String>,
    pub content: Option<String>,
    pub image_path: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/session-id", get(session::session_id))
        .route("/logout", post(session::logout))
        .route("/", get(all_messages).post(create_message))
        .route(
            "/{id}",
            get(message_by_id).put(update_message).delete(delete_message),
        )
}

#[debug_handler]
pub(crate) async fn all_messages(
    State(db_pool): State<SqlitePool>,
) -> AppResult<Json<Vec<Message>>> {
    Ok(Json(store::all_messages(&db_pool).await?))
}

#[debug_handler]
pub(crate) async fn create_message(
    State(db_pool): State<SqlitePool>,
    session: Session,
    Json(req): Json<CreateMessageRequest>,
) -> AppResult<Json<Message>> {
    let sender_id = session::ensure_user_id(&session).await?;
    let message = store::create_message(&db_pool, req, &sender_id).await?;
    Ok(Json(message))
}

#[debug_handler]
pub(crate) async fn message_by_id(
    State(db_pool): State<SqlitePool>,
    Path(id): Path<String>,
) -> AppResult<Json<Message>> {
    let message = store::message_by_id(&db_pool, &id)
        .await?
        .ok_or(AppError::NotFound("Message"))?;
    Ok(Json(message))
}

#[debug_handler]
pub(crate) async fn update_message(
    State(db_pool): State<SqlitePool>,
    Path(id): Path<String>,
    Json(data): Json<Message>,
) -> AppResult<Json<Message>> {
    Ok(Json(store::update_message(&db_pool, &id, data).await?))
}

#[debug_handler]
pub(crate) async fn delete_message(
    State(db_pool): State<SqlitePool>,
    Path(id): Path<String>,
) -> AppResult<Json<Message>> {
    Ok(Json(store::delete_message(&db_pool, &id).await?))
}
