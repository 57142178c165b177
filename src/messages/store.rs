use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{chats::store::derive_preview, now_unix, AppError, AppResult};

use super::{CreateMessageRequest, Message};

const MESSAGE_COLUMNS: &str = "id,chat_id,content,sender_id,image_path,created_at";

/// Inserts a message and refreshes its parent chat's activity summary in one
/// transaction; both land or neither does. A chat id that matches no row
/// rolls the whole thing back.
pub async fn create_message(
    db_pool: &SqlitePool,
    req: CreateMessageRequest,
    sender_id: &str,
) -> AppResult<Message> {
    let chat_id = req.chat_id.as_deref().unwrap_or("").trim().to_owned();
    if chat_id.is_empty() {
        return Err(AppError::Validation("chatId is required".into()));
    }
    let content = req.content.as_deref().unwrap_or("").trim().to_owned();
    if content.is_empty() && req.image_path.is_none() {
        return Err(AppError::Validation("Content or image is required".into()));
    }

    let message = Message {
        id: Uuid::now_v7().to_string(),
        chat_id,
        content,
        sender_id: sender_id.to_owned(),
        image_path: req.image_path,
        created_at: now_unix(),
    };
    let preview = derive_preview(&message.content, message.image_path.as_deref());

    let mut tx = db_pool.begin().await?;

    let updated = sqlx::query(
        "UPDATE chats SET last_message_at=?, last_message_preview=? WHERE id=?",
    )
    .bind(message.created_at)
    .bind(&preview)
    .bind(&message.chat_id)
    .execute(&mut *tx)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(AppError::NotFound("Chat"));
    }

    sqlx::query(&format!(
        "INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES (?,?,?,?,?,?)"
    ))
    .bind(&message.id)
    .bind(&message.chat_id)
    .bind(&message.content)
    .bind(&message.sender_id)
    .bind(&message.image_path)
    .bind(message.created_at)
    .execute(&mut *tx)
    .await?;

    tx.commit().await.map_err(AppError::Transaction)?;

    Ok(message)
}

pub async fn all_messages(db_pool: &SqlitePool) -> AppResult<Vec<Message>> {
    let messages = sqlx::query_as(&format!("SELECT {MESSAGE_COLUMNS} FROM messages"))
        .fetch_all(db_pool)
        .await?;
    Ok(messages)
}

pub async fn message_by_id(db_pool: &SqlitePool, id: &str) -> AppResult<Option<Message>> {
    let message = sqlx::query_as(&format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id=?"))
        .bind(id)
        .fetch_optional(db_pool)
        .await?;
    Ok(message)
}

/// Replaces the message body; `chat_id`, `sender_id` and `created_at` are
/// immutable once written.
pub async fn update_message(db_pool: &SqlitePool, id: &str, data: Message) -> AppResult<Message> {
    let updated = sqlx::query("UPDATE messages SET content=?, image_path=? WHERE id=?")
        .bind(&data.content)
        .bind(&data.image_path)
        .bind(id)
        .execute(db_pool)
        .await?;

    if updated.rows_affected() == 0 {
        return Err(AppError::NotFound("Message"));
    }
    message_by_id(db_pool, id)
        .await?
        .ok_or(AppError::NotFound("Message"))
}

pub async fn delete_message(db_pool: &SqlitePool, id: &str) -> AppResult<Message> {
    let message = message_by_id(db_pool, id)
        .await?
        .ok_or(AppError::NotFound("Message"))?;
    sqlx::query("DELETE FROM messages WHERE id=?")
        .bind(id)
        .execute(db_pool)
        .await?;
    Ok(message)
}
