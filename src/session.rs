use axum::{debug_handler, Json};
use serde_json::{json, Value};
use tower_sessions::Session;
use uuid::Uuid;

use crate::{AppError, AppResult};

pub const USER_ID: &str = "user_id";

/// Stable anonymous identity for the calling session. Minted and persisted on
/// first use; every later call within the session's lifetime returns the same
/// value.
pub async fn ensure_user_id(session: &Session) -> AppResult<String> {
    match session.get::<String>(USER_ID).await {
        Ok(Some(user_id)) => Ok(user_id),
        Ok(None) => {
            let user_id = Uuid::new_v4().to_string();
            session
                .insert(USER_ID, user_id.clone())
                .await
                .map_err(|_| AppError::SessionUnavailable)?;
            Ok(user_id)
        }
        Err(_) => Err(AppError::SessionUnavailable),
    }
}

#[debug_handler]
pub(crate) async fn session_id(session: Session) -> AppResult<Json<Value>> {
    let user_id = ensure_user_id(&session).await?;
    Ok(Json(json!({ "sessionId": user_id })))
}

#[debug_handler]
pub(crate) async fn logout(session: Session) -> AppResult<Json<Value>> {
    session.flush().await?;
    Ok(Json(json!({ "message": "session closed" })))
}
