pub mod chats;
pub mod db;
pub mod messages;
pub mod metrics;
pub mod reaper;
pub mod session;

use axum::{
    extract::FromRef,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use sqlx::SqlitePool;
use tower_http::cors::CorsLayer;
use tower_sessions::{cookie::SameSite, Expiry, MemoryStore, SessionManagerLayer};

use crate::metrics::Metrics;

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub metrics: Metrics,
}

/// Assembles the full application: routes, session layer, CORS and the
/// request-metrics boundary.
pub fn app(app_state: AppState) -> Router {
    let session_store = MemoryStore::default();
    let session_layer = SessionManagerLayer::new(session_store)
        .with_secure(false)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(time::Duration::days(30)));

    let request_metrics = app_state.metrics.clone();

    Router::new()
        .route("/", get(chats::recent_chats))
        .route("/metrics", get(metrics::scrape))
        .nest("/chats", chats::router())
        .nest("/messages", messages::router())
        .with_state(app_state)
        .layer(session_layer)
        .layer(CorsLayer::very_permissive())
        .layer(middleware::from_fn_with_state(request_metrics, metrics::track))
}

pub(crate) fn now_unix() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error("{0} does not exist")]
    NotFound(&'static str),
    #[error("session is not available")]
    SessionUnavailable,
    #[error("transaction failed: {0}")]
    Transaction(#[source] sqlx::Error),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Session(#[from] tower_sessions::session::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::Validation(_) | AppError::NotFound(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
