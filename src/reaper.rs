use std::time::Duration;

use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::chats::store;

pub const REAP_PERIOD: Duration = Duration::from_secs(5 * 60);

/// Background task that deletes chats whose last activity has aged past the
/// retention threshold. The policy (threshold, cascade, idempotence) lives in
/// the conversation store; this loop only schedules it.
pub async fn run(db_pool: SqlitePool, period: Duration) {
    let mut interval = tokio::time::interval(period);

    loop {
        interval.tick().await;

        match store::reap_stale(&db_pool).await {
            Ok(count) if count > 0 => info!("reaped {count} stale chats"),
            Ok(_) => {}
            Err(err) => warn!("reaper error: {err}"),
        }
    }
}
