use rand::seq::IndexedRandom;
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{messages::Message, now_unix, AppError, AppResult};

use super::{Chat, ChatWithMessages, CreateChatRequest};

/// Chats with activity newer than this window count as "recent". The reaper
/// uses the same threshold, so a chat is never deleted while still listable.
pub const RETENTION: time::Duration = time::Duration::hours(12);

pub const PAGE_SIZE: i64 = 6;
pub const IMAGE_PREVIEW: &str = "Image";

const IMAGE_SEED_CONTENT: &str = "Image attached";
const ALL_CHATS_CAP: i64 = 10;
const SAMPLE_POOL: i64 = 10;
const SAMPLE_SIZE: usize = 3;
const SAMPLE_MESSAGES: i64 = 3;

const CHAT_COLUMNS: &str = "id,title,message,sender_id,last_message_preview,created_at,last_message_at";

fn window_cutoff() -> i64 {
    now_unix() - RETENTION.whole_seconds()
}

/// Preview text summarizing a message: its trimmed content, or a fixed
/// placeholder when the message is image-only.
pub(crate) fn derive_preview(content: &str, image_path: Option<&str>) -> Option<String> {
    if !content.is_empty() {
        Some(content.to_owned())
    } else if image_path.is_some() {
        Some(IMAGE_PREVIEW.to_owned())
    } else {
        None
    }
}

/// Creates a chat together with its seed message in one transaction.
pub async fn create_chat(
    db_pool: &SqlitePool,
    req: CreateChatRequest,
    sender_id: &str,
) -> AppResult<Chat> {
    let title = req.title.as_deref().unwrap_or("").trim().to_owned();
    if title.is_empty() {
        return Err(AppError::Validation("Title is required".into()));
    }
    let content = req.message.as_deref().unwrap_or("").trim().to_owned();
    if content.is_empty() && req.image_path.is_none() {
        return Err(AppError::Validation("Message or image is required".into()));
    }

    let now = now_unix();
    let derived = derive_preview(&content, req.image_path.as_deref());
    let chat = Chat {
        id: Uuid::now_v7().to_string(),
        title,
        message: content.clone(),
        sender_id: sender_id.to_owned(),
        last_message_preview: req.last_message_preview.or(derived),
        created_at: now,
        last_message_at: req.last_message_at.unwrap_or(now),
    };
    let seed_content = if content.is_empty() {
        IMAGE_SEED_CONTENT.to_owned()
    } else {
        content
    };

    let mut tx = db_pool.begin().await?;
    sqlx::query(
        "INSERT INTO chats (id,title,message,sender_id,last_message_preview,created_at,last_message_at)
         VALUES (?,?,?,?,?,?,?)",
    )
    .bind(&chat.id)
    .bind(&chat.title)
    .bind(&chat.message)
    .bind(&chat.sender_id)
    .bind(&chat.last_message_preview)
    .bind(chat.created_at)
    .bind(chat.last_message_at)
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO messages (id,chat_id,content,sender_id,image_path,created_at)
         VALUES (?,?,?,?,?,?)",
    )
    .bind(Uuid::now_v7().to_string())
    .bind(&chat.id)
    .bind(&seed_content)
    .bind(sender_id)
    .bind(&req.image_path)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await.map_err(AppError::Transaction)?;

    Ok(chat)
}

pub async fn chat_by_id(db_pool: &SqlitePool, id: &str) -> AppResult<Option<Chat>> {
    let chat = sqlx::query_as(&format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id=?"))
        .bind(id)
        .fetch_optional(db_pool)
        .await?;
    Ok(chat)
}

/// Chat with its full message history, oldest first.
pub async fn chat_with_messages(
    db_pool: &SqlitePool,
    id: &str,
) -> AppResult<Option<ChatWithMessages>> {
    let Some(chat) = chat_by_id(db_pool, id).await? else {
        return Ok(None);
    };

    let messages: Vec<Message> = sqlx::query_as(
        "SELECT id,chat_id,content,sender_id,image_path,created_at
         FROM messages WHERE chat_id=? ORDER BY created_at ASC, id ASC",
    )
    .bind(id)
    .fetch_all(db_pool)
    .await?;

    Ok(Some(ChatWithMessages { chat, messages }))
}

/// Unfiltered convenience view, newest-created first, capped.
pub async fn all_chats(db_pool: &SqlitePool) -> AppResult<Vec<Chat>> {
    let chats = sqlx::query_as(&format!(
        "SELECT {CHAT_COLUMNS} FROM chats ORDER BY created_at DESC, id DESC LIMIT ?"
    ))
    .bind(ALL_CHATS_CAP)
    .fetch_all(db_pool)
    .await?;
    Ok(chats)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentPage {
    pub items: Vec<Chat>,
    pub total: i64,
    pub current_page: i64,
    pub total_pages: i64,
}

/// Recency-windowed, paginated listing. An out-of-range page request is
/// clamped to the nearest valid page instead of erroring, so stale bookmarks
/// degrade gracefully; callers detect clamping by comparing `current_page`
/// against what they asked for.
pub async fn recent_chats(
    db_pool: &SqlitePool,
    requested_page: i64,
    page_size: i64,
) -> AppResult<RecentPage> {
    let page_size = page_size.max(1);
    let cutoff = window_cutoff();

    let mut tx = db_pool.begin().await?;

    let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chats WHERE last_message_at > ?")
        .bind(cutoff)
        .fetch_one(&mut *tx)
        .await?;

    let total_pages = ((total + page_size - 1) / page_size).max(1);
    let current_page = requested_page.clamp(1, total_pages);

    if total == 0 {
        tx.commit().await.map_err(AppError::Transaction)?;
        return Ok(RecentPage {
            items: Vec::new(),
            total,
            current_page,
            total_pages,
        });
    }

    let offset = (current_page - 1) * page_size;
    let items: Vec<Chat> = sqlx::query_as(&format!(
        "SELECT {CHAT_COLUMNS} FROM chats WHERE last_message_at > ?
         ORDER BY last_message_at DESC, created_at DESC, id DESC
         LIMIT ? OFFSET ?"
    ))
    .bind(cutoff)
    .bind(page_size)
    .bind(offset)
    .fetch_all(&mut *tx)
    .await?;

    tx.commit().await.map_err(AppError::Transaction)?;

    Ok(RecentPage {
        items,
        total,
        current_page,
        total_pages,
    })
}

/// Full-record replace of the mutable fields; `id` and `created_at` stay.
pub async fn update_chat(db_pool: &SqlitePool, id: &str, data: Chat) -> AppResult<Chat> {
    let updated = sqlx::query(
        "UPDATE chats SET title=?, message=?, sender_id=?, last_message_preview=?, last_message_at=?
         WHERE id=?",
    )
    .bind(&data.title)
    .bind(&data.message)
    .bind(&data.sender_id)
    .bind(&data.last_message_preview)
    .bind(data.last_message_at)
    .bind(id)
    .execute(db_pool)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(AppError::NotFound("Chat"));
    }
    chat_by_id(db_pool, id).await?.ok_or(AppError::NotFound("Chat"))
}

/// Deletes the chat and, through the cascade, all its messages.
pub async fn delete_chat(db_pool: &SqlitePool, id: &str) -> AppResult<Chat> {
    let chat = chat_by_id(db_pool, id).await?.ok_or(AppError::NotFound("Chat"))?;
    sqlx::query("DELETE FROM chats WHERE id=?")
        .bind(id)
        .execute(db_pool)
        .await?;
    Ok(chat)
}

/// Up to 3 chats drawn uniformly without replacement from a pool of up to 10
/// eligible candidates, each carrying its 3 most recent messages.
pub async fn random_chats(db_pool: &SqlitePool) -> AppResult<Vec<ChatWithMessages>> {
    let ids: Vec<String> =
        sqlx::query_scalar("SELECT id FROM chats WHERE last_message_at > ? LIMIT ?")
            .bind(window_cutoff())
            .bind(SAMPLE_POOL)
            .fetch_all(db_pool)
            .await?;

    let picked: Vec<String> = ids
        .choose_multiple(&mut rand::rng(), SAMPLE_SIZE)
        .cloned()
        .collect();
    if picked.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; picked.len()].join(",");
    let sql = format!(
        "SELECT {CHAT_COLUMNS} FROM chats WHERE id IN ({placeholders}) ORDER BY last_message_at ASC"
    );
    let mut query = sqlx::query_as::<_, Chat>(&sql);
    for id in &picked {
        query = query.bind(id);
    }
    let chats = query.fetch_all(db_pool).await?;

    let mut out = Vec::with_capacity(chats.len());
    for chat in chats {
        let messages: Vec<Message> = sqlx::query_as(
            "SELECT id,chat_id,content,sender_id,image_path,created_at
             FROM messages WHERE chat_id=? ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(&chat.id)
        .bind(SAMPLE_MESSAGES)
        .fetch_all(db_pool)
        .await?;
        out.push(ChatWithMessages { chat, messages });
    }
    Ok(out)
}

/// Deletes every chat whose last activity is strictly older than the
/// retention threshold. Returns the number of chats removed; running it again
/// with nothing stale removes zero.
pub async fn reap_stale(db_pool: &SqlitePool) -> AppResult<u64> {
    let reaped = sqlx::query("DELETE FROM chats WHERE last_message_at < ?")
        .bind(window_cutoff())
        .execute(db_pool)
        .await?;
    Ok(reaped.rows_affected())
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::db::test_pool;

    fn req(title: &str, message: &str) -> CreateChatRequest {
        CreateChatRequest {
            title: Some(title.to_owned()),
            message: Some(message.to_owned()),
            image_path: None,
            last_message_at: None,
            last_message_preview: None,
        }
    }

    fn req_at(title: &str, last_message_at: i64) -> CreateChatRequest {
        CreateChatRequest {
            last_message_at: Some(last_message_at),
            ..req(title, "hello")
        }
    }

    #[tokio::test]
    async fn create_requires_title() {
        let db_pool = test_pool().await;

        let mut blank = req("   ", "hello");
        let err = create_chat(&db_pool, blank, "alice").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        blank = req("t", "hello");
        blank.title = None;
        let err = create_chat(&db_pool, blank, "alice").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        // Nothing was written.
        let chats = all_chats(&db_pool).await.unwrap();
        assert!(chats.is_empty());
    }

    #[tokio::test]
    async fn create_requires_message_or_image() {
        let db_pool = test_pool().await;

        let err = create_chat(&db_pool, req("t", "   "), "alice").await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let mut with_image = req("t", "");
        with_image.image_path = Some("uploads/cat.png".to_owned());
        let chat = create_chat(&db_pool, with_image, "alice").await.unwrap();
        assert_eq!(chat.last_message_preview.as_deref(), Some(IMAGE_PREVIEW));

        // The seed message carries the image placeholder content.
        let full = chat_with_messages(&db_pool, &chat.id).await.unwrap().unwrap();
        assert_eq!(full.messages.len(), 1);
        assert_eq!(full.messages[0].content, "Image attached");
        assert_eq!(full.messages[0].image_path.as_deref(), Some("uploads/cat.png"));
    }

    #[tokio::test]
    async fn create_seeds_one_message_and_preview() {
        let db_pool = test_pool().await;

        let chat = create_chat(&db_pool, req("greetings", "  hi there  "), "alice")
            .await
            .unwrap();
        assert_eq!(chat.message, "hi there");
        assert_eq!(chat.last_message_preview.as_deref(), Some("hi there"));
        assert!(chat.last_message_at >= chat.created_at);

        let full = chat_with_messages(&db_pool, &chat.id).await.unwrap().unwrap();
        assert_eq!(full.messages.len(), 1);
        assert_eq!(full.messages[0].content, "hi there");
        assert_eq!(full.messages[0].sender_id, "alice");
    }

    #[tokio::test]
    async fn window_excludes_aged_chats() {
        let db_pool = test_pool().await;
        let now = now_unix();

        create_chat(&db_pool, req_at("aged", now - RETENTION.whole_seconds() - 1), "a")
            .await
            .unwrap();
        let fresh = create_chat(&db_pool, req_at("fresh", now - 1), "a").await.unwrap();

        let page = recent_chats(&db_pool, 1, PAGE_SIZE).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, fresh.id);
    }

    #[tokio::test]
    async fn page_requests_are_clamped() {
        let db_pool = test_pool().await;
        let now = now_unix();
        for i in 0..8 {
            create_chat(&db_pool, req_at(&format!("c{i}"), now - i), "a")
                .await
                .unwrap();
        }

        let page = recent_chats(&db_pool, 99, 6).await.unwrap();
        assert_eq!(page.total, 8);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.current_page, 2);
        assert_eq!(page.items.len(), 2);

        let page = recent_chats(&db_pool, -3, 6).await.unwrap();
        assert_eq!(page.current_page, 1);
        assert_eq!(page.items.len(), 6);
    }

    #[tokio::test]
    async fn empty_window_yields_one_empty_page() {
        let db_pool = test_pool().await;

        let page = recent_chats(&db_pool, 7, PAGE_SIZE).await.unwrap();
        assert_eq!(page.total, 0);
        assert_eq!(page.total_pages, 1);
        assert_eq!(page.current_page, 1);
        assert!(page.items.is_empty());
    }

    #[tokio::test]
    async fn listing_orders_by_activity_then_creation() {
        let db_pool = test_pool().await;
        let now = now_unix();

        let older = create_chat(&db_pool, req_at("older", now - 60), "a").await.unwrap();
        let newer = create_chat(&db_pool, req_at("newer", now - 5), "a").await.unwrap();
        // Same activity timestamp as `newer`; created later, so it wins the tie.
        let tied = create_chat(&db_pool, req_at("tied", now - 5), "a").await.unwrap();

        let page = recent_chats(&db_pool, 1, PAGE_SIZE).await.unwrap();
        let ids: Vec<&str> = page.items.iter().map(|c| c.id.as_str()).collect();
        // uuid v7 ids are time-ordered, so the id tiebreak keeps this stable
        // even when both chats land in the same second.
        assert_eq!(ids, vec![tied.id.as_str(), newer.id.as_str(), older.id.as_str()]);
    }

    #[tokio::test]
    async fn all_chats_is_capped_and_newest_first() {
        let db_pool = test_pool().await;
        for i in 0..12 {
            create_chat(&db_pool, req(&format!("c{i}"), "hi"), "a").await.unwrap();
        }

        let chats = all_chats(&db_pool).await.unwrap();
        assert_eq!(chats.len(), 10);
        assert_eq!(chats[0].title, "c11");
    }

    #[tokio::test]
    async fn update_and_delete_missing_chat_fail() {
        let db_pool = test_pool().await;
        let chat = create_chat(&db_pool, req("t", "hi"), "a").await.unwrap();

        let err = update_chat(&db_pool, "nope", chat.clone()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound("Chat")));

        let err = delete_chat(&db_pool, "nope").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound("Chat")));
    }

    #[tokio::test]
    async fn update_replaces_mutable_fields() {
        let db_pool = test_pool().await;
        let chat = create_chat(&db_pool, req("before", "hi"), "a").await.unwrap();

        let mut data = chat.clone();
        data.title = "after".to_owned();
        data.last_message_at = chat.last_message_at + 60;
        let updated = update_chat(&db_pool, &chat.id, data).await.unwrap();

        assert_eq!(updated.title, "after");
        assert_eq!(updated.last_message_at, chat.last_message_at + 60);
        assert_eq!(updated.created_at, chat.created_at);
    }

    #[tokio::test]
    async fn delete_cascades_to_messages() {
        let db_pool = test_pool().await;
        let chat = create_chat(&db_pool, req("t", "hi"), "a").await.unwrap();

        let deleted = delete_chat(&db_pool, &chat.id).await.unwrap();
        assert_eq!(deleted.id, chat.id);

        let orphans: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE chat_id=?")
            .bind(&chat.id)
            .fetch_one(&db_pool)
            .await
            .unwrap();
        assert_eq!(orphans, 0);
    }

    #[tokio::test]
    async fn reaping_is_idempotent() {
        let db_pool = test_pool().await;
        let now = now_unix();

        create_chat(&db_pool, req_at("stale1", now - RETENTION.whole_seconds() - 10), "a")
            .await
            .unwrap();
        create_chat(&db_pool, req_at("stale2", now - RETENTION.whole_seconds() - 20), "a")
            .await
            .unwrap();
        let fresh = create_chat(&db_pool, req_at("fresh", now - 30), "a").await.unwrap();

        assert_eq!(reap_stale(&db_pool).await.unwrap(), 2);
        assert_eq!(reap_stale(&db_pool).await.unwrap(), 0);
        assert!(chat_by_id(&db_pool, &fresh.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn sample_is_bounded_distinct_and_covers_the_pool() {
        let db_pool = test_pool().await;
        let now = now_unix();
        let mut pool_ids = HashSet::new();
        for i in 0..10 {
            let chat = create_chat(&db_pool, req_at(&format!("c{i}"), now - i), "a")
                .await
                .unwrap();
            pool_ids.insert(chat.id);
        }

        let mut seen = HashSet::new();
        for _ in 0..200 {
            let sample = random_chats(&db_pool).await.unwrap();
            assert_eq!(sample.len(), 3);

            let ids: HashSet<String> = sample.iter().map(|c| c.chat.id.clone()).collect();
            assert_eq!(ids.len(), 3, "sample returned a duplicate chat");
            assert!(sample.windows(2).all(|w| {
                w[0].chat.last_message_at <= w[1].chat.last_message_at
            }));
            seen.extend(ids);
        }

        // Each candidate is picked with probability 0.3 per trial; after 200
        // trials missing one would be a ~1e-31 event.
        assert_eq!(seen, pool_ids);
    }

    #[tokio::test]
    async fn sample_attaches_three_most_recent_messages() {
        let db_pool = test_pool().await;
        let chat = create_chat(&db_pool, req("t", "m0"), "a").await.unwrap();
        for i in 1..5 {
            sqlx::query(
                "INSERT INTO messages (id,chat_id,content,sender_id,image_path,created_at)
                 VALUES (?,?,?,?,NULL,?)",
            )
            .bind(Uuid::now_v7().to_string())
            .bind(&chat.id)
            .bind(format!("m{i}"))
            .bind("a")
            .bind(chat.created_at + i)
            .execute(&db_pool)
            .await
            .unwrap();
        }

        let sample = random_chats(&db_pool).await.unwrap();
        assert_eq!(sample.len(), 1);
        let contents: Vec<&str> = sample[0].messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m4", "m3", "m2"]);
    }
}
