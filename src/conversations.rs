//! Conversation log.
//!
//! Messages are stored in insertion order. Assistant messages keep the
//! provenance list of the answer they carry as JSON in `sources_json`;
//! knowledge capture reads it back to link notes to what was cited.

use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use codelore_core::error::Error;
use codelore_core::models::{ChatMessage, Role, Source};

use crate::db::now_ts;

#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: i64,
    pub project_id: i64,
    pub title: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoredMessage {
    pub id: i64,
    pub role: Role,
    pub content: String,
    pub sources: Vec<Source>,
    pub created_at: i64,
}

impl StoredMessage {
    pub fn chat(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

fn message_from_row(row: &SqliteRow) -> StoredMessage {
    let role: String = row.get("role");
    let sources_json: Option<String> = row.get("sources_json");
    let sources = sources_json
        .and_then(|json| match serde_json::from_str::<Vec<Source>>(&json) {
            Ok(list) => Some(list),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable sources_json");
                None
            }
        })
        .unwrap_or_default();
    StoredMessage {
        id: row.get("id"),
        role: role.parse().unwrap_or(Role::User),
        content: row.get("content"),
        sources,
        created_at: row.get("created_at"),
    }
}

pub async fn create_conversation(
    pool: &SqlitePool,
    project_id: i64,
    title: &str,
) -> Result<Conversation> {
    let now = now_ts();
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO conversations (project_id, title, created_at) VALUES (?, ?, ?) RETURNING id",
    )
    .bind(project_id)
    .bind(title)
    .bind(now)
    .fetch_one(pool)
    .await?;
    Ok(Conversation {
        id,
        project_id,
        title: title.to_string(),
        created_at: now,
    })
}

/// Fetch a conversation, checking it belongs to `project_id`.
pub async fn get_conversation(
    pool: &SqlitePool,
    project_id: i64,
    conversation_id: i64,
) -> Result<Conversation> {
    let row = sqlx::query(
        "SELECT id, project_id, title, created_at FROM conversations WHERE id = ? AND project_id = ?",
    )
    .bind(conversation_id)
    .bind(project_id)
    .fetch_optional(pool)
    .await?;
    let row = row.ok_or_else(|| Error::not_found("conversation", conversation_id.to_string()))?;
    Ok(Conversation {
        id: row.get("id"),
        project_id: row.get("project_id"),
        title: row.get("title"),
        created_at: row.get("created_at"),
    })
}

pub async fn append_message(
    conn: &mut SqliteConnection,
    conversation_id: i64,
    role: Role,
    content: &str,
    sources: &[Source],
) -> Result<i64> {
    let sources_json = if sources.is_empty() {
        None
    } else {
        Some(serde_json::to_string(sources).context("Failed to serialize sources")?)
    };
    let id = sqlx::query_scalar(
        "INSERT INTO conversation_messages (conversation_id, role, content, sources_json, created_at) \
         VALUES (?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(conversation_id)
    .bind(role.as_str())
    .bind(content)
    .bind(sources_json)
    .bind(now_ts())
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}

/// Every stored message, oldest first.
pub async fn list_messages(pool: &SqlitePool, conversation_id: i64) -> Result<Vec<StoredMessage>> {
    let rows = sqlx::query(
        "SELECT id, role, content, sources_json, created_at FROM conversation_messages \
         WHERE conversation_id = ? ORDER BY id",
    )
    .bind(conversation_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(message_from_row).collect())
}

/// Prior turns in the shape the answer prompt expects.
pub async fn load_history(pool: &SqlitePool, conversation_id: i64) -> Result<Vec<ChatMessage>> {
    Ok(list_messages(pool, conversation_id)
        .await?
        .iter()
        .map(StoredMessage::chat)
        .collect())
}

/// Store a completed question/answer pair in one transaction.
pub async fn record_turn(
    pool: &SqlitePool,
    conversation_id: i64,
    question: &str,
    answer: &str,
    sources: &[Source],
) -> Result<()> {
    let mut tx = pool.begin().await?;
    append_message(&mut *tx, conversation_id, Role::User, question, &[]).await?;
    append_message(&mut *tx, conversation_id, Role::Assistant, answer, sources).await?;
    tx.commit().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use codelore_core::models::SourceType;

    async fn setup() -> (tempfile::TempDir, SqlitePool, i64) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::minimal(dir.path().join("lore.sqlite"));
        let pool = crate::db::connect(&config).await.unwrap();
        crate::migrate::apply(&pool, &config).await.unwrap();
        let project = crate::projects::create_project(&pool, "demo", "https://example.com/demo.git")
            .await
            .unwrap();
        (dir, pool, project.id)
    }

    #[tokio::test]
    async fn turns_round_trip_with_sources() {
        let (_dir, pool, project_id) = setup().await;
        let conv = create_conversation(&pool, project_id, "auth").await.unwrap();
        let sources = vec![Source {
            source_type: SourceType::Code,
            id: "src/auth.rs".into(),
            title: "src/auth.rs".into(),
        }];
        record_turn(&pool, conv.id, "How is auth done?", "With tokens.", &sources)
            .await
            .unwrap();

        let messages = list_messages(&pool, conv.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert!(messages[0].sources.is_empty());
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].sources, sources);

        let history = load_history(&pool, conv.id).await.unwrap();
        assert_eq!(history[1].content, "With tokens.");
    }

    #[tokio::test]
    async fn conversation_is_scoped_to_project() {
        let (_dir, pool, project_id) = setup().await;
        let conv = create_conversation(&pool, project_id, "x").await.unwrap();
        assert!(get_conversation(&pool, project_id, conv.id).await.is_ok());
        assert!(get_conversation(&pool, project_id + 1, conv.id).await.is_err());
    }
}
