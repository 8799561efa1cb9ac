//! Knowledge capture: distill a finished conversation into one durable note.
//!
//! The note is embedded like every other entity, so later questions retrieve
//! it, and linked to the files, tasks and commits the conversation's answers
//! cited. Citations that no longer resolve are dropped.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqliteConnection, SqlitePool};

use codelore_core::embedding::vec_to_blob;
use codelore_core::gateway::truncate_chars;
use codelore_core::knowledge::{
    collect_cited_sources, has_exchange, knowledge_messages, parse_knowledge_reply,
};
use codelore_core::models::{Role, Source, SourceType};

use crate::app::App;
use crate::conversations::{get_conversation, list_messages, StoredMessage};
use crate::db::now_ts;

#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeNote {
    pub id: i64,
    pub project_id: i64,
    pub conversation_id: Option<i64>,
    pub content: String,
    /// Link rows written for the note.
    pub links: usize,
    pub created_at: i64,
}

/// Returns `None` when the conversation has no exchange yet or the model
/// found nothing worth recording.
pub async fn capture_knowledge(
    app: &App,
    project_id: i64,
    conversation_id: i64,
) -> Result<Option<KnowledgeNote>> {
    get_conversation(&app.pool, project_id, conversation_id).await?;
    let messages = list_messages(&app.pool, conversation_id).await?;
    let transcript: Vec<_> = messages.iter().map(StoredMessage::chat).collect();
    if !has_exchange(&transcript) {
        tracing::debug!(conversation_id, "no exchange to capture");
        return Ok(None);
    }

    let reply = app.gateway.complete(&knowledge_messages(&transcript)).await?;
    let Some(content) = parse_knowledge_reply(&reply) else {
        tracing::debug!(conversation_id, "model reported no decision");
        return Ok(None);
    };
    let vector = app
        .gateway
        .embed(truncate_chars(&content, app.config.ingest.max_embed_chars))
        .await?;

    let cited = collect_cited_sources(
        messages
            .iter()
            .filter(|m| m.role == Role::Assistant)
            .map(|m| m.sources.as_slice()),
    );

    let now = now_ts();
    let mut tx = app.pool.begin().await?;
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO knowledge_notes (project_id, conversation_id, content, vector, created_at) \
         VALUES (?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(project_id)
    .bind(conversation_id)
    .bind(&content)
    .bind(vec_to_blob(&vector))
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;

    let mut links = 0;
    for source in &cited {
        let Some(link) = resolve(&mut *tx, project_id, source).await? else {
            tracing::debug!(kind = ?source.source_type, id = %source.id, "unresolvable citation dropped");
            continue;
        };
        let (file_id, task_id, commit_id) = match link {
            Link::File(id) => (Some(id), None, None),
            Link::Task(id) => (None, Some(id), None),
            Link::Commit(id) => (None, None, Some(id)),
        };
        sqlx::query(
            "INSERT INTO knowledge_note_links (note_id, file_id, task_id, commit_id) VALUES (?, ?, ?, ?)",
        )
        .bind(id)
        .bind(file_id)
        .bind(task_id)
        .bind(commit_id)
        .execute(&mut *tx)
        .await?;
        links += 1;
    }
    tx.commit().await?;

    Ok(Some(KnowledgeNote {
        id,
        project_id,
        conversation_id: Some(conversation_id),
        content,
        links,
        created_at: now,
    }))
}

enum Link {
    File(i64),
    Task(i64),
    Commit(i64),
}

async fn resolve(
    conn: &mut SqliteConnection,
    project_id: i64,
    source: &Source,
) -> Result<Option<Link>> {
    let link = match source.source_type {
        SourceType::Code => sqlx::query_scalar::<_, i64>(
            "SELECT id FROM indexed_files WHERE project_id = ? AND path = ?",
        )
        .bind(project_id)
        .bind(&source.id)
        .fetch_optional(&mut *conn)
        .await?
        .map(Link::File),
        SourceType::Task => {
            let Ok(number) = source.id.trim_start_matches('#').parse::<i64>() else {
                return Ok(None);
            };
            sqlx::query_scalar::<_, i64>(
                "SELECT id FROM tasks WHERE project_id = ? AND task_number = ?",
            )
            .bind(project_id)
            .bind(number)
            .fetch_optional(&mut *conn)
            .await?
            .map(Link::Task)
        }
        SourceType::Commit => sqlx::query_scalar::<_, i64>(
            "SELECT id FROM commits WHERE project_id = ? AND hash = ?",
        )
        .bind(project_id)
        .bind(&source.id)
        .fetch_optional(&mut *conn)
        .await?
        .map(Link::Commit),
        SourceType::Document | SourceType::Knowledge => None,
    };
    Ok(link)
}

pub async fn list_notes(pool: &SqlitePool, project_id: i64) -> Result<Vec<KnowledgeNote>> {
    let rows = sqlx::query(
        "SELECT n.id, n.project_id, n.conversation_id, n.content, n.created_at, \
         (SELECT COUNT(*) FROM knowledge_note_links l WHERE l.note_id = n.id) AS links \
         FROM knowledge_notes n WHERE n.project_id = ? ORDER BY n.id",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;
    Ok(rows
        .iter()
        .map(|row| KnowledgeNote {
            id: row.get("id"),
            project_id: row.get("project_id"),
            conversation_id: row.get("conversation_id"),
            content: row.get("content"),
            links: row.get::<i64, _>("links") as usize,
            created_at: row.get("created_at"),
        })
        .collect())
}
