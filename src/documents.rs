//! Uploaded project documents.
//!
//! A document is extracted to text, chunked with the text chunker, embedded
//! and written in one transaction that first removes any earlier upload with
//! the same file name. All operations here fail with `MissingTable` when the
//! documents feature is off and the tables were never migrated.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use codelore_core::chunk::text::{chunk_markdown, chunk_paragraphs};
use codelore_core::chunk::whole_file_chunk;
use codelore_core::embedding::vec_to_blob;
use codelore_core::error::Error;
use codelore_core::gateway::truncate_chars;
use codelore_core::models::ChunkDraft;

use crate::app::App;
use crate::db::{self, now_ts};
use crate::extract::{extract_text, is_markdown, ExtractError};
use crate::file_sync::content_hash;

#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: i64,
    pub project_id: i64,
    pub file_name: String,
    pub content_hash: String,
    pub char_count: i64,
    pub uploaded_at: i64,
    pub chunk_count: i64,
}

fn from_row(row: &SqliteRow) -> Document {
    Document {
        id: row.get("id"),
        project_id: row.get("project_id"),
        file_name: row.get("file_name"),
        content_hash: row.get("content_hash"),
        char_count: row.get("char_count"),
        uploaded_at: row.get("uploaded_at"),
        chunk_count: row.get("chunk_count"),
    }
}

const SELECT: &str = "SELECT d.id, d.project_id, d.file_name, d.content_hash, d.char_count, d.uploaded_at, \
                      (SELECT COUNT(*) FROM document_chunks c WHERE c.document_id = d.id) AS chunk_count \
                      FROM project_documents d";

/// Read `path` from disk and store it under its file name.
pub async fn add_document(app: &App, project_id: i64, path: &Path) -> Result<Document> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .with_context(|| format!("Not a file path: {}", path.display()))?;
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    add_document_bytes(app, project_id, &file_name, &bytes).await
}

pub async fn add_document_bytes(
    app: &App,
    project_id: i64,
    file_name: &str,
    bytes: &[u8],
) -> Result<Document> {
    let text = extract_text(bytes, file_name).map_err(|e| match e {
        ExtractError::UnsupportedFileType(ext) => anyhow::Error::new(Error::UnsupportedFileType(ext)),
        other => anyhow::Error::new(other).context(format!("Failed to extract {}", file_name)),
    })?;
    if text.trim().is_empty() {
        bail!("No text could be extracted from {}", file_name);
    }

    let chunks = chunk_document(file_name, &text);
    let max = app.config.ingest.max_embed_chars;
    let texts: Vec<String> = chunks
        .iter()
        .map(|c| truncate_chars(&c.content, max).to_string())
        .collect();
    let vectors = app.gateway.embed_texts(&texts).await?;
    if vectors.len() != chunks.len() {
        bail!(
            "embedding count mismatch: sent {}, received {}",
            chunks.len(),
            vectors.len()
        );
    }

    let hash = content_hash(&text);
    let char_count = text.chars().count() as i64;
    let now = now_ts();

    let mut tx = app.pool.begin().await?;
    sqlx::query("DELETE FROM project_documents WHERE project_id = ? AND file_name = ?")
        .bind(project_id)
        .bind(file_name)
        .execute(&mut *tx)
        .await
        .map_err(db::classify)?;

    let id: i64 = sqlx::query_scalar(
        "INSERT INTO project_documents (project_id, file_name, content_hash, char_count, uploaded_at) \
         VALUES (?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(project_id)
    .bind(file_name)
    .bind(&hash)
    .bind(char_count)
    .bind(now)
    .fetch_one(&mut *tx)
    .await
    .map_err(db::classify)?;

    for (chunk, vector) in chunks.iter().zip(&vectors) {
        sqlx::query(
            "INSERT INTO document_chunks (document_id, name, content, start_line, end_line, vector) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(&chunk.name)
        .bind(&chunk.content)
        .bind(chunk.start_line as i64)
        .bind(chunk.end_line as i64)
        .bind(vec_to_blob(vector))
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    tracing::debug!(file_name, chunks = chunks.len(), "document stored");
    Ok(Document {
        id,
        project_id,
        file_name: file_name.to_string(),
        content_hash: hash,
        char_count,
        uploaded_at: now,
        chunk_count: chunks.len() as i64,
    })
}

/// Markdown by headings, everything else by paragraphs; never empty.
fn chunk_document(file_name: &str, text: &str) -> Vec<ChunkDraft> {
    let chunks = if is_markdown(file_name) {
        chunk_markdown(text)
    } else {
        chunk_paragraphs(text)
    };
    if chunks.is_empty() {
        vec![whole_file_chunk(file_name, text)]
    } else {
        chunks
    }
}

pub async fn list_documents(pool: &SqlitePool, project_id: i64) -> Result<Vec<Document>> {
    let rows = sqlx::query(&format!("{} WHERE d.project_id = ? ORDER BY d.file_name", SELECT))
        .bind(project_id)
        .fetch_all(pool)
        .await
        .map_err(db::classify)?;
    Ok(rows.iter().map(from_row).collect())
}

/// Returns false when no document had that name.
pub async fn remove_document(pool: &SqlitePool, project_id: i64, file_name: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM project_documents WHERE project_id = ? AND file_name = ?")
        .bind(project_id)
        .bind(file_name)
        .execute(pool)
        .await
        .map_err(db::classify)?;
    Ok(result.rows_affected() > 0)
}
