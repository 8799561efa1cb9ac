//! File sync engine: bring `indexed_files` / `code_chunks` in line with disk.
//!
//! 1. Walk the tree with the project [`IgnorePolicy`] and load the stored
//!    `(path, content_hash)` pairs.
//! 2. Prune stored paths that are gone from disk, in one batch.
//! 3. For every walked file, hash the content and skip it when it is empty,
//!    oversized, not UTF-8, or unchanged.
//! 4. Otherwise summarize and embed it, then write the file row and its full
//!    chunk set in one transaction.
//!
//! Every model call for a file happens before its transaction opens. A
//! failure for one file rolls back that file only; the run continues.
//!
//! Skipping never touches stored state. A previously indexed file that
//! becomes empty, oversized or non-UTF-8 keeps its old row and chunks, which
//! stay retrievable until the file changes back or is deleted.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::{QueryBuilder, Row, Sqlite};

use codelore_core::chunk::chunk_file;
use codelore_core::embedding::vec_to_blob;
use codelore_core::gateway::truncate_chars;
use codelore_core::models::{ChatMessage, ChunkDraft};

use crate::app::App;
use crate::db::now_ts;
use crate::progress::{progress_line, IngestLogger};
use crate::walk::{walk_project, IgnorePolicy};

const SUMMARY_PROMPT: &str = "You summarize source files for a project index. \
Reply with one or two plain sentences describing what the file is for. No preamble.";

#[derive(Debug, Clone, Default, Serialize)]
pub struct FileSyncReport {
    pub scanned: u64,
    pub pruned: u64,
    pub indexed: u64,
    pub unchanged: u64,
    pub skipped: u64,
    pub failed: u64,
    pub chunks_written: u64,
}

struct StoredFile {
    id: i64,
    hash: String,
}

/// Sync the stored index for `project_id` with the tree at `root`.
pub async fn sync_files(
    app: &App,
    project_id: i64,
    root: &Path,
    logger: &dyn IngestLogger,
) -> Result<FileSyncReport> {
    let mut report = FileSyncReport::default();

    let policy = IgnorePolicy::load(root, &app.config.ingest.exclude_globs)?;
    let paths = walk_project(root, &policy)?;
    report.scanned = paths.len() as u64;
    logger.log(&format!("files: {} candidates under {}", paths.len(), root.display()));

    let stored = load_stored(app, project_id).await?;
    report.pruned = prune(app, project_id, root, &paths, &stored).await?;
    if report.pruned > 0 {
        logger.log(&format!("files: pruned {} deleted paths", report.pruned));
    }

    let total = paths.len() as u64;
    for (i, rel) in paths.iter().enumerate() {
        let existing = stored.get(rel.as_str());
        match prepare(app, root, rel, existing) {
            Ok(Prepared::Skip(reason)) => {
                report.skipped += 1;
                logger.log(&format!("skipped {}: {}", rel, reason));
            }
            Ok(Prepared::Unchanged) => report.unchanged += 1,
            Ok(Prepared::Changed { content, hash }) => {
                match index_file(app, project_id, rel, &content, &hash, existing.map(|s| s.id))
                    .await
                {
                    Ok(chunks) => {
                        report.indexed += 1;
                        report.chunks_written += chunks;
                    }
                    Err(e) => {
                        report.failed += 1;
                        tracing::warn!(path = %rel, error = %e, "file indexing failed");
                        logger.log(&format!("failed {}: {:#}", rel, e));
                    }
                }
            }
            Err(e) => {
                report.failed += 1;
                tracing::warn!(path = %rel, error = %e, "file read failed");
                logger.log(&format!("failed {}: {:#}", rel, e));
            }
        }

        if let Some(line) = progress_line("files", i as u64 + 1, total, 25) {
            logger.log(&line);
        }
    }

    logger.log(&format!(
        "files: {} indexed ({} chunks), {} unchanged, {} skipped, {} failed",
        report.indexed, report.chunks_written, report.unchanged, report.skipped, report.failed
    ));
    Ok(report)
}

async fn load_stored(app: &App, project_id: i64) -> Result<HashMap<String, StoredFile>> {
    let rows = sqlx::query("SELECT id, path, content_hash FROM indexed_files WHERE project_id = ?")
        .bind(project_id)
        .fetch_all(&app.pool)
        .await?;
    Ok(rows
        .iter()
        .map(|row| {
            (
                row.get::<String, _>("path"),
                StoredFile {
                    id: row.get("id"),
                    hash: row.get("content_hash"),
                },
            )
        })
        .collect())
}

/// Delete stored files missing from the walk that also no longer exist on
/// disk. Chunks and links go with them by cascade.
async fn prune(
    app: &App,
    project_id: i64,
    root: &Path,
    walked: &[String],
    stored: &HashMap<String, StoredFile>,
) -> Result<u64> {
    let on_disk: HashSet<&str> = walked.iter().map(String::as_str).collect();
    let doomed: Vec<i64> = stored
        .iter()
        .filter(|(path, _)| !on_disk.contains(path.as_str()) && !root.join(path).exists())
        .map(|(_, file)| file.id)
        .collect();
    if doomed.is_empty() {
        return Ok(0);
    }

    let mut tx = app.pool.begin().await?;
    let mut qb: QueryBuilder<Sqlite> =
        QueryBuilder::new("DELETE FROM indexed_files WHERE project_id = ");
    qb.push_bind(project_id);
    qb.push(" AND id IN (");
    let mut sep = qb.separated(", ");
    for id in &doomed {
        sep.push_bind(*id);
    }
    sep.push_unseparated(")");
    let result = qb.build().execute(&mut *tx).await?;
    tx.commit().await?;

    Ok(result.rows_affected())
}

enum Prepared {
    Skip(&'static str),
    Unchanged,
    Changed { content: String, hash: String },
}

fn prepare(app: &App, root: &Path, rel: &str, existing: Option<&StoredFile>) -> Result<Prepared> {
    let path = root.join(rel);
    let meta = std::fs::metadata(&path)
        .with_context(|| format!("Failed to stat {}", path.display()))?;
    if meta.len() > app.config.ingest.max_file_bytes {
        return Ok(Prepared::Skip("too large"));
    }

    let bytes =
        std::fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    let content = match String::from_utf8(bytes) {
        Ok(s) => s,
        Err(_) => return Ok(Prepared::Skip("not valid UTF-8")),
    };
    if content.trim().is_empty() {
        return Ok(Prepared::Skip("empty"));
    }

    let hash = content_hash(&content);
    if existing.map(|s| s.hash == hash).unwrap_or(false) {
        return Ok(Prepared::Unchanged);
    }
    Ok(Prepared::Changed { content, hash })
}

pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Summarize, chunk and embed one file, then replace its stored rows.
/// Returns the number of chunks written.
async fn index_file(
    app: &App,
    project_id: i64,
    rel: &str,
    content: &str,
    hash: &str,
    existing_id: Option<i64>,
) -> Result<u64> {
    let ingest = &app.config.ingest;

    let messages = vec![
        ChatMessage::system(SUMMARY_PROMPT),
        ChatMessage::user(format!(
            "File: {}\n\n{}",
            rel,
            truncate_chars(content, ingest.max_summary_input_chars)
        )),
    ];
    let summary = app.gateway.complete(&messages).await?.trim().to_string();
    if summary.is_empty() {
        bail!("model returned an empty summary");
    }

    let chunks = chunk_file(rel, content);
    let mut texts = Vec::with_capacity(chunks.len() + 1);
    texts.push(truncate_chars(&summary, ingest.max_embed_chars).to_string());
    for chunk in &chunks {
        texts.push(truncate_chars(&chunk_embedding_text(rel, chunk), ingest.max_embed_chars).to_string());
    }
    let vectors = app.gateway.embed_texts(&texts).await?;
    if vectors.len() != texts.len() {
        bail!(
            "embedding count mismatch: sent {}, received {}",
            texts.len(),
            vectors.len()
        );
    }

    let now = now_ts();
    let summary_blob = vec_to_blob(&vectors[0]);
    let mut tx = app.pool.begin().await?;

    let file_id = match existing_id {
        Some(id) => {
            sqlx::query(
                "UPDATE indexed_files SET content_hash = ?, summary = ?, summary_vector = ?, indexed_at = ? \
                 WHERE id = ?",
            )
            .bind(hash)
            .bind(&summary)
            .bind(&summary_blob)
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;
            sqlx::query("DELETE FROM code_chunks WHERE file_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            id
        }
        None => {
            sqlx::query_scalar(
                "INSERT INTO indexed_files (project_id, path, content_hash, summary, summary_vector, indexed_at) \
                 VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
            )
            .bind(project_id)
            .bind(rel)
            .bind(hash)
            .bind(&summary)
            .bind(&summary_blob)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?
        }
    };

    for (chunk, vector) in chunks.iter().zip(&vectors[1..]) {
        sqlx::query(
            "INSERT INTO code_chunks (file_id, name, kind, content, start_line, end_line, vector) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(file_id)
        .bind(&chunk.name)
        .bind(chunk.kind.as_str())
        .bind(&chunk.content)
        .bind(chunk.start_line as i64)
        .bind(chunk.end_line as i64)
        .bind(vec_to_blob(vector))
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(chunks.len() as u64)
}

/// Text a chunk vector is computed from: location header plus body.
fn chunk_embedding_text(path: &str, chunk: &ChunkDraft) -> String {
    format!(
        "{} ({} {})\n{}",
        path,
        chunk.kind.as_str(),
        chunk.name,
        chunk.content
    )
}
