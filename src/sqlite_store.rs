//! [`RetrievalStore`] over the SQLite index.
//!
//! Candidate rows for a project are loaded with their vector BLOBs and ranked
//! in process by cosine distance. Database errors pass through
//! [`db::classify`] so a missing optional table surfaces as
//! `Error::MissingTable`.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use codelore_core::embedding::{blob_to_vec, nearest};
use codelore_core::models::{ChunkKind, TaskStatus};
use codelore_core::store::{
    ChunkHit, CommitHit, DocumentChunkHit, FileHit, NoteHit, RetrievalStore, TaskHit,
};

use crate::db;

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn rows(&self, sql: &str, project_id: i64) -> Result<Vec<SqliteRow>> {
        sqlx::query(sql)
            .bind(project_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db::classify)
    }
}

/// Pair each row with its decoded vector, rank, and write the distance back.
fn rank<T>(
    rows: Vec<SqliteRow>,
    vector_column: &str,
    query: &[f32],
    k: usize,
    build: impl Fn(&SqliteRow) -> T,
    set_distance: impl Fn(&mut T, f32),
) -> Vec<T> {
    let items: Vec<(T, Vec<f32>)> = rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get(vector_column);
            (build(row), blob_to_vec(&blob))
        })
        .collect();

    nearest(items, query, k, |(_, v)| Some(v.as_slice()))
        .into_iter()
        .map(|((mut item, _), distance)| {
            set_distance(&mut item, distance);
            item
        })
        .collect()
}

#[async_trait]
impl RetrievalStore for SqliteStore {
    async fn nearest_notes(
        &self,
        project_id: i64,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<NoteHit>> {
        let rows = self
            .rows(
                "SELECT id, content, vector FROM knowledge_notes \
                 WHERE project_id = ? AND vector IS NOT NULL",
                project_id,
            )
            .await?;
        Ok(rank(
            rows,
            "vector",
            query,
            k,
            |row| NoteHit {
                id: row.get("id"),
                content: row.get("content"),
                distance: 0.0,
            },
            |hit, d| hit.distance = d,
        ))
    }

    async fn nearest_tasks(
        &self,
        project_id: i64,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<TaskHit>> {
        let rows = self
            .rows(
                "SELECT task_number, title, description, status, category, vector FROM tasks \
                 WHERE project_id = ? AND vector IS NOT NULL",
                project_id,
            )
            .await?;
        Ok(rank(
            rows,
            "vector",
            query,
            k,
            |row| {
                let status: String = row.get("status");
                TaskHit {
                    task_number: row.get("task_number"),
                    title: row.get("title"),
                    description: row.get("description"),
                    status: status.parse().unwrap_or(TaskStatus::Open),
                    category: row.get("category"),
                    distance: 0.0,
                }
            },
            |hit, d| hit.distance = d,
        ))
    }

    async fn nearest_commits(
        &self,
        project_id: i64,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<CommitHit>> {
        let rows = self
            .rows(
                "SELECT hash, author, committed_at, message, message_vector FROM commits \
                 WHERE project_id = ? AND message_vector IS NOT NULL",
                project_id,
            )
            .await?;
        Ok(rank(
            rows,
            "message_vector",
            query,
            k,
            |row| CommitHit {
                hash: row.get("hash"),
                author: row.get("author"),
                timestamp: row.get("committed_at"),
                message: row.get("message"),
                distance: 0.0,
            },
            |hit, d| hit.distance = d,
        ))
    }

    async fn nearest_document_chunks(
        &self,
        project_id: i64,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<DocumentChunkHit>> {
        let rows = self
            .rows(
                "SELECT d.file_name, c.content, c.vector FROM document_chunks c \
                 JOIN project_documents d ON d.id = c.document_id \
                 WHERE d.project_id = ? AND c.vector IS NOT NULL",
                project_id,
            )
            .await?;
        Ok(rank(
            rows,
            "vector",
            query,
            k,
            |row| DocumentChunkHit {
                file_name: row.get("file_name"),
                content: row.get("content"),
                distance: 0.0,
            },
            |hit, d| hit.distance = d,
        ))
    }

    async fn nearest_files(
        &self,
        project_id: i64,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<FileHit>> {
        let rows = self
            .rows(
                "SELECT id, path, summary, summary_vector FROM indexed_files \
                 WHERE project_id = ? AND summary_vector IS NOT NULL",
                project_id,
            )
            .await?;
        Ok(rank(
            rows,
            "summary_vector",
            query,
            k,
            |row| FileHit {
                id: row.get("id"),
                path: row.get("path"),
                summary: row.get("summary"),
                distance: 0.0,
            },
            |hit, d| hit.distance = d,
        ))
    }

    async fn nearest_chunks_in_files(
        &self,
        project_id: i64,
        file_ids: &[i64],
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ChunkHit>> {
        if file_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT c.file_id, f.path, c.name, c.kind, c.content, c.start_line, c.end_line, c.vector \
             FROM code_chunks c JOIN indexed_files f ON f.id = c.file_id \
             WHERE c.vector IS NOT NULL AND f.project_id = ",
        );
        qb.push_bind(project_id);
        qb.push(" AND c.file_id IN (");
        let mut sep = qb.separated(", ");
        for id in file_ids {
            sep.push_bind(*id);
        }
        sep.push_unseparated(")");

        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(db::classify)?;

        Ok(rank(
            rows,
            "vector",
            query,
            k,
            |row| {
                let kind: String = row.get("kind");
                ChunkHit {
                    file_id: row.get("file_id"),
                    path: row.get("path"),
                    name: row.get("name"),
                    kind: ChunkKind::parse(&kind),
                    content: row.get("content"),
                    start_line: row.get("start_line"),
                    end_line: row.get("end_line"),
                    distance: 0.0,
                }
            },
            |hit, d| hit.distance = d,
        ))
    }
}
