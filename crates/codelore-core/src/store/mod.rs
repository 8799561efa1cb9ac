//! Read-side storage abstraction for the retrieval engine.
//!
//! The [`RetrievalStore`] trait exposes one nearest-neighbour query per
//! indexed entity type. Every query ranks by ascending cosine distance to the
//! supplied vector and is scoped to a single project. Backends that lack an
//! optional table (documents) return
//! [`Error::MissingTable`](crate::error::Error::MissingTable) so callers can
//! skip that source instead of failing.
//!
//! | Method | Entity | Vector |
//! |--------|--------|--------|
//! | [`nearest_notes`](RetrievalStore::nearest_notes) | knowledge note | note text |
//! | [`nearest_tasks`](RetrievalStore::nearest_tasks) | task | title + description |
//! | [`nearest_commits`](RetrievalStore::nearest_commits) | commit | message |
//! | [`nearest_document_chunks`](RetrievalStore::nearest_document_chunks) | document chunk | chunk text |
//! | [`nearest_files`](RetrievalStore::nearest_files) | indexed file | summary |
//! | [`nearest_chunks_in_files`](RetrievalStore::nearest_chunks_in_files) | code chunk | chunk text |

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{ChunkKind, TaskStatus};

#[derive(Debug, Clone, PartialEq)]
pub struct NoteHit {
    pub id: i64,
    pub content: String,
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskHit {
    pub task_number: i64,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub category: Option<String>,
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommitHit {
    pub hash: String,
    pub author: String,
    /// Unix seconds.
    pub timestamp: i64,
    pub message: String,
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChunkHit {
    pub file_name: String,
    pub content: String,
    pub distance: f32,
}

/// An indexed file ranked by its summary vector.
#[derive(Debug, Clone, PartialEq)]
pub struct FileHit {
    pub id: i64,
    pub path: String,
    pub summary: Option<String>,
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChunkHit {
    pub file_id: i64,
    pub path: String,
    pub name: String,
    pub kind: ChunkKind,
    pub content: String,
    pub start_line: i64,
    pub end_line: i64,
    pub distance: f32,
}

#[async_trait]
pub trait RetrievalStore: Send + Sync {
    async fn nearest_notes(&self, project_id: i64, query: &[f32], k: usize)
        -> Result<Vec<NoteHit>>;

    async fn nearest_tasks(&self, project_id: i64, query: &[f32], k: usize)
        -> Result<Vec<TaskHit>>;

    async fn nearest_commits(
        &self,
        project_id: i64,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<CommitHit>>;

    async fn nearest_document_chunks(
        &self,
        project_id: i64,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<DocumentChunkHit>>;

    /// Files ranked by summary vector. Files without a summary are skipped.
    async fn nearest_files(&self, project_id: i64, query: &[f32], k: usize)
        -> Result<Vec<FileHit>>;

    /// Code chunks ranked by content vector, restricted to `file_ids`.
    async fn nearest_chunks_in_files(
        &self,
        project_id: i64,
        file_ids: &[i64],
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ChunkHit>>;
}
