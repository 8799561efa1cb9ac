//! In-memory [`RetrievalStore`] for tests and embedding without a database.
//!
//! Everything lives in `Vec`s behind one `std::sync::RwLock`. Ranking is
//! brute-force cosine distance via [`crate::embedding::nearest`].

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::Result;
use async_trait::async_trait;

use super::{ChunkHit, CommitHit, DocumentChunkHit, FileHit, NoteHit, RetrievalStore, TaskHit};
use crate::embedding::nearest;
use crate::error::Error;
use crate::models::{ChunkDraft, CommitInfo, TaskStatus};

struct Row<T> {
    project_id: i64,
    item: T,
    vector: Option<Vec<f32>>,
}

#[derive(Default)]
struct Tables {
    next_id: i64,
    notes: Vec<Row<NoteHit>>,
    tasks: Vec<Row<TaskHit>>,
    commits: Vec<Row<CommitHit>>,
    documents: Vec<Row<DocumentChunkHit>>,
    files: Vec<Row<FileHit>>,
    chunks: Vec<Row<ChunkHit>>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

pub struct InMemoryStore {
    tables: RwLock<Tables>,
    documents_enabled: bool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            documents_enabled: true,
        }
    }

    /// A store whose document table is absent, as when the documents
    /// feature was never migrated.
    pub fn without_documents() -> Self {
        Self {
            documents_enabled: false,
            ..Self::new()
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_note(&self, project_id: i64, content: &str, vector: Vec<f32>) -> i64 {
        let mut t = self.write();
        let id = t.next_id();
        t.notes.push(Row {
            project_id,
            item: NoteHit {
                id,
                content: content.to_string(),
                distance: 0.0,
            },
            vector: Some(vector),
        });
        id
    }

    pub fn add_task(
        &self,
        project_id: i64,
        task_number: i64,
        title: &str,
        description: &str,
        status: TaskStatus,
        vector: Vec<f32>,
    ) {
        self.write().tasks.push(Row {
            project_id,
            item: TaskHit {
                task_number,
                title: title.to_string(),
                description: description.to_string(),
                status,
                category: None,
                distance: 0.0,
            },
            vector: Some(vector),
        });
    }

    pub fn add_commit(&self, project_id: i64, commit: &CommitInfo, vector: Vec<f32>) {
        self.write().commits.push(Row {
            project_id,
            item: CommitHit {
                hash: commit.hash.clone(),
                author: commit.author.clone(),
                timestamp: commit.timestamp,
                message: commit.message.clone(),
                distance: 0.0,
            },
            vector: Some(vector),
        });
    }

    pub fn add_document_chunk(
        &self,
        project_id: i64,
        file_name: &str,
        content: &str,
        vector: Vec<f32>,
    ) {
        self.write().documents.push(Row {
            project_id,
            item: DocumentChunkHit {
                file_name: file_name.to_string(),
                content: content.to_string(),
                distance: 0.0,
            },
            vector: Some(vector),
        });
    }

    /// Add an indexed file; `summary_vector` is `None` for unsummarized files.
    pub fn add_file(
        &self,
        project_id: i64,
        path: &str,
        summary: Option<&str>,
        summary_vector: Option<Vec<f32>>,
    ) -> i64 {
        let mut t = self.write();
        let id = t.next_id();
        t.files.push(Row {
            project_id,
            item: FileHit {
                id,
                path: path.to_string(),
                summary: summary.map(str::to_string),
                distance: 0.0,
            },
            vector: summary_vector,
        });
        id
    }

    pub fn add_chunk(&self, file_id: i64, chunk: &ChunkDraft, vector: Vec<f32>) {
        let mut t = self.write();
        let Some((project_id, path)) = t
            .files
            .iter()
            .find(|f| f.item.id == file_id)
            .map(|f| (f.project_id, f.item.path.clone()))
        else {
            return;
        };
        t.chunks.push(Row {
            project_id,
            item: ChunkHit {
                file_id,
                path,
                name: chunk.name.clone(),
                kind: chunk.kind,
                content: chunk.content.clone(),
                start_line: chunk.start_line as i64,
                end_line: chunk.end_line as i64,
                distance: 0.0,
            },
            vector: Some(vector),
        });
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn rank<T, F>(rows: &[Row<T>], query: &[f32], k: usize, keep: F) -> Vec<(T, f32)>
where
    T: Clone,
    F: Fn(&Row<T>) -> bool,
{
    let candidates: Vec<&Row<T>> = rows.iter().filter(|r| keep(r)).collect();
    nearest(candidates, query, k, |r| r.vector.as_deref())
        .into_iter()
        .map(|(r, d)| (r.item.clone(), d))
        .collect()
}

#[async_trait]
impl RetrievalStore for InMemoryStore {
    async fn nearest_notes(&self, project_id: i64, query: &[f32], k: usize) -> Result<Vec<NoteHit>> {
        let t = self.read();
        Ok(rank(&t.notes, query, k, |r| r.project_id == project_id)
            .into_iter()
            .map(|(item, distance)| NoteHit { distance, ..item })
            .collect())
    }

    async fn nearest_tasks(&self, project_id: i64, query: &[f32], k: usize) -> Result<Vec<TaskHit>> {
        let t = self.read();
        Ok(rank(&t.tasks, query, k, |r| r.project_id == project_id)
            .into_iter()
            .map(|(item, distance)| TaskHit { distance, ..item })
            .collect())
    }

    async fn nearest_commits(
        &self,
        project_id: i64,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<CommitHit>> {
        let t = self.read();
        Ok(rank(&t.commits, query, k, |r| r.project_id == project_id)
            .into_iter()
            .map(|(item, distance)| CommitHit { distance, ..item })
            .collect())
    }

    async fn nearest_document_chunks(
        &self,
        project_id: i64,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<DocumentChunkHit>> {
        if !self.documents_enabled {
            return Err(Error::MissingTable("document_chunks".to_string()).into());
        }
        let t = self.read();
        Ok(rank(&t.documents, query, k, |r| r.project_id == project_id)
            .into_iter()
            .map(|(item, distance)| DocumentChunkHit { distance, ..item })
            .collect())
    }

    async fn nearest_files(&self, project_id: i64, query: &[f32], k: usize) -> Result<Vec<FileHit>> {
        let t = self.read();
        Ok(rank(&t.files, query, k, |r| r.project_id == project_id)
            .into_iter()
            .map(|(item, distance)| FileHit { distance, ..item })
            .collect())
    }

    async fn nearest_chunks_in_files(
        &self,
        project_id: i64,
        file_ids: &[i64],
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ChunkHit>> {
        let t = self.read();
        Ok(rank(&t.chunks, query, k, |r| {
            r.project_id == project_id && file_ids.contains(&r.item.file_id)
        })
        .into_iter()
        .map(|(item, distance)| ChunkHit { distance, ..item })
        .collect())
    }
}
