//! Core data models shared by the ingestion engines and the retrieval engine.
//!
//! Row-shaped types (files, chunks, commits, tasks) live here so both the
//! SQLite store in the application crate and the in-memory store used by
//! tests speak the same vocabulary.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    InProgress,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Open => "open",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "open" => Ok(TaskStatus::Open),
            "in_progress" => Ok(TaskStatus::InProgress),
            "done" => Ok(TaskStatus::Done),
            other => anyhow::bail!(
                "Unknown task status: '{}'. Must be open, in_progress, or done.",
                other
            ),
        }
    }
}

/// Structural kind of a code chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkKind {
    Function,
    Class,
    Method,
    Arrow,
    Block,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkKind::Function => "function",
            ChunkKind::Class => "class",
            ChunkKind::Method => "method",
            ChunkKind::Arrow => "arrow",
            ChunkKind::Block => "block",
        }
    }

    /// Parse a stored kind; unknown values fall back to [`ChunkKind::Block`].
    pub fn parse(s: &str) -> Self {
        match s {
            "function" => ChunkKind::Function,
            "class" => ChunkKind::Class,
            "method" => ChunkKind::Method,
            "arrow" => ChunkKind::Arrow,
            _ => ChunkKind::Block,
        }
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chunk produced by one of the chunkers, before it is embedded and stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkDraft {
    pub name: String,
    pub kind: ChunkKind,
    pub content: String,
    /// 1-indexed, inclusive.
    pub start_line: usize,
    /// 1-indexed, inclusive.
    pub end_line: usize,
}

/// One entry of a commit log, as reported by the version-control collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub hash: String,
    pub author: String,
    /// Unix seconds.
    pub timestamp: i64,
    pub message: String,
}

impl CommitInfo {
    /// First line of the commit message.
    pub fn subject(&self) -> &str {
        self.message.lines().next().unwrap_or("").trim()
    }
}

/// A single (change-type, path) pair parsed from `--name-status` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    /// Single-letter git status: `A`, `M`, `D`, `R`, `C`, `T`.
    pub change_type: String,
    pub path: String,
}

/// Chat role for model messages and stored conversation messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => anyhow::bail!("Unknown message role: '{}'", other),
        }
    }
}

/// A message sent to (or received from) the completion model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Kind of stored entity a [`Source`] points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Code,
    Task,
    Commit,
    Document,
    Knowledge,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Code => "code",
            SourceType::Task => "task",
            SourceType::Commit => "commit",
            SourceType::Document => "document",
            SourceType::Knowledge => "knowledge",
        }
    }
}

/// Provenance record for one item that contributed to an answer context.
///
/// `id` is the natural key of the entity within its project: the file path
/// for code, the task number for tasks, the commit hash for commits, the file
/// name for documents and the note id for knowledge notes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Source {
    #[serde(rename = "type")]
    pub source_type: SourceType,
    pub id: String,
    pub title: String,
}
