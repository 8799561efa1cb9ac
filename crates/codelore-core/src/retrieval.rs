//! Multi-source retrieval and answer assembly.
//!
//! # Algorithm
//!
//! 1. Embed the question once; the same vector drives every sub-search.
//! 2. Concurrently rank knowledge notes, tasks, commits and document chunks,
//!    plus a two-stage code search: the top files by summary vector, then the
//!    top chunks restricted to those files.
//! 3. A sub-search failing with a missing table is logged and skipped. Any
//!    other failure aborts retrieval.
//! 4. Render one labelled context block per source type and a provenance
//!    list with no duplicate `(type, id)` pairs.
//! 5. No context and no history fails with
//!    [`Error::InsufficientContext`](crate::error::Error::InsufficientContext).
//! 6. Ask the model for a streamed completion constrained to that context.

use std::collections::HashSet;
use std::future::Future;

use anyhow::Result;
use chrono::DateTime;

use crate::error::{is_missing_table, Error};
use crate::gateway::{ModelGateway, TextStream};
use crate::models::{ChatMessage, Source, SourceType};
use crate::store::{ChunkHit, CommitHit, DocumentChunkHit, FileHit, NoteHit, RetrievalStore, TaskHit};

/// How many candidates each sub-search keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrievalLimits {
    pub notes_k: usize,
    pub tasks_k: usize,
    pub commits_k: usize,
    pub documents_k: usize,
    pub files_k: usize,
    pub chunks_k: usize,
}

impl Default for RetrievalLimits {
    fn default() -> Self {
        Self {
            notes_k: 2,
            tasks_k: 3,
            commits_k: 3,
            documents_k: 3,
            files_k: 5,
            chunks_k: 10,
        }
    }
}

/// Everything the sub-searches returned for one question.
#[derive(Debug, Clone, Default)]
pub struct RetrievedContext {
    pub notes: Vec<NoteHit>,
    pub tasks: Vec<TaskHit>,
    pub commits: Vec<CommitHit>,
    pub documents: Vec<DocumentChunkHit>,
    /// File candidates of the first code stage.
    pub files: Vec<FileHit>,
    /// Chunks of the second code stage, all belonging to `files`.
    pub chunks: Vec<ChunkHit>,
}

/// A streamed answer together with the sources behind it.
pub struct Answer {
    pub stream: TextStream,
    pub sources: Vec<Source>,
}

const NO_CONTEXT: &str = "No indexed material matched this question.";

const SYSTEM_INSTRUCTION: &str = "You answer questions about a software project. \
Use only the project context below and the conversation so far. \
If they do not contain the answer, say that you do not know instead of guessing. \
Refer to files by path, tasks by number (#N) and commits by short hash when you rely on them.";

async fn optional<T, F>(label: &str, search: F) -> Result<Vec<T>>
where
    F: Future<Output = Result<Vec<T>>>,
{
    match search.await {
        Ok(hits) => Ok(hits),
        Err(e) if is_missing_table(&e) => {
            tracing::warn!(source = label, error = %e, "skipping unavailable source");
            Ok(Vec::new())
        }
        Err(e) => Err(e.context(format!("{} search failed", label))),
    }
}

/// Run every sub-search for `query` and collect the results.
pub async fn retrieve<S>(
    store: &S,
    project_id: i64,
    query: &[f32],
    limits: &RetrievalLimits,
) -> Result<RetrievedContext>
where
    S: RetrievalStore + ?Sized,
{
    let code = async {
        let files = store.nearest_files(project_id, query, limits.files_k).await?;
        if files.is_empty() {
            return Ok((files, Vec::new()));
        }
        let ids: Vec<i64> = files.iter().map(|f| f.id).collect();
        let chunks = store
            .nearest_chunks_in_files(project_id, &ids, query, limits.chunks_k)
            .await?;
        Ok::<_, anyhow::Error>((files, chunks))
    };

    let (notes, tasks, commits, documents, code) = futures::join!(
        optional("knowledge", store.nearest_notes(project_id, query, limits.notes_k)),
        optional("tasks", store.nearest_tasks(project_id, query, limits.tasks_k)),
        optional("commits", store.nearest_commits(project_id, query, limits.commits_k)),
        optional(
            "documents",
            store.nearest_document_chunks(project_id, query, limits.documents_k)
        ),
        async {
            match code.await {
                Ok(found) => Ok(found),
                Err(e) if is_missing_table(&e) => {
                    tracing::warn!(source = "code", error = %e, "skipping unavailable source");
                    Ok((Vec::new(), Vec::new()))
                }
                Err(e) => Err(e.context("code search failed")),
            }
        },
    );
    let (files, chunks) = code?;

    Ok(RetrievedContext {
        notes: notes?,
        tasks: tasks?,
        commits: commits?,
        documents: documents?,
        files,
        chunks,
    })
}

impl RetrievedContext {
    /// True when no sub-search contributed anything usable.
    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
            && self.tasks.is_empty()
            && self.commits.is_empty()
            && self.documents.is_empty()
            && self.chunks.is_empty()
            && !self.files.iter().any(|f| f.summary.is_some())
    }

    /// Files that contribute to the code block: those with matching chunks,
    /// else those with a summary, in file-rank order.
    fn code_files(&self) -> Vec<&FileHit> {
        self.files
            .iter()
            .filter(|f| f.summary.is_some() || self.chunks.iter().any(|c| c.file_id == f.id))
            .collect()
    }

    /// Render one labelled block per source type.
    pub fn render(&self) -> String {
        let mut blocks: Vec<String> = Vec::new();

        if !self.notes.is_empty() {
            let mut b = String::from("## Knowledge notes\n");
            for n in &self.notes {
                b.push_str(&format!("- [note {}] {}\n", n.id, n.content.trim()));
            }
            blocks.push(b);
        }

        if !self.tasks.is_empty() {
            let mut b = String::from("## Tasks\n");
            for t in &self.tasks {
                b.push_str(&format!("- #{} [{}] {}", t.task_number, t.status, t.title.trim()));
                if !t.description.trim().is_empty() {
                    b.push_str(&format!(": {}", t.description.trim()));
                }
                b.push('\n');
            }
            blocks.push(b);
        }

        if !self.commits.is_empty() {
            let mut b = String::from("## Commits\n");
            for c in &self.commits {
                b.push_str(&format!(
                    "- {} ({}, {}): {}\n",
                    short_hash(&c.hash),
                    c.author,
                    format_date(c.timestamp),
                    c.message.trim()
                ));
            }
            blocks.push(b);
        }

        if !self.documents.is_empty() {
            let mut b = String::from("## Documents\n");
            for d in &self.documents {
                b.push_str(&format!("### {}\n{}\n\n", d.file_name, d.content.trim()));
            }
            blocks.push(b);
        }

        let code_files = self.code_files();
        if !code_files.is_empty() {
            let mut b = String::from("## Code\n");
            for f in code_files {
                let chunks: Vec<&ChunkHit> =
                    self.chunks.iter().filter(|c| c.file_id == f.id).collect();
                if chunks.is_empty() {
                    if let Some(summary) = &f.summary {
                        b.push_str(&format!("### {}\nSummary: {}\n\n", f.path, summary.trim()));
                    }
                    continue;
                }
                for c in chunks {
                    b.push_str(&format!(
                        "### {}:{}-{} ({} {})\n```\n{}\n```\n\n",
                        c.path, c.start_line, c.end_line, c.kind, c.name, c.content
                    ));
                }
            }
            blocks.push(b);
        }

        blocks.join("\n").trim_end().to_string()
    }

    /// Provenance for everything in [`render`](Self::render), without
    /// duplicate `(type, id)` pairs.
    pub fn sources(&self) -> Vec<Source> {
        let mut seen: HashSet<(SourceType, String)> = HashSet::new();
        let mut out = Vec::new();
        let mut push = |source_type: SourceType, id: String, title: String| {
            if seen.insert((source_type, id.clone())) {
                out.push(Source {
                    source_type,
                    id,
                    title,
                });
            }
        };

        for n in &self.notes {
            push(SourceType::Knowledge, n.id.to_string(), preview(&n.content, 80));
        }
        for t in &self.tasks {
            push(
                SourceType::Task,
                t.task_number.to_string(),
                format!("#{} {}", t.task_number, t.title),
            );
        }
        for c in &self.commits {
            let subject = c.message.lines().next().unwrap_or("").trim().to_string();
            push(SourceType::Commit, c.hash.clone(), subject);
        }
        for d in &self.documents {
            push(SourceType::Document, d.file_name.clone(), d.file_name.clone());
        }
        for f in self.code_files() {
            push(SourceType::Code, f.path.clone(), f.path.clone());
        }

        out
    }
}

/// Retrieve context for `question` and start a streamed answer.
///
/// `history` holds the prior turns of the conversation, oldest first, and
/// must not include `question` itself.
pub async fn get_answer<S>(
    store: &S,
    gateway: &dyn ModelGateway,
    project_id: i64,
    question: &str,
    history: &[ChatMessage],
    limits: &RetrievalLimits,
) -> Result<Answer>
where
    S: RetrievalStore + ?Sized,
{
    let query = gateway.embed(question).await?;
    let context = retrieve(store, project_id, &query, limits).await?;

    if context.is_empty() && history.is_empty() {
        return Err(Error::InsufficientContext.into());
    }

    let messages = answer_messages(&context, question, history);
    let sources = context.sources();
    tracing::debug!(
        sources = sources.len(),
        history = history.len(),
        "requesting streamed answer"
    );
    let stream = gateway.complete_stream(&messages).await?;

    Ok(Answer { stream, sources })
}

/// System instruction with the rendered context, then history, then the
/// question.
pub fn answer_messages(
    context: &RetrievedContext,
    question: &str,
    history: &[ChatMessage],
) -> Vec<ChatMessage> {
    let rendered = context.render();
    let block = if rendered.is_empty() {
        NO_CONTEXT.to_string()
    } else {
        rendered
    };

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(format!(
        "{}\n\n# Project context\n\n{}",
        SYSTEM_INSTRUCTION, block
    )));
    messages.extend(history.iter().cloned());
    messages.push(ChatMessage::user(question));
    messages
}

fn short_hash(hash: &str) -> &str {
    hash.get(..7).unwrap_or(hash)
}

fn format_date(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn preview(text: &str, max_chars: usize) -> String {
    let line = text.lines().next().unwrap_or("").trim();
    if line.chars().count() <= max_chars {
        line.to_string()
    } else {
        let cut: String = line.chars().take(max_chars).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkDraft, ChunkKind, CommitInfo, TaskStatus};
    use crate::store::memory::InMemoryStore;

    fn draft(name: &str, line: usize) -> ChunkDraft {
        ChunkDraft {
            name: name.to_string(),
            kind: ChunkKind::Function,
            content: format!("fn {}() {{}}", name),
            start_line: line,
            end_line: line,
        }
    }

    fn limits(files_k: usize) -> RetrievalLimits {
        RetrievalLimits {
            files_k,
            ..RetrievalLimits::default()
        }
    }

    #[tokio::test]
    async fn code_chunks_only_come_from_candidate_files() {
        let store = InMemoryStore::new();
        let near = store.add_file(1, "src/near.rs", Some("near"), Some(vec![1.0, 0.0]));
        let far = store.add_file(1, "src/far.rs", Some("far"), Some(vec![0.0, 1.0]));
        store.add_chunk(near, &draft("weak", 1), vec![0.5, 0.5]);
        // Closest chunk overall, but its file is outside the top-1 set.
        store.add_chunk(far, &draft("strong", 1), vec![1.0, 0.0]);

        let ctx = retrieve(&store, 1, &[1.0, 0.0], &limits(1)).await.unwrap();
        assert_eq!(ctx.files.len(), 1);
        assert!(ctx.chunks.iter().all(|c| c.file_id == near));
        assert_eq!(ctx.chunks[0].name, "weak");
    }

    #[tokio::test]
    async fn sources_deduplicate_files_and_documents() {
        let store = InMemoryStore::new();
        let f = store.add_file(1, "src/lib.rs", Some("lib"), Some(vec![1.0, 0.0]));
        store.add_chunk(f, &draft("a", 1), vec![1.0, 0.0]);
        store.add_chunk(f, &draft("b", 5), vec![0.9, 0.1]);
        store.add_document_chunk(1, "design.md", "part one", vec![1.0, 0.0]);
        store.add_document_chunk(1, "design.md", "part two", vec![0.9, 0.1]);

        let ctx = retrieve(&store, 1, &[1.0, 0.0], &RetrievalLimits::default())
            .await
            .unwrap();
        assert_eq!(ctx.chunks.len(), 2);
        assert_eq!(ctx.documents.len(), 2);

        let sources = ctx.sources();
        let keys: Vec<(SourceType, &str)> =
            sources.iter().map(|s| (s.source_type, s.id.as_str())).collect();
        assert_eq!(
            keys,
            vec![
                (SourceType::Document, "design.md"),
                (SourceType::Code, "src/lib.rs"),
            ]
        );
    }

    #[tokio::test]
    async fn missing_document_table_is_skipped() {
        let store = InMemoryStore::without_documents();
        store.add_task(1, 3, "Fix login", "Users cannot log in", TaskStatus::Open, vec![1.0, 0.0]);
        let ctx = retrieve(&store, 1, &[1.0, 0.0], &RetrievalLimits::default())
            .await
            .unwrap();
        assert!(ctx.documents.is_empty());
        assert_eq!(ctx.tasks.len(), 1);
    }

    #[tokio::test]
    async fn render_labels_each_source_type() {
        let store = InMemoryStore::new();
        store.add_note(1, "We chose SQLite.", vec![1.0, 0.0]);
        store.add_task(1, 3, "Fix login", "", TaskStatus::Done, vec![1.0, 0.0]);
        store.add_commit(
            1,
            &CommitInfo {
                hash: "0123456789abcdef".into(),
                author: "dev".into(),
                timestamp: 86_400,
                message: "Add parser\n\nDetails".into(),
            },
            vec![1.0, 0.0],
        );
        let ctx = retrieve(&store, 1, &[1.0, 0.0], &RetrievalLimits::default())
            .await
            .unwrap();
        let text = ctx.render();
        assert!(text.contains("## Knowledge notes\n- [note 1] We chose SQLite."));
        assert!(text.contains("- #3 [done] Fix login\n"));
        assert!(text.contains("- 0123456 (dev, 1970-01-02): Add parser"));
        assert!(!text.contains("## Code"));

        let commit = ctx
            .sources()
            .into_iter()
            .find(|s| s.source_type == SourceType::Commit)
            .unwrap();
        assert_eq!(commit.id, "0123456789abcdef");
        assert_eq!(commit.title, "Add parser");
    }

    #[test]
    fn answer_messages_place_history_before_question() {
        let ctx = RetrievedContext::default();
        let history = vec![ChatMessage::user("earlier"), ChatMessage::assistant("reply")];
        let msgs = answer_messages(&ctx, "now?", &history);
        assert_eq!(msgs.len(), 4);
        assert!(msgs[0].content.contains(NO_CONTEXT));
        assert_eq!(msgs[1].content, "earlier");
        assert_eq!(msgs[3], ChatMessage::user("now?"));
    }
}
