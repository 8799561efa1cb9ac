//! Git history sync engine.
//!
//! Commits are replayed oldest first. Every model and git call for a commit
//! happens up front; the commit row, its file links, the tasks its message
//! closes and its retrospective task are then written in one transaction.
//! A thrown error leaves the commit unrecorded so the next run retries it.
//! A reply that cannot be parsed, or the trivial sentinel, still records
//! the commit, just without a task.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::Result;
use serde::Serialize;
use sqlx::Row;

use codelore_core::commit::{parse_name_status, referenced_task_numbers};
use codelore_core::embedding::vec_to_blob;
use codelore_core::gateway::truncate_chars;
use codelore_core::models::{CommitInfo, TaskStatus};
use codelore_core::retrospective::{parse_retrospective, retrospective_messages, Retrospective};

use crate::app::App;
use crate::progress::{progress_line, IngestLogger};
use crate::tasks::{close_task, insert_task, NewTask};
use crate::vcs::DiffSpec;

#[derive(Debug, Clone, Default, Serialize)]
pub struct GitSyncReport {
    pub commits_seen: u64,
    pub already_recorded: u64,
    pub commits_added: u64,
    pub file_links: u64,
    pub tasks_closed: u64,
    pub tasks_created: u64,
    pub trivial: u64,
    pub retrospective_failed: u64,
    pub failed: u64,
}

/// Append every commit of `repo` not yet recorded for `project_id`.
pub async fn sync_history(
    app: &App,
    project_id: i64,
    repo: &Path,
    logger: &dyn IngestLogger,
) -> Result<GitSyncReport> {
    let mut report = GitSyncReport::default();

    let known = load_known_hashes(app, project_id).await?;
    let file_ids = load_file_ids(app, project_id).await?;

    let mut log = app.vcs.log(repo).await?;
    log.reverse();
    report.commits_seen = log.len() as u64;

    let pending: Vec<&CommitInfo> = log.iter().filter(|c| !known.contains(&c.hash)).collect();
    report.already_recorded = report.commits_seen - pending.len() as u64;
    logger.log(&format!(
        "history: {} commits, {} new",
        report.commits_seen,
        pending.len()
    ));

    let total = pending.len() as u64;
    for (i, commit) in pending.into_iter().enumerate() {
        match record_commit(app, project_id, repo, commit, &file_ids).await {
            Ok(recorded) => {
                report.commits_added += 1;
                report.file_links += recorded.links;
                report.tasks_closed += recorded.closed.len() as u64;
                for number in &recorded.closed {
                    logger.log(&format!("commit {} closed task #{}", short(&commit.hash), number));
                }

                match recorded.retrospective {
                    Some(Outcome::Created(number)) => {
                        report.tasks_created += 1;
                        logger.log(&format!(
                            "commit {} -> retrospective task #{}",
                            short(&commit.hash),
                            number
                        ));
                    }
                    Some(Outcome::Trivial) => report.trivial += 1,
                    Some(Outcome::Rejected(reason)) => {
                        report.retrospective_failed += 1;
                        tracing::warn!(commit = %commit.hash, reason = %reason, "unusable retrospective reply");
                        logger.log(&format!(
                            "commit {}: no retrospective task ({})",
                            short(&commit.hash),
                            reason
                        ));
                    }
                    None => {}
                }
            }
            Err(e) => {
                report.failed += 1;
                tracing::warn!(commit = %commit.hash, error = %e, "commit sync failed");
                logger.log(&format!("failed commit {}: {:#}", short(&commit.hash), e));
            }
        }

        if let Some(line) = progress_line("commits", i as u64 + 1, total, 25) {
            logger.log(&line);
        }
    }

    logger.log(&format!(
        "history: {} added, {} tasks closed, {} retrospective tasks, {} trivial, {} failed",
        report.commits_added,
        report.tasks_closed,
        report.tasks_created,
        report.trivial,
        report.failed
    ));
    Ok(report)
}

async fn load_known_hashes(app: &App, project_id: i64) -> Result<HashSet<String>> {
    let rows = sqlx::query("SELECT hash FROM commits WHERE project_id = ?")
        .bind(project_id)
        .fetch_all(&app.pool)
        .await?;
    Ok(rows.iter().map(|r| r.get("hash")).collect())
}

async fn load_file_ids(app: &App, project_id: i64) -> Result<HashMap<String, i64>> {
    let rows = sqlx::query("SELECT id, path FROM indexed_files WHERE project_id = ?")
        .bind(project_id)
        .fetch_all(&app.pool)
        .await?;
    Ok(rows.iter().map(|r| (r.get("path"), r.get("id"))).collect())
}

struct Recorded {
    links: u64,
    /// Numbers actually flipped to done.
    closed: Vec<i64>,
    /// Set only for commits that reference no task.
    retrospective: Option<Outcome>,
}

enum Outcome {
    Created(i64),
    Trivial,
    Rejected(String),
}

/// What the retrospective step decided before anything is written.
enum Plan {
    Task(NewTask, Vec<f32>),
    Trivial,
    Rejected(String),
}

async fn record_commit(
    app: &App,
    project_id: i64,
    repo: &Path,
    commit: &CommitInfo,
    file_ids: &HashMap<String, i64>,
) -> Result<Recorded> {
    let vector = app
        .gateway
        .embed(truncate_chars(&commit.message, app.config.ingest.max_embed_chars))
        .await?;
    let name_status = app
        .vcs
        .show(repo, &DiffSpec::NameStatus(commit.hash.clone()))
        .await?;
    let changes = parse_name_status(&name_status);
    let references = referenced_task_numbers(&commit.message);

    let plan = if references.is_empty() {
        Some(plan_retrospective(app, repo, commit).await?)
    } else {
        None
    };

    let mut tx = app.pool.begin().await?;

    let commit_id: i64 = sqlx::query_scalar(
        "INSERT INTO commits (project_id, hash, author, committed_at, message, message_vector) \
         VALUES (?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(project_id)
    .bind(&commit.hash)
    .bind(&commit.author)
    .bind(commit.timestamp)
    .bind(&commit.message)
    .bind(vec_to_blob(&vector))
    .fetch_one(&mut *tx)
    .await?;

    let mut links = 0;
    for change in &changes {
        let Some(file_id) = file_ids.get(&change.path) else {
            continue;
        };
        let result = sqlx::query(
            "INSERT OR IGNORE INTO commit_files (commit_id, file_id, change_type) VALUES (?, ?, ?)",
        )
        .bind(commit_id)
        .bind(file_id)
        .bind(&change.change_type)
        .execute(&mut *tx)
        .await?;
        links += result.rows_affected();
    }

    let mut closed = Vec::new();
    for number in &references {
        if close_task(&mut *tx, project_id, *number).await? {
            closed.push(*number);
        }
    }

    let retrospective = match plan {
        Some(Plan::Task(new, task_vector)) => {
            let created = insert_task(&mut *tx, project_id, &new, Some(&task_vector)).await?;
            Some(Outcome::Created(created.task_number))
        }
        Some(Plan::Trivial) => Some(Outcome::Trivial),
        Some(Plan::Rejected(reason)) => Some(Outcome::Rejected(reason)),
        None => None,
    };

    tx.commit().await?;

    Ok(Recorded {
        links,
        closed,
        retrospective,
    })
}

/// Ask the model what this commit accomplished. Errors are transient and
/// abort the whole commit; unusable replies come back as a [`Plan`].
async fn plan_retrospective(app: &App, repo: &Path, commit: &CommitInfo) -> Result<Plan> {
    let ingest = &app.config.ingest;
    let patch = app
        .vcs
        .show(repo, &DiffSpec::Patch(commit.hash.clone()))
        .await?;
    if patch.len() < ingest.min_patch_bytes {
        return Ok(Plan::Trivial);
    }

    let messages = retrospective_messages(commit, &patch, ingest.max_patch_chars);
    let reply = app.gateway.complete(&messages).await?;
    let task = match parse_retrospective(&reply) {
        Retrospective::Task(task) => task,
        Retrospective::Trivial => return Ok(Plan::Trivial),
        Retrospective::Unparseable(reason) => return Ok(Plan::Rejected(reason)),
    };

    let vector = app
        .gateway
        .embed(truncate_chars(&task.embedding_text(), ingest.max_embed_chars))
        .await?;

    let new = NewTask {
        title: task.title,
        description: task.description,
        category: Some(task.category),
        status: TaskStatus::Done,
        created_at: Some(commit.timestamp),
        source_commit: Some(commit.hash.clone()),
    };
    Ok(Plan::Task(new, vector))
}

fn short(hash: &str) -> &str {
    hash.get(..7).unwrap_or(hash)
}
