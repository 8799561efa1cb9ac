//! Ingestion pipeline orchestration.
//!
//! Coordinates one full run for a project: resolve source → file sync →
//! git history sync → stamp `last_ingested_at`. File sync always completes
//! before history sync starts because commit-file links look files up by
//! path. Safe to re-run at any time; unchanged files and recorded commits are
//! skipped.

use anyhow::Result;
use serde::Serialize;

use crate::app::App;
use crate::file_sync::{sync_files, FileSyncReport};
use crate::git_sync::{sync_history, GitSyncReport};
use crate::progress::IngestLogger;
use crate::projects;

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    pub files: FileSyncReport,
    /// `None` when the working tree is not a git repository.
    pub history: Option<GitSyncReport>,
}

impl IngestReport {
    /// Items that failed and were skipped.
    pub fn failures(&self) -> u64 {
        self.files.failed + self.history.as_ref().map(|h| h.failed).unwrap_or(0)
    }
}

pub async fn run_ingestion(
    app: &App,
    project_id: i64,
    source: &str,
    logger: &dyn IngestLogger,
) -> Result<IngestReport> {
    projects::get_project(&app.pool, project_id).await?;

    logger.log(&format!("resolving {}", source));
    let root = app.vcs.clone_or_pull(source).await?;

    let files = sync_files(app, project_id, &root, logger).await?;

    let history = if app.vcs.is_repository(&root) {
        Some(sync_history(app, project_id, &root, logger).await?)
    } else {
        logger.log("history: not a git repository, skipping");
        None
    };

    projects::mark_ingested(&app.pool, project_id).await?;

    let report = IngestReport { files, history };
    tracing::info!(
        project_id,
        files_indexed = report.files.indexed,
        commits_added = report.history.as_ref().map(|h| h.commits_added).unwrap_or(0),
        failures = report.failures(),
        "ingestion finished"
    );
    logger.log("done");
    Ok(report)
}
