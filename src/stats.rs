//! Per-project index statistics.
//!
//! A quick summary of what's indexed for one project: files, chunks,
//! commits, tasks by status, documents and knowledge notes. Used by
//! `lore stats` to confirm that ingestion is doing what it should.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use codelore_core::error::is_missing_table;

use crate::config::Config;
use crate::db;
use crate::projects::Project;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProjectStats {
    pub files: i64,
    pub summarized_files: i64,
    pub chunks: i64,
    pub commits: i64,
    pub tasks_open: i64,
    pub tasks_in_progress: i64,
    pub tasks_done: i64,
    /// Zero when the documents feature is off.
    pub documents: i64,
    pub document_chunks: i64,
    pub knowledge_notes: i64,
}

impl ProjectStats {
    pub fn tasks_total(&self) -> i64 {
        self.tasks_open + self.tasks_in_progress + self.tasks_done
    }
}

pub async fn project_stats(pool: &SqlitePool, project_id: i64) -> Result<ProjectStats> {
    let files = sqlx::query(
        "SELECT COUNT(*) AS total, COUNT(summary_vector) AS summarized \
         FROM indexed_files WHERE project_id = ?",
    )
    .bind(project_id)
    .fetch_one(pool)
    .await?;

    let mut stats = ProjectStats {
        files: files.get("total"),
        summarized_files: files.get("summarized"),
        chunks: count(
            pool,
            "SELECT COUNT(*) FROM code_chunks c JOIN indexed_files f ON f.id = c.file_id \
             WHERE f.project_id = ?",
            project_id,
        )
        .await?,
        commits: count(pool, "SELECT COUNT(*) FROM commits WHERE project_id = ?", project_id)
            .await?,
        knowledge_notes: count(
            pool,
            "SELECT COUNT(*) FROM knowledge_notes WHERE project_id = ?",
            project_id,
        )
        .await?,
        ..Default::default()
    };

    let rows = sqlx::query(
        "SELECT status, COUNT(*) AS n FROM tasks WHERE project_id = ? GROUP BY status",
    )
    .bind(project_id)
    .fetch_all(pool)
    .await?;
    for row in &rows {
        let status: String = row.get("status");
        let n: i64 = row.get("n");
        match status.as_str() {
            "open" => stats.tasks_open = n,
            "in_progress" => stats.tasks_in_progress = n,
            "done" => stats.tasks_done = n,
            _ => {}
        }
    }

    stats.documents = optional_count(
        pool,
        "SELECT COUNT(*) FROM project_documents WHERE project_id = ?",
        project_id,
    )
    .await?;
    stats.document_chunks = optional_count(
        pool,
        "SELECT COUNT(*) FROM document_chunks c JOIN project_documents d ON d.id = c.document_id \
         WHERE d.project_id = ?",
        project_id,
    )
    .await?;

    Ok(stats)
}

async fn count(pool: &SqlitePool, sql: &str, project_id: i64) -> Result<i64> {
    sqlx::query_scalar(sql)
        .bind(project_id)
        .fetch_one(pool)
        .await
        .map_err(db::classify)
}

/// Like [`count`], but a missing table counts as zero.
async fn optional_count(pool: &SqlitePool, sql: &str, project_id: i64) -> Result<i64> {
    match count(pool, sql, project_id).await {
        Err(e) if is_missing_table(&e) => Ok(0),
        other => other,
    }
}

/// Print the stats block for `project`.
pub fn print_stats(config: &Config, project: &Project, stats: &ProjectStats) {
    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);
    let last = match project.last_ingested_at {
        Some(ts) => format_ts_relative(ts),
        None => "never".to_string(),
    };

    println!("Project {} (#{})", project.name, project.id);
    println!("================================");
    println!();
    println!("  Source:      {}", project.source);
    println!("  Ingested:    {}", last);
    println!("  Database:    {} ({})", config.db.path.display(), format_bytes(db_size));
    println!();
    println!(
        "  Files:       {} ({} summarized)",
        stats.files, stats.summarized_files
    );
    println!("  Chunks:      {}", stats.chunks);
    println!("  Commits:     {}", stats.commits);
    println!(
        "  Tasks:       {} (open {}, in progress {}, done {})",
        stats.tasks_total(),
        stats.tasks_open,
        stats.tasks_in_progress,
        stats.tasks_done
    );
    if config.features.documents {
        println!(
            "  Documents:   {} ({} chunks)",
            stats.documents, stats.document_chunks
        );
    }
    println!("  Notes:       {}", stats.knowledge_notes);
    println!();
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// "3 hours ago" style, falling back to a date past 30 days.
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
