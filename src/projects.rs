//! Project registry.
//!
//! A project is identified by its source (a git URL or a local path) and owns
//! every other row by cascade.

use anyhow::Result;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use codelore_core::error::Error;

use crate::db::now_ts;

#[derive(Debug, Clone, Serialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub source: String,
    pub next_task_number: i64,
    pub last_ingested_at: Option<i64>,
    pub created_at: i64,
}

fn from_row(row: &SqliteRow) -> Project {
    Project {
        id: row.get("id"),
        name: row.get("name"),
        source: row.get("source"),
        next_task_number: row.get("next_task_number"),
        last_ingested_at: row.get("last_ingested_at"),
        created_at: row.get("created_at"),
    }
}

const SELECT: &str =
    "SELECT id, name, source, next_task_number, last_ingested_at, created_at FROM projects";

/// Existing local directories are stored by canonical path so the same tree
/// always maps to the same project.
pub fn normalize_source(source: &str) -> String {
    let path = std::path::Path::new(source);
    if path.is_dir() {
        if let Ok(canonical) = path.canonicalize() {
            return canonical.to_string_lossy().to_string();
        }
    }
    source.trim().to_string()
}

/// Register a project. Returns the existing project when `source` is known.
pub async fn create_project(pool: &SqlitePool, name: &str, source: &str) -> Result<Project> {
    let source = normalize_source(source);
    if name.trim().is_empty() {
        anyhow::bail!("Project name must not be empty");
    }

    sqlx::query(
        "INSERT INTO projects (name, source, created_at) VALUES (?, ?, ?) ON CONFLICT(source) DO NOTHING",
    )
    .bind(name.trim())
    .bind(&source)
    .bind(now_ts())
    .execute(pool)
    .await?;

    let row = sqlx::query(&format!("{} WHERE source = ?", SELECT))
        .bind(&source)
        .fetch_one(pool)
        .await?;
    Ok(from_row(&row))
}

pub async fn get_project(pool: &SqlitePool, id: i64) -> Result<Project> {
    let row = sqlx::query(&format!("{} WHERE id = ?", SELECT))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.map(|r| from_row(&r))
        .ok_or_else(|| Error::not_found("project", id.to_string()).into())
}

/// Look a project up by numeric id or by name.
pub async fn find_project(pool: &SqlitePool, key: &str) -> Result<Project> {
    if let Ok(id) = key.parse::<i64>() {
        if let Ok(project) = get_project(pool, id).await {
            return Ok(project);
        }
    }

    let row = sqlx::query(&format!("{} WHERE name = ? ORDER BY id LIMIT 1", SELECT))
        .bind(key)
        .fetch_optional(pool)
        .await?;
    row.map(|r| from_row(&r))
        .ok_or_else(|| Error::not_found("project", key).into())
}

pub async fn list_projects(pool: &SqlitePool) -> Result<Vec<Project>> {
    let rows = sqlx::query(&format!("{} ORDER BY id", SELECT))
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(from_row).collect())
}

pub async fn mark_ingested(pool: &SqlitePool, id: i64) -> Result<()> {
    sqlx::query("UPDATE projects SET last_ingested_at = ? WHERE id = ?")
        .bind(now_ts())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}
