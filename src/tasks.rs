//! Tasks: user-created, retrospective (from commits), closed by commits.
//!
//! Task numbers come from the project's `next_task_number` counter, bumped in
//! the same transaction as the insert, so numbers are unique and strictly
//! increasing per project even after deletions.

use anyhow::Result;
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool};

use codelore_core::embedding::vec_to_blob;
use codelore_core::error::Error;
use codelore_core::gateway::{truncate_chars, ModelGateway};
use codelore_core::models::TaskStatus;

use crate::db::now_ts;

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: i64,
    pub project_id: i64,
    pub task_number: i64,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub category: Option<String>,
    /// Hash of the commit a retrospective task was generated from.
    pub source_commit: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub category: Option<String>,
    pub status: TaskStatus,
    /// Defaults to now.
    pub created_at: Option<i64>,
    pub source_commit: Option<String>,
}

impl NewTask {
    pub fn open(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            category: None,
            status: TaskStatus::Open,
            created_at: None,
            source_commit: None,
        }
    }

    /// Text the task vector is computed from.
    pub fn embedding_text(&self) -> String {
        if self.description.trim().is_empty() {
            self.title.clone()
        } else {
            format!("{}\n\n{}", self.title, self.description)
        }
    }
}

fn from_row(row: &SqliteRow) -> Task {
    let status: String = row.get("status");
    Task {
        id: row.get("id"),
        project_id: row.get("project_id"),
        task_number: row.get("task_number"),
        title: row.get("title"),
        description: row.get("description"),
        status: status.parse().unwrap_or(TaskStatus::Open),
        category: row.get("category"),
        source_commit: row.get("source_commit"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

const SELECT: &str = "SELECT id, project_id, task_number, title, description, status, category, \
                      source_commit, created_at, updated_at FROM tasks";

/// Embed and insert a task in its own transaction.
pub async fn create_task(
    pool: &SqlitePool,
    gateway: &dyn ModelGateway,
    max_embed_chars: usize,
    project_id: i64,
    new: NewTask,
) -> Result<Task> {
    if new.title.trim().is_empty() {
        anyhow::bail!("Task title must not be empty");
    }
    let text = new.embedding_text();
    let vector = gateway.embed(truncate_chars(&text, max_embed_chars)).await?;

    let mut tx = pool.begin().await?;
    let task = insert_task(&mut *tx, project_id, &new, Some(&vector)).await?;
    tx.commit().await?;
    Ok(task)
}

/// Assign the next task number and insert. Runs on the caller's connection
/// so it can join a larger transaction.
pub(crate) async fn insert_task(
    conn: &mut SqliteConnection,
    project_id: i64,
    new: &NewTask,
    vector: Option<&[f32]>,
) -> Result<Task> {
    let number: Option<i64> = sqlx::query_scalar(
        "UPDATE projects SET next_task_number = next_task_number + 1 WHERE id = ? \
         RETURNING next_task_number - 1",
    )
    .bind(project_id)
    .fetch_optional(&mut *conn)
    .await?;
    let number = number.ok_or_else(|| Error::not_found("project", project_id.to_string()))?;

    let now = now_ts();
    let created_at = new.created_at.unwrap_or(now);
    let id: i64 = sqlx::query_scalar(
        r#"
        INSERT INTO tasks (project_id, task_number, title, description, status, category,
                           vector, source_commit, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(project_id)
    .bind(number)
    .bind(new.title.trim())
    .bind(new.description.trim())
    .bind(new.status.as_str())
    .bind(&new.category)
    .bind(vector.map(vec_to_blob))
    .bind(&new.source_commit)
    .bind(created_at)
    .bind(created_at.max(now))
    .fetch_one(&mut *conn)
    .await?;

    Ok(Task {
        id,
        project_id,
        task_number: number,
        title: new.title.trim().to_string(),
        description: new.description.trim().to_string(),
        status: new.status,
        category: new.category.clone(),
        source_commit: new.source_commit.clone(),
        created_at,
        updated_at: created_at.max(now),
    })
}

pub async fn list_tasks(
    pool: &SqlitePool,
    project_id: i64,
    status: Option<TaskStatus>,
) -> Result<Vec<Task>> {
    let rows = match status {
        Some(s) => {
            sqlx::query(&format!(
                "{} WHERE project_id = ? AND status = ? ORDER BY task_number",
                SELECT
            ))
            .bind(project_id)
            .bind(s.as_str())
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(&format!("{} WHERE project_id = ? ORDER BY task_number", SELECT))
                .bind(project_id)
                .fetch_all(pool)
                .await?
        }
    };
    Ok(rows.iter().map(from_row).collect())
}

pub async fn get_task(pool: &SqlitePool, project_id: i64, number: i64) -> Result<Task> {
    let row = sqlx::query(&format!(
        "{} WHERE project_id = ? AND task_number = ?",
        SELECT
    ))
    .bind(project_id)
    .bind(number)
    .fetch_optional(pool)
    .await?;
    row.map(|r| from_row(&r))
        .ok_or_else(|| Error::not_found("task", format!("#{}", number)).into())
}

pub async fn set_task_status(
    pool: &SqlitePool,
    project_id: i64,
    number: i64,
    status: TaskStatus,
) -> Result<Task> {
    let result = sqlx::query(
        "UPDATE tasks SET status = ?, updated_at = ? WHERE project_id = ? AND task_number = ?",
    )
    .bind(status.as_str())
    .bind(now_ts())
    .bind(project_id)
    .bind(number)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::not_found("task", format!("#{}", number)).into());
    }
    get_task(pool, project_id, number).await
}

/// Mark a task done. Returns false when it does not exist or is already done.
pub async fn close_task<'e, E>(executor: E, project_id: i64, number: i64) -> Result<bool>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "UPDATE tasks SET status = 'done', updated_at = ? \
         WHERE project_id = ? AND task_number = ? AND status != 'done'",
    )
    .bind(now_ts())
    .bind(project_id)
    .bind(number)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}
