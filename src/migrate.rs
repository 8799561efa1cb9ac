use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

const CORE_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS projects (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        source TEXT NOT NULL UNIQUE,
        next_task_number INTEGER NOT NULL DEFAULT 1,
        last_ingested_at INTEGER,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS indexed_files (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
        path TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        summary TEXT,
        summary_vector BLOB,
        indexed_at INTEGER NOT NULL,
        UNIQUE(project_id, path)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS code_chunks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        file_id INTEGER NOT NULL REFERENCES indexed_files(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        kind TEXT NOT NULL,
        content TEXT NOT NULL,
        start_line INTEGER NOT NULL,
        end_line INTEGER NOT NULL,
        vector BLOB
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS commits (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
        hash TEXT NOT NULL,
        author TEXT NOT NULL,
        committed_at INTEGER NOT NULL,
        message TEXT NOT NULL,
        message_vector BLOB,
        UNIQUE(project_id, hash)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS commit_files (
        commit_id INTEGER NOT NULL REFERENCES commits(id) ON DELETE CASCADE,
        file_id INTEGER NOT NULL REFERENCES indexed_files(id) ON DELETE CASCADE,
        change_type TEXT NOT NULL,
        PRIMARY KEY (commit_id, file_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tasks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
        task_number INTEGER NOT NULL,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT 'open' CHECK (status IN ('open', 'in_progress', 'done')),
        category TEXT,
        vector BLOB,
        source_commit TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        UNIQUE(project_id, task_number)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS conversations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
        title TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS conversation_messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        conversation_id INTEGER NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
        role TEXT NOT NULL CHECK (role IN ('system', 'user', 'assistant')),
        content TEXT NOT NULL,
        sources_json TEXT,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS knowledge_notes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
        conversation_id INTEGER REFERENCES conversations(id) ON DELETE SET NULL,
        content TEXT NOT NULL,
        vector BLOB,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS knowledge_note_links (
        note_id INTEGER NOT NULL REFERENCES knowledge_notes(id) ON DELETE CASCADE,
        file_id INTEGER REFERENCES indexed_files(id) ON DELETE CASCADE,
        task_id INTEGER REFERENCES tasks(id) ON DELETE CASCADE,
        commit_id INTEGER REFERENCES commits(id) ON DELETE CASCADE,
        CHECK ((file_id IS NOT NULL) + (task_id IS NOT NULL) + (commit_id IS NOT NULL) = 1)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_indexed_files_project ON indexed_files(project_id)",
    "CREATE INDEX IF NOT EXISTS idx_code_chunks_file ON code_chunks(file_id)",
    "CREATE INDEX IF NOT EXISTS idx_commits_project ON commits(project_id)",
    "CREATE INDEX IF NOT EXISTS idx_tasks_project_status ON tasks(project_id, status)",
    "CREATE INDEX IF NOT EXISTS idx_messages_conversation ON conversation_messages(conversation_id)",
    "CREATE INDEX IF NOT EXISTS idx_notes_project ON knowledge_notes(project_id)",
];

const DOCUMENT_SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS project_documents (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        project_id INTEGER NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
        file_name TEXT NOT NULL,
        content_hash TEXT NOT NULL,
        char_count INTEGER NOT NULL,
        uploaded_at INTEGER NOT NULL,
        UNIQUE(project_id, file_name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS document_chunks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        document_id INTEGER NOT NULL REFERENCES project_documents(id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        content TEXT NOT NULL,
        start_line INTEGER NOT NULL,
        end_line INTEGER NOT NULL,
        vector BLOB
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_document_chunks_document ON document_chunks(document_id)",
];

/// Open the configured database, apply the schema and close the pool.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool, config).await?;
    pool.close().await;
    Ok(())
}

/// Apply the schema to an open pool. Safe to run repeatedly.
pub async fn apply(pool: &SqlitePool, config: &Config) -> Result<()> {
    for statement in CORE_SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }

    if config.features.documents {
        for statement in DOCUMENT_SCHEMA {
            sqlx::query(statement).execute(pool).await?;
        }
    } else {
        tracing::debug!("documents feature disabled; skipping document tables");
    }

    Ok(())
}
