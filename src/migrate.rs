use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// `vtx init`: create the database file and schema.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Idempotent schema setup for the report store.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    // Timestamps are unix milliseconds; JSON columns hold serde payloads.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id TEXT PRIMARY KEY,
            filename TEXT NOT NULL,
            owner TEXT,
            status TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            started_at INTEGER,
            completed_at INTEGER,
            error_json TEXT,
            plagiarism_score INTEGER,
            ai_score INTEGER,
            human_score INTEGER,
            document_json TEXT,
            result_json TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at DESC)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)")
        .execute(pool)
        .await?;

    Ok(())
}
