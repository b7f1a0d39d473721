//! SQLite-backed [`ReportStore`] implementation.
//!
//! One row per job in the `jobs` table. Scores are kept in their own columns
//! so listings never parse the result payload; the document and the result
//! are stored as JSON.

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::db;
use crate::error::JobError;
use crate::migrate;
use crate::models::{AnalysisJob, AnalysisResult, Document, JobStatus, JobSummary, Scores};
use crate::store::ReportStore;

pub struct SqliteReportStore {
    pool: SqlitePool,
}

impl SqliteReportStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connects to the database at `path` and ensures the schema exists.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect_path(path).await?;
        migrate::migrate(&pool).await?;
        Ok(Self::new(pool))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("invalid timestamp: {}", ms))
}

fn json_column<T: serde::de::DeserializeOwned>(row: &SqliteRow, column: &str) -> Result<Option<T>> {
    let raw: Option<String> = row.get(column);
    raw.map(|json| {
        serde_json::from_str(&json).with_context(|| format!("corrupt {} column", column))
    })
    .transpose()
}

fn scores_from_row(row: &SqliteRow) -> Option<Scores> {
    let plagiarism: Option<i64> = row.get("plagiarism_score");
    let ai: Option<i64> = row.get("ai_score");
    let human: Option<i64> = row.get("human_score");
    Some(Scores {
        plagiarism: u8::try_from(plagiarism?).ok()?,
        ai: u8::try_from(ai?).ok()?,
        human: u8::try_from(human?).ok()?,
    })
}

fn parse_id(row: &SqliteRow) -> Result<Uuid> {
    let id: String = row.get("id");
    Uuid::parse_str(&id).with_context(|| format!("invalid job id in store: {}", id))
}

#[async_trait]
impl ReportStore for SqliteReportStore {
    async fn save(&self, job: &AnalysisJob) -> Result<()> {
        let scores = job.result.as_ref().map(|r| r.scores);
        let error_json = job.error.as_ref().map(serde_json::to_string).transpose()?;
        let document_json = job
            .document
            .as_deref()
            .map(serde_json::to_string)
            .transpose()?;
        let result_json = job.result.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO jobs (id, filename, owner, status, created_at, started_at,
                              completed_at, error_json, plagiarism_score, ai_score,
                              human_score, document_json, result_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at,
                error_json = excluded.error_json,
                plagiarism_score = excluded.plagiarism_score,
                ai_score = excluded.ai_score,
                human_score = excluded.human_score,
                document_json = excluded.document_json,
                result_json = excluded.result_json
            "#,
        )
        .bind(job.id.to_string())
        .bind(&job.filename)
        .bind(&job.owner)
        .bind(job.status.as_str())
        .bind(to_millis(job.created_at))
        .bind(job.started_at.map(to_millis))
        .bind(job.completed_at.map(to_millis))
        .bind(error_json)
        .bind(scores.map(|s| i64::from(s.plagiarism)))
        .bind(scores.map(|s| i64::from(s.ai)))
        .bind(scores.map(|s| i64::from(s.human)))
        .bind(document_json)
        .bind(result_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<AnalysisJob>> {
        let row = sqlx::query(
            "SELECT id, filename, owner, status, created_at, started_at, completed_at, \
             error_json, document_json, result_json FROM jobs WHERE id = ?",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status: String = row.get("status");
        let started_at: Option<i64> = row.get("started_at");
        let completed_at: Option<i64> = row.get("completed_at");
        let document: Option<Document> = json_column(&row, "document_json")?;

        Ok(Some(AnalysisJob {
            id: parse_id(&row)?,
            filename: row.get("filename"),
            owner: row.get("owner"),
            status: status.parse::<JobStatus>()?,
            document: document.map(Arc::new),
            result: json_column::<AnalysisResult>(&row, "result_json")?,
            error: json_column::<JobError>(&row, "error_json")?,
            created_at: from_millis(row.get("created_at"))?,
            started_at: started_at.map(from_millis).transpose()?,
            completed_at: completed_at.map(from_millis).transpose()?,
        }))
    }

    async fn list(&self, limit: usize) -> Result<Vec<JobSummary>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            "SELECT id, filename, status, created_at, completed_at, error_json, \
             plagiarism_score, ai_score, human_score \
             FROM jobs ORDER BY created_at DESC, id ASC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<JobSummary> {
                let status: String = row.get("status");
                let completed_at: Option<i64> = row.get("completed_at");
                let error: Option<JobError> = json_column(row, "error_json")?;
                Ok(JobSummary {
                    id: parse_id(row)?,
                    filename: row.get("filename"),
                    status: status.parse()?,
                    scores: scores_from_row(row),
                    error_kind: error.map(|e| e.code().to_string()),
                    created_at: from_millis(row.get("created_at"))?,
                    completed_at: completed_at.map(from_millis).transpose()?,
                })
            })
            .collect()
    }
}
