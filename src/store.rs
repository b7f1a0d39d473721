//! Report store abstraction.
//!
//! The [`ReportStore`] trait is the narrow persistence contract the job
//! manager writes finished jobs through. Backends:
//!
//! - [`MemoryReportStore`]: `HashMap` behind a `RwLock`, for tests and
//!   database-less runs.
//! - [`SqliteReportStore`](crate::sqlite_store::SqliteReportStore): durable.
//!
//! Retention is the backend's concern; the pipeline only saves and fetches.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use uuid::Uuid;

use crate::models::{AnalysisJob, JobSummary};

#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Insert or replace the stored copy of a terminal job.
    async fn save(&self, job: &AnalysisJob) -> Result<()>;

    async fn fetch(&self, id: Uuid) -> Result<Option<AnalysisJob>>;

    /// Most recent jobs first.
    async fn list(&self, limit: usize) -> Result<Vec<JobSummary>>;
}

pub struct MemoryReportStore {
    jobs: RwLock<HashMap<Uuid, AnalysisJob>>,
}

impl MemoryReportStore {
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryReportStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReportStore for MemoryReportStore {
    async fn save(&self, job: &AnalysisJob) -> Result<()> {
        let mut jobs = self
            .jobs
            .write()
            .map_err(|_| anyhow!("report store lock poisoned"))?;
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn fetch(&self, id: Uuid) -> Result<Option<AnalysisJob>> {
        let jobs = self
            .jobs
            .read()
            .map_err(|_| anyhow!("report store lock poisoned"))?;
        Ok(jobs.get(&id).cloned())
    }

    async fn list(&self, limit: usize) -> Result<Vec<JobSummary>> {
        let jobs = self
            .jobs
            .read()
            .map_err(|_| anyhow!("report store lock poisoned"))?;
        let mut summaries: Vec<JobSummary> = jobs.values().map(JobSummary::from).collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        summaries.truncate(limit);
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobStatus;

    #[tokio::test]
    async fn save_replaces_and_lists_newest_first() {
        let store = MemoryReportStore::new();

        let mut older = AnalysisJob::new("older.txt", None);
        older.created_at = chrono::Utc::now() - chrono::Duration::minutes(5);
        let mut newer = AnalysisJob::new("newer.pdf", Some("u-1".to_string()));
        store.save(&older).await.unwrap();
        store.save(&newer).await.unwrap();

        newer.status = JobStatus::Failed;
        store.save(&newer).await.unwrap();

        let listed = store.list(10).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].filename, "newer.pdf");
        assert_eq!(listed[0].status, JobStatus::Failed);

        assert_eq!(store.list(1).await.unwrap().len(), 1);
        let fetched = store.fetch(older.id).await.unwrap().unwrap();
        assert_eq!(fetched.filename, "older.txt");
        assert!(store.fetch(Uuid::new_v4()).await.unwrap().is_none());
    }
}
