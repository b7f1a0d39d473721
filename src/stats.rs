//! Dashboard statistics.
//!
//! Aggregates over job summaries: how many documents were checked, how
//! many finished, and the average plagiarism and AI scores of completed
//! analyses. Used by `vtx stats` and `GET /stats`.

use anyhow::Result;
use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;

use crate::jobs::JobManager;
use crate::models::{JobStatus, JobSummary};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardStats {
    pub total_documents: usize,
    pub completed: usize,
    pub failed: usize,
    pub in_progress: usize,
    /// Mean over completed jobs, one decimal. `0.0` when none completed.
    pub avg_plagiarism: f64,
    pub avg_ai: f64,
    /// Jobs created in the current calendar month (UTC).
    pub this_month: usize,
}

impl DashboardStats {
    pub fn from_summaries(summaries: &[JobSummary], now: DateTime<Utc>) -> Self {
        let mut stats = DashboardStats {
            total_documents: summaries.len(),
            completed: 0,
            failed: 0,
            in_progress: 0,
            avg_plagiarism: 0.0,
            avg_ai: 0.0,
            this_month: 0,
        };

        let (mut plagiarism_sum, mut ai_sum, mut scored) = (0u64, 0u64, 0u64);
        for summary in summaries {
            match summary.status {
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Pending | JobStatus::Processing => stats.in_progress += 1,
            }
            if let (JobStatus::Completed, Some(scores)) = (summary.status, summary.scores) {
                plagiarism_sum += u64::from(scores.plagiarism);
                ai_sum += u64::from(scores.ai);
                scored += 1;
            }
            if summary.created_at.year() == now.year() && summary.created_at.month() == now.month()
            {
                stats.this_month += 1;
            }
        }

        if scored > 0 {
            stats.avg_plagiarism = round1(plagiarism_sum as f64 / scored as f64);
            stats.avg_ai = round1(ai_sum as f64 / scored as f64);
        }
        stats
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Statistics over every job the manager knows about.
pub async fn collect(jobs: &JobManager) -> Result<DashboardStats> {
    let summaries = jobs.list(usize::MAX).await?;
    Ok(DashboardStats::from_summaries(&summaries, Utc::now()))
}

/// CLI entry point: print the dashboard numbers.
pub async fn run_stats(jobs: &JobManager) -> Result<()> {
    let stats = collect(jobs).await?;

    println!("Veritext — Dashboard Stats");
    println!("==========================");
    println!();
    println!("  Documents checked: {}", stats.total_documents);
    println!("  This month:        {}", stats.this_month);
    println!("  Completed:         {}", stats.completed);
    println!("  Failed:            {}", stats.failed);
    println!("  In progress:       {}", stats.in_progress);
    println!();
    println!("  Avg plagiarism:    {:.1}%", stats.avg_plagiarism);
    println!("  Avg AI content:    {:.1}%", stats.avg_ai);

    Ok(())
}
