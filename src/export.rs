//! Portable report for a completed analysis.
//!
//! [`ReportDocument`] is the data contract an external renderer (PDF, HTML)
//! consumes: scores with their severity bands, the matched sources, and each
//! segment together with the text it covers. `vtx export` writes it as
//! pretty JSON; the server returns the same shape from `/jobs/{id}/report`.

use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{AnalysisJob, JobStatus, Label, Scores, SourceMatch};
use crate::score::ScoreSeverity;
use crate::error::DetectorFailure;

#[derive(Debug, Clone, Serialize)]
pub struct ReportDocument {
    pub job_id: Uuid,
    pub filename: String,
    pub analyzed_at: Option<DateTime<Utc>>,
    pub char_count: usize,
    pub content_hash: String,
    pub scores: Scores,
    pub severity: ScoreSeverity,
    pub sources: Vec<SourceMatch>,
    pub segments: Vec<ReportSegment>,
    pub skipped_detectors: Vec<DetectorFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportSegment {
    pub start: usize,
    pub end: usize,
    #[serde(flatten)]
    pub label: Label,
    pub text: String,
}

impl ReportDocument {
    /// Builds the report. Fails unless the job is `Completed`.
    pub fn from_job(job: &AnalysisJob) -> Result<Self> {
        if job.status != JobStatus::Completed {
            bail!("job {} is {}, only completed jobs can be exported", job.id, job.status);
        }
        let (Some(result), Some(document)) = (&job.result, &job.document) else {
            bail!("job {} is completed but has no stored result", job.id);
        };

        let segments = result
            .segments
            .iter()
            .map(|segment| ReportSegment {
                start: segment.start,
                end: segment.end,
                label: segment.label.clone(),
                text: document.slice(segment.start, segment.end).to_string(),
            })
            .collect();

        Ok(Self {
            job_id: job.id,
            filename: job.filename.clone(),
            analyzed_at: job.completed_at,
            char_count: document.char_len,
            content_hash: document.content_hash.clone(),
            scores: result.scores,
            severity: result.scores.severity(),
            sources: result.sources.clone(),
            segments,
            skipped_detectors: result.skipped.clone(),
        })
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Writes the report to `output`, or to stdout when `None`.
pub fn write_report(report: &ReportDocument, output: Option<&Path>) -> Result<()> {
    let json = report.to_json()?;
    match output {
        Some(path) => {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            std::fs::write(path, &json)
                .with_context(|| format!("Failed to write report: {}", path.display()))?;
            eprintln!(
                "Exported report for {} ({} segments) to {}",
                report.filename,
                report.segments.len(),
                path.display()
            );
        }
        None => println!("{}", json),
    }
    Ok(())
}
