//! Core data models used throughout veritext.
//!
//! These types describe the documents flowing into the pipeline, the raw
//! spans detectors report, the resolved segments the merger produces, and
//! the job snapshots exposed to callers.
//!
//! All character offsets are **char indices** (Unicode scalar values), not
//! byte offsets: a document of `N` chars has valid offsets `0..=N`.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{DetectorFailure, JobError};
use crate::extract::SourceFormat;

/// An extracted document. Immutable once built; shared by `Arc` between the
/// job snapshot and the detectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub filename: String,
    pub format: SourceFormat,
    pub text: String,
    /// Length of `text` in chars (N).
    pub char_len: usize,
    /// SHA-256 of the UTF-8 text, hex encoded.
    pub content_hash: String,
    pub ingested_at: DateTime<Utc>,
}

impl Document {
    pub fn new(filename: impl Into<String>, format: SourceFormat, text: String) -> Self {
        let content_hash = format!("{:x}", Sha256::digest(text.as_bytes()));
        Self {
            id: Uuid::new_v4(),
            filename: filename.into(),
            format,
            char_len: text.chars().count(),
            text,
            content_hash,
            ingested_at: Utc::now(),
        }
    }

    /// Byte offset of every char boundary, plus `text.len()` at index N.
    pub fn char_boundaries(&self) -> Vec<usize> {
        self.text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(self.text.len()))
            .collect()
    }

    /// Substring for the char range `[start, end)`. Out-of-range offsets are clamped.
    pub fn slice(&self, start: usize, end: usize) -> &str {
        let end = end.min(self.char_len);
        let start = start.min(end);
        let mut offsets = self
            .text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(self.text.len()));
        let from = offsets.nth(start).unwrap_or(self.text.len());
        let to = if end > start {
            offsets.nth(end - start - 1).unwrap_or(self.text.len())
        } else {
            from
        };
        &self.text[from..to]
    }
}

/// Payload-free discriminant of a finding, used for detector kinds and the
/// required-kind policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    Plagiarism,
    AiGenerated,
}

impl FindingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingKind::Plagiarism => "plagiarism",
            FindingKind::AiGenerated => "ai_generated",
        }
    }
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FindingKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plagiarism" => Ok(FindingKind::Plagiarism),
            "ai_generated" | "ai" => Ok(FindingKind::AiGenerated),
            other => anyhow::bail!(
                "unknown finding kind '{}': expected plagiarism or ai_generated",
                other
            ),
        }
    }
}

/// Kind-specific payload carried by a raw span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SpanKind {
    Plagiarism { source_id: String, similarity: u8 },
    AiGenerated { confidence: u8 },
}

impl SpanKind {
    pub fn finding(&self) -> FindingKind {
        match self {
            SpanKind::Plagiarism { .. } => FindingKind::Plagiarism,
            SpanKind::AiGenerated { .. } => FindingKind::AiGenerated,
        }
    }

    /// Similarity or confidence, whichever this kind carries.
    pub fn strength(&self) -> u8 {
        match self {
            SpanKind::Plagiarism { similarity, .. } => *similarity,
            SpanKind::AiGenerated { confidence } => *confidence,
        }
    }
}

/// A raw, possibly overlapping finding over `[start, end)` reported by one detector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    #[serde(flatten)]
    pub kind: SpanKind,
}

impl Span {
    pub fn plagiarism(start: usize, end: usize, source_id: impl Into<String>, similarity: u8) -> Self {
        Self {
            start,
            end,
            kind: SpanKind::Plagiarism {
                source_id: source_id.into(),
                similarity,
            },
        }
    }

    pub fn ai_generated(start: usize, end: usize, confidence: u8) -> Self {
        Self {
            start,
            end,
            kind: SpanKind::AiGenerated { confidence },
        }
    }
}

/// A matched external work referenced by plagiarism spans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: String,
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub excerpt: String,
}

/// Everything one detector call returns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detection {
    pub spans: Vec<Span>,
    #[serde(default)]
    pub sources: Vec<Source>,
}

/// The resolved label of a merged segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "label", rename_all = "snake_case")]
pub enum Label {
    Original,
    Plagiarism { source_id: String, similarity: u8 },
    AiGenerated { confidence: u8 },
}

impl From<&SpanKind> for Label {
    fn from(kind: &SpanKind) -> Self {
        match kind {
            SpanKind::Plagiarism {
                source_id,
                similarity,
            } => Label::Plagiarism {
                source_id: source_id.clone(),
                similarity: *similarity,
            },
            SpanKind::AiGenerated { confidence } => Label::AiGenerated {
                confidence: *confidence,
            },
        }
    }
}

/// A non-overlapping labeled range of the merged partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub start: usize,
    pub end: usize,
    #[serde(flatten)]
    pub label: Label,
}

impl Segment {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

/// Document-level percentages. `ai + human == 100` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scores {
    pub plagiarism: u8,
    pub ai: u8,
    pub human: u8,
}

/// A source together with how strongly the final partition matched it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMatch {
    #[serde(flatten)]
    pub source: Source,
    /// Highest similarity among segments attributed to this source.
    pub similarity: u8,
    /// Chars attributed to this source in the final partition.
    pub matched_chars: usize,
}

/// Outcome of a successful analysis. Written once, on `Completed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub segments: Vec<Segment>,
    pub sources: Vec<SourceMatch>,
    pub scores: Scores,
    /// Optional detectors whose findings are absent from this result.
    #[serde(default)]
    pub skipped: Vec<DetectorFailure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => anyhow::bail!("unknown job status: {}", other),
        }
    }
}

/// Snapshot of one analysis request.
///
/// Snapshots are never mutated in place: the job manager builds the next
/// snapshot and swaps it in whole, so a reader holding an `Arc<AnalysisJob>`
/// always sees a consistent state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub id: Uuid,
    pub filename: String,
    /// Opaque owner reference; only used to authorize cancellation.
    pub owner: Option<String>,
    pub status: JobStatus,
    /// Set once text extraction succeeds.
    pub document: Option<Arc<Document>>,
    /// Set only on `Completed`.
    pub result: Option<AnalysisResult>,
    /// Set only on `Failed`.
    pub error: Option<JobError>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AnalysisJob {
    pub fn new(filename: impl Into<String>, owner: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            filename: filename.into(),
            owner,
            status: JobStatus::Pending,
            document: None,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Lightweight row for job listings (dashboard table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: Uuid,
    pub filename: String,
    pub status: JobStatus,
    pub scores: Option<Scores>,
    pub error_kind: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&AnalysisJob> for JobSummary {
    fn from(job: &AnalysisJob) -> Self {
        Self {
            id: job.id,
            filename: job.filename.clone(),
            status: job.status,
            scores: job.result.as_ref().map(|r| r.scores),
            error_kind: job.error.as_ref().map(|e| e.code().to_string()),
            created_at: job.created_at,
            completed_at: job.completed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_uses_char_offsets() {
        let doc = Document::new("a.txt", SourceFormat::PlainText, "héllo wörld".to_string());
        assert_eq!(doc.char_len, 11);
        assert_eq!(doc.slice(0, 5), "héllo");
        assert_eq!(doc.slice(6, 11), "wörld");
        assert_eq!(doc.slice(6, 99), "wörld");
        assert_eq!(doc.slice(4, 4), "");
    }

    #[test]
    fn char_boundaries_end_with_byte_len() {
        let doc = Document::new("a.txt", SourceFormat::PlainText, "añb".to_string());
        assert_eq!(doc.char_boundaries(), vec![0, 1, 3, 4]);
    }

    #[test]
    fn span_serializes_flat() {
        let span = Span::plagiarism(0, 10, "src-1", 85);
        let json = serde_json::to_value(&span).unwrap();
        assert_eq!(json["kind"], "plagiarism");
        assert_eq!(json["source_id"], "src-1");
        assert_eq!(json["similarity"], 85);

        let back: Span = serde_json::from_value(json).unwrap();
        assert_eq!(back, span);
    }

    #[test]
    fn segment_label_tag() {
        let seg = Segment {
            start: 3,
            end: 9,
            label: Label::AiGenerated { confidence: 90 },
        };
        let json = serde_json::to_value(&seg).unwrap();
        assert_eq!(json["label"], "ai_generated");
        assert_eq!(json["confidence"], 90);
        assert_eq!(seg.len(), 6);
    }

    #[test]
    fn job_status_round_trips_through_str() {
        for status in [
            JobStatus::Pending,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!(JobStatus::Completed.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }
}
