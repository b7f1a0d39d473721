//! Error taxonomy for the analysis pipeline.
//!
//! | Type | When | Outcome |
//! |------|------|---------|
//! | [`IngestError`] | bad, empty, oversized or unsupported input | rejected at ingestion, no job |
//! | [`JobError::Extraction`] | text extraction failed | job `Failed` |
//! | [`JobError::Detector`] | a required detector kind had no success (timeouts included) | job `Failed` |
//! | [`JobError::Storage`] | the report store rejected the result | job `Failed` |
//! | [`JobError::Cancelled`] | owner cancelled the job | job `Failed` |
//!
//! A failed *optional* detector never fails the job; its [`DetectorFailure`]
//! is listed in the result's `skipped` field instead.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{FindingKind, JobStatus};

/// Input rejected synchronously at ingestion (the `InvalidInputError` family).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestError {
    #[error("unsupported file format: '{filename}' (allowed: {allowed})")]
    UnsupportedFormat { filename: String, allowed: String },

    #[error("document is empty")]
    Empty,

    #[error("document is {size} bytes, limit is {limit} bytes")]
    TooLarge { size: usize, limit: usize },

    #[error("malformed upload: {0}")]
    Malformed(String),
}

impl IngestError {
    pub fn code(&self) -> &'static str {
        "invalid_input"
    }
}

/// Terminal error carried by a `Failed` job.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum JobError {
    #[error("text extraction failed: {message}")]
    #[serde(rename = "extraction_error")]
    Extraction { message: String },

    #[error("{0}")]
    #[serde(rename = "detector_error")]
    Detector(DetectorFailure),

    #[error("failed to store result: {message}")]
    #[serde(rename = "storage_error")]
    Storage { message: String },

    #[error("job was cancelled")]
    #[serde(rename = "cancelled_error")]
    Cancelled,
}

impl JobError {
    /// Stable machine-readable code, matching the serialized `kind`.
    pub fn code(&self) -> &'static str {
        match self {
            JobError::Extraction { .. } => "extraction_error",
            JobError::Detector(_) => "detector_error",
            JobError::Storage { .. } => "storage_error",
            JobError::Cancelled => "cancelled_error",
        }
    }
}

/// Why a detector produced no usable findings.
///
/// Timeouts are a detector failure with `timed_out = true`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("detector '{detector}' {} after {attempts} attempt(s): {message}", self.outcome())]
pub struct DetectorFailure {
    pub detector: String,
    pub finding: FindingKind,
    /// Attempts made, including the first call.
    pub attempts: u32,
    pub timed_out: bool,
    pub message: String,
}

impl DetectorFailure {
    fn outcome(&self) -> &'static str {
        if self.timed_out {
            "timed out"
        } else {
            "failed"
        }
    }
}

/// Reasons a cancellation request is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CancelError {
    #[error("job not found: {0}")]
    NotFound(Uuid),

    #[error("job {id} is already {status}")]
    AlreadyFinished { id: Uuid, status: JobStatus },

    #[error("job {0} belongs to another owner")]
    NotOwner(Uuid),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detector_error_serializes_with_kind_tag() {
        let err = JobError::Detector(DetectorFailure {
            detector: "gptzero".to_string(),
            finding: FindingKind::AiGenerated,
            attempts: 3,
            timed_out: true,
            message: "no response within 50ms".to_string(),
        });
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "detector_error");
        assert_eq!(json["detector"], "gptzero");
        assert_eq!(json["finding"], "ai_generated");
        assert_eq!(json["timed_out"], true);

        let back: JobError = serde_json::from_value(json).unwrap();
        assert_eq!(back, err);
        assert_eq!(back.code(), "detector_error");
    }

    #[test]
    fn cancelled_is_a_bare_tag() {
        let json = serde_json::to_value(JobError::Cancelled).unwrap();
        assert_eq!(json, serde_json::json!({ "kind": "cancelled_error" }));
    }

    #[test]
    fn failure_message_mentions_attempts() {
        let failure = DetectorFailure {
            detector: "turnitin".to_string(),
            finding: FindingKind::Plagiarism,
            attempts: 3,
            timed_out: false,
            message: "HTTP 502".to_string(),
        };
        assert_eq!(
            failure.to_string(),
            "detector 'turnitin' failed after 3 attempt(s): HTTP 502"
        );

        let timed_out = DetectorFailure {
            timed_out: true,
            message: "no response within 50ms".to_string(),
            ..failure
        };
        assert_eq!(
            timed_out.to_string(),
            "detector 'turnitin' timed out after 3 attempt(s): no response within 50ms"
        );
    }
}
