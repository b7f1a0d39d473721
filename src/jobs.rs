//! Job lifecycle manager.
//!
//! Owns every in-flight [`AnalysisJob`] and drives it through
//!
//! ```text
//! Pending ──▶ Processing ──▶ Completed
//!    │             │
//!    └─────────────┴───────▶ Failed
//! ```
//!
//! Each job lives in a `watch` channel holding an `Arc<AnalysisJob>`. The
//! manager is the single writer: a transition builds the next snapshot and
//! replaces the pointer inside `send_if_modified`, after checking the current
//! status. `Completed` and `Failed` are absorbing, so a detector result
//! arriving after a cancellation is dropped rather than published. Terminal
//! snapshots are stored before they are published, and the slot is evicted
//! `retain_finished_ms` after a successful save.
//!
//! Concurrency:
//! - at most `max_concurrent_jobs` jobs are `Processing` (semaphore permits);
//! - within a job every detector is called at once (`join_all`), each attempt
//!   under its own timeout, with bounded exponential-backoff retries;
//! - cancellation drops the job's analysis future, which aborts in-flight
//!   detector calls and backoff sleeps.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use chrono::Utc;
use futures::future::join_all;
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{Config, IngestConfig, PipelineConfig};
use crate::detector::{validate_detection, Detector, DetectorRegistry};
use crate::error::{CancelError, DetectorFailure, IngestError, JobError};
use crate::extract::{extract_text, normalize, SourceFormat};
use crate::merge::merge_spans;
use crate::models::{
    AnalysisJob, AnalysisResult, Detection, Document, FindingKind, JobStatus, JobSummary, Source,
};
use crate::score::{aggregate, source_matches};
use crate::store::ReportStore;

/// Uploaded content: raw file bytes or pasted text.
#[derive(Debug, Clone)]
pub enum Payload {
    Bytes(Vec<u8>),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub filename: String,
    pub payload: Payload,
    pub owner: Option<String>,
}

/// What the worker starts from once it holds a permit.
enum Input {
    Ready(Document),
    Extract { bytes: Vec<u8>, format: SourceFormat },
}

struct JobSlot {
    snapshot: watch::Sender<Arc<AnalysisJob>>,
    cancel: CancellationToken,
}

impl JobSlot {
    fn current(&self) -> Arc<AnalysisJob> {
        self.snapshot.borrow().clone()
    }

    /// Publishes `next(current)` if the current status is one of `from`.
    ///
    /// Returns the published snapshot, or `None` when the job had already
    /// moved on (the caller's result is stale).
    fn transition(
        &self,
        from: &[JobStatus],
        next: impl FnOnce(&AnalysisJob) -> AnalysisJob,
    ) -> Option<Arc<AnalysisJob>> {
        let mut published = None;
        self.snapshot.send_if_modified(|current| {
            if !from.contains(&current.status) {
                return false;
            }
            let job = Arc::new(next(current));
            published = Some(job.clone());
            *current = job;
            true
        });
        published
    }
}

struct Inner {
    ingest: IngestConfig,
    pipeline: PipelineConfig,
    registry: DetectorRegistry,
    store: Arc<dyn ReportStore>,
    jobs: Arc<RwLock<HashMap<Uuid, Arc<JobSlot>>>>,
    workers: Arc<Semaphore>,
}

/// Cheaply cloneable handle to the job manager.
#[derive(Clone)]
pub struct JobManager {
    inner: Arc<Inner>,
}

impl JobManager {
    pub fn new(config: &Config, registry: DetectorRegistry, store: Arc<dyn ReportStore>) -> Self {
        Self {
            inner: Arc::new(Inner {
                ingest: config.ingest.clone(),
                pipeline: config.pipeline.clone(),
                registry,
                store,
                jobs: Arc::new(RwLock::new(HashMap::new())),
                workers: Arc::new(Semaphore::new(config.pipeline.max_concurrent_jobs.max(1))),
            }),
        }
    }

    pub fn registry(&self) -> &DetectorRegistry {
        &self.inner.registry
    }

    pub fn store(&self) -> &Arc<dyn ReportStore> {
        &self.inner.store
    }

    /// Validates the upload, creates a `Pending` job and schedules it.
    ///
    /// Must be called from within a Tokio runtime. Plain text is decoded
    /// here so empty or non-UTF-8 uploads are rejected before a job exists;
    /// PDF and DOCX extraction runs on the worker.
    pub fn ingest(&self, request: IngestRequest) -> Result<Uuid, IngestError> {
        let limit = self.inner.ingest.max_bytes;
        let input = match request.payload {
            Payload::Text(text) => {
                if text.len() > limit {
                    return Err(IngestError::TooLarge {
                        size: text.len(),
                        limit,
                    });
                }
                let text = normalize(&text);
                if text.trim().is_empty() {
                    return Err(IngestError::Empty);
                }
                Input::Ready(Document::new(&request.filename, SourceFormat::PlainText, text))
            }
            Payload::Bytes(bytes) => {
                let format = self.inner.ingest.accepted_format(&request.filename).ok_or_else(
                    || IngestError::UnsupportedFormat {
                        filename: request.filename.clone(),
                        allowed: self.inner.ingest.allowed_extensions.join(", "),
                    },
                )?;
                if bytes.len() > limit {
                    return Err(IngestError::TooLarge {
                        size: bytes.len(),
                        limit,
                    });
                }
                if bytes.is_empty() {
                    return Err(IngestError::Empty);
                }
                if format == SourceFormat::PlainText {
                    let text = extract_text(&bytes, format)
                        .map_err(|e| IngestError::Malformed(e.to_string()))?;
                    if text.trim().is_empty() {
                        return Err(IngestError::Empty);
                    }
                    Input::Ready(Document::new(&request.filename, format, text))
                } else {
                    Input::Extract { bytes, format }
                }
            }
        };

        let job = AnalysisJob::new(request.filename, request.owner);
        let id = job.id;
        let (snapshot, _) = watch::channel(Arc::new(job));
        let slot = Arc::new(JobSlot {
            snapshot,
            cancel: CancellationToken::new(),
        });

        match self.inner.jobs.write() {
            Ok(mut jobs) => {
                jobs.insert(id, slot.clone());
            }
            Err(_) => return Err(IngestError::Malformed("job table unavailable".to_string())),
        }
        info!(job_id = %id, status = "pending", "job created");

        tokio::spawn(self.inner.clone().run(slot, input));
        Ok(id)
    }

    /// Current snapshot: live and recently finished jobs from memory, older
    /// ones from the store.
    pub async fn get(&self, id: Uuid) -> Result<Option<Arc<AnalysisJob>>> {
        if let Some(slot) = self.inner.slot(id) {
            return Ok(Some(slot.current()));
        }
        Ok(self.inner.store.fetch(id).await?.map(Arc::new))
    }

    /// Cancels a `Pending` or `Processing` job on behalf of `requester`.
    ///
    /// Jobs without an owner may be cancelled by anyone.
    pub async fn cancel(
        &self,
        id: Uuid,
        requester: Option<&str>,
    ) -> Result<Arc<AnalysisJob>, CancelError> {
        let Some(slot) = self.inner.slot(id) else {
            return match self.inner.store.fetch(id).await {
                Ok(Some(job)) => Err(CancelError::AlreadyFinished {
                    id,
                    status: job.status,
                }),
                _ => Err(CancelError::NotFound(id)),
            };
        };

        let current = slot.current();
        if let Some(owner) = current.owner.as_deref() {
            if requester != Some(owner) {
                return Err(CancelError::NotOwner(id));
            }
        }

        let cancelled = slot.transition(&[JobStatus::Pending, JobStatus::Processing], |job| {
            failed(job, JobError::Cancelled)
        });
        let Some(cancelled) = cancelled else {
            return Err(CancelError::AlreadyFinished {
                id,
                status: slot.current().status,
            });
        };
        slot.cancel.cancel();
        info!(job_id = %id, status = "failed", error = "cancelled_error", "job cancelled");

        self.inner.persist(&cancelled).await;
        Ok(cancelled)
    }

    /// Most recent jobs first, in-flight and stored.
    pub async fn list(&self, limit: usize) -> Result<Vec<JobSummary>> {
        let mut summaries: Vec<JobSummary> = self
            .inner
            .slots()?
            .iter()
            .map(|slot| JobSummary::from(slot.current().as_ref()))
            .collect();
        let seen: HashSet<Uuid> = summaries.iter().map(|s| s.id).collect();

        for stored in self.inner.store.list(limit).await? {
            if !seen.contains(&stored.id) {
                summaries.push(stored);
            }
        }

        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        summaries.truncate(limit);
        Ok(summaries)
    }

    /// Waits until the job is terminal or `timeout` elapses.
    pub async fn wait(&self, id: Uuid, timeout: Duration) -> Result<Arc<AnalysisJob>> {
        let Some(slot) = self.inner.slot(id) else {
            return self
                .get(id)
                .await?
                .ok_or_else(|| anyhow!("job not found: {}", id));
        };

        let mut rx = slot.snapshot.subscribe();
        let waited = tokio::time::timeout(timeout, rx.wait_for(|job| job.is_terminal()))
            .await
            .map(|r| r.map(|job| job.clone()));
        match waited {
            Ok(Ok(job)) => Ok(job),
            Ok(Err(_)) => Ok(slot.current()),
            Err(_) => bail!(
                "timed out after {}ms waiting for job {} (status: {})",
                timeout.as_millis(),
                id,
                slot.current().status
            ),
        }
    }
}

impl Inner {
    fn slot(&self, id: Uuid) -> Option<Arc<JobSlot>> {
        self.jobs.read().ok()?.get(&id).cloned()
    }

    fn slots(&self) -> Result<Vec<Arc<JobSlot>>> {
        let jobs = self
            .jobs
            .read()
            .map_err(|_| anyhow!("job table lock poisoned"))?;
        Ok(jobs.values().cloned().collect())
    }

    async fn run(self: Arc<Self>, slot: Arc<JobSlot>, input: Input) {
        let id = slot.current().id;

        let permit = tokio::select! {
            _ = slot.cancel.cancelled() => return,
            permit = self.workers.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
        };

        let started = slot.transition(&[JobStatus::Pending], |job| AnalysisJob {
            status: JobStatus::Processing,
            started_at: Some(Utc::now()),
            ..job.clone()
        });
        if started.is_none() {
            return;
        }
        info!(job_id = %id, status = "processing", "job started");

        let outcome = tokio::select! {
            _ = slot.cancel.cancelled() => {
                debug!(job_id = %id, "analysis aborted after cancellation");
                return;
            }
            outcome = self.analyse(&slot, input) => outcome,
        };
        drop(permit);

        match outcome {
            Ok(result) => self.complete(&slot, result).await,
            Err(error) => self.fail(&slot, error).await,
        }
    }

    async fn analyse(&self, slot: &JobSlot, input: Input) -> Result<AnalysisResult, JobError> {
        let id = slot.current().id;
        let filename = slot.current().filename.clone();

        let document = match input {
            Input::Ready(document) => document,
            Input::Extract { bytes, format } => {
                let text = tokio::task::spawn_blocking(move || extract_text(&bytes, format))
                    .await
                    .map_err(|e| JobError::Extraction {
                        message: e.to_string(),
                    })?
                    .map_err(|e| JobError::Extraction {
                        message: e.to_string(),
                    })?;
                if text.trim().is_empty() {
                    return Err(JobError::Extraction {
                        message: "no text could be extracted".to_string(),
                    });
                }
                Document::new(filename, format, text)
            }
        };
        let document = Arc::new(document);
        slot.transition(&[JobStatus::Processing], |job| AnalysisJob {
            document: Some(document.clone()),
            ..job.clone()
        });
        debug!(job_id = %id, chars = document.char_len, "document ready");

        let detectors = self.registry.detectors();
        let outcomes = join_all(
            detectors
                .iter()
                .map(|detector| self.call_detector(id, detector.as_ref(), &document)),
        )
        .await;

        let mut detections: Vec<Detection> = Vec::new();
        let mut succeeded: HashSet<FindingKind> = HashSet::new();
        let mut failures: Vec<DetectorFailure> = Vec::new();
        for (detector, outcome) in detectors.iter().zip(outcomes) {
            match outcome {
                Ok(detection) => {
                    succeeded.insert(detector.kind());
                    detections.push(detection);
                }
                Err(failure) => failures.push(failure),
            }
        }

        for &kind in &self.pipeline.required_kinds {
            if succeeded.contains(&kind) {
                continue;
            }
            let failure = failures
                .iter()
                .find(|f| f.finding == kind)
                .cloned()
                .unwrap_or_else(|| DetectorFailure {
                    detector: String::new(),
                    finding: kind,
                    attempts: 0,
                    timed_out: false,
                    message: format!("no detector registered for required kind {}", kind),
                });
            return Err(JobError::Detector(failure));
        }

        for failure in &failures {
            warn!(job_id = %id, detector = %failure.detector, "optional findings skipped: {}", failure);
        }

        let mut sources: Vec<Source> = Vec::new();
        let mut spans = Vec::new();
        for detection in detections {
            spans.extend(detection.spans);
            for source in detection.sources {
                if !sources.iter().any(|s| s.id == source.id) {
                    sources.push(source);
                }
            }
        }

        let segments = merge_spans(document.char_len, &spans);
        let scores = aggregate(document.char_len, &segments);
        let sources = source_matches(&segments, &sources);
        Ok(AnalysisResult {
            segments,
            sources,
            scores,
            skipped: failures,
        })
    }

    /// One detector with timeout and retries. Malformed output is final.
    async fn call_detector(
        &self,
        job_id: Uuid,
        detector: &dyn Detector,
        document: &Document,
    ) -> Result<Detection, DetectorFailure> {
        let timeout = Duration::from_millis(self.pipeline.detector_timeout_ms);
        let failure = |attempts: u32, timed_out: bool, message: String| DetectorFailure {
            detector: detector.name().to_string(),
            finding: detector.kind(),
            attempts,
            timed_out,
            message,
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let (timed_out, message) =
                match tokio::time::timeout(timeout, detector.detect(document)).await {
                    Ok(Ok(detection)) => {
                        return match validate_detection(document, detector.kind(), &detection) {
                            Ok(()) => Ok(detection),
                            Err(message) => {
                                Err(failure(attempt, false, format!("invalid output: {}", message)))
                            }
                        };
                    }
                    Ok(Err(e)) => (false, format!("{:#}", e)),
                    Err(_) => (true, format!("no response within {}ms", timeout.as_millis())),
                };

            if attempt > self.pipeline.max_retries {
                return Err(failure(attempt, timed_out, message));
            }

            let delay = backoff_delay(self.pipeline.retry_backoff_ms, attempt);
            warn!(
                job_id = %job_id,
                detector = detector.name(),
                attempt,
                timed_out,
                "detector call failed, retrying in {}ms: {}",
                delay.as_millis(),
                message
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn complete(&self, slot: &JobSlot, result: AnalysisResult) {
        let current = slot.current();
        if current.status != JobStatus::Processing {
            debug!(job_id = %current.id, status = %current.status, "late result discarded");
            return;
        }

        let completed = AnalysisJob {
            status: JobStatus::Completed,
            result: Some(result),
            completed_at: Some(Utc::now()),
            ..current.as_ref().clone()
        };

        if let Err(e) = self.store.save(&completed).await {
            self.fail(
                slot,
                JobError::Storage {
                    message: format!("{:#}", e),
                },
            )
            .await;
            return;
        }

        match slot.transition(&[JobStatus::Processing], |_| completed.clone()) {
            Some(job) => {
                let scores = job.result.as_ref().map(|r| r.scores);
                info!(
                    job_id = %job.id,
                    status = "completed",
                    plagiarism = scores.map(|s| s.plagiarism),
                    ai = scores.map(|s| s.ai),
                    "job completed"
                );
                self.evict_later(job.id);
            }
            None => {
                // Cancelled while saving: the stored copy must follow the published one.
                let terminal = slot.current();
                debug!(job_id = %terminal.id, status = %terminal.status, "late result discarded");
                self.persist(&terminal).await;
            }
        }
    }

    /// Stores the failed snapshot, then publishes it, so a waiter never
    /// observes a failure the store has not seen.
    async fn fail(&self, slot: &JobSlot, error: JobError) {
        let current = slot.current();
        if current.status != JobStatus::Processing {
            debug!(job_id = %current.id, error = error.code(), "failure after terminal state discarded");
            return;
        }

        let code = error.code();
        let message = error.to_string();
        let job = failed(&current, error);
        let stored = self.save_logged(&job).await;

        match slot.transition(&[JobStatus::Processing], |_| job.clone()) {
            Some(job) => {
                warn!(job_id = %job.id, status = "failed", error = code, "job failed: {}", message);
                if stored {
                    self.evict_later(job.id);
                }
            }
            None => {
                let terminal = slot.current();
                debug!(job_id = %terminal.id, error = code, "failure after terminal state discarded");
                self.persist(&terminal).await;
            }
        }
    }

    /// Saves a terminal snapshot and schedules its eviction. A snapshot the
    /// store rejected stays in memory so it can still be read.
    async fn persist(&self, job: &AnalysisJob) {
        if self.save_logged(job).await {
            self.evict_later(job.id);
        }
    }

    async fn save_logged(&self, job: &AnalysisJob) -> bool {
        match self.store.save(job).await {
            Ok(()) => true,
            Err(e) => {
                warn!(job_id = %job.id, "failed to store job: {:#}", e);
                false
            }
        }
    }

    /// Drops a finished slot after `retain_finished_ms`. Waiters already
    /// hold the slot; later reads go to the store.
    fn evict_later(&self, id: Uuid) {
        let jobs = self.jobs.clone();
        let grace = Duration::from_millis(self.pipeline.retain_finished_ms);
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let Ok(mut jobs) = jobs.write() else {
                return;
            };
            if jobs.get(&id).is_some_and(|slot| slot.current().is_terminal()) {
                jobs.remove(&id);
                debug!(job_id = %id, "finished job evicted from memory");
            }
        });
    }
}

fn failed(job: &AnalysisJob, error: JobError) -> AnalysisJob {
    AnalysisJob {
        status: JobStatus::Failed,
        result: None,
        error: Some(error),
        completed_at: Some(Utc::now()),
        ..job.clone()
    }
}

/// `base * 2^(attempt-1)`, exponent capped at 5.
fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64 << attempt.saturating_sub(1).min(5);
    Duration::from_millis(base_ms.saturating_mul(factor))
}
