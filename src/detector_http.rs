//! HTTP detector adapter.
//!
//! Calls an external detection service with a JSON request and converts its
//! answer into a [`Detection`]. One adapter instance is created for every
//! `[detectors.http.<name>]` entry in the config.
//!
//! # Wire format
//!
//! Request (`POST <url>`):
//!
//! ```json
//! { "document_id": "…", "filename": "essay.docx", "text": "…" }
//! ```
//!
//! Response for a plagiarism detector:
//!
//! ```json
//! {
//!   "spans":   [{ "start": 0, "end": 97, "source_id": "1", "similarity": 85 }],
//!   "sources": [{ "id": "1", "title": "…", "url": "https://…", "excerpt": "…" }]
//! }
//! ```
//!
//! Response for an AI-text detector:
//!
//! ```json
//! { "spans": [{ "start": 200, "end": 287, "confidence": 89 }] }
//! ```
//!
//! Offsets are char indices into `text`. Retries are not handled here; the
//! job manager owns the retry and timeout policy.

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::HttpDetectorConfig;
use crate::detector::Detector;
use crate::models::{Detection, Document, FindingKind, Source, Span};

pub struct HttpDetector {
    name: String,
    description: String,
    config: HttpDetectorConfig,
    client: reqwest::Client,
}

impl HttpDetector {
    /// Builds the adapter. `timeout` caps a single HTTP exchange.
    pub fn new(name: String, config: HttpDetectorConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let description = format!("{} detector at {}", config.kind, config.url);
        Ok(Self {
            name,
            description,
            config,
            client,
        })
    }
}

#[derive(Serialize)]
struct DetectRequest<'a> {
    document_id: String,
    filename: &'a str,
    text: &'a str,
}

#[derive(Deserialize)]
struct DetectResponse {
    #[serde(default)]
    spans: Vec<WireSpan>,
    #[serde(default)]
    sources: Vec<Source>,
}

#[derive(Deserialize)]
struct WireSpan {
    start: usize,
    end: usize,
    #[serde(default)]
    source_id: Option<String>,
    #[serde(default)]
    similarity: Option<u8>,
    #[serde(default)]
    confidence: Option<u8>,
}

fn into_detection(kind: FindingKind, response: DetectResponse) -> Result<Detection> {
    let spans = response
        .spans
        .into_iter()
        .enumerate()
        .map(|(i, wire)| -> Result<Span> {
            match kind {
                FindingKind::Plagiarism => {
                    let source_id = wire
                        .source_id
                        .ok_or_else(|| anyhow!("span {} is missing source_id", i))?;
                    let similarity = wire
                        .similarity
                        .ok_or_else(|| anyhow!("span {} is missing similarity", i))?;
                    Ok(Span::plagiarism(wire.start, wire.end, source_id, similarity))
                }
                FindingKind::AiGenerated => {
                    let confidence = wire
                        .confidence
                        .ok_or_else(|| anyhow!("span {} is missing confidence", i))?;
                    Ok(Span::ai_generated(wire.start, wire.end, confidence))
                }
            }
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Detection {
        spans,
        sources: response.sources,
    })
}

#[async_trait]
impl Detector for HttpDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> FindingKind {
        self.config.kind
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn detect(&self, doc: &Document) -> Result<Detection> {
        let body = DetectRequest {
            document_id: doc.id.to_string(),
            filename: &doc.filename,
            text: &doc.text,
        };

        let mut request = self.client.post(&self.config.url).json(&body);
        if let Some(var) = &self.config.api_key_env {
            let key = std::env::var(var)
                .map_err(|_| anyhow!("{} environment variable not set", var))?;
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("detector service returned {}: {}", status, body_text);
        }

        let parsed: DetectResponse = response.json().await?;
        into_detection(self.config.kind, parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(json: serde_json::Value) -> DetectResponse {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn converts_plagiarism_spans() {
        let detection = into_detection(
            FindingKind::Plagiarism,
            response(serde_json::json!({
                "spans": [{ "start": 0, "end": 97, "source_id": "1", "similarity": 85 }],
                "sources": [{ "id": "1", "title": "AI and Society", "url": "https://example.com/a" }]
            })),
        )
        .unwrap();
        assert_eq!(detection.spans, vec![Span::plagiarism(0, 97, "1", 85)]);
        assert_eq!(detection.sources[0].excerpt, "");
    }

    #[test]
    fn converts_ai_spans_and_empty_answers() {
        let detection = into_detection(
            FindingKind::AiGenerated,
            response(serde_json::json!({
                "spans": [{ "start": 200, "end": 287, "confidence": 89 }]
            })),
        )
        .unwrap();
        assert_eq!(detection.spans, vec![Span::ai_generated(200, 287, 89)]);

        let empty = into_detection(FindingKind::AiGenerated, response(serde_json::json!({})))
            .unwrap();
        assert!(empty.spans.is_empty());
    }

    #[test]
    fn missing_payload_is_an_error() {
        let err = into_detection(
            FindingKind::Plagiarism,
            response(serde_json::json!({
                "spans": [{ "start": 0, "end": 5, "similarity": 85 }]
            })),
        )
        .unwrap_err();
        assert!(err.to_string().contains("source_id"));
    }
}
