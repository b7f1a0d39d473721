//! Detector adapters.
//!
//! A [`Detector`] wraps one external detection capability (a plagiarism
//! matcher or an AI-text classifier) behind a uniform async call that
//! returns raw [`Span`](crate::models::Span)s over the document text.
//! Detectors are treated as stateless: the job manager may call several
//! at once and retry any of them.
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │            DetectorRegistry              │
//! │  ┌───────────────┐  ┌─────────────────┐  │
//! │  │ HTTP adapters │  │ Custom (Rust)   │  │
//! │  │ (from config) │  │ impl Detector   │  │
//! │  └───────────────┘  └─────────────────┘  │
//! └──────────────┬───────────────────────────┘
//!                ▼
//!        JobManager → merge → score
//! ```
//!
//! # Example
//!
//! ```rust
//! use anyhow::Result;
//! use async_trait::async_trait;
//! use veritext::detector::{Detector, DetectorRegistry};
//! use veritext::models::{Detection, Document, FindingKind, Span};
//!
//! struct ShoutingDetector;
//!
//! #[async_trait]
//! impl Detector for ShoutingDetector {
//!     fn name(&self) -> &str { "shouting" }
//!     fn kind(&self) -> FindingKind { FindingKind::AiGenerated }
//!
//!     async fn detect(&self, doc: &Document) -> Result<Detection> {
//!         let upper = doc.text.chars().filter(|c| c.is_uppercase()).count();
//!         let spans = if upper * 2 > doc.char_len {
//!             vec![Span::ai_generated(0, doc.char_len, 60)]
//!         } else {
//!             vec![]
//!         };
//!         Ok(Detection { spans, sources: vec![] })
//!     }
//! }
//!
//! let mut registry = DetectorRegistry::new();
//! registry.register(std::sync::Arc::new(ShoutingDetector));
//! assert_eq!(registry.len(), 1);
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::Config;
use crate::models::{Detection, Document, FindingKind, SpanKind};

#[async_trait]
pub trait Detector: Send + Sync {
    /// Unique instance name, used in logs and failure reports.
    fn name(&self) -> &str;

    /// The single kind of finding this detector reports.
    fn kind(&self) -> FindingKind;

    fn description(&self) -> &str {
        ""
    }

    /// Analyse the document and return its findings.
    ///
    /// Errors are treated as transient and retried by the job manager.
    /// Returning zero spans means "no findings", not failure.
    async fn detect(&self, doc: &Document) -> Result<Detection>;
}

/// Checks a detection against the document it was produced for.
///
/// A detection is well formed when every span satisfies
/// `0 <= start < end <= N`, carries a payload in `[0, 100]`, matches the
/// detector's kind, and (for plagiarism) references a listed source.
pub fn validate_detection(
    doc: &Document,
    kind: FindingKind,
    detection: &Detection,
) -> std::result::Result<(), String> {
    let source_ids: HashSet<&str> = detection.sources.iter().map(|s| s.id.as_str()).collect();

    for (i, span) in detection.spans.iter().enumerate() {
        if span.start >= span.end || span.end > doc.char_len {
            return Err(format!(
                "span {} has invalid range [{}, {}) for a document of {} chars",
                i, span.start, span.end, doc.char_len
            ));
        }
        if span.kind.finding() != kind {
            return Err(format!(
                "span {} is {} but detector reports {}",
                i,
                span.kind.finding(),
                kind
            ));
        }
        if span.kind.strength() > 100 {
            return Err(format!(
                "span {} has score {} outside [0, 100]",
                i,
                span.kind.strength()
            ));
        }
        if let SpanKind::Plagiarism { source_id, .. } = &span.kind {
            if !source_ids.contains(source_id.as_str()) {
                return Err(format!("span {} references unknown source '{}'", i, source_id));
            }
        }
    }
    Ok(())
}

/// Ordered set of detectors consulted for every job.
///
/// Registration order is significant: when a required kind fails, the
/// first failing detector of that kind (in this order) is reported.
#[derive(Clone, Default)]
pub struct DetectorRegistry {
    detectors: Vec<Arc<dyn Detector>>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self {
            detectors: Vec::new(),
        }
    }

    /// Registry pre-loaded with every HTTP detector in the config, in name order.
    pub fn from_config(config: &Config) -> Result<Self> {
        use crate::detector_http::HttpDetector;

        let mut registry = Self::new();
        for (name, cfg) in &config.detectors.http {
            let timeout = std::time::Duration::from_millis(config.pipeline.detector_timeout_ms);
            registry.register(Arc::new(HttpDetector::new(name.clone(), cfg.clone(), timeout)?));
        }
        Ok(registry)
    }

    pub fn register(&mut self, detector: Arc<dyn Detector>) {
        self.detectors.push(detector);
    }

    pub fn detectors(&self) -> &[Arc<dyn Detector>] {
        &self.detectors
    }

    pub fn by_kind(&self, kind: FindingKind) -> Vec<&Arc<dyn Detector>> {
        self.detectors.iter().filter(|d| d.kind() == kind).collect()
    }

    pub fn find(&self, name: &str) -> Option<&Arc<dyn Detector>> {
        self.detectors.iter().find(|d| d.name() == name)
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::SourceFormat;
    use crate::models::{Source, Span};

    fn doc(text: &str) -> Document {
        Document::new("t.txt", SourceFormat::PlainText, text.to_string())
    }

    fn source(id: &str) -> Source {
        Source {
            id: id.to_string(),
            title: "t".to_string(),
            url: "https://example.com".to_string(),
            excerpt: String::new(),
        }
    }

    #[test]
    fn accepts_well_formed_detection() {
        let d = doc("0123456789");
        let detection = Detection {
            spans: vec![Span::plagiarism(0, 10, "a", 100)],
            sources: vec![source("a")],
        };
        assert!(validate_detection(&d, FindingKind::Plagiarism, &detection).is_ok());
    }

    #[test]
    fn rejects_span_past_end() {
        let d = doc("0123");
        let detection = Detection {
            spans: vec![Span::ai_generated(2, 5, 50)],
            sources: vec![],
        };
        let err = validate_detection(&d, FindingKind::AiGenerated, &detection).unwrap_err();
        assert!(err.contains("invalid range"));
    }

    #[test]
    fn rejects_empty_span() {
        let d = doc("0123");
        let detection = Detection {
            spans: vec![Span::ai_generated(2, 2, 50)],
            sources: vec![],
        };
        assert!(validate_detection(&d, FindingKind::AiGenerated, &detection).is_err());
    }

    #[test]
    fn rejects_wrong_kind_and_unknown_source() {
        let d = doc("0123456789");
        let wrong_kind = Detection {
            spans: vec![Span::ai_generated(0, 3, 50)],
            sources: vec![],
        };
        assert!(validate_detection(&d, FindingKind::Plagiarism, &wrong_kind).is_err());

        let dangling = Detection {
            spans: vec![Span::plagiarism(0, 3, "missing", 50)],
            sources: vec![source("other")],
        };
        let err = validate_detection(&d, FindingKind::Plagiarism, &dangling).unwrap_err();
        assert!(err.contains("unknown source"));
    }

    #[test]
    fn rejects_out_of_range_score() {
        let d = doc("0123456789");
        let detection = Detection {
            spans: vec![Span::ai_generated(0, 3, 101)],
            sources: vec![],
        };
        assert!(validate_detection(&d, FindingKind::AiGenerated, &detection).is_err());
    }
}
