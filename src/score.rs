//! Score aggregation over a merged partition.
//!
//! The plagiarism and AI axes are independent: a cited plagiarism match may
//! still be human-written, so `human` is the complement of the AI share only.
//! Both percentages round down, which keeps `ai + human == 100` exact.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::{Label, Scores, Segment, Source, SourceMatch};

/// Computes document scores from the segment partition of an `n`-char document.
pub fn aggregate(n: usize, segments: &[Segment]) -> Scores {
    if n == 0 {
        return Scores {
            plagiarism: 0,
            ai: 0,
            human: 100,
        };
    }

    let (mut plagiarized, mut ai) = (0usize, 0usize);
    for segment in segments {
        match segment.label {
            Label::Plagiarism { .. } => plagiarized += segment.len(),
            Label::AiGenerated { .. } => ai += segment.len(),
            Label::Original => {}
        }
    }

    let ai = percent_floor(ai, n);
    Scores {
        plagiarism: percent_floor(plagiarized, n),
        ai,
        human: 100 - ai,
    }
}

fn percent_floor(part: usize, whole: usize) -> u8 {
    let part = part.min(whole) as u128;
    (part * 100 / whole as u128) as u8
}

/// Display band for a percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// `<= 20` low, `<= 50` medium, above that high.
    pub fn of(percent: u8) -> Self {
        match percent {
            0..=20 => Severity::Low,
            21..=50 => Severity::Medium,
            _ => Severity::High,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreSeverity {
    pub plagiarism: Severity,
    pub ai: Severity,
}

impl Scores {
    pub fn severity(&self) -> ScoreSeverity {
        ScoreSeverity {
            plagiarism: Severity::of(self.plagiarism),
            ai: Severity::of(self.ai),
        }
    }
}

/// Summarises the sources the final partition still attributes text to.
///
/// Sources whose spans were fully outranked are dropped. Ordered by
/// similarity (desc), then matched chars (desc), then id.
pub fn source_matches(segments: &[Segment], sources: &[Source]) -> Vec<SourceMatch> {
    let mut tally: BTreeMap<&str, (u8, usize)> = BTreeMap::new();
    for segment in segments {
        if let Label::Plagiarism {
            source_id,
            similarity,
        } = &segment.label
        {
            let entry = tally.entry(source_id.as_str()).or_insert((0, 0));
            entry.0 = entry.0.max(*similarity);
            entry.1 += segment.len();
        }
    }

    let mut matches: Vec<SourceMatch> = tally
        .into_iter()
        .filter_map(|(id, (similarity, matched_chars))| {
            sources.iter().find(|s| s.id == id).map(|source| SourceMatch {
                source: source.clone(),
                similarity,
                matched_chars,
            })
        })
        .collect();
    matches.sort_by(|a, b| {
        b.similarity
            .cmp(&a.similarity)
            .then_with(|| b.matched_chars.cmp(&a.matched_chars))
            .then_with(|| a.source.id.cmp(&b.source.id))
    });
    matches
}
