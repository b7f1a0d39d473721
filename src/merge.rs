//! Span merger: resolves overlapping detector spans into a partition.
//!
//! Given the union of every detector's spans for one document of `n` chars,
//! [`merge_spans`] returns segments that are contiguous, non-overlapping,
//! ordered by `start` and cover `[0, n)` exactly once.
//!
//! # Conflict policy
//!
//! For every elementary range between two consecutive break points, the
//! covering span with the highest priority labels the range:
//!
//! 1. Plagiarism beats AI-generated (a concrete source outranks a classifier score).
//! 2. Within a kind, higher similarity / confidence wins.
//! 3. Then the lower `source_id` wins.
//! 4. Then the earlier span (lower start, then input position).
//!
//! Steps 1-3 fully determine the label, so the output does not depend on the
//! order spans arrive in. Adjacent segments with equal labels are coalesced.
//!
//! # Algorithm
//!
//! Spans are sorted by start and swept left to right over the sorted break
//! points. Spans that have started sit in a max-heap ordered by priority;
//! spans that ended are discarded lazily when they surface at the top.
//! Runs in `O((s + b) log s)` for `s` spans and `b` break points.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::models::{Label, Segment, Span, SpanKind};

/// A span clamped to the document, with its input position for tie-breaks.
#[derive(Debug, PartialEq, Eq)]
struct Candidate<'a> {
    start: usize,
    end: usize,
    order: usize,
    kind: &'a SpanKind,
}

impl Candidate<'_> {
    fn kind_rank(&self) -> u8 {
        match self.kind {
            SpanKind::Plagiarism { .. } => 1,
            SpanKind::AiGenerated { .. } => 0,
        }
    }

    fn source_id(&self) -> &str {
        match self.kind {
            SpanKind::Plagiarism { source_id, .. } => source_id,
            SpanKind::AiGenerated { .. } => "",
        }
    }
}

impl Ord for Candidate<'_> {
    /// Greater means higher priority.
    fn cmp(&self, other: &Self) -> Ordering {
        self.kind_rank()
            .cmp(&other.kind_rank())
            .then_with(|| self.kind.strength().cmp(&other.kind.strength()))
            .then_with(|| other.source_id().cmp(self.source_id()))
            .then_with(|| other.start.cmp(&self.start))
            .then_with(|| other.order.cmp(&self.order))
    }
}

impl PartialOrd for Candidate<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Merges raw spans into an ordered partition of `[0, n)`.
///
/// Spans are clamped to the document; spans that are empty after clamping
/// are ignored. Returns no segments when `n == 0`.
pub fn merge_spans(n: usize, spans: &[Span]) -> Vec<Segment> {
    if n == 0 {
        return Vec::new();
    }

    let mut candidates: Vec<Candidate<'_>> = spans
        .iter()
        .enumerate()
        .filter_map(|(order, span)| {
            let end = span.end.min(n);
            let start = span.start.min(end);
            (start < end).then_some(Candidate {
                start,
                end,
                order,
                kind: &span.kind,
            })
        })
        .collect();
    candidates.sort_by_key(|c| (c.start, c.order));

    let mut breaks: Vec<usize> = Vec::with_capacity(candidates.len() * 2 + 2);
    breaks.extend([0, n]);
    for c in &candidates {
        breaks.extend([c.start, c.end]);
    }
    breaks.sort_unstable();
    breaks.dedup();

    let mut active: BinaryHeap<&Candidate<'_>> = BinaryHeap::new();
    let mut next = 0;
    let mut segments: Vec<Segment> = Vec::new();

    for window in breaks.windows(2) {
        let (a, b) = (window[0], window[1]);

        while next < candidates.len() && candidates[next].start <= a {
            active.push(&candidates[next]);
            next += 1;
        }
        while active.peek().is_some_and(|c| c.end <= a) {
            active.pop();
        }

        let label = active
            .peek()
            .map_or(Label::Original, |c| Label::from(c.kind));
        push_coalesced(&mut segments, a, b, label);
    }

    segments
}

fn push_coalesced(segments: &mut Vec<Segment>, start: usize, end: usize, label: Label) {
    if let Some(last) = segments.last_mut() {
        if last.end == start && last.label == label {
            last.end = end;
            return;
        }
    }
    segments.push(Segment { start, end, label });
}
