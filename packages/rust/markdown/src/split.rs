//! Boundary-preserving document segmentation.
//!
//! Strategies are tried in priority order (page markers, headings, paragraphs);
//! the first one that finds at least one boundary and keeps every coalesced
//! segment within the limit wins. Hard fixed-size slicing with overlap is the
//! always-successful fallback.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, instrument};

use studyforge_shared::SplitStrategy;

/// Default overlap between hard-limit slices, in characters.
pub const DEFAULT_OVERLAP_CHARS: usize = 1_000;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// A contiguous slice of the source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Zero-based ordinal.
    pub index: usize,
    /// Number of segments the document was split into.
    pub total: usize,
    /// Byte offset of the first byte in the source document.
    pub start: usize,
    /// Byte offset one past the last byte in the source document.
    pub end: usize,
    /// Leading bytes shared with the previous segment (hard-limit only).
    pub overlap_with_previous: usize,
    pub text: String,
}

impl Segment {
    /// Length in characters.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Tuning for [`split_with`].
#[derive(Debug, Clone)]
pub struct SplitOptions {
    pub max_segment_chars: usize,
    pub overlap_chars: usize,
}

impl SplitOptions {
    pub fn new(max_segment_chars: usize) -> Self {
        Self {
            max_segment_chars,
            overlap_chars: DEFAULT_OVERLAP_CHARS,
        }
    }
}

/// Segments plus the strategy that produced them.
#[derive(Debug, Clone)]
pub struct SplitOutcome {
    pub strategy: SplitStrategy,
    pub segments: Vec<Segment>,
}

// ---------------------------------------------------------------------------
// Boundary rules
// ---------------------------------------------------------------------------

/// Where a boundary match places the cut.
#[derive(Clone, Copy)]
enum Cut {
    /// The matched text opens the next piece (markers, headings).
    BeforeMatch,
    /// The matched text closes the previous piece (blank lines).
    AfterMatch,
}

struct BoundaryRule {
    strategy: SplitStrategy,
    pattern: &'static LazyLock<Regex>,
    cut: Cut,
}

static PAGE_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)(?:^[ \t]*-{2,}[ \t]*page[ \t]+\d+[ \t]*-{2,}[ \t]*$)|\x0c")
        .expect("valid regex")
});

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^#{1,3}[ \t]").expect("valid regex"));

static PARAGRAPH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n(?:[ \t]*\n)+").expect("valid regex"));

static RULES: [BoundaryRule; 3] = [
    BoundaryRule {
        strategy: SplitStrategy::PageMarkers,
        pattern: &PAGE_MARKER_RE,
        cut: Cut::BeforeMatch,
    },
    BoundaryRule {
        strategy: SplitStrategy::Headings,
        pattern: &HEADING_RE,
        cut: Cut::BeforeMatch,
    },
    BoundaryRule {
        strategy: SplitStrategy::Paragraphs,
        pattern: &PARAGRAPH_RE,
        cut: Cut::AfterMatch,
    },
];

// ---------------------------------------------------------------------------
// Splitter
// ---------------------------------------------------------------------------

/// Split `document` into segments of at most `max_segment_chars` characters,
/// using the default hard-limit overlap.
pub fn split(document: &str, max_segment_chars: usize) -> SplitOutcome {
    split_with(document, &SplitOptions::new(max_segment_chars))
}

/// Split `document` into ordered segments. Never returns an empty list.
#[instrument(skip(document), fields(len = document.len(), max = opts.max_segment_chars))]
pub fn split_with(document: &str, opts: &SplitOptions) -> SplitOutcome {
    let max = opts.max_segment_chars.max(1);

    if char_len(document) <= max {
        return SplitOutcome {
            strategy: SplitStrategy::Whole,
            segments: build_segments(document, &[(0, document.len(), 0)]),
        };
    }

    for rule in &RULES {
        if let Some(ranges) = split_on_boundaries(document, rule, max) {
            debug!(strategy = %rule.strategy, segments = ranges.len(), "boundary split succeeded");
            let ranges: Vec<_> = ranges.into_iter().map(|(s, e)| (s, e, 0)).collect();
            return SplitOutcome {
                strategy: rule.strategy,
                segments: build_segments(document, &ranges),
            };
        }
    }

    // An overlap of half a slice or more would stall progress.
    let overlap = opts.overlap_chars.min(max / 2);
    let ranges = hard_slices(document, max, overlap);
    debug!(segments = ranges.len(), overlap, "falling back to hard-limit slicing");

    SplitOutcome {
        strategy: SplitStrategy::HardLimit,
        segments: build_segments(document, &ranges),
    }
}

/// Rebuild the source document, dropping each segment's declared overlap.
pub fn reconstruct(segments: &[Segment]) -> String {
    let mut out = String::with_capacity(segments.iter().map(|s| s.text.len()).sum());
    for segment in segments {
        out.push_str(&segment.text[segment.overlap_with_previous..]);
    }
    out
}

/// Cut at every boundary, then greedily coalesce pieces up to `max`.
///
/// Returns `None` if the rule finds no boundary, or if some piece alone is
/// still larger than `max` (pieces are never split further here).
fn split_on_boundaries(
    document: &str,
    rule: &BoundaryRule,
    max: usize,
) -> Option<Vec<(usize, usize)>> {
    let mut cuts: Vec<usize> = rule
        .pattern
        .find_iter(document)
        .map(|m| match rule.cut {
            Cut::BeforeMatch => m.start(),
            Cut::AfterMatch => m.end(),
        })
        .filter(|&pos| pos > 0 && pos < document.len())
        .collect();
    cuts.dedup();

    if cuts.is_empty() {
        return None;
    }

    let mut pieces = Vec::with_capacity(cuts.len() + 1);
    let mut start = 0;
    for cut in cuts {
        pieces.push((start, cut));
        start = cut;
    }
    pieces.push((start, document.len()));

    let mut coalesced: Vec<(usize, usize)> = Vec::new();
    let mut current: Option<(usize, usize, usize)> = None;

    for (s, e) in pieces {
        let n = char_len(&document[s..e]);
        current = match current {
            Some((cs, _, cn)) if cn + n <= max => Some((cs, e, cn + n)),
            Some((cs, ce, _)) => {
                coalesced.push((cs, ce));
                Some((s, e, n))
            }
            None => Some((s, e, n)),
        };
    }
    if let Some((cs, ce, _)) = current {
        coalesced.push((cs, ce));
    }

    if coalesced
        .iter()
        .any(|&(s, e)| char_len(&document[s..e]) > max)
    {
        return None;
    }

    Some(coalesced)
}

/// Fixed windows of `max` characters, each starting `overlap` characters
/// before the previous window ended. Returns `(start, end, overlap_bytes)`.
fn hard_slices(document: &str, max: usize, overlap: usize) -> Vec<(usize, usize, usize)> {
    // offsets[k] is the byte offset of character k; the last entry is len.
    let offsets: Vec<usize> = document
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(document.len()))
        .collect();
    let total_chars = offsets.len() - 1;

    let mut ranges = Vec::new();
    let mut start_c = 0;
    let mut prev_end_c = 0;

    loop {
        let end_c = (start_c + max).min(total_chars);
        let overlap_bytes = if prev_end_c > start_c {
            offsets[prev_end_c] - offsets[start_c]
        } else {
            0
        };
        ranges.push((offsets[start_c], offsets[end_c], overlap_bytes));

        if end_c == total_chars {
            break;
        }
        prev_end_c = end_c;
        start_c = end_c - overlap;
    }

    ranges
}

fn build_segments(document: &str, ranges: &[(usize, usize, usize)]) -> Vec<Segment> {
    let total = ranges.len();
    ranges
        .iter()
        .enumerate()
        .map(|(index, &(start, end, overlap))| Segment {
            index,
            total,
            start,
            end,
            overlap_with_previous: overlap,
            text: document[start..end].to_string(),
        })
        .collect()
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
