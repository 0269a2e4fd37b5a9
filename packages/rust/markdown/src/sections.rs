//! Locate labelled sections in semi-structured generator output and turn
//! them into clean item lists.

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use tracing::{debug, trace};

pub const CORE_CONCEPTS: &str = "Core Concepts";
pub const DEFINITIONS: &str = "Definitions";
pub const EXAMPLES: &str = "Examples";
pub const DIAGRAM_DESCRIPTIONS: &str = "Diagram Descriptions";

/// Every list category a knowledge artifact carries, in prompt order.
pub const SECTION_LABELS: [&str; 4] = [CORE_CONCEPTS, DEFINITIONS, EXAMPLES, DIAGRAM_DESCRIPTIONS];

/// What an extraction prompt covers; substituted for `{scope}` in list hints.
pub const SCOPE_SOURCE: &str = "the source";
pub const SCOPE_SEGMENT: &str = "this segment";
pub const SCOPE_IMAGE: &str = "the image";

const SCOPES: [&str; 3] = [SCOPE_SOURCE, SCOPE_SEGMENT, SCOPE_IMAGE];

/// The hint line printed under each list heading of the output format.
pub const LIST_HINTS: [(&str, &str); 4] = [
    (CORE_CONCEPTS, "one concept per line, named verbatim from {scope}"),
    (DEFINITIONS, "\"Term: definition\", preserving notation exactly"),
    (EXAMPLES, "every example, use case or worked problem in {scope}"),
    (DIAGRAM_DESCRIPTIONS, "what each figure, table or diagram in {scope} shows"),
];

/// Template text the generator sometimes echoes back verbatim.
const PLACEHOLDERS: [&str; 3] = ["(bullet list)", "(if present)", "(one per line)"];

/// Every list hint expanded for every scope, lowercased.
static ECHOED_HINTS: LazyLock<Vec<String>> = LazyLock::new(|| {
    LIST_HINTS
        .iter()
        .flat_map(|(_, hint)| SCOPES.iter().map(|scope| list_hint(hint, scope).to_lowercase()))
        .collect()
});

/// Items must be longer than this many characters to be kept.
const MIN_ITEM_CHARS: usize = 3;

// ---------------------------------------------------------------------------
// Pattern cascade
// ---------------------------------------------------------------------------

/// One way a section may be introduced: a header line containing the label
/// and a rule for the line that ends its block.
struct SectionPattern {
    name: &'static str,
    /// Header template; `{label}` is replaced by the escaped label.
    header: &'static str,
    terminator: &'static str,
}

const PATTERNS: [SectionPattern; 4] = [
    SectionPattern {
        name: "numbered",
        header: r"^##[ \t]*\d+\.[ \t]*{label}[:\s]*$",
        terminator: r"^##[ \t]*\d+\.",
    },
    SectionPattern {
        name: "plain",
        header: r"^##[ \t]*{label}[:\s]*$",
        terminator: r"^##",
    },
    SectionPattern {
        name: "any-level",
        header: r"^#{1,6}[ \t]*(?:\d+\.?)?[ \t]*{label}[:\s]*$",
        terminator: r"^#{1,6}[ \t]",
    },
    SectionPattern {
        name: "label",
        header: r"^[ \t]*(?:\*\*)?{label}(?:\*\*)?[ \t]*:?[ \t]*(?:\*\*)?[ \t]*$",
        terminator: r"^(?:#{1,6}[ \t]|\*\*[^*]+\*\*[ \t]*:?[ \t]*$|[A-Z][A-Za-z ]+:[ \t]*$)",
    },
];

/// Merged output separators close any open block.
static SEGMENT_BOUNDARY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<!-- SEGMENT \d+ of \d+ -->").expect("valid regex"));

static BULLET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-•*✓][ \t]*").expect("valid regex"));

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.[ \t]*").expect("valid regex"));

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[.*?\][ \t]*").expect("valid regex"));

/// Headers match the label in any case; terminators are case-sensitive so
/// a lowercase prose line ending in a colon stays inside its block.
fn compile(template: &str, label: &str, case_insensitive: bool) -> Option<Regex> {
    let source = template.replace("{label}", &regex::escape(label));
    RegexBuilder::new(&source)
        .case_insensitive(case_insensitive)
        .build()
        .ok()
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Extract the items of the section named `label` from `raw`.
///
/// Patterns are tried in order and the first one that locates a non-empty
/// block wins. Every block that pattern locates is used, so a merged
/// multi-segment document yields the union of its segments' items (first
/// occurrence order, duplicates dropped). Returns an empty list when the
/// section is absent.
pub fn extract(raw: &str, label: &str) -> Vec<String> {
    let text = raw.replace("\r\n", "\n");
    let lines: Vec<&str> = text.lines().collect();

    for pattern in &PATTERNS {
        let (Some(header), Some(terminator)) = (
            compile(pattern.header, label, true),
            compile(pattern.terminator, label, false),
        ) else {
            continue;
        };

        let blocks = collect_blocks(&lines, &header, &terminator);
        if blocks.iter().all(|b| b.iter().all(|l| l.trim().is_empty())) {
            continue;
        }

        let items = dedup(blocks.into_iter().flatten().filter_map(normalize_line));
        debug!(label, pattern = pattern.name, items = items.len(), "section located");
        return items;
    }

    let items = dedup(fallback_scan(&lines, label).into_iter().filter_map(normalize_line));
    if items.is_empty() {
        trace!(label, "section not found");
    } else {
        debug!(label, items = items.len(), "section recovered by line scan");
    }
    items
}

/// Expand a [`LIST_HINTS`] template for one prompt scope.
pub fn list_hint(template: &str, scope: &str) -> String {
    template.replace("{scope}", scope)
}

/// Whether `line` is template text rather than content: one of the
/// parenthesised markers or a list hint echoed back from the prompt.
pub fn is_placeholder(line: &str) -> bool {
    let trimmed = line.trim();
    if PLACEHOLDERS.iter().any(|p| trimmed.eq_ignore_ascii_case(p)) {
        return true;
    }
    let lowered = trimmed.trim_end_matches('.').trim_end().to_lowercase();
    ECHOED_HINTS.iter().any(|h| *h == lowered)
}

fn collect_blocks<'a>(lines: &[&'a str], header: &Regex, terminator: &Regex) -> Vec<Vec<&'a str>> {
    let mut blocks = Vec::new();
    let mut current: Option<Vec<&'a str>> = None;

    for &line in lines {
        let trimmed = line.trim_end();
        if header.is_match(trimmed) {
            if let Some(block) = current.take() {
                blocks.push(block);
            }
            current = Some(Vec::new());
            continue;
        }
        if current.is_none() {
            continue;
        }
        if terminator.is_match(trimmed) || SEGMENT_BOUNDARY_RE.is_match(trimmed) {
            blocks.extend(current.take());
        } else if let Some(block) = current.as_mut() {
            block.push(line);
        }
    }
    blocks.extend(current);
    blocks
}

/// Last resort: a heading-like line mentioning the label opens a block that
/// runs to the next heading not mentioning it.
fn fallback_scan<'a>(lines: &[&'a str], label: &str) -> Vec<&'a str> {
    let needle = label.to_lowercase();
    let mut collecting = false;
    let mut out = Vec::new();

    for &line in lines {
        let trimmed = line.trim();
        let mentions = trimmed.to_lowercase().contains(&needle);

        if mentions && (trimmed.starts_with('#') || trimmed.ends_with(':')) {
            collecting = true;
            continue;
        }
        if !collecting {
            continue;
        }
        if trimmed.starts_with('#') || SEGMENT_BOUNDARY_RE.is_match(trimmed) {
            if mentions {
                continue;
            }
            break;
        }
        out.push(line);
    }
    out
}

/// Strip list decoration; `None` for lines that are not content.
fn normalize_line(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.is_empty()
        || is_placeholder(trimmed)
        || trimmed.starts_with('#')
        || trimmed.starts_with("---")
        || trimmed.starts_with("<!--")
    {
        return None;
    }

    let cleaned = BULLET_RE.replace(trimmed, "");
    let cleaned = NUMBER_RE.replace(&cleaned, "");
    let cleaned = TAG_RE.replace(&cleaned, "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= MIN_ITEM_CHARS || cleaned.starts_with('[') || is_placeholder(cleaned)
    {
        return None;
    }
    Some(cleaned.to_string())
}

fn dedup(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
