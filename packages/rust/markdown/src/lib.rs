//! Document segmentation, section extraction and result merging.
//!
//! Large documents are cut into bounded [`Segment`]s along page markers,
//! headings or paragraphs (with a hard-limit fallback). Per-segment results
//! are combined with [`merge`], and the combined text is parsed into item
//! lists with [`extract`].

pub mod merge;
pub mod sections;
pub mod split;

pub use merge::{MERGED_TITLE, merge, split_merged};
pub use sections::{
    CORE_CONCEPTS, DEFINITIONS, DIAGRAM_DESCRIPTIONS, EXAMPLES, LIST_HINTS, SCOPE_IMAGE,
    SCOPE_SEGMENT, SCOPE_SOURCE, SECTION_LABELS, extract, is_placeholder, list_hint,
};
pub use split::{
    DEFAULT_OVERLAP_CHARS, Segment, SplitOptions, SplitOutcome, reconstruct, split, split_with,
};
