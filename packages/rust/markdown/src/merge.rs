//! Combine per-segment extraction results into one document.

use std::sync::LazyLock;

use regex::Regex;

/// Title line of a merged multi-segment document.
pub const MERGED_TITLE: &str = "# Complete Document";

static SEGMENT_MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\n\n<!-- SEGMENT (\d+) of (\d+) -->\n").expect("valid regex")
});

/// Merge results in order.
///
/// A single result is returned unchanged. Otherwise the output is a title
/// header followed by each result behind a `<!-- SEGMENT i of N -->` marker.
pub fn merge(results: &[String]) -> String {
    match results {
        [] => String::new(),
        [only] => only.clone(),
        many => {
            let total = many.len();
            let mut out = format!("{MERGED_TITLE}\n\n_Processed in {total} segments._");
            for (i, result) in many.iter().enumerate() {
                out.push_str(&format!("\n\n<!-- SEGMENT {} of {total} -->\n", i + 1));
                out.push_str(result);
            }
            out
        }
    }
}

/// Recover the per-segment results from a merged document.
///
/// Text without segment markers is treated as a single result.
pub fn split_merged(merged: &str) -> Vec<String> {
    let markers: Vec<_> = SEGMENT_MARKER_RE.find_iter(merged).collect();
    if markers.is_empty() {
        return vec![merged.to_string()];
    }

    markers
        .iter()
        .enumerate()
        .map(|(i, m)| {
            let end = markers
                .get(i + 1)
                .map(|next| next.start())
                .unwrap_or(merged.len());
            merged[m.end()..end].to_string()
        })
        .collect()
}
