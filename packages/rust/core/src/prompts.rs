//! Prompt templates for extraction and explanation.

use studyforge_markdown::{LIST_HINTS, SCOPE_IMAGE, SCOPE_SEGMENT, SCOPE_SOURCE, list_hint};

use crate::tutor::StrategyProfile;

/// Heading of the narrative section every extraction ends with.
pub const NOTES_LABEL: &str = "Study Notes";

const RULE: &str = "----------------------------------------------------------------";

/// The headed layout every extraction prompt asks for. List hints come from
/// the markdown crate so echoed hints are recognised as placeholders.
pub(crate) fn output_format(scope: &str) -> String {
    let mut out = String::new();
    for (i, (label, hint)) in LIST_HINTS.iter().enumerate() {
        out.push_str(&format!("## {}. {label}\n- {}\n\n", i + 1, list_hint(hint, scope)));
    }
    out.push_str(&format!(
        "## {}. {NOTES_LABEL}\n\
         A complete, well-organised markdown document covering ALL of {scope}, \
         in its original order, using headings, paragraphs, lists, code blocks \
         and tables as appropriate.",
        LIST_HINTS.len() + 1
    ));
    out
}

const FIDELITY_RULES: &str = "\
Extract and organise; never teach or interpret.
- Include ALL content. Do not summarise aggressively.
- Preserve exact wording, formulas and technical terms.
- Keep the source's ordering and structure.
- Do not add explanations, analogies or outside knowledge.
- Preserve ambiguity and contradictions instead of resolving them.
- Leave a list section empty if the source has nothing for it.";

/// Prompt for a document that fits in one call.
pub fn extraction_prompt(content: &str) -> String {
    format!(
        "You are a high-fidelity knowledge structuring system.\n\n\
         {FIDELITY_RULES}\n\n\
         OUTPUT FORMAT (use these exact headers):\n{RULE}\n{}\n{RULE}\n\n\
         INPUT CONTENT:\n{RULE}\n{content}\n{RULE}\n\n\
         Output ONLY the structured format above.",
        output_format(SCOPE_SOURCE)
    )
}

/// Prompt for one segment of a larger document (`index` is zero-based).
pub fn segment_extraction_prompt(segment: &str, index: usize, total: usize) -> String {
    format!(
        "You are a high-fidelity knowledge structuring system processing segment \
         {} of {total} of a larger document.\n\
         Process this segment on its own. Make no assumptions about other segments.\n\n\
         {FIDELITY_RULES}\n\n\
         OUTPUT FORMAT (use these exact headers):\n{RULE}\n{}\n{RULE}\n\n\
         SEGMENT CONTENT:\n{RULE}\n{segment}\n{RULE}\n\n\
         Output ONLY the structured format above.",
        index + 1,
        output_format(SCOPE_SEGMENT)
    )
}

/// Prompt accompanying an image input.
pub fn image_extraction_prompt() -> String {
    format!(
        "You are a high-fidelity document perception system. The attached image \
         is study material: a page, slide, whiteboard or diagram.\n\n\
         Transcribe ALL visible text exactly, including equations and labels. \
         Describe every diagram in terms of its components and relationships. \
         Mark unreadable text as [illegible].\n\n\
         {FIDELITY_RULES}\n\n\
         OUTPUT FORMAT (use these exact headers):\n{RULE}\n{}\n{RULE}\n\n\
         Output ONLY the structured format above.",
        output_format(SCOPE_IMAGE)
    )
}

/// Prompt for an adaptive explanation of `question` grounded in `notes`.
pub fn explanation_prompt(
    question: &str,
    notes: &str,
    learner_context: &str,
    strategy: &StrategyProfile,
) -> String {
    format!(
        r#"You are an expert tutor grounded in learning science.

LEARNER STATE
{RULE}
{learner_context}

TEACHING STRATEGY FOR THIS RESPONSE
{RULE}
Style: {style}
Depth: {depth}
Vocabulary: {vocabulary}
Analogies: {analogies}
Pacing: {pacing}
Understanding check: {probing}

LEARNING MATERIAL (SOURCE OF TRUTH)
{RULE}
{notes}

LEARNER'S QUESTION
{RULE}
{question}

RULES
- Teach ONLY from the learning material above.
- Follow the teaching strategy exactly.
- Never quiz the learner, create exercises or mention practice activities.
- Treat confusion as normal; be warm and patient.
- End with ONE gentle question that checks understanding.

OUTPUT FORMAT (STRICT):
{{
  "explanation": "<your explanation, markdown allowed>",
  "understanding_check": "<one gentle question>"
}}

Return ONLY the JSON object."#,
        style = strategy.style,
        depth = strategy.depth,
        vocabulary = strategy.vocabulary,
        analogies = strategy.analogies,
        pacing = strategy.pacing,
        probing = strategy.probing,
    )
}
