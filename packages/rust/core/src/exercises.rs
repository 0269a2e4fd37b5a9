//! Practice exercise contracts.
//!
//! Every [`ExerciseKind`] has one static row holding its prompt builder,
//! nuance cap and validator. Adding a kind means adding a variant and a row;
//! only `spec_for` branches on kind, and it is exhaustive.

use std::collections::BTreeMap;

use serde_json::Value;

use studyforge_shared::{
    BinaryClassification, ExerciseKind, ExerciseLimits, ExerciseObject, OutlierDetection, Pairing,
    Result, Side, StudyForgeError,
};

use crate::generation::{
    Contract, check_range, distinct_str_list, non_empty_str, object_field, str_field,
};

// ---------------------------------------------------------------------------
// Kind rows
// ---------------------------------------------------------------------------

struct KindSpec {
    /// How many nuances the prompt may mention.
    nuance_limit: usize,
    nuance_intro: &'static str,
    prompt: fn(&str, &ExerciseLimits) -> String,
    validate: fn(&Value, &ExerciseLimits) -> Result<ExerciseObject>,
}

static BINARY_CLASSIFICATION: KindSpec = KindSpec {
    nuance_limit: 3,
    nuance_intro: "Focus on these aspects",
    prompt: binary_prompt,
    validate: validate_binary,
};

static OUTLIER_DETECTION: KindSpec = KindSpec {
    nuance_limit: 3,
    nuance_intro: "Test these boundaries",
    prompt: outlier_prompt,
    validate: validate_outlier,
};

static PAIRING: KindSpec = KindSpec {
    nuance_limit: 4,
    nuance_intro: "Include these aspects",
    prompt: pairing_prompt,
    validate: validate_pairing,
};

fn spec_for(kind: ExerciseKind) -> &'static KindSpec {
    match kind {
        ExerciseKind::BinaryClassification => &BINARY_CLASSIFICATION,
        ExerciseKind::OutlierDetection => &OUTLIER_DETECTION,
        ExerciseKind::Pairing => &PAIRING,
    }
}

/// Maximum number of nuances embedded in a prompt for `kind`.
pub fn nuance_limit(kind: ExerciseKind) -> usize {
    spec_for(kind).nuance_limit
}

/// Build the generation prompt for one exercise.
pub fn exercise_prompt(
    kind: ExerciseKind,
    concept: &str,
    nuances: &[String],
    limits: &ExerciseLimits,
) -> String {
    let spec = spec_for(kind);
    let mut target = format!("the concept \"{concept}\"");

    let used: Vec<&str> = nuances
        .iter()
        .map(|n| n.trim())
        .filter(|n| !n.is_empty())
        .take(spec.nuance_limit)
        .collect();
    if !used.is_empty() {
        target.push_str(&format!("\n{}: {}", spec.nuance_intro, used.join(", ")));
    }

    (spec.prompt)(&target, limits)
}

/// Validation contract for one exercise kind.
#[derive(Debug, Clone)]
pub struct ExerciseContract<'a> {
    pub kind: ExerciseKind,
    pub limits: &'a ExerciseLimits,
}

impl<'a> ExerciseContract<'a> {
    pub fn new(kind: ExerciseKind, limits: &'a ExerciseLimits) -> Self {
        Self { kind, limits }
    }
}

impl Contract for ExerciseContract<'_> {
    type Output = ExerciseObject;

    fn name(&self) -> &str {
        self.kind.as_str()
    }

    fn validate(&self, value: &Value) -> Result<ExerciseObject> {
        (spec_for(self.kind).validate)(value, self.limits)
    }
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

const PROMPT_HEADER: &str =
    "You are a practice content generator. Output ONLY valid JSON, no explanations.";
const PROMPT_FOOTER: &str = "Return ONLY the JSON object. No markdown, no prose.";

fn binary_prompt(target: &str, limits: &ExerciseLimits) -> String {
    let (lo, hi) = limits.binary_items;
    format!(
        r#"{PROMPT_HEADER}

TASK: Generate a binary classification exercise for {target}

REQUIREMENTS:
1. Infer TWO distinct, contrasting categories from the concept
2. Generate between {lo} and {hi} items
3. Every item belongs to exactly one category ("left" or "right")
4. Prefer subtle distinctions over obvious ones
5. Give a one-sentence rationale for EVERY item

OUTPUT FORMAT (STRICT):
{{
  "left_category": "<category name>",
  "right_category": "<contrasting category name>",
  "items": ["<item1>", "<item2>", ...],
  "answer_key": {{ "<item1>": "left", "<item2>": "right", ... }},
  "rationales": {{ "<item1>": "<why>", "<item2>": "<why>", ... }}
}}

{PROMPT_FOOTER}"#
    )
}

fn outlier_prompt(target: &str, limits: &ExerciseLimits) -> String {
    let k = limits.outlier_options;
    let genuine = k.saturating_sub(1);
    format!(
        r#"{PROMPT_HEADER}

TASK: Generate a "find the outlier" exercise for {target}

REQUIREMENTS:
1. Generate exactly {k} distinct options
2. {genuine} options genuinely belong to the concept
3. 1 option is the outlier: subtly different, not obviously wrong
4. The outlier MUST be copied verbatim from the options list
5. Give one rationale explaining why the outlier does not belong

OUTPUT FORMAT (STRICT):
{{
  "options": ["<option1>", "<option2>", ...],
  "outlier": "<one of the options above>",
  "rationale": "<why it is the outlier>"
}}

{PROMPT_FOOTER}"#
    )
}

fn pairing_prompt(target: &str, limits: &ExerciseLimits) -> String {
    let (lo, hi) = limits.pairing_pairs;
    format!(
        r#"{PROMPT_HEADER}

TASK: Generate a matching-pairs exercise for {target}

REQUIREMENTS:
1. Create between {lo} and {hi} term-association pairs
2. Terms are specific to the concept, not generic
3. Associations are concise (1-2 sentences max)
4. Give a rationale for EVERY term, keyed by the term

OUTPUT FORMAT (STRICT):
{{
  "pairs": {{ "<term1>": "<association1>", "<term2>": "<association2>", ... }},
  "rationales": {{ "<term1>": "<why they match>", "<term2>": "<why they match>", ... }}
}}

{PROMPT_FOOTER}"#
    )
}

// ---------------------------------------------------------------------------
// Validators
// ---------------------------------------------------------------------------

fn validate_binary(value: &Value, limits: &ExerciseLimits) -> Result<ExerciseObject> {
    let left_category = str_field(value, "left_category")?;
    let right_category = str_field(value, "right_category")?;
    if left_category.eq_ignore_ascii_case(&right_category) {
        return Err(StudyForgeError::schema(
            "right_category",
            "categories must be distinct",
        ));
    }

    let items = distinct_str_list(value, "items")?;
    check_range("items", items.len(), limits.binary_items)?;

    let mut answer_key = BTreeMap::new();
    for (item, side) in object_field(value, "answer_key")? {
        let path = format!("answer_key.{item}");
        require_member(&items, item, &path)?;
        let side = non_empty_str(side, &path)?;
        let side = parse_side(&side, &left_category, &right_category, &path)?;
        if answer_key.insert(item.trim().to_string(), side).is_some() {
            return Err(duplicate_key("answer_key", item));
        }
    }
    require_all_keyed(&items, &answer_key, "answer_key")?;

    let rationales = rationale_map(value, "rationales", &items)?;

    Ok(ExerciseObject::BinaryClassification(BinaryClassification {
        left_category,
        right_category,
        items,
        answer_key,
        rationales,
    }))
}

fn validate_outlier(value: &Value, limits: &ExerciseLimits) -> Result<ExerciseObject> {
    let options = distinct_str_list(value, "options")?;
    let k = limits.outlier_options;
    if options.len() != k {
        return Err(StudyForgeError::schema(
            "options",
            format!("expected exactly {k} options, got {}", options.len()),
        ));
    }

    let outlier = str_field(value, "outlier")?;
    if !options.contains(&outlier) {
        return Err(StudyForgeError::schema(
            "outlier",
            format!("\"{outlier}\" is not one of the options"),
        ));
    }

    let rationale = str_field(value, "rationale")?;

    Ok(ExerciseObject::OutlierDetection(OutlierDetection {
        options,
        outlier,
        rationale,
    }))
}

fn validate_pairing(value: &Value, limits: &ExerciseLimits) -> Result<ExerciseObject> {
    let raw_pairs = object_field(value, "pairs")?;
    check_range("pairs", raw_pairs.len(), limits.pairing_pairs)?;

    let mut pairs = BTreeMap::new();
    for (term, association) in raw_pairs {
        let term = term.trim();
        if term.is_empty() {
            return Err(StudyForgeError::schema("pairs", "term must not be empty"));
        }
        let association = non_empty_str(association, &format!("pairs.{term}"))?;
        if pairs.insert(term.to_string(), association).is_some() {
            return Err(StudyForgeError::schema(
                format!("pairs.{term}"),
                "duplicate term",
            ));
        }
    }

    let terms: Vec<String> = pairs.keys().cloned().collect();
    let rationales = rationale_map(value, "rationales", &terms)?;

    Ok(ExerciseObject::Pairing(Pairing { pairs, rationales }))
}

/// A map with exactly one non-empty rationale per key in `keys`.
fn rationale_map(value: &Value, name: &str, keys: &[String]) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for (key, text) in object_field(value, name)? {
        let path = format!("{name}.{key}");
        require_member(keys, key, &path)?;
        if out.insert(key.trim().to_string(), non_empty_str(text, &path)?).is_some() {
            return Err(duplicate_key(name, key));
        }
    }
    require_all_keyed(keys, &out, name)?;
    Ok(out)
}

/// Two raw keys that name the same item after trimming.
fn duplicate_key(name: &str, key: &str) -> StudyForgeError {
    StudyForgeError::schema(
        format!("{name}.{}", key.trim()),
        "item is keyed more than once",
    )
}

fn require_member(keys: &[String], key: &str, path: &str) -> Result<()> {
    if keys.iter().any(|k| k == key.trim()) {
        Ok(())
    } else {
        Err(StudyForgeError::schema(path, "refers to an unknown item"))
    }
}

fn require_all_keyed<V>(keys: &[String], map: &BTreeMap<String, V>, name: &str) -> Result<()> {
    match keys.iter().find(|k| !map.contains_key(*k)) {
        Some(missing) => Err(StudyForgeError::schema(
            format!("{name}.{missing}"),
            "missing entry",
        )),
        None => Ok(()),
    }
}

/// Accepts `left`/`right` or either category label.
fn parse_side(raw: &str, left: &str, right: &str, path: &str) -> Result<Side> {
    if raw.eq_ignore_ascii_case("left") || raw.eq_ignore_ascii_case(left) {
        Ok(Side::Left)
    } else if raw.eq_ignore_ascii_case("right") || raw.eq_ignore_ascii_case(right) {
        Ok(Side::Right)
    } else {
        Err(StudyForgeError::schema(
            path,
            format!("\"{raw}\" is neither \"left\" nor \"right\""),
        ))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
