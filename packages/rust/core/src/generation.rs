//! Structured generation with bounded corrective retry.
//!
//! Each attempt asks the generator for text, cuts the outermost JSON object
//! out of it, and hands it to a [`Contract`] for validation. Parse and schema
//! failures are fed back to the generator as a corrective instruction on the
//! next attempt; anything else (upstream outages included) aborts at once.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use studyforge_provider::{GenerationRequest, TextGenerator};
use studyforge_shared::{Result, StudyForgeError, excerpt};

/// A validation contract for one kind of structured output.
pub trait Contract {
    type Output;

    /// Short identifier used in logs and `GenerationFailure`.
    fn name(&self) -> &str;

    /// Accept `value` or describe exactly what is wrong with it.
    fn validate(&self, value: &Value) -> Result<Self::Output>;
}

/// A validated object plus the number of attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Generated<T> {
    pub value: T,
    pub attempts: u32,
}

/// Issues prompts and retries until a [`Contract`] accepts the output.
#[derive(Clone)]
pub struct StructuredGenerator {
    generator: Arc<dyn TextGenerator>,
    max_attempts: u32,
}

impl StructuredGenerator {
    pub fn new(generator: Arc<dyn TextGenerator>, max_attempts: u32) -> Self {
        Self {
            generator,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn text_generator(&self) -> &Arc<dyn TextGenerator> {
        &self.generator
    }

    /// Generate with the configured attempt bound.
    pub async fn generate<C: Contract + Sync>(
        &self,
        prompt: &str,
        contract: &C,
    ) -> Result<Generated<C::Output>> {
        self.generate_with_attempts(prompt, contract, self.max_attempts)
            .await
    }

    /// Generate with an explicit attempt bound (at least one attempt is made).
    #[instrument(skip_all, fields(contract = contract.name(), max_attempts = max_attempts))]
    pub async fn generate_with_attempts<C: Contract + Sync>(
        &self,
        prompt: &str,
        contract: &C,
        max_attempts: u32,
    ) -> Result<Generated<C::Output>> {
        let max_attempts = max_attempts.max(1);
        let mut request = GenerationRequest::text(prompt);
        let mut last_error = String::new();
        let mut last_raw = String::new();

        for attempt in 1..=max_attempts {
            let raw = self.generator.generate(&request).await?;

            match parse_object(&raw).and_then(|value| contract.validate(&value)) {
                Ok(value) => {
                    if attempt > 1 {
                        info!(attempt, "generation recovered after retry");
                    } else {
                        debug!(attempt, "generation accepted");
                    }
                    return Ok(Generated {
                        value,
                        attempts: attempt,
                    });
                }
                Err(e) if e.is_retryable() => {
                    warn!(attempt, max_attempts, error = %e, "generated output rejected");
                    request = GenerationRequest::text(format!("{prompt}{}", corrective_instruction(&e)));
                    last_error = e.to_string();
                    last_raw = raw;
                }
                Err(e) => return Err(e),
            }
        }

        Err(StudyForgeError::GenerationFailure {
            contract: contract.name().to_string(),
            attempts: max_attempts,
            last_error,
            excerpt: excerpt(&last_raw),
        })
    }
}

/// Text appended to the original prompt after a rejected attempt.
fn corrective_instruction(error: &StudyForgeError) -> String {
    format!(
        "\n\nYOUR PREVIOUS RESPONSE WAS REJECTED: {error}\n\
         Fix this exact problem. Return ONLY one JSON object in the format above, \
         with no markdown fences and no text outside the object."
    )
}

// ---------------------------------------------------------------------------
// Output cleanup
// ---------------------------------------------------------------------------

/// Remove code fences and any prose outside the outermost `{ ... }`.
pub fn strip_wrapping(raw: &str) -> Option<&str> {
    let mut text = raw.trim();

    if let Some(rest) = text.strip_prefix("```") {
        // Drop the fence line, including any language tag.
        text = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
        text = text.trim_end();
        text = text.strip_suffix("```").unwrap_or(text);
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

/// Parse the outermost JSON object out of free-form generator output.
pub fn parse_object(raw: &str) -> Result<Value> {
    let body = strip_wrapping(raw)
        .ok_or_else(|| StudyForgeError::parse("no JSON object found in output", raw))?;

    let value: Value = serde_json::from_str(body)
        .map_err(|e| StudyForgeError::parse(format!("invalid JSON: {e}"), raw))?;

    if !value.is_object() {
        return Err(StudyForgeError::parse("top-level value is not an object", raw));
    }
    Ok(value)
}

// ---------------------------------------------------------------------------
// Field access helpers shared by contracts
// ---------------------------------------------------------------------------

pub(crate) fn field<'a>(value: &'a Value, name: &str) -> Result<&'a Value> {
    value
        .get(name)
        .filter(|v| !v.is_null())
        .ok_or_else(|| StudyForgeError::schema(name, "missing required field"))
}

pub(crate) fn non_empty_str(value: &Value, path: &str) -> Result<String> {
    let s = value
        .as_str()
        .ok_or_else(|| StudyForgeError::schema(path, format!("expected string, got {}", type_name(value))))?;
    let s = s.trim();
    if s.is_empty() {
        return Err(StudyForgeError::schema(path, "must not be empty"));
    }
    Ok(s.to_string())
}

pub(crate) fn str_field(value: &Value, name: &str) -> Result<String> {
    non_empty_str(field(value, name)?, name)
}

/// A list of non-empty, pairwise distinct strings.
pub(crate) fn distinct_str_list(value: &Value, name: &str) -> Result<Vec<String>> {
    let array = field(value, name)?
        .as_array()
        .ok_or_else(|| StudyForgeError::schema(name, "expected array of strings"))?;

    let mut out: Vec<String> = Vec::with_capacity(array.len());
    for (i, item) in array.iter().enumerate() {
        let s = non_empty_str(item, &format!("{name}[{i}]"))?;
        if out.iter().any(|existing| existing.eq_ignore_ascii_case(&s)) {
            return Err(StudyForgeError::schema(
                format!("{name}[{i}]"),
                format!("duplicate entry \"{s}\""),
            ));
        }
        out.push(s);
    }
    Ok(out)
}

pub(crate) fn object_field<'a>(
    value: &'a Value,
    name: &str,
) -> Result<&'a serde_json::Map<String, Value>> {
    field(value, name)?
        .as_object()
        .ok_or_else(|| StudyForgeError::schema(name, "expected object"))
}

pub(crate) fn check_range(name: &str, len: usize, (lo, hi): (usize, usize)) -> Result<()> {
    if len < lo || len > hi {
        return Err(StudyForgeError::schema(
            name,
            format!("expected between {lo} and {hi} entries, got {len}"),
        ));
    }
    Ok(())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedGenerator;

    struct Greeting;

    impl Contract for Greeting {
        type Output = String;

        fn name(&self) -> &str {
            "greeting"
        }

        fn validate(&self, value: &Value) -> Result<String> {
            str_field(value, "greeting")
        }
    }

    #[test]
    fn strips_fences_and_prose() {
        let raw = "Sure! Here you go:\n```json\n{\"greeting\": \"hi\"}\n```\nEnjoy.";
        assert_eq!(strip_wrapping(raw), Some("{\"greeting\": \"hi\"}"));

        let fenced = "```json\n{\"a\": {\"b\": 1}}\n```";
        assert_eq!(strip_wrapping(fenced), Some("{\"a\": {\"b\": 1}}"));
    }

    #[test]
    fn parse_rejects_non_objects() {
        assert!(matches!(
            parse_object("no braces at all"),
            Err(StudyForgeError::GenerationParse { .. })
        ));
        assert!(matches!(
            parse_object("{not json}"),
            Err(StudyForgeError::GenerationParse { .. })
        ));
    }

    #[tokio::test]
    async fn recovers_on_third_attempt() {
        let stub = ScriptedGenerator::new([
            "definitely not json",
            "{\"greeting\": \"\"}",
            "```json\n{\"greeting\": \"hello\"}\n```",
        ]);
        let generator = StructuredGenerator::new(stub.clone(), 3);

        let out = generator.generate("say hi", &Greeting).await.unwrap();
        assert_eq!(out.value, "hello");
        assert_eq!(out.attempts, 3);
        assert_eq!(stub.calls(), 3);

        let prompts = stub.prompts();
        assert_eq!(prompts[0], "say hi");
        assert!(prompts[1].starts_with("say hi"));
        assert!(prompts[1].contains("no JSON object found"));
        assert!(prompts[2].contains("`greeting`"));
        // Corrections are not stacked across attempts.
        assert!(!prompts[2].contains("no JSON object found"));
    }

    #[tokio::test]
    async fn fails_after_exactly_max_attempts() {
        let stub = ScriptedGenerator::repeating("{\"wrong\": true}");
        let generator = StructuredGenerator::new(stub.clone(), 4);

        let err = generator.generate("say hi", &Greeting).await.unwrap_err();
        match err {
            StudyForgeError::GenerationFailure {
                contract,
                attempts,
                last_error,
                excerpt,
            } => {
                assert_eq!(contract, "greeting");
                assert_eq!(attempts, 4);
                assert!(last_error.contains("missing required field"));
                assert_eq!(excerpt, "{\"wrong\": true}");
            }
            other => panic!("expected GenerationFailure, got {other:?}"),
        }
        assert_eq!(stub.calls(), 4);
    }

    #[tokio::test]
    async fn upstream_errors_are_not_retried() {
        let stub = ScriptedGenerator::failing();
        let generator = StructuredGenerator::new(stub.clone(), 3);

        let err = generator.generate("say hi", &Greeting).await.unwrap_err();
        assert!(matches!(err, StudyForgeError::UpstreamUnavailable(_)));
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test]
    async fn zero_attempt_bound_still_tries_once() {
        let stub = ScriptedGenerator::repeating("{\"greeting\": \"yo\"}");
        let generator = StructuredGenerator::new(stub.clone(), 0);
        let out = generator
            .generate_with_attempts("say hi", &Greeting, 0)
            .await
            .unwrap();
        assert_eq!(out.attempts, 1);
    }
}
