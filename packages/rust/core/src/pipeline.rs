//! Ingestion pipeline: input → segments → per-segment extraction → merge →
//! section extraction → validated knowledge artifact.

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine as _;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use studyforge_markdown::{
    CORE_CONCEPTS, DEFINITIONS, DIAGRAM_DESCRIPTIONS, EXAMPLES, SplitOptions, extract,
    is_placeholder, merge, split_with,
};
use studyforge_provider::{GenerationRequest, ImageInput, TextGenerator};
use studyforge_shared::{
    IngestInput, IngestionConfig, IngestionMeta, KnowledgeArtifact, Modality, Result,
    SplitStrategy, StudyForgeError,
};

use crate::prompts;

const DEFAULT_IMAGE_MIME: &str = "image/png";

/// Outcome of one ingestion.
#[derive(Debug, Clone)]
pub struct IngestionReport {
    pub artifact: KnowledgeArtifact,
    pub meta: IngestionMeta,
    /// Empty list categories, reported but not fatal.
    pub warnings: Vec<String>,
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when a segment extraction finishes (in completion order).
    fn segment_done(&self, index: usize, completed: usize, total: usize);
    /// Called when the pipeline completes.
    fn done(&self, report: &IngestionReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn segment_done(&self, _index: usize, _completed: usize, _total: usize) {}
    fn done(&self, _report: &IngestionReport) {}
}

/// Composes splitting, generation, merging and extraction.
#[derive(Clone)]
pub struct ExtractionPipeline {
    generator: Arc<dyn TextGenerator>,
    config: IngestionConfig,
}

impl ExtractionPipeline {
    pub fn new(generator: Arc<dyn TextGenerator>, config: IngestionConfig) -> Self {
        Self { generator, config }
    }

    /// Run the full pipeline. Nothing is persisted here.
    #[instrument(skip_all, fields(modality = ?input.modality, len = input.content.len()))]
    pub async fn ingest(
        &self,
        input: &IngestInput,
        progress: &dyn ProgressReporter,
    ) -> Result<IngestionReport> {
        let start = Instant::now();

        if input.content.trim().is_empty() {
            return Err(StudyForgeError::input("ingestion content is empty"));
        }

        let (raw, segment_count, strategy) = match input.modality {
            Modality::Text => self.extract_text(&input.content, progress).await?,
            Modality::Image => {
                progress.phase("Reading image");
                let raw = self.extract_image(input).await?;
                (raw, 1, SplitStrategy::Whole)
            }
        };

        progress.phase("Extracting sections");
        let artifact = build_artifact(&raw);
        let warnings = validate_artifact(&artifact, self.config.min_narrative_chars)?;

        let meta = IngestionMeta {
            source_sha256: sha256_hex(&input.content),
            modality: input.modality,
            segment_count,
            strategy,
            ingested_at: Utc::now(),
        };

        let report = IngestionReport {
            artifact,
            meta,
            warnings,
            elapsed: start.elapsed(),
        };

        info!(
            segments = report.meta.segment_count,
            strategy = %report.meta.strategy,
            concepts = report.artifact.core_concepts.len(),
            definitions = report.artifact.definitions.len(),
            examples = report.artifact.examples.len(),
            diagrams = report.artifact.diagram_descriptions.len(),
            narrative_chars = report.artifact.narrative.len(),
            elapsed_ms = report.elapsed.as_millis(),
            "ingestion complete"
        );
        progress.done(&report);
        Ok(report)
    }

    async fn extract_text(
        &self,
        content: &str,
        progress: &dyn ProgressReporter,
    ) -> Result<(String, usize, SplitStrategy)> {
        progress.phase("Splitting document");
        let outcome = split_with(
            content,
            &SplitOptions {
                max_segment_chars: self.config.max_segment_chars,
                overlap_chars: self.config.overlap_chars,
            },
        );
        let total = outcome.segments.len();

        if total == 1 {
            progress.phase("Structuring content");
            let raw = self
                .generator
                .generate(&GenerationRequest::text(prompts::extraction_prompt(content)))
                .await?;
            progress.segment_done(0, 1, 1);
            return Ok((raw, 1, outcome.strategy));
        }

        info!(segments = total, strategy = %outcome.strategy, "document split for extraction");
        progress.phase("Structuring segments");

        let semaphore = Arc::new(Semaphore::new(self.config.segment_concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for segment in outcome.segments {
            let generator = Arc::clone(&self.generator);
            let sem = Arc::clone(&semaphore);
            let prompt = prompts::segment_extraction_prompt(&segment.text, segment.index, total);
            let index = segment.index;

            tasks.spawn(async move {
                let _permit = sem.acquire_owned().await.map_err(|e| {
                    StudyForgeError::UpstreamUnavailable(format!("segment scheduler closed: {e}"))
                })?;
                debug!(segment = index, "extracting segment");
                let raw = generator.generate(&GenerationRequest::text(prompt)).await?;
                Ok::<_, StudyForgeError>((index, raw))
            });
        }

        // Results arrive in completion order; slot them back by index.
        let mut results: Vec<Option<String>> = vec![None; total];
        let mut completed = 0;
        while let Some(joined) = tasks.join_next().await {
            let (index, raw) = joined.map_err(|e| {
                StudyForgeError::UpstreamUnavailable(format!("segment task failed: {e}"))
            })??;
            completed += 1;
            progress.segment_done(index, completed, total);
            results[index] = Some(raw);
        }

        let ordered = results
            .into_iter()
            .enumerate()
            .map(|(i, r)| {
                r.ok_or_else(|| {
                    StudyForgeError::UpstreamUnavailable(format!("segment {i} produced no result"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok((merge(&ordered), total, outcome.strategy))
    }

    async fn extract_image(&self, input: &IngestInput) -> Result<String> {
        let payload = input.content.trim();
        base64::engine::general_purpose::STANDARD
            .decode(payload)
            .map_err(|e| StudyForgeError::input(format!("image content is not valid base64: {e}")))?;

        let mime_type = input
            .mime_type
            .clone()
            .unwrap_or_else(|| DEFAULT_IMAGE_MIME.to_string());
        if !mime_type.starts_with("image/") {
            return Err(StudyForgeError::input(format!(
                "unsupported image type: {mime_type}"
            )));
        }

        let request = GenerationRequest::with_image(
            prompts::image_extraction_prompt(),
            ImageInput {
                mime_type,
                base64: payload.to_string(),
            },
        );
        self.generator.generate(&request).await
    }
}

/// Parse generator output (single or merged) into an artifact.
pub fn build_artifact(raw: &str) -> KnowledgeArtifact {
    KnowledgeArtifact {
        core_concepts: extract(raw, CORE_CONCEPTS),
        definitions: extract(raw, DEFINITIONS),
        examples: extract(raw, EXAMPLES),
        diagram_descriptions: extract(raw, DIAGRAM_DESCRIPTIONS),
        narrative: raw.trim().to_string(),
    }
}

/// Enforce artifact invariants. Returns warnings for empty categories.
pub fn validate_artifact(artifact: &KnowledgeArtifact, min_narrative_chars: usize) -> Result<Vec<String>> {
    let narrative_chars = artifact.narrative.chars().count();
    if narrative_chars < min_narrative_chars {
        return Err(StudyForgeError::schema(
            "narrative",
            format!(
                "extraction produced {narrative_chars} characters, at least {min_narrative_chars} required"
            ),
        ));
    }

    let categories = [
        ("core_concepts", &artifact.core_concepts),
        ("definitions", &artifact.definitions),
        ("examples", &artifact.examples),
        ("diagram_descriptions", &artifact.diagram_descriptions),
    ];

    let mut warnings = Vec::new();
    for (name, items) in categories {
        if let Some(bad) = items.iter().position(|i| is_placeholder(i)) {
            return Err(StudyForgeError::schema(
                format!("{name}[{bad}]"),
                "placeholder text in extracted list",
            ));
        }
        if items.is_empty() {
            warn!(category = name, "no items extracted");
            warnings.push(format!("no {} extracted", name.replace('_', " ")));
        }
    }
    Ok(warnings)
}

fn sha256_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::testing::{ScriptedGenerator, structured_output};

    fn config(max_segment_chars: usize) -> IngestionConfig {
        IngestionConfig {
            max_segment_chars,
            overlap_chars: 10,
            segment_concurrency: 3,
            min_narrative_chars: 100,
        }
    }

    #[derive(Default)]
    struct RecordingProgress {
        done: Mutex<Vec<usize>>,
    }

    impl ProgressReporter for RecordingProgress {
        fn phase(&self, _name: &str) {}
        fn segment_done(&self, index: usize, _completed: usize, _total: usize) {
            self.done.lock().unwrap().push(index);
        }
        fn done(&self, _report: &IngestionReport) {}
    }

    #[tokio::test]
    async fn small_text_uses_one_call() {
        let stub = ScriptedGenerator::repeating(&structured_output(&["Osmosis", "Diffusion"]));
        let pipeline = ExtractionPipeline::new(stub.clone(), config(10_000));

        let report = pipeline
            .ingest(&IngestInput::text("Osmosis moves water."), &SilentProgress)
            .await
            .unwrap();

        assert_eq!(stub.calls(), 1);
        assert_eq!(report.meta.segment_count, 1);
        assert_eq!(report.meta.strategy, SplitStrategy::Whole);
        assert_eq!(report.artifact.core_concepts, vec!["Osmosis", "Diffusion"]);
        assert_eq!(report.meta.source_sha256.len(), 64);
        assert!(stub.prompts()[0].contains("Osmosis moves water."));
    }

    #[tokio::test]
    async fn large_text_is_split_and_merged_in_order() {
        // The stub answers each segment with concepts named after it.
        let stub = ScriptedGenerator::with_fn(|prompt| {
            let n = if prompt.contains("segment 1 of") {
                1
            } else if prompt.contains("segment 2 of") {
                2
            } else {
                3
            };
            structured_output(&[&format!("Concept {n}A"), &format!("Concept {n}B")])
        });
        let pipeline = ExtractionPipeline::new(stub.clone(), config(120));

        let doc = format!(
            "# One\n{}\n# Two\n{}\n# Three\n{}\n",
            "a".repeat(90),
            "b".repeat(90),
            "c".repeat(90)
        );
        let progress = RecordingProgress::default();
        let report = pipeline.ingest(&IngestInput::text(doc), &progress).await.unwrap();

        assert_eq!(stub.calls(), 3);
        assert_eq!(report.meta.segment_count, 3);
        assert_eq!(report.meta.strategy, SplitStrategy::Headings);
        assert_eq!(
            report.artifact.core_concepts,
            vec!["Concept 1A", "Concept 1B", "Concept 2A", "Concept 2B", "Concept 3A", "Concept 3B"]
        );
        assert!(report.artifact.narrative.contains("<!-- SEGMENT 3 of 3 -->"));

        let mut seen = progress.done.lock().unwrap().clone();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn empty_input_is_rejected_without_calls() {
        let stub = ScriptedGenerator::repeating("unused");
        let pipeline = ExtractionPipeline::new(stub.clone(), config(100));

        let err = pipeline
            .ingest(&IngestInput::text("   \n"), &SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, StudyForgeError::InputValidation { .. }));
        assert_eq!(stub.calls(), 0);
    }

    #[tokio::test]
    async fn image_input_goes_multimodal() {
        let stub = ScriptedGenerator::repeating(&structured_output(&["Lever"]));
        let pipeline = ExtractionPipeline::new(stub.clone(), config(100));

        let report = pipeline
            .ingest(&IngestInput::image("aGVsbG8=", "image/jpeg"), &SilentProgress)
            .await
            .unwrap();
        assert_eq!(report.meta.modality, Modality::Image);
        assert_eq!(stub.images(), vec![Some("image/jpeg".to_string())]);
    }

    #[tokio::test]
    async fn bad_base64_is_input_error() {
        let stub = ScriptedGenerator::repeating("unused");
        let pipeline = ExtractionPipeline::new(stub.clone(), config(100));

        let err = pipeline
            .ingest(&IngestInput::image("not base64!!", "image/png"), &SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, StudyForgeError::InputValidation { .. }));
        assert_eq!(stub.calls(), 0);
    }

    #[tokio::test]
    async fn upstream_failure_propagates() {
        let pipeline = ExtractionPipeline::new(ScriptedGenerator::failing(), config(100));
        let err = pipeline
            .ingest(&IngestInput::text("Some notes"), &SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, StudyForgeError::UpstreamUnavailable(_)));
    }

    #[test]
    fn short_narrative_is_rejected() {
        let artifact = build_artifact("## 1. Core Concepts\n- Tiny");
        let err = validate_artifact(&artifact, 100).unwrap_err();
        assert!(matches!(err, StudyForgeError::SchemaValidation { ref field, .. } if field == "narrative"));
    }

    #[test]
    fn empty_categories_warn() {
        let raw = structured_output(&["Gravity"]);
        let mut artifact = build_artifact(&raw);
        artifact.examples.clear();
        let warnings = validate_artifact(&artifact, 10).unwrap();
        assert!(warnings.iter().any(|w| w == "no examples extracted"));
    }

    #[test]
    fn echoed_output_format_yields_no_items() {
        let raw = prompts::output_format(studyforge_markdown::SCOPE_SOURCE);
        let artifact = build_artifact(&raw);
        assert!(artifact.core_concepts.is_empty());
        assert!(artifact.definitions.is_empty());
        assert!(artifact.examples.is_empty());
        assert!(artifact.diagram_descriptions.is_empty());

        let warnings = validate_artifact(&artifact, 100).unwrap();
        assert_eq!(warnings.len(), 4);
    }

    #[test]
    fn hint_text_in_a_list_is_rejected() {
        let mut artifact = build_artifact(&structured_output(&["Gravity"]));
        artifact
            .diagram_descriptions
            .push("What each figure, table or diagram in the image shows.".to_string());
        let err = validate_artifact(&artifact, 10).unwrap_err();
        assert!(matches!(
            err,
            StudyForgeError::SchemaValidation { ref field, .. }
                if field.starts_with("diagram_descriptions[")
        ));
    }
}
