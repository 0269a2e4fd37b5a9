//! Core domain types for StudyForge sessions.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current schema version for persisted session state.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// SessionId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for session identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Generate a new time-sortable session identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Ingestion input
// ---------------------------------------------------------------------------

/// What kind of content the file decoder produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Text,
    Image,
}

/// Decoded study material handed to ingestion. Never raw file bytes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestInput {
    pub modality: Modality,
    /// Plain text, or base64 image data for [`Modality::Image`].
    pub content: String,
    /// MIME type of image content (e.g. `image/png`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl IngestInput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            modality: Modality::Text,
            content: content.into(),
            mime_type: None,
        }
    }

    pub fn image(base64: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            modality: Modality::Image,
            content: base64.into(),
            mime_type: Some(mime_type.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// KnowledgeArtifact
// ---------------------------------------------------------------------------

/// The structured extraction result; sole teaching source of truth for a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeArtifact {
    pub core_concepts: Vec<String>,
    pub definitions: Vec<String>,
    pub examples: Vec<String>,
    pub diagram_descriptions: Vec<String>,
    /// Full structured document (merged across segments when chunked).
    pub narrative: String,
}

/// Which boundary strategy produced a document's segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitStrategy {
    /// Document fit in one segment; no splitting needed.
    Whole,
    PageMarkers,
    Headings,
    Paragraphs,
    /// Fixed-size slices with overlap.
    HardLimit,
}

impl SplitStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Whole => "whole",
            Self::PageMarkers => "page_markers",
            Self::Headings => "headings",
            Self::Paragraphs => "paragraphs",
            Self::HardLimit => "hard_limit",
        }
    }
}

impl std::fmt::Display for SplitStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provenance recorded alongside the session's current artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionMeta {
    /// SHA-256 of the decoded input content.
    pub source_sha256: String,
    pub modality: Modality,
    pub segment_count: usize,
    pub strategy: SplitStrategy,
    pub ingested_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// ConfusionState
// ---------------------------------------------------------------------------

/// Explanation strategy tiers, from most to least scaffolded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyStyle {
    Foundational,
    Simplified,
    Standard,
}

impl StrategyStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Foundational => "foundational",
            Self::Simplified => "simplified",
            Self::Standard => "standard",
        }
    }
}

impl std::fmt::Display for StrategyStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Learner state driving adaptive explanations and the practice gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfusionState {
    /// Always within `[0, 1]`.
    pub confusion_level: f64,
    pub clarification_requests: u32,
    /// Monotonic within a teaching episode.
    pub understood: bool,
    #[serde(default)]
    pub last_strategy: Option<StrategyStyle>,
}

impl Default for ConfusionState {
    fn default() -> Self {
        Self {
            confusion_level: 0.0,
            clarification_requests: 0,
            understood: false,
            last_strategy: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Exercises
// ---------------------------------------------------------------------------

/// The fixed structural variants of practice exercise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExerciseKind {
    BinaryClassification,
    OutlierDetection,
    Pairing,
}

impl ExerciseKind {
    pub const ALL: [ExerciseKind; 3] = [
        Self::BinaryClassification,
        Self::OutlierDetection,
        Self::Pairing,
    ];

    /// Wire tag used in the `kind` field of generated objects.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BinaryClassification => "binary_classification",
            Self::OutlierDetection => "outlier_detection",
            Self::Pairing => "pairing",
        }
    }
}

impl std::fmt::Display for ExerciseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExerciseKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == normalized)
            .ok_or_else(|| {
                format!(
                    "unknown exercise kind '{s}' (expected one of: binary_classification, outlier_detection, pairing)"
                )
            })
    }
}

/// Side label in a binary-classification answer key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryClassification {
    pub left_category: String,
    pub right_category: String,
    pub items: Vec<String>,
    pub answer_key: BTreeMap<String, Side>,
    pub rationales: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierDetection {
    pub options: Vec<String>,
    pub outlier: String,
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pairing {
    pub pairs: BTreeMap<String, String>,
    pub rationales: BTreeMap<String, String>,
}

/// A validated practice exercise, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExerciseObject {
    BinaryClassification(BinaryClassification),
    OutlierDetection(OutlierDetection),
    Pairing(Pairing),
}

impl ExerciseObject {
    pub fn kind(&self) -> ExerciseKind {
        match self {
            Self::BinaryClassification(_) => ExerciseKind::BinaryClassification,
            Self::OutlierDetection(_) => ExerciseKind::OutlierDetection,
            Self::Pairing(_) => ExerciseKind::Pairing,
        }
    }
}

/// One served exercise in the session history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExerciseRecord {
    pub concept: String,
    pub exercise: ExerciseObject,
    /// Generation attempts it took to obtain a conforming object.
    pub attempts: u32,
    pub generated_at: DateTime<Utc>,
}

/// Running counters over a session's exercise generation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExerciseStats {
    pub generated: u64,
    #[serde(default)]
    pub per_kind: BTreeMap<ExerciseKind, u64>,
    pub generation_attempts: u64,
    pub failed_batches: u64,
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Plain serializable per-session state, persisted through a session store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub schema_version: u32,
    #[serde(default)]
    pub artifact: Option<KnowledgeArtifact>,
    #[serde(default)]
    pub ingestion: Option<IngestionMeta>,
    #[serde(default)]
    pub current_concept: Option<String>,
    #[serde(default)]
    pub confusion: ConfusionState,
    #[serde(default)]
    pub exercise_history: Vec<ExerciseRecord>,
    /// Index into `exercise_history` of the most recently served exercise.
    #[serde(default)]
    pub exercise_index: Option<usize>,
    #[serde(default)]
    pub stats: ExerciseStats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionState {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            artifact: None,
            ingestion: None,
            current_concept: None,
            confusion: ConfusionState::default(),
            exercise_history: Vec::new(),
            exercise_index: None,
            stats: ExerciseStats::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Replace the teaching source of truth and start a new teaching episode.
    pub fn begin_episode(&mut self, artifact: KnowledgeArtifact, meta: IngestionMeta) {
        self.current_concept = artifact.core_concepts.first().cloned();
        self.artifact = Some(artifact);
        self.ingestion = Some(meta);
        self.confusion = ConfusionState::default();
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact() -> KnowledgeArtifact {
        KnowledgeArtifact {
            core_concepts: vec!["Photosynthesis".into(), "Chlorophyll".into()],
            definitions: vec![],
            examples: vec![],
            diagram_descriptions: vec![],
            narrative: "# Notes".into(),
        }
    }

    fn meta() -> IngestionMeta {
        IngestionMeta {
            source_sha256: "abc".into(),
            modality: Modality::Text,
            segment_count: 1,
            strategy: SplitStrategy::Whole,
            ingested_at: Utc::now(),
        }
    }

    #[test]
    fn session_id_roundtrip() {
        let id = SessionId::new();
        let parsed: SessionId = id.to_string().parse().expect("parse SessionId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn exercise_kind_parses_cli_spellings() {
        assert_eq!(
            "binary-classification".parse::<ExerciseKind>().unwrap(),
            ExerciseKind::BinaryClassification
        );
        assert_eq!(
            "Outlier_Detection".parse::<ExerciseKind>().unwrap(),
            ExerciseKind::OutlierDetection
        );
        assert!("swipe".parse::<ExerciseKind>().is_err());
    }

    #[test]
    fn exercise_object_is_kind_tagged() {
        let exercise = ExerciseObject::OutlierDetection(OutlierDetection {
            options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            outlier: "d".into(),
            rationale: "d is not like the others".into(),
        });
        let json = serde_json::to_value(&exercise).unwrap();
        assert_eq!(json["kind"], "outlier_detection");
        assert_eq!(exercise.kind(), ExerciseKind::OutlierDetection);
    }

    #[test]
    fn begin_episode_resets_confusion_and_sets_concept() {
        let mut state = SessionState::new();
        state.confusion.understood = true;
        state.confusion.confusion_level = 0.8;

        state.begin_episode(artifact(), meta());

        assert_eq!(state.confusion, ConfusionState::default());
        assert_eq!(state.current_concept.as_deref(), Some("Photosynthesis"));
        assert!(state.artifact.is_some());
    }

    #[test]
    fn session_state_tolerates_missing_optional_fields() {
        let json = r#"{
            "schema_version": 1,
            "created_at": "2025-01-15T10:30:00Z",
            "updated_at": "2025-01-15T10:30:00Z"
        }"#;
        let state: SessionState = serde_json::from_str(json).expect("deserialize");
        assert!(state.artifact.is_none());
        assert_eq!(state.confusion.clarification_requests, 0);
        assert!(state.exercise_history.is_empty());
    }
}
