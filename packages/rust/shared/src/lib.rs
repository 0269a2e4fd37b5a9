//! Shared types, error model, and configuration for StudyForge.
//!
//! This crate is the foundation depended on by all other StudyForge crates.
//! It provides:
//! - [`StudyForgeError`], the unified error type
//! - Domain types ([`KnowledgeArtifact`], [`ConfusionState`], [`ExerciseObject`], [`SessionState`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ExerciseLimits, GenerationConfig, IngestionConfig, OpenRouterConfig,
    StorageBackend, StorageConfig, TutorConfig, config_dir, config_file_path, init_config,
    load_config, load_config_from, validate_api_key,
};
pub use error::{EXCERPT_CHARS, Result, StudyForgeError, excerpt};
pub use types::{
    BinaryClassification, CURRENT_SCHEMA_VERSION, ConfusionState, ExerciseKind, ExerciseObject,
    ExerciseRecord, ExerciseStats, IngestInput, IngestionMeta, KnowledgeArtifact, Modality,
    OutlierDetection, Pairing, SessionId, SessionState, Side, SplitStrategy, StrategyStyle,
};
