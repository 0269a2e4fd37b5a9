//! Core tutoring logic for StudyForge.
//!
//! This crate ties together segment splitting, section extraction, and the
//! text generator into the extraction pipeline, and layers the confusion
//! estimator, practice gate, and schema-validated exercise generation on top
//! of an injected session store.

pub mod exercises;
pub mod gate;
pub mod generation;
pub mod pipeline;
pub mod prompts;
pub mod service;
pub mod tutor;

#[cfg(test)]
pub(crate) mod testing;

pub use exercises::{ExerciseContract, exercise_prompt, nuance_limit};
pub use gate::SessionGate;
pub use generation::{Contract, Generated, StructuredGenerator, parse_object, strip_wrapping};
pub use pipeline::{
    ExtractionPipeline, IngestionReport, ProgressReporter, SilentProgress, build_artifact,
    validate_artifact,
};
pub use service::{AskOutcome, PracticeBatch, PracticeRequest, TutorService};
pub use tutor::{
    ConfusionEstimator, Explanation, ExplanationContract, Lexicon, Observation, SignalClass,
    SignalSet, Signals, StrategyProfile, StrategyTable, StrategyTier, learner_context,
};
