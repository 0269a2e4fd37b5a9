//! Session-level entry points: ingest, ask, and practice.
//!
//! Every operation loads the session from the injected [`SessionStore`],
//! works on a copy, and saves only after a successful terminal result.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};

use studyforge_provider::TextGenerator;
use studyforge_shared::{
    AppConfig, ExerciseKind, ExerciseLimits, ExerciseObject, ExerciseRecord, IngestInput,
    Result, SessionId, SessionState, StudyForgeError,
};
use studyforge_storage::SessionStore;

use crate::exercises::{ExerciseContract, exercise_prompt};
use crate::gate::SessionGate;
use crate::generation::StructuredGenerator;
use crate::pipeline::{ExtractionPipeline, IngestionReport, ProgressReporter};
use crate::prompts::explanation_prompt;
use crate::tutor::{
    ConfusionEstimator, Explanation, ExplanationContract, Signals, StrategyProfile,
    learner_context,
};

/// Result of one question/answer turn.
#[derive(Debug, Clone)]
pub struct AskOutcome {
    pub explanation: Explanation,
    pub strategy: StrategyProfile,
    pub signals: Signals,
    pub state: SessionState,
    pub gate: SessionGate,
    pub attempts: u32,
}

/// A practice request: one exercise per listed kind.
#[derive(Debug, Clone, Default)]
pub struct PracticeRequest {
    pub kinds: Vec<ExerciseKind>,
    /// Overrides the session's current concept.
    pub concept: Option<String>,
    pub nuances: Vec<String>,
}

/// A validated exercise batch.
#[derive(Debug, Clone)]
pub struct PracticeBatch {
    pub concept: String,
    pub exercises: Vec<ExerciseObject>,
    /// Generation attempts per exercise, in request order.
    pub attempts: Vec<u32>,
}

/// Orchestrates the pipeline, estimator and generator over stored sessions.
pub struct TutorService {
    store: Arc<dyn SessionStore>,
    pipeline: ExtractionPipeline,
    estimator: ConfusionEstimator,
    structured: StructuredGenerator,
    limits: ExerciseLimits,
}

impl TutorService {
    pub fn new(
        config: &AppConfig,
        generator: Arc<dyn TextGenerator>,
        store: Arc<dyn SessionStore>,
        estimator: ConfusionEstimator,
    ) -> Self {
        Self {
            store,
            pipeline: ExtractionPipeline::new(Arc::clone(&generator), config.ingestion.clone()),
            estimator,
            structured: StructuredGenerator::new(generator, config.generation.max_attempts),
            limits: config.exercises.clone(),
        }
    }

    /// Build with the estimator described by `config.tutor`.
    pub fn from_config(
        config: &AppConfig,
        generator: Arc<dyn TextGenerator>,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self> {
        let estimator = ConfusionEstimator::from_config(&config.tutor)?;
        Ok(Self::new(config, generator, store, estimator))
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Session lifecycle
    // -----------------------------------------------------------------------

    pub async fn new_session(&self) -> Result<SessionId> {
        let id = self.store.create().await?;
        info!(session_id = %id, "session created");
        Ok(id)
    }

    pub async fn session(&self, id: &SessionId) -> Result<SessionState> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| StudyForgeError::SessionNotFound(id.to_string()))
    }

    pub async fn delete_session(&self, id: &SessionId) -> Result<()> {
        if !self.store.delete(id).await? {
            return Err(StudyForgeError::SessionNotFound(id.to_string()));
        }
        info!(session_id = %id, "session deleted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Ingestion
    // -----------------------------------------------------------------------

    /// Extract an artifact and make it the session's teaching source,
    /// starting a new teaching episode.
    #[instrument(skip_all, fields(session_id = %id))]
    pub async fn ingest(
        &self,
        id: &SessionId,
        input: &IngestInput,
        progress: &dyn ProgressReporter,
    ) -> Result<IngestionReport> {
        let mut state = self.session(id).await?;
        let report = self.pipeline.ingest(input, progress).await?;

        state.begin_episode(report.artifact.clone(), report.meta.clone());
        self.store.save(id, &state).await?;
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Explanations
    // -----------------------------------------------------------------------

    /// Update the learner state from `question` and answer it from the
    /// session's artifact.
    #[instrument(skip_all, fields(session_id = %id))]
    pub async fn ask(&self, id: &SessionId, question: &str) -> Result<AskOutcome> {
        let question = question.trim();
        if question.is_empty() {
            return Err(StudyForgeError::input("question is empty"));
        }

        let mut state = self.session(id).await?;
        let notes = state
            .artifact
            .as_ref()
            .map(|a| a.narrative.clone())
            .ok_or_else(|| StudyForgeError::precondition("no study material has been ingested"))?;

        let observation = self.estimator.observe(&state.confusion, question);
        let context = learner_context(&observation.state);
        let prompt = explanation_prompt(question, &notes, &context, &observation.strategy);

        let generated = self.structured.generate(&prompt, &ExplanationContract).await?;

        state.confusion = observation.state;
        state.touch();
        self.store.save(id, &state).await?;

        let gate = SessionGate::from_state(&state.confusion);
        info!(
            confusion_level = state.confusion.confusion_level,
            strategy = %observation.strategy.style,
            gate = %gate,
            attempts = generated.attempts,
            "question answered"
        );

        Ok(AskOutcome {
            explanation: generated.value,
            strategy: observation.strategy,
            signals: observation.signals,
            state,
            gate,
            attempts: generated.attempts,
        })
    }

    // -----------------------------------------------------------------------
    // Practice
    // -----------------------------------------------------------------------

    /// Generate one validated exercise per requested kind. The history is
    /// only extended when every exercise in the batch succeeds.
    ///
    /// A batch abandoned on a generation failure still writes one thing:
    /// `stats.failed_batches` is incremented on the state as stored before
    /// the call. History, exercise index and concept are left untouched.
    #[instrument(skip_all, fields(session_id = %id, kinds = request.kinds.len()))]
    pub async fn generate_exercises(
        &self,
        id: &SessionId,
        request: &PracticeRequest,
    ) -> Result<PracticeBatch> {
        let count = request.kinds.len();
        if count == 0 || count > self.limits.batch_limit {
            return Err(StudyForgeError::input(format!(
                "request between 1 and {} exercises, got {count}",
                self.limits.batch_limit
            )));
        }

        let mut state = self.session(id).await?;
        SessionGate::from_state(&state.confusion).ensure_unlocked()?;
        let concept = resolve_concept(&state, request.concept.as_deref())?;

        let mut exercises = Vec::with_capacity(count);
        let mut attempts = Vec::with_capacity(count);

        for &kind in &request.kinds {
            let prompt = exercise_prompt(kind, &concept, &request.nuances, &self.limits);
            let contract = ExerciseContract::new(kind, &self.limits);

            match self.structured.generate(&prompt, &contract).await {
                Ok(generated) => {
                    exercises.push(generated.value);
                    attempts.push(generated.attempts);
                }
                Err(e @ StudyForgeError::GenerationFailure { .. }) => {
                    warn!(kind = %kind, error = %e, "exercise batch abandoned");
                    // Record the failure against the stored state as it was.
                    let mut stored = self.session(id).await?;
                    stored.stats.failed_batches += 1;
                    stored.touch();
                    self.store.save(id, &stored).await?;
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        }

        let now = Utc::now();
        for (exercise, &tries) in exercises.iter().zip(&attempts) {
            state.exercise_history.push(ExerciseRecord {
                concept: concept.clone(),
                exercise: exercise.clone(),
                attempts: tries,
                generated_at: now,
            });
            state.stats.generated += 1;
            *state.stats.per_kind.entry(exercise.kind()).or_default() += 1;
            state.stats.generation_attempts += u64::from(tries);
        }
        state.exercise_index = state.exercise_history.len().checked_sub(1);
        state.current_concept = Some(concept.clone());
        state.touch();
        self.store.save(id, &state).await?;

        let distinct: BTreeSet<ExerciseKind> = request.kinds.iter().copied().collect();
        info!(
            concept = %concept,
            exercises = exercises.len(),
            distinct_kinds = distinct.len(),
            attempts = ?attempts,
            "exercise batch generated"
        );

        Ok(PracticeBatch {
            concept,
            exercises,
            attempts,
        })
    }
}

/// Request override, then the session's current concept, then the first
/// extracted core concept.
fn resolve_concept(state: &SessionState, requested: Option<&str>) -> Result<String> {
    requested
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .or_else(|| state.current_concept.clone())
        .or_else(|| {
            state
                .artifact
                .as_ref()
                .and_then(|a| a.core_concepts.first().cloned())
        })
        .ok_or_else(|| StudyForgeError::precondition("no concept available for practice"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::SilentProgress;
    use crate::testing::{ScriptedGenerator, structured_output};
    use studyforge_storage::InMemorySessionStore;

    const EXPLANATION: &str = r#"{"explanation": "ATP stores energy in its phosphate bonds.", "understanding_check": "Where is the energy kept?"}"#;
    const OUTLIER: &str = r#"{"options": ["Mitosis", "Meiosis", "Binary fission", "Photosynthesis"], "outlier": "Photosynthesis", "rationale": "It is not cell division."}"#;

    fn tutor_stub() -> Arc<ScriptedGenerator> {
        ScriptedGenerator::with_fn(|prompt| {
            if prompt.contains("\"understanding_check\"") {
                EXPLANATION.to_string()
            } else if prompt.contains("\"outlier\"") {
                OUTLIER.to_string()
            } else {
                structured_output(&["Cell division", "Energy"])
            }
        })
    }

    async fn service_with(stub: Arc<ScriptedGenerator>) -> (TutorService, SessionId) {
        let service = TutorService::from_config(
            &AppConfig::default(),
            stub,
            Arc::new(InMemorySessionStore::new()),
        )
        .unwrap();
        let id = service.new_session().await.unwrap();
        (service, id)
    }

    fn outlier_request() -> PracticeRequest {
        PracticeRequest {
            kinds: vec![ExerciseKind::OutlierDetection],
            ..PracticeRequest::default()
        }
    }

    #[tokio::test]
    async fn ingest_sets_artifact_and_concept() {
        let (service, id) = service_with(tutor_stub()).await;
        service
            .ingest(&id, &IngestInput::text("Cells divide."), &SilentProgress)
            .await
            .unwrap();

        let state = service.session(&id).await.unwrap();
        assert_eq!(state.current_concept.as_deref(), Some("Cell division"));
        assert!(state.ingestion.is_some());
        assert!(!state.confusion.understood);
    }

    #[tokio::test]
    async fn ask_requires_material() {
        let (service, id) = service_with(tutor_stub()).await;
        let err = service.ask(&id, "What is ATP?").await.unwrap_err();
        assert!(matches!(err, StudyForgeError::Precondition { .. }));
    }

    #[tokio::test]
    async fn practice_is_gated_on_understanding() {
        let (service, id) = service_with(tutor_stub()).await;
        service
            .ingest(&id, &IngestInput::text("Cells divide."), &SilentProgress)
            .await
            .unwrap();

        let err = service
            .generate_exercises(&id, &outlier_request())
            .await
            .unwrap_err();
        assert!(matches!(err, StudyForgeError::Precondition { .. }));

        let confused = service.ask(&id, "I don't understand this at all").await.unwrap();
        assert_eq!(confused.gate, SessionGate::Locked);
        assert!((confused.state.confusion.confusion_level - 0.2).abs() < 1e-9);

        let got_it = service.ask(&id, "I get it, that makes sense").await.unwrap();
        assert_eq!(got_it.gate, SessionGate::Unlocked);

        let batch = service
            .generate_exercises(&id, &outlier_request())
            .await
            .unwrap();
        assert_eq!(batch.concept, "Cell division");
        assert_eq!(batch.attempts, vec![1]);

        let state = service.session(&id).await.unwrap();
        assert_eq!(state.exercise_history.len(), 1);
        assert_eq!(state.exercise_index, Some(0));
        assert_eq!(state.stats.generated, 1);
        assert_eq!(state.stats.per_kind.get(&ExerciseKind::OutlierDetection), Some(&1));
    }

    #[tokio::test]
    async fn new_material_relocks_practice() {
        let (service, id) = service_with(tutor_stub()).await;
        let input = IngestInput::text("Cells divide.");
        service.ingest(&id, &input, &SilentProgress).await.unwrap();
        let got_it = service.ask(&id, "I get it, that makes sense").await.unwrap();
        assert_eq!(got_it.gate, SessionGate::Unlocked);

        service.ingest(&id, &input, &SilentProgress).await.unwrap();
        let state = service.session(&id).await.unwrap();
        assert!(!state.confusion.understood);

        let err = service
            .generate_exercises(&id, &outlier_request())
            .await
            .unwrap_err();
        assert!(matches!(err, StudyForgeError::Precondition { .. }));
        assert!(service.session(&id).await.unwrap().exercise_history.is_empty());
    }

    #[tokio::test]
    async fn neutral_utterance_keeps_gate_open() {
        let (service, id) = service_with(tutor_stub()).await;
        service
            .ingest(&id, &IngestInput::text("Cells divide."), &SilentProgress)
            .await
            .unwrap();
        service.ask(&id, "I get it, that makes sense").await.unwrap();
        let outcome = service.ask(&id, "okay").await.unwrap();
        assert!(outcome.gate.is_unlocked());
    }

    #[tokio::test]
    async fn failed_batch_leaves_history_untouched() {
        let stub = ScriptedGenerator::with_fn(|prompt| {
            if prompt.contains("\"understanding_check\"") {
                EXPLANATION.to_string()
            } else if prompt.contains("\"outlier\"") {
                r#"{"options": ["a", "b"], "outlier": "a", "rationale": "r"}"#.to_string()
            } else {
                structured_output(&["Cell division"])
            }
        });
        let (service, id) = service_with(stub.clone()).await;
        service
            .ingest(&id, &IngestInput::text("Cells divide."), &SilentProgress)
            .await
            .unwrap();
        service.ask(&id, "I get it, that makes sense").await.unwrap();

        let err = service
            .generate_exercises(&id, &outlier_request())
            .await
            .unwrap_err();
        assert!(matches!(err, StudyForgeError::GenerationFailure { attempts: 3, .. }));

        let state = service.session(&id).await.unwrap();
        assert!(state.exercise_history.is_empty());
        assert_eq!(state.stats.failed_batches, 1);
        assert!(state.confusion.understood);
    }

    #[tokio::test]
    async fn batch_size_is_bounded() {
        let (service, id) = service_with(tutor_stub()).await;
        let err = service
            .generate_exercises(&id, &PracticeRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, StudyForgeError::InputValidation { .. }));

        let too_many = PracticeRequest {
            kinds: vec![ExerciseKind::Pairing; 6],
            ..PracticeRequest::default()
        };
        assert!(service.generate_exercises(&id, &too_many).await.is_err());
    }

    #[tokio::test]
    async fn unknown_session_is_reported() {
        let (service, _) = service_with(tutor_stub()).await;
        let missing = SessionId::new();
        assert!(matches!(
            service.session(&missing).await,
            Err(StudyForgeError::SessionNotFound(_))
        ));
        assert!(matches!(
            service.delete_session(&missing).await,
            Err(StudyForgeError::SessionNotFound(_))
        ));
    }

    #[test]
    fn requested_concept_wins() {
        let mut state = SessionState::new();
        state.current_concept = Some("Energy".into());
        assert_eq!(resolve_concept(&state, Some(" Osmosis ")).unwrap(), "Osmosis");
        assert_eq!(resolve_concept(&state, None).unwrap(), "Energy");
        assert!(resolve_concept(&SessionState::new(), None).is_err());
    }
}
