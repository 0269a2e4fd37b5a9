//! Confusion estimation and adaptive explanation strategy.
//!
//! Learner utterances are classified by case-insensitive phrase membership
//! against a [`Lexicon`] of named signal sets. The resulting signals drive a
//! bounded update of [`ConfusionState`], and a [`StrategyTable`] maps the new
//! state to an explanation profile. Both tables are plain data.

use std::path::Path;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use studyforge_shared::{ConfusionState, Result, StrategyStyle, StudyForgeError, TutorConfig};

use crate::generation::{Contract, str_field};

// ---------------------------------------------------------------------------
// Lexicon
// ---------------------------------------------------------------------------

/// What a matching phrase says about the learner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalClass {
    Confusion,
    /// Claims of understanding that suggest the opposite. Also counts as
    /// confusion, and blocks setting `understood` for the utterance.
    FalseConfidence,
    Understanding,
}

/// A named group of trigger phrases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalSet {
    pub name: String,
    pub class: SignalClass,
    pub phrases: Vec<String>,
}

/// The complete phrase table used for classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lexicon {
    pub sets: Vec<SignalSet>,
}

/// Which signals fired for one utterance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signals {
    pub confusion: bool,
    pub false_confidence: bool,
    pub understanding: bool,
    /// Names of the sets that matched, in table order.
    pub matched_sets: Vec<String>,
}

impl Lexicon {
    /// Parse a lexicon from TOML (`[[sets]]` tables with `name`, `class`,
    /// `phrases`). Phrases are lowercased on load.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut lexicon: Lexicon = toml::from_str(s)
            .map_err(|e| StudyForgeError::config(format!("invalid lexicon: {e}")))?;
        lexicon.normalize();
        if lexicon.sets.is_empty() {
            return Err(StudyForgeError::config("lexicon defines no signal sets"));
        }
        Ok(lexicon)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| StudyForgeError::io(path, e))?;
        let lexicon = Self::from_toml_str(&content)?;
        info!(path = %path.display(), sets = lexicon.sets.len(), "loaded signal lexicon");
        Ok(lexicon)
    }

    fn normalize(&mut self) {
        for set in &mut self.sets {
            for phrase in &mut set.phrases {
                *phrase = normalize_text(phrase);
            }
            set.phrases.retain(|p| !p.is_empty());
        }
    }

    /// Classify an utterance. Pure and deterministic.
    pub fn classify(&self, utterance: &str) -> Signals {
        let text = normalize_text(utterance);
        let mut signals = Signals::default();

        for set in &self.sets {
            if !set.phrases.iter().any(|p| text.contains(p.as_str())) {
                continue;
            }
            signals.matched_sets.push(set.name.clone());
            match set.class {
                SignalClass::Confusion => signals.confusion = true,
                SignalClass::FalseConfidence => {
                    signals.confusion = true;
                    signals.false_confidence = true;
                }
                SignalClass::Understanding => signals.understanding = true,
            }
        }
        signals
    }
}

impl Default for Lexicon {
    fn default() -> Self {
        let set = |name: &str, class, phrases: &[&str]| SignalSet {
            name: name.to_string(),
            class,
            phrases: phrases.iter().map(|p| p.to_string()).collect(),
        };

        Self {
            sets: vec![
                set("direct", SignalClass::Confusion, DIRECT),
                set("indirect", SignalClass::Confusion, INDIRECT),
                set("simplification", SignalClass::Confusion, SIMPLIFICATION),
                set("frustration", SignalClass::Confusion, FRUSTRATION),
                set("partial", SignalClass::Confusion, PARTIAL),
                set("metacognitive", SignalClass::Confusion, METACOGNITIVE),
                set("false_confidence", SignalClass::FalseConfidence, FALSE_CONFIDENCE),
                set("explicit", SignalClass::Understanding, EXPLICIT),
                set("implicit", SignalClass::Understanding, IMPLICIT),
                set("transfer", SignalClass::Understanding, TRANSFER),
                set("paraphrase", SignalClass::Understanding, PARAPHRASE),
                set("readiness", SignalClass::Understanding, READINESS),
                set("confidence", SignalClass::Understanding, CONFIDENCE),
            ],
        }
    }
}

/// Lowercase and fold typographic apostrophes.
fn normalize_text(s: &str) -> String {
    s.trim().to_lowercase().replace(['\u{2019}', '\u{2018}'], "'")
}

const DIRECT: &[&str] = &[
    "confused", "don't understand", "dont understand", "do not understand",
    "not understanding", "didn't understand", "didnt understand",
    "doesn't make sense", "doesnt make sense", "lost me", "losing me",
    "not following", "can't follow", "cant follow", "not getting",
    "dont get", "don't get", "not clear", "unclear", "doesn't click",
    "doesnt click", "no idea", "have no clue", "totally lost", "completely lost",
];

const INDIRECT: &[&str] = &[
    "kind of confused", "sort of confused", "bit confused", "little confused",
    "somewhat confused", "slightly confused", "not entirely sure",
    "not completely sure", "not totally sure", "partially confused",
    "kinda lost", "sorta lost", "a bit lost", "little lost",
];

const SIMPLIFICATION: &[&str] = &[
    "simpler", "simplify", "break it down", "step by step", "slow down",
    "too fast", "too complicated", "too complex", "easier way",
    "explain differently", "another way", "different explanation", "rephrase",
    "say that again", "repeat", "one more time", "eli5", "explain like",
    "layman", "plain english", "basic terms",
];

const FRUSTRATION: &[&str] = &[
    "frustrating", "frustrated", "giving up", "this is hard",
    "this is difficult", "struggling", "stuck", "can't figure", "cant figure",
    "not working", "help",
];

const PARTIAL: &[&str] = &[
    "some of it", "part of it", "most of it", "halfway there", "almost there",
    "getting closer", "starting to", "beginning to", "except for",
    "but what about", "but how", "but why", "one thing though",
    "one question", "still wondering",
];

const METACOGNITIVE: &[&str] = &[
    "something missing", "what am i missing", "missing something", "feel like",
    "sense that", "not quite right", "close but", "on the right track",
    "am i right", "is this correct", "did i get", "is that right",
];

const FALSE_CONFIDENCE: &[&str] = &[
    "seems easy", "sounds easy", "looks simple", "got it i think",
    "think i understand", "think i got it", "probably understand",
    "maybe i get", "guess i understand", "suppose i get",
];

const EXPLICIT: &[&str] = &[
    "i understand", "i understood", "understood", "i get it", "i got it",
    "got it", "makes sense", "clear now", "crystal clear", "perfectly clear",
    "totally clear", "completely clear", "ah i see", "oh i see", "i see now",
    "aha", "ah ha", "a-ha", "ohhh", "ahh", "now i understand", "now i get",
    "finally understand", "finally get it",
];

const IMPLICIT: &[&str] = &[
    "of course", "obviously", "that's clear", "thats clear",
    "makes perfect sense", "totally makes sense", "yeah that works",
    "yep that works", "right that's", "right thats", "exactly", "precisely",
    "indeed", "absolutely", "definitely",
];

const TRANSFER: &[&str] = &[
    "so that means", "so if i", "that's like", "thats like", "similar to",
    "this is like", "kind of like", "sort of like", "i could use this",
    "could apply", "would work for", "reminds me of", "connects to",
    "relates to", "this explains why", "now i know why", "that's why",
    "thats why",
];

const PARAPHRASE: &[&str] = &[
    "so basically", "in other words", "what you're saying",
    "what youre saying", "if i understand correctly", "let me see if",
    "so you mean", "you mean that", "in my own words", "to put it",
    "another way to say",
];

const READINESS: &[&str] = &[
    "ready to practice", "ready to try", "want to practice", "can i practice",
    "let me practice", "let's practice", "lets practice", "ready for",
    "bring it on", "i'm ready", "im ready", "let's do this", "lets do this",
    "ready to go", "try it out", "test myself", "see if i can",
];

const CONFIDENCE: &[&str] = &[
    "i'm confident", "im confident", "feel confident", "pretty sure",
    "very sure", "quite sure", "certain", "definitely understand",
    "totally get", "completely get", "fully understand", "solid on",
    "comfortable with", "know this now", "have it now",
];

// ---------------------------------------------------------------------------
// Strategy table
// ---------------------------------------------------------------------------

/// Guidance that parameterizes one explanation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyProfile {
    pub style: StrategyStyle,
    pub depth: String,
    pub vocabulary: String,
    pub analogies: String,
    pub pacing: String,
    pub probing: String,
}

/// A tier applies when confusion exceeds `confusion_above` or clarification
/// requests exceed `clarifications_above`. A tier with neither threshold
/// always applies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyTier {
    #[serde(default)]
    pub confusion_above: Option<f64>,
    #[serde(default)]
    pub clarifications_above: Option<u32>,
    pub profile: StrategyProfile,
}

impl StrategyTier {
    fn applies(&self, confusion_level: f64, clarification_requests: u32) -> bool {
        match (self.confusion_above, self.clarifications_above) {
            (None, None) => true,
            (level, count) => {
                level.is_some_and(|t| confusion_level > t)
                    || count.is_some_and(|t| clarification_requests > t)
            }
        }
    }
}

/// Ordered tiers; the first applicable one wins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyTable {
    tiers: Vec<StrategyTier>,
}

impl StrategyTable {
    pub fn new(tiers: Vec<StrategyTier>) -> Result<Self> {
        if tiers.is_empty() {
            return Err(StudyForgeError::config("strategy table has no tiers"));
        }
        Ok(Self { tiers })
    }

    pub fn tiers(&self) -> &[StrategyTier] {
        &self.tiers
    }

    /// Pure function of `(confusion_level, clarification_requests)`.
    pub fn select(&self, confusion_level: f64, clarification_requests: u32) -> &StrategyProfile {
        self.tiers
            .iter()
            .find(|t| t.applies(confusion_level, clarification_requests))
            .or(self.tiers.last())
            .map(|t| &t.profile)
            .unwrap_or(&STANDARD_FALLBACK)
    }
}

static STANDARD_FALLBACK: LazyLock<StrategyProfile> = LazyLock::new(standard_profile);

fn standard_profile() -> StrategyProfile {
    StrategyProfile {
        style: StrategyStyle::Standard,
        depth: "normal depth - don't oversimplify".into(),
        vocabulary: "use appropriate technical vocabulary with context".into(),
        analogies: "use analogies only when they add precision".into(),
        pacing: "normal - trust learner can follow".into(),
        probing: "ask thought-provoking questions to deepen understanding".into(),
    }
}

impl Default for StrategyTable {
    fn default() -> Self {
        Self {
            tiers: vec![
                StrategyTier {
                    confusion_above: Some(0.6),
                    clarifications_above: Some(2),
                    profile: StrategyProfile {
                        style: StrategyStyle::Foundational,
                        depth: "start from absolute basics, build one concept at a time".into(),
                        vocabulary: "use simple, everyday words - avoid jargon entirely".into(),
                        analogies: "use multiple concrete analogies from daily life".into(),
                        pacing: "very slow - explain each micro-step explicitly".into(),
                        probing: "ask simple yes/no check-ins, avoid intimidating questions"
                            .into(),
                    },
                },
                StrategyTier {
                    confusion_above: Some(0.3),
                    clarifications_above: None,
                    profile: StrategyProfile {
                        style: StrategyStyle::Simplified,
                        depth: "explain core ideas with clear structure".into(),
                        vocabulary: "use accessible language, define technical terms".into(),
                        analogies: "use one clear analogy to ground the concept".into(),
                        pacing: "moderate - balance detail with clarity".into(),
                        probing: "ask gentle check-for-understanding questions".into(),
                    },
                },
                StrategyTier {
                    confusion_above: None,
                    clarifications_above: None,
                    profile: standard_profile(),
                },
            ],
        }
    }
}

// ---------------------------------------------------------------------------
// Estimator
// ---------------------------------------------------------------------------

/// Result of observing one utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub state: ConfusionState,
    pub signals: Signals,
    pub strategy: StrategyProfile,
}

/// Bounded confusion state machine.
#[derive(Debug, Clone)]
pub struct ConfusionEstimator {
    lexicon: Lexicon,
    strategies: StrategyTable,
    step_up: f64,
    step_down: f64,
    decay: f64,
}

impl ConfusionEstimator {
    pub fn new(lexicon: Lexicon, strategies: StrategyTable, config: &TutorConfig) -> Self {
        Self {
            lexicon,
            strategies,
            step_up: config.confusion_step_up,
            step_down: config.understanding_step_down,
            decay: config.passive_decay,
        }
    }

    /// Built-in strategy table; lexicon from `lexicon_path` when configured.
    pub fn from_config(config: &TutorConfig) -> Result<Self> {
        let lexicon = match &config.lexicon_path {
            Some(path) => Lexicon::load(path)?,
            None => Lexicon::default(),
        };
        Ok(Self::new(lexicon, StrategyTable::default(), config))
    }

    pub fn lexicon(&self) -> &Lexicon {
        &self.lexicon
    }

    pub fn strategies(&self) -> &StrategyTable {
        &self.strategies
    }

    /// Compute the state after `utterance` without mutating `state`.
    pub fn observe(&self, state: &ConfusionState, utterance: &str) -> Observation {
        let signals = self.lexicon.classify(utterance);
        let mut next = state.clone();

        if signals.confusion {
            next.confusion_level += self.step_up;
            next.clarification_requests = next.clarification_requests.saturating_add(1);
        } else if signals.understanding {
            next.confusion_level -= self.step_down;
        } else {
            next.confusion_level -= self.decay;
        }
        next.confusion_level = next.confusion_level.clamp(0.0, 1.0);

        if signals.understanding && !signals.false_confidence {
            next.understood = true;
        }

        let strategy = self
            .strategies
            .select(next.confusion_level, next.clarification_requests)
            .clone();
        next.last_strategy = Some(strategy.style);

        debug!(
            confusion_level = next.confusion_level,
            clarification_requests = next.clarification_requests,
            understood = next.understood,
            strategy = %strategy.style,
            matched = ?signals.matched_sets,
            "utterance observed"
        );

        Observation {
            state: next,
            signals,
            strategy,
        }
    }
}

/// Human-readable learner state for the explanation prompt.
pub fn learner_context(state: &ConfusionState) -> String {
    let level = state.confusion_level;
    let band = if level > 0.7 {
        "significantly confused - needs foundational support"
    } else if level > 0.4 {
        "moderately confused - needs clearer explanation"
    } else if level > 0.15 {
        "slightly uncertain - needs minor clarification"
    } else {
        "tracking well - understanding is progressing"
    };
    let understood = if state.understood {
        "yes - ready for practice"
    } else {
        "not yet - still learning"
    };
    let previous = state
        .last_strategy
        .map(|s| s.as_str())
        .unwrap_or("none");

    format!(
        "- Confusion level: {level:.2} ({band})\n\
         - Clarification requests: {}\n\
         - Concept understood: {understood}\n\
         - Previous teaching style: {previous}",
        state.clarification_requests
    )
}

// ---------------------------------------------------------------------------
// Explanation contract
// ---------------------------------------------------------------------------

/// A generated explanation ending in one gentle comprehension question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub explanation: String,
    pub understanding_check: String,
}

pub struct ExplanationContract;

impl Contract for ExplanationContract {
    type Output = Explanation;

    fn name(&self) -> &str {
        "explanation"
    }

    fn validate(&self, value: &Value) -> Result<Explanation> {
        Ok(Explanation {
            explanation: str_field(value, "explanation")?,
            understanding_check: str_field(value, "understanding_check")?,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn estimator() -> ConfusionEstimator {
        ConfusionEstimator::new(
            Lexicon::default(),
            StrategyTable::default(),
            &TutorConfig::default(),
        )
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn single_confusion_utterance() {
        let obs = estimator().observe(&ConfusionState::default(), "I don't understand this at all");
        assert!(approx(obs.state.confusion_level, 0.2));
        assert_eq!(obs.state.clarification_requests, 1);
        assert!(!obs.state.understood);
        assert!(obs.signals.confusion);
    }

    #[test]
    fn repeated_confusion_reaches_foundational_and_stays_bounded() {
        let est = estimator();
        let mut state = ConfusionState::default();
        for _ in 0..3 {
            state = est.observe(&state, "I don't understand this at all").state;
        }
        assert!(approx(state.confusion_level, 0.6));
        assert_eq!(state.clarification_requests, 3);
        assert_eq!(state.last_strategy, Some(StrategyStyle::Foundational));

        for _ in 0..10 {
            state = est.observe(&state, "I don't understand this at all").state;
            assert!(state.confusion_level <= 1.0);
        }
        assert_eq!(state.confusion_level, 1.0);
    }

    #[test]
    fn understanding_is_sticky_across_neutral_utterances() {
        let est = estimator();
        let confused = est
            .observe(&ConfusionState::default(), "I'm confused")
            .state;

        let got_it = est.observe(&confused, "I get it, that makes sense");
        assert!(got_it.state.understood);
        assert!(approx(got_it.state.confusion_level, 0.05));

        let neutral = est.observe(&got_it.state, "okay");
        assert!(neutral.state.understood);
        assert!(approx(neutral.state.confusion_level, 0.0));

        let relapse = est.observe(&neutral.state, "wait, I'm lost, this is unclear");
        assert!(relapse.state.understood);
    }

    #[test]
    fn false_confidence_blocks_understood() {
        let obs = estimator().observe(&ConfusionState::default(), "I think I got it, seems easy");
        assert!(obs.signals.understanding);
        assert!(obs.signals.false_confidence);
        assert!(!obs.state.understood);
        // False confidence also counts as confusion.
        assert_eq!(obs.state.clarification_requests, 1);
    }

    #[test]
    fn level_never_goes_negative() {
        let obs = estimator().observe(&ConfusionState::default(), "nice weather");
        assert_eq!(obs.state.confusion_level, 0.0);
    }

    #[test]
    fn typographic_apostrophes_match() {
        let obs = estimator().observe(&ConfusionState::default(), "I don\u{2019}t get why");
        assert!(obs.signals.confusion);
    }

    #[test]
    fn strategy_tiers_follow_thresholds() {
        let table = StrategyTable::default();
        assert_eq!(table.select(0.0, 0).style, StrategyStyle::Standard);
        assert_eq!(table.select(0.3, 0).style, StrategyStyle::Standard);
        assert_eq!(table.select(0.31, 0).style, StrategyStyle::Simplified);
        assert_eq!(table.select(0.61, 0).style, StrategyStyle::Foundational);
        assert_eq!(table.select(0.0, 3).style, StrategyStyle::Foundational);
        assert_eq!(table.select(0.0, 2).style, StrategyStyle::Standard);
    }

    #[test]
    fn custom_lexicon_from_toml() {
        let lexicon = Lexicon::from_toml_str(
            r#"
[[sets]]
name = "spanish_confusion"
class = "confusion"
phrases = ["No Entiendo"]

[[sets]]
name = "spanish_understanding"
class = "understanding"
phrases = ["ya entiendo"]
"#,
        )
        .unwrap();
        let est = ConfusionEstimator::new(lexicon, StrategyTable::default(), &TutorConfig::default());

        let obs = est.observe(&ConfusionState::default(), "no entiendo nada");
        assert_eq!(obs.signals.matched_sets, vec!["spanish_confusion"]);

        let obs = est.observe(&obs.state, "¡Ya entiendo!");
        assert!(obs.state.understood);
    }

    #[test]
    fn empty_lexicon_is_rejected() {
        assert!(Lexicon::from_toml_str("sets = []").is_err());
    }

    #[test]
    fn lexicon_path_replaces_builtin_sets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lexicon.toml");
        std::fs::write(
            &path,
            "[[sets]]\nname = \"stuck\"\nclass = \"confusion\"\nphrases = [\"i am stuck\"]\n",
        )
        .unwrap();

        let config = TutorConfig {
            lexicon_path: Some(path),
            ..TutorConfig::default()
        };
        let est = ConfusionEstimator::from_config(&config).unwrap();
        assert_eq!(est.lexicon().sets.len(), 1);

        let obs = est.observe(&ConfusionState::default(), "Honestly I am stuck here");
        assert!(obs.signals.confusion);
        // Built-in phrases no longer apply.
        assert!(!est.lexicon().classify("I don't understand").confusion);

        let missing = TutorConfig {
            lexicon_path: Some(dir.path().join("absent.toml")),
            ..TutorConfig::default()
        };
        assert!(matches!(
            ConfusionEstimator::from_config(&missing),
            Err(StudyForgeError::Io { .. })
        ));
    }

    #[test]
    fn learner_context_bands() {
        let mut state = ConfusionState::default();
        assert!(learner_context(&state).contains("tracking well"));
        state.confusion_level = 0.2;
        assert!(learner_context(&state).contains("slightly uncertain"));
        state.confusion_level = 0.5;
        assert!(learner_context(&state).contains("moderately confused"));
        state.confusion_level = 0.8;
        state.last_strategy = Some(StrategyStyle::Foundational);
        let ctx = learner_context(&state);
        assert!(ctx.contains("significantly confused"));
        assert!(ctx.contains("foundational"));
    }

    #[test]
    fn explanation_contract_requires_both_fields() {
        let ok = ExplanationContract
            .validate(&json!({"explanation": "Plants make food.", "understanding_check": "Does that make sense?"}))
            .unwrap();
        assert_eq!(ok.understanding_check, "Does that make sense?");

        let err = ExplanationContract
            .validate(&json!({"explanation": "Plants make food."}))
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
