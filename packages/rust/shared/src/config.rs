//! Application configuration for StudyForge.
//!
//! User config lives at `~/.studyforge/studyforge.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, StudyForgeError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "studyforge.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".studyforge";

// ---------------------------------------------------------------------------
// Config structs (matching studyforge.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub ingestion: IngestionConfig,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub exercises: ExerciseLimits,

    #[serde(default)]
    pub tutor: TutorConfig,

    #[serde(default)]
    pub openrouter: OpenRouterConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

/// `[ingestion]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Upper bound on a segment sent to the generator in one call.
    #[serde(default = "default_max_segment_chars")]
    pub max_segment_chars: usize,

    /// Overlap between consecutive slices in the hard-limit fallback.
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,

    /// Maximum segment extractions in flight at once.
    #[serde(default = "default_segment_concurrency")]
    pub segment_concurrency: usize,

    /// Minimum narrative length for an artifact to be accepted.
    #[serde(default = "default_min_narrative_chars")]
    pub min_narrative_chars: usize,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            max_segment_chars: default_max_segment_chars(),
            overlap_chars: default_overlap_chars(),
            segment_concurrency: default_segment_concurrency(),
            min_narrative_chars: default_min_narrative_chars(),
        }
    }
}

fn default_max_segment_chars() -> usize {
    750_000
}
fn default_overlap_chars() -> usize {
    1_000
}
fn default_segment_concurrency() -> usize {
    4
}
fn default_min_narrative_chars() -> usize {
    100
}

/// `[generation]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Attempts per structured object before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

/// `[exercises]` section: cardinality contracts per exercise kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExerciseLimits {
    /// Inclusive `[lo, hi]` item count for binary classification.
    #[serde(default = "default_binary_items")]
    pub binary_items: (usize, usize),

    /// Exact option count for outlier detection.
    #[serde(default = "default_outlier_options")]
    pub outlier_options: usize,

    /// Inclusive `[lo, hi]` pair count for pairing.
    #[serde(default = "default_pairing_pairs")]
    pub pairing_pairs: (usize, usize),

    /// Maximum exercises per batch request.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,
}

impl Default for ExerciseLimits {
    fn default() -> Self {
        Self {
            binary_items: default_binary_items(),
            outlier_options: default_outlier_options(),
            pairing_pairs: default_pairing_pairs(),
            batch_limit: default_batch_limit(),
        }
    }
}

fn default_binary_items() -> (usize, usize) {
    (8, 12)
}
fn default_outlier_options() -> usize {
    4
}
fn default_pairing_pairs() -> (usize, usize) {
    (5, 8)
}
fn default_batch_limit() -> usize {
    5
}

/// `[tutor]` section: confusion update deltas and signal table location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TutorConfig {
    #[serde(default = "default_step_up")]
    pub confusion_step_up: f64,

    #[serde(default = "default_step_down")]
    pub understanding_step_down: f64,

    #[serde(default = "default_decay")]
    pub passive_decay: f64,

    /// Optional TOML file replacing the built-in signal phrase sets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lexicon_path: Option<PathBuf>,
}

impl Default for TutorConfig {
    fn default() -> Self {
        Self {
            confusion_step_up: default_step_up(),
            understanding_step_down: default_step_down(),
            passive_decay: default_decay(),
            lexicon_path: None,
        }
    }
}

fn default_step_up() -> f64 {
    0.2
}
fn default_step_down() -> f64 {
    0.15
}
fn default_decay() -> f64 {
    0.05
}

/// `[openrouter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model used for every generation call.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// API base URL (overridable for self-hosted gateways and tests).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            default_model: default_model(),
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "google/gemini-2.5-flash".into()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_timeout_secs() -> u64 {
    120
}

/// Which session store backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Libsql,
    Memory,
}

/// `[storage]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,

    /// Database file; relative paths resolve against the config directory.
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            database_path: default_database_path(),
        }
    }
}

fn default_backend() -> StorageBackend {
    StorageBackend::Libsql
}
fn default_database_path() -> String {
    "sessions.db".into()
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Reject internally inconsistent settings before any work starts.
    pub fn validate(&self) -> Result<()> {
        let ing = &self.ingestion;
        if ing.max_segment_chars == 0 {
            return Err(StudyForgeError::config("ingestion.max_segment_chars must be > 0"));
        }
        if ing.overlap_chars >= ing.max_segment_chars {
            return Err(StudyForgeError::config(format!(
                "ingestion.overlap_chars ({}) must be smaller than max_segment_chars ({})",
                ing.overlap_chars, ing.max_segment_chars
            )));
        }
        if ing.segment_concurrency == 0 {
            return Err(StudyForgeError::config("ingestion.segment_concurrency must be > 0"));
        }

        if self.generation.max_attempts == 0 {
            return Err(StudyForgeError::config("generation.max_attempts must be >= 1"));
        }

        let ex = &self.exercises;
        for (name, (lo, hi)) in [
            ("exercises.binary_items", ex.binary_items),
            ("exercises.pairing_pairs", ex.pairing_pairs),
        ] {
            if lo == 0 || lo > hi {
                return Err(StudyForgeError::config(format!(
                    "{name} must be a non-empty inclusive range, got [{lo}, {hi}]"
                )));
            }
        }
        if ex.outlier_options < 2 {
            return Err(StudyForgeError::config("exercises.outlier_options must be >= 2"));
        }
        if ex.batch_limit == 0 {
            return Err(StudyForgeError::config("exercises.batch_limit must be > 0"));
        }

        let t = &self.tutor;
        for (name, delta) in [
            ("tutor.confusion_step_up", t.confusion_step_up),
            ("tutor.understanding_step_down", t.understanding_step_down),
            ("tutor.passive_decay", t.passive_decay),
        ] {
            if !(0.0..=1.0).contains(&delta) {
                return Err(StudyForgeError::config(format!(
                    "{name} must be within [0, 1], got {delta}"
                )));
            }
        }

        Url::parse(&self.openrouter.base_url).map_err(|e| {
            StudyForgeError::config(format!(
                "openrouter.base_url '{}' is not a valid URL: {e}",
                self.openrouter.base_url
            ))
        })?;

        Ok(())
    }

    /// Resolve the session database path against the config directory.
    pub fn database_path(&self) -> Result<PathBuf> {
        let path = PathBuf::from(&self.storage.database_path);
        if path.is_absolute() {
            Ok(path)
        } else {
            Ok(config_dir()?.join(path))
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.studyforge/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| StudyForgeError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.studyforge/studyforge.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load and validate the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| StudyForgeError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        StudyForgeError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    config.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| StudyForgeError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| StudyForgeError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| StudyForgeError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the OpenRouter API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.openrouter.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(StudyForgeError::config(format!(
            "OpenRouter API key not found. Set the {var_name} environment variable.\n\
             Get a key at https://openrouter.ai/keys"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("max_segment_chars"));
        assert!(toml_str.contains("OPENROUTER_API_KEY"));
    }

    #[test]
    fn default_config_is_valid() {
        AppConfig::default().validate().expect("defaults validate");
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.ingestion.max_segment_chars, 750_000);
        assert_eq!(parsed.generation.max_attempts, 3);
        assert_eq!(parsed.exercises.binary_items, (8, 12));
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[ingestion]
max_segment_chars = 5000

[exercises]
pairing_pairs = [3, 6]

[storage]
backend = "memory"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.ingestion.max_segment_chars, 5000);
        assert_eq!(config.ingestion.overlap_chars, 1_000);
        assert_eq!(config.exercises.pairing_pairs, (3, 6));
        assert_eq!(config.exercises.outlier_options, 4);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert!((config.tutor.confusion_step_up - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn validation_rejects_inverted_range() {
        let mut config = AppConfig::default();
        config.exercises.binary_items = (12, 8);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("binary_items"));
    }

    #[test]
    fn validation_rejects_zero_attempts_and_bad_overlap() {
        let mut config = AppConfig::default();
        config.generation.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.ingestion.max_segment_chars = 500;
        config.ingestion.overlap_chars = 500;
        assert!(config.validate().unwrap_err().to_string().contains("overlap_chars"));
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.openrouter.api_key_env = "SF_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}
