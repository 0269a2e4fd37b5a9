//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::Engine as _;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use studyforge_core::{IngestionReport, PracticeRequest, ProgressReporter, SessionGate, TutorService};
use studyforge_markdown::{SplitOptions, split_with};
use studyforge_provider::OpenRouterClient;
use studyforge_shared::{
    AppConfig, ExerciseKind, IngestInput, SessionId, StorageBackend, init_config, load_config,
    validate_api_key,
};
use studyforge_storage::{InMemorySessionStore, SessionStore, Storage};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// StudyForge: learn from your own notes.
#[derive(Parser)]
#[command(
    name = "studyforge",
    version,
    about = "Turn study material into adaptive explanations and validated practice.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Create, inspect, or delete tutoring sessions.
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Ingest a text or image file into a session.
    Ingest {
        /// Target session id.
        #[arg(long)]
        session: SessionId,

        /// File to ingest (.txt, .md, or an image).
        file: PathBuf,
    },

    /// Ask a question about the session's material.
    Ask {
        /// Target session id.
        #[arg(long)]
        session: SessionId,

        /// The question, as typed by the learner.
        #[arg(required = true, num_args = 1.., trailing_var_arg = true)]
        question: Vec<String>,
    },

    /// Generate practice exercises (requires confirmed understanding).
    Practice {
        /// Target session id.
        #[arg(long)]
        session: SessionId,

        /// Exercise kind; repeat for a batch.
        #[arg(long = "kind", required = true)]
        kinds: Vec<ExerciseKind>,

        /// Concept to practice (defaults to the session's current concept).
        #[arg(long)]
        concept: Option<String>,

        /// Aspect of the concept to emphasise; may be repeated.
        #[arg(long = "nuance")]
        nuances: Vec<String>,
    },

    /// Show how a document would be segmented, without calling the generator.
    Segments {
        file: PathBuf,

        /// Override `ingestion.max_segment_chars`.
        #[arg(long)]
        max_chars: Option<usize>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Session subcommands.
#[derive(Subcommand)]
pub(crate) enum SessionAction {
    /// Create a new empty session.
    New,
    /// Print a session's stored state as JSON.
    Show { id: SessionId },
    /// Delete a session.
    Delete { id: SessionId },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "studyforge=info",
        1 => "studyforge=debug",
        _ => "studyforge=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Session { action } => match action {
            SessionAction::New => cmd_session_new().await,
            SessionAction::Show { id } => cmd_session_show(&id).await,
            SessionAction::Delete { id } => cmd_session_delete(&id).await,
        },
        Command::Ingest { session, file } => cmd_ingest(&session, &file).await,
        Command::Ask { session, question } => cmd_ask(&session, &question.join(" ")).await,
        Command::Practice {
            session,
            kinds,
            concept,
            nuances,
        } => {
            let request = PracticeRequest {
                kinds,
                concept,
                nuances,
            };
            cmd_practice(&session, &request).await
        }
        Command::Segments { file, max_chars } => cmd_segments(&file, max_chars),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(),
        },
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

async fn open_store(config: &AppConfig) -> Result<Arc<dyn SessionStore>> {
    let store: Arc<dyn SessionStore> = match config.storage.backend {
        StorageBackend::Libsql => {
            let path = config.database_path()?;
            info!(path = %path.display(), "opening session database");
            Arc::new(Storage::open(&path).await?)
        }
        StorageBackend::Memory => {
            warn!("memory backend selected; sessions end with this process");
            Arc::new(InMemorySessionStore::new())
        }
    };
    Ok(store)
}

async fn build_service(config: &AppConfig) -> Result<TutorService> {
    let api_key = validate_api_key(config)?;
    let client = OpenRouterClient::new(&config.openrouter, api_key)?;
    info!(model = client.model(), "using OpenRouter");
    let store = open_store(config).await?;
    Ok(TutorService::from_config(config, Arc::new(client), store)?)
}

// ---------------------------------------------------------------------------
// File decoding
// ---------------------------------------------------------------------------

const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "markdown"];

fn image_mime(extension: &str) -> Option<&'static str> {
    match extension {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}

/// Decode a file into ingestion input by extension.
fn decode_file(path: &Path) -> Result<IngestInput> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    if TEXT_EXTENSIONS.contains(&extension.as_str()) {
        let text = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read {}", path.display()))?;
        return Ok(IngestInput::text(text));
    }

    if let Some(mime) = image_mime(&extension) {
        let bytes =
            std::fs::read(path).wrap_err_with(|| format!("failed to read {}", path.display()))?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        return Ok(IngestInput::image(encoded, mime));
    }

    Err(eyre!(
        "unsupported file type '{}': expected .txt, .md, or an image (png, jpg, gif, webp, bmp)",
        path.display()
    ))
}

// ---------------------------------------------------------------------------
// Session commands
// ---------------------------------------------------------------------------

async fn cmd_session_new() -> Result<()> {
    let config = load_config()?;
    let store = open_store(&config).await?;
    let id = store.create().await?;
    info!(session_id = %id, "session created");
    println!("{id}");
    Ok(())
}

async fn cmd_session_show(id: &SessionId) -> Result<()> {
    let config = load_config()?;
    let store = open_store(&config).await?;
    let state = store
        .get(id)
        .await?
        .ok_or_else(|| eyre!("session not found: {id}"))?;

    println!("{}", serde_json::to_string_pretty(&state)?);
    eprintln!("gate: {}", SessionGate::from_state(&state.confusion));
    Ok(())
}

async fn cmd_session_delete(id: &SessionId) -> Result<()> {
    let config = load_config()?;
    let store = open_store(&config).await?;
    if !store.delete(id).await? {
        return Err(eyre!("session not found: {id}"));
    }
    println!("Deleted session {id}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tutoring commands
// ---------------------------------------------------------------------------

async fn cmd_ingest(session: &SessionId, file: &Path) -> Result<()> {
    let config = load_config()?;
    let input = decode_file(file)?;
    let service = build_service(&config).await?;

    info!(file = %file.display(), modality = ?input.modality, "ingesting study material");

    let reporter = CliProgress::new();
    let report = service.ingest(session, &input, &reporter).await?;
    let artifact = &report.artifact;

    println!();
    println!("  Study material ingested!");
    println!("  Segments:    {} ({})", report.meta.segment_count, report.meta.strategy);
    println!("  Concepts:    {}", artifact.core_concepts.len());
    println!("  Definitions: {}", artifact.definitions.len());
    println!("  Examples:    {}", artifact.examples.len());
    println!("  Diagrams:    {}", artifact.diagram_descriptions.len());
    if let Some(first) = artifact.core_concepts.first() {
        println!("  Focus:       {first}");
    }
    for warning in &report.warnings {
        println!("  Warning:     {warning}");
    }
    println!("  Time:        {:.1}s", report.elapsed.as_secs_f64());
    println!();

    Ok(())
}

async fn cmd_ask(session: &SessionId, question: &str) -> Result<()> {
    let config = load_config()?;
    let service = build_service(&config).await?;

    let spinner = spinner("Thinking...");
    let outcome = service.ask(session, question).await;
    spinner.finish_and_clear();
    let outcome = outcome?;

    println!();
    println!("{}", outcome.explanation.explanation.trim());
    println!();
    println!("  > {}", outcome.explanation.understanding_check.trim());
    println!();
    println!(
        "  [strategy: {} | confusion: {:.2} | practice: {}]",
        outcome.strategy.style, outcome.state.confusion.confusion_level, outcome.gate
    );
    Ok(())
}

async fn cmd_practice(session: &SessionId, request: &PracticeRequest) -> Result<()> {
    let config = load_config()?;
    let service = build_service(&config).await?;

    let spinner = spinner("Generating exercises...");
    let batch = service.generate_exercises(session, request).await;
    spinner.finish_and_clear();
    let batch = batch?;

    eprintln!(
        "Generated {} exercise(s) for \"{}\" (attempts: {:?})",
        batch.exercises.len(),
        batch.concept,
        batch.attempts
    );
    println!("{}", serde_json::to_string_pretty(&batch.exercises)?);
    Ok(())
}

fn cmd_segments(file: &Path, max_chars: Option<usize>) -> Result<()> {
    let config = load_config()?;
    let text = std::fs::read_to_string(file)
        .wrap_err_with(|| format!("failed to read {}", file.display()))?;

    let max_segment_chars = max_chars.unwrap_or(config.ingestion.max_segment_chars);
    if max_segment_chars == 0 {
        return Err(eyre!("--max-chars must be greater than zero"));
    }
    let outcome = split_with(
        &text,
        &SplitOptions {
            max_segment_chars,
            overlap_chars: config.ingestion.overlap_chars,
        },
    );

    println!(
        "{} segment(s), strategy: {}, limit: {max_segment_chars} chars",
        outcome.segments.len(),
        outcome.strategy
    );
    for segment in &outcome.segments {
        let preview: String = segment
            .text
            .chars()
            .take(60)
            .map(|c| if c.is_whitespace() { ' ' } else { c })
            .collect();
        println!(
            "  [{}/{}] bytes {}..{} ({} chars, overlap {}) {}",
            segment.index + 1,
            segment.total,
            segment.start,
            segment.end,
            segment.char_len(),
            segment.overlap_with_previous,
            preview.trim()
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

fn spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid progress template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));
    spinner.set_message(message.to_string());
    spinner
}

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        Self {
            spinner: spinner("Starting..."),
        }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn segment_done(&self, index: usize, completed: usize, total: usize) {
        self.spinner.set_message(format!(
            "Structuring segments [{completed}/{total}] (finished #{})",
            index + 1
        ));
    }

    fn done(&self, _report: &IngestionReport) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// Config commands
// ---------------------------------------------------------------------------

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
