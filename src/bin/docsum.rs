//! CLI binary for edgequake-docsum.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, runs one trigger payload, and prints the result.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use edgequake_docsum::services::provider::ProviderTextGenerator;
use edgequake_docsum::{
    InsertError, PipelineConfig, PipelineOrchestrator, PipelineProgressCallback, PipelineState,
    ProgressCallback, RunOutcome, Services, TableRef, TextWindowSelector, Trigger, WindowConfig,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: a spinner naming the stage in flight, plus one log
/// line per completed transition.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Starting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

/// What the run is doing while it sits in `state`.
fn activity(state: PipelineState) -> &'static str {
    match state {
        PipelineState::Received => "Extracting text (OCR)…",
        PipelineState::Extracted => "Selecting abstract and conclusion…",
        PipelineState::Windowed => "Summarizing…",
        PipelineState::Summarized => "Writing summary record…",
        _ => "",
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_run_start(&self, event_id: &str, source: &str) {
        self.bar.println(format!(
            "{} {}  {}",
            bold("◆"),
            bold(source),
            dim(&format!("event {event_id}"))
        ));
        self.bar.set_prefix("Received");
        self.bar.set_message(activity(PipelineState::Received));
    }

    fn on_transition(&self, _event_id: &str, from: PipelineState, to: PipelineState) {
        match to {
            PipelineState::Failed => {
                self.bar.println(format!("  {} {}", red("✗"), red(&format!("failed after {from}"))));
                self.bar.finish_and_clear();
            }
            PipelineState::NoContent => {
                self.bar.println(format!("  {} {}", yellow("⚠"), "no text extracted"));
                self.bar.finish_and_clear();
            }
            PipelineState::Persisted => {
                self.bar.println(format!("  {} {}", green("✓"), to));
                self.bar.finish_and_clear();
            }
            _ => {
                self.bar.println(format!("  {} {}", green("✓"), to));
                self.bar.set_prefix(to.to_string());
                self.bar.set_message(activity(to));
            }
        }
    }

    fn on_marker_missing(&self, _event_id: &str, marker: &str) {
        self.bar.println(format!(
            "  {} {}",
            yellow("⚠"),
            dim(&format!("no '{marker}' heading; using best-effort excerpt"))
        ));
    }

    fn on_insert_errors(&self, _event_id: &str, errors: &[InsertError]) {
        for e in errors {
            self.bar.println(format!("  {} {}", red("✗"), red(&e.to_string())));
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Summarise an uploaded PDF (storage notification payload)
  docsum run event.json

  # Same payload from stdin, JSON result
  cat event.json | docsum run --json -

  # Summarise pre-extracted text: {"name": "paper.pdf", "text": "..."}
  docsum run text.json --output-bucket ""

  # Route summarisation through an edgequake-llm provider
  docsum run event.json --generator provider --provider openai --model gpt-4.1-mini

  # Show the prompt window for a local text file (no cloud access)
  docsum window paper.txt

PAYLOAD SHAPES:
  Storage notification  {"id", "bucket", "name", "timeCreated", "contentType"?}
  CloudEvent            {"id", "type", "data": {"bucket", "name", "timeCreated"}}
  Direct text           {"name", "text", "id"?}
  timeCreated must be ISO-8601 ending in "Z".

ENVIRONMENT VARIABLES:
  PROJECT_ID              Google Cloud project for Vision / Vertex AI
  LOCATION                Vertex AI region (default us-central1)
  OUTPUT_BUCKET           Bucket for OCR shards and summary artifacts
  DATASET_ID, TABLE_ID    BigQuery destination
  GOOGLE_ACCESS_TOKEN     OAuth bearer token (e.g. `gcloud auth print-access-token`)
  EDGEQUAKE_LLM_PROVIDER  Provider for --generator provider
  EDGEQUAKE_MODEL         Model for --generator provider
"#;

/// Summarise uploaded documents with OCR and a text model.
#[derive(Parser, Debug)]
#[command(
    name = "docsum",
    version,
    about = "Summarise uploaded PDF documents with OCR and a text model",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOCSUM_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and the result.
    #[arg(short, long, global = true, env = "DOCSUM_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full pipeline for one trigger payload.
    Run(RunArgs),
    /// Print the prompt-ready window for a local text file.
    Window(WindowArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Trigger payload JSON file, or `-` for stdin.
    payload: String,

    /// Google Cloud project hosting Vision and Vertex AI.
    #[arg(long, env = "PROJECT_ID", default_value = "")]
    project: String,

    /// Vertex AI region.
    #[arg(long, env = "LOCATION", default_value = "us-central1")]
    location: String,

    /// Vertex AI text model.
    #[arg(long, env = "DOCSUM_VERTEX_MODEL", default_value = "text-bison@001")]
    vertex_model: String,

    /// Bucket for OCR shards and summary artifacts.
    #[arg(long, env = "OUTPUT_BUCKET", default_value = "")]
    output_bucket: String,

    /// Object prefix for OCR shards.
    #[arg(long, env = "DOCSUM_OCR_PREFIX", default_value = "ocr")]
    ocr_prefix: String,

    /// BigQuery dataset.
    #[arg(long, env = "DATASET_ID", default_value = "")]
    dataset: String,

    /// BigQuery table.
    #[arg(long, env = "TABLE_ID", default_value = "")]
    table: String,

    /// OAuth bearer token for the Google Cloud APIs.
    #[arg(long, env = "GOOGLE_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Summarisation backend.
    #[arg(long, env = "DOCSUM_GENERATOR", value_enum, default_value = "vertex")]
    generator: GeneratorArg,

    /// edgequake-llm provider (with --generator provider).
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// edgequake-llm model (with --generator provider).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Maximum wait for the OCR operation, in seconds.
    #[arg(long, env = "DOCSUM_OCR_TIMEOUT", default_value_t = 420)]
    ocr_timeout: u64,

    /// Pages per OCR output shard.
    #[arg(long, env = "DOCSUM_OCR_BATCH_SIZE", default_value_t = 2)]
    ocr_batch_size: u32,

    /// Send the whole text instead of the abstract/conclusion window.
    #[arg(long, env = "DOCSUM_NO_WINDOW")]
    no_window: bool,

    #[command(flatten)]
    window: WindowFlags,

    /// Path to a prompt template file containing `{text}`.
    #[arg(long, env = "DOCSUM_PROMPT")]
    prompt: Option<PathBuf>,

    /// Sampling temperature (0.0–1.0).
    #[arg(long, env = "DOCSUM_TEMPERATURE", default_value_t = 0.2)]
    temperature: f32,

    /// Max generated tokens.
    #[arg(long, env = "DOCSUM_MAX_OUTPUT_TOKENS", default_value_t = 256)]
    max_output_tokens: u32,

    /// Transport retries for the model call (HTTP 429/500/503).
    #[arg(long, env = "DOCSUM_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Model call timeout in seconds.
    #[arg(long, env = "DOCSUM_API_TIMEOUT", default_value_t = 900)]
    api_timeout: u64,

    /// Output the structured result as JSON instead of the summary text.
    #[arg(long, env = "DOCSUM_JSON")]
    json: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "DOCSUM_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Args, Debug)]
struct WindowArgs {
    /// Text file, or `-` for stdin.
    input: String,

    #[command(flatten)]
    window: WindowFlags,

    /// Output the window (excerpts and marker flags) as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct WindowFlags {
    /// Characters kept from the abstract heading.
    #[arg(long, env = "DOCSUM_ABSTRACT_BUDGET", default_value_t = 1200)]
    abstract_budget: usize,

    /// Characters kept from the conclusion heading.
    #[arg(long, env = "DOCSUM_CONCLUSION_BUDGET", default_value_t = 1600)]
    conclusion_budget: usize,

    /// Heading that starts the first excerpt.
    #[arg(long, default_value = "abstract")]
    abstract_marker: String,

    /// Heading that starts the second excerpt.
    #[arg(long, default_value = "conclusion")]
    conclusion_marker: String,
}

impl From<&WindowFlags> for WindowConfig {
    fn from(f: &WindowFlags) -> Self {
        WindowConfig {
            abstract_budget: f.abstract_budget,
            conclusion_budget: f.conclusion_budget,
            abstract_marker: f.abstract_marker.clone(),
            conclusion_marker: f.conclusion_marker.clone(),
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum GeneratorArg {
    /// Vertex AI publisher model (`--vertex-model`).
    Vertex,
    /// Any edgequake-llm provider (`--provider`, `--model`).
    Provider,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner replaces INFO-level transition logs when it is active.
    let show_progress = match &cli.command {
        Command::Run(args) => !cli.quiet && !args.no_progress && !args.json,
        Command::Window(_) => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Window(ref args) => window(args).await,
        Command::Run(ref args) => run(args, show_progress, cli.quiet).await,
    }
}

async fn window(args: &WindowArgs) -> Result<()> {
    let bytes = read_input(&args.input).await?;
    let text = String::from_utf8_lossy(&bytes);
    let window = TextWindowSelector::new(WindowConfig::from(&args.window)).select(&text);

    if args.json {
        let json = serde_json::to_string_pretty(&window).context("Failed to serialise window")?;
        println!("{json}");
    } else {
        println!("{}", window.to_prompt());
    }
    Ok(())
}

async fn run(args: &RunArgs, show_progress: bool, quiet: bool) -> Result<()> {
    let payload = read_input(&args.payload).await?;
    let trigger = Trigger::from_slice(&payload).context("Invalid trigger payload")?;

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };
    let config = build_config(args, progress_cb).await?;

    let token = args.access_token.clone();
    let services = match args.generator {
        GeneratorArg::Vertex => {
            Services::google(&config, token).context("Failed to set up Google Cloud clients")?
        }
        GeneratorArg::Provider => {
            let generator =
                ProviderTextGenerator::resolve(args.provider.as_deref(), args.model.as_deref())
                    .context("Failed to set up LLM provider")?;
            Services::google_with_generator(token, Arc::new(generator))
                .context("Failed to set up Google Cloud clients")?
        }
    };

    let orchestrator = PipelineOrchestrator::new(config, services);
    let outcome = orchestrator
        .run(trigger)
        .await
        .context("Pipeline run failed")?;

    if args.json {
        let json = serde_json::to_string_pretty(&outcome).context("Failed to serialise output")?;
        println!("{json}");
        return Ok(());
    }

    match &outcome {
        RunOutcome::Persisted(out) => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(out.summary.summary_text.as_bytes())
                .context("Failed to write to stdout")?;
            if !out.summary.summary_text.ends_with('\n') {
                handle.write_all(b"\n").ok();
            }
            if !quiet {
                eprintln!(
                    "{}  {} chars → {}  {}ms",
                    if out.insert_errors.is_empty() { green("✔") } else { yellow("⚠") },
                    out.stats.extracted_chars,
                    bold(&orchestrator.config().table.to_string()),
                    out.stats.total_duration_ms,
                );
                for e in &out.insert_errors {
                    eprintln!("   {} {}", red("✗"), e);
                }
            }
        }
        RunOutcome::NoContent { source, .. } => {
            if !quiet {
                eprintln!("{}  no text extracted from {}", yellow("⚠"), source);
            }
        }
    }
    Ok(())
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(args: &RunArgs, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .project_id(&args.project)
        .location(&args.location)
        .model_name(&args.vertex_model)
        .output_bucket(&args.output_bucket)
        .ocr_prefix(&args.ocr_prefix)
        .ocr_batch_size(args.ocr_batch_size)
        .ocr_timeout_secs(args.ocr_timeout)
        .windowing(!args.no_window)
        .abstract_budget(args.window.abstract_budget)
        .conclusion_budget(args.window.conclusion_budget)
        .markers(&args.window.abstract_marker, &args.window.conclusion_marker)
        .temperature(args.temperature)
        .max_output_tokens(args.max_output_tokens)
        .table(TableRef::new(&args.project, &args.dataset, &args.table))
        .api_timeout_secs(args.api_timeout)
        .max_retries(args.max_retries);

    if let Some(ref path) = args.prompt {
        let template = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt template from {:?}", path))?;
        builder = builder.prompt_template(template);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Read a file, or stdin for `-`.
async fn read_input(path: &str) -> Result<Vec<u8>> {
    if path == "-" {
        let mut buf = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut buf)
            .await
            .context("Failed to read stdin")?;
        return Ok(buf);
    }
    tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {path}"))
}
