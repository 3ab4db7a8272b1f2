//! CLI binary for uniscan.
//!
//! A thin shim over the library crate: flags map onto `ScanConfig`, every
//! input becomes one pipeline run, and completed items are printed (and
//! optionally translated) as they arrive.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Url;
use serde::Serialize;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use uniscan::languages::{self, LANGUAGES};
use uniscan::{
    CloudTranslator, CloudVisionRecognizer, ConfigError, CropRect, DocumentAcquisition, FileCamera,
    HistoryStorage, ImageAcquisition, ImageRef, InMemoryHistory, NoContentResolver, Notification,
    PathPicker, PdfiumRendererFactory, PipelineObserver, PipelineOrchestrator, PipelineState,
    ReviewDecision, RunOutcome, ScanConfig, ScanItem, ScriptedCaptureUi, TextSession,
    TranslationResult,
};

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── Spinner observer ─────────────────────────────────────────────────────────

/// Terminal observer: one spinner per run, a tick or cross when it ends.
struct CliObserver {
    bar: ProgressBar,
    label: std::sync::Mutex<String>,
    failures: AtomicUsize,
}

impl CliObserver {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
        );
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            label: std::sync::Mutex::new(String::new()),
            failures: AtomicUsize::new(0),
        })
    }

    fn start(&self, label: &str) {
        if let Ok(mut l) = self.label.lock() {
            *l = label.to_string();
        }
        self.bar.set_prefix(label.to_string());
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl PipelineObserver for CliObserver {
    fn on_state_change(&self, state: &PipelineState) {
        let msg = match state {
            PipelineState::Idle => return,
            PipelineState::Acquiring(_) => "acquiring…",
            PipelineState::Processing(_) => "extracting text…",
            PipelineState::Completed(_) => "done",
            PipelineState::Failed(_) => "failed",
        };
        self.bar.set_message(msg);
    }

    fn on_notification(&self, notification: &Notification) {
        self.failures.fetch_add(1, Ordering::SeqCst);
        let label = self.label.lock().map(|l| l.clone()).unwrap_or_default();
        self.bar.println(format!(
            "  {} {}  {}: {}",
            red("✗"),
            label,
            bold(&notification.title),
            red(&notification.message)
        ));
    }

    fn on_item_stored(&self, item: &ScanItem) {
        let label = self.label.lock().map(|l| l.clone()).unwrap_or_default();
        self.bar.println(format!(
            "  {} {}  {}",
            green("✓"),
            label,
            dim(&format!("{} chars", item.text.chars().count()))
        ));
    }
}

// ── CLI definition ───────────────────────────────────────────────────────────

const AFTER_HELP: &str = r#"EXAMPLES:
  # Recognize the text of a photo (the file stands in for the camera)
  uniscan scan receipt.jpg

  # Crop before recognition: x,y,width,height in pixels
  uniscan scan --crop 40,120,800,400 receipt.jpg

  # Recognize several images and translate the results into French
  uniscan --translate fr image page1.png page2.png

  # Translate into the default language (--default-language, else Spanish)
  uniscan --translate image page1.png

  # Extract the text of PDFs (local path, file:// URL or https:// URL)
  uniscan pdf report.pdf https://example.com/paper.pdf

  # JSON output with the full session history
  uniscan --json pdf report.pdf > history.json

  # Supported translation targets
  uniscan languages

ENVIRONMENT VARIABLES:
  GOOGLE_API_KEY               Key for Cloud Vision and Cloud Translation
  UNISCAN_VISION_ENDPOINT      Override the text detection endpoint
  UNISCAN_TRANSLATE_ENDPOINT   Override the translation endpoint
  PDFIUM_LIB_PATH              libpdfium file or directory (default: system library)
"#;

/// Turn photos and PDFs into editable, translatable text.
#[derive(Parser, Debug)]
#[command(
    name = "uniscan",
    version,
    about = "Turn photos and PDFs into editable, translatable text",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Translate every result into this language code (see `languages`).
    /// Without a code the default language is used.
    #[arg(long, global = true, num_args = 0..=1, value_name = "LANG")]
    translate: Option<Option<String>>,

    /// Language used by a bare `--translate`.
    #[arg(long, global = true, env = "UNISCAN_TARGET_LANGUAGE")]
    default_language: Option<String>,

    /// API key for the cloud services.
    #[arg(long, global = true, env = "GOOGLE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Text detection endpoint.
    #[arg(long, global = true, env = "UNISCAN_VISION_ENDPOINT")]
    vision_endpoint: Option<String>,

    /// Translation endpoint.
    #[arg(long, global = true, env = "UNISCAN_TRANSLATE_ENDPOINT")]
    translate_endpoint: Option<String>,

    /// pdfium shared library (file or directory).
    #[arg(long, global = true, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Directory for captures and downloaded PDFs.
    #[arg(long, global = true, env = "UNISCAN_CAPTURE_DIR")]
    capture_dir: Option<PathBuf>,

    /// HTTP download timeout in seconds.
    #[arg(long, global = true, env = "UNISCAN_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Print the session history as JSON instead of plain text.
    #[arg(long, global = true)]
    json: bool,

    /// Disable the progress spinner.
    #[arg(long, global = true)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except results and errors.
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Capture from image files used as a camera, then recognize the text.
    Scan {
        /// Photos to "capture", one run each.
        #[arg(required = true)]
        photos: Vec<PathBuf>,

        /// Crop rectangle applied at review: x,y,width,height.
        #[arg(long)]
        crop: Option<CropRect>,
    },
    /// Recognize the text of existing images.
    Image {
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Extract the text of PDFs.
    Pdf {
        /// Path, file:// URL or http(s):// URL, one run each.
        #[arg(required = true)]
        documents: Vec<String>,
    },
    /// List translation targets.
    Languages,
}

#[derive(Serialize)]
struct Entry<'a> {
    #[serde(flatten)]
    item: &'a ScanItem,
    #[serde(skip_serializing_if = "Option::is_none")]
    translation: Option<&'a TranslationResult>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner provides all the feedback that matters; keep the library
    // quiet underneath it unless asked for more.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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

    if let Command::Languages = cli.command {
        print_languages(cli.json)?;
        return Ok(());
    }

    let config = build_config(&cli)?;
    let target = cli
        .translate
        .as_ref()
        .map(|code| config.target_language(code.as_deref()).to_string());
    if let Some(code) = &target {
        if languages::find(code).is_none() {
            eprintln!(
                "{} '{}' is not in the language list; sending it as is",
                cyan("⚠"),
                code
            );
        }
    }

    let needs_vision = !matches!(cli.command, Command::Pdf { .. });
    let recognizer = Arc::new(build_recognizer(&config, needs_vision)?);
    let translator = match &target {
        Some(_) => Some(
            CloudTranslator::from_config(&config)
                .context("Translation needs an API key (--api-key or GOOGLE_API_KEY)")?,
        ),
        None => None,
    };
    let renderer = Arc::new(PdfiumRendererFactory::new(config.pdfium_library_path.clone()));
    let history: Arc<dyn HistoryStorage> = Arc::new(InMemoryHistory::new());
    let observer = show_progress.then(CliObserver::new);
    let scratch = config.scratch_dir();

    // ── One run per input ────────────────────────────────────────────────
    let runs: Vec<(String, Run)> = match &cli.command {
        Command::Scan { photos, crop } => photos
            .iter()
            .map(|p| (p.display().to_string(), Run::Camera(p.clone(), *crop)))
            .collect(),
        Command::Image { images } => images
            .iter()
            .map(|p| (p.display().to_string(), Run::Image(p.clone())))
            .collect(),
        Command::Pdf { documents } => documents
            .iter()
            .map(|d| (d.clone(), Run::Pdf(d.clone())))
            .collect(),
        Command::Languages => Vec::new(),
    };

    let mut sessions = Vec::with_capacity(runs.len());
    let mut failed = 0usize;
    for (label, run) in runs {
        let (device, ui, picker) = match &run {
            Run::Camera(path, crop) => {
                let ui = ScriptedCaptureUi::new().with_review(crop.map(ReviewDecision::Crop));
                (FileCamera::new(path), ui, PathPicker::dismissed())
            }
            Run::Image(path) => (FileCamera::new(path), ScriptedCaptureUi::new(), PathPicker::dismissed()),
            Run::Pdf(uri) => (FileCamera::new(uri), ScriptedCaptureUi::new(), PathPicker::new(uri)),
        };
        let mut orchestrator = PipelineOrchestrator::new(
            ImageAcquisition::new(Arc::new(device), Arc::new(ui), &scratch),
            DocumentAcquisition::new(
                Arc::new(picker),
                Arc::new(NoContentResolver),
                &scratch,
                config.download_timeout_secs,
            ),
            recognizer.clone(),
            renderer.clone(),
            Arc::clone(&history),
        );
        if let Some(obs) = &observer {
            obs.start(&label);
            orchestrator = orchestrator.with_observer(obs.clone());
        }

        let outcome = match run {
            Run::Camera(..) => orchestrator.scan_camera().await,
            Run::Image(path) => orchestrator.import_image(ImageRef::new(path)).await,
            Run::Pdf(_) => orchestrator.import_pdf().await,
        };

        match outcome {
            Ok(RunOutcome::Completed(item)) => {
                let mut session = TextSession::new(item);
                if let (Some(t), Some(code)) = (&translator, &target) {
                    if let Err(e) = session.translate(t, code).await {
                        failed += 1;
                        report(observer.as_deref(), &label, &e.to_string());
                    }
                }
                if !cli.json {
                    print_session(&session)?;
                }
                sessions.push(session);
            }
            Ok(other) => {
                if !cli.quiet {
                    eprintln!("{} {}  {}", cyan("⚠"), label, dim(&format!("{other:?}")));
                }
            }
            Err(e) => {
                failed += 1;
                if observer.is_none() {
                    eprintln!("{} {}  {}", red("✗"), label, red(&e.to_string()));
                }
            }
        }
    }

    if let Some(obs) = &observer {
        obs.finish();
    }

    // ── Output ───────────────────────────────────────────────────────────
    if cli.json {
        // Most recent first, as the history keeps it.
        let entries: Vec<Entry<'_>> = sessions
            .iter()
            .rev()
            .map(|s| Entry {
                item: s.item(),
                translation: s.translation(),
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&entries).context("Failed to serialise history")?
        );
    }

    if !cli.quiet {
        let done = history.len();
        eprintln!(
            "{} {} completed, {} failed",
            if failed == 0 { green("✔") } else { cyan("⚠") },
            bold(&done.to_string()),
            failed
        );
    }

    if failed > 0 && history.is_empty() {
        bail!("no input produced text");
    }
    Ok(())
}

enum Run {
    Camera(PathBuf, Option<CropRect>),
    Image(PathBuf),
    Pdf(String),
}

fn report(observer: Option<&CliObserver>, label: &str, message: &str) {
    let line = format!("{} {}  {}", red("✗"), label, red(message));
    match observer {
        Some(obs) => obs.bar.println(line),
        None => eprintln!("{line}"),
    }
}

/// Map CLI args to `ScanConfig`.
fn build_config(cli: &Cli) -> Result<ScanConfig> {
    let mut builder = ScanConfig::builder().download_timeout_secs(cli.download_timeout);
    if let Some(key) = &cli.api_key {
        builder = builder.api_key(key);
    }
    if let Some(url) = &cli.vision_endpoint {
        builder = builder.vision_endpoint(url);
    }
    if let Some(url) = &cli.translate_endpoint {
        builder = builder.translate_endpoint(url);
    }
    if let Some(path) = &cli.pdfium_lib {
        builder = builder.pdfium_library_path(path);
    }
    if let Some(dir) = &cli.capture_dir {
        builder = builder.capture_dir(dir);
    }
    if let Some(code) = &cli.default_language {
        builder = builder.default_target_language(code);
    }
    builder.build().context("Invalid configuration")
}

/// PDF runs never call the vision service, so they may go without a key.
fn build_recognizer(config: &ScanConfig, needs_key: bool) -> Result<CloudVisionRecognizer> {
    match CloudVisionRecognizer::from_config(config) {
        Ok(r) => Ok(r),
        Err(ConfigError::MissingApiKey) if !needs_key => {
            let url = Url::parse(&config.vision_endpoint).context("Invalid vision endpoint")?;
            Ok(CloudVisionRecognizer::new(url))
        }
        Err(e) => Err(e).context("Text recognition needs an API key (--api-key or GOOGLE_API_KEY)"),
    }
}

fn print_session(session: &TextSession) -> Result<()> {
    let item = session.item();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    writeln!(
        out,
        "{} {}",
        bold(&item.title),
        dim(&format!("{}  {}", item.date, item.uri))
    )?;
    writeln!(out, "{}", session.text())?;
    if let Some(t) = session.translation() {
        writeln!(out, "{}", cyan(&format!("── {} ──", t.language)))?;
        writeln!(out, "{}", t.text)?;
    }
    writeln!(out)?;
    Ok(())
}

fn print_languages(json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(LANGUAGES).context("Failed to serialise languages")?
        );
        return Ok(());
    }
    for lang in LANGUAGES {
        let marker = if lang.code == languages::DEFAULT_TARGET {
            dim(" (default)")
        } else {
            String::new()
        };
        println!("{:<4} {}{}", lang.code, lang.name, marker);
    }
    Ok(())
}
