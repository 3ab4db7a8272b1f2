//! # uniscan
//!
//! Turn photographed pages and imported PDFs into editable, translatable text.
//!
//! ## Pipeline Overview
//!
//! ```text
//! camera / picker
//!  │
//!  ├─ 1. Acquire    capture (+ crop) a photo, or pick and materialise a PDF
//!  ├─ 2. Encode     file bytes → base64
//!  ├─ 3. Extract    cloud text detection (images) or sandboxed pdfium (PDFs)
//!  ├─ 4. Store      ScanItem prepended to the session history
//!  └─ 5. Translate  on demand, from a TextSession
//! ```
//!
//! Stages sit behind traits ([`CameraDevice`], [`CaptureUi`], [`FilePicker`],
//! [`TextRecognizer`], [`RendererFactory`], [`Translator`],
//! [`HistoryStorage`]) and are wired together by a [`PipelineOrchestrator`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use uniscan::{
//!     CloudVisionRecognizer, DocumentAcquisition, FileCamera, ImageAcquisition,
//!     InMemoryHistory, NoContentResolver, PathPicker, PdfiumRendererFactory,
//!     PipelineOrchestrator, RunOutcome, ScanConfig, ScriptedCaptureUi,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ScanConfig::from_env().build()?;
//!     let scratch = config.scratch_dir();
//!
//!     let orchestrator = PipelineOrchestrator::new(
//!         ImageAcquisition::new(
//!             Arc::new(FileCamera::new("receipt.jpg")),
//!             Arc::new(ScriptedCaptureUi::new()),
//!             &scratch,
//!         ),
//!         DocumentAcquisition::new(
//!             Arc::new(PathPicker::new("report.pdf")),
//!             Arc::new(NoContentResolver),
//!             &scratch,
//!             config.download_timeout_secs,
//!         ),
//!         Arc::new(CloudVisionRecognizer::from_config(&config)?),
//!         Arc::new(PdfiumRendererFactory::new(config.pdfium_library_path.clone())),
//!         Arc::new(InMemoryHistory::new()),
//!     );
//!
//!     if let RunOutcome::Completed(item) = orchestrator.scan_camera().await? {
//!         println!("{}", item.text);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `uniscan` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! uniscan = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod history;
pub mod languages;
pub mod observer;
pub mod orchestrator;
pub mod pipeline;
pub mod session;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ScanConfig, ScanConfigBuilder};
pub use error::{ConfigError, Notification, ScanError};
pub use history::{HistoryStorage, InMemoryHistory, ScanItem, ScanStatus, ScanType};
pub use languages::Language;
pub use observer::{NoopObserver, PipelineObserver};
pub use orchestrator::{PipelineOrchestrator, PipelineState, RunOutcome};
pub use pipeline::camera::{
    CameraDevice, CaptureState, CaptureUi, CropRect, FileCamera, ImageAcquisition, ImageRef,
    ReviewDecision, ScriptedCaptureUi, ShutterAction,
};
pub use pipeline::document::{
    ContentResolver, DocumentAcquisition, FilePicker, FileRef, NoContentResolver, PathPicker,
    PickedDocument,
};
pub use pipeline::recognize::{CloudVisionRecognizer, TextRecognizer, NO_TEXT_DETECTED};
pub use pipeline::render::{PdfRenderer, PdfiumRendererFactory, RenderError, RendererFactory};
pub use pipeline::sandbox::{DocumentStatus, PdfExtractionBridge};
pub use pipeline::translate::{CloudTranslator, Translator};
pub use session::{TextSession, TranslationResult};
