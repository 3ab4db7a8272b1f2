//! PDF extraction sandbox: an isolated renderer that talks only in messages.
//!
//! The sandbox runs on its own blocking thread and owns the loaded document.
//! Host and sandbox share no state: every exchange is a JSON string built
//! from [`SandboxCommand`] / [`SandboxEvent`] and sent over an mpsc channel.
//!
//! ```text
//!  host (PdfExtractionBridge)              sandbox (blocking thread)
//!  ─────────────────────────               ─────────────────────────
//!  {"type":"load","data":…}        ──►     decode + open document
//!                                  ◄──     {"type":"loaded","totalPages":3}
//!  {"type":"nextPage"}             ──►
//!                                  ◄──     {"type":"pageChanged",…}
//!  {"type":"extractText"}          ──►     walk pages 1..N
//!                                  ◄──     {"type":"extractedText","text":…}
//! ```
//!
//! Extraction is all-or-nothing: a failed page, a failed load or a panic
//! while walking pages produces a single `error` event and no partial text.
//! Preview navigation only moves the sandbox's page cursor; it never changes
//! what extraction returns.

use crate::error::ScanError;
use crate::pipeline::render::{PdfRenderer, RenderError, RendererFactory};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

// ── Protocol ─────────────────────────────────────────────────────────────

/// Host → sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SandboxCommand {
    /// Open a document from base64-encoded bytes.
    Load { data: String },
    NextPage,
    PrevPage,
    ExtractText,
}

/// Sandbox → host. Page numbers are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SandboxEvent {
    Loaded { total_pages: usize },
    PageChanged { current_page: usize, total_pages: usize },
    ExtractedText { text: String },
    Error { message: String },
}

// ── Sandbox side ─────────────────────────────────────────────────────────

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Join a page's fragments with single spaces, collapse whitespace runs, trim.
pub fn normalize_page(fragments: &[String]) -> String {
    WHITESPACE
        .replace_all(&fragments.join(" "), " ")
        .trim()
        .to_string()
}

/// Walk every page in order and build the document text.
///
/// Each page contributes its normalized text followed by a blank line; the
/// accumulator is trimmed once at the end, so blank pages in the middle of a
/// document leave an extra blank line behind.
fn extract_document(document: &dyn PdfRenderer) -> Result<String, RenderError> {
    let mut text = String::new();
    for index in 0..document.page_count() {
        let fragments = document
            .page_fragments(index)
            .map_err(|e| RenderError(format!("page {}: {}", index + 1, e)))?;
        text.push_str(&normalize_page(&fragments));
        text.push_str("\n\n");
    }
    Ok(text.trim().to_string())
}

struct Sandbox {
    factory: Arc<dyn RendererFactory>,
    document: Option<Box<dyn PdfRenderer>>,
    current_page: usize,
    total_pages: usize,
    load_error: Option<String>,
    events: mpsc::UnboundedSender<String>,
}

impl Sandbox {
    fn new(factory: Arc<dyn RendererFactory>, events: mpsc::UnboundedSender<String>) -> Self {
        Self {
            factory,
            document: None,
            current_page: 0,
            total_pages: 0,
            load_error: None,
            events,
        }
    }

    /// Serve commands until the host drops its sender.
    fn run(mut self, mut commands: mpsc::UnboundedReceiver<String>) {
        while let Some(raw) = commands.blocking_recv() {
            match serde_json::from_str::<SandboxCommand>(&raw) {
                Ok(command) => self.handle(command),
                Err(e) => self.post(SandboxEvent::Error {
                    message: format!("unrecognised command: {e}"),
                }),
            }
        }
        debug!("Sandbox host disconnected; shutting down");
    }

    fn handle(&mut self, command: SandboxCommand) {
        match command {
            SandboxCommand::Load { data } => self.load(&data),
            SandboxCommand::NextPage => {
                if self.document.is_some() && self.current_page < self.total_pages {
                    self.current_page += 1;
                    self.post_page();
                }
            }
            SandboxCommand::PrevPage => {
                if self.document.is_some() && self.current_page > 1 {
                    self.current_page -= 1;
                    self.post_page();
                }
            }
            SandboxCommand::ExtractText => self.extract(),
        }
    }

    fn load(&mut self, data: &str) {
        self.document = None;
        self.current_page = 0;
        self.total_pages = 0;

        let opened = STANDARD
            .decode(data.trim())
            .map_err(|e| format!("invalid base64 payload: {e}"))
            .and_then(|bytes| {
                self.factory
                    .load(bytes)
                    .map_err(|e| format!("cannot load document: {e}"))
            });

        match opened {
            Ok(document) => {
                self.total_pages = document.page_count();
                self.current_page = self.total_pages.min(1);
                self.document = Some(document);
                self.load_error = None;
                self.post(SandboxEvent::Loaded {
                    total_pages: self.total_pages,
                });
            }
            Err(message) => {
                self.load_error = Some(message.clone());
                self.post(SandboxEvent::Error { message });
            }
        }
    }

    fn extract(&self) {
        let event = match (&self.document, &self.load_error) {
            (_, Some(message)) => SandboxEvent::Error {
                message: message.clone(),
            },
            (None, None) => SandboxEvent::Error {
                message: "no document loaded".into(),
            },
            (Some(document), None) => {
                match panic::catch_unwind(AssertUnwindSafe(|| extract_document(&**document))) {
                    Ok(Ok(text)) => SandboxEvent::ExtractedText { text },
                    Ok(Err(e)) => SandboxEvent::Error {
                        message: e.to_string(),
                    },
                    Err(_) => SandboxEvent::Error {
                        message: "renderer panicked during extraction".into(),
                    },
                }
            }
        };
        self.post(event);
    }

    fn post_page(&self) {
        self.post(SandboxEvent::PageChanged {
            current_page: self.current_page,
            total_pages: self.total_pages,
        });
    }

    fn post(&self, event: SandboxEvent) {
        let encoded = match serde_json::to_string(&event) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("Cannot encode sandbox event {:?}: {}", event, e);
                return;
            }
        };
        if self.events.send(encoded).is_err() {
            debug!("Host gone; dropping {:?}", event);
        }
    }
}

// ── Host side ────────────────────────────────────────────────────────────

/// What the host currently knows about the sandbox's document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentStatus {
    Loading,
    Ready { current_page: usize, total_pages: usize },
    Failed(String),
}

type PendingExtraction = oneshot::Sender<Result<String, String>>;

/// Host end of one sandbox. Dropping the bridge shuts the sandbox down.
pub struct PdfExtractionBridge {
    commands: mpsc::UnboundedSender<String>,
    status: watch::Receiver<DocumentStatus>,
    pending: Arc<Mutex<Option<PendingExtraction>>>,
}

impl PdfExtractionBridge {
    /// Start a sandbox and ask it to load `pdf_base64`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn open(pdf_base64: String, factory: Arc<dyn RendererFactory>) -> Result<Self, ScanError> {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(DocumentStatus::Loading);
        let pending = Arc::new(Mutex::new(None));

        tokio::task::spawn_blocking(move || Sandbox::new(factory, event_tx).run(command_rx));
        tokio::spawn(dispatch(event_rx, status_tx, Arc::clone(&pending)));

        let bridge = Self {
            commands: command_tx,
            status: status_rx,
            pending,
        };
        debug!("Sending {} bytes of base64 to sandbox", pdf_base64.len());
        bridge.send(SandboxCommand::Load { data: pdf_base64 })?;
        Ok(bridge)
    }

    /// Wait for the sandbox to report the document as loaded.
    ///
    /// # Returns
    /// The total page count.
    pub async fn wait_loaded(&self) -> Result<usize, ScanError> {
        let mut status = self.status.clone();
        let settled = status
            .wait_for(|s| !matches!(s, DocumentStatus::Loading))
            .await
            .map_err(|_| ScanError::extraction("sandbox stopped before the document loaded"))?
            .clone();
        match settled {
            DocumentStatus::Ready { total_pages, .. } => Ok(total_pages),
            DocumentStatus::Failed(message) => Err(ScanError::extraction(message)),
            DocumentStatus::Loading => Err(ScanError::extraction("document is still loading")),
        }
    }

    pub fn status(&self) -> DocumentStatus {
        self.status.borrow().clone()
    }

    /// `(current_page, total_pages)` as last reported by the sandbox.
    pub fn page_indicator(&self) -> Option<(usize, usize)> {
        match *self.status.borrow() {
            DocumentStatus::Ready {
                current_page,
                total_pages,
            } => Some((current_page, total_pages)),
            _ => None,
        }
    }

    /// Move the preview forward one page. Ignored past the last page.
    pub fn preview_next(&self) -> Result<(), ScanError> {
        self.send(SandboxCommand::NextPage)
    }

    /// Move the preview back one page. Ignored before the first page.
    pub fn preview_prev(&self) -> Result<(), ScanError> {
        self.send(SandboxCommand::PrevPage)
    }

    /// Ask the sandbox for the text of every page and wait for the answer.
    ///
    /// A second call while one is waiting takes over the reply; the earlier
    /// caller gets [`ScanError::ExtractionError`].
    ///
    /// # Errors
    /// - [`ScanError::ExtractionError`] — load, page or sandbox failure
    /// - [`ScanError::NoTextFound`] — every page was blank
    pub async fn extract_all(&self) -> Result<String, ScanError> {
        let (tx, rx) = oneshot::channel();
        if lock(&self.pending).replace(tx).is_some() {
            debug!("Superseding an earlier extraction request");
        }
        self.send(SandboxCommand::ExtractText)?;

        let text = rx
            .await
            .map_err(|_| ScanError::extraction("extraction request was abandoned"))?
            .map_err(ScanError::extraction)?;
        if text.trim().is_empty() {
            return Err(ScanError::NoTextFound);
        }
        info!(chars = text.len(), "PDF text extracted");
        Ok(text)
    }

    fn send(&self, command: SandboxCommand) -> Result<(), ScanError> {
        let encoded = serde_json::to_string(&command)
            .map_err(|e| ScanError::extraction(format!("cannot encode command: {e}")))?;
        self.commands
            .send(encoded)
            .map_err(|_| ScanError::extraction("sandbox is not running"))
    }
}

fn lock(pending: &Mutex<Option<PendingExtraction>>) -> std::sync::MutexGuard<'_, Option<PendingExtraction>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Route sandbox events to the status channel and the pending extraction.
async fn dispatch(
    mut events: mpsc::UnboundedReceiver<String>,
    status: watch::Sender<DocumentStatus>,
    pending: Arc<Mutex<Option<PendingExtraction>>>,
) {
    while let Some(raw) = events.recv().await {
        let event = match serde_json::from_str::<SandboxEvent>(&raw) {
            Ok(event) => event,
            Err(e) => {
                warn!("Ignoring unreadable sandbox message: {}", e);
                continue;
            }
        };
        match event {
            SandboxEvent::Loaded { total_pages } => {
                status.send_replace(DocumentStatus::Ready {
                    current_page: total_pages.min(1),
                    total_pages,
                });
            }
            SandboxEvent::PageChanged {
                current_page,
                total_pages,
            } => {
                status.send_replace(DocumentStatus::Ready {
                    current_page,
                    total_pages,
                });
            }
            SandboxEvent::ExtractedText { text } => match lock(&pending).take() {
                Some(waiter) => {
                    let _ = waiter.send(Ok(text));
                }
                None => debug!("Discarding unrequested extraction result"),
            },
            SandboxEvent::Error { message } => {
                if *status.borrow() == DocumentStatus::Loading {
                    status.send_replace(DocumentStatus::Failed(message));
                } else if let Some(waiter) = lock(&pending).take() {
                    let _ = waiter.send(Err(message));
                } else {
                    warn!("Unattended sandbox error: {}", message);
                }
            }
        }
    }
}
