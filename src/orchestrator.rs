//! Pipeline orchestration: one user-visible flow per source type.
//!
//! ```text
//!  Idle ──▶ Acquiring ──▶ Processing ──▶ Completed ──┐
//!   ▲           │              │     └──▶ Failed ────┤ acknowledge()
//!   │           └── cancel ────┴──────────────────────┤
//!   └─────────────────────────────────────────────────┘
//! ```
//!
//! ## Runs and sequence numbers
//!
//! Every run takes a fresh sequence number and records it as the active run.
//! The active slot doubles as the busy flag: a start while another run is
//! active is rejected with [`RunOutcome::Busy`]. [`PipelineOrchestrator::cancel`]
//! clears the slot and returns the state to `Idle` at once; calls already in
//! flight are not aborted. When such a stale run eventually resolves, its
//! result is dropped ([`RunOutcome::Superseded`]): no state is written, no
//! item is stored and no notification is raised.

use crate::error::ScanError;
use crate::history::{HistoryStorage, ScanItem, ScanType};
use crate::observer::{NoopObserver, PipelineObserver};
use crate::pipeline::camera::{ImageAcquisition, ImageRef};
use crate::pipeline::document::DocumentAcquisition;
use crate::pipeline::encode;
use crate::pipeline::recognize::TextRecognizer;
use crate::pipeline::render::RendererFactory;
use crate::pipeline::sandbox::PdfExtractionBridge;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};

/// Where the orchestrator is in the current (or last) run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "camelCase")]
pub enum PipelineState {
    Idle,
    Acquiring(ScanType),
    Processing(ScanType),
    Completed(ScanItem),
    Failed(ScanError),
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Completed(_) | PipelineState::Failed(_))
    }
}

/// How a run ended, when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Text was produced and the item is now at the head of the history.
    Completed(ScanItem),
    /// The user backed out; the pipeline is `Idle`.
    Cancelled,
    /// Another run was already active; nothing happened.
    Busy,
    /// [`PipelineOrchestrator::cancel`] was called while this run was in
    /// flight; its result was discarded.
    Superseded,
}

pub struct PipelineOrchestrator {
    camera: ImageAcquisition,
    documents: DocumentAcquisition,
    recognizer: Arc<dyn TextRecognizer>,
    renderer: Arc<dyn RendererFactory>,
    history: Arc<dyn HistoryStorage>,
    observer: Arc<dyn PipelineObserver>,
    state: watch::Sender<PipelineState>,
    /// Sequence number of the active run; 0 when idle.
    active: AtomicU64,
    next_seq: AtomicU64,
}

impl PipelineOrchestrator {
    pub fn new(
        camera: ImageAcquisition,
        documents: DocumentAcquisition,
        recognizer: Arc<dyn TextRecognizer>,
        renderer: Arc<dyn RendererFactory>,
        history: Arc<dyn HistoryStorage>,
    ) -> Self {
        let (state, _) = watch::channel(PipelineState::Idle);
        Self {
            camera,
            documents,
            recognizer,
            renderer,
            history,
            observer: Arc::new(NoopObserver),
            state,
            active: AtomicU64::new(0),
            next_seq: AtomicU64::new(1),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn history(&self) -> &Arc<dyn HistoryStorage> {
        &self.history
    }

    pub fn camera(&self) -> &ImageAcquisition {
        &self.camera
    }

    // ── Observation ──────────────────────────────────────────────────────

    pub fn state(&self) -> PipelineState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    /// The current state followed by every later change.
    pub fn state_stream(&self) -> WatchStream<PipelineState> {
        WatchStream::new(self.state.subscribe())
    }

    pub fn is_busy(&self) -> bool {
        self.active.load(Ordering::SeqCst) != 0
    }

    // ── Runs ─────────────────────────────────────────────────────────────

    /// Capture a photo and recognize its text.
    pub async fn scan_camera(&self) -> Result<RunOutcome, ScanError> {
        let Some(run) = self.begin(ScanType::Camera) else {
            return Ok(RunOutcome::Busy);
        };
        let result = async {
            let image = self.camera.acquire().await?;
            if !self.advance(&run, PipelineState::Processing(ScanType::Camera)) {
                return Ok(None);
            }
            let text = self.recognizer.recognize(&image).await?;
            Ok::<_, ScanError>(Some(ScanItem::new(text, image.uri(), ScanType::Camera)))
        }
        .await;
        self.finish(run, result)
    }

    /// Recognize the text of an image that is already on disk.
    pub async fn import_image(&self, image: ImageRef) -> Result<RunOutcome, ScanError> {
        let Some(run) = self.begin(ScanType::Image) else {
            return Ok(RunOutcome::Busy);
        };
        self.advance(&run, PipelineState::Processing(ScanType::Image));
        let result = self
            .recognizer
            .recognize(&image)
            .await
            .map(|text| Some(ScanItem::new(text, image.uri(), ScanType::Image)));
        self.finish(run, result)
    }

    /// Pick a PDF and extract the text of every page.
    pub async fn import_pdf(&self) -> Result<RunOutcome, ScanError> {
        let Some(run) = self.begin(ScanType::Document) else {
            return Ok(RunOutcome::Busy);
        };
        let result = async {
            let file = self.documents.acquire().await?;
            if !self.advance(&run, PipelineState::Processing(ScanType::Document)) {
                return Ok(None);
            }

            let content = encode::encode_file(file.path()).await?;
            if !self.is_current(run.seq) {
                return Ok(None);
            }
            let bridge = PdfExtractionBridge::open(content, Arc::clone(&self.renderer))?;
            let pages = bridge.wait_loaded().await?;
            if !self.is_current(run.seq) {
                return Ok(None);
            }
            debug!("Extracting {} pages from {}", pages, file.source_uri());
            let text = bridge.extract_all().await?;
            Ok::<_, ScanError>(Some(ScanItem::new(text, file.source_uri(), ScanType::Document)))
        }
        .await;
        self.finish(run, result)
    }

    /// The user dismissed the flow: back to `Idle` now, whatever is in flight.
    pub fn cancel(&self) {
        let cancelled = self.active.swap(0, Ordering::SeqCst);
        if cancelled != 0 {
            info!("Run {} cancelled", cancelled);
        }
        self.camera.reset();
        self.set_state(PipelineState::Idle);
    }

    /// Dismiss a `Completed` or `Failed` result.
    pub fn acknowledge(&self) {
        let changed = self.state.send_if_modified(|state| {
            if state.is_terminal() {
                *state = PipelineState::Idle;
                true
            } else {
                false
            }
        });
        if changed {
            self.observer.on_state_change(&PipelineState::Idle);
        }
    }

    // ── Internals ────────────────────────────────────────────────────────

    fn begin(&self, source: ScanType) -> Option<RunGuard<'_>> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        if self
            .active
            .compare_exchange(0, seq, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("Pipeline busy; ignoring {:?} request", source);
            return None;
        }
        info!("Run {} started ({:?})", seq, source);
        self.set_state(PipelineState::Acquiring(source));
        Some(RunGuard {
            orchestrator: self,
            seq,
            settled: false,
        })
    }

    fn is_current(&self, seq: u64) -> bool {
        self.active.load(Ordering::SeqCst) == seq
    }

    /// Move a still-current run to its next stage. `false` once the run has
    /// been cancelled; the caller must not start that stage.
    fn advance(&self, run: &RunGuard<'_>, next: PipelineState) -> bool {
        if !self.is_current(run.seq) {
            debug!("Run {} is stale; not entering {:?}", run.seq, next);
            return false;
        }
        self.set_state(next);
        true
    }

    fn finish(
        &self,
        mut run: RunGuard<'_>,
        result: Result<Option<ScanItem>, ScanError>,
    ) -> Result<RunOutcome, ScanError> {
        run.settled = true;
        if !self.is_current(run.seq) {
            match &result {
                Ok(Some(item)) => warn!("Discarding result of superseded run {} ({})", run.seq, item.id),
                Ok(None) => info!("Run {} stopped between stages", run.seq),
                Err(e) => warn!("Discarding error of superseded run {}: {}", run.seq, e),
            }
            return Ok(RunOutcome::Superseded);
        }

        match result {
            Ok(None) => {
                debug!("Run {} produced nothing", run.seq);
                self.set_state(PipelineState::Idle);
                Ok(RunOutcome::Superseded)
            }
            Ok(Some(item)) => {
                self.history.add(item.clone());
                self.observer.on_item_stored(&item);
                info!("Run {} completed: {} chars", run.seq, item.text.len());
                self.set_state(PipelineState::Completed(item.clone()));
                Ok(RunOutcome::Completed(item))
            }
            Err(e) if e.is_cancellation() => {
                debug!("Run {} cancelled by user", run.seq);
                self.set_state(PipelineState::Idle);
                Ok(RunOutcome::Cancelled)
            }
            Err(e) => {
                warn!("Run {} failed: {}", run.seq, e);
                if let Some(notification) = e.notification() {
                    self.observer.on_notification(&notification);
                }
                self.set_state(PipelineState::Failed(e.clone()));
                Err(e)
            }
        }
    }

    fn set_state(&self, next: PipelineState) {
        let prev = self.state.send_replace(next.clone());
        if prev != next {
            debug!("Pipeline state {:?} → {:?}", prev, next);
            self.observer.on_state_change(&next);
        }
    }
}

/// Releases the busy slot when a run ends, however it ends.
struct RunGuard<'a> {
    orchestrator: &'a PipelineOrchestrator,
    seq: u64,
    settled: bool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let released = self
            .orchestrator
            .active
            .compare_exchange(self.seq, 0, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        // A run future dropped mid-flight leaves nothing to acknowledge.
        if released && !self.settled {
            debug!("Run {} dropped before finishing", self.seq);
            self.orchestrator.set_state(PipelineState::Idle);
        }
    }
}
