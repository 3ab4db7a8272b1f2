//! End-to-end orchestrator scenarios with fake devices, services and renderer.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use uniscan::pipeline::camera::{CapturedFrame, PermissionStatus};
use uniscan::{
    CameraDevice, CropRect, DocumentAcquisition, FileCamera, HistoryStorage, ImageAcquisition,
    ImageRef, InMemoryHistory, NoContentResolver, Notification, PathPicker, PdfRenderer,
    PipelineObserver, PipelineOrchestrator, PipelineState, RenderError, RendererFactory,
    CaptureState, CaptureUi, ReviewDecision, RunOutcome, ScanError, ScanItem, ScanStatus,
    ScanType, ScriptedCaptureUi, ShutterAction, TextRecognizer,
};

// ── Fakes ────────────────────────────────────────────────────────────────────

/// Returns a fixed text; optionally waits for a permit first so a test can
/// hold a run "in flight".
struct FakeRecognizer {
    text: String,
    gate: Option<Arc<Semaphore>>,
    seen: Mutex<Vec<PathBuf>>,
}

impl FakeRecognizer {
    fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            gate: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    fn gated(text: &str, gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(text)
        }
    }
}

#[async_trait]
impl TextRecognizer for FakeRecognizer {
    async fn recognize(&self, image: &ImageRef) -> Result<String, ScanError> {
        self.seen.lock().unwrap().push(image.path.clone());
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.unwrap();
        }
        Ok(self.text.clone())
    }
}

/// Holds the shutter until a permit arrives, then captures.
struct GatedShutter {
    gate: Arc<Semaphore>,
}

#[async_trait]
impl CaptureUi for GatedShutter {
    async fn shutter(&self) -> ShutterAction {
        let _permit = self.gate.acquire().await.unwrap();
        ShutterAction::Capture
    }

    async fn review(&self, _image: &ImageRef) -> ReviewDecision {
        ReviewDecision::Use
    }
}

struct DeniedCamera;

#[async_trait]
impl CameraDevice for DeniedCamera {
    async fn request_permission(&self) -> PermissionStatus {
        PermissionStatus::Denied
    }

    async fn capture(&self) -> Result<CapturedFrame, ScanError> {
        unreachable!("capture without permission")
    }
}

/// Documents whose pages hold the given fragments.
struct MemoryRenderer {
    pages: Vec<Vec<&'static str>>,
}

struct MemoryDocument {
    pages: Vec<Vec<&'static str>>,
}

impl RendererFactory for MemoryRenderer {
    fn load(&self, bytes: Vec<u8>) -> Result<Box<dyn PdfRenderer>, RenderError> {
        if !bytes.starts_with(b"%PDF") {
            return Err(RenderError::new("missing %PDF header"));
        }
        Ok(Box::new(MemoryDocument {
            pages: self.pages.clone(),
        }))
    }
}

impl PdfRenderer for MemoryDocument {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_fragments(&self, index: usize) -> Result<Vec<String>, RenderError> {
        Ok(self.pages[index].iter().map(|s| s.to_string()).collect())
    }
}

#[derive(Default)]
struct RecordingObserver {
    states: Mutex<Vec<PipelineState>>,
    notifications: Mutex<Vec<Notification>>,
    stored: Mutex<Vec<ScanItem>>,
}

impl PipelineObserver for RecordingObserver {
    fn on_state_change(&self, state: &PipelineState) {
        self.states.lock().unwrap().push(state.clone());
    }

    fn on_notification(&self, notification: &Notification) {
        self.notifications.lock().unwrap().push(notification.clone());
    }

    fn on_item_stored(&self, item: &ScanItem) {
        self.stored.lock().unwrap().push(item.clone());
    }
}

// ── Fixture ──────────────────────────────────────────────────────────────────

struct Fixture {
    dir: tempfile::TempDir,
    history: Arc<InMemoryHistory>,
    observer: Arc<RecordingObserver>,
}

impl Fixture {
    fn new() -> Self {
        // RUST_LOG=uniscan=debug shows the run/state transitions of a failing test.
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        Self {
            dir: tempfile::tempdir().unwrap(),
            history: Arc::new(InMemoryHistory::new()),
            observer: Arc::new(RecordingObserver::default()),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn photo(&self) -> PathBuf {
        let path = self.path("page.png");
        image::RgbImage::from_pixel(16, 12, image::Rgb([250, 250, 250]))
            .save(&path)
            .unwrap();
        path
    }

    fn pdf(&self) -> PathBuf {
        let path = self.path("report.pdf");
        std::fs::write(&path, b"%PDF-1.7\n%fake\n").unwrap();
        path
    }

    fn orchestrator(
        &self,
        camera: Arc<dyn CameraDevice>,
        ui: ScriptedCaptureUi,
        picker: PathPicker,
        recognizer: Arc<dyn TextRecognizer>,
        renderer: Arc<dyn RendererFactory>,
    ) -> PipelineOrchestrator {
        let scratch = self.dir.path();
        PipelineOrchestrator::new(
            ImageAcquisition::new(camera, Arc::new(ui), scratch),
            DocumentAcquisition::new(Arc::new(picker), Arc::new(NoContentResolver), scratch, 5),
            recognizer,
            renderer,
            Arc::clone(&self.history) as Arc<dyn HistoryStorage>,
        )
        .with_observer(Arc::clone(&self.observer) as Arc<dyn PipelineObserver>)
    }

    fn camera_orchestrator(&self, ui: ScriptedCaptureUi, recognizer: Arc<dyn TextRecognizer>) -> PipelineOrchestrator {
        self.orchestrator(
            Arc::new(FileCamera::new(self.photo())),
            ui,
            PathPicker::dismissed(),
            recognizer,
            Arc::new(MemoryRenderer { pages: vec![] }),
        )
    }

    fn pdf_orchestrator(&self, pages: Vec<Vec<&'static str>>) -> PipelineOrchestrator {
        self.orchestrator(
            Arc::new(FileCamera::new(self.path("unused.png"))),
            ScriptedCaptureUi::new(),
            PathPicker::new(self.pdf().display().to_string()),
            Arc::new(FakeRecognizer::new("unused")),
            Arc::new(MemoryRenderer { pages }),
        )
    }
}

async fn wait_for_state(orch: &PipelineOrchestrator, want: PipelineState) {
    let mut rx = orch.subscribe();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| *s == want))
        .await
        .expect("state not reached in time")
        .unwrap();
}

fn in_dir(path: &Path, dir: &Path) -> bool {
    path.parent() == Some(dir)
}

// ── Camera ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn camera_scan_stores_completed_item_at_head() {
    let fx = Fixture::new();
    let earlier = ScanItem::new("older", "file:///old.jpg", ScanType::Camera);
    fx.history.add(earlier.clone());
    let orch = fx.camera_orchestrator(
        ScriptedCaptureUi::new(),
        Arc::new(FakeRecognizer::new("Invoice #123\nTotal: $40")),
    );

    let RunOutcome::Completed(item) = orch.scan_camera().await.unwrap() else {
        panic!("expected a completed run");
    };
    assert_eq!(item.scan_type, ScanType::Camera);
    assert_eq!(item.status, ScanStatus::Completed);
    assert_eq!(item.text, "Invoice #123\nTotal: $40");
    assert_eq!(item.title, "Camera Scan");
    assert!(item.uri.starts_with("file://"));

    assert_eq!(fx.history.list(), vec![item.clone(), earlier]);
    assert_eq!(
        *fx.observer.states.lock().unwrap(),
        vec![
            PipelineState::Acquiring(ScanType::Camera),
            PipelineState::Processing(ScanType::Camera),
            PipelineState::Completed(item.clone()),
        ]
    );
    assert_eq!(*fx.observer.stored.lock().unwrap(), vec![item]);
    assert!(fx.observer.notifications.lock().unwrap().is_empty());
}

#[tokio::test]
async fn declined_crop_forwards_original_capture() {
    let fx = Fixture::new();
    let recognizer = Arc::new(FakeRecognizer::new("text"));
    let orch = fx.camera_orchestrator(
        ScriptedCaptureUi::new().with_review([ReviewDecision::Use]),
        recognizer.clone(),
    );

    orch.scan_camera().await.unwrap();
    let seen = recognizer.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    let name = seen[0].file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("capture-"), "{name}");
}

#[tokio::test]
async fn failed_crop_is_reported_and_review_continues() {
    let fx = Fixture::new();
    let recognizer = Arc::new(FakeRecognizer::new("text"));
    let ui = Arc::new(ScriptedCaptureUi::new().with_review([
        ReviewDecision::Crop(CropRect { x: 10, y: 10, width: 100, height: 100 }),
        ReviewDecision::Crop(CropRect { x: 2, y: 2, width: 8, height: 6 }),
    ]));
    let orch = PipelineOrchestrator::new(
        ImageAcquisition::new(Arc::new(FileCamera::new(fx.photo())), ui.clone(), fx.dir.path()),
        DocumentAcquisition::new(
            Arc::new(PathPicker::dismissed()),
            Arc::new(NoContentResolver),
            fx.dir.path(),
            5,
        ),
        recognizer.clone(),
        Arc::new(MemoryRenderer { pages: vec![] }),
        fx.history.clone(),
    );

    assert!(matches!(orch.scan_camera().await, Ok(RunOutcome::Completed(_))));

    let reported = ui.reported_errors();
    assert_eq!(reported.len(), 1);
    assert!(matches!(reported[0], ScanError::CaptureError { .. }));

    let seen = recognizer.seen.lock().unwrap().clone();
    let cropped = &seen[0];
    assert!(in_dir(cropped, fx.dir.path()));
    assert_eq!(image::image_dimensions(cropped).unwrap(), (8, 6));
}

#[tokio::test]
async fn dismissing_the_camera_returns_to_idle_silently() {
    let fx = Fixture::new();
    let orch = fx.camera_orchestrator(
        ScriptedCaptureUi::new().with_shutter([ShutterAction::Cancel]),
        Arc::new(FakeRecognizer::new("never")),
    );

    assert_eq!(orch.scan_camera().await, Ok(RunOutcome::Cancelled));
    assert_eq!(orch.state(), PipelineState::Idle);
    assert!(fx.history.is_empty());
    assert!(fx.observer.notifications.lock().unwrap().is_empty());
    assert!(!orch.is_busy());
}

#[tokio::test]
async fn refused_permission_fails_with_one_notification() {
    let fx = Fixture::new();
    let orch = fx.orchestrator(
        Arc::new(DeniedCamera),
        ScriptedCaptureUi::new(),
        PathPicker::dismissed(),
        Arc::new(FakeRecognizer::new("never")),
        Arc::new(MemoryRenderer { pages: vec![] }),
    );

    let err = orch.scan_camera().await.unwrap_err();
    assert!(matches!(err, ScanError::PermissionDenied { .. }));
    assert_eq!(orch.state(), PipelineState::Failed(err));
    assert!(fx.history.is_empty());

    let notifications = fx.observer.notifications.lock().unwrap().clone();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].title, "Permission Denied");

    orch.acknowledge();
    assert_eq!(orch.state(), PipelineState::Idle);
}

// ── Busy flag and stale runs ─────────────────────────────────────────────────

#[tokio::test]
async fn second_start_while_busy_is_rejected() {
    let fx = Fixture::new();
    let gate = Arc::new(Semaphore::new(0));
    let orch = Arc::new(fx.camera_orchestrator(
        ScriptedCaptureUi::new(),
        Arc::new(FakeRecognizer::gated("first", gate.clone())),
    ));

    let running = tokio::spawn({
        let orch = Arc::clone(&orch);
        async move { orch.scan_camera().await }
    });
    wait_for_state(&orch, PipelineState::Processing(ScanType::Camera)).await;

    assert!(orch.is_busy());
    assert_eq!(orch.import_pdf().await, Ok(RunOutcome::Busy));
    assert_eq!(orch.state(), PipelineState::Processing(ScanType::Camera));

    gate.add_permits(1);
    let outcome = running.await.unwrap().unwrap();
    assert!(matches!(outcome, RunOutcome::Completed(ref item) if item.text == "first"));
    assert_eq!(fx.history.len(), 1);
}

#[tokio::test]
async fn cancelled_run_result_is_discarded() {
    let fx = Fixture::new();
    let gate = Arc::new(Semaphore::new(0));
    let orch = Arc::new(fx.camera_orchestrator(
        ScriptedCaptureUi::new(),
        Arc::new(FakeRecognizer::gated("late", gate.clone())),
    ));

    let stale = tokio::spawn({
        let orch = Arc::clone(&orch);
        async move { orch.scan_camera().await }
    });
    wait_for_state(&orch, PipelineState::Processing(ScanType::Camera)).await;

    orch.cancel();
    assert_eq!(orch.state(), PipelineState::Idle);
    assert!(!orch.is_busy());

    gate.add_permits(1);
    assert_eq!(stale.await.unwrap(), Ok(RunOutcome::Superseded));
    assert_eq!(orch.state(), PipelineState::Idle);
    assert!(fx.history.is_empty());
    assert!(fx.observer.stored.lock().unwrap().is_empty());
}

#[tokio::test]
async fn restart_after_cancel_wins_over_stale_run() {
    let fx = Fixture::new();
    let gate = Arc::new(Semaphore::new(0));
    let orch = Arc::new(fx.camera_orchestrator(
        ScriptedCaptureUi::new(),
        Arc::new(FakeRecognizer::gated("text", gate.clone())),
    ));

    let stale = tokio::spawn({
        let orch = Arc::clone(&orch);
        async move { orch.scan_camera().await }
    });
    wait_for_state(&orch, PipelineState::Processing(ScanType::Camera)).await;
    orch.cancel();

    let fresh = tokio::spawn({
        let orch = Arc::clone(&orch);
        async move { orch.scan_camera().await }
    });
    wait_for_state(&orch, PipelineState::Processing(ScanType::Camera)).await;

    gate.add_permits(2);
    assert_eq!(stale.await.unwrap(), Ok(RunOutcome::Superseded));
    let fresh = fresh.await.unwrap().unwrap();
    let RunOutcome::Completed(item) = fresh else {
        panic!("expected the restarted run to complete");
    };
    assert_eq!(fx.history.list(), vec![item.clone()]);
    assert_eq!(orch.state(), PipelineState::Completed(item));
    assert!(!orch.is_busy());
}

// ── PDF ──────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn pdf_import_extracts_pages_in_order() {
    let fx = Fixture::new();
    let orch = fx.pdf_orchestrator(vec![vec!["Intro"], vec!["Body", " text "], vec!["Conclusion"]]);

    let RunOutcome::Completed(item) = orch.import_pdf().await.unwrap() else {
        panic!("expected a completed run");
    };
    assert_eq!(item.text, "Intro\n\nBody text\n\nConclusion");
    assert_eq!(item.scan_type, ScanType::Document);
    assert_eq!(item.title, "Imported PDF");
    assert_eq!(item.uri, fx.path("report.pdf").display().to_string());
    assert_eq!(fx.history.list(), vec![item]);
}

#[tokio::test]
async fn blank_pdf_fails_with_no_text_found() {
    let fx = Fixture::new();
    let orch = fx.pdf_orchestrator(vec![vec!["   "], vec![]]);

    assert_eq!(orch.import_pdf().await, Err(ScanError::NoTextFound));
    assert_eq!(orch.state(), PipelineState::Failed(ScanError::NoTextFound));
    assert!(fx.history.is_empty());
    assert_eq!(fx.observer.notifications.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn missing_pdf_fails_with_file_not_found() {
    let fx = Fixture::new();
    let orch = fx.orchestrator(
        Arc::new(FileCamera::new(fx.path("unused.png"))),
        ScriptedCaptureUi::new(),
        PathPicker::new(fx.path("gone.pdf").display().to_string()),
        Arc::new(FakeRecognizer::new("unused")),
        Arc::new(MemoryRenderer { pages: vec![vec!["x"]] }),
    );

    assert!(matches!(
        orch.import_pdf().await,
        Err(ScanError::FileNotFound { .. })
    ));
    assert!(fx.history.is_empty());
}

#[tokio::test]
async fn unreadable_document_is_an_extraction_error() {
    let fx = Fixture::new();
    let not_pdf = fx.path("notes.pdf");
    std::fs::write(&not_pdf, b"plain text").unwrap();
    let orch = fx.orchestrator(
        Arc::new(FileCamera::new(fx.path("unused.png"))),
        ScriptedCaptureUi::new(),
        PathPicker::new(not_pdf.display().to_string()),
        Arc::new(FakeRecognizer::new("unused")),
        Arc::new(MemoryRenderer { pages: vec![vec!["x"]] }),
    );

    let err = orch.import_pdf().await.unwrap_err();
    assert!(matches!(err, ScanError::ExtractionError { .. }));
    assert!(err.to_string().contains("missing %PDF header"));
}

// ── Image import and state stream ────────────────────────────────────────────

#[tokio::test]
async fn image_import_is_typed_image() {
    let fx = Fixture::new();
    let orch = fx.camera_orchestrator(ScriptedCaptureUi::new(), Arc::new(FakeRecognizer::new("hello")));

    let outcome = orch.import_image(ImageRef::new(fx.photo())).await.unwrap();
    let RunOutcome::Completed(item) = outcome else {
        panic!("expected a completed run");
    };
    assert_eq!(item.scan_type, ScanType::Image);
    assert_eq!(item.title, "Camera Scan");
}

#[tokio::test]
async fn state_stream_starts_with_current_state() {
    use futures::StreamExt;

    let fx = Fixture::new();
    let orch = fx.camera_orchestrator(ScriptedCaptureUi::new(), Arc::new(FakeRecognizer::new("hello")));

    let mut stream = orch.state_stream();
    assert_eq!(stream.next().await, Some(PipelineState::Idle));

    orch.scan_camera().await.unwrap();
    let latest = stream.next().await.unwrap();
    assert!(matches!(latest, PipelineState::Completed(_)));
}

#[tokio::test]
async fn cancel_during_capture_never_reaches_recognition() {
    let fx = Fixture::new();
    let shutter = Arc::new(Semaphore::new(0));
    let recognizer = Arc::new(FakeRecognizer::new("never"));
    let orch = Arc::new(PipelineOrchestrator::new(
        ImageAcquisition::new(
            Arc::new(FileCamera::new(fx.photo())),
            Arc::new(GatedShutter { gate: shutter.clone() }),
            fx.dir.path(),
        ),
        DocumentAcquisition::new(
            Arc::new(PathPicker::dismissed()),
            Arc::new(NoContentResolver),
            fx.dir.path(),
            5,
        ),
        Arc::clone(&recognizer) as Arc<dyn TextRecognizer>,
        Arc::new(MemoryRenderer { pages: vec![] }),
        Arc::clone(&fx.history) as Arc<dyn HistoryStorage>,
    ));

    let stale = tokio::spawn({
        let orch = Arc::clone(&orch);
        async move { orch.scan_camera().await }
    });
    wait_for_state(&orch, PipelineState::Acquiring(ScanType::Camera)).await;
    let mut capture = orch.camera().subscribe();
    tokio::time::timeout(
        Duration::from_secs(5),
        capture.wait_for(|s| *s == CaptureState::Live),
    )
    .await
    .unwrap()
    .unwrap();

    orch.cancel();
    assert_eq!(orch.camera().state(), CaptureState::Idle);
    assert_eq!(orch.state(), PipelineState::Idle);

    shutter.add_permits(1);
    assert_eq!(stale.await.unwrap(), Ok(RunOutcome::Superseded));
    assert!(recognizer.seen.lock().unwrap().is_empty());
    assert_eq!(orch.state(), PipelineState::Idle);
    assert!(fx.history.is_empty());
}
