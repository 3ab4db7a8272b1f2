//! Image acquisition: camera permission, capture, optional crop.
//!
//! The stage walks a small state machine and publishes every transition on a
//! `watch` channel so a UI can mirror it:
//!
//! ```text
//! Idle ─▶ PermissionPending ─▶ Live ─▶ Captured ─┬──────────────────────▶ Confirmed
//!                               ▲          │     └▶ Cropping ─▶ Cropped ─▶ Confirmed
//!                               └─ retake ─┘
//! ```
//!
//! Cancelling at any prompt returns to `Idle` with [`ScanError::UserCancelled`].
//! A failed crop is reported through [`CaptureUi::report_error`] and the
//! flow goes back to `Captured` so the user can try again.
//!
//! Hardware and user interaction sit behind the [`CameraDevice`] and
//! [`CaptureUi`] traits; [`FileCamera`] and [`ScriptedCaptureUi`] are the
//! implementations used by the CLI and the tests.

use crate::error::ScanError;
use async_trait::async_trait;
use image::{GenericImageView, ImageFormat};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

// ── Types ────────────────────────────────────────────────────────────────

/// Where the capture flow currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaptureState {
    Idle,
    PermissionPending,
    Live,
    Captured,
    Cropping,
    Cropped,
    Confirmed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

/// Encoded image bytes straight from the sensor.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutterAction {
    Capture,
    Cancel,
}

/// What the user chose after looking at a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewDecision {
    Use,
    Retake,
    Crop(CropRect),
    Cancel,
}

/// Pixel rectangle to keep, origin at the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for CropRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}+{}+{}", self.width, self.height, self.x, self.y)
    }
}

impl FromStr for CropRect {
    type Err = String;

    /// Parse `x,y,width,height`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<u32> = s
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<u32>()
                    .map_err(|_| format!("invalid crop value '{}'", p.trim()))
            })
            .collect::<Result<_, _>>()?;
        match parts.as_slice() {
            [x, y, width, height] => Ok(CropRect {
                x: *x,
                y: *y,
                width: *width,
                height: *height,
            }),
            _ => Err(format!("expected x,y,width,height, got '{s}'")),
        }
    }
}

/// A confirmed image on local storage.
///
/// The file is left on disk; whoever holds the reference decides when to
/// delete it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub path: PathBuf,
}

impl ImageRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `file://` URI of the image.
    pub fn uri(&self) -> String {
        Url::from_file_path(&self.path)
            .map(String::from)
            .unwrap_or_else(|_| format!("file://{}", self.path.display()))
    }
}

// ── Collaborators ────────────────────────────────────────────────────────

/// Camera hardware.
#[async_trait]
pub trait CameraDevice: Send + Sync {
    async fn request_permission(&self) -> PermissionStatus;

    async fn capture(&self) -> Result<CapturedFrame, ScanError>;
}

/// The user's side of the capture flow.
#[async_trait]
pub trait CaptureUi: Send + Sync {
    /// Wait for the shutter press (or for the camera view to be closed).
    async fn shutter(&self) -> ShutterAction;

    /// Show the capture and ask what to do with it.
    async fn review(&self, image: &ImageRef) -> ReviewDecision;

    /// A non-fatal failure the user should see before reviewing again.
    fn report_error(&self, error: &ScanError) {
        let _ = error;
    }
}

// ── Stage ────────────────────────────────────────────────────────────────

/// Drives one capture per [`ImageAcquisition::acquire`] call.
pub struct ImageAcquisition {
    device: Arc<dyn CameraDevice>,
    ui: Arc<dyn CaptureUi>,
    scratch_dir: PathBuf,
    state: watch::Sender<CaptureState>,
}

impl ImageAcquisition {
    pub fn new(
        device: Arc<dyn CameraDevice>,
        ui: Arc<dyn CaptureUi>,
        scratch_dir: impl Into<PathBuf>,
    ) -> Self {
        let (state, _) = watch::channel(CaptureState::Idle);
        Self {
            device,
            ui,
            scratch_dir: scratch_dir.into(),
            state,
        }
    }

    pub fn state(&self) -> CaptureState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<CaptureState> {
        self.state.subscribe()
    }

    /// The flow was dismissed from outside the capture UI.
    pub fn reset(&self) {
        self.set(CaptureState::Idle);
    }

    /// Run the capture flow until an image is confirmed.
    ///
    /// # Errors
    /// - [`ScanError::PermissionDenied`] — camera permission refused
    /// - [`ScanError::CaptureError`] — the device failed or the frame could not be stored
    /// - [`ScanError::UserCancelled`] — the user closed the flow
    pub async fn acquire(&self) -> Result<ImageRef, ScanError> {
        let result = self.run().await;
        if let Err(ref e) = result {
            debug!("Capture ended without an image: {}", e);
            self.set(CaptureState::Idle);
        }
        result
    }

    async fn run(&self) -> Result<ImageRef, ScanError> {
        self.set(CaptureState::PermissionPending);
        if self.device.request_permission().await == PermissionStatus::Denied {
            return Err(ScanError::PermissionDenied {
                resource: "camera".into(),
            });
        }

        loop {
            self.set(CaptureState::Live);
            if self.ui.shutter().await == ShutterAction::Cancel {
                return Err(ScanError::UserCancelled);
            }

            let frame = self.device.capture().await?;
            let captured = store_frame(&frame.bytes, &self.scratch_dir).await?;
            info!("Captured {} bytes → {}", frame.bytes.len(), captured.path.display());
            self.set(CaptureState::Captured);

            if let Some(confirmed) = self.review(captured).await? {
                self.set(CaptureState::Confirmed);
                return Ok(confirmed);
            }
        }
    }

    /// `Ok(None)` means "retake".
    async fn review(&self, captured: ImageRef) -> Result<Option<ImageRef>, ScanError> {
        loop {
            match self.ui.review(&captured).await {
                ReviewDecision::Use => return Ok(Some(captured)),
                ReviewDecision::Retake => {
                    discard(&captured).await;
                    return Ok(None);
                }
                ReviewDecision::Cancel => {
                    discard(&captured).await;
                    return Err(ScanError::UserCancelled);
                }
                ReviewDecision::Crop(rect) => {
                    self.set(CaptureState::Cropping);
                    match crop_image(&captured, rect, &self.scratch_dir).await {
                        Ok(cropped) => {
                            self.set(CaptureState::Cropped);
                            discard(&captured).await;
                            return Ok(Some(cropped));
                        }
                        Err(e) => {
                            warn!("Crop {} failed: {}", rect, e);
                            self.ui.report_error(&e);
                            self.set(CaptureState::Captured);
                        }
                    }
                }
            }
        }
    }

    fn set(&self, next: CaptureState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!("Capture state {:?} → {:?}", prev, next);
        }
    }
}

/// Create an empty, persistent scratch file `<prefix>XXXX.<ext>` in `dir`.
pub(crate) fn keep_scratch_file(dir: &Path, prefix: &str, ext: &str) -> std::io::Result<PathBuf> {
    tempfile::Builder::new()
        .prefix(prefix)
        .suffix(&format!(".{ext}"))
        .tempfile_in(dir)?
        .into_temp_path()
        .keep()
        .map_err(|e| e.error)
}

async fn store_frame(bytes: &[u8], dir: &Path) -> Result<ImageRef, ScanError> {
    let format = image::guess_format(bytes)
        .map_err(|e| ScanError::capture(format!("unrecognised image data: {e}")))?;
    let ext = format.extensions_str().first().copied().unwrap_or("img");

    let path = keep_scratch_file(dir, "capture-", ext)
        .map_err(|e| ScanError::capture(format!("cannot create capture file: {e}")))?;
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| ScanError::capture(format!("cannot write {}: {e}", path.display())))?;
    Ok(ImageRef::new(path))
}

async fn discard(image: &ImageRef) {
    if let Err(e) = tokio::fs::remove_file(&image.path).await {
        debug!("Could not remove {}: {}", image.path.display(), e);
    }
}

/// Crop `source` into a new scratch file of the same format.
///
/// Decoding and re-encoding are CPU-bound, so they run on the blocking pool.
pub async fn crop_image(source: &ImageRef, rect: CropRect, dir: &Path) -> Result<ImageRef, ScanError> {
    let src = source.path.clone();
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || crop_blocking(&src, rect, &dir))
        .await
        .map_err(|e| ScanError::capture(format!("crop task panicked: {e}")))?
}

fn crop_blocking(src: &Path, rect: CropRect, dir: &Path) -> Result<ImageRef, ScanError> {
    let img = image::open(src)
        .map_err(|e| ScanError::capture(format!("cannot decode {}: {e}", src.display())))?;
    let (w, h) = img.dimensions();

    let fits = rect.width > 0
        && rect.height > 0
        && rect.x.checked_add(rect.width).is_some_and(|r| r <= w)
        && rect.y.checked_add(rect.height).is_some_and(|b| b <= h);
    if !fits {
        return Err(ScanError::capture(format!(
            "crop {rect} does not fit a {w}x{h} image"
        )));
    }

    let cropped = img.crop_imm(rect.x, rect.y, rect.width, rect.height);
    let format = ImageFormat::from_path(src).unwrap_or(ImageFormat::Png);
    let ext = format.extensions_str().first().copied().unwrap_or("png");
    let path = keep_scratch_file(dir, "crop-", ext)
        .map_err(|e| ScanError::capture(format!("cannot create crop file: {e}")))?;
    cropped
        .save_with_format(&path, format)
        .map_err(|e| ScanError::capture(format!("cannot encode crop: {e}")))?;

    debug!("Cropped {} to {} → {}", src.display(), rect, path.display());
    Ok(ImageRef::new(path))
}

// ── Bundled implementations ──────────────────────────────────────────────

/// A still-image "sensor": every capture returns the bytes of one file.
#[derive(Debug, Clone)]
pub struct FileCamera {
    source: PathBuf,
}

impl FileCamera {
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

#[async_trait]
impl CameraDevice for FileCamera {
    async fn request_permission(&self) -> PermissionStatus {
        match tokio::fs::File::open(&self.source).await {
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => PermissionStatus::Denied,
            _ => PermissionStatus::Granted,
        }
    }

    async fn capture(&self) -> Result<CapturedFrame, ScanError> {
        let bytes = tokio::fs::read(&self.source).await.map_err(|e| {
            ScanError::capture(format!("cannot read {}: {e}", self.source.display()))
        })?;
        Ok(CapturedFrame { bytes })
    }
}

/// Replays pre-programmed answers. Once a script runs dry the UI presses the
/// shutter and accepts the capture.
#[derive(Debug, Default)]
pub struct ScriptedCaptureUi {
    shutter: Mutex<VecDeque<ShutterAction>>,
    review: Mutex<VecDeque<ReviewDecision>>,
    reported: Mutex<Vec<ScanError>>,
}

impl ScriptedCaptureUi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shutter(self, actions: impl IntoIterator<Item = ShutterAction>) -> Self {
        lock(&self.shutter).extend(actions);
        self
    }

    pub fn with_review(self, decisions: impl IntoIterator<Item = ReviewDecision>) -> Self {
        lock(&self.review).extend(decisions);
        self
    }

    /// Errors passed to [`CaptureUi::report_error`], oldest first.
    pub fn reported_errors(&self) -> Vec<ScanError> {
        lock(&self.reported).clone()
    }
}

#[async_trait]
impl CaptureUi for ScriptedCaptureUi {
    async fn shutter(&self) -> ShutterAction {
        lock(&self.shutter)
            .pop_front()
            .unwrap_or(ShutterAction::Capture)
    }

    async fn review(&self, _image: &ImageRef) -> ReviewDecision {
        lock(&self.review).pop_front().unwrap_or(ReviewDecision::Use)
    }

    fn report_error(&self, error: &ScanError) {
        lock(&self.reported).push(error.clone());
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(w, h, Rgb([200, 10, 10]));
        let mut buf = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    struct DenyingCamera;

    #[async_trait]
    impl CameraDevice for DenyingCamera {
        async fn request_permission(&self) -> PermissionStatus {
            PermissionStatus::Denied
        }
        async fn capture(&self) -> Result<CapturedFrame, ScanError> {
            unreachable!("capture must not run without permission")
        }
    }

    struct BrokenCamera;

    #[async_trait]
    impl CameraDevice for BrokenCamera {
        async fn request_permission(&self) -> PermissionStatus {
            PermissionStatus::Granted
        }
        async fn capture(&self) -> Result<CapturedFrame, ScanError> {
            Err(ScanError::capture("sensor timeout"))
        }
    }

    fn file_camera(dir: &Path, w: u32, h: u32) -> Arc<FileCamera> {
        let src = dir.join("sensor.png");
        std::fs::write(&src, png_bytes(w, h)).unwrap();
        Arc::new(FileCamera::new(src))
    }

    #[test]
    fn crop_rect_parses() {
        let r: CropRect = "10, 20,30,40".parse().unwrap();
        assert_eq!(
            r,
            CropRect {
                x: 10,
                y: 20,
                width: 30,
                height: 40
            }
        );
        assert!("1,2,3".parse::<CropRect>().is_err());
        assert!("a,b,c,d".parse::<CropRect>().is_err());
    }

    #[test]
    fn image_uri_is_file_url() {
        let r = ImageRef::new("/tmp/capture 1.jpg");
        assert_eq!(r.uri(), "file:///tmp/capture%201.jpg");
    }

    #[test]
    fn reset_returns_to_idle_from_any_state() {
        let dir = tempfile::tempdir().unwrap();
        let stage = ImageAcquisition::new(
            Arc::new(FileCamera::new(dir.path().join("frame.png"))),
            Arc::new(ScriptedCaptureUi::new()),
            dir.path(),
        );
        stage.set(CaptureState::Captured);
        stage.reset();
        assert_eq!(stage.state(), CaptureState::Idle);
    }

    #[tokio::test]
    async fn confirmed_capture_is_written_to_scratch_dir() {
        let dir = tempfile::tempdir().unwrap();
        let ui = Arc::new(ScriptedCaptureUi::new());
        let stage = ImageAcquisition::new(file_camera(dir.path(), 8, 8), ui, dir.path());

        let image = stage.acquire().await.expect("capture should succeed");
        assert!(image.path.exists());
        assert_eq!(image.path.extension().and_then(|e| e.to_str()), Some("png"));
        assert_eq!(stage.state(), CaptureState::Confirmed);
    }

    #[tokio::test]
    async fn denied_permission_returns_to_idle() {
        let dir = tempfile::tempdir().unwrap();
        let stage = ImageAcquisition::new(
            Arc::new(DenyingCamera),
            Arc::new(ScriptedCaptureUi::new()),
            dir.path(),
        );
        let err = stage.acquire().await.unwrap_err();
        assert!(matches!(err, ScanError::PermissionDenied { .. }));
        assert_eq!(stage.state(), CaptureState::Idle);
    }

    #[tokio::test]
    async fn device_failure_is_capture_error() {
        let dir = tempfile::tempdir().unwrap();
        let stage = ImageAcquisition::new(
            Arc::new(BrokenCamera),
            Arc::new(ScriptedCaptureUi::new()),
            dir.path(),
        );
        let err = stage.acquire().await.unwrap_err();
        assert_eq!(err, ScanError::capture("sensor timeout"));
    }

    #[tokio::test]
    async fn closing_the_camera_cancels() {
        let dir = tempfile::tempdir().unwrap();
        let ui = Arc::new(ScriptedCaptureUi::new().with_shutter([ShutterAction::Cancel]));
        let stage = ImageAcquisition::new(file_camera(dir.path(), 4, 4), ui, dir.path());

        let err = stage.acquire().await.unwrap_err();
        assert!(err.is_cancellation());
        assert_eq!(stage.state(), CaptureState::Idle);
    }

    #[tokio::test]
    async fn retake_discards_first_capture() {
        let dir = tempfile::tempdir().unwrap();
        let ui = Arc::new(
            ScriptedCaptureUi::new().with_review([ReviewDecision::Retake, ReviewDecision::Use]),
        );
        let stage = ImageAcquisition::new(file_camera(dir.path(), 4, 4), ui, dir.path());

        let image = stage.acquire().await.unwrap();
        let captures: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("capture-"))
            .collect();
        assert_eq!(captures.len(), 1);
        assert_eq!(captures[0].path(), image.path);
    }

    #[tokio::test]
    async fn crop_produces_smaller_image() {
        let dir = tempfile::tempdir().unwrap();
        let rect = CropRect {
            x: 2,
            y: 2,
            width: 5,
            height: 3,
        };
        let ui = Arc::new(ScriptedCaptureUi::new().with_review([ReviewDecision::Crop(rect)]));
        let stage = ImageAcquisition::new(file_camera(dir.path(), 10, 10), ui, dir.path());

        let image = stage.acquire().await.unwrap();
        let decoded = image::open(&image.path).unwrap();
        assert_eq!(decoded.dimensions(), (5, 3));
        assert_eq!(stage.state(), CaptureState::Confirmed);
    }

    #[tokio::test]
    async fn failed_crop_is_reported_and_review_continues() {
        let dir = tempfile::tempdir().unwrap();
        let too_big = CropRect {
            x: 0,
            y: 0,
            width: 50,
            height: 50,
        };
        let ui = Arc::new(
            ScriptedCaptureUi::new()
                .with_review([ReviewDecision::Crop(too_big), ReviewDecision::Use]),
        );
        let stage = ImageAcquisition::new(file_camera(dir.path(), 10, 10), ui.clone(), dir.path());
        let mut states = stage.subscribe();

        let image = stage.acquire().await.expect("second review accepts the original");
        assert_eq!(image::open(&image.path).unwrap().dimensions(), (10, 10));

        let reported = ui.reported_errors();
        assert_eq!(reported.len(), 1);
        assert!(matches!(reported[0], ScanError::CaptureError { .. }));
        assert!(states.has_changed().unwrap());
        assert_eq!(*states.borrow_and_update(), CaptureState::Confirmed);
    }

    #[tokio::test]
    async fn non_image_frame_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("noise.bin");
        std::fs::write(&src, b"definitely not an image").unwrap();
        let stage = ImageAcquisition::new(
            Arc::new(FileCamera::new(src)),
            Arc::new(ScriptedCaptureUi::new()),
            dir.path(),
        );
        assert!(matches!(
            stage.acquire().await,
            Err(ScanError::CaptureError { .. })
        ));
    }
}
