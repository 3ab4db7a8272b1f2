//! Pipeline stages for capture-to-text extraction.
//!
//! Each submodule implements one stage behind a trait seam, so every stage
//! can be tested alone and the orchestrator never depends on a concrete
//! device, service or renderer.
//!
//! ## Data Flow
//!
//! ```text
//! camera ───▶ encode ──▶ recognize ──┐
//! (capture)   (base64)   (vision)    ├──▶ text ──▶ translate (on demand)
//! document ─▶ encode ──▶ sandbox ────┘
//! (picker)    (base64)   (render)
//! ```
//!
//! 1. [`camera`]    — permission, capture, review and optional crop
//! 2. [`document`]  — pick a PDF and normalise its URI to a readable file
//! 3. [`encode`]    — base64 for both request bodies and sandbox messages
//! 4. [`recognize`] — cloud text detection on an image
//! 5. [`sandbox`]   — message-passing PDF text extraction; [`render`] is the
//!    pdfium seam it drives on a blocking thread
//! 6. [`translate`] — cloud translation, never fed back into recognition

pub mod camera;
pub mod document;
pub mod encode;
pub mod recognize;
pub mod render;
pub mod sandbox;
pub mod translate;
