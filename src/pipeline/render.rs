//! PDF page text source: the seam between the extraction sandbox and pdfium.
//!
//! The sandbox never talks to pdfium directly. It asks a [`RendererFactory`]
//! to open the document bytes and then pulls text fragments page by page
//! through [`PdfRenderer`]. Tests substitute an in-memory factory; production
//! uses [`PdfiumRendererFactory`].
//!
//! ## Threading
//!
//! pdfium is not safe to call from async contexts. Every method here is
//! synchronous and is only ever invoked on the sandbox's blocking thread, so
//! a loaded document never needs to be `Send`. The pdfium bindings are not
//! `Send` either: each blocking thread binds its own copy on first use and
//! keeps it for the rest of the thread's life.

use once_cell::unsync::OnceCell;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// A load or page-level failure inside the renderer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct RenderError(pub String);

impl RenderError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self(detail.into())
    }
}

/// An opened document.
pub trait PdfRenderer {
    fn page_count(&self) -> usize;

    /// Text fragments of the page at 0-based `index`, in reading order.
    fn page_fragments(&self, index: usize) -> Result<Vec<String>, RenderError>;
}

/// Opens documents from raw bytes. Shared by every sandbox the host starts.
pub trait RendererFactory: Send + Sync + 'static {
    fn load(&self, bytes: Vec<u8>) -> Result<Box<dyn PdfRenderer>, RenderError>;
}

// ── pdfium ───────────────────────────────────────────────────────────────

thread_local! {
    static PDFIUM: OnceCell<&'static Pdfium> = const { OnceCell::new() };
}

/// Binds pdfium on the calling thread and opens documents with it.
///
/// `library_path` may name the shared library itself or the directory that
/// contains it. Without a path the system library is used. A failed bind is
/// not cached, so a later load retries it.
#[derive(Debug, Clone, Default)]
pub struct PdfiumRendererFactory {
    library_path: Option<PathBuf>,
}

impl PdfiumRendererFactory {
    pub fn new(library_path: Option<PathBuf>) -> Self {
        Self { library_path }
    }

    fn pdfium(&self) -> Result<&'static Pdfium, RenderError> {
        PDFIUM.with(|cell| {
            cell.get_or_try_init(|| {
                let bindings = match &self.library_path {
                    Some(path) => Pdfium::bind_to_library(library_file(path)),
                    None => Pdfium::bind_to_system_library(),
                }
                .map_err(|e| RenderError(format!("cannot bind pdfium: {e:?}")))?;
                info!("pdfium bound on {:?}", std::thread::current().id());
                let pdfium: &'static Pdfium = Box::leak(Box::new(Pdfium::new(bindings)));
                Ok(pdfium)
            })
            .copied()
        })
    }
}

fn library_file(path: &Path) -> PathBuf {
    if path.is_dir() {
        path.join(Pdfium::pdfium_platform_library_name())
    } else {
        path.to_path_buf()
    }
}

impl RendererFactory for PdfiumRendererFactory {
    fn load(&self, bytes: Vec<u8>) -> Result<Box<dyn PdfRenderer>, RenderError> {
        let pdfium = self.pdfium()?;
        let size = bytes.len();
        let document = pdfium
            .load_pdf_from_byte_vec(bytes, None)
            .map_err(|e| RenderError(format!("cannot open PDF: {e:?}")))?;
        let page_count = document.pages().len() as usize;
        debug!("PDF loaded from {} bytes: {} pages", size, page_count);
        Ok(Box::new(PdfiumDocument {
            document,
            page_count,
        }))
    }
}

struct PdfiumDocument {
    document: PdfDocument<'static>,
    page_count: usize,
}

impl PdfRenderer for PdfiumDocument {
    fn page_count(&self) -> usize {
        self.page_count
    }

    fn page_fragments(&self, index: usize) -> Result<Vec<String>, RenderError> {
        let page_index = u16::try_from(index)
            .map_err(|_| RenderError(format!("page index {index} out of range")))?;
        let page = self
            .document
            .pages()
            .get(page_index)
            .map_err(|e| RenderError(format!("{e:?}")))?;
        let text = page
            .text()
            .map_err(|e| RenderError(format!("no text layer: {e:?}")))?;
        Ok(text.segments().iter().map(|segment| segment.text()).collect())
    }
}
