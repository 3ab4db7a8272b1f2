//! Document acquisition: pick a PDF and normalise it to a readable local file.
//!
//! Pickers hand back references in several shapes. Everything downstream
//! (base64 encoding for the sandbox) needs a plain file-system path, so this
//! stage converts by scheme:
//!
//! | Reference | Handling |
//! |-----------|----------|
//! | `/plain/path.pdf` | used as is |
//! | `file:///…` | converted to a path (percent-decoded) |
//! | `http(s)://…` | downloaded into a temp file |
//! | anything else (`content://…`) | bytes read through a [`ContentResolver`], written to a temp file |
//!
//! Temp copies live in a [`TempPath`] owned by the returned [`FileRef`]:
//! they are deleted when the `FileRef` is dropped unless [`FileRef::keep`]
//! is called.

use crate::error::ScanError;
use async_trait::async_trait;
use reqwest::Url;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempPath;
use tracing::{debug, info};

/// What the platform picker returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickedDocument {
    /// Reference in whatever scheme the platform uses.
    pub uri: String,
    /// Display name, when the picker knows one.
    pub name: Option<String>,
}

/// Platform file picker restricted to PDF documents.
#[async_trait]
pub trait FilePicker: Send + Sync {
    /// # Errors
    /// [`ScanError::UserCancelled`] when dismissed, [`ScanError::PermissionDenied`]
    /// when storage access was refused.
    async fn pick_pdf(&self) -> Result<PickedDocument, ScanError>;
}

/// Reads opaque content handles that have no file-system path.
#[async_trait]
pub trait ContentResolver: Send + Sync {
    async fn read(&self, uri: &str) -> Result<Vec<u8>, ScanError>;
}

/// A locally readable PDF.
#[derive(Debug)]
pub enum FileRef {
    /// The reference already pointed at a local file.
    Local { path: PathBuf, source_uri: String },
    /// The bytes were copied into a temp file.
    Materialized {
        path: TempPath,
        source_uri: String,
    },
}

impl FileRef {
    pub fn path(&self) -> &Path {
        match self {
            FileRef::Local { path, .. } => path.as_path(),
            FileRef::Materialized { path, .. } => &**path,
        }
    }

    /// The reference exactly as the picker returned it.
    pub fn source_uri(&self) -> &str {
        match self {
            FileRef::Local { source_uri, .. } | FileRef::Materialized { source_uri, .. } => {
                source_uri
            }
        }
    }

    pub fn is_materialized(&self) -> bool {
        matches!(self, FileRef::Materialized { .. })
    }

    /// Detach a temp copy from automatic cleanup and return its path.
    pub fn keep(self) -> Result<PathBuf, ScanError> {
        match self {
            FileRef::Local { path, .. } => Ok(path),
            FileRef::Materialized { path, .. } => {
                let display = path.to_path_buf();
                path.keep().map_err(|_| ScanError::FileNotFound { path: display })
            }
        }
    }
}

/// Picks one PDF per [`DocumentAcquisition::acquire`] call.
pub struct DocumentAcquisition {
    picker: Arc<dyn FilePicker>,
    resolver: Arc<dyn ContentResolver>,
    scratch_dir: PathBuf,
    download_timeout_secs: u64,
}

impl DocumentAcquisition {
    pub fn new(
        picker: Arc<dyn FilePicker>,
        resolver: Arc<dyn ContentResolver>,
        scratch_dir: impl Into<PathBuf>,
        download_timeout_secs: u64,
    ) -> Self {
        Self {
            picker,
            resolver,
            scratch_dir: scratch_dir.into(),
            download_timeout_secs,
        }
    }

    /// Ask the picker for a PDF and make it readable.
    pub async fn acquire(&self) -> Result<FileRef, ScanError> {
        let picked = self.picker.pick_pdf().await?;
        info!(
            "Picked document: {} ({})",
            picked.name.as_deref().unwrap_or("unnamed"),
            picked.uri
        );
        self.materialize(&picked.uri).await
    }

    /// Normalise `uri` to a local file that exists.
    pub async fn materialize(&self, uri: &str) -> Result<FileRef, ScanError> {
        let file = match classify(uri) {
            Origin::Path(path) => FileRef::Local {
                path,
                source_uri: uri.to_string(),
            },
            Origin::Remote => {
                let bytes = download(uri, self.download_timeout_secs).await?;
                self.write_temp(uri, &bytes).await?
            }
            Origin::Opaque => {
                let bytes = self.resolver.read(uri).await?;
                self.write_temp(uri, &bytes).await?
            }
        };

        check_readable(file.path()).await?;
        debug!("Resolved {} → {}", uri, file.path().display());
        Ok(file)
    }

    async fn write_temp(&self, uri: &str, bytes: &[u8]) -> Result<FileRef, ScanError> {
        let path = tempfile::Builder::new()
            .prefix("import-")
            .suffix(".pdf")
            .tempfile_in(&self.scratch_dir)
            .map_err(|e| storage_error(&self.scratch_dir, e))?
            .into_temp_path();

        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| storage_error(&path, e))?;
        info!("Materialized {} bytes from {}", bytes.len(), uri);

        Ok(FileRef::Materialized {
            path,
            source_uri: uri.to_string(),
        })
    }
}

enum Origin {
    Path(PathBuf),
    Remote,
    Opaque,
}

fn classify(uri: &str) -> Origin {
    if uri.starts_with("http://") || uri.starts_with("https://") {
        return Origin::Remote;
    }
    if uri.starts_with("file:") {
        if let Some(path) = Url::parse(uri).ok().and_then(|u| u.to_file_path().ok()) {
            return Origin::Path(path);
        }
        return Origin::Path(PathBuf::from(uri.trim_start_matches("file://")));
    }
    if has_scheme(uri) {
        return Origin::Opaque;
    }
    Origin::Path(PathBuf::from(uri))
}

/// `scheme:` prefix per RFC 3986; a one-letter prefix is a Windows drive.
fn has_scheme(uri: &str) -> bool {
    match uri.split_once(':') {
        Some((scheme, _)) => {
            scheme.len() > 1
                && scheme.starts_with(|c: char| c.is_ascii_alphabetic())
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

async fn check_readable(path: &Path) -> Result<(), ScanError> {
    match tokio::fs::File::open(path).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(ScanError::PermissionDenied {
                resource: path.display().to_string(),
            })
        }
        Err(_) => Err(ScanError::FileNotFound {
            path: path.to_path_buf(),
        }),
    }
}

fn storage_error(path: &Path, e: std::io::Error) -> ScanError {
    if e.kind() == std::io::ErrorKind::PermissionDenied {
        ScanError::PermissionDenied {
            resource: path.display().to_string(),
        }
    } else {
        ScanError::FileNotFound {
            path: path.to_path_buf(),
        }
    }
}

async fn download(url: &str, timeout_secs: u64) -> Result<Vec<u8>, ScanError> {
    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ScanError::network("download", e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            ScanError::network("download", format!("timed out after {timeout_secs}s"))
        } else {
            ScanError::network("download", e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(ScanError::network(
            "download",
            format!("HTTP {}", response.status()),
        ));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| ScanError::network("download", e.to_string()))?;
    Ok(bytes.to_vec())
}

// ── Bundled implementations ──────────────────────────────────────────────

/// Picker that "selects" a fixed reference, or reports a dismissal.
#[derive(Debug, Clone, Default)]
pub struct PathPicker {
    uri: Option<String>,
}

impl PathPicker {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: Some(uri.into()),
        }
    }

    /// A picker the user always dismisses.
    pub fn dismissed() -> Self {
        Self { uri: None }
    }
}

#[async_trait]
impl FilePicker for PathPicker {
    async fn pick_pdf(&self) -> Result<PickedDocument, ScanError> {
        let uri = self.uri.clone().ok_or(ScanError::UserCancelled)?;
        let name = uri
            .rsplit(['/', '\\'])
            .next()
            .filter(|n| !n.is_empty())
            .map(str::to_string);
        Ok(PickedDocument { uri, name })
    }
}

/// Resolver for hosts without content handles: every handle is missing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoContentResolver;

#[async_trait]
impl ContentResolver for NoContentResolver {
    async fn read(&self, uri: &str) -> Result<Vec<u8>, ScanError> {
        Err(ScanError::FileNotFound {
            path: PathBuf::from(uri),
        })
    }
}
