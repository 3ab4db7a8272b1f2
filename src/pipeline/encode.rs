//! Byte encoding: local file → base64 string.
//!
//! Both cloud vision requests and the PDF sandbox's `load` message carry
//! their payload as standard base64 inside a JSON body.

use crate::error::ScanError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::Path;
use tracing::debug;

/// Encode raw bytes as standard (padded) base64.
pub fn encode_bytes(bytes: &[u8]) -> String {
    let b64 = STANDARD.encode(bytes);
    debug!("Encoded {} bytes → {} bytes base64", bytes.len(), b64.len());
    b64
}

/// Read a file and encode it.
///
/// Any read failure maps to [`ScanError::FileNotFound`], except a refused
/// permission which maps to [`ScanError::PermissionDenied`].
pub async fn encode_file(path: &Path) -> Result<String, ScanError> {
    let bytes = read_source(path).await?;
    Ok(encode_bytes(&bytes))
}

/// Read the bytes of a source asset with the stage error mapping.
async fn read_source(path: &Path) -> Result<Vec<u8>, ScanError> {
    tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => ScanError::PermissionDenied {
            resource: path.display().to_string(),
        },
        _ => ScanError::FileNotFound {
            path: path.to_path_buf(),
        },
    })
}
