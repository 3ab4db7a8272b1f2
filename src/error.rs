//! Error types for the uniscan library.
//!
//! Two error types reflect two distinct failure modes:
//!
//! * [`ScanError`] — a pipeline stage failed (or the user backed out). The
//!   set of kinds is closed: every stage maps its own failures onto one of
//!   these variants and the orchestrator passes them through untouched.
//!
//! * [`ConfigError`] — the library could not be set up at all (bad endpoint,
//!   missing API key). Returned from [`crate::config::ScanConfigBuilder::build`].
//!
//! `ScanError` is `Clone + PartialEq + Serialize` so it can be stored in
//! [`crate::orchestrator::PipelineState`] and sent through watch channels.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Every way a pipeline stage can end without producing text.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ScanError {
    /// Hardware or storage permission was refused.
    #[error("Permission denied: {resource}")]
    PermissionDenied { resource: String },

    /// The user backed out of a stage. Never shown as an error.
    #[error("Cancelled by user")]
    UserCancelled,

    /// The source asset could not be found or read.
    #[error("File not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// Transport failure or non-2xx status from an external service.
    #[error("{service} request failed: {detail}")]
    NetworkError { service: String, detail: String },

    /// Text to translate was empty or whitespace-only.
    #[error("There is no text to translate")]
    EmptyInput,

    /// The service answered 2xx but the body lacked the expected fields.
    #[error("Unexpected response from {service}: {detail}")]
    MalformedResponse { service: String, detail: String },

    /// PDF extraction finished but every page was blank.
    #[error("No text found in document")]
    NoTextFound,

    /// The rendering sandbox reported a load, page or internal failure.
    #[error("PDF extraction failed: {detail}")]
    ExtractionError { detail: String },

    /// The camera (or the crop step) failed.
    #[error("Capture failed: {detail}")]
    CaptureError { detail: String },
}

impl ScanError {
    pub fn network(service: impl Into<String>, detail: impl Into<String>) -> Self {
        ScanError::NetworkError {
            service: service.into(),
            detail: detail.into(),
        }
    }

    pub fn malformed(service: impl Into<String>, detail: impl Into<String>) -> Self {
        ScanError::MalformedResponse {
            service: service.into(),
            detail: detail.into(),
        }
    }

    pub fn extraction(detail: impl Into<String>) -> Self {
        ScanError::ExtractionError {
            detail: detail.into(),
        }
    }

    pub fn capture(detail: impl Into<String>) -> Self {
        ScanError::CaptureError {
            detail: detail.into(),
        }
    }

    /// `true` for [`ScanError::UserCancelled`].
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ScanError::UserCancelled)
    }

    /// The one-shot message shown to the user, or `None` when the error must
    /// stay silent (cancellation).
    pub fn notification(&self) -> Option<Notification> {
        let title = match self {
            ScanError::UserCancelled => return None,
            ScanError::PermissionDenied { .. } => "Permission Denied",
            ScanError::FileNotFound { .. } => "File Not Found",
            ScanError::NetworkError { .. } => "Connection Problem",
            ScanError::EmptyInput => "No Text",
            ScanError::MalformedResponse { .. } => "Unexpected Response",
            ScanError::NoTextFound => "No Text Found",
            ScanError::ExtractionError { .. } => "PDF Error",
            ScanError::CaptureError { .. } => "Camera Error",
        };
        Some(Notification {
            title: title.to_string(),
            message: self.to_string(),
        })
    }
}

/// A user-facing alert produced once per failed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub message: String,
}

/// Set-up errors, raised before any pipeline run starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Cloud adapters need a key and none was configured.
    #[error("No API key configured.\nSet GOOGLE_API_KEY or pass --api-key.")]
    MissingApiKey,
}
