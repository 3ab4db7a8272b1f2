//! Text recognition: image file → text via a cloud vision service.
//!
//! One request per image, asking for `DOCUMENT_TEXT_DETECTION`. The first
//! text annotation in the response is the aggregate text of the whole image;
//! the rest are per-word annotations and are ignored.
//!
//! There is no retry: a single failed call is returned to the caller
//! immediately.

use crate::config::ScanConfig;
use crate::error::{ConfigError, ScanError};
use crate::pipeline::camera::ImageRef;
use crate::pipeline::encode;
use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Returned when the service answers successfully but sees no text.
pub const NO_TEXT_DETECTED: &str = "No text detected.";

const SERVICE: &str = "vision";

/// Anything that can turn an image into text.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(&self, image: &ImageRef) -> Result<String, ScanError>;
}

// ── Wire format ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct AnnotateRequest<'a> {
    requests: [ImageRequest<'a>; 1],
}

#[derive(Debug, Serialize)]
struct ImageRequest<'a> {
    image: ImageContent<'a>,
    features: [Feature; 1],
}

#[derive(Debug, Serialize)]
struct ImageContent<'a> {
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct Feature {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<ImageResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageResponse {
    #[serde(default)]
    text_annotations: Vec<TextAnnotation>,
    error: Option<ServiceStatus>,
}

#[derive(Debug, Deserialize)]
struct TextAnnotation {
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ServiceStatus {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

fn annotate_body(content: &str) -> AnnotateRequest<'_> {
    AnnotateRequest {
        requests: [ImageRequest {
            image: ImageContent { content },
            features: [Feature {
                kind: "DOCUMENT_TEXT_DETECTION",
            }],
        }],
    }
}

/// Pull the aggregate text out of a decoded response.
fn first_description(response: AnnotateResponse) -> Result<String, ScanError> {
    let Some(first) = response.responses.into_iter().next() else {
        return Ok(NO_TEXT_DETECTED.to_string());
    };
    if let Some(status) = first.error {
        return Err(ScanError::network(
            SERVICE,
            format!("service error {}: {}", status.code, status.message),
        ));
    }
    Ok(first
        .text_annotations
        .into_iter()
        .next()
        .map(|a| a.description)
        .unwrap_or_else(|| NO_TEXT_DETECTED.to_string()))
}

// ── Client ───────────────────────────────────────────────────────────────

/// Google Cloud Vision `images:annotate` client.
#[derive(Debug, Clone)]
pub struct CloudVisionRecognizer {
    client: reqwest::Client,
    endpoint: Url,
}

impl CloudVisionRecognizer {
    /// `endpoint` must already carry the API key.
    pub fn new(endpoint: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }

    pub fn from_config(config: &ScanConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.vision_url()?))
    }
}

#[async_trait]
impl TextRecognizer for CloudVisionRecognizer {
    async fn recognize(&self, image: &ImageRef) -> Result<String, ScanError> {
        let content = encode::encode_file(&image.path).await?;
        debug!(
            "Submitting {} ({} bytes base64) for text detection",
            image.path.display(),
            content.len()
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&annotate_body(&content))
            .send()
            .await
            .map_err(|e| ScanError::network(SERVICE, e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ScanError::network(SERVICE, format!("HTTP {status}: {body}")));
        }

        let parsed: AnnotateResponse = response
            .json()
            .await
            .map_err(|e| ScanError::malformed(SERVICE, e.to_string()))?;

        let text = first_description(parsed)?;
        info!(chars = text.len(), "Text recognition completed");
        Ok(text)
    }
}
