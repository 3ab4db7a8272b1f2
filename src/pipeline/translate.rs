//! Translation: recognized text → target language via a cloud service.
//!
//! Blank input is rejected before any request is built. The adapter does not
//! serialise callers; a [`crate::session::TextSession`] takes `&mut self` for
//! each translation, which is what keeps one request in flight per session.

use crate::config::ScanConfig;
use crate::error::{ConfigError, ScanError};
use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const SERVICE: &str = "translation";

#[async_trait]
pub trait Translator: Send + Sync {
    /// Translate `text` into the language identified by `target` (ISO-639 code).
    async fn translate(&self, text: &str, target: &str) -> Result<String, ScanError>;
}

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    target: &'a str,
    format: &'static str,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    data: Option<TranslateData>,
}

#[derive(Debug, Deserialize)]
struct TranslateData {
    #[serde(default)]
    translations: Vec<Translation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Translation {
    translated_text: Option<String>,
}

fn translated_text(response: TranslateResponse) -> Option<String> {
    response
        .data?
        .translations
        .into_iter()
        .next()?
        .translated_text
}

/// Google Cloud Translation v2 client.
#[derive(Debug, Clone)]
pub struct CloudTranslator {
    client: reqwest::Client,
    endpoint: Url,
}

impl CloudTranslator {
    /// `endpoint` must already carry the API key.
    pub fn new(endpoint: Url) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }

    pub fn from_config(config: &ScanConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.translate_url()?))
    }
}

#[async_trait]
impl Translator for CloudTranslator {
    async fn translate(&self, text: &str, target: &str) -> Result<String, ScanError> {
        if text.trim().is_empty() {
            return Err(ScanError::EmptyInput);
        }

        debug!(chars = text.len(), target, "Requesting translation");
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&TranslateRequest {
                q: text,
                target,
                format: "text",
            })
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

        let parsed: TranslateResponse = response
            .json()
            .await
            .map_err(|e| ScanError::malformed(SERVICE, e.to_string()))?;

        let text = translated_text(parsed).ok_or_else(|| {
            ScanError::malformed(SERVICE, "missing data.translations[0].translatedText")
        })?;
        info!(chars = text.len(), target, "Translation completed");
        Ok(text)
    }
}
