//! Configuration for the capture-to-text pipeline.
//!
//! Everything the cloud adapters and acquisition stages need is collected in
//! [`ScanConfig`], built via [`ScanConfigBuilder`]. Callers set only what they
//! care about and rely on the documented defaults for the rest.

use crate::error::ConfigError;
use reqwest::Url;
use std::fmt;
use std::path::PathBuf;

/// Google Cloud Vision `images:annotate` endpoint.
pub const DEFAULT_VISION_ENDPOINT: &str = "https://vision.googleapis.com/v1/images:annotate";

/// Google Cloud Translation v2 endpoint.
pub const DEFAULT_TRANSLATE_ENDPOINT: &str =
    "https://translation.googleapis.com/language/translate/v2";

/// Configuration shared by every pipeline stage.
///
/// # Example
/// ```rust
/// use uniscan::ScanConfig;
///
/// let config = ScanConfig::builder()
///     .api_key("test-key")
///     .default_target_language("fr")
///     .build()
///     .unwrap();
/// assert_eq!(config.default_target_language, "fr");
/// ```
#[derive(Clone)]
pub struct ScanConfig {
    /// API key appended as `?key=` to both cloud endpoints.
    pub api_key: Option<String>,

    /// Vision recognition endpoint. Default: [`DEFAULT_VISION_ENDPOINT`].
    pub vision_endpoint: String,

    /// Translation endpoint. Default: [`DEFAULT_TRANSLATE_ENDPOINT`].
    pub translate_endpoint: String,

    /// Language code pre-selected for translation. Default: `"es"`.
    pub default_target_language: String,

    /// Directory for captured photos and materialized PDFs.
    /// `None` uses the system temp directory.
    pub capture_dir: Option<PathBuf>,

    /// Timeout for downloading `http(s)://` documents, in seconds. Default: 120.
    ///
    /// Only the materialization of remote PDFs is bounded; recognition and
    /// translation calls have no timeout.
    pub download_timeout_secs: u64,

    /// Explicit pdfium shared library. `None` binds the system library.
    pub pdfium_library_path: Option<PathBuf>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            vision_endpoint: DEFAULT_VISION_ENDPOINT.to_string(),
            translate_endpoint: DEFAULT_TRANSLATE_ENDPOINT.to_string(),
            default_target_language: crate::languages::DEFAULT_TARGET.to_string(),
            capture_dir: None,
            download_timeout_secs: 120,
            pdfium_library_path: None,
        }
    }
}

impl fmt::Debug for ScanConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("vision_endpoint", &self.vision_endpoint)
            .field("translate_endpoint", &self.translate_endpoint)
            .field("default_target_language", &self.default_target_language)
            .field("capture_dir", &self.capture_dir)
            .field("download_timeout_secs", &self.download_timeout_secs)
            .field("pdfium_library_path", &self.pdfium_library_path)
            .finish()
    }
}

impl ScanConfig {
    /// Create a new builder for `ScanConfig`.
    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder {
            config: Self::default(),
        }
    }

    /// Builder pre-filled from the environment:
    /// `GOOGLE_API_KEY`, `UNISCAN_VISION_ENDPOINT`,
    /// `UNISCAN_TRANSLATE_ENDPOINT`, `PDFIUM_LIB_PATH`.
    pub fn from_env() -> ScanConfigBuilder {
        let mut builder = Self::builder();
        if let Some(key) = non_empty_env("GOOGLE_API_KEY") {
            builder = builder.api_key(key);
        }
        if let Some(url) = non_empty_env("UNISCAN_VISION_ENDPOINT") {
            builder = builder.vision_endpoint(url);
        }
        if let Some(url) = non_empty_env("UNISCAN_TRANSLATE_ENDPOINT") {
            builder = builder.translate_endpoint(url);
        }
        if let Some(path) = non_empty_env("PDFIUM_LIB_PATH") {
            builder = builder.pdfium_library_path(path);
        }
        if let Some(code) = non_empty_env("UNISCAN_TARGET_LANGUAGE") {
            builder = builder.default_target_language(code);
        }
        builder
    }

    /// `requested` when given and non-blank, else the configured default.
    pub fn target_language<'a>(&'a self, requested: Option<&'a str>) -> &'a str {
        requested
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .unwrap_or(self.default_target_language.as_str())
    }

    /// The API key, or [`ConfigError::MissingApiKey`].
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        self.api_key.as_deref().ok_or(ConfigError::MissingApiKey)
    }

    /// Vision endpoint with the API key attached.
    pub fn vision_url(&self) -> Result<Url, ConfigError> {
        keyed_url(&self.vision_endpoint, self.require_api_key()?)
    }

    /// Translation endpoint with the API key attached.
    pub fn translate_url(&self) -> Result<Url, ConfigError> {
        keyed_url(&self.translate_endpoint, self.require_api_key()?)
    }

    /// Where temp files are created.
    pub fn scratch_dir(&self) -> PathBuf {
        self.capture_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

fn keyed_url(endpoint: &str, key: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(endpoint)
        .map_err(|e| ConfigError::InvalidConfig(format!("endpoint '{endpoint}': {e}")))?;
    url.query_pairs_mut().append_pair("key", key);
    Ok(url)
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Builder for [`ScanConfig`].
#[derive(Debug)]
pub struct ScanConfigBuilder {
    config: ScanConfig,
}

impl ScanConfigBuilder {
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn vision_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.vision_endpoint = url.into();
        self
    }

    pub fn translate_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.translate_endpoint = url.into();
        self
    }

    pub fn default_target_language(mut self, code: impl Into<String>) -> Self {
        self.config.default_target_language = code.into();
        self
    }

    pub fn capture_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.capture_dir = Some(dir.into());
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn pdfium_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_path = Some(path.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ScanConfig, ConfigError> {
        let c = &self.config;
        for endpoint in [&c.vision_endpoint, &c.translate_endpoint] {
            Url::parse(endpoint).map_err(|e| {
                ConfigError::InvalidConfig(format!("endpoint '{endpoint}' is not a URL: {e}"))
            })?;
        }
        if c.default_target_language.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "default target language must not be empty".into(),
            ));
        }
        if c.download_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "download timeout must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}
