//! Text session: what the user works with after a run completes.
//!
//! A session starts from a [`ScanItem`] snapshot. The user may edit the text
//! and translate it into any catalog language. Edits never flow back into
//! the history; the stored item keeps the text the pipeline produced.

use crate::error::ScanError;
use crate::history::ScanItem;
use crate::languages;
use crate::pipeline::translate::Translator;
use reqwest::Url;
use serde::Serialize;
use tracing::debug;

const SEARCH_ENDPOINT: &str = "https://www.google.com/search";

/// The latest translation shown next to the text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranslationResult {
    /// Display name of the target language, e.g. `"French"`.
    pub language: String,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct TextSession {
    item: ScanItem,
    text: String,
    translation: Option<TranslationResult>,
}

impl TextSession {
    pub fn new(item: ScanItem) -> Self {
        let text = item.text.clone();
        Self {
            item,
            text,
            translation: None,
        }
    }

    pub fn item(&self) -> &ScanItem {
        &self.item
    }

    /// The working copy of the text, including user edits.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    pub fn translation(&self) -> Option<&TranslationResult> {
        self.translation.as_ref()
    }

    /// Translate the working text into `target`.
    ///
    /// The previous result is cleared before the request goes out, so a
    /// failed translation never leaves a stale one on display.
    pub async fn translate(
        &mut self,
        translator: &dyn Translator,
        target: &str,
    ) -> Result<&TranslationResult, ScanError> {
        self.translation = None;
        let language = languages::display_name(target);
        debug!("Translating session {} into {}", self.item.id, language);

        let text = translator.translate(&self.text, target).await?;
        Ok(self.translation.insert(TranslationResult { language, text }))
    }

    /// Text to hand to a share sheet.
    pub fn share_message(&self) -> String {
        match &self.translation {
            Some(t) => format!("{}: {}", t.language, t.text),
            None => self.text.clone(),
        }
    }

    /// Web search for the working text.
    pub fn search_url(&self) -> Result<Url, ScanError> {
        Url::parse_with_params(SEARCH_ENDPOINT, &[("q", self.text.as_str())])
            .map_err(|e| ScanError::malformed("search", e.to_string()))
    }
}
