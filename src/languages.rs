//! Translation targets offered to the user.
//!
//! The list is ordered the way the language picker shows it; the first entry
//! is the default selection.

use serde::Serialize;

/// A selectable translation target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Language {
    pub code: &'static str,
    pub name: &'static str,
}

/// Code of the language pre-selected in the picker.
pub const DEFAULT_TARGET: &str = "es";

pub const LANGUAGES: &[Language] = &[
    Language { code: "es", name: "Spanish" },
    Language { code: "fr", name: "French" },
    Language { code: "de", name: "German" },
    Language { code: "zh", name: "Chinese" },
    Language { code: "ja", name: "Japanese" },
    Language { code: "ar", name: "Arabic" },
    Language { code: "pt", name: "Portuguese" },
    Language { code: "it", name: "Italian" },
    Language { code: "ru", name: "Russian" },
    Language { code: "hi", name: "Hindi" },
    Language { code: "tr", name: "Turkish" },
    Language { code: "gu", name: "Gujarati" },
    Language { code: "mr", name: "Marathi" },
    Language { code: "ta", name: "Tamil" },
    Language { code: "te", name: "Telugu" },
    Language { code: "bn", name: "Bengali" },
    Language { code: "pa", name: "Punjabi" },
    Language { code: "ur", name: "Urdu" },
    Language { code: "ml", name: "Malayalam" },
    Language { code: "kn", name: "Kannada" },
    Language { code: "or", name: "Oriya" },
    Language { code: "ne", name: "Nepali" },
];

/// Look up a language by code (case-insensitive).
pub fn find(code: &str) -> Option<&'static Language> {
    LANGUAGES
        .iter()
        .find(|l| l.code.eq_ignore_ascii_case(code.trim()))
}

/// Display name for `code`; unknown codes display as themselves.
pub fn display_name(code: &str) -> String {
    find(code)
        .map(|l| l.name.to_string())
        .unwrap_or_else(|| code.trim().to_string())
}
