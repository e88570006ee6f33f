//! Output languages and the prompt directive each one adds.

use serde::{Deserialize, Serialize};

/// Codes accepted in the `output_language` setting.
pub const SUPPORTED_LANGUAGE_CODES: [&str; 5] = ["en", "de", "de-ch", "fr", "it"];

/// Language the model should write user-facing text in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OutputLanguage {
    /// English, the model's default; adds no directive.
    #[default]
    English,
    /// Standard German.
    German,
    /// German with Swiss spelling conventions.
    SwissGerman,
    /// French.
    French,
    /// Italian.
    Italian,
}

impl OutputLanguage {
    /// Parses a configuration code such as `de-ch`.
    ///
    /// Returns `None` for codes outside [`SUPPORTED_LANGUAGE_CODES`].
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_lowercase().as_str() {
            "en" => Some(Self::English),
            "de" => Some(Self::German),
            "de-ch" => Some(Self::SwissGerman),
            "fr" => Some(Self::French),
            "it" => Some(Self::Italian),
            _ => None,
        }
    }

    /// Parses a code, treating anything unrecognized as English.
    pub fn from_code_or_default(code: &str) -> Self {
        Self::from_code(code).unwrap_or_default()
    }

    /// The configuration code for this language.
    pub const fn code(self) -> &'static str {
        match self {
            Self::English => "en",
            Self::German => "de",
            Self::SwissGerman => "de-ch",
            Self::French => "fr",
            Self::Italian => "it",
        }
    }

    /// Sentence appended to prompts that produce user-facing text.
    pub const fn instruction(self) -> Option<&'static str> {
        match self {
            Self::English => None,
            Self::German => Some("Respond in German."),
            Self::SwissGerman => {
                Some("Respond in German using Swiss High German spelling (replace ß with ss).")
            }
            Self::French => Some("Respond in French."),
            Self::Italian => Some("Respond in Italian."),
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::assertions_on_result_states,
    reason = "Test code is allowed to use unwrap and has different conventions"
)]
mod tests {
    use super::*;

    #[test]
    fn test_every_supported_code_parses() {
        for code in SUPPORTED_LANGUAGE_CODES {
            let language = OutputLanguage::from_code(code);
            assert_eq!(language.map(OutputLanguage::code), Some(code));
        }
    }

    #[test]
    fn test_unknown_code_has_no_instruction() {
        assert_eq!(OutputLanguage::from_code("es"), None);
        let fallback = OutputLanguage::from_code_or_default("es");
        assert_eq!(fallback, OutputLanguage::English);
        assert_eq!(fallback.instruction(), None);
    }

    #[test]
    fn test_swiss_german_instruction() {
        let language = OutputLanguage::from_code("DE-CH");
        assert_eq!(language, Some(OutputLanguage::SwissGerman));
        assert!(
            OutputLanguage::SwissGerman
                .instruction()
                .is_some_and(|text| text.contains("Swiss High German"))
        );
    }
}
