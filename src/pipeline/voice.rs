//! Voice catalog: which speech voice narrates which language.

use crate::error::PipelineError;

/// A speech voice and the language code it is requested with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Voice {
    pub voice_id: &'static str,
    pub language_code: &'static str,
}

const CATALOG: &[(&str, Voice)] = &[
    (
        "english",
        Voice {
            voice_id: "Joanna",
            language_code: "en-US",
        },
    ),
    (
        "arabic",
        Voice {
            voice_id: "Zeina",
            language_code: "arb",
        },
    ),
];

/// Look up the voice for a language name, ignoring case.
pub fn voice_for(language: &str) -> Result<Voice, PipelineError> {
    let wanted = language.trim();
    CATALOG
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(wanted))
        .map(|(_, voice)| *voice)
        .ok_or_else(|| PipelineError::UnsupportedLanguage {
            language: language.to_string(),
        })
}
