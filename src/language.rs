//! Recognition languages and detection of the language of extracted text.

use std::{fmt, str::FromStr};

use whatlang::Lang;

use crate::prelude::*;

/// Sentinel returned when no language can be detected.
pub const UNDETERMINED: &str = "und";

/// A language the OCR engine can be constrained to.
///
/// To support a new language, add a variant here and a row to
/// [`RecognitionLanguage::ALL`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(into = "&'static str")]
pub enum RecognitionLanguage {
    #[default]
    English,
    Spanish,
    French,
    German,
    Hindi,
}

impl RecognitionLanguage {
    /// Every supported language, with its display name and engine code.
    pub const ALL: &'static [(RecognitionLanguage, &'static str, &'static str)] = &[
        (RecognitionLanguage::English, "English", "eng"),
        (RecognitionLanguage::Spanish, "Spanish", "spa"),
        (RecognitionLanguage::French, "French", "fra"),
        (RecognitionLanguage::German, "German", "deu"),
        (RecognitionLanguage::Hindi, "Hindi", "hin"),
    ];

    fn entry(self) -> (RecognitionLanguage, &'static str, &'static str) {
        *Self::ALL
            .iter()
            .find(|(lang, _, _)| *lang == self)
            .expect("every language should have an entry in ALL")
    }

    /// The human-readable name.
    pub fn display_name(self) -> &'static str {
        self.entry().1
    }

    /// The code the OCR engine uses for this language's model.
    pub fn engine_code(self) -> &'static str {
        self.entry().2
    }
}

impl fmt::Display for RecognitionLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl From<RecognitionLanguage> for &'static str {
    fn from(lang: RecognitionLanguage) -> Self {
        lang.engine_code()
    }
}

impl FromStr for RecognitionLanguage {
    type Err = anyhow::Error;

    /// Accepts either the display name or the engine code, ignoring case.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        Self::ALL
            .iter()
            .find(|(_, name, code)| name.eq_ignore_ascii_case(s) || code.eq_ignore_ascii_case(s))
            .map(|(lang, _, _)| *lang)
            .ok_or_else(|| {
                let supported = Self::ALL
                    .iter()
                    .map(|(_, name, code)| format!("{name} ({code})"))
                    .collect::<Vec<_>>()
                    .join(", ");
                anyhow!("unsupported recognition language {s:?} (supported: {supported})")
            })
    }
}

/// Best-effort detection of the dominant language of a text.
#[derive(Clone, Debug, Default)]
pub struct LanguageDetector {
    /// Guesses below this confidence are reported as [`UNDETERMINED`].
    pub min_confidence: f64,
}

impl LanguageDetector {
    /// Create a detector that rejects guesses below `min_confidence`.
    pub fn new(min_confidence: f64) -> Self {
        Self { min_confidence }
    }

    /// Detect the language of `text`, returning an ISO 639-1 code where one
    /// exists, an ISO 639-3 code otherwise, or [`UNDETERMINED`].
    ///
    /// This never fails. Detection is deterministic for a given text.
    pub fn detect(&self, text: &str) -> String {
        if !text.chars().any(char::is_alphabetic) {
            debug!("No alphabetic content, language undetermined");
            return UNDETERMINED.to_owned();
        }
        match whatlang::detect(text) {
            Some(info) if info.confidence() >= self.min_confidence => {
                trace!(lang = ?info.lang(), confidence = info.confidence(), "Detected language");
                iso639_1(info.lang())
                    .unwrap_or_else(|| info.lang().code())
                    .to_owned()
            }
            Some(info) => {
                debug!(
                    lang = ?info.lang(),
                    confidence = info.confidence(),
                    "Language detection below confidence threshold"
                );
                UNDETERMINED.to_owned()
            }
            None => {
                debug!("Language detection unavailable for this text");
                UNDETERMINED.to_owned()
            }
        }
    }
}

/// Map to a two-letter code, when there is one.
fn iso639_1(lang: Lang) -> Option<&'static str> {
    let code = match lang {
        Lang::Afr => "af",
        Lang::Amh => "am",
        Lang::Ara => "ar",
        Lang::Aze => "az",
        Lang::Bel => "be",
        Lang::Ben => "bn",
        Lang::Bul => "bg",
        Lang::Cat => "ca",
        Lang::Ces => "cs",
        Lang::Cmn => "zh",
        Lang::Dan => "da",
        Lang::Deu => "de",
        Lang::Ell => "el",
        Lang::Eng => "en",
        Lang::Epo => "eo",
        Lang::Est => "et",
        Lang::Fin => "fi",
        Lang::Fra => "fr",
        Lang::Guj => "gu",
        Lang::Heb => "he",
        Lang::Hin => "hi",
        Lang::Hrv => "hr",
        Lang::Hun => "hu",
        Lang::Hye => "hy",
        Lang::Ind => "id",
        Lang::Ita => "it",
        Lang::Jav => "jv",
        Lang::Jpn => "ja",
        Lang::Kan => "kn",
        Lang::Kat => "ka",
        Lang::Khm => "km",
        Lang::Kor => "ko",
        Lang::Lat => "la",
        Lang::Lav => "lv",
        Lang::Lit => "lt",
        Lang::Mal => "ml",
        Lang::Mar => "mr",
        Lang::Mkd => "mk",
        Lang::Mya => "my",
        Lang::Nep => "ne",
        Lang::Nld => "nl",
        Lang::Nob => "nb",
        Lang::Ori => "or",
        Lang::Pan => "pa",
        Lang::Pes => "fa",
        Lang::Pol => "pl",
        Lang::Por => "pt",
        Lang::Ron => "ro",
        Lang::Rus => "ru",
        Lang::Sin => "si",
        Lang::Slk => "sk",
        Lang::Slv => "sl",
        Lang::Sna => "sn",
        Lang::Spa => "es",
        Lang::Srp => "sr",
        Lang::Swe => "sv",
        Lang::Tam => "ta",
        Lang::Tel => "te",
        Lang::Tgl => "tl",
        Lang::Tha => "th",
        Lang::Tuk => "tk",
        Lang::Tur => "tr",
        Lang::Ukr => "uk",
        Lang::Urd => "ur",
        Lang::Uzb => "uz",
        Lang::Vie => "vi",
        Lang::Yid => "yi",
        Lang::Zul => "zu",
        _ => return None,
    };
    Some(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_and_codes() {
        assert_eq!(
            "english".parse::<RecognitionLanguage>().unwrap(),
            RecognitionLanguage::English
        );
        assert_eq!(
            "DEU".parse::<RecognitionLanguage>().unwrap(),
            RecognitionLanguage::German
        );
        assert_eq!(RecognitionLanguage::Hindi.engine_code(), "hin");
        assert_eq!(RecognitionLanguage::Spanish.to_string(), "Spanish");
    }

    #[test]
    fn rejects_unknown_languages() {
        let err = "klingon".parse::<RecognitionLanguage>().unwrap_err();
        assert!(err.to_string().contains("French (fra)"), "{err}");
        assert!("".parse::<RecognitionLanguage>().is_err());
    }

    #[test]
    fn every_variant_has_an_entry() {
        for lang in [
            RecognitionLanguage::English,
            RecognitionLanguage::Spanish,
            RecognitionLanguage::French,
            RecognitionLanguage::German,
            RecognitionLanguage::Hindi,
        ] {
            assert_eq!(lang.engine_code().parse::<RecognitionLanguage>().unwrap(), lang);
        }
    }

    #[test]
    fn detects_common_languages() {
        let detector = LanguageDetector::default();
        assert_eq!(
            detector.detect(
                "The quick brown fox jumps over the lazy dog while the farmer \
                 watches from the porch of his house."
            ),
            "en"
        );
        assert_eq!(
            detector.detect(
                "El rápido zorro marrón salta sobre el perro perezoso mientras \
                 el granjero mira desde el porche de su casa."
            ),
            "es"
        );
        assert_eq!(
            detector.detect(
                "Der schnelle braune Fuchs springt über den faulen Hund, während \
                 der Bauer von der Veranda seines Hauses aus zusieht."
            ),
            "de"
        );
    }

    #[test]
    fn detection_is_repeatable() {
        let detector = LanguageDetector::default();
        let text = "Ceci est un petit texte écrit en français pour le test.";
        let first = detector.detect(text);
        for _ in 0..10 {
            assert_eq!(detector.detect(text), first);
        }
    }

    #[test]
    fn non_alphabetic_text_is_undetermined() {
        let detector = LanguageDetector::default();
        for text in ["", "   \n\t", "12345 67.89", "!!! ??? ---", "2024-01-01 12:00"] {
            assert_eq!(detector.detect(text), UNDETERMINED, "{text:?}");
        }
    }

    #[test]
    fn low_confidence_is_undetermined() {
        let detector = LanguageDetector::new(1.1);
        assert_eq!(
            detector.detect("The quick brown fox jumps over the lazy dog."),
            UNDETERMINED
        );
    }
}
