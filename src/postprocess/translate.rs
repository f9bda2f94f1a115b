//! Translation through an external service.

use std::{fmt, time::Duration};

use clap::Args;
use reqwest::StatusCode;

use crate::{
    prelude::*,
    retry::{IsKnownTransient, classify, network_backoff},
};

/// Languages we can translate into, as `(code, name)` pairs.
const TARGETS: &[(&str, &str)] = &[
    ("af", "Afrikaans"),
    ("ar", "Arabic"),
    ("az", "Azerbaijani"),
    ("bg", "Bulgarian"),
    ("bn", "Bengali"),
    ("ca", "Catalan"),
    ("cs", "Czech"),
    ("da", "Danish"),
    ("de", "German"),
    ("el", "Greek"),
    ("en", "English"),
    ("eo", "Esperanto"),
    ("es", "Spanish"),
    ("et", "Estonian"),
    ("fa", "Persian"),
    ("fi", "Finnish"),
    ("fr", "French"),
    ("ga", "Irish"),
    ("gu", "Gujarati"),
    ("he", "Hebrew"),
    ("hi", "Hindi"),
    ("hu", "Hungarian"),
    ("id", "Indonesian"),
    ("it", "Italian"),
    ("ja", "Japanese"),
    ("kn", "Kannada"),
    ("ko", "Korean"),
    ("lt", "Lithuanian"),
    ("lv", "Latvian"),
    ("ml", "Malayalam"),
    ("mr", "Marathi"),
    ("ms", "Malay"),
    ("nb", "Norwegian"),
    ("nl", "Dutch"),
    ("pa", "Punjabi"),
    ("pl", "Polish"),
    ("pt", "Portuguese"),
    ("ro", "Romanian"),
    ("ru", "Russian"),
    ("sk", "Slovak"),
    ("sl", "Slovenian"),
    ("sq", "Albanian"),
    ("sv", "Swedish"),
    ("ta", "Tamil"),
    ("te", "Telugu"),
    ("th", "Thai"),
    ("tl", "Tagalog"),
    ("tr", "Turkish"),
    ("uk", "Ukrainian"),
    ("ur", "Urdu"),
    ("vi", "Vietnamese"),
    ("zh", "Chinese"),
];

/// Placeholder shown by language pickers before a choice is made.
pub const UNSELECTED: &str = "Select Language";

/// A validated translation target language.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TranslationTarget {
    code: &'static str,
    name: &'static str,
}

impl TranslationTarget {
    /// Parse a target from an ISO 639-1 code or an English language name,
    /// ignoring case.
    ///
    /// The empty string and [`UNSELECTED`] are rejected, like anything else
    /// not in our table.
    pub fn parse(s: &str) -> Result<Self, InvalidTarget> {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case(UNSELECTED) {
            return Err(InvalidTarget("no target language selected".to_owned()));
        }
        TARGETS
            .iter()
            .find(|(code, name)| code.eq_ignore_ascii_case(s) || name.eq_ignore_ascii_case(s))
            .map(|&(code, name)| Self { code, name })
            .ok_or_else(|| InvalidTarget(format!("unknown target language {s:?}")))
    }

    /// All supported targets.
    pub fn all() -> impl Iterator<Item = Self> {
        TARGETS.iter().map(|&(code, name)| Self { code, name })
    }

    /// The ISO 639-1 code.
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// The English name.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Display for TranslationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.code)
    }
}

/// A translation target was missing or not recognized.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InvalidTarget(pub String);

impl fmt::Display for InvalidTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid translation target: {}", self.0)
    }
}

impl std::error::Error for InvalidTarget {}

/// Interface to a translation service.
#[async_trait]
pub trait Translator: Send + Sync + 'static {
    /// Translate `text` into `target`, detecting the source language.
    async fn translate(&self, text: &str, target: &TranslationTarget) -> Result<String>;
}

/// Translation service options.
#[derive(Args, Clone, Debug)]
pub struct TranslateOpts {
    /// Base URL of a LibreTranslate-compatible translation service.
    #[clap(
        long = "translate-url",
        env = "TRANSLATE_API_BASE",
        default_value = "http://localhost:5000"
    )]
    pub base_url: String,

    /// API key for the translation service, if it needs one.
    #[clap(long = "translate-api-key", env = "TRANSLATE_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Keep retrying transient translation failures for this many seconds.
    #[clap(long = "translate-retry-secs", default_value = "30")]
    pub retry_secs: u64,
}

impl TranslateOpts {
    /// Build the translator described by these options.
    pub fn create_translator(&self) -> Result<LibreTranslateClient> {
        LibreTranslateClient::new(
            &self.base_url,
            self.api_key.clone(),
            Duration::from_secs(self.retry_secs),
        )
    }
}

/// Request body for `POST /translate`.
#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    q: &'a str,
    source: &'a str,
    target: &'a str,
    format: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    api_key: Option<&'a str>,
}

/// Response body for `POST /translate`.
#[derive(Debug, Deserialize)]
struct TranslateResponse {
    #[serde(rename = "translatedText")]
    translated_text: String,
}

/// The service answered with an HTTP error.
#[derive(Debug)]
struct HttpStatusError {
    status: StatusCode,
    body: String,
}

impl fmt::Display for HttpStatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "translation service returned {}: {}", self.status, self.body)
    }
}

impl std::error::Error for HttpStatusError {}

impl IsKnownTransient for HttpStatusError {
    fn is_known_transient(&self) -> bool {
        self.status.is_known_transient()
    }
}

/// Client for a LibreTranslate-compatible HTTP API.
pub struct LibreTranslateClient {
    client: reqwest::Client,
    translate_url: String,
    api_key: Option<String>,
    max_elapsed: Duration,
}

impl LibreTranslateClient {
    /// Create a new client.
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        max_elapsed: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()
            .context("cannot build HTTP client")?;
        Ok(Self {
            client,
            translate_url: format!("{}/translate", base_url.trim_end_matches('/')),
            api_key,
            max_elapsed,
        })
    }
}

#[async_trait]
impl Translator for LibreTranslateClient {
    #[instrument(level = "debug", skip_all, fields(target = target.code()))]
    async fn translate(&self, text: &str, target: &TranslationTarget) -> Result<String> {
        let body = TranslateRequest {
            q: text,
            source: "auto",
            target: target.code(),
            format: "text",
            api_key: self.api_key.as_deref(),
        };
        let client = &self.client;
        let url = self.translate_url.as_str();
        let body = &body;
        backoff::future::retry_notify(
            network_backoff(self.max_elapsed),
            move || async move {
                let response = client.post(url).json(body).send().await.map_err(classify)?;
                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(classify(HttpStatusError { status, body }));
                }
                let response = response
                    .json::<TranslateResponse>()
                    .await
                    .map_err(classify)?;
                Ok::<_, backoff::Error<anyhow::Error>>(response.translated_text)
            },
            |err: anyhow::Error, wait: Duration| {
                warn!("Translation failed, retrying in {:?}: {:#}", wait, err);
            },
        )
        .await
        .with_context(|| format!("cannot reach translation service at {}", self.translate_url))
    }
}
