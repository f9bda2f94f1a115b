//! Optional operators run on extracted text: translation, summarization and
//! keyword extraction.
//!
//! Each operator takes plain text and returns a [`PostProcessResult`]. A
//! failed operator never changes the [`ExtractionResult`] the text came from,
//! and never affects the other operators.
//!
//! [`ExtractionResult`]: crate::queues::work::ExtractionResult

use std::fmt;

use schemars::JsonSchema;

use crate::prelude::*;

use self::translate::{TranslationTarget, Translator};

pub mod nlp;
pub mod translate;

/// Which operator to run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Operation {
    /// Translate into the named target language. The target is validated
    /// before any service call.
    Translate { target: String },
    /// Extract noun-phrase-like fragments.
    Summarize,
    /// List the words of the text.
    Keywords,
}

impl Operation {
    /// The operator this operation runs.
    pub fn operator(&self) -> Operator {
        match self {
            Operation::Translate { .. } => Operator::Translate,
            Operation::Summarize => Operator::Summarize,
            Operation::Keywords => Operator::Keywords,
        }
    }
}

/// A request to post-process some text.
#[derive(Clone, Debug)]
pub struct PostProcessRequest {
    /// The document the text came from, if any.
    pub document_id: Option<String>,
    /// The text to process.
    pub text: String,
    /// What to do with it.
    pub operation: Operation,
}

/// Operator names, as they appear in output.
#[derive(Clone, Copy, Debug, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Translate,
    Summarize,
    Keywords,
}

/// A description of the input text.
#[derive(Clone, Debug, Eq, JsonSchema, PartialEq, Serialize)]
pub struct TextRef {
    /// The document the text came from, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    /// Length of the input in characters.
    pub chars: usize,
}

/// Kinds of post-processing failure.
#[derive(Clone, Copy, Debug, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PostProcessFailureKind {
    /// The translation service failed or could not be reached.
    TranslationUnavailable,
    /// No valid target language was given.
    InvalidTarget,
}

/// A failed operator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PostProcessFailure {
    pub kind: PostProcessFailureKind,
    pub message: String,
}

impl fmt::Display for PostProcessFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            PostProcessFailureKind::TranslationUnavailable => {
                write!(f, "translation unavailable: {}", self.message)
            }
            PostProcessFailureKind::InvalidTarget => {
                write!(f, "invalid translation target: {}", self.message)
            }
        }
    }
}

impl std::error::Error for PostProcessFailure {}

/// Output of an operator.
#[derive(Clone, Debug, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PostProcessOutput {
    Ok {
        text: String,
    },
    Failed {
        reason: PostProcessFailureKind,
        error: String,
    },
}

/// The result of running one operator.
#[derive(Clone, Debug, Eq, JsonSchema, PartialEq, Serialize)]
pub struct PostProcessResult {
    /// Which operator ran.
    pub operator: Operator,
    /// What it ran on.
    pub input: TextRef,
    /// What it produced.
    #[serde(flatten)]
    pub output: PostProcessOutput,
}

impl PostProcessResult {
    /// Convert into a plain [`Result`].
    pub fn into_result(self) -> Result<String, PostProcessFailure> {
        match self.output {
            PostProcessOutput::Ok { text } => Ok(text),
            PostProcessOutput::Failed { reason, error } => Err(PostProcessFailure {
                kind: reason,
                message: error,
            }),
        }
    }
}

/// Translate `text`. The target is checked before the translator is called.
pub async fn translate(
    translator: &dyn Translator,
    text: &str,
    target: &str,
) -> Result<String, PostProcessFailure> {
    let target = TranslationTarget::parse(target).map_err(|err| PostProcessFailure {
        kind: PostProcessFailureKind::InvalidTarget,
        message: err.0,
    })?;
    if text.trim().is_empty() {
        debug!("Nothing to translate");
        return Ok(String::new());
    }
    translator
        .translate(text, &target)
        .await
        .map_err(|err| PostProcessFailure {
            kind: PostProcessFailureKind::TranslationUnavailable,
            message: format!("{err:#}"),
        })
}

/// Noun-phrase-like fragments of `text`, one per line.
pub fn summarize(text: &str) -> String {
    nlp::summarize(text).join("\n")
}

/// The words of `text`, joined by `", "`.
pub fn extract_keywords(text: &str) -> String {
    nlp::extract_keywords(text)
}

/// Run one post-processing request.
#[instrument(level = "debug", skip_all, fields(operator = ?request.operation.operator()))]
pub async fn process(
    translator: &dyn Translator,
    request: PostProcessRequest,
) -> PostProcessResult {
    let operator = request.operation.operator();
    let input = TextRef {
        document_id: request.document_id,
        chars: request.text.chars().count(),
    };
    let result = match &request.operation {
        Operation::Translate { target } => translate(translator, &request.text, target).await,
        Operation::Summarize => Ok(summarize(&request.text)),
        Operation::Keywords => Ok(extract_keywords(&request.text)),
    };
    let output = match result {
        Ok(text) => PostProcessOutput::Ok { text },
        Err(failure) => {
            warn!("{}", failure);
            PostProcessOutput::Failed {
                reason: failure.kind,
                error: failure.message,
            }
        }
    };
    PostProcessResult {
        operator,
        input,
        output,
    }
}
