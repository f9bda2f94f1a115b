//! Per-document results, and the counters we keep while writing them out.
//!
//! Every document in a batch ends with exactly one [`ExtractionResult`]. A
//! document that cannot be processed is not an error as far as the rest of
//! the program is concerned: the failure is recorded in the result's
//! [`ExtractionStatus`], and processing continues with the next document.

use std::{
    fmt,
    sync::{Arc, Mutex},
};

use clap::ValueEnum;
use futures::StreamExt as _;
use schemars::JsonSchema;

use crate::{
    async_utils::{
        BoxedStream,
        io::{write_output, write_output_csv},
    },
    language::UNDETERMINED,
    prelude::*,
    preprocess::InvalidImage,
    ui::Ui,
};

/// Why a document failed.
#[derive(Clone, Copy, Debug, Deserialize, Eq, JsonSchema, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The source image could not be read or decoded.
    InvalidImage,
    /// The OCR engine failed, or processing the document faulted.
    EngineFault,
    /// The batch was cancelled before this document was started.
    Cancelled,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::InvalidImage => write!(f, "invalid image"),
            FailureReason::EngineFault => write!(f, "engine fault"),
            FailureReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Terminal status of a document.
#[derive(Clone, Debug, JsonSchema, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExtractionStatus {
    /// We extracted some text.
    Success,

    /// OCR ran, but found no text. This is not a failure. Usually it means
    /// the user should try another image or different preprocessing.
    Empty,

    /// The document could not be processed.
    Failed {
        /// What kind of failure.
        reason: FailureReason,
        /// A human-readable description of what went wrong.
        error: String,
    },
}

impl ExtractionStatus {
    /// The image could not be decoded.
    pub fn invalid_image(err: &InvalidImage) -> Self {
        ExtractionStatus::Failed {
            reason: FailureReason::InvalidImage,
            error: err.to_string(),
        }
    }

    /// The engine failed.
    pub fn engine_fault(err: &anyhow::Error) -> Self {
        ExtractionStatus::Failed {
            reason: FailureReason::EngineFault,
            error: format!("{err:#}"),
        }
    }

    /// The batch was cancelled before this document was processed.
    pub fn cancelled() -> Self {
        ExtractionStatus::Failed {
            reason: FailureReason::Cancelled,
            error: "batch was cancelled before this document was started".to_owned(),
        }
    }

    /// The short name used in output records.
    pub fn label(&self) -> &'static str {
        match self {
            ExtractionStatus::Success => "success",
            ExtractionStatus::Empty => "empty",
            ExtractionStatus::Failed { .. } => "failed",
        }
    }

    /// The failure reason, if any.
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            ExtractionStatus::Failed { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

/// The outcome of running one document through the pipeline.
#[derive(Clone, Debug, JsonSchema, PartialEq, Serialize)]
pub struct ExtractionResult {
    /// The document ID. Defaults to the image's file name.
    pub document_id: String,

    /// The text returned by the OCR engine. Empty unless the status is
    /// `success` or `empty`.
    pub raw_text: String,

    /// The detected language of `raw_text`, or `"und"`.
    pub detected_language: String,

    /// What happened to this document?
    #[serde(flatten)]
    pub status: ExtractionStatus,
}

impl ExtractionResult {
    /// A result for a document that produced no text at all.
    pub fn without_text(document_id: impl Into<String>, status: ExtractionStatus) -> Self {
        Self {
            document_id: document_id.into(),
            raw_text: String::new(),
            detected_language: UNDETERMINED.to_owned(),
            status,
        }
    }

    /// Convert this result to a flat version for CSV output.
    fn to_flat(&self) -> FlatExtractionResult {
        let error = match &self.status {
            ExtractionStatus::Failed { error, .. } => Some(error.clone()),
            _ => None,
        };
        FlatExtractionResult {
            document_id: self.document_id.clone(),
            status: self.status.label(),
            reason: self.status.failure_reason(),
            error,
            detected_language: self.detected_language.clone(),
            raw_text: self.raw_text.clone(),
        }
    }

    /// Write a stream of results to a [`Path`] or to standard output.
    pub async fn write_stream(
        ui: &Ui,
        path: Option<&Path>,
        format: OutputFormat,
        stream: BoxedStream<Result<Self>>,
        allowed_failure_rate: f32,
    ) -> Result<()> {
        let (stream, counters) = ExtractionCounters::wrap_stream(stream);
        match format {
            OutputFormat::Jsonl => {
                let output = stream
                    .map(|result| {
                        serde_json::to_value(result?).context("failed to serialize output")
                    })
                    .boxed();
                write_output(path, output).await?;
            }
            OutputFormat::Csv => {
                let output = stream.map(|result| Ok(result?.to_flat())).boxed();
                write_output_csv(path, output).await?;
            }
        }
        counters.finish(ui, allowed_failure_rate)
    }
}

/// Flat version of [`ExtractionResult`], for CSV output.
#[derive(Clone, Debug, JsonSchema, Serialize)]
pub struct FlatExtractionResult {
    /// The document ID.
    pub document_id: String,
    /// `success`, `empty` or `failed`.
    pub status: &'static str,
    /// Why the document failed, if it did.
    pub reason: Option<FailureReason>,
    /// Error details, if the document failed.
    pub error: Option<String>,
    /// The detected language.
    pub detected_language: String,
    /// The extracted text.
    pub raw_text: String,
}

/// Output formats for extraction results.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One JSON object per line.
    #[default]
    Jsonl,
    /// CSV with a header row.
    Csv,
}

/// Counters for a stream of results.
#[derive(Clone, Debug, Default)]
pub struct ExtractionCounters {
    /// How many documents did we see?
    pub total_count: usize,

    /// How many documents had no text?
    pub empty_count: usize,

    /// How many documents failed?
    pub failure_count: usize,
}

impl ExtractionCounters {
    /// Wrap a stream with counters.
    pub fn wrap_stream(
        stream: BoxedStream<Result<ExtractionResult>>,
    ) -> (
        BoxedStream<Result<ExtractionResult>>,
        Arc<Mutex<ExtractionCounters>>,
    ) {
        let counters = Arc::new(Mutex::new(Self::default()));
        let counters_clone = counters.clone();
        let stream = stream
            .map(move |value| {
                let value = value?;
                counters_clone.update(&value);
                Ok(value)
            })
            .boxed();
        (stream, counters)
    }
}

/// Methods on `Mutex<ExtractionCounters>`, which is the type we actually
/// share between the stream and the caller.
pub trait ExtractionCounterExt {
    /// Update counters for a result.
    fn update(&self, result: &ExtractionResult);

    /// Display counter values to the user, and fail if too many documents
    /// failed.
    fn finish(self: Arc<Self>, ui: &Ui, allowed_failure_rate: f32) -> Result<()>;
}

impl ExtractionCounterExt for Mutex<ExtractionCounters> {
    fn update(&self, result: &ExtractionResult) {
        // Hold a sync lock, but just for an instant to update counters.
        let mut counters = self.lock().expect("lock poisoned");
        counters.total_count += 1;
        match result.status {
            ExtractionStatus::Success => {}
            ExtractionStatus::Empty => counters.empty_count += 1,
            ExtractionStatus::Failed { .. } => counters.failure_count += 1,
        }
    }

    fn finish(self: Arc<Self>, ui: &Ui, allowed_failure_rate: f32) -> Result<()> {
        let counters = self.lock().expect("lock poisoned").to_owned();
        if counters.total_count == 0 {
            return Ok(());
        }
        let failure_rate = counters.failure_count as f32 / counters.total_count as f32;
        if failure_rate > allowed_failure_rate {
            return Err(anyhow!(
                "{}/{} ({:.2}%) of documents failed, but only {:.2}% were allowed",
                counters.failure_count,
                counters.total_count,
                failure_rate * 100.0,
                allowed_failure_rate * 100.0
            ));
        }
        if counters.empty_count > 0 {
            ui.display_message(
                "⚠️",
                &format!(
                    "No text detected in {} documents. Try another image or adjust preprocessing.",
                    counters.empty_count
                ),
            );
        }
        if counters.failure_count > 0 {
            ui.display_message(
                "❌",
                &format!("{} documents could not be processed", counters.failure_count),
            );
        }
        Ok(())
    }
}
