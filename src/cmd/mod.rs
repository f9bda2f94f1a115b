//! Command-line entry points.

use std::sync::Arc;

use clap::Args;

use crate::{
    async_utils::{JoinWorker, io::read_text},
    language::LanguageDetector,
    ocr::EngineOpts,
    pipeline::DocumentPipeline,
    postprocess::{PostProcessResult, translate::TranslateOpts},
    prelude::*,
    queues::batch::{BatchOrchestrator, DEFAULT_QUEUE_DEPTH},
    session::Session,
};

pub mod analyze;
pub mod extract;
pub mod languages;
pub mod preview;
pub mod schema;
pub mod translate;

/// Options for the background worker and the engines it owns.
#[derive(Args, Clone, Debug)]
pub struct WorkerOpts {
    #[clap(flatten)]
    pub engine: EngineOpts,

    #[clap(flatten)]
    pub translate: TranslateOpts,

    /// Report detected languages below this confidence (0.0 to 1.0) as
    /// "und".
    #[clap(long, default_value = "0.0")]
    pub min_language_confidence: f64,
}

impl WorkerOpts {
    /// Start a worker and wrap it in a [`Session`].
    pub fn start_session(&self) -> Result<(Session, JoinWorker)> {
        let pipeline = DocumentPipeline::new(
            self.engine.create_engine(),
            LanguageDetector::new(self.min_language_confidence),
            self.engine.engine_mode,
        );
        let translator = Arc::new(self.translate.create_translator()?);
        let (orchestrator, worker) =
            BatchOrchestrator::new(pipeline, translator, DEFAULT_QUEUE_DEPTH);
        Ok((Session::new(orchestrator), worker))
    }
}

/// Where to get text for post-processing commands.
#[derive(Args, Clone, Debug)]
pub struct TextInputOpts {
    /// A text file to read. Reads standard input if neither this nor
    /// `--text` is given.
    #[clap(value_name = "FILE", conflicts_with = "text")]
    pub input_path: Option<PathBuf>,

    /// Text to process, given directly.
    #[clap(long)]
    pub text: Option<String>,

    /// Print the full result as JSON instead of just the text.
    #[clap(long)]
    pub json: bool,
}

impl TextInputOpts {
    /// Get our input text.
    pub async fn read(&self) -> Result<String> {
        match &self.text {
            Some(text) => Ok(text.clone()),
            None => read_text(self.input_path.as_deref()).await,
        }
    }

    /// The document ID to report, if we read from a file.
    pub fn document_id(&self) -> Option<String> {
        self.input_path
            .as_deref()
            .map(|path| path.display().to_string())
    }
}

/// Print a post-processing result. Failed results are returned as errors.
pub fn print_post_process_result(result: PostProcessResult, json: bool) -> Result<()> {
    if json {
        let line =
            serde_json::to_string(&result).context("failed to serialize result")?;
        println!("{line}");
    }
    let text = result.into_result()?;
    if !json {
        println!("{text}");
    }
    Ok(())
}
