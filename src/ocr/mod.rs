//! Text extraction from normalized images.
//!
//! The OCR engine itself is external. We only talk to it through
//! [`OcrEngine::recognize`], which makes it easy to swap in a scripted engine
//! for tests.

use std::{sync::Arc, time::Duration};

use clap::{Args, ValueEnum};

use crate::{
    language::RecognitionLanguage, preprocess::NormalizedImage, prelude::*,
    queues::work::ExtractionStatus,
};

pub mod tesseract;

/// How the engine should interpret page layout.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PageSegMode {
    /// Assume a single uniform block of text.
    #[default]
    SingleBlock,
}

impl PageSegMode {
    /// Tesseract's `--psm` value.
    pub fn psm(self) -> u8 {
        match self {
            PageSegMode::SingleBlock => 6,
        }
    }
}

/// Which recognizer the engine should run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "kebab-case")]
pub enum EngineMode {
    /// Neural network (LSTM) recognizer only.
    #[default]
    Lstm,
    /// Legacy recognizer combined with the LSTM recognizer. Needs
    /// `tessdata` models that include legacy data.
    LegacyLstm,
}

impl EngineMode {
    /// Tesseract's `--oem` value.
    pub fn oem(self) -> u8 {
        match self {
            EngineMode::Lstm => 1,
            EngineMode::LegacyLstm => 2,
        }
    }
}

/// Everything the engine needs to know besides the image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecognizeRequest {
    /// The language model to use.
    pub language: RecognitionLanguage,
    /// Page layout analysis mode.
    pub layout: PageSegMode,
    /// Recognizer mode.
    pub engine_mode: EngineMode,
}

/// Interface to an OCR engine.
///
/// Implementations need not be reentrant. The batch worker is the only
/// caller, and it makes one call at a time.
#[async_trait]
pub trait OcrEngine: Send + Sync + 'static {
    /// Recognize the text in an image.
    async fn recognize(
        &self,
        image: &NormalizedImage,
        request: &RecognizeRequest,
    ) -> Result<String>;
}

/// OCR engine options.
#[derive(Args, Clone, Debug)]
pub struct EngineOpts {
    /// The `tesseract` executable to run.
    #[clap(long, env = "TESSERACT_CMD", default_value = "tesseract")]
    pub tesseract_cmd: PathBuf,

    /// Recognizer mode.
    #[clap(long, value_enum, default_value_t = EngineMode::default())]
    pub engine_mode: EngineMode,

    /// Give up on a single image after this many seconds.
    #[clap(long = "ocr-timeout", value_name = "SECONDS")]
    pub timeout: Option<u64>,
}

impl EngineOpts {
    /// Build the OCR engine described by these options.
    pub fn create_engine(&self) -> Arc<dyn OcrEngine> {
        Arc::new(tesseract::TesseractOcrEngine::new(
            self.tesseract_cmd.clone(),
            self.timeout.map(Duration::from_secs),
        ))
    }
}

/// The outcome of running OCR on one image.
#[derive(Clone, Debug, PartialEq)]
pub struct Extraction {
    /// The raw text, exactly as the engine returned it.
    pub text: String,
    /// `Success`, `Empty`, or `Failed` with [`FailureReason::EngineFault`].
    ///
    /// [`FailureReason::EngineFault`]: crate::queues::work::FailureReason::EngineFault
    pub status: ExtractionStatus,
}

/// Run OCR on a normalized image and classify the outcome.
#[instrument(level = "debug", skip_all, fields(language = %request.language))]
pub async fn extract(
    engine: &dyn OcrEngine,
    image: &NormalizedImage,
    request: &RecognizeRequest,
) -> Extraction {
    match engine.recognize(image, request).await {
        Ok(text) if text.trim().is_empty() => Extraction {
            text,
            status: ExtractionStatus::Empty,
        },
        Ok(text) => Extraction {
            text,
            status: ExtractionStatus::Success,
        },
        Err(err) => {
            warn!("OCR engine failed: {:?}", err);
            Extraction {
                text: String::new(),
                status: ExtractionStatus::engine_fault(&err),
            }
        }
    }
}
