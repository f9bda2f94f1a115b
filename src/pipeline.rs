//! Running a single document from image to text.

use std::sync::Arc;

use crate::{
    async_utils::spawn_blocking_propagating_panics,
    language::{LanguageDetector, RecognitionLanguage, UNDETERMINED},
    ocr::{self, EngineMode, OcrEngine, PageSegMode, RecognizeRequest},
    prelude::*,
    preprocess::{self, NormalizedImage, PreprocessParams, SourceImage},
    queues::work::{ExtractionResult, ExtractionStatus},
};

/// Normalize, extract and detect, for one document at a time.
#[derive(Clone)]
pub struct DocumentPipeline {
    engine: Arc<dyn OcrEngine>,
    detector: LanguageDetector,
    engine_mode: EngineMode,
}

impl DocumentPipeline {
    /// Create a new pipeline around an OCR engine.
    pub fn new(
        engine: Arc<dyn OcrEngine>,
        detector: LanguageDetector,
        engine_mode: EngineMode,
    ) -> Self {
        Self {
            engine,
            detector,
            engine_mode,
        }
    }

    /// Process one document.
    pub async fn run(
        &self,
        doc: &SourceImage,
        lang: RecognitionLanguage,
        params: PreprocessParams,
    ) -> ExtractionResult {
        self.run_with_preview(doc, lang, params).await.0
    }

    /// Process one document, also returning the normalized image if we got
    /// that far.
    #[instrument(level = "debug", skip_all, fields(id = %doc.id, language = %lang))]
    pub async fn run_with_preview(
        &self,
        doc: &SourceImage,
        lang: RecognitionLanguage,
        params: PreprocessParams,
    ) -> (ExtractionResult, Option<NormalizedImage>) {
        // Normalization is pure CPU work, so keep it off the async threads.
        let owned_doc = doc.clone();
        let normalized = spawn_blocking_propagating_panics(move || {
            preprocess::normalize(&owned_doc, &params)
        })
        .await;
        let image = match normalized {
            Ok(image) => image,
            Err(err) => {
                warn!("Could not normalize image: {}", err);
                let status = ExtractionStatus::invalid_image(&err);
                return (ExtractionResult::without_text(&doc.id, status), None);
            }
        };
        debug!(
            width = image.width(),
            height = image.height(),
            black_pixels = image.black_pixel_count(),
            blank = image.is_blank(),
            "Normalized image"
        );

        let request = RecognizeRequest {
            language: lang,
            layout: PageSegMode::SingleBlock,
            engine_mode: self.engine_mode,
        };
        let extraction = ocr::extract(self.engine.as_ref(), &image, &request).await;

        let detected_language = match extraction.status {
            ExtractionStatus::Success => self.detector.detect(&extraction.text),
            ExtractionStatus::Empty => {
                warn!("No text detected. Try another image or adjust preprocessing.");
                UNDETERMINED.to_owned()
            }
            ExtractionStatus::Failed { .. } => UNDETERMINED.to_owned(),
        };
        let result = ExtractionResult {
            document_id: doc.id.clone(),
            raw_text: extraction.text,
            detected_language,
            status: extraction.status,
        };
        (result, Some(image))
    }
}
