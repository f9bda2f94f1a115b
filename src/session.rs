//! Per-user settings and the current preview, owned by one controller.
//!
//! The front end keeps one [`Session`] and calls into it. Nothing in here is
//! global, and the OCR and translation engines are only ever touched by the
//! orchestrator's worker.

use crate::{
    async_utils::spawn_blocking_propagating_panics,
    language::RecognitionLanguage,
    postprocess::{Operation, PostProcessRequest, PostProcessResult},
    prelude::*,
    preprocess::{self, InvalidImage, NormalizedImage, PREVIEW_SIZE, PreprocessParams, SourceImage},
    queues::batch::{BatchHandle, BatchOrchestrator},
};

/// The most recent preview.
#[derive(Clone, Debug)]
pub struct Preview {
    /// Which document this is a preview of.
    pub document_id: String,
    /// The normalized image, shrunk to fit the preview area.
    pub image: NormalizedImage,
}

/// Settings and state for one interactive user.
pub struct Session {
    language: RecognitionLanguage,
    params: PreprocessParams,
    preview_size: (u32, u32),
    preview: Option<Preview>,
    orchestrator: BatchOrchestrator,
}

impl Session {
    /// Create a session with default settings.
    pub fn new(orchestrator: BatchOrchestrator) -> Self {
        Self {
            language: RecognitionLanguage::default(),
            params: PreprocessParams::default(),
            preview_size: PREVIEW_SIZE,
            preview: None,
            orchestrator,
        }
    }

    /// The recognition language used for new batches.
    pub fn language(&self) -> RecognitionLanguage {
        self.language
    }

    /// Select a recognition language by name or engine code. Unknown
    /// languages are rejected, and the previous selection is kept.
    pub fn select_language(&mut self, language: &str) -> Result<RecognitionLanguage> {
        self.language = language.parse()?;
        Ok(self.language)
    }

    /// The preprocessing parameters used for new batches and previews.
    pub fn params(&self) -> PreprocessParams {
        self.params
    }

    /// Replace the preprocessing parameters.
    pub fn set_params(&mut self, params: PreprocessParams) {
        self.params = params;
    }

    /// Change the bounding box used for previews.
    pub fn set_preview_size(&mut self, width: u32, height: u32) {
        self.preview_size = (width.max(1), height.max(1));
    }

    /// Normalize `doc` with the current parameters and make it the current
    /// preview. On failure, the previous preview is cleared.
    #[instrument(level = "debug", skip_all, fields(id = %doc.id))]
    pub async fn update_preview(
        &mut self,
        doc: &SourceImage,
    ) -> Result<&Preview, InvalidImage> {
        let owned_doc = doc.clone();
        let params = self.params;
        let (max_width, max_height) = self.preview_size;
        let normalized = spawn_blocking_propagating_panics(move || {
            preprocess::normalize(&owned_doc, &params)
                .map(|image| image.preview(max_width, max_height))
        })
        .await;
        match normalized {
            Ok(image) => Ok(self.preview.insert(Preview {
                document_id: doc.id.clone(),
                image,
            })),
            Err(err) => {
                self.preview = None;
                Err(err)
            }
        }
    }

    /// Submit a batch using the current language and parameters.
    pub fn submit(&self, documents: Vec<SourceImage>) -> Result<BatchHandle> {
        self.orchestrator
            .submit(documents, self.language, self.params)
    }

    /// Translate text into `target`.
    pub async fn translate(
        &self,
        document_id: Option<String>,
        text: String,
        target: &str,
    ) -> Result<PostProcessResult> {
        self.post_process(
            document_id,
            text,
            Operation::Translate {
                target: target.to_owned(),
            },
        )
        .await
    }

    /// Summarize text as noun-phrase-like fragments.
    pub async fn summarize(
        &self,
        document_id: Option<String>,
        text: String,
    ) -> Result<PostProcessResult> {
        self.post_process(document_id, text, Operation::Summarize)
            .await
    }

    /// List the words of a text.
    pub async fn keywords(
        &self,
        document_id: Option<String>,
        text: String,
    ) -> Result<PostProcessResult> {
        self.post_process(document_id, text, Operation::Keywords)
            .await
    }

    async fn post_process(
        &self,
        document_id: Option<String>,
        text: String,
        operation: Operation,
    ) -> Result<PostProcessResult> {
        self.orchestrator
            .post_process(PostProcessRequest {
                document_id,
                text,
                operation,
            })
            .await
    }
}
