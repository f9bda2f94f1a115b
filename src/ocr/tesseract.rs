//! OCR engine wrapping the `tesseract` CLI tool.

use std::{ffi::OsStr, sync::LazyLock, time::Duration};

use regex::Regex;
use tokio::{process::Command, time};

use crate::{async_utils::check_for_command_failure, preprocess::NormalizedImage, prelude::*};

use super::{OcrEngine, RecognizeRequest};

/// Treat a missing language model as a failure, even if `tesseract` exits
/// successfully.
static LOAD_ERROR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^(Failed loading language|Tesseract couldn't load any languages)")
        .expect("built-in regex should be valid")
});

/// OCR engine wrapping the `tesseract` CLI tool.
pub struct TesseractOcrEngine {
    /// The executable to run.
    command: PathBuf,
    /// Kill `tesseract` if it runs longer than this.
    timeout: Option<Duration>,
}

impl TesseractOcrEngine {
    /// Create a new `tesseract` engine.
    pub fn new(command: PathBuf, timeout: Option<Duration>) -> Self {
        Self { command, timeout }
    }

    /// Build the command line for one image.
    fn command_for(&self, input_path: &Path, request: &RecognizeRequest) -> Command {
        let mut cmd = Command::new(&self.command);
        cmd.arg(input_path)
            // Write recognized text to standard output instead of a file.
            .arg("stdout")
            .arg("--psm")
            .arg(request.layout.psm().to_string())
            .arg("--oem")
            .arg(request.engine_mode.oem().to_string())
            .arg("-l")
            .arg(OsStr::new(request.language.engine_code()))
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl OcrEngine for TesseractOcrEngine {
    #[instrument(level = "debug", skip_all, fields(language = %request.language))]
    async fn recognize(
        &self,
        image: &NormalizedImage,
        request: &RecognizeRequest,
    ) -> Result<String> {
        // Write our input to a temporary file.
        let tmpdir = tempfile::TempDir::with_prefix("tesseract")?;
        let input_path = tmpdir.path().join("input.png");
        let png = image.to_png()?;
        tokio::fs::write(&input_path, &png)
            .await
            .context("cannot write tesseract input file")?;

        // Run tesseract on the input file.
        let mut cmd = self.command_for(&input_path, request);
        let output = match self.timeout {
            Some(timeout) => time::timeout(timeout, cmd.output())
                .await
                .map_err(|_| anyhow!("tesseract timed out after {:?}", timeout))?,
            None => cmd.output().await,
        }
        .with_context(|| format!("cannot run {:?}", self.command.display()))?;
        check_for_command_failure("tesseract", &output, Some(&*LOAD_ERROR_REGEX))?;

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!(chars = text.chars().count(), "tesseract finished");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use super::*;
    use crate::{
        language::RecognitionLanguage,
        ocr::{EngineMode, PageSegMode},
        preprocess::{PreprocessParams, normalize_rgb},
    };

    fn request() -> RecognizeRequest {
        RecognizeRequest {
            language: RecognitionLanguage::French,
            layout: PageSegMode::SingleBlock,
            engine_mode: EngineMode::Lstm,
        }
    }

    fn white_image() -> NormalizedImage {
        normalize_rgb(
            &RgbImage::from_pixel(8, 8, Rgb([255, 255, 255])),
            &PreprocessParams::default(),
        )
    }

    #[test]
    fn builds_expected_arguments() {
        let engine = TesseractOcrEngine::new("tesseract".into(), None);
        let cmd = engine.command_for(Path::new("/tmp/in.png"), &request());
        let args = cmd
            .as_std()
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        assert_eq!(
            args,
            ["/tmp/in.png", "stdout", "--psm", "6", "--oem", "1", "-l", "fra"]
        );
    }

    #[tokio::test]
    async fn missing_executable_is_an_error() {
        let engine =
            TesseractOcrEngine::new("/nonexistent/bin/tesseract".into(), None);
        let err = engine
            .recognize(&white_image(), &request())
            .await
            .unwrap_err();
        assert!(format!("{err:?}").contains("cannot run"), "{err:?}");
    }

    #[test]
    fn detects_missing_language_models() {
        let stderr = "Error opening data file /usr/share/tessdata/hin.traineddata\n\
                      Failed loading language 'hin'\n\
                      Tesseract couldn't load any languages!\n";
        assert!(LOAD_ERROR_REGEX.is_match(stderr));
        assert!(!LOAD_ERROR_REGEX.is_match("Estimating resolution as 300\n"));
    }

    #[tokio::test]
    #[ignore = "Needs tesseract installed"]
    async fn blank_page_has_no_text() -> Result<()> {
        let engine = TesseractOcrEngine::new("tesseract".into(), None);
        let mut request = request();
        request.language = RecognitionLanguage::English;
        let text = engine.recognize(&white_image(), &request).await?;
        assert!(text.trim().is_empty(), "{text:?}");
        Ok(())
    }
}
