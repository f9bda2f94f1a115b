//! Saving extracted text to disk.

use crate::prelude::*;

/// Extensions we're willing to write. Rich-document extensions get plain
/// UTF-8 text, just like `.txt`.
const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "md", "rtf", "docx"];

/// Save `text` to `path`, adding a `.txt` extension if there is none.
///
/// Returns the path written, or `None` if `text` was empty or whitespace, in
/// which case nothing is written.
#[instrument(level = "debug", skip(text))]
pub async fn save_text(path: &Path, text: &str) -> Result<Option<PathBuf>> {
    if text.trim().is_empty() {
        debug!("No text to save");
        return Ok(None);
    }

    let path = match path.extension() {
        None => path.with_extension("txt"),
        Some(ext) => {
            let ext = ext.to_string_lossy().to_ascii_lowercase();
            if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
                return Err(anyhow!(
                    "cannot save text as {:?}, supported extensions are: {}",
                    path,
                    SUPPORTED_EXTENSIONS.join(", ")
                ));
            }
            if ext != "txt" && ext != "md" {
                warn!(path = %path.display(), "Saving plain text with a rich-document extension");
            }
            path.to_owned()
        }
    };

    tokio::fs::write(&path, text)
        .await
        .with_context(|| format!("Failed to write text to {:?}", path))?;
    Ok(Some(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn adds_txt_extension() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let saved = save_text(&dir.path().join("page"), "Hello World\n").await?;
        let saved = saved.expect("text should be saved");
        assert_eq!(saved, dir.path().join("page.txt"));
        assert_eq!(std::fs::read_to_string(&saved)?, "Hello World\n");
        Ok(())
    }

    #[tokio::test]
    async fn keeps_rich_document_extensions() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("page.DOCX");
        assert_eq!(save_text(&path, "Hola").await?, Some(path.clone()));
        assert_eq!(std::fs::read_to_string(&path)?, "Hola");
        Ok(())
    }

    #[tokio::test]
    async fn empty_text_is_a_no_op() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("empty.txt");
        assert_eq!(save_text(&path, " \n\t ").await?, None);
        assert!(!path.exists());
        Ok(())
    }

    #[tokio::test]
    async fn rejects_unknown_extensions() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(save_text(&dir.path().join("page.exe"), "text").await.is_err());
        Ok(())
    }
}
