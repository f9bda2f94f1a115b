//! I/O utilities.
//!
//! We read plain text from files or standard input, and write JSONL or CSV
//! records to files or standard output.

use futures::{StreamExt as _, pin_mut};
use tokio::{
    fs::File,
    io::{AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _, BufWriter},
};

use crate::prelude::*;

use super::BoxedStream;

/// A stream of [`serde_json::Value`] values.
pub type JsonStream = BoxedStream<Result<Value>>;

/// Read all of a UTF-8 text file, or standard input if `path` is `None`.
pub async fn read_text(path: Option<&Path>) -> Result<String> {
    let mut text = String::new();
    match path {
        Some(path) => {
            File::open(path)
                .await
                .with_context(|| format!("Failed to open file at path: {:?}", path))?
                .read_to_string(&mut text)
                .await
                .with_context(|| format!("Failed to read text from {:?}", path))?;
        }
        None => {
            tokio::io::stdin()
                .read_to_string(&mut text)
                .await
                .context("Failed to read text from stdin")?;
        }
    }
    Ok(text)
}

/// Create an [`AsyncWrite`] for a file or stdout.
pub async fn create_writer(
    path: Option<&Path>,
) -> Result<Box<dyn AsyncWrite + Unpin + Send + Sync + 'static>> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .await
                .with_context(|| format!("Failed to create file at path: {:?}", path))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(tokio::io::stdout())),
    }
}

/// Write a stream of JSON values to either standard output or a file, one
/// per line.
pub async fn write_output(path: Option<&Path>, stream: JsonStream) -> Result<()> {
    let mut writer = BufWriter::new(create_writer(path).await?);
    pin_mut!(stream);
    while let Some(value) = stream.next().await {
        let value = value?;
        let json = serde_json::to_string(&value)
            .with_context(|| format!("Failed to serialize JSON from value: {:?}", value))?;
        writer
            .write_all(json.as_bytes())
            .await
            .context("Failed to write JSON to output")?;
        writer
            .write_all(b"\n")
            .await
            .context("Failed to write newline to output")?;
        // Records may arrive slowly, so make each one visible as it arrives.
        writer.flush().await.context("Failed to flush output")?;
    }
    writer.flush().await.context("Failed to flush output")?;
    Ok(())
}

/// Write a stream of flat records to either standard output or a file as
/// CSV, with a header row.
pub async fn write_output_csv<T>(
    path: Option<&Path>,
    stream: BoxedStream<Result<T>>,
) -> Result<()>
where
    T: Serialize + Send + 'static,
{
    let writer = create_writer(path).await?;
    let mut wtr = csv_async::AsyncWriterBuilder::new().create_serializer(writer);
    pin_mut!(stream);
    while let Some(record) = stream.next().await {
        let record = record?;
        wtr.serialize(&record)
            .await
            .context("Failed to write CSV record to output")?;
    }
    wtr.flush().await.context("Failed to flush output")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;

    #[derive(Serialize)]
    struct Row {
        id: &'static str,
        text: &'static str,
    }

    #[tokio::test]
    async fn writes_jsonl() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out.jsonl");
        let values = vec![
            Ok(serde_json::json!({ "a": 1 })),
            Ok(serde_json::json!({ "a": 2 })),
        ];
        write_output(Some(&path), stream::iter(values).boxed()).await?;
        assert_eq!(std::fs::read_to_string(&path)?, "{\"a\":1}\n{\"a\":2}\n");
        Ok(())
    }

    #[tokio::test]
    async fn writes_csv_with_headers() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out.csv");
        let rows = vec![
            Ok(Row { id: "a", text: "one" }),
            Ok(Row { id: "b", text: "two, three" }),
        ];
        write_output_csv(Some(&path), stream::iter(rows).boxed()).await?;
        assert_eq!(
            std::fs::read_to_string(&path)?,
            "id,text\na,one\nb,\"two, three\"\n"
        );
        Ok(())
    }

    #[tokio::test]
    async fn reads_text_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("in.txt");
        std::fs::write(&path, "héllo\n")?;
        assert_eq!(read_text(Some(&path)).await?, "héllo\n");
        assert!(read_text(Some(&dir.path().join("missing.txt"))).await.is_err());
        Ok(())
    }
}
