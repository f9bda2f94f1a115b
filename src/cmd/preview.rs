//! The `preview` subcommand.

use clap::Args;

use crate::{
    cmd::WorkerOpts,
    prelude::*,
    preprocess::{PREVIEW_SIZE, PreprocessOpts, SourceImage},
    ui::{ProgressConfig, Ui},
};

/// Options for the `preview` subcommand.
#[derive(Args, Debug)]
pub struct PreviewOpts {
    /// The image to preview.
    #[clap(value_name = "IMAGE")]
    pub input_path: PathBuf,

    #[clap(flatten)]
    pub preprocess: PreprocessOpts,

    #[clap(flatten)]
    pub worker: WorkerOpts,

    /// Where to write the preview PNG.
    #[clap(short = 'o', long = "out")]
    pub output_path: PathBuf,

    /// Maximum preview width.
    #[clap(long, default_value_t = PREVIEW_SIZE.0)]
    pub width: u32,

    /// Maximum preview height.
    #[clap(long, default_value_t = PREVIEW_SIZE.1)]
    pub height: u32,
}

/// The `preview` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_preview(ui: Ui, opts: &PreviewOpts) -> Result<()> {
    let (mut session, worker) = opts.worker.start_session()?;
    session.set_params(opts.preprocess.to_params()?);
    session.set_preview_size(opts.width, opts.height);

    let spinner = ui.new_spinner(&ProgressConfig {
        emoji: "🖼️",
        msg: "Rendering preview",
        done_msg: "Rendered preview",
    });
    let preview = session
        .update_preview(&SourceImage::from_path(&opts.input_path))
        .await?;
    let png = preview.image.to_png()?;
    info!(
        id = %preview.document_id,
        width = preview.image.width(),
        height = preview.image.height(),
        black_pixels = preview.image.black_pixel_count(),
        "Rendered preview"
    );
    tokio::fs::write(&opts.output_path, png)
        .await
        .with_context(|| format!("failed to write {:?}", opts.output_path))?;
    spinner.finish_using_style();

    drop(session);
    worker.join().await
}
