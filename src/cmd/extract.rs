//! The `extract` subcommand.

use std::{collections::HashSet, sync::Arc};

use clap::Args;
use futures::{Stream, StreamExt as _, stream};
use tokio::io::AsyncReadExt as _;

use crate::{
    cmd::WorkerOpts,
    export::save_text,
    prelude::*,
    preprocess::{PreprocessOpts, SourceImage},
    queues::{
        batch::{BatchEvent, BatchHandle},
        run::BatchRun,
        work::{ExtractionResult, ExtractionStatus, OutputFormat},
    },
    ui::{ProgressConfig, Ui},
};

/// Options for the `extract` subcommand.
#[derive(Args, Debug)]
pub struct ExtractOpts {
    /// Images to extract text from. Use `-` to read one image from
    /// standard input.
    #[clap(value_name = "IMAGE", required = true)]
    pub input_paths: Vec<PathBuf>,

    /// The language of the text in the images. Accepts a name like
    /// "Spanish" or an engine code like "spa".
    #[clap(short = 'l', long, default_value = "English")]
    pub language: String,

    #[clap(flatten)]
    pub preprocess: PreprocessOpts,

    #[clap(flatten)]
    pub worker: WorkerOpts,

    /// Output format.
    #[clap(long, value_enum, default_value_t = OutputFormat::default())]
    pub format: OutputFormat,

    /// Output file. Defaults to standard output.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,

    /// Also save the text of each successful document to
    /// `DIR/<file stem>.txt`. Repeated stems are saved as `<stem>-2.txt` and
    /// so on.
    #[clap(long, value_name = "DIR")]
    pub save_text_dir: Option<PathBuf>,

    /// What portion of documents may fail before we report an error, from
    /// 0.0 to 1.0.
    #[clap(long, default_value = "1.0")]
    pub allowed_failure_rate: f32,
}

/// The `extract` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_extract(ui: Ui, opts: &ExtractOpts) -> Result<()> {
    let (mut session, worker) = opts.worker.start_session()?;
    session.select_language(&opts.language)?;
    session.set_params(opts.preprocess.to_params()?);

    let mut documents = Vec::with_capacity(opts.input_paths.len());
    let mut stems = Vec::with_capacity(opts.input_paths.len());
    for path in &opts.input_paths {
        if path == Path::new("-") {
            let mut bytes = vec![];
            tokio::io::stdin()
                .read_to_end(&mut bytes)
                .await
                .context("failed to read image from stdin")?;
            documents.push(SourceImage::from_bytes("stdin", bytes));
            stems.push("stdin".to_owned());
        } else {
            documents.push(SourceImage::from_path(path));
            stems.push(
                path.file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "document".to_owned()),
            );
        }
    }
    // Repeated file names would make results ambiguous and overwrite saved
    // text, so later duplicates get a numbered suffix.
    let ids = unique_names(documents.iter().map(|doc| doc.id.clone()), |id, n| {
        format!("{id}#{n}")
    });
    for (doc, id) in documents.iter_mut().zip(ids) {
        if doc.id != id {
            warn!(original = %doc.id, id = %id, "Renamed duplicate document");
            doc.id = id;
        }
    }
    let stems = Arc::<[String]>::from(unique_names(stems, |stem, n| format!("{stem}-{n}")));

    info!(
        language = %session.language(),
        params = ?session.params(),
        documents = documents.len(),
        "Extracting text"
    );
    let handle = session.submit(documents)?;
    let run = handle.run().clone();

    // Cancel the rest of the batch on Ctrl-C. The document in progress still
    // gets a result, unless Ctrl-C is pressed again.
    let canceller = handle.canceller();
    let batch_id = handle.batch_id();
    let ctrl_c = tokio::spawn(async move {
        let interrupts = stream::unfold((), |()| async {
            tokio::signal::ctrl_c().await.ok().map(|()| ((), ()))
        })
        .boxed();
        let cancel = move || {
            warn!(%batch_id, "Interrupted, cancelling remaining documents (Ctrl-C again to exit)");
            canceller.cancel();
        };
        if watch_interrupts(interrupts, cancel).await {
            error!(%batch_id, "Interrupted twice, exiting");
            std::process::exit(130);
        }
    });

    if let Some(dir) = &opts.save_text_dir {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("failed to create {:?}", dir))?;
    }

    let pb = ui.new_progress_bar(
        &ProgressConfig {
            emoji: "🔍",
            msg: "Extracting text",
            done_msg: "Extracted text",
        },
        opts.input_paths.len() as u64,
    );

    let save_text_dir = opts.save_text_dir.clone();
    let progress_run = run.clone();
    let output = stream::unfold(handle, |mut handle: BatchHandle| async move {
        handle.next_event().await.map(|event| (event, handle))
    })
    .filter_map(move |event| {
        let pb = pb.clone();
        let save_text_dir = save_text_dir.clone();
        let stems = stems.clone();
        let run = progress_run.clone();
        async move {
            match event {
                BatchEvent::Started { index, document_id } => {
                    trace!(index, id = %document_id, "Document started");
                    pb.set_message(document_id);
                    None
                }
                BatchEvent::Finished { index, result } => {
                    pb.set_position(run.progress().finished as u64);
                    Some(save_result_text(save_text_dir.as_deref(), &stems[index], result).await)
                }
                BatchEvent::Completed { summary } => {
                    pb.finish_using_style();
                    debug!(?summary, "Batch completed");
                    None
                }
            }
        }
    })
    .boxed();

    let written = ExtractionResult::write_stream(
        &ui,
        opts.output_path.as_deref(),
        opts.format,
        output,
        opts.allowed_failure_rate,
    )
    .await;
    ctrl_c.abort();
    report_unfinished(&run.snapshot());

    // Dropping the session closes the queue, so the worker can exit.
    drop(session);
    worker.join().await?;
    written
}

/// Warn about any documents that never got a result.
fn report_unfinished(run: &BatchRun) {
    let progress = run.progress();
    if progress.is_complete() {
        return;
    }
    warn!(
        total = progress.total,
        started = progress.started,
        finished = progress.finished,
        "Batch did not finish"
    );
    for (index, id) in run.document_ids().enumerate() {
        if run.result(index).is_none() {
            warn!(batch_id = %run.batch_id(), id, "Document has no result");
        }
    }
}

/// Call `cancel` on the first interrupt. Returns true if a second interrupt
/// arrives, and false if `interrupts` ends first.
async fn watch_interrupts(
    mut interrupts: impl Stream<Item = ()> + Unpin,
    cancel: impl FnOnce(),
) -> bool {
    if interrupts.next().await.is_none() {
        return false;
    }
    cancel();
    interrupts.next().await.is_some()
}

/// Make `names` unique. The second and later copies of a name are passed to
/// `rename` with a counter starting at 2, until the result is unused.
fn unique_names(
    names: impl IntoIterator<Item = String>,
    rename: impl Fn(&str, usize) -> String,
) -> Vec<String> {
    let names = names.into_iter().collect::<Vec<_>>();
    let mut used = HashSet::new();
    let mut unique = Vec::with_capacity(names.len());
    for name in &names {
        let mut candidate = name.clone();
        let mut n = 2;
        while used.contains(&candidate) || (candidate != *name && names.contains(&candidate)) {
            candidate = rename(name, n);
            n += 1;
        }
        used.insert(candidate.clone());
        unique.push(candidate);
    }
    unique
}

/// Save the text of a successful result, if we were asked to.
async fn save_result_text(
    dir: Option<&Path>,
    stem: &str,
    result: ExtractionResult,
) -> Result<ExtractionResult> {
    if let (Some(dir), ExtractionStatus::Success) = (dir, &result.status) {
        if let Some(path) = save_text(&dir.join(format!("{stem}.txt")), &result.raw_text).await? {
            debug!(path = %path.display(), "Saved text");
        }
    }
    Ok(result)
}
