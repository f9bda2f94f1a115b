//! The `summarize` and `keywords` subcommands.

use clap::Args;

use crate::{
    cmd::{TextInputOpts, WorkerOpts, print_post_process_result},
    prelude::*,
};

/// Which analysis to run.
#[derive(Clone, Copy, Debug)]
pub enum Analysis {
    Summarize,
    Keywords,
}

/// Options for the text analysis subcommands.
#[derive(Args, Debug)]
pub struct AnalyzeOpts {
    #[clap(flatten)]
    pub input: TextInputOpts,

    #[clap(flatten)]
    pub worker: WorkerOpts,
}

/// Run `summarize` or `keywords`.
#[instrument(level = "debug", skip_all, fields(analysis = ?analysis))]
pub async fn cmd_analyze(analysis: Analysis, opts: &AnalyzeOpts) -> Result<()> {
    let text = opts.input.read().await?;
    let document_id = opts.input.document_id();
    let (session, worker) = opts.worker.start_session()?;
    let result = match analysis {
        Analysis::Summarize => session.summarize(document_id, text).await?,
        Analysis::Keywords => session.keywords(document_id, text).await?,
    };
    drop(session);
    worker.join().await?;
    print_post_process_result(result, opts.input.json)
}
