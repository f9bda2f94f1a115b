//! The `translate` subcommand.

use clap::Args;

use crate::{
    cmd::{TextInputOpts, WorkerOpts, print_post_process_result},
    prelude::*,
};

/// Options for the `translate` subcommand.
#[derive(Args, Debug)]
pub struct TranslateCmdOpts {
    #[clap(flatten)]
    pub input: TextInputOpts,

    /// The target language, as a name like "Spanish" or a code like "es".
    /// Run `imgtext languages --targets` for a list.
    #[clap(long = "to", value_name = "LANGUAGE")]
    pub target: String,

    #[clap(flatten)]
    pub worker: WorkerOpts,
}

/// The `translate` subcommand.
#[instrument(level = "debug", skip_all, fields(target = %opts.target))]
pub async fn cmd_translate(opts: &TranslateCmdOpts) -> Result<()> {
    let text = opts.input.read().await?;
    let (session, worker) = opts.worker.start_session()?;
    let result = session
        .translate(opts.input.document_id(), text, &opts.target)
        .await?;
    drop(session);
    worker.join().await?;
    print_post_process_result(result, opts.input.json)
}
