use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

use self::{prelude::*, ui::Ui};

mod async_utils;
mod cmd;
mod export;
mod language;
mod ocr;
mod pipeline;
mod postprocess;
mod prelude;
mod preprocess;
mod queues;
mod retry;
mod session;
mod ui;

/// Extract text from document images, then translate or summarize it.
#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    after_help = r#"
Environment Variables:
  - TESSERACT_CMD (optional): The `tesseract` executable to run.
  - TRANSLATE_API_BASE (optional): Override the translation server URL.
  - TRANSLATE_API_KEY (optional): The translation server's API key.

  These variables may be set in a standard `.env` file.
"#
)]
struct Opts {
    #[clap(subcommand)]
    subcmd: Cmd,
}

/// The subcommands we support.
#[derive(Debug, Subcommand)]
enum Cmd {
    /// Extract text from images, writing one result per image.
    Extract(cmd::extract::ExtractOpts),
    /// Write a preprocessed, shrunken copy of an image as a PNG.
    Preview(cmd::preview::PreviewOpts),
    /// Translate text using the translation service.
    Translate(cmd::translate::TranslateCmdOpts),
    /// Pull short noun-phrase-like fragments out of text.
    Summarize(cmd::analyze::AnalyzeOpts),
    /// List the words of a text.
    Keywords(cmd::analyze::AnalyzeOpts),
    /// List recognition languages or translation targets.
    Languages(cmd::languages::LanguagesOpts),
    /// Print schemas for output formats.
    Schema(cmd::schema::SchemaOpts),
}

impl Cmd {
    /// Are we using stdout for output?
    fn using_stdout_for_output(&self) -> bool {
        match self {
            Cmd::Extract(opts) => opts.output_path.is_none(),
            Cmd::Preview(_) => false,
            Cmd::Translate(_) | Cmd::Summarize(_) | Cmd::Keywords(_) => true,
            Cmd::Languages(_) => true,
            Cmd::Schema(opts) => opts.output_path.is_none(),
        }
    }
}

/// Our entry point, which can return an error. [`anyhow::Result`] will
/// automatically print a nice error message with optional backtrace.
#[tokio::main]
async fn main() -> Result<()> {
    let ui = Ui::init();

    // Initialize tracing.
    let directive =
        Directive::from_str("info").expect("built-in directive should be valid");
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_writer(ui.get_stderr_writer())
        .with_filter(env_filter);

    // We can stack multiple layers here if we need to.
    tracing_subscriber::registry().with(subscriber).init();

    // Call our real `main` function now that logging is set up.
    real_main(ui).await
}

/// Our real entry point.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main(ui: Ui) -> Result<()> {
    // Load environment variables from a `.env` file, if it exists.
    dotenvy::dotenv().ok();

    // Parse command-line arguments.
    let opts = Opts::parse();
    debug!("Parsed options: {:?}", opts);

    // Hide the progress bar if we're using stdout for output.
    if opts.subcmd.using_stdout_for_output() {
        ui.hide_progress_bars();
    }

    // Run the appropriate subcommand.
    match &opts.subcmd {
        Cmd::Extract(opts) => {
            cmd::extract::cmd_extract(ui, opts).await?;
        }
        Cmd::Preview(opts) => {
            cmd::preview::cmd_preview(ui, opts).await?;
        }
        Cmd::Translate(opts) => {
            cmd::translate::cmd_translate(opts).await?;
        }
        Cmd::Summarize(opts) => {
            cmd::analyze::cmd_analyze(cmd::analyze::Analysis::Summarize, opts).await?;
        }
        Cmd::Keywords(opts) => {
            cmd::analyze::cmd_analyze(cmd::analyze::Analysis::Keywords, opts).await?;
        }
        Cmd::Languages(opts) => {
            cmd::languages::cmd_languages(opts).await?;
        }
        Cmd::Schema(schema_opts) => {
            cmd::schema::cmd_schema(schema_opts).await?;
        }
    }
    Ok(())
}
