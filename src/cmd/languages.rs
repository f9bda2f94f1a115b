//! The `languages` subcommand.

use clap::Args;

use crate::{
    language::RecognitionLanguage, postprocess::translate::TranslationTarget, prelude::*,
};

/// Options for the `languages` subcommand.
#[derive(Args, Debug)]
pub struct LanguagesOpts {
    /// List translation targets instead of recognition languages.
    #[clap(long)]
    pub targets: bool,
}

/// The `languages` subcommand. Prints one `name<TAB>code` line per language.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_languages(opts: &LanguagesOpts) -> Result<()> {
    if opts.targets {
        for target in TranslationTarget::all() {
            println!("{}\t{}", target.name(), target.code());
        }
    } else {
        for (_, name, code) in RecognitionLanguage::ALL {
            println!("{name}\t{code}");
        }
    }
    Ok(())
}
