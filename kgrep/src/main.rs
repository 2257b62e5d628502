use std::env;

use tracing::{error, info};

use crate::cmdline::grep::GrepArgs;
use crate::cmdline::tail::TailArgs;
use crate::config::Settings;
use crate::error::Result;

mod cmdline;
mod config;
mod error;
mod grep;
mod output;
mod progress;
mod setup_tracing;
mod tail;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load(env::vars());
    setup_tracing::register(
        settings
            .as_ref()
            .map(|s| s.log_format)
            .unwrap_or_default(),
    );

    if let Err(e) = run(settings?).await {
        error!("{e}");
        return Err(e);
    }
    info!("Exiting...");

    Ok(())
}

async fn run(settings: Settings) -> Result<()> {
    let matches = cmdline::root_cli().get_matches();
    // stderr keeps stdout to the results
    eprintln!("kgrep {}", env!("KGREP_VERSION_INFO"));
    info!(?settings, "Starting kgrep");

    match matches.subcommand() {
        Some(("grep", m)) => grep::run(GrepArgs::from_matches(m)?, &settings).await,
        Some(("tail", m)) => tail::run(TailArgs::from_matches(m)?, &settings).await,
        // subcommand_required rejects everything else before we get here
        _ => Ok(()),
    }
}
