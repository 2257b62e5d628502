use std::io::BufRead;

use kgrep_core::{ProgressReporter, TailEngine};
use kgrep_kafka::{KafkaClient, OffsetReset};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cmdline::tail::TailArgs;
use crate::config::Settings;
use crate::error::Result;
use crate::{output, progress};

/// Cancels `token` once a line (or EOF) arrives on stdin. Runs on a plain thread: a blocking stdin
/// read cannot be interrupted, and a detached thread never holds up runtime shutdown.
fn watch_stdin(token: CancellationToken) {
    let spawned = std::thread::Builder::new()
        .name("stdin-watcher".to_string())
        .spawn(move || {
            let mut line = String::new();
            if let Err(e) = std::io::stdin().lock().read_line(&mut line) {
                warn!(error = ?e, "Reading stdin failed, press Ctrl-C to stop");
                return;
            }
            debug!("Enter pressed, stopping tail");
            token.cancel();
        });
    if let Err(e) = spawned {
        warn!(error = ?e, "Could not watch stdin, press Ctrl-C to stop");
    }
}

/// Cancels `token` on Ctrl-C. Ends as soon as the token is cancelled for any other reason.
fn watch_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => match signal {
                Ok(()) => {
                    debug!("Ctrl-C received, stopping tail");
                    token.cancel();
                }
                Err(e) => warn!(error = ?e, "Could not listen for Ctrl-C"),
            },
            _ = token.cancelled() => {}
        }
    });
}

/// Open-ended tail from the end of the topic until Enter, Ctrl-C or the read limit.
pub(crate) async fn run(args: TailArgs, settings: &Settings) -> Result<()> {
    // validated before connecting
    let engine = TailEngine::new(args.filter.clone(), args.limit, settings.poll_interval)?;
    let config = args
        .connection
        .kafka_config(settings, OffsetReset::Latest)?;
    info!(
        topic = config.topic,
        group = config.consumer_group,
        limit = ?args.limit,
        "Starting tail"
    );

    println!("Press enter to stop reading messages");
    println!();

    let connecting = progress::spinner("Connecting to Kafka");
    let client = KafkaClient::connect(config).await;
    connecting.finish_and_clear();
    let client = client?;

    let token = CancellationToken::new();
    let (reporter, events) = ProgressReporter::channel();
    let renderer = tokio::spawn(progress::render(
        progress::spinner("Reading messages"),
        events,
    ));

    let handle = engine
        .with_progress(reporter)
        .with_cancellation(token.clone())
        .start(client);
    watch_stdin(token.clone());
    watch_ctrl_c(token.clone());

    let result = handle.wait().await;
    // stops the Ctrl-C listener when the tail ended on its own
    token.cancel();
    let _ = renderer.await;

    output::report(&result?, &args.output)
}
