use kgrep_core::ProgressReporter;
use kgrep_kafka::{KafkaClient, OffsetReset};
use tracing::info;

use crate::cmdline::grep::GrepArgs;
use crate::config::Settings;
use crate::error::Result;
use crate::{output, progress};

/// One-shot bounded search: connect, scan every partition, report.
pub(crate) async fn run(args: GrepArgs, settings: &Settings) -> Result<()> {
    let config = args
        .connection
        .kafka_config(settings, OffsetReset::Earliest)?;
    info!(
        topic = config.topic,
        group = config.consumer_group,
        start = ?args.request.start,
        limit = args.request.limit,
        "Starting search"
    );

    let connecting = progress::spinner("Connecting to Kafka");
    let client = KafkaClient::connect(config).await;
    connecting.finish_and_clear();
    let client = client?;

    let (reporter, events) = ProgressReporter::channel();
    let renderer = tokio::spawn(progress::render(
        progress::spinner("Reading messages"),
        events,
    ));
    let result = kgrep_core::grep(
        client,
        &args.connection.topic,
        &args.request,
        Some(reporter),
    )
    .await;
    // the reporter is gone with the engine, so the renderer drains and stops
    let _ = renderer.await;

    output::report(&result?, &args.output)
}
