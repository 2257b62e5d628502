//! Terminal progress: turns the engines' [ProgressEvent]s into indicatif bars on stderr.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use kgrep_core::{ProgressEvent, ProgressStream};
use tokio_stream::StreamExt;
use tracing::warn;

const TICK: Duration = Duration::from_millis(100);

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} {msg} [{elapsed}]")
        .unwrap_or_else(|e| {
            warn!(error = ?e, "Invalid spinner template");
            ProgressStyle::default_spinner()
        })
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg:<32} [{bar:30.yellow}] {pos}/{len} [{elapsed}]")
        .map(|style| style.progress_chars("=> "))
        .unwrap_or_else(|e| {
            warn!(error = ?e, "Invalid progress bar template");
            ProgressStyle::default_bar()
        })
}

fn reading_message(matched: u64) -> String {
    format!("Reading messages ({matched} matches)")
}

/// Spinner shown while a step of unknown length runs, e.g. connecting.
pub(crate) fn spinner(message: &'static str) -> ProgressBar {
    let bar = ProgressBar::new_spinner()
        .with_style(spinner_style())
        .with_message(message);
    bar.enable_steady_tick(TICK);
    bar
}

/// Draws `events` onto `bar` until the stream ends. Bounded runs get a determinate bar, open-ended
/// runs a spinner.
pub(crate) async fn render(bar: ProgressBar, mut events: ProgressStream) {
    let mut matched = 0;
    bar.set_message(reading_message(matched));

    while let Some(event) = events.next().await {
        match event {
            ProgressEvent::Started {
                expected: Some(total),
            } => {
                bar.set_style(bar_style());
                bar.set_length(total);
                bar.set_position(0);
            }
            ProgressEvent::Started { expected: None } => {
                bar.set_style(spinner_style());
                bar.enable_steady_tick(TICK);
            }
            ProgressEvent::Advanced {
                read,
                matched: delta,
            } => {
                bar.inc(read);
                if delta > 0 {
                    matched += delta;
                    bar.set_message(reading_message(matched));
                }
            }
            ProgressEvent::Finished { matched: total, .. } => {
                bar.finish_with_message(reading_message(total));
            }
        }
    }

    if !bar.is_finished() {
        bar.abandon();
    }
}

#[cfg(test)]
mod tests {
    use kgrep_core::ProgressReporter;

    use super::*;
    use kgrep_core::test_utils::MemoryBroker;
    use kgrep_core::{GrepRequest, MessageFilter, StartPolicy, grep};

    #[tokio::test]
    async fn test_render_bounded_scan() {
        let broker = MemoryBroker::new();
        broker.add_partition(0, 0, 4);
        broker.add_partition(1, 0, 2);
        broker.set_value(1, 1, "needle");

        let (reporter, stream) = ProgressReporter::channel();
        let bar = ProgressBar::hidden();
        let renderer = tokio::spawn(render(bar.clone(), stream));

        let request = GrepRequest {
            filter: MessageFilter::new("", "needle"),
            limit: 10,
            start: StartPolicy::Earliest,
        };
        grep(broker.client(), "orders", &request, Some(reporter))
            .await
            .unwrap();
        renderer.await.unwrap();

        assert_eq!(bar.length(), Some(6));
        assert_eq!(bar.position(), 6);
        assert!(bar.is_finished());
        assert_eq!(bar.message(), "Reading messages (1 matches)");
    }

    #[tokio::test]
    async fn test_render_abandons_on_early_end() {
        let (reporter, stream) = ProgressReporter::channel();
        let bar = ProgressBar::hidden();
        let renderer = tokio::spawn(render(bar.clone(), stream));
        drop(reporter);
        renderer.await.unwrap();
        assert!(bar.is_finished());
        assert_eq!(bar.position(), 0);
    }
}
