//! Progress reporting. Engines push [ProgressEvent]s into an unbounded channel, whoever renders
//! them consumes the matching [ProgressStream].

use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    /// A run started. `expected` is the total number of reads if the run is bounded.
    Started { expected: Option<u64> },
    /// Delta since the previous event.
    Advanced { read: u64, matched: u64 },
    /// Totals of the finished run.
    Finished { read: u64, matched: u64 },
}

pub type ProgressStream = UnboundedReceiverStream<ProgressEvent>;

/// Sending half handed to an engine. Sends never block and are dropped silently once the
/// receiving side is gone, rendering is best-effort.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressReporter {
    pub fn channel() -> (Self, ProgressStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, UnboundedReceiverStream::new(rx))
    }

    pub(crate) fn report(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

/// Emits through an optional reporter.
pub(crate) fn emit(reporter: Option<&ProgressReporter>, event: ProgressEvent) {
    if let Some(reporter) = reporter {
        reporter.report(event);
    }
}
