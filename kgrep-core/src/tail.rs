//! Tail: an open-ended read loop from the current subscription position that runs on its own task
//! until it is cancelled or, optionally, a read count is reached.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{BrokerClient, ReadOutcome};
use crate::error::{Error, Result};
use crate::message::MessageFilter;
use crate::progress::{ProgressEvent, ProgressReporter, emit};
use crate::result::{ResultAccumulator, ScanResult};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How many reads a tail performs before stopping on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TailLimit {
    /// Only cancellation ends the tail.
    #[default]
    Unlimited,
    Count(u64),
}

impl TailLimit {
    /// `-1` is unlimited, any other non-negative value a read count.
    pub fn from_sentinel(limit: i64) -> Result<Self> {
        match limit {
            -1 => Ok(TailLimit::Unlimited),
            n => u64::try_from(n).map(TailLimit::Count).map_err(|_| {
                Error::InvalidArgument(format!("tail limit must be -1 or non-negative, got {n}"))
            }),
        }
    }

    fn reached(&self, read: u64) -> bool {
        match self {
            TailLimit::Unlimited => false,
            TailLimit::Count(n) => read >= *n,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TailState {
    Running = 0,
    Cancelling = 1,
    Stopped = 2,
}

impl From<u8> for TailState {
    fn from(value: u8) -> Self {
        match value {
            0 => TailState::Running,
            1 => TailState::Cancelling,
            _ => TailState::Stopped,
        }
    }
}

/// Running -> Cancelling. Any other state is left alone.
fn begin_cancelling(state: &AtomicU8) {
    let _ = state.compare_exchange(
        TailState::Running as u8,
        TailState::Cancelling as u8,
        Ordering::AcqRel,
        Ordering::Acquire,
    );
}

/// Configured, not yet started tail.
#[derive(Debug, Clone)]
pub struct TailEngine {
    filter: MessageFilter,
    limit: TailLimit,
    poll_interval: Duration,
    progress: Option<ProgressReporter>,
    cancel_token: CancellationToken,
}

impl TailEngine {
    pub fn new(filter: MessageFilter, limit: TailLimit, poll_interval: Duration) -> Result<Self> {
        if poll_interval.is_zero() {
            return Err(Error::InvalidArgument(
                "tail poll interval must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            filter,
            limit,
            poll_interval,
            progress: None,
            cancel_token: CancellationToken::new(),
        })
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Ties the tail to an externally owned token. Cancelling that token stops the tail just like
    /// [TailHandle::cancel].
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    /// Spawns the read loop. The task owns `client` and closes it once the loop ends.
    pub fn start<C>(self, client: C) -> TailHandle
    where
        C: BrokerClient + Send + 'static,
    {
        let state = Arc::new(AtomicU8::new(TailState::Running as u8));
        let cancel_token = self.cancel_token.clone();
        let task = tokio::spawn(run(self, client, Arc::clone(&state)));
        TailHandle {
            cancel_token,
            state,
            task,
        }
    }
}

async fn run<C: BrokerClient>(
    engine: TailEngine,
    mut client: C,
    state: Arc<AtomicU8>,
) -> Result<ScanResult> {
    let TailEngine {
        filter,
        limit,
        poll_interval,
        progress,
        cancel_token,
    } = engine;

    info!(?limit, ?poll_interval, "Starting tail");
    let expected = match limit {
        TailLimit::Unlimited => None,
        TailLimit::Count(n) => Some(n),
    };
    emit(progress.as_ref(), ProgressEvent::Started { expected });

    let mut acc = ResultAccumulator::start();
    let outcome = loop {
        if cancel_token.is_cancelled() {
            begin_cancelling(&state);
            debug!("Tail cancelled");
            break Ok(());
        }
        if limit.reached(acc.read()) {
            debug!(read = acc.read(), "Tail read limit reached");
            break Ok(());
        }

        let raw = match client.read_next(Some(poll_interval)).await {
            Ok(ReadOutcome::Message(raw)) => raw,
            Ok(ReadOutcome::Empty) => continue,
            Err(e) => break Err(e),
        };

        acc.record_read();
        let matched = match filter.apply(&raw) {
            Some(message) => {
                acc.record_match(message);
                true
            }
            None => false,
        };
        emit(
            progress.as_ref(),
            ProgressEvent::Advanced {
                read: 1,
                matched: u64::from(matched),
            },
        );
    };

    if let Err(e) = client.close().await {
        warn!(error = ?e, "Failed to close broker client after tail");
    }
    state.store(TailState::Stopped as u8, Ordering::Release);
    outcome?;

    let result = acc.finish();
    info!(read = result.read, matched = result.matched, "Tail stopped");
    emit(
        progress.as_ref(),
        ProgressEvent::Finished {
            read: result.read,
            matched: result.matched,
        },
    );
    Ok(result)
}

/// Handle of a running tail.
#[derive(Debug)]
pub struct TailHandle {
    cancel_token: CancellationToken,
    state: Arc<AtomicU8>,
    task: JoinHandle<Result<ScanResult>>,
}

impl TailHandle {
    /// Asks the read loop to stop. It does so at its next polling point, at most one poll
    /// interval later. Safe to call from any thread and more than once.
    pub fn cancel(&self) {
        begin_cancelling(&self.state);
        self.cancel_token.cancel();
    }

    /// Current state. A cancelled token counts as Cancelling even before the loop noticed it,
    /// whoever cancelled it.
    pub fn state(&self) -> TailState {
        match TailState::from(self.state.load(Ordering::Acquire)) {
            TailState::Running if self.cancel_token.is_cancelled() => TailState::Cancelling,
            state => state,
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Waits for the read loop to end and returns everything it collected.
    pub async fn wait(self) -> Result<ScanResult> {
        self.task.await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MemoryBroker;

    const POLL: Duration = Duration::from_millis(20);

    async fn wait_for_reads(broker: &MemoryBroker, n: u64) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while broker.reads_served() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("reads did not arrive in time");
    }

    #[test]
    fn test_limit_from_sentinel() {
        assert_eq!(TailLimit::from_sentinel(-1).unwrap(), TailLimit::Unlimited);
        assert_eq!(TailLimit::from_sentinel(0).unwrap(), TailLimit::Count(0));
        assert_eq!(TailLimit::from_sentinel(3).unwrap(), TailLimit::Count(3));
        assert!(matches!(
            TailLimit::from_sentinel(-2),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let err = TailEngine::new(MessageFilter::default(), TailLimit::Unlimited, Duration::ZERO)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_count_limit_stops_without_cancellation() {
        let broker = MemoryBroker::new();
        broker.add_partition(0, 0, 10);

        let engine =
            TailEngine::new(MessageFilter::new("key", ""), TailLimit::Count(3), POLL).unwrap();
        let handle = engine.start(broker.client());
        let token = handle.cancellation_token();
        let result = handle.wait().await.unwrap();

        assert_eq!(result.read, 3);
        assert_eq!(result.matched, 3);
        assert_eq!(broker.reads_served(), 3);
        assert!(!token.is_cancelled());
        assert!(broker.is_closed());
    }

    #[tokio::test]
    async fn test_cancel_keeps_collected_messages() {
        let broker = MemoryBroker::new();
        broker.add_partition(0, 0, 5);
        broker.start_at_end();

        let engine =
            TailEngine::new(MessageFilter::new("", "error"), TailLimit::Unlimited, POLL).unwrap();
        let handle = engine.start(broker.client());
        assert_eq!(handle.state(), TailState::Running);

        broker.produce(0, "a", "Error one");
        broker.produce(0, "b", "fine");
        broker.produce(0, "c", "ERROR two");
        wait_for_reads(&broker, 3).await;

        handle.cancel();
        assert_ne!(handle.state(), TailState::Running);
        tokio::time::sleep(POLL * 3).await;
        assert_eq!(handle.state(), TailState::Stopped);

        broker.produce(0, "d", "error after stop");
        let result = handle.wait().await.unwrap();
        assert_eq!(result.read, 3);
        assert_eq!(result.matched, 2);
        assert_eq!(result.messages[0].key, "c");
        assert_eq!(result.messages[1].key, "a");
        assert_eq!(broker.reads_served(), 3);
        assert!(broker.is_closed());
    }

    #[tokio::test]
    async fn test_external_token_cancels() {
        let broker = MemoryBroker::new();
        broker.add_partition(0, 0, 0);

        let token = CancellationToken::new();
        let engine = TailEngine::new(MessageFilter::new("k", ""), TailLimit::Unlimited, POLL)
            .unwrap()
            .with_cancellation(token.clone());
        let handle = engine.start(broker.client());

        let canceller = token.clone();
        std::thread::spawn(move || canceller.cancel());

        let result = tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .expect("tail did not stop")
            .unwrap();
        assert_eq!(result.read, 0);
    }

    #[tokio::test]
    async fn test_external_token_moves_through_cancelling() {
        let broker = MemoryBroker::new();
        broker.add_partition(0, 0, 0);
        let poll = Duration::from_millis(300);

        let token = CancellationToken::new();
        let engine = TailEngine::new(MessageFilter::new("k", ""), TailLimit::Unlimited, poll)
            .unwrap()
            .with_cancellation(token.clone());
        let handle = engine.start(broker.client());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.state(), TailState::Running);

        token.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handle.state(), TailState::Cancelling);

        tokio::time::sleep(poll * 2).await;
        assert_eq!(handle.state(), TailState::Stopped);
        let result = handle.wait().await.unwrap();
        assert_eq!(result.read, 0);
        assert!(broker.is_closed());
    }

    #[tokio::test]
    async fn test_read_error_ends_tail() {
        let broker = MemoryBroker::new();
        broker.add_partition(0, 0, 10);
        broker.fail_reads_after(2, "broker gone");

        let engine =
            TailEngine::new(MessageFilter::new("k", ""), TailLimit::Unlimited, POLL).unwrap();
        let handle = engine.start(broker.client());
        let err = handle.wait().await.unwrap_err();

        assert_eq!(err, Error::Read("broker gone".to_string()));
        assert!(broker.is_closed());
    }

    #[tokio::test]
    async fn test_close_failure_does_not_lose_result() {
        let broker = MemoryBroker::new();
        broker.add_partition(0, 0, 4);
        broker.fail_close("already gone");

        let engine =
            TailEngine::new(MessageFilter::new("key-1", ""), TailLimit::Count(4), POLL).unwrap();
        let result = engine.start(broker.client()).wait().await.unwrap();
        assert_eq!(result.read, 4);
        assert_eq!(result.matched, 1);
    }
}
