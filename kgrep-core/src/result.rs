use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::message::Message;

/// Outcome of a single scan or tail run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanResult {
    /// Matched messages, most recently read first.
    pub messages: VecDeque<Message>,
    pub matched: u64,
    pub read: u64,
    pub elapsed: Duration,
}

/// Collects matches and counters while an engine run is in progress. Owned by exactly one run and
/// turned into a [ScanResult] when it ends.
#[derive(Debug)]
pub(crate) struct ResultAccumulator {
    messages: VecDeque<Message>,
    read: u64,
    started: Instant,
}

impl ResultAccumulator {
    pub(crate) fn start() -> Self {
        Self {
            messages: VecDeque::new(),
            read: 0,
            started: Instant::now(),
        }
    }

    pub(crate) fn record_read(&mut self) {
        self.read += 1;
    }

    pub(crate) fn record_match(&mut self, message: Message) {
        self.messages.push_front(message);
    }

    pub(crate) fn read(&self) -> u64 {
        self.read
    }

    pub(crate) fn finish(self) -> ScanResult {
        ScanResult {
            matched: self.messages.len() as u64,
            read: self.read,
            elapsed: self.started.elapsed(),
            messages: self.messages,
        }
    }
}
