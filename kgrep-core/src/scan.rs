//! Bounded scan: a one-shot read loop across every partition of a topic that stops once each
//! partition has delivered its share of the global limit.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, trace};

use crate::client::{BrokerClient, ReadOutcome};
use crate::error::{Error, Result};
use crate::message::MessageFilter;
use crate::partition::PartitionTable;
use crate::progress::{ProgressEvent, ProgressReporter, emit};
use crate::result::{ResultAccumulator, ScanResult};
use crate::seek::{StartPolicy, seek};

/// Per-partition read budget: `min(limit, high - start)` for every partition of the (post-seek)
/// table.
pub fn partition_limits(table: &PartitionTable, limit: i64) -> Result<BTreeMap<i32, u64>> {
    let limit = u64::try_from(limit)
        .map_err(|_| Error::InvalidArgument(format!("limit must not be negative, got {limit}")))?;
    Ok(table
        .iter()
        .map(|p| (p.id(), p.available().min(limit)))
        .collect())
}

/// Per-partition read counters of one run, checked against the budget. A partition is also done
/// once it delivered its last offset: offsets can have gaps (compaction, transaction markers), so
/// the counter alone may never reach the limit.
#[derive(Debug)]
struct Budget {
    limits: BTreeMap<i32, u64>,
    counters: BTreeMap<i32, u64>,
    /// Offset of the newest message of each partition, `high - 1`.
    last_offsets: BTreeMap<i32, i64>,
    consumed: BTreeSet<i32>,
}

impl Budget {
    fn new(table: &PartitionTable, limits: BTreeMap<i32, u64>) -> Self {
        let counters = limits.keys().map(|id| (*id, 0)).collect();
        let last_offsets = table.iter().map(|p| (p.id(), p.high_offset() - 1)).collect();
        Self {
            limits,
            counters,
            last_offsets,
            consumed: BTreeSet::new(),
        }
    }

    fn total(&self) -> u64 {
        self.limits.values().sum()
    }

    fn done(&self, partition: i32) -> bool {
        if self.consumed.contains(&partition) {
            return true;
        }
        match (self.limits.get(&partition), self.counters.get(&partition)) {
            (Some(limit), Some(counter)) => counter >= limit,
            _ => true,
        }
    }

    fn exhausted(&self) -> bool {
        self.limits.keys().all(|id| self.done(*id))
    }

    /// Counts a read against its partition. Returns false if the partition is unknown or already
    /// done.
    fn attribute(&mut self, partition: i32, offset: i64) -> bool {
        if self.done(partition) {
            return false;
        }
        if let Some(counter) = self.counters.get_mut(&partition) {
            *counter += 1;
        }
        if self
            .last_offsets
            .get(&partition)
            .is_some_and(|last| offset >= *last)
        {
            self.consumed.insert(partition);
        }
        true
    }
}

/// ScanEngine owns the broker client for the duration of one or more bounded scans over `topic`.
pub struct ScanEngine<C> {
    client: C,
    topic: String,
    progress: Option<ProgressReporter>,
}

impl<C: BrokerClient> ScanEngine<C> {
    pub fn new(client: C, topic: impl Into<String>) -> Self {
        Self {
            client,
            topic: topic.into(),
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    pub fn into_client(self) -> C {
        self.client
    }

    /// Positions the subscription according to `policy`, then reads until every partition has
    /// delivered `min(limit, high - start)` messages or its last offset. Reads past a partition's
    /// budget are consumed but neither counted nor filtered.
    pub async fn scan(
        &mut self,
        table: &PartitionTable,
        filter: &MessageFilter,
        limit: i64,
        policy: &StartPolicy,
    ) -> Result<ScanResult> {
        // reject before touching the broker
        partition_limits(table, limit)?;

        let table = seek(&mut self.client, &self.topic, table, policy).await?;
        let mut budget = Budget::new(&table, partition_limits(&table, limit)?);
        let expected = budget.total();
        info!(topic = %self.topic, expected, ?policy, "Starting bounded scan");
        emit(
            self.progress.as_ref(),
            ProgressEvent::Started {
                expected: Some(expected),
            },
        );

        let mut acc = ResultAccumulator::start();
        while !budget.exhausted() {
            let raw = match self.client.read_next(None).await? {
                ReadOutcome::Message(raw) => raw,
                ReadOutcome::Empty => continue,
            };

            if !budget.attribute(raw.partition, raw.offset) {
                trace!(
                    partition = raw.partition,
                    offset = raw.offset,
                    "Read past partition budget"
                );
                continue;
            }

            acc.record_read();
            let matched = match filter.apply(&raw) {
                Some(message) => {
                    acc.record_match(message);
                    true
                }
                None => false,
            };
            emit(
                self.progress.as_ref(),
                ProgressEvent::Advanced {
                    read: 1,
                    matched: u64::from(matched),
                },
            );
        }

        let result = acc.finish();
        debug!(
            read = result.read,
            matched = result.matched,
            elapsed = ?result.elapsed,
            "Bounded scan finished"
        );
        emit(
            self.progress.as_ref(),
            ProgressEvent::Finished {
                read: result.read,
                matched: result.matched,
            },
        );
        Ok(result)
    }
}
