//! In-memory broker for exercising the engines without a running cluster.
//!
//! [MemoryBroker] owns the topic state and hands out [MemoryClient]s implementing
//! [BrokerClient]. Reads are served round-robin across partitions, so messages of different
//! partitions arrive interleaved the way a real consumer delivers them.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Notify;

use crate::client::{BrokerClient, RawMessage, ReadOutcome, Watermarks};
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct PartitionLog {
    low: i64,
    high: i64,
    /// Ordered by offset. Offsets missing between `low` and `high` are never delivered, like
    /// compacted records or transaction markers.
    records: Vec<RawMessage>,
}

impl PartitionLog {
    /// First deliverable record at or after `offset`.
    fn next_record(&self, offset: i64) -> Option<&RawMessage> {
        self.records.iter().find(|r| r.offset >= offset)
    }

    fn record_mut(&mut self, offset: i64) -> Option<&mut RawMessage> {
        self.records.iter_mut().find(|r| r.offset == offset)
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    partitions: BTreeMap<i32, PartitionLog>,
    positions: BTreeMap<i32, i64>,
    committed: BTreeMap<i32, i64>,
    next_partition: usize,
    reads_served: u64,
    fail_watermarks: Option<String>,
    fail_seeks: Option<String>,
    fail_reads: Option<(u64, String)>,
    fail_close: Option<String>,
    closed: bool,
}

impl BrokerState {
    fn position(&self, id: i32, log: &PartitionLog) -> i64 {
        self.positions.get(&id).copied().unwrap_or(log.low)
    }

    /// Next deliverable record, rotating over partitions.
    fn take_next(&mut self) -> Option<RawMessage> {
        let ids: Vec<i32> = self.partitions.keys().copied().collect();
        for i in 0..ids.len() {
            let idx = (self.next_partition + i) % ids.len();
            let id = ids[idx];
            let log = &self.partitions[&id];
            let pos = self.position(id, log);
            if let Some(record) = log.next_record(pos).cloned() {
                self.positions.insert(id, record.offset + 1);
                self.next_partition = idx + 1;
                return Some(record);
            }
        }
        None
    }
}

/// Shared in-memory topic. Cloning yields another handle to the same topic.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    arrivals: Arc<Notify>,
}

fn record(partition: i32, offset: i64, key: Bytes, value: Bytes) -> RawMessage {
    RawMessage {
        key: Some(key),
        value: Some(value),
        timestamp: None,
        partition,
        offset,
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().expect("memory broker lock poisoned")
    }

    /// Adds a partition whose retained range is `[low, high)`. The record at offset `o` has the key
    /// `key-<o>` and the value `value-<o>`.
    pub fn add_partition(&self, id: i32, low: i64, high: i64) {
        let records = (low..high)
            .map(|o| {
                record(
                    id,
                    o,
                    Bytes::from(format!("key-{o}")),
                    Bytes::from(format!("value-{o}")),
                )
            })
            .collect();
        self.lock()
            .partitions
            .insert(id, PartitionLog { low, high, records });
    }

    /// Appends a record to the partition, creating it if needed, and wakes a blocked reader.
    /// Returns the offset of the new record.
    pub fn produce(&self, partition: i32, key: &str, value: &str) -> i64 {
        let offset = {
            let mut state = self.lock();
            let log = state.partitions.entry(partition).or_default();
            let offset = log.high;
            log.high += 1;
            log.records.push(record(
                partition,
                offset,
                Bytes::copy_from_slice(key.as_bytes()),
                Bytes::copy_from_slice(value.as_bytes()),
            ));
            offset
        };
        self.arrivals.notify_one();
        offset
    }

    /// Overwrites the value of an existing record.
    pub fn set_value(&self, partition: i32, offset: i64, value: &str) {
        let mut state = self.lock();
        if let Some(r) = state
            .partitions
            .get_mut(&partition)
            .and_then(|log| log.record_mut(offset))
        {
            r.value = Some(Bytes::copy_from_slice(value.as_bytes()));
        }
    }

    /// Drops the record at `offset` while the watermarks stay put, leaving a gap no read ever
    /// delivers.
    pub fn remove_record(&self, partition: i32, offset: i64) {
        if let Some(log) = self.lock().partitions.get_mut(&partition) {
            log.records.retain(|r| r.offset != offset);
        }
    }

    /// Assigns timestamps (epoch ms) to the records of a partition, starting at its low offset.
    pub fn set_timestamps(&self, partition: i32, timestamps: impl IntoIterator<Item = i64>) {
        let mut state = self.lock();
        if let Some(log) = state.partitions.get_mut(&partition) {
            for (r, ts) in log.records.iter_mut().zip(timestamps) {
                r.timestamp = Some(ts);
            }
        }
    }

    /// Moves every existing partition's read position to its current high offset, like a consumer
    /// with `auto.offset.reset=latest` and no committed offsets.
    pub fn start_at_end(&self) {
        let mut state = self.lock();
        let ends: Vec<(i32, i64)> = state
            .partitions
            .iter()
            .map(|(id, log)| (*id, log.high))
            .collect();
        state.positions.extend(ends);
    }

    pub fn fail_watermarks(&self, error: &str) {
        self.lock().fail_watermarks = Some(error.to_string());
    }

    pub fn fail_seeks(&self, error: &str) {
        self.lock().fail_seeks = Some(error.to_string());
    }

    /// Every read after the first `after` successful ones fails.
    pub fn fail_reads_after(&self, after: u64, error: &str) {
        self.lock().fail_reads = Some((after, error.to_string()));
    }

    pub fn fail_close(&self, error: &str) {
        self.lock().fail_close = Some(error.to_string());
    }

    /// Offsets committed through [BrokerClient::assign_and_commit].
    pub fn committed(&self) -> BTreeMap<i32, i64> {
        self.lock().committed.clone()
    }

    /// Number of messages handed out by all clients.
    pub fn reads_served(&self) -> u64 {
        self.lock().reads_served
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn client(&self) -> MemoryClient {
        MemoryClient {
            broker: self.clone(),
        }
    }
}

/// [BrokerClient] over a [MemoryBroker].
#[derive(Debug)]
pub struct MemoryClient {
    broker: MemoryBroker,
}

impl MemoryClient {
    fn try_read(&self) -> Result<Option<RawMessage>> {
        let mut state = self.broker.lock();
        if let Some((after, error)) = &state.fail_reads {
            if state.reads_served >= *after {
                return Err(Error::Read(error.clone()));
            }
        }
        let next = state.take_next();
        if next.is_some() {
            state.reads_served += 1;
        }
        Ok(next)
    }
}

impl BrokerClient for MemoryClient {
    async fn query_watermarks(&mut self, _topic: &str) -> Result<BTreeMap<i32, Watermarks>> {
        let state = self.broker.lock();
        if let Some(error) = &state.fail_watermarks {
            return Err(Error::Metadata(error.clone()));
        }
        Ok(state
            .partitions
            .iter()
            .map(|(id, log)| {
                (
                    *id,
                    Watermarks {
                        low: log.low,
                        high: log.high,
                    },
                )
            })
            .collect())
    }

    async fn offsets_for_timestamp(
        &mut self,
        _topic: &str,
        partitions: &[i32],
        timestamp_ms: i64,
    ) -> Result<BTreeMap<i32, Option<i64>>> {
        let state = self.broker.lock();
        if let Some(error) = &state.fail_seeks {
            return Err(Error::Seek(error.clone()));
        }
        Ok(partitions
            .iter()
            .map(|id| {
                let offset = state.partitions.get(id).and_then(|log| {
                    log.records
                        .iter()
                        .find(|r| r.timestamp.is_some_and(|ts| ts >= timestamp_ms))
                        .map(|r| r.offset)
                });
                (*id, offset)
            })
            .collect())
    }

    async fn assign_and_commit(
        &mut self,
        _topic: &str,
        offsets: &BTreeMap<i32, i64>,
    ) -> Result<()> {
        let mut state = self.broker.lock();
        if let Some(error) = &state.fail_seeks {
            return Err(Error::Seek(error.clone()));
        }
        for (id, offset) in offsets {
            state.positions.insert(*id, *offset);
            state.committed.insert(*id, *offset);
        }
        Ok(())
    }

    async fn read_next(&mut self, timeout: Option<Duration>) -> Result<ReadOutcome> {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);
        loop {
            if let Some(raw) = self.try_read()? {
                return Ok(ReadOutcome::Message(raw));
            }
            let arrivals = Arc::clone(&self.broker.arrivals);
            match deadline {
                None => arrivals.notified().await,
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, arrivals.notified())
                        .await
                        .is_err()
                    {
                        return Ok(ReadOutcome::Empty);
                    }
                }
            }
        }
    }

    async fn close(self) -> Result<()> {
        let mut state = self.broker.lock();
        state.closed = true;
        match &state.fail_close {
            Some(error) => Err(Error::Close(error.clone())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reads_interleave_partitions() {
        let broker = MemoryBroker::new();
        broker.add_partition(0, 0, 2);
        broker.add_partition(1, 5, 7);
        let mut client = broker.client();

        let mut seen = Vec::new();
        while let ReadOutcome::Message(m) = client
            .read_next(Some(Duration::from_millis(5)))
            .await
            .unwrap()
        {
            seen.push((m.partition, m.offset));
        }
        assert_eq!(seen, vec![(0, 0), (1, 5), (0, 1), (1, 6)]);
        assert_eq!(broker.reads_served(), 4);
    }

    #[tokio::test]
    async fn test_blocking_read_wakes_on_produce() {
        let broker = MemoryBroker::new();
        broker.add_partition(0, 0, 0);
        let mut client = broker.client();

        let producer = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            producer.produce(0, "k", "late");
        });

        let ReadOutcome::Message(m) = client.read_next(None).await.unwrap() else {
            panic!("expected a message");
        };
        assert_eq!(m.value.as_deref(), Some(b"late".as_slice()));
    }

    #[tokio::test]
    async fn test_removed_records_leave_gaps() {
        let broker = MemoryBroker::new();
        broker.add_partition(0, 0, 4);
        broker.remove_record(0, 2);
        let mut client = broker.client();

        let watermarks = client.query_watermarks("orders").await.unwrap();
        assert_eq!(watermarks[&0], Watermarks { low: 0, high: 4 });

        let mut offsets = Vec::new();
        while let ReadOutcome::Message(m) = client
            .read_next(Some(Duration::from_millis(5)))
            .await
            .unwrap()
        {
            offsets.push(m.offset);
        }
        assert_eq!(offsets, vec![0, 1, 3]);
    }

    #[tokio::test]
    async fn test_start_at_end_skips_backlog() {
        let broker = MemoryBroker::new();
        broker.add_partition(0, 0, 3);
        broker.start_at_end();
        let mut client = broker.client();

        let outcome = client
            .read_next(Some(Duration::from_millis(5)))
            .await
            .unwrap();
        assert_eq!(outcome, ReadOutcome::Empty);

        broker.produce(0, "k", "v");
        let ReadOutcome::Message(m) = client.read_next(None).await.unwrap() else {
            panic!("expected a message");
        };
        assert_eq!(m.offset, 3);
    }
}
