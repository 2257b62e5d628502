use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;

use crate::Result;

/// Low and high watermark of a single partition as reported by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermarks {
    /// Oldest retained offset (inclusive).
    pub low: i64,
    /// Offset the next produced message will get (exclusive bound).
    pub high: i64,
}

/// A record as delivered by the broker client, before any filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
    /// Timestamp of the record in milliseconds since epoch, if the broker provided one.
    pub timestamp: Option<i64>,
    pub partition: i32,
    pub offset: i64,
}

/// Outcome of a single [BrokerClient::read_next] call.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    Message(RawMessage),
    /// Nothing arrived before the poll interval elapsed.
    Empty,
}

/// BrokerClient is the seam between the consumption engines and an already connected, subscribed
/// broker consumer. The engines never talk to the broker in any other way. Every error returned
/// here is fatal for the run that triggered it, retries are up to the caller.
#[trait_variant::make(Send)]
pub trait BrokerClient {
    /// Returns the watermarks of every partition of the topic. An unknown topic yields an empty map.
    async fn query_watermarks(&mut self, topic: &str) -> Result<BTreeMap<i32, Watermarks>>;

    /// Resolves, per partition, the first offset whose timestamp is at or after `timestamp_ms`.
    /// `None` means there is no such offset, i.e. the timestamp is past the end of the partition.
    async fn offsets_for_timestamp(
        &mut self,
        topic: &str,
        partitions: &[i32],
        timestamp_ms: i64,
    ) -> Result<BTreeMap<i32, Option<i64>>>;

    /// Positions the subscription at the given offsets and stores them durably, so the position
    /// survives the reads that follow.
    async fn assign_and_commit(&mut self, topic: &str, offsets: &BTreeMap<i32, i64>)
    -> Result<()>;

    /// Reads the next message. `None` blocks until a message is available, `Some(timeout)`
    /// returns [ReadOutcome::Empty] once the timeout elapses without a message.
    async fn read_next(&mut self, timeout: Option<Duration>) -> Result<ReadOutcome>;

    /// Leaves the subscription and releases the connection.
    async fn close(self) -> Result<()>;
}
