//! Partition offset-range table of a topic and the resolver building it from a live watermark
//! query.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::client::BrokerClient;
use crate::error::{Error, Result};

/// One partition of the subscribed topic and the offset range readable from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    id: i32,
    low_offset: i64,
    high_offset: i64,
}

impl Partition {
    pub fn new(id: i32, low_offset: i64, high_offset: i64) -> Result<Self> {
        if id < 0 {
            return Err(Error::Metadata(format!("negative partition id {id}")));
        }
        if low_offset > high_offset {
            return Err(Error::Metadata(format!(
                "partition {id} has low offset {low_offset} above high offset {high_offset}"
            )));
        }
        Ok(Self {
            id,
            low_offset,
            high_offset,
        })
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    /// Offset reading starts at (inclusive).
    pub fn low_offset(&self) -> i64 {
        self.low_offset
    }

    /// One past the newest message (exclusive).
    pub fn high_offset(&self) -> i64 {
        self.high_offset
    }

    /// Number of messages between the low and the high offset.
    pub fn available(&self) -> u64 {
        u64::try_from(self.high_offset - self.low_offset).unwrap_or(0)
    }

    /// Returns a new partition record starting at `start`, clamped into the retained range.
    pub(crate) fn starting_at(&self, start: i64) -> Self {
        Self {
            id: self.id,
            low_offset: start.clamp(self.low_offset, self.high_offset),
            high_offset: self.high_offset,
        }
    }
}

/// Partition id -> [Partition] for a single topic, ordered by partition id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionTable {
    partitions: BTreeMap<i32, Partition>,
}

impl PartitionTable {
    pub fn get(&self, id: i32) -> Option<&Partition> {
        self.partitions.get(&id)
    }

    pub fn ids(&self) -> Vec<i32> {
        self.partitions.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Partition> {
        self.partitions.values()
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }
}

impl FromIterator<Partition> for PartitionTable {
    fn from_iter<T: IntoIterator<Item = Partition>>(iter: T) -> Self {
        Self {
            partitions: iter.into_iter().map(|p| (p.id, p)).collect(),
        }
    }
}

/// Queries the partitions of `topic` and their watermarks. Any failure is fatal, without the full
/// offset knowledge no read budget can be computed.
pub async fn resolve_partitions<C: BrokerClient>(
    client: &mut C,
    topic: &str,
) -> Result<PartitionTable> {
    if topic.is_empty() {
        return Err(Error::InvalidArgument("topic name is empty".to_string()));
    }

    let watermarks = client.query_watermarks(topic).await?;
    if watermarks.is_empty() {
        return Err(Error::Metadata(format!(
            "topic {topic} is unknown or has no partitions"
        )));
    }

    let table = watermarks
        .into_iter()
        .map(|(id, wm)| {
            debug!(topic, partition = id, low = wm.low, high = wm.high, "Partition watermarks");
            Partition::new(id, wm.low, wm.high)
        })
        .collect::<Result<PartitionTable>>()?;

    info!(topic, partitions = table.len(), "Resolved partition metadata");
    Ok(table)
}
