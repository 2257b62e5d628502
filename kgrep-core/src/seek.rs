//! Seek planning: translating a start policy into concrete per-partition start offsets and
//! positioning the subscription there.

use std::collections::BTreeMap;

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use tracing::{debug, info};

use crate::client::BrokerClient;
use crate::error::{Error, Result};
use crate::partition::PartitionTable;

/// Where reading starts in every partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartPolicy {
    /// Start at the low watermark, whatever the group committed before.
    #[default]
    Earliest,
    /// Start at most `n` messages before the high watermark.
    LatestMinus(u64),
    /// Start at the first message at or after the instant.
    Timestamp(DateTime<Utc>),
}

impl StartPolicy {
    /// Parses an RFC 3339 timestamp into a [StartPolicy::Timestamp].
    pub fn from_rfc3339(timestamp: &str) -> Result<Self> {
        let parsed = DateTime::parse_from_rfc3339(timestamp).map_err(|e| {
            Error::InvalidArgument(format!("invalid RFC 3339 timestamp {timestamp:?}: {e}"))
        })?;
        Ok(StartPolicy::Timestamp(parsed.with_timezone(&Utc)))
    }
}

/// Start offset and retained high offset of a single partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedOffset {
    pub start: i64,
    pub high: i64,
}

/// Partition id -> [PlannedOffset].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffsetPlan {
    offsets: BTreeMap<i32, PlannedOffset>,
}

impl OffsetPlan {
    pub fn get(&self, partition: i32) -> Option<&PlannedOffset> {
        self.offsets.get(&partition)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&i32, &PlannedOffset)> {
        self.offsets.iter()
    }

    /// Start offsets only, as handed to the client for assignment.
    pub fn start_offsets(&self) -> BTreeMap<i32, i64> {
        self.offsets.iter().map(|(id, o)| (*id, o.start)).collect()
    }

    /// Folds the plan back into the partition table. Every partition covered by the plan gets a
    /// new record whose low offset is the planned start.
    pub fn apply_to(&self, table: &PartitionTable) -> PartitionTable {
        table
            .iter()
            .map(|p| match self.offsets.get(&p.id()) {
                Some(planned) => p.starting_at(planned.start),
                None => *p,
            })
            .collect()
    }
}

/// Plan for [StartPolicy::Earliest]: every partition starts at its low offset.
pub fn plan_earliest(table: &PartitionTable) -> OffsetPlan {
    let offsets = table
        .iter()
        .map(|p| {
            (
                p.id(),
                PlannedOffset {
                    start: p.low_offset(),
                    high: p.high_offset(),
                },
            )
        })
        .collect();
    OffsetPlan { offsets }
}

/// Plan for [StartPolicy::LatestMinus]: `max(low, high - n)` for every partition.
pub fn plan_latest(table: &PartitionTable, n: u64) -> OffsetPlan {
    let n = i64::try_from(n).unwrap_or(i64::MAX);
    let offsets = table
        .iter()
        .map(|p| {
            let start = p.high_offset().saturating_sub(n).max(p.low_offset());
            (
                p.id(),
                PlannedOffset {
                    start,
                    high: p.high_offset(),
                },
            )
        })
        .collect();
    OffsetPlan { offsets }
}

/// Epoch milliseconds of the instant, rounded to millisecond precision.
pub fn epoch_millis(timestamp: DateTime<Utc>) -> Result<i64> {
    let rounded = timestamp
        .duration_round(TimeDelta::milliseconds(1))
        .map_err(|e| Error::Seek(format!("rounding timestamp {timestamp}: {e}")))?;
    Ok(rounded.timestamp_millis())
}

/// Plan for [StartPolicy::Timestamp]. Partitions the client has no offset for (the timestamp is
/// past their end) start at their high offset, they are treated as fully consumed.
pub async fn plan_timestamp<C: BrokerClient>(
    client: &mut C,
    topic: &str,
    table: &PartitionTable,
    timestamp: DateTime<Utc>,
) -> Result<OffsetPlan> {
    let timestamp_ms = epoch_millis(timestamp)?;
    let resolved = client
        .offsets_for_timestamp(topic, &table.ids(), timestamp_ms)
        .await?;

    let offsets = table
        .iter()
        .map(|p| {
            let start = match resolved.get(&p.id()).copied().flatten() {
                Some(offset) => offset.clamp(p.low_offset(), p.high_offset()),
                None => {
                    debug!(
                        partition = p.id(),
                        timestamp_ms, "No offset after timestamp, starting at the high offset"
                    );
                    p.high_offset()
                }
            };
            (
                p.id(),
                PlannedOffset {
                    start,
                    high: p.high_offset(),
                },
            )
        })
        .collect();
    Ok(OffsetPlan { offsets })
}

/// Computes the plan for `policy`, positions the client at it and returns the partition table as
/// seen after the seek. Every policy positions the client, so offsets committed by earlier runs
/// of the same group never move the start.
pub async fn seek<C: BrokerClient>(
    client: &mut C,
    topic: &str,
    table: &PartitionTable,
    policy: &StartPolicy,
) -> Result<PartitionTable> {
    let plan = match policy {
        StartPolicy::Earliest => plan_earliest(table),
        StartPolicy::LatestMinus(n) => plan_latest(table, *n),
        StartPolicy::Timestamp(ts) => plan_timestamp(client, topic, table, *ts).await?,
    };

    client
        .assign_and_commit(topic, &plan.start_offsets())
        .await?;
    info!(topic, ?policy, offsets = ?plan.start_offsets(), "Positioned subscription");

    Ok(plan.apply_to(table))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ReadOutcome;
    use crate::partition::Partition;
    use crate::test_utils::MemoryBroker;

    fn table(ranges: &[(i32, i64, i64)]) -> PartitionTable {
        ranges
            .iter()
            .map(|(id, low, high)| Partition::new(*id, *low, *high).unwrap())
            .collect()
    }

    #[test]
    fn test_plan_latest() {
        let table = table(&[(0, 0, 100), (1, 40, 50), (2, 7, 7)]);
        let plan = plan_latest(&table, 20);

        for p in table.iter() {
            let planned = plan.get(p.id()).unwrap();
            assert_eq!(planned.start, (p.high_offset() - 20).max(p.low_offset()));
            assert_eq!(planned.high, p.high_offset());
        }
        assert_eq!(plan.get(0).unwrap().start, 80);
        assert_eq!(plan.get(1).unwrap().start, 40);
        assert_eq!(plan.get(2).unwrap().start, 7);
    }

    #[test]
    fn test_plan_latest_huge_n() {
        let table = table(&[(0, 5, 100)]);
        let plan = plan_latest(&table, u64::MAX);
        assert_eq!(plan.get(0).unwrap().start, 5);
    }

    #[test]
    fn test_apply_to_uses_post_seek_low_offset() {
        let table = table(&[(0, 0, 100), (1, 0, 10)]);
        let updated = plan_latest(&table, 30).apply_to(&table);

        assert_eq!(updated.get(0).unwrap().low_offset(), 70);
        assert_eq!(updated.get(0).unwrap().available(), 30);
        assert_eq!(updated.get(1).unwrap().low_offset(), 0);
        // the original table is untouched
        assert_eq!(table.get(0).unwrap().low_offset(), 0);
    }

    #[test]
    fn test_from_rfc3339() {
        let policy = StartPolicy::from_rfc3339("2024-03-01T10:00:00.0004Z").unwrap();
        let StartPolicy::Timestamp(ts) = policy else {
            panic!("expected a timestamp policy");
        };
        assert_eq!(epoch_millis(ts).unwrap(), 1_709_287_200_000);

        let policy = StartPolicy::from_rfc3339("2024-03-01T12:00:00.0006+02:00").unwrap();
        let StartPolicy::Timestamp(ts) = policy else {
            panic!("expected a timestamp policy");
        };
        assert_eq!(epoch_millis(ts).unwrap(), 1_709_287_200_001);

        let err = StartPolicy::from_rfc3339("yesterday").unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_seek_earliest_rewinds_to_low_offset() {
        let broker = MemoryBroker::new();
        broker.add_partition(0, 0, 10);
        broker.add_partition(1, 4, 6);
        let mut client = broker.client();
        // a previous run of the same group left its position at 7
        client
            .assign_and_commit("orders", &BTreeMap::from([(0, 7)]))
            .await
            .unwrap();
        let table = table(&[(0, 0, 10), (1, 4, 6)]);

        let updated = seek(&mut client, "orders", &table, &StartPolicy::Earliest)
            .await
            .unwrap();
        assert_eq!(updated, table);
        assert_eq!(broker.committed(), BTreeMap::from([(0, 0), (1, 4)]));

        let ReadOutcome::Message(first) = client.read_next(None).await.unwrap() else {
            panic!("expected a message");
        };
        assert_eq!((first.partition, first.offset), (0, 0));
    }

    #[tokio::test]
    async fn test_seek_latest_assigns_and_commits() {
        let broker = MemoryBroker::new();
        broker.add_partition(0, 0, 10);
        broker.add_partition(1, 0, 3);
        let mut client = broker.client();
        let table = table(&[(0, 0, 10), (1, 0, 3)]);

        let updated = seek(&mut client, "orders", &table, &StartPolicy::LatestMinus(4))
            .await
            .unwrap();
        assert_eq!(updated.get(0).unwrap().low_offset(), 6);
        assert_eq!(updated.get(1).unwrap().low_offset(), 0);
        assert_eq!(broker.committed(), BTreeMap::from([(0, 6), (1, 0)]));
    }

    #[tokio::test]
    async fn test_seek_timestamp_falls_back_to_high_offset() {
        let broker = MemoryBroker::new();
        broker.add_partition(0, 0, 10);
        broker.add_partition(1, 0, 8);
        // every message of partition 0 carries ts = 1000 + offset, partition 1 is older
        broker.set_timestamps(0, (0..10).map(|o| 1_000 + o));
        broker.set_timestamps(1, (0..8).map(|o| 100 + o));
        let mut client = broker.client();
        let table = table(&[(0, 0, 10), (1, 0, 8)]);

        let ts = DateTime::from_timestamp_millis(1_004).unwrap();
        let updated = seek(&mut client, "orders", &table, &StartPolicy::Timestamp(ts))
            .await
            .unwrap();

        assert_eq!(updated.get(0).unwrap().low_offset(), 4);
        assert_eq!(updated.get(1).unwrap().low_offset(), 8);
        assert_eq!(updated.get(1).unwrap().available(), 0);
        assert_eq!(broker.committed(), BTreeMap::from([(0, 4), (1, 8)]));
    }

    #[tokio::test]
    async fn test_seek_timestamp_client_failure() {
        let broker = MemoryBroker::new();
        broker.add_partition(0, 0, 10);
        broker.fail_seeks("lookup timed out");
        let mut client = broker.client();
        let table = table(&[(0, 0, 10)]);

        let ts = DateTime::from_timestamp_millis(0).unwrap();
        let err = seek(&mut client, "orders", &table, &StartPolicy::Timestamp(ts))
            .await
            .unwrap_err();
        assert_eq!(err, Error::Seek("lookup timed out".to_string()));
    }
}
