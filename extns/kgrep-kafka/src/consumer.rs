use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rdkafka::Offset;
use rdkafka::client::ClientContext;
use rdkafka::consumer::stream_consumer::StreamConsumer;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer, ConsumerContext, Rebalance};
use rdkafka::error::KafkaResult;
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::topic_partition_list::TopicPartitionList;
use tracing::{debug, info, warn};

use kgrep_core::{BrokerClient, Error, RawMessage, ReadOutcome, Result, Watermarks};

use crate::KafkaConsumerConfig;

// A context can be used to change the behavior of consumers by adding callbacks
// that will be executed by librdkafka.
struct KafkaContext;

impl ClientContext for KafkaContext {}

impl ConsumerContext for KafkaContext {
    fn pre_rebalance(&self, _: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        info!("Pre rebalance {:?}", rebalance);
    }

    fn post_rebalance(&self, _: &BaseConsumer<Self>, rebalance: &Rebalance<'_>) {
        info!("Post rebalance {:?}", rebalance);
    }

    fn commit_callback(&self, result: KafkaResult<()>, _offsets: &TopicPartitionList) {
        debug!("Committing offsets: {:?}", result);
    }
}

type KgrepConsumer = StreamConsumer<KafkaContext>;

/// A subscribed Kafka consumer. librdkafka calls that may block (metadata, offset lookups,
/// commits) run on the blocking pool, reads go through the async stream consumer.
pub struct KafkaClient {
    consumer: Arc<KgrepConsumer>,
    servers: String,
    request_timeout: Duration,
}

impl KafkaClient {
    /// Creates the consumer, subscribes it to the configured topic and verifies the brokers are
    /// reachable.
    pub async fn connect(config: KafkaConsumerConfig) -> Result<Self> {
        let servers = config.servers();
        let consumer: Arc<KgrepConsumer> = Arc::new(
            config
                .client_config()
                .create_with_context(KafkaContext)
                .map_err(|err| Error::Connection {
                    server: servers.clone(),
                    error: err.to_string(),
                })?,
        );

        // subscribing never fails on bad credentials or unreachable brokers, a metadata round
        // trip does
        consumer
            .subscribe(&[config.topic.as_str()])
            .map_err(|err| Error::Connection {
                server: servers.clone(),
                error: format!("Failed to subscribe to topic {}: {err}", config.topic),
            })?;

        let probe = Arc::clone(&consumer);
        let timeout = config.request_timeout;
        tokio::task::spawn_blocking(move || probe.fetch_metadata(None, timeout))
            .await?
            .map_err(|err| Error::Connection {
                server: servers.clone(),
                error: err.to_string(),
            })?;

        info!(
            servers,
            topic = config.topic,
            group = config.consumer_group,
            "Connected to Kafka"
        );
        Ok(Self {
            consumer,
            servers,
            request_timeout: config.request_timeout,
        })
    }

    pub fn servers(&self) -> &str {
        &self.servers
    }

    fn partition_list(
        topic: &str,
        offsets: impl IntoIterator<Item = (i32, i64)>,
    ) -> KafkaResult<TopicPartitionList> {
        let mut tpl = TopicPartitionList::new();
        for (partition, offset) in offsets {
            tpl.add_partition_offset(topic, partition, Offset::Offset(offset))?;
        }
        Ok(tpl)
    }
}

fn raw_message(message: &BorrowedMessage<'_>) -> RawMessage {
    RawMessage {
        key: message.key().map(Bytes::copy_from_slice),
        value: message.payload().map(Bytes::copy_from_slice),
        timestamp: message.timestamp().to_millis(),
        partition: message.partition(),
        offset: message.offset(),
    }
}

impl BrokerClient for KafkaClient {
    async fn query_watermarks(&mut self, topic: &str) -> Result<BTreeMap<i32, Watermarks>> {
        let consumer = Arc::clone(&self.consumer);
        let topic = topic.to_string();
        let timeout = self.request_timeout;

        // fetch_metadata and fetch_watermarks are blocking librdkafka calls
        tokio::task::spawn_blocking(move || {
            let metadata = consumer
                .fetch_metadata(Some(&topic), timeout)
                .map_err(|e| Error::Metadata(format!("Failed to fetch metadata: {e}")))?;
            let Some(topic_metadata) = metadata.topics().first() else {
                warn!(topic, "No topic metadata found");
                return Ok(BTreeMap::new());
            };
            if let Some(err) = topic_metadata.error() {
                warn!(topic, ?err, "Topic metadata carries an error");
            }

            let mut watermarks = BTreeMap::new();
            for partition in topic_metadata.partitions() {
                let (low, high) = consumer
                    .fetch_watermarks(&topic, partition.id(), timeout)
                    .map_err(|e| {
                        Error::Metadata(format!(
                            "Failed to fetch watermarks of partition {}: {e}",
                            partition.id()
                        ))
                    })?;
                watermarks.insert(partition.id(), Watermarks { low, high });
            }
            Ok(watermarks)
        })
        .await?
    }

    async fn offsets_for_timestamp(
        &mut self,
        topic: &str,
        partitions: &[i32],
        timestamp_ms: i64,
    ) -> Result<BTreeMap<i32, Option<i64>>> {
        // the lookup list carries the timestamp in the offset field
        let request =
            Self::partition_list(topic, partitions.iter().map(|p| (*p, timestamp_ms)))
                .map_err(|e| Error::Seek(format!("Failed to build offset lookup: {e}")))?;
        let consumer = Arc::clone(&self.consumer);
        let topic = topic.to_string();
        let timeout = self.request_timeout;

        tokio::task::spawn_blocking(move || {
            let response = consumer
                .offsets_for_times(request, timeout)
                .map_err(|e| Error::Seek(format!("Failed to look up offsets for times: {e}")))?;

            let mut offsets = BTreeMap::new();
            for entry in response.elements_for_topic(&topic) {
                entry.error().map_err(|e| {
                    Error::Seek(format!(
                        "Offset lookup failed for partition {}: {e}",
                        entry.partition()
                    ))
                })?;
                let offset = match entry.offset() {
                    Offset::Offset(offset) if offset >= 0 => Some(offset),
                    // past the end of the partition
                    _ => None,
                };
                offsets.insert(entry.partition(), offset);
            }
            Ok(offsets)
        })
        .await?
    }

    async fn assign_and_commit(
        &mut self,
        topic: &str,
        offsets: &BTreeMap<i32, i64>,
    ) -> Result<()> {
        let tpl = Self::partition_list(topic, offsets.iter().map(|(p, o)| (*p, *o)))
            .map_err(|e| Error::Seek(format!("Failed to build partition assignment: {e}")))?;
        let consumer = Arc::clone(&self.consumer);

        // commit internally calls rd_kafka_offset_store and may block
        tokio::task::spawn_blocking(move || {
            // manual assignment replaces the group subscription
            consumer.unsubscribe();
            consumer
                .assign(&tpl)
                .map_err(|e| Error::Seek(format!("Failed to assign partitions: {e}")))?;
            consumer
                .commit(&tpl, CommitMode::Sync)
                .map_err(|e| Error::Seek(format!("Failed to commit offsets: {e}")))
        })
        .await?
    }

    async fn read_next(&mut self, timeout: Option<Duration>) -> Result<ReadOutcome> {
        let received = match timeout {
            None => self.consumer.recv().await,
            Some(timeout) => match tokio::time::timeout(timeout, self.consumer.recv()).await {
                Ok(received) => received,
                Err(_) => return Ok(ReadOutcome::Empty),
            },
        };

        let message = received.map_err(|e| Error::Read(format!("Failed to read message: {e}")))?;
        Ok(ReadOutcome::Message(raw_message(&message)))
    }

    async fn close(self) -> Result<()> {
        let consumer = self.consumer;
        tokio::task::spawn_blocking(move || {
            consumer.unsubscribe();
            let unassigned = consumer
                .unassign()
                .map_err(|e| Error::Close(format!("Failed to release partitions: {e}")));
            // dropping the last handle closes the consumer and waits for librdkafka to leave
            drop(consumer);
            unassigned
        })
        .await?
    }
}
