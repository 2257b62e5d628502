//! Kafka-backed [kgrep_core::BrokerClient] built on `rdkafka`.

use std::collections::HashMap;
use std::time::Duration;

use rdkafka::config::{ClientConfig, RDKafkaLogLevel};
use tracing::info;

use kgrep_core::{Error, Result};

mod consumer;
pub use crate::consumer::KafkaClient;

#[cfg(feature = "kafka-tests-utils")]
pub mod test_utils;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Where a consumer without a committed offset starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetReset {
    #[default]
    Earliest,
    Latest,
}

impl OffsetReset {
    fn as_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KafkaConsumerConfig {
    /// The list of Kafka brokers to connect to.
    pub brokers: Vec<String>,
    /// The topic to consume messages from.
    pub topic: String,
    /// The consumer group to use for the Kafka consumer.
    pub consumer_group: String,
    pub offset_reset: OffsetReset,
    /// Timeout of metadata, offset lookup and commit requests.
    pub request_timeout: Duration,
    /// Any supported kafka client configuration options from
    /// https://docs.confluent.io/platform/current/clients/librdkafka/html/md_CONFIGURATION.html
    pub kafka_raw_config: HashMap<String, String>,
}

impl KafkaConsumerConfig {
    /// `bootstrap_servers` is a comma separated `host:port` list. Without a group a random
    /// `kgrep-<uuid>` group is used, so runs never share committed offsets.
    pub fn new(bootstrap_servers: &str, topic: &str, consumer_group: Option<String>) -> Result<Self> {
        let brokers: Vec<String> = bootstrap_servers
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if brokers.is_empty() {
            return Err(Error::InvalidArgument(
                "at least one bootstrap server is required".to_string(),
            ));
        }
        if topic.is_empty() {
            return Err(Error::InvalidArgument("topic name is empty".to_string()));
        }

        Ok(Self {
            brokers,
            topic: topic.to_string(),
            consumer_group: consumer_group
                .filter(|g| !g.is_empty())
                .unwrap_or_else(random_group),
            offset_reset: OffsetReset::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            kafka_raw_config: HashMap::new(),
        })
    }

    pub fn servers(&self) -> String {
        self.brokers.join(",")
    }

    /// librdkafka configuration. User supplied properties are applied first, the settings the
    /// client relies on always win.
    pub(crate) fn client_config(&self) -> ClientConfig {
        let mut client_config = ClientConfig::new();
        client_config
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "6000");
        if !self.kafka_raw_config.is_empty() {
            info!(
                "Applying user-specified kafka config: {}",
                self.kafka_raw_config
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect::<Vec<String>>()
                    .join(", ")
            );
            for (key, value) in &self.kafka_raw_config {
                client_config.set(key, value);
            }
        }
        client_config
            .set("group.id", &self.consumer_group)
            .set("bootstrap.servers", self.servers())
            .set("auto.offset.reset", self.offset_reset.as_str())
            .set("enable.auto.commit", "false")
            .set_log_level(RDKafkaLogLevel::Warning);
        client_config
    }
}

fn random_group() -> String {
    format!("kgrep-{}", uuid::Uuid::new_v4())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_new() {
        let config =
            KafkaConsumerConfig::new("broker-1:9092, broker-2:9092,", "orders", None).unwrap();
        assert_eq!(config.brokers, vec!["broker-1:9092", "broker-2:9092"]);
        assert_eq!(config.servers(), "broker-1:9092,broker-2:9092");
        assert!(config.consumer_group.starts_with("kgrep-"));
        assert_eq!(config.offset_reset, OffsetReset::Earliest);

        let config =
            KafkaConsumerConfig::new("localhost:9092", "orders", Some("audit".to_string()))
                .unwrap();
        assert_eq!(config.consumer_group, "audit");

        let config =
            KafkaConsumerConfig::new("localhost:9092", "orders", Some(String::new())).unwrap();
        assert!(config.consumer_group.starts_with("kgrep-"));
    }

    #[test]
    fn test_config_new_rejects_empty_input() {
        assert!(matches!(
            KafkaConsumerConfig::new(" , ", "orders", None),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            KafkaConsumerConfig::new("localhost:9092", "", None),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_random_groups_differ() {
        assert_ne!(random_group(), random_group());
    }

    #[test]
    fn test_client_config_raw_properties_do_not_override() {
        let mut config = KafkaConsumerConfig::new("localhost:9092", "orders", None).unwrap();
        config.offset_reset = OffsetReset::Latest;
        config.kafka_raw_config = HashMap::from([
            ("enable.auto.commit".to_string(), "true".to_string()),
            ("security.protocol".to_string(), "SASL_SSL".to_string()),
            ("session.timeout.ms".to_string(), "30000".to_string()),
        ]);

        let client_config = config.client_config();
        assert_eq!(client_config.get("enable.auto.commit"), Some("false"));
        assert_eq!(client_config.get("security.protocol"), Some("SASL_SSL"));
        assert_eq!(client_config.get("session.timeout.ms"), Some("30000"));
        assert_eq!(client_config.get("auto.offset.reset"), Some("latest"));
        assert_eq!(client_config.get("bootstrap.servers"), Some("localhost:9092"));
        assert_eq!(
            client_config.get("group.id"),
            Some(config.consumer_group.as_str())
        );
    }
}
