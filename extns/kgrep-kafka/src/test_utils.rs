//! Helpers for tests against a broker on `localhost:9092`.

use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};

/// Creates a topic with a random name and `partitions` partitions.
pub async fn setup_test_topic(partitions: i32) -> (FutureProducer, String) {
    let producer: FutureProducer = ClientConfig::new()
        .set("bootstrap.servers", "localhost:9092")
        .create()
        .expect("Failed to create producer");

    let topic_name = format!(
        "kgrep_test_topic_{}",
        uuid::Uuid::new_v4().to_string().replace('-', "")
    );

    let admin_client = ClientConfig::new()
        .set("bootstrap.servers", "localhost:9092")
        .create::<rdkafka::admin::AdminClient<_>>()
        .expect("Failed to create admin client");

    let topic_config = rdkafka::admin::NewTopic::new(
        topic_name.as_str(),
        partitions,
        rdkafka::admin::TopicReplication::Fixed(1),
    );
    let _ = admin_client
        .create_topics(&[topic_config], &rdkafka::admin::AdminOptions::new())
        .await
        .expect("Failed to create topic");

    (producer, topic_name)
}

/// Produces `count` messages `key <i>` / `message <i>` into a single partition.
pub async fn produce_test_messages(
    producer: &FutureProducer,
    topic: &str,
    partition: i32,
    count: usize,
) {
    for i in 0..count {
        let payload = format!("message {i}");
        let key = format!("key {i}");
        let record = FutureRecord::to(topic)
            .partition(partition)
            .payload(&payload)
            .key(&key);
        producer
            .send(record, Duration::from_secs(5))
            .await
            .expect("Failed to send message");
    }
}
