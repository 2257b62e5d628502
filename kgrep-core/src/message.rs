//! Matched messages and the key/value substring filter producing them.

use chrono::{DateTime, Utc};

use crate::client::RawMessage;

/// A message that passed the filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Key decoded lossily as UTF-8, original case.
    pub key: String,
    /// Value decoded lossily as UTF-8, lower-cased.
    pub value: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub partition: i32,
    /// Decimal string form of the offset.
    pub offset: String,
}

/// Case-insensitive substring filter on the key and/or the value of a message. A query that is
/// empty never contributes a match, so a filter with both queries empty matches nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageFilter {
    key_query: String,
    value_query: String,
}

impl MessageFilter {
    pub fn new(key_query: impl AsRef<str>, value_query: impl AsRef<str>) -> Self {
        Self {
            key_query: key_query.as_ref().to_lowercase(),
            value_query: value_query.as_ref().to_lowercase(),
        }
    }

    pub fn key_query(&self) -> &str {
        &self.key_query
    }

    pub fn value_query(&self) -> &str {
        &self.value_query
    }

    /// Returns the [Message] built from `raw` if it matches, `None` otherwise.
    pub fn apply(&self, raw: &RawMessage) -> Option<Message> {
        let key = raw
            .key
            .as_deref()
            .map(|k| String::from_utf8_lossy(k).into_owned())
            .unwrap_or_default();
        let value = raw
            .value
            .as_deref()
            .map(|v| String::from_utf8_lossy(v).to_lowercase())
            .unwrap_or_default();

        let key_match =
            !self.key_query.is_empty() && key.to_lowercase().contains(&self.key_query);
        let value_match = !self.value_query.is_empty() && value.contains(&self.value_query);
        if !key_match && !value_match {
            return None;
        }

        Some(Message {
            key,
            value,
            timestamp: raw.timestamp.and_then(DateTime::from_timestamp_millis),
            partition: raw.partition,
            offset: raw.offset.to_string(),
        })
    }
}
