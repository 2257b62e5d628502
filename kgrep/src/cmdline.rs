use std::collections::HashMap;
use std::path::PathBuf;

use clap::{Arg, ArgAction, ArgMatches, Command};
use kgrep_core::{Error, MessageFilter, Result};
use kgrep_kafka::{KafkaConsumerConfig, OffsetReset};

use crate::config::Settings;

pub(crate) mod grep;
pub(crate) mod tail;

pub(crate) fn root_cli() -> Command {
    Command::new("kgrep")
        .about("Search, filter and tail messages in Kafka topics")
        .version(env!("KGREP_VERSION_INFO"))
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(grep::add_grep_subcommand())
        .subcommand(tail::add_tail_subcommand())
}

/// Where to connect and which topic to read.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ConnectionArgs {
    pub(crate) bootstrap_servers: String,
    pub(crate) topic: String,
    pub(crate) group: Option<String>,
    pub(crate) properties: HashMap<String, String>,
}

impl ConnectionArgs {
    fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let bootstrap_servers = required_string(matches, "bootstrap-server")?;
        let topic = required_string(matches, "topic")?;
        let properties = matches
            .get_many::<(String, String)>("consumer-property")
            .map(|props| props.cloned().collect())
            .unwrap_or_default();
        Ok(Self {
            bootstrap_servers,
            topic,
            group: matches.get_one::<String>("group").cloned(),
            properties,
        })
    }

    pub(crate) fn kafka_config(
        &self,
        settings: &Settings,
        offset_reset: OffsetReset,
    ) -> Result<KafkaConsumerConfig> {
        let mut config =
            KafkaConsumerConfig::new(&self.bootstrap_servers, &self.topic, self.group.clone())?;
        config.offset_reset = offset_reset;
        config.request_timeout = settings.request_timeout;
        config.kafka_raw_config = self.properties.clone();
        Ok(config)
    }
}

/// What to report once the run ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OutputArgs {
    pub(crate) output: Option<PathBuf>,
    pub(crate) verbose: bool,
}

impl OutputArgs {
    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            output: matches.get_one::<PathBuf>("output").cloned(),
            verbose: matches.get_flag("verbose"),
        }
    }
}

fn filter_from_matches(matches: &ArgMatches) -> MessageFilter {
    let key_query = matches
        .get_one::<String>("key-query")
        .map(String::as_str)
        .unwrap_or_default();
    let value_query = matches
        .get_one::<String>("value-query")
        .map(String::as_str)
        .unwrap_or_default();
    MessageFilter::new(key_query, value_query)
}

fn required_string(matches: &ArgMatches, id: &str) -> Result<String> {
    matches
        .get_one::<String>(id)
        .cloned()
        .ok_or_else(|| Error::InvalidArgument(format!("--{id} is required")))
}

/// Parses a `key=value` consumer property.
fn parse_property(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

/// Arguments shared by every subcommand.
fn common_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("topic")
            .short('t')
            .long("topic")
            .help("Topic name")
            .required(true)
            .action(ArgAction::Set)
            .value_parser(clap::value_parser!(String)),
    )
    .arg(
        Arg::new("group")
            .short('g')
            .long("group")
            .help("Consumer group, a random kgrep-<uuid> group when omitted")
            .action(ArgAction::Set)
            .value_parser(clap::value_parser!(String)),
    )
    .arg(
        Arg::new("value-query")
            .short('q')
            .long("value-query")
            .help("Case-insensitive substring to look for in message values")
            .action(ArgAction::Set)
            .value_parser(clap::value_parser!(String)),
    )
    .arg(
        Arg::new("key-query")
            .short('k')
            .long("key-query")
            .help("Case-insensitive substring to look for in message keys")
            .action(ArgAction::Set)
            .value_parser(clap::value_parser!(String)),
    )
    .arg(
        Arg::new("output")
            .short('o')
            .long("output")
            .help("Write matched messages to this CSV file")
            .action(ArgAction::Set)
            .value_parser(clap::value_parser!(PathBuf)),
    )
    .arg(
        Arg::new("verbose")
            .short('v')
            .long("verbose")
            .help("Print matched messages in the terminal")
            .action(ArgAction::SetTrue),
    )
    .arg(
        Arg::new("consumer-property")
            .short('X')
            .long("consumer-property")
            .help("Raw librdkafka consumer property, e.g. -X security.protocol=SASL_SSL")
            .action(ArgAction::Append)
            .value_parser(parse_property),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        root_cli().debug_assert();
    }

    #[test]
    fn test_parse_property() {
        assert_eq!(
            parse_property("sasl.mechanisms=PLAIN").unwrap(),
            ("sasl.mechanisms".to_string(), "PLAIN".to_string())
        );
        assert_eq!(
            parse_property("sasl.password=a=b").unwrap(),
            ("sasl.password".to_string(), "a=b".to_string())
        );
        assert!(parse_property("no-separator").is_err());
        assert!(parse_property("=value").is_err());
    }

    #[test]
    fn test_root_requires_subcommand() {
        assert!(root_cli().try_get_matches_from(["kgrep"]).is_err());
        assert!(
            root_cli()
                .try_get_matches_from(["kgrep", "tail", "-b", "localhost:9092", "-t", "orders"])
                .is_ok()
        );
    }

    #[test]
    fn test_kafka_config_from_connection_args() {
        let args = ConnectionArgs {
            bootstrap_servers: "a:9092,b:9092".to_string(),
            topic: "orders".to_string(),
            group: Some("audit".to_string()),
            properties: HashMap::from([(
                "security.protocol".to_string(),
                "SSL".to_string(),
            )]),
        };
        let settings = Settings::default();
        let config = args.kafka_config(&settings, OffsetReset::Latest).unwrap();

        assert_eq!(config.brokers, vec!["a:9092", "b:9092"]);
        assert_eq!(config.consumer_group, "audit");
        assert_eq!(config.offset_reset, OffsetReset::Latest);
        assert_eq!(config.request_timeout, settings.request_timeout);
        assert_eq!(
            config.kafka_raw_config.get("security.protocol"),
            Some(&"SSL".to_string())
        );
    }
}
