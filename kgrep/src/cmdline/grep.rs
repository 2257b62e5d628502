use clap::{Arg, ArgAction, ArgMatches, Command};
use kgrep_core::{Error, GrepRequest, Result, StartPolicy};

use super::{ConnectionArgs, OutputArgs, common_args, filter_from_matches};

const DEFAULT_LIMIT: &str = "1000";

pub(crate) fn add_grep_subcommand() -> Command {
    let cmd = Command::new("grep")
        .about("Search through a Kafka topic and collect all matching messages")
        .long_about(
            "Reads the given amount of messages, or up to the end of the topic, from every \
             partition and keeps the ones whose key or value contains the query. Matches can be \
             printed in the terminal and/or exported to a CSV file.",
        )
        .arg_required_else_help(true)
        .arg(
            Arg::new("bootstrap-server")
                .short('b')
                .long("bootstrap-server")
                .help("Bootstrap server address(es), comma separated")
                .required(true)
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(String)),
        )
        .arg(
            Arg::new("limit")
                .short('l')
                .long("limit")
                .help("Maximum number of messages read per partition")
                .allow_negative_numbers(true)
                .default_value(DEFAULT_LIMIT)
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("seek")
                .long("seek")
                .help("Start at the first message at or after this RFC 3339 timestamp")
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(String)),
        )
        .arg(
            Arg::new("earliest")
                .long("earliest")
                .help("Start at the earliest offset (default)")
                .action(ArgAction::SetTrue)
                .conflicts_with_all(["latest", "seek"]),
        )
        .arg(
            Arg::new("latest")
                .long("latest")
                .help("Start at the latest offset minus the limit")
                .action(ArgAction::SetTrue)
                .conflicts_with("seek"),
        );
    common_args(cmd)
}

#[derive(Debug, Clone)]
pub(crate) struct GrepArgs {
    pub(crate) connection: ConnectionArgs,
    pub(crate) output: OutputArgs,
    pub(crate) request: GrepRequest,
}

impl GrepArgs {
    /// Validates the arguments. Nothing here talks to the broker.
    pub(crate) fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let limit = matches
            .get_one::<i64>("limit")
            .copied()
            .ok_or_else(|| Error::InvalidArgument("--limit is required".to_string()))?;
        if limit < 0 {
            return Err(Error::InvalidArgument(
                "limit cannot be less than zero".to_string(),
            ));
        }

        let start = match matches.get_one::<String>("seek") {
            Some(timestamp) => StartPolicy::from_rfc3339(timestamp)?,
            None if matches.get_flag("latest") => StartPolicy::LatestMinus(limit.unsigned_abs()),
            None => StartPolicy::Earliest,
        };

        Ok(Self {
            connection: ConnectionArgs::from_matches(matches)?,
            output: OutputArgs::from_matches(matches),
            request: GrepRequest {
                filter: filter_from_matches(matches),
                limit,
                start,
            },
        })
    }
}
