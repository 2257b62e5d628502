use clap::{Arg, ArgAction, ArgMatches, Command};
use kgrep_core::{Error, MessageFilter, Result, TailLimit};

use super::{ConnectionArgs, OutputArgs, common_args, filter_from_matches};

pub(crate) fn add_tail_subcommand() -> Command {
    let cmd = Command::new("tail")
        .about("Tail a Kafka topic and collect all matches until stopped")
        .arg_required_else_help(true)
        .arg(
            Arg::new("bootstrap-server")
                .short('b')
                .long("bootstrap-server")
                .visible_alias("broker")
                .help("Bootstrap server address(es), comma separated")
                .required(true)
                .action(ArgAction::Set)
                .value_parser(clap::value_parser!(String)),
        )
        .arg(
            Arg::new("limit")
                .short('l')
                .long("limit")
                .help("Stop after reading this many messages, -1 reads until stopped")
                .allow_negative_numbers(true)
                .default_value("-1")
                .value_parser(clap::value_parser!(i64)),
        );
    common_args(cmd)
}

#[derive(Debug, Clone)]
pub(crate) struct TailArgs {
    pub(crate) connection: ConnectionArgs,
    pub(crate) output: OutputArgs,
    pub(crate) filter: MessageFilter,
    pub(crate) limit: TailLimit,
}

impl TailArgs {
    pub(crate) fn from_matches(matches: &ArgMatches) -> Result<Self> {
        let limit = matches
            .get_one::<i64>("limit")
            .copied()
            .ok_or_else(|| Error::InvalidArgument("--limit is required".to_string()))?;

        Ok(Self {
            connection: ConnectionArgs::from_matches(matches)?,
            output: OutputArgs::from_matches(matches),
            filter: filter_from_matches(matches),
            limit: TailLimit::from_sentinel(limit)?,
        })
    }
}
