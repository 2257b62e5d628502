//! Rendering of a finished run: terminal summary, the optional table of matches and the CSV export.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use kgrep_core::{Message, ScanResult};
use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use tracing::info;

use crate::cmdline::OutputArgs;
use crate::error::{Error, Result};

/// One matched message as written to the CSV export.
#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    partition: i32,
    offset: &'a str,
    timestamp: String,
    key: &'a str,
    value: &'a str,
}

#[derive(Debug, Tabled)]
struct TableRow<'a> {
    #[tabled(rename = "Partition")]
    partition: i32,
    #[tabled(rename = "Offset")]
    offset: &'a str,
    #[tabled(rename = "Timestamp")]
    timestamp: String,
    #[tabled(rename = "Key")]
    key: &'a str,
    #[tabled(rename = "Value")]
    value: &'a str,
}

fn format_timestamp(timestamp: Option<DateTime<Utc>>) -> String {
    timestamp
        .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_default()
}

/// Elapsed time rounded to whole seconds, half a second rounds up.
fn round_to_seconds(elapsed: Duration) -> u64 {
    (elapsed.as_millis() as u64 + 500) / 1000
}

pub(crate) fn summary(result: &ScanResult) -> String {
    format!(
        "Matched messages: {}\nRead messages: {}\nSearch time: {}s",
        result.matched,
        result.read,
        round_to_seconds(result.elapsed)
    )
}

/// Table of the matched messages, most recent first. `None` when nothing matched.
pub(crate) fn table(result: &ScanResult) -> Option<String> {
    if result.messages.is_empty() {
        return None;
    }
    let rows = result.messages.iter().map(|m| TableRow {
        partition: m.partition,
        offset: &m.offset,
        timestamp: format_timestamp(m.timestamp),
        key: &m.key,
        value: &m.value,
    });
    Some(Table::new(rows).with(Style::modern()).to_string())
}

/// Writes the messages as CSV with a `partition,offset,timestamp,key,value` header.
pub(crate) fn write_csv<'a, W: Write>(
    writer: W,
    messages: impl IntoIterator<Item = &'a Message>,
) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    for m in messages {
        writer
            .serialize(CsvRow {
                partition: m.partition,
                offset: &m.offset,
                timestamp: format_timestamp(m.timestamp),
                key: &m.key,
                value: &m.value,
            })
            .map_err(|e| Error::Output(format!("Failed to write CSV row: {e}")))?;
    }
    writer
        .flush()
        .map_err(|e| Error::Output(format!("Failed to flush CSV output: {e}")))
}

/// Exports the matches of `result` to `path`. No file is created when nothing matched, returns
/// whether one was written.
pub(crate) fn write_csv_file(result: &ScanResult, path: &Path) -> Result<bool> {
    if result.messages.is_empty() {
        info!(path = %path.display(), "No matches, skipping CSV export");
        return Ok(false);
    }
    let file = File::create(path)
        .map_err(|e| Error::Output(format!("Failed to create {}: {e}", path.display())))?;
    write_csv(file, &result.messages)?;
    info!(path = %path.display(), rows = result.messages.len(), "Wrote matches");
    Ok(true)
}

/// Everything printed or written once a run ends.
pub(crate) fn report(result: &ScanResult, args: &OutputArgs) -> Result<()> {
    if let Some(path) = &args.output {
        write_csv_file(result, path)?;
    }

    println!();
    println!("{}", summary(result));
    println!();

    if args.verbose {
        if let Some(table) = table(result) {
            println!("{table}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    fn message(partition: i32, offset: i64, key: &str, value: &str, ts: Option<i64>) -> Message {
        Message {
            key: key.to_string(),
            value: value.to_string(),
            timestamp: ts.and_then(DateTime::from_timestamp_millis),
            partition,
            offset: offset.to_string(),
        }
    }

    fn result() -> ScanResult {
        ScanResult {
            messages: VecDeque::from([
                message(1, 17, "user-7", "disk, full", Some(1_709_287_200_123)),
                message(0, 3, "", "error \"quoted\"", None),
            ]),
            matched: 2,
            read: 40,
            elapsed: Duration::from_millis(2_600),
        }
    }

    #[test]
    fn test_summary_rounds_seconds() {
        assert_eq!(
            summary(&result()),
            "Matched messages: 2\nRead messages: 40\nSearch time: 3s"
        );
        assert_eq!(round_to_seconds(Duration::from_millis(1_499)), 1);
        assert_eq!(round_to_seconds(Duration::ZERO), 0);
    }

    #[test]
    fn test_write_csv() {
        let mut buf = Vec::new();
        write_csv(&mut buf, &result().messages).unwrap();

        let csv = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(
            lines,
            vec![
                "partition,offset,timestamp,key,value",
                "1,17,2024-03-01T10:00:00.123Z,user-7,\"disk, full\"",
                "0,3,,,\"error \"\"quoted\"\"\"",
            ]
        );
    }

    #[test]
    fn test_write_csv_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matches.csv");

        assert!(write_csv_file(&result(), &path).unwrap());
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("partition,offset,timestamp,key,value\n"));
        assert_eq!(written.lines().count(), 3);
    }

    #[test]
    fn test_no_matches_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("matches.csv");
        let empty = ScanResult::default();

        assert!(!write_csv_file(&empty, &path).unwrap());
        assert!(!path.exists());
        assert!(table(&empty).is_none());
    }

    #[test]
    fn test_write_csv_file_bad_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("matches.csv");
        assert!(matches!(
            write_csv_file(&result(), &path),
            Err(Error::Output(_))
        ));
    }

    #[test]
    fn test_table() {
        let table = table(&result()).unwrap();
        assert!(table.contains("Partition"));
        assert!(table.contains("user-7"));
        assert!(table.contains("2024-03-01T10:00:00.123Z"));
        let first = table.find("user-7").unwrap();
        let second = table.find("quoted").unwrap();
        assert!(first < second);
    }
}
