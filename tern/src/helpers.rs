use std::ops::RangeInclusive;

use bytesize::ByteSize;
use snafu::Snafu;
use tern_ingest_core::IngestorStats;

#[derive(Debug, Clone, Snafu)]
pub enum RangeParserError {
    #[snafu(display("Empty range string"))]
    Empty,
    #[snafu(display("Invalid range"))]
    Invalid,
    #[snafu(display("Failed to parse size {value}: {message}"))]
    Parse { value: String, message: String },
}

/// Parses a size or a range of sizes, e.g. `512`, `1KiB` or `200-4KiB`.
pub fn parse_size_range(range_str: &str) -> Result<RangeInclusive<usize>, RangeParserError> {
    let range_str = range_str.trim();
    if range_str.is_empty() {
        return Err(RangeParserError::Empty);
    }

    match range_str.split('-').collect::<Vec<_>>().as_slice() {
        [value] => {
            let value = parse_size(value)?;
            Ok(value..=value)
        }
        [start, end] => {
            let start = parse_size(start)?;
            let end = parse_size(end)?;

            if start > end {
                return Err(RangeParserError::Invalid);
            }

            Ok(start..=end)
        }
        _ => Err(RangeParserError::Invalid),
    }
}

fn parse_size(value: &str) -> Result<usize, RangeParserError> {
    let value = value.trim();
    let size = value
        .parse::<ByteSize>()
        .map_err(|message| RangeParserError::Parse {
            value: value.to_string(),
            message,
        })?;

    usize::try_from(size.as_u64()).map_err(|_| RangeParserError::Invalid)
}

/// One-line summary of the ingestor activity.
pub fn format_stats(stats: &IngestorStats) -> String {
    let counters = &stats.counters;
    let completed = counters.succeeded + counters.failed;
    let avg_latency_ms = if completed == 0 {
        0
    } else {
        counters.total_latency.as_millis() as u64 / completed.max(1)
    };

    format!(
        "in-flight {} | queued {} ({}) | submitted {} ({}) | succeeded {} | failed {} | outstanding {} | latency/op {}ms{}",
        stats.in_flight,
        stats.queued_operations,
        ByteSize::b(stats.queued_bytes).display().iec(),
        counters.submitted,
        ByteSize::b(counters.total_bytes).display().iec(),
        counters.succeeded,
        counters.failed,
        counters.outstanding_docs,
        avg_latency_ms,
        if counters.closed { " | CLOSED" } else { "" },
    )
}
