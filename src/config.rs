//! Run configuration handed to the collector by the command line layer.

use std::path::PathBuf;

use chrono::{DateTime, Duration, SecondsFormat, Utc};

use crate::collector::MalformedPolicy;
use crate::sources::Backend;
use crate::types::{QueryFilter, SourceTarget};

/// Everything one run needs, validated up front and read-only afterwards.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub backend: Backend,
    pub target: SourceTarget,
    pub event_ids: Vec<i32>,
    pub lookback_hours: Option<u64>,
    pub output_dir: PathBuf,
    pub progress_interval: u64,
    pub malformed: MalformedPolicy,
}

impl RunConfig {
    /// Derives the query filter as of `now`.
    pub fn query_filter(&self, now: DateTime<Utc>) -> QueryFilter {
        let start = self.lookback_hours.map(|hours| {
            let hours = i64::try_from(hours).unwrap_or(i64::MAX);
            let start = Duration::try_hours(hours)
                .and_then(|span| now.checked_sub_signed(span))
                .unwrap_or(DateTime::<Utc>::MIN_UTC);
            format_timestamp(start)
        });
        QueryFilter::new(self.event_ids.iter().copied(), start)
    }

    /// Output file name, `<source>_<YYYYMMDD_HHMMSS>.json`.
    pub fn output_filename(&self, now: DateTime<Utc>) -> String {
        let source = match &self.target {
            SourceTarget::Channel(name) => name.replace(['/', '\\'], "_"),
            SourceTarget::File(path) => path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| "evtx".to_string()),
        };
        format!("{}_{}.json", source, now.format("%Y%m%d_%H%M%S"))
    }
}

/// ISO-8601 UTC with millisecond precision, as the query engine expects.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
