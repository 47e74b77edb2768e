use std::fs::File;
use std::path::PathBuf;

use evtx::{EvtxParser, ParserSettings};
use log::info;

use super::{EventSource, Fragments};
use crate::error::{Error, Result};
use crate::parser::parse_event;
use crate::types::{QueryFilter, SourceTarget};

/// Pulls records one at a time from an `.evtx` file in file order.
///
/// A live channel is read through its backing log file. The reader has no
/// query engine, so the filter is evaluated on each parsed record instead.
pub struct SequentialSource {
    target: SourceTarget,
    parser: Option<EvtxParser<File>>,
}

impl SequentialSource {
    pub fn new(target: SourceTarget) -> Self {
        Self {
            target,
            parser: None,
        }
    }

    fn log_path(&self) -> PathBuf {
        match &self.target {
            SourceTarget::File(path) => path.clone(),
            SourceTarget::Channel(name) => channel_log_path(name),
        }
    }
}

impl EventSource for SequentialSource {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn fragments(&mut self, filter: &QueryFilter) -> Result<Fragments<'_>> {
        let path = self.log_path();
        info!("Reading {} from {}", self.target, path.display());

        let parser = EvtxParser::from_path(&path)
            .map_err(|e| Error::SourceUnavailable(format!("cannot open {}: {e}", path.display())))?
            .with_configuration(ParserSettings::default().num_threads(1));

        let filter = filter.clone();
        let records = self
            .parser
            .insert(parser)
            .records()
            .filter_map(move |record| match record {
                Ok(record) => admit(&filter, record.data),
                Err(e) => Some(Err(Error::backend("sequential", e.to_string()))),
            });

        Ok(Box::new(records))
    }
}

/// Backing file of a live channel; `/` in channel names is stored as `%4`.
pub fn channel_log_path(channel: &str) -> PathBuf {
    let root = std::env::var_os("SystemRoot")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(r"C:\Windows"));
    root.join("System32")
        .join("winevt")
        .join("Logs")
        .join(format!("{}.evtx", channel.replace('/', "%4")))
}

// Fragments that fail to parse are passed through so the collector applies
// its malformed-fragment policy to them.
fn admit(filter: &QueryFilter, fragment: String) -> Option<Result<String>> {
    if filter.matches_everything() {
        return Some(Ok(fragment));
    }
    match parse_event(&fragment) {
        Ok(record) if !filter.matches(&record) => None,
        _ => Some(Ok(fragment)),
    }
}
