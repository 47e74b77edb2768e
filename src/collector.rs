//! Drives one event source into a JSON array sink.

use std::io::Write;

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::output::ArraySink;
use crate::parser::parse_event;
use crate::sources::EventSource;
use crate::types::QueryFilter;

/// What to do with a fragment that cannot be tokenized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MalformedPolicy {
    /// Fail the run. A broken fragment usually means the read lost sync.
    #[default]
    Abort,
    /// Log it, count it and move on.
    Skip,
}

/// Lifecycle of a collection run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Streaming,
    Done,
    Failed,
}

/// Streams one source through the parser into an [`ArraySink`], one record
/// at a time.
pub struct Collector<W: Write> {
    sink: ArraySink<W>,
    progress_interval: u64,
    malformed: MalformedPolicy,
    skipped: u64,
    state: RunState,
}

impl<W: Write> Collector<W> {
    pub fn new(sink: ArraySink<W>) -> Self {
        Self {
            sink,
            progress_interval: 0,
            malformed: MalformedPolicy::Abort,
            skipped: 0,
            state: RunState::Idle,
        }
    }

    /// Invoke the progress callback, and flush, every `interval` records.
    /// Zero disables checkpoints.
    pub fn progress_interval(mut self, interval: u64) -> Self {
        self.progress_interval = interval;
        self
    }

    pub fn malformed_policy(mut self, policy: MalformedPolicy) -> Self {
        self.malformed = policy;
        self
    }

    /// Records written so far, including by a run that later failed.
    pub fn processed(&self) -> u64 {
        self.sink.count()
    }

    /// Fragments dropped under [`MalformedPolicy::Skip`].
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Runs the whole collection and returns the number of records written.
    ///
    /// If the source cannot be opened nothing is written. Any later error
    /// ends the run with the partial array left in the sink as written.
    pub fn run<F>(
        &mut self,
        source: &mut dyn EventSource,
        filter: &QueryFilter,
        progress: F,
    ) -> Result<u64>
    where
        F: FnMut(u64),
    {
        match self.stream(source, filter, progress) {
            Ok(()) => {
                self.state = RunState::Done;
                info!(
                    "{} backend finished: {} records written, {} skipped",
                    source.name(),
                    self.processed(),
                    self.skipped
                );
                Ok(self.processed())
            }
            Err(e) => {
                self.state = RunState::Failed;
                let _ = self.sink.flush();
                Err(e)
            }
        }
    }

    /// Returns the sink, e.g. to inspect an in-memory writer.
    pub fn into_sink(self) -> ArraySink<W> {
        self.sink
    }

    fn stream<F>(
        &mut self,
        source: &mut dyn EventSource,
        filter: &QueryFilter,
        mut progress: F,
    ) -> Result<()>
    where
        F: FnMut(u64),
    {
        debug!("Filter expression: {}", filter);
        let fragments = source.fragments(filter)?;

        self.sink.begin()?;
        self.state = RunState::Streaming;

        for fragment in fragments {
            let fragment = fragment?;

            let record = match parse_event(&fragment) {
                Ok(record) => record,
                Err(Error::MalformedFragment(reason))
                    if self.malformed == MalformedPolicy::Skip =>
                {
                    self.skipped += 1;
                    warn!(
                        "Skipping malformed fragment after record {}: {}",
                        self.processed(),
                        reason
                    );
                    continue;
                }
                Err(e) => return Err(e),
            };

            self.sink.write_element(&record)?;

            let written = self.processed();
            if self.progress_interval > 0 && written % self.progress_interval == 0 {
                self.sink.flush()?;
                progress(written);
            }
        }

        self.sink.finish()
    }
}
