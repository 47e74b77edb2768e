//! Event source backends.
//!
//! Each backend produces the same thing: a finite, ordered, lazy sequence of
//! serialized events for one query. The collector drives whichever one was
//! selected for the run and never needs to know which it is.
//!
//! # Available Sources
//!
//! - [`ProcessSource`] - runs `wevtutil qe` and scans its output
//! - [`NativeSource`] - batched `EvtQuery`/`EvtNext`/`EvtRender` (Windows only)
//! - [`SequentialSource`] - reads records one at a time with the `evtx` parser

mod fragments;
mod native;
mod process;
mod sequential;

pub use fragments::{FragmentExtractor, EVENT_TAG};
pub use native::NativeSource;
pub use process::ProcessSource;
pub use sequential::SequentialSource;

use clap::ValueEnum;

use crate::error::Result;
use crate::types::{QueryFilter, SourceTarget};

/// Lazy sequence of serialized events. Ending is normal exhaustion; an
/// `Err` item is fatal and ends the sequence.
pub type Fragments<'a> = Box<dyn Iterator<Item = Result<String>> + 'a>;

/// A source of serialized events.
pub trait EventSource {
    /// Human-readable backend name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Opens the query and returns its events in backend order.
    ///
    /// Failing to open is reported here, before any event is produced.
    /// Resources acquired for the query are released when the returned
    /// sequence is dropped, whether or not it was exhausted.
    fn fragments(&mut self, filter: &QueryFilter) -> Result<Fragments<'_>>;
}

/// Backend selected for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Scrape `wevtutil` output.
    Process,
    /// Native batched event log API.
    Native,
    /// Sequential `.evtx` record reader.
    Sequential,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Process => "process",
            Backend::Native => "native",
            Backend::Sequential => "sequential",
        }
    }
}

/// Creates the event source for `backend`, bound to `target`.
pub fn open(backend: Backend, target: SourceTarget) -> Box<dyn EventSource> {
    log::debug!("Using {} backend for {}", backend.as_str(), target);
    match backend {
        Backend::Process => Box::new(ProcessSource::new(target)),
        Backend::Native => Box::new(NativeSource::new(target)),
        Backend::Sequential => Box::new(SequentialSource::new(target)),
    }
}
