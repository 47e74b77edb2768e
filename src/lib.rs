//! Streams Windows event log records into a single JSON array.
//!
//! One [`sources::EventSource`] produces serialized events, the
//! [`parser`] turns each into a [`types::Record`], and the
//! [`collector::Collector`] writes them through an [`output::ArraySink`]
//! while the source is still being read.

pub mod collector;
pub mod config;
pub mod error;
pub mod output;
pub mod parser;
pub mod sources;
pub mod types;
mod utils;

pub use collector::{Collector, MalformedPolicy, RunState};
pub use config::RunConfig;
pub use error::{Error, Result};
pub use output::{ArraySink, OutputManager};
pub use parser::parse_event;
pub use sources::{Backend, EventSource};
pub use types::{QueryFilter, Record, SourceTarget};
