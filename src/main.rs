use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::time::Instant;

use winevt_extract::{
    sources, Backend, Collector, MalformedPolicy, OutputManager, RunConfig, SourceTarget,
};

#[derive(Parser)]
#[command(name = "winevt-extract")]
#[command(about = "Stream Windows event log records into a JSON array")]
struct Args {
    /// Event source backend
    #[arg(long, value_enum, default_value_t = Backend::Native)]
    backend: Backend,

    /// Live channel to query
    #[arg(long, default_value = "Security")]
    log: String,

    /// Exported .evtx file to read instead of a live channel
    #[arg(long, conflicts_with = "log")]
    file: Option<PathBuf>,

    /// Event IDs to keep (repeatable or comma-separated)
    #[arg(long = "event-id", value_delimiter = ',')]
    event_ids: Vec<i32>,

    /// Only events from the last N hours
    #[arg(long)]
    hours: Option<u64>,

    /// Output directory
    #[arg(short, long, default_value = "eventlog-collect")]
    output: PathBuf,

    /// Report progress every N records (0 disables)
    #[arg(long, default_value_t = 1000)]
    progress: u64,

    /// Skip fragments that fail to parse instead of aborting
    #[arg(long)]
    skip_malformed: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

impl From<Args> for RunConfig {
    fn from(args: Args) -> Self {
        let target = match args.file {
            Some(path) => SourceTarget::File(path),
            None => SourceTarget::Channel(args.log),
        };
        RunConfig {
            backend: args.backend,
            target,
            event_ids: args.event_ids,
            lookback_hours: args.hours,
            output_dir: args.output,
            progress_interval: args.progress,
            malformed: if args.skip_malformed {
                MalformedPolicy::Skip
            } else {
                MalformedPolicy::Abort
            },
        }
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .parse_default_env()
        .init();

    let config = RunConfig::from(args);
    run(&config)
}

fn run(config: &RunConfig) -> Result<()> {
    let now = Utc::now();
    let filter = config.query_filter(now);
    info!(
        "Collecting from {} with {} backend",
        config.target,
        config.backend.as_str()
    );
    info!("Filter: {}", filter);

    let output = OutputManager::new(config.output_dir.clone());
    let (report_path, sink) = output
        .create_array(&config.output_filename(now))
        .with_context(|| format!("cannot create output in {}", output.output_dir().display()))?;

    let mut source = sources::open(config.backend, config.target.clone());
    let mut collector = Collector::new(sink)
        .progress_interval(config.progress_interval)
        .malformed_policy(config.malformed);

    let start_time = Instant::now();
    let outcome = collector.run(source.as_mut(), &filter, |count| {
        info!(
            "Processed {} records ({:.1}s)",
            count,
            start_time.elapsed().as_secs_f64()
        );
    });
    let duration = start_time.elapsed();

    match outcome {
        Ok(count) => {
            info!("Collection completed in {:.2}s", duration.as_secs_f64());
            println!("Records written: {}", count);
            if collector.skipped() > 0 {
                println!("Malformed fragments skipped: {}", collector.skipped());
            }
            println!("Report file: {}", report_path.display());
            println!("Duration: {:.2}s", duration.as_secs_f64());
            Ok(())
        }
        Err(e) => {
            error!(
                "Collection failed after {} records: {}",
                collector.processed(),
                e
            );
            error!("Partial output left at {}", report_path.display());
            Err(e.into())
        }
    }
}
