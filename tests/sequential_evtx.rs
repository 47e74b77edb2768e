use std::fs;
use std::path::PathBuf;

use winevt_extract::sources::SequentialSource;
use winevt_extract::{Collector, OutputManager, QueryFilter, Record, RunState, SourceTarget};

/// Three Security-Auditing logons in one chunk: record 1 (4624, alice),
/// record 2 (4625, bob), record 3 (4624, carol), one hour apart from
/// 2024-01-01T08:00:00Z.
fn security_sample() -> SourceTarget {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("samples")
        .join("security_small.evtx");
    SourceTarget::File(path)
}

fn collect(filter: &QueryFilter) -> (u64, Vec<Record>) {
    let dir = tempfile::tempdir().unwrap();
    let output = OutputManager::new(dir.path().to_path_buf());
    let (path, sink) = output.create_array("security_small.json").unwrap();

    let mut source = SequentialSource::new(security_sample());
    let mut collector = Collector::new(sink);
    let count = collector.run(&mut source, filter, |_| {}).unwrap();
    assert_eq!(collector.state(), RunState::Done);
    drop(collector);

    let text = fs::read_to_string(&path).unwrap();
    let records = serde_json::from_str(&text).unwrap();
    (count, records)
}

#[test]
fn test_sequential_reads_all_records_in_file_order() {
    let (count, records) = collect(&QueryFilter::default());

    assert_eq!(count, 3);
    let ids: Vec<_> = records.iter().map(|r| r.record_id).collect();
    assert_eq!(ids, vec![Some(1), Some(2), Some(3)]);

    let first = &records[0];
    assert_eq!(first.event_id, Some(4624));
    assert_eq!(
        first.provider_name.as_deref(),
        Some("Microsoft-Windows-Security-Auditing")
    );
    assert_eq!(first.computer.as_deref(), Some("WS7.corp.example"));
    assert_eq!(
        first.time_created.as_deref(),
        Some("2024-01-01T08:00:00.0000000Z")
    );
    assert_eq!(first.event_data["TargetUserName"], "alice");
    assert_eq!(first.event_data["LogonType"], "3");

    assert_eq!(records[1].event_data["Status"], "0xc000006d");
    assert_eq!(records[2].event_data["TargetUserName"], "carol");
}

#[test]
fn test_sequential_event_id_filter_excludes_records() {
    let (count, records) = collect(&QueryFilter::new([4625], None));

    assert_eq!(count, 1);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].record_id, Some(2));
    assert_eq!(records[0].event_data["TargetUserName"], "bob");
}

#[test]
fn test_sequential_start_filter_is_inclusive() {
    let start = Some("2024-01-01T09:00:00.000Z".to_string());
    let (count, records) = collect(&QueryFilter::new([4624, 4625], start));

    assert_eq!(count, 2);
    let ids: Vec<_> = records.iter().map(|r| r.record_id).collect();
    assert_eq!(ids, vec![Some(2), Some(3)]);
}
