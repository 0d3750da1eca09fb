//! Import pipeline integration tests
//!
//! Decoded events go through `EventImporter`, then `TraceModel::finalize`,
//! with settings loaded from a TOML file.

use serde_json::json;
use std::io::Write;
use std::ops::ControlFlow;
use tempfile::NamedTempFile;
use tracemodel::{
    EventImporter, ImportOutcome, ModelConfig, SnapshotPayload, Timestamp, TraceEvent, TraceModel,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn ts(nanos: i64) -> Timestamp {
    Timestamp::from_nanos(nanos)
}

/// A small compositor trace, in arrival order
fn compositor_events() -> Vec<TraceEvent> {
    let raw = json!([
        {"type": "process_name", "pid": 1, "name": "renderer"},
        {"type": "thread_name", "pid": 1, "tid": 10, "name": "Compositor"},
        {"type": "slice_begin", "pid": 1, "tid": 10, "category": "cc", "title": "DrawFrame",
         "ts": 5000, "args": {"host": {"id_ref": "0x1"}}},
        {"type": "object_snapshotted", "pid": 1, "id": "0x1", "category": "cc",
         "name": "cc::LayerTreeHostImpl", "ts": 5200,
         "args": {"device_viewport_size": {"width": 1280, "height": 720},
                  "tiles": [{"id": "cc::Tile/0x2", "contents_scale": 2.0}]}},
        {"type": "object_created", "pid": 1, "id": "0x1", "category": "cc",
         "name": "cc::LayerTreeHostImpl", "ts": 5100},
        {"type": "counter_sample", "pid": 1, "category": "memory", "name": "gpu",
         "series": "bytes", "ts": 5300, "value": 4096.0},
        {"type": "slice_end", "pid": 1, "tid": 10, "ts": 6000},
        {"type": "object_deleted", "pid": 1, "id": "0x1", "category": "cc",
         "name": "cc::LayerTreeHostImpl", "ts": 7000}
    ]);
    serde_json::from_value(raw).unwrap()
}

// Test 1: Out-of-order object events are applied in timestamp order
#[test]
fn test_import_and_finalize_compositor_trace() {
    init_tracing();
    let mut model = TraceModel::new();
    let summary = EventImporter::new(&mut model).import_events(compositor_events());
    assert_eq!(summary.events, 8);
    assert_eq!(summary.warnings, 0);

    let report = model.finalize();
    assert_eq!(report.shifted_by_nanos, -5_000);
    assert_eq!(report.auto_closed_slices, 0);
    assert_eq!(report.payload_failures, 0);

    let process = model.process(1).unwrap();
    assert_eq!(process.name(), Some("renderer"));

    let host = process.objects().get_snapshot_at("0x1", ts(200)).unwrap().unwrap();
    assert!(matches!(host.payload(), Some(SnapshotPayload::LayerTreeHostImpl(_))));
    assert_eq!(host.valid_before_ts(), ts(2_000));
    assert_eq!(host.refs().len(), 1);
    assert_eq!(host.refs()[0].pointer, "/tiles/0");

    let tile = process.objects().get_snapshot_at("0x2", ts(200)).unwrap().unwrap();
    assert_eq!(tile.containing_snapshot(), Some(host.handle()));
    assert!(matches!(tile.payload(), Some(SnapshotPayload::Tile(t)) if t.contents_scale == 2.0));

    let threads = model.find_all_threads_named("Compositor");
    let thread = threads[0];
    assert_eq!(thread.display_name(), "Compositor: 10");
    let slice = &thread.slice_group().slices()[0];
    assert_eq!(slice.start, ts(0));
    assert_eq!(slice.duration_nanos, 1_000);
    // The slice started before the host existed, so its reference stays unresolved
    assert!(slice.object_refs.is_empty());

    assert_eq!(model.categories().iter().map(String::as_str).collect::<Vec<_>>(), vec!["cc", "memory"]);
}

// Test 2: Rejected events become warnings and the import carries on
#[test]
fn test_bad_events_become_warnings() {
    init_tracing();
    let mut model = TraceModel::new();
    let mut importer = EventImporter::new(&mut model);
    importer.push(TraceEvent::ObjectCreated {
        pid: 1,
        id: "0x9".into(),
        category: "cc".into(),
        name: "Layer".into(),
        ts: ts(10),
    });
    importer.push(TraceEvent::ObjectCreated {
        pid: 1,
        id: "0x9".into(),
        category: "cc".into(),
        name: "Layer".into(),
        ts: ts(20),
    });
    importer.push(TraceEvent::SliceEnd {
        pid: 1,
        tid: 1,
        ts: ts(30),
        args: json!(null),
    });
    let summary = importer.finish();

    assert_eq!(summary.warnings, 2);
    let kinds: Vec<_> = model.import_warnings().iter().map(|w| w.kind.as_str()).collect();
    assert!(kinds.contains(&"object_parse_error"));
    assert!(kinds.contains(&"slice_parse_error"));
    assert_eq!(model.process(1).unwrap().objects().len(), 1);
}

// Test 3: Cancelling a chunked import leaves a usable partial model
#[test]
fn test_chunked_import_cancel() {
    let mut model = TraceModel::new();
    let events: Vec<_> = (0..10)
        .map(|i| TraceEvent::CounterSample {
            pid: 1,
            category: "cpu".into(),
            name: "load".into(),
            series: "value".into(),
            ts: ts(i),
            value: i as f64,
        })
        .collect();

    let mut yields = 0;
    let outcome = EventImporter::new(&mut model).import_chunked(events, 3, |progress| {
        yields += 1;
        if progress.events_read >= 6 {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    });

    assert_eq!(yields, 2);
    assert!(matches!(outcome, ImportOutcome::Cancelled(summary) if summary.events == 6));
    let counter = model.process(1).unwrap().base().counter("cpu", "load").unwrap();
    assert_eq!(counter.num_samples(), 6);
}

// Test 4: Settings from a TOML file drive finalize
#[test]
fn test_config_file_controls_finalize() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "shift_world_to_zero = false").unwrap();
    writeln!(file, "auto_delete_objects = false").unwrap();
    writeln!(file, "import_chunk_size = 2").unwrap();

    let config = ModelConfig::from_file(file.path()).unwrap();
    assert_eq!(config.import_chunk_size, 2);
    assert!(config.prune_empty_threads);

    let mut model = TraceModel::with_config(config);
    let chunk_size = model.config().import_chunk_size;
    let outcome = EventImporter::new(&mut model).import_chunked(compositor_events(), chunk_size, |_| {
        ControlFlow::Continue(())
    });
    assert!(matches!(outcome, ImportOutcome::Completed(_)));

    let report = model.finalize();
    assert_eq!(report.shifted_by_nanos, 0);
    assert_eq!(report.auto_deleted_objects, 0);
    assert_eq!(model.bounds().min(), Some(ts(5_000)));

    let tile = model
        .process(1)
        .unwrap()
        .objects()
        .get_object_instance_at("0x2", ts(100_000))
        .unwrap();
    assert!(!tile.is_deleted());
}

// Test 5: A missing config file is reported with its path
#[test]
fn test_missing_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    let err = ModelConfig::from_file(&path).unwrap_err();
    assert!(format!("{:#}", err).contains("absent.toml"));
}

// Test 6: Implicit snapshots embedded by several hosts follow host time order
#[test]
fn test_implicit_snapshots_across_hosts() {
    init_tracing();
    let raw = json!([
        {"type": "object_snapshotted", "pid": 1, "id": "0xA", "category": "cc",
         "name": "Host", "ts": 0, "args": {"tile": {"id": "cc::Tile/0x9", "contents_scale": 1.0}}},
        {"type": "object_snapshotted", "pid": 1, "id": "0xA", "category": "cc",
         "name": "Host", "ts": 100, "args": {"tile": {"id": "cc::Tile/0x9", "contents_scale": 3.0}}},
        {"type": "object_snapshotted", "pid": 1, "id": "0xB", "category": "cc",
         "name": "Host", "ts": 50, "args": {"tile": {"id": "cc::Tile/0x9", "contents_scale": 2.0}}},
        {"type": "object_snapshotted", "pid": 1, "id": "0xC", "category": "cc",
         "name": "Host", "ts": 70, "args": {"id": "0xC", "tile": {"id": "cc::Tile/0x8"}}}
    ]);
    let events: Vec<TraceEvent> = serde_json::from_value(raw).unwrap();

    let mut model = TraceModel::new();
    EventImporter::new(&mut model).import_events(events);
    let report = model.finalize();
    assert_eq!(report.implicit_snapshot_errors, 1);

    let warnings = model.import_warnings();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].kind, "object_snapshot_parse_error");
    assert!(warnings[0].message.contains("cannot have an id field"));

    let objects = model.process(1).unwrap().objects();
    assert!(objects.instance_map("0x8").is_none());
    for (at, scale) in [(0, 1.0), (50, 2.0), (100, 3.0)] {
        let tile = objects.get_snapshot_at("0x9", ts(at)).unwrap().unwrap();
        assert_eq!(tile.ts(), ts(at));
        assert!(matches!(tile.payload(), Some(SnapshotPayload::Tile(t)) if t.contents_scale == scale));
    }
}
