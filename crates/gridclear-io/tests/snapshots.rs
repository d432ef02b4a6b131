use gridclear_algo::market::{
    ClearingConfig, ClearingOrchestrator, MarketSetup, StageKind, TableKind, TimeHorizon,
};
use gridclear_algo::test_utils::{two_zone_market, ScriptedBackend};
use gridclear_io::manifest::{read_manifest, write_manifest};
use gridclear_io::{
    load_market_data, read_status, read_table, CsvSink, DataSnapshot, ElementCounts,
    CURRENT_SCHEMA_VERSION,
};
use std::fs;
use tempfile::tempdir;

#[test]
fn test_snapshot_round_trip() {
    let dir = tempdir().unwrap();
    let data = two_zone_market();
    let manifest = DataSnapshot::write(dir.path(), &data).unwrap();
    assert_eq!(manifest.schema_version, CURRENT_SCHEMA_VERSION);
    assert_eq!(manifest.counts.nodes, 3);
    assert_eq!(manifest.counts.ntcs, 1);

    let loaded = DataSnapshot::load(dir.path()).unwrap();
    assert!(!loaded.diagnostics.has_issues());
    assert_eq!(ElementCounts::of(&loaded.data), manifest.counts);
    assert_eq!(
        serde_json::to_value(&loaded.data).unwrap(),
        serde_json::to_value(&data).unwrap()
    );
}

#[test]
fn test_older_snapshot_is_migrated() {
    let dir = tempdir().unwrap();
    let data = two_zone_market();
    let mut manifest = DataSnapshot::write(dir.path(), &data).unwrap();
    manifest.schema_version = "1.0.0".to_string();
    write_manifest(dir.path(), &manifest).unwrap();

    // drop a field introduced after 1.0
    let path = dir.path().join("data.json");
    let mut value: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    value.as_object_mut().unwrap().remove("prosumers");
    fs::write(&path, serde_json::to_string(&value).unwrap()).unwrap();

    let loaded = DataSnapshot::load(dir.path()).unwrap();
    assert!(loaded.data.prosumers.is_empty());
    assert_eq!(loaded.diagnostics.note_count(), 1);
    assert!(loaded
        .diagnostics
        .notes()
        .any(|n| n.category == "migration" && n.message.contains("prosumers")));
}

#[test]
fn test_newer_major_snapshot_is_rejected() {
    let dir = tempdir().unwrap();
    let mut manifest = DataSnapshot::write(dir.path(), &two_zone_market()).unwrap();
    manifest.schema_version = "2.0.0".to_string();
    write_manifest(dir.path(), &manifest).unwrap();

    let err = DataSnapshot::load(dir.path()).unwrap_err();
    assert!(err.to_string().contains("too new"));
}

#[test]
fn test_bare_file_without_optional_fields() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("market.json");
    fs::write(
        &path,
        r#"{
            "grid": {
                "nodes": [
                    {"id": 1, "name": "n1", "zone": 1, "is_slack": true},
                    {"id": 2, "name": "n2", "zone": 1}
                ],
                "ac_lines": [
                    {"id": 1, "name": "l12", "from_node": 1, "to_node": 2,
                     "resistance": 0.0, "reactance": 0.1}
                ]
            }
        }"#,
    )
    .unwrap();

    let loaded = load_market_data(&path).unwrap();
    assert!(loaded.manifest.is_none());
    assert_eq!(loaded.data.grid.nodes.len(), 2);
    assert!(!loaded.data.grid.nodes[1].is_slack);
    assert_eq!(loaded.data.grid.ac_lines[0].circuits, 1);
    assert!(loaded.data.grid.ac_lines[0].capacity_mw.is_infinite());
    assert!(loaded
        .diagnostics
        .notes()
        .any(|n| n.entity.as_deref() == Some("Node n2")));
    assert!(!loaded.diagnostics.has_errors());
}

#[test]
fn test_csv_sink_receives_a_full_run() {
    let dir = tempdir().unwrap();
    let data = two_zone_market();
    let config = ClearingConfig::new(TimeHorizon::new(1, 4, 2), MarketSetup::default());
    let backend = ScriptedBackend::optimal();
    let orchestrator = ClearingOrchestrator::new(&data, &config, &backend).unwrap();

    let mut sink = CsvSink::new(dir.path());
    let report = orchestrator.run(&mut sink).unwrap();
    assert_eq!(report.chunks.len(), 2);

    assert!(read_manifest(dir.path()).unwrap().is_some());
    for chunk in 0..2 {
        let stage_dir = sink.stage_dir(chunk, StageKind::DayAhead);
        let status = read_status(&stage_dir).unwrap();
        assert_eq!(status.window.index, chunk);

        let gen = read_table(&stage_dir.join("GEN.csv"), TableKind::Generation).unwrap();
        // two plants, two periods
        assert_eq!(gen.len(), 4);
        assert!(sink.chunk_dir(chunk).join("report.json").exists());
    }
}
