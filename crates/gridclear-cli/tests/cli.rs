use assert_cmd::Command;
use gridclear_algo::test_utils::{single_node_market, three_node_market};
use gridclear_io::DataSnapshot;
use predicates::prelude::*;
use std::fs;
use tempfile::tempdir;

const ISOLATED_NODE: &str = r#"{
    "grid": {
        "nodes": [
            {"id": 1, "name": "n1", "zone": 1, "is_slack": true},
            {"id": 2, "name": "n2", "zone": 1},
            {"id": 3, "name": "n3", "zone": 1}
        ],
        "ac_lines": [
            {"id": 1, "name": "l12", "from_node": 1, "to_node": 2,
             "resistance": 0.0, "reactance": 0.1}
        ]
    }
}"#;

#[test]
fn gridclear_validate_reports_grid_stats() {
    let dir = tempdir().unwrap();
    DataSnapshot::write(dir.path(), &three_node_market()).unwrap();

    Command::cargo_bin("gridclear")
        .unwrap()
        .args(["validate", "--data", dir.path().to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("islands"));
}

#[test]
fn gridclear_validate_fails_on_isolated_node() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("market.json");
    fs::write(&path, ISOLATED_NODE).unwrap();

    Command::cargo_bin("gridclear")
        .unwrap()
        .args(["validate", "--json", "--data", path.to_str().unwrap()])
        .assert()
        .failure()
        .stdout(predicate::str::contains("isolated"))
        .stderr(predicate::str::contains("error(s)"));
}

#[test]
fn gridclear_ptdf_prints_node_columns() {
    let dir = tempdir().unwrap();
    DataSnapshot::write(dir.path(), &three_node_market()).unwrap();

    Command::cargo_bin("gridclear")
        .unwrap()
        .args(["ptdf", "--data", dir.path().to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("line,n1,n2,n3"))
        .stdout(predicate::str::contains("l13,"));
}

#[test]
fn gridclear_ptdf_zonal_to_file() {
    let dir = tempdir().unwrap();
    DataSnapshot::write(dir.path(), &three_node_market()).unwrap();
    let out = dir.path().join("zonal.csv");

    Command::cargo_bin("gridclear")
        .unwrap()
        .args([
            "ptdf",
            "--zonal",
            "--gsk",
            "flat",
            "--data",
            dir.path().to_str().unwrap(),
            "-o",
            out.to_str().unwrap(),
        ])
        .assert()
        .success();

    let text = fs::read_to_string(&out).unwrap();
    assert!(text.starts_with("line,market"));
    assert_eq!(text.lines().count(), 4);
}

#[cfg(feature = "solver-clarabel")]
#[test]
fn gridclear_run_writes_result_directory() {
    let dir = tempdir().unwrap();
    let data_dir = dir.path().join("data");
    DataSnapshot::write(&data_dir, &single_node_market(100.0, 80.0)).unwrap();
    let config = dir.path().join("clearing.toml");
    fs::write(&config, "[horizon]\nstart = 1\nstop = 2\nsplit = 1\n").unwrap();
    let out = dir.path().join("out");

    Command::cargo_bin("gridclear")
        .unwrap()
        .args([
            "run",
            "--threads",
            "1",
            "--data",
            data_dir.to_str().unwrap(),
            "--config",
            config.to_str().unwrap(),
            "--out",
            out.to_str().unwrap(),
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("2 chunk(s) cleared, 0 failed"));

    assert!(out.join("run_manifest.json").exists());
    assert!(out.join("chunk_1/day_ahead/GEN.csv").exists());
}
