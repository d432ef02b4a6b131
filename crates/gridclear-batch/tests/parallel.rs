use gridclear_algo::market::{
    ClearingConfig, ClearingOrchestrator, FailurePolicy, MarketSetup, SolveStatus, StageKind,
    TimeHorizon,
};
use gridclear_algo::test_utils::{two_zone_market, ScriptedBackend};
use gridclear_batch::{load_run_manifest, run_batch, run_parallel, BatchRunnerConfig};
use gridclear_io::{read_manifest, read_status, CsvSink};
use tempfile::tempdir;

fn config(split: usize) -> ClearingConfig {
    ClearingConfig::new(TimeHorizon::new(1, 4, split), MarketSetup::default())
}

#[test]
fn test_reports_come_back_in_chunk_order() {
    let dir = tempdir().unwrap();
    let data = two_zone_market();
    let cfg = config(1);
    let backend = ScriptedBackend::optimal();
    let orchestrator = ClearingOrchestrator::new(&data, &cfg, &backend).unwrap();

    let report = run_parallel(&orchestrator, 3, |_| Ok(CsvSink::new(dir.path()))).unwrap();

    let indices: Vec<usize> = report.chunks.iter().map(|c| c.window.index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3]);
    assert!(report.failed_chunks().is_empty());
    assert_eq!(backend.calls(), 4);
    for chunk in 0..4 {
        let dir = CsvSink::new(dir.path()).stage_dir(chunk, StageKind::DayAhead);
        assert_eq!(read_status(&dir).unwrap().window.first, chunk + 1);
    }
}

#[test]
fn test_failed_chunk_does_not_stop_the_others() {
    let dir = tempdir().unwrap();
    let data = two_zone_market();
    let cfg = config(2);
    let backend = ScriptedBackend::new(vec![SolveStatus::Infeasible]);
    let orchestrator = ClearingOrchestrator::new(&data, &cfg, &backend).unwrap();

    let report = run_parallel(&orchestrator, 2, |_| Ok(CsvSink::new(dir.path()))).unwrap();
    assert_eq!(report.chunks.len(), 2);
    assert_eq!(report.failed_chunks().len(), 1);
}

#[test]
fn test_abort_fails_the_run() {
    let dir = tempdir().unwrap();
    let data = two_zone_market();
    let mut cfg = config(2);
    cfg.on_failure = FailurePolicy::Abort;
    let backend = ScriptedBackend::new(vec![SolveStatus::Infeasible]);
    let orchestrator = ClearingOrchestrator::new(&data, &cfg, &backend).unwrap();

    let result = run_parallel(&orchestrator, 1, |_| Ok(CsvSink::new(dir.path())));
    assert!(result.is_err());
}

#[test]
fn test_sink_factory_errors_are_reported() {
    let data = two_zone_market();
    let cfg = config(2);
    let backend = ScriptedBackend::optimal();
    let orchestrator = ClearingOrchestrator::new(&data, &cfg, &backend).unwrap();

    let result = run_parallel(&orchestrator, 1, |window| -> anyhow::Result<CsvSink> {
        anyhow::bail!("no sink for chunk {}", window.index)
    });
    let err = result.unwrap_err();
    assert!(format!("{err:#}").contains("no sink for chunk"));
    assert_eq!(backend.calls(), 0);
}

#[test]
fn test_batch_writes_snapshot_and_manifest() {
    let dir = tempdir().unwrap();
    let data = two_zone_market();
    let cfg = config(2);
    let backend = ScriptedBackend::optimal();
    let orchestrator = ClearingOrchestrator::new(&data, &cfg, &backend).unwrap();

    let summary = run_batch(
        &BatchRunnerConfig {
            output_root: dir.path().to_path_buf(),
            threads: Some(2),
        },
        &orchestrator,
    )
    .unwrap();
    assert_eq!(summary.success, 2);
    assert_eq!(summary.failure, 0);

    let manifest = load_run_manifest(&summary.manifest_path).unwrap();
    assert_eq!(manifest.threads, 2);
    assert_eq!(manifest.num_chunks, 2);
    assert_eq!(manifest.horizon, cfg.horizon);
    assert!(read_manifest(dir.path()).unwrap().is_some());
}
