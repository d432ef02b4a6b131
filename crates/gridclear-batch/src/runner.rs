use crate::manifest::{write_run_manifest, RunManifest, RUN_MANIFEST_FILE};
use anyhow::{Context, Result};
use chrono::Utc;
use gridclear_algo::market::{
    ChunkReport, ClearingOrchestrator, LpBackend, ResultSink, RunReport, TimeWindow,
};
use gridclear_io::CsvSink;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, warn};

/// Where a batch run writes and how many workers it uses.
pub struct BatchRunnerConfig {
    pub output_root: PathBuf,
    /// Overrides the thread count of the clearing configuration when set
    pub threads: Option<usize>,
}

/// Summary returned after the run so clients can log success/failure counts and manifest location.
pub struct BatchSummary {
    pub success: usize,
    pub failure: usize,
    pub manifest_path: PathBuf,
    pub report: RunReport,
}

fn resolve_threads(threads: usize) -> usize {
    if threads == 0 {
        num_cpus::get()
    } else {
        threads
    }
}

/// Solve every chunk of the horizon on a worker pool.
///
/// Each chunk gets its own sink from `make_sink`; the orchestrator and its
/// network model are shared read-only. Reports come back in chunk order.
/// The data snapshot is not written here.
///
/// Under the abort policy a failed chunk makes the whole call fail; chunks
/// already running on other workers still finish and persist their results.
pub fn run_parallel<B, S, F>(
    orchestrator: &ClearingOrchestrator<'_, B>,
    threads: usize,
    make_sink: F,
) -> Result<RunReport>
where
    B: LpBackend + ?Sized,
    S: ResultSink,
    F: Fn(&TimeWindow) -> Result<S> + Sync,
{
    let thread_count = resolve_threads(threads);
    let pool = ThreadPoolBuilder::new()
        .num_threads(thread_count)
        .build()
        .context("building Rayon thread pool for chunk runs")?;

    let windows = orchestrator.chunks();
    info!(
        chunks = windows.len(),
        threads = thread_count,
        "starting parallel clearing"
    );
    let started = Instant::now();

    let chunks: Vec<ChunkReport> = pool.install(|| {
        windows
            .par_iter()
            .map(|window| -> Result<ChunkReport> {
                let mut sink = make_sink(window)
                    .with_context(|| format!("creating result sink for chunk {}", window.index))?;
                orchestrator
                    .run_chunk(window, &mut sink)
                    .with_context(|| format!("clearing chunk {}", window.index))
            })
            .collect::<Result<Vec<_>>>()
    })?;

    let report = RunReport { chunks };
    let failed = report.failed_chunks();
    if failed.is_empty() {
        info!(
            chunks = report.chunks.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "parallel clearing finished"
        );
    } else {
        warn!(
            chunks = report.chunks.len(),
            ?failed,
            "parallel clearing finished with failed chunks"
        );
    }
    Ok(report)
}

/// Clear the whole horizon into a CSV result directory and write a run manifest.
pub fn run_batch<B>(
    config: &BatchRunnerConfig,
    orchestrator: &ClearingOrchestrator<'_, B>,
) -> Result<BatchSummary>
where
    B: LpBackend + ?Sized,
{
    fs::create_dir_all(&config.output_root).with_context(|| {
        format!(
            "creating batch output root '{}'",
            config.output_root.display()
        )
    })?;

    CsvSink::new(&config.output_root).write_snapshot(orchestrator.data())?;

    let clearing = orchestrator.config();
    let threads = resolve_threads(config.threads.unwrap_or(clearing.threads));
    let root = &config.output_root;
    let report = run_parallel(orchestrator, threads, |_| Ok(CsvSink::new(root)))?;

    let failure = report.failed_chunks().len();
    let success = report.chunks.len() - failure;

    let manifest = RunManifest {
        created_at: Utc::now(),
        gridclear_version: env!("CARGO_PKG_VERSION").to_string(),
        horizon: clearing.horizon,
        threads,
        num_chunks: report.chunks.len(),
        success,
        failure,
        chunks: report.chunks.clone(),
    };
    let manifest_path = config.output_root.join(RUN_MANIFEST_FILE);
    write_run_manifest(&manifest_path, &manifest)?;

    Ok(BatchSummary {
        success,
        failure,
        manifest_path,
        report,
    })
}
