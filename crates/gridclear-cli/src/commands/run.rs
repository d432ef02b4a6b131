use anyhow::Result;
use gridclear_algo::market::ClearingConfig;
use gridclear_batch::{BatchRunnerConfig, BatchSummary};
use gridclear_core::MarketData;
use gridclear_io::load_market_data;
use std::io::{self, Write};
use std::path::Path;
use tabwriter::TabWriter;
use tracing::warn;

pub fn handle(data: &Path, config: &Path, out: &Path, threads: Option<usize>) -> Result<()> {
    let loaded = load_market_data(data)?;
    for issue in loaded.diagnostics.warnings() {
        warn!(category = %issue.category, "{}", issue.message);
    }
    let config = ClearingConfig::from_toml_file(config)?;
    let batch = BatchRunnerConfig {
        output_root: out.to_path_buf(),
        threads,
    };

    let summary = clear(&loaded.data, &config, &batch)?;
    print_summary(&summary)?;
    println!(
        "{} chunk(s) cleared, {} failed; manifest at {}",
        summary.success,
        summary.failure,
        summary.manifest_path.display()
    );
    Ok(())
}

#[cfg(feature = "solver-clarabel")]
fn clear(
    data: &MarketData,
    config: &ClearingConfig,
    batch: &BatchRunnerConfig,
) -> Result<BatchSummary> {
    use gridclear_algo::market::{ClarabelBackend, ClearingOrchestrator};

    let backend = ClarabelBackend;
    let orchestrator = ClearingOrchestrator::new(data, config, &backend)?;
    gridclear_batch::run_batch(batch, &orchestrator)
}

#[cfg(not(feature = "solver-clarabel"))]
fn clear(_: &MarketData, _: &ClearingConfig, _: &BatchRunnerConfig) -> Result<BatchSummary> {
    anyhow::bail!(
        "gridclear was built without a solver backend; enable the solver-clarabel feature"
    )
}

fn print_summary(summary: &BatchSummary) -> Result<()> {
    let mut writer = TabWriter::new(io::stdout());
    writeln!(writer, "CHUNK\tPERIODS\tSTAGES\tRESULT")?;
    for chunk in &summary.report.chunks {
        let stages: Vec<String> = chunk
            .stages
            .iter()
            .map(|s| format!("{}={}", s.stage, s.status))
            .collect();
        let result = match chunk.failed {
            Some(stage) => format!("failed in {stage}"),
            None => "ok".to_string(),
        };
        writeln!(
            writer,
            "{}\t{}-{}\t{}\t{}",
            chunk.window.index,
            chunk.window.first,
            chunk.window.last,
            stages.join(" "),
            result
        )?;
    }
    writer.flush()?;
    Ok(())
}
