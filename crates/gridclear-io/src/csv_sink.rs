//! Result sink writing one CSV file per table.
//!
//! Layout under the output root:
//!
//! ```text
//! data.json, manifest.json            input snapshot
//! chunk_<k>/<stage>/<TABLE>.csv       entity, period, value columns
//! chunk_<k>/<stage>/status.json       solver status and objective
//! chunk_<k>/report.json               stage sequence of the chunk
//! ```
//!
//! Each chunk lives in its own directory, so sinks for different chunks can
//! write concurrently.

use crate::snapshot::DataSnapshot;
use anyhow::{bail, Context, Result};
use gridclear_algo::market::{
    ChunkReport, ResultSink, ResultTable, SolveStatus, StageKind, StageResults, TableKind,
    TimeWindow,
};
use gridclear_core::MarketData;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const STATUS_FILE: &str = "status.json";
pub const REPORT_FILE: &str = "report.json";

/// Contents of `status.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageStatus {
    pub stage: StageKind,
    pub status: SolveStatus,
    pub objective: Option<f64>,
    pub message: Option<String>,
    pub window: TimeWindow,
    pub tables: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CsvSink {
    root: PathBuf,
}

impl CsvSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn chunk_dir(&self, chunk: usize) -> PathBuf {
        chunk_dir(&self.root, chunk)
    }

    pub fn stage_dir(&self, chunk: usize, stage: StageKind) -> PathBuf {
        self.chunk_dir(chunk).join(stage.name())
    }
}

fn chunk_dir(root: &Path, chunk: usize) -> PathBuf {
    root.join(format!("chunk_{chunk}"))
}

fn write_table(path: &Path, table: &ResultTable) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("creating CSV writer for {}", path.display()))?;

    let mut header = vec!["entity", "period"];
    header.extend_from_slice(table.kind.columns());
    wtr.write_record(&header).context("writing CSV header")?;

    for row in &table.rows {
        let mut record = Vec::with_capacity(row.values.len() + 2);
        record.push(row.entity.clone());
        record.push(row.period.to_string());
        record.extend(row.values.iter().map(|v| v.to_string()));
        wtr.write_record(&record).context("writing CSV record")?;
    }

    wtr.flush().context("flushing CSV writer")?;
    Ok(())
}

impl ResultSink for CsvSink {
    fn write_snapshot(&mut self, data: &MarketData) -> Result<()> {
        DataSnapshot::write(&self.root, data)?;
        Ok(())
    }

    fn write_stage(&mut self, window: &TimeWindow, results: &StageResults) -> Result<()> {
        let dir = self.stage_dir(window.index, results.stage);
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating result directory '{}'", dir.display()))?;

        for table in results.tables.values() {
            write_table(&dir.join(format!("{}.csv", table.kind.name())), table)?;
        }

        let status = StageStatus {
            stage: results.stage,
            status: results.status,
            objective: results.objective,
            message: results.message.clone(),
            window: *window,
            tables: results.tables.keys().map(|k| k.name().to_string()).collect(),
        };
        let path = dir.join(STATUS_FILE);
        let json = serde_json::to_string_pretty(&status).context("serializing stage status")?;
        fs::write(&path, json).with_context(|| format!("writing '{}'", path.display()))?;

        debug!(
            chunk = window.index,
            stage = %results.stage,
            tables = results.tables.len(),
            "stage results written"
        );
        Ok(())
    }

    fn finish_chunk(&mut self, report: &ChunkReport) -> Result<()> {
        let dir = self.chunk_dir(report.window.index);
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating result directory '{}'", dir.display()))?;
        let path = dir.join(REPORT_FILE);
        let json = serde_json::to_string_pretty(report).context("serializing chunk report")?;
        fs::write(&path, json).with_context(|| format!("writing '{}'", path.display()))
    }
}

/// Read back a table written by [`CsvSink`].
pub fn read_table(path: &Path, kind: TableKind) -> Result<ResultTable> {
    let mut rdr = csv::Reader::from_path(path)
        .with_context(|| format!("opening CSV file {}", path.display()))?;

    let headers = rdr.headers().context("reading CSV header")?.clone();
    let expected = 2 + kind.columns().len();
    if headers.len() != expected {
        bail!(
            "{}: expected {} columns for {}, found {}",
            path.display(),
            expected,
            kind,
            headers.len()
        );
    }

    let mut table = ResultTable::new(kind);
    for (line, record) in rdr.records().enumerate() {
        let record = record.with_context(|| format!("reading record {}", line + 1))?;
        let period: usize = record[1]
            .parse()
            .with_context(|| format!("record {}: invalid period '{}'", line + 1, &record[1]))?;
        let values = (2..record.len())
            .map(|i| {
                record[i]
                    .parse::<f64>()
                    .with_context(|| format!("record {}: invalid value '{}'", line + 1, &record[i]))
            })
            .collect::<Result<Vec<_>>>()?;
        table.push(record[0].to_string(), period, values);
    }
    Ok(table)
}

pub fn read_status(dir: &Path) -> Result<StageStatus> {
    let path = dir.join(STATUS_FILE);
    let text = fs::read_to_string(&path).with_context(|| format!("reading '{}'", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing '{}'", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn window() -> TimeWindow {
        TimeWindow {
            index: 1,
            first: 3,
            last: 4,
        }
    }

    #[test]
    fn test_stage_tables_and_status() {
        let dir = tempdir().unwrap();
        let mut sink = CsvSink::new(dir.path());

        let mut results = StageResults::new(StageKind::DayAhead, SolveStatus::Optimal);
        results.objective = Some(1600.0);
        let mut gen = ResultTable::new(TableKind::Generation);
        gen.push("plant", 3, vec![80.0]);
        gen.push("plant", 4, vec![75.5]);
        results.insert(gen.clone());
        let mut balance = ResultTable::new(TableKind::ZonalMarketBalance);
        balance.push("market", 3, vec![f64::NAN, 0.0, 0.0]);
        results.insert(balance);

        sink.write_stage(&window(), &results).unwrap();

        let stage_dir = sink.stage_dir(1, StageKind::DayAhead);
        assert!(stage_dir.ends_with("chunk_1/day_ahead"));
        let back = read_table(&stage_dir.join("GEN.csv"), TableKind::Generation).unwrap();
        assert_eq!(back, gen);

        let prices = read_table(
            &stage_dir.join("ZonalMarketBalance.csv"),
            TableKind::ZonalMarketBalance,
        )
        .unwrap();
        assert!(prices.rows[0].values[0].is_nan());

        let status = read_status(&stage_dir).unwrap();
        assert_eq!(status.status, SolveStatus::Optimal);
        assert_eq!(status.objective, Some(1600.0));
        assert_eq!(status.window, window());
        assert_eq!(status.tables, vec!["GEN", "ZonalMarketBalance"]);
    }

    #[test]
    fn test_read_table_rejects_wrong_schema() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("GEN.csv");
        fs::write(&path, "entity,period,generation\nplant,1,5\n").unwrap();
        assert!(read_table(&path, TableKind::Redispatch).is_err());

        fs::write(&path, "entity,period,generation\nplant,x,5\n").unwrap();
        assert!(read_table(&path, TableKind::Generation).is_err());
    }
}
