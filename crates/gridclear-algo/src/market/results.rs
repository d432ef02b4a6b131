//! Result tables and result sinks.
//!
//! Each stage produces row-oriented tables with a fixed column schema per
//! [`TableKind`]. Rows are `(entity, period, values…)`; `values` follows
//! [`TableKind::columns`] in order. Missing values (e.g. prices of a stage
//! whose solver returned no duals) are `NaN`.

use super::config::TimeWindow;
use super::solver::SolveStatus;
use gridclear_core::MarketData;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TableKind {
    Generation,
    Curtailment,
    Redispatch,
    Charge,
    StorageLevel,
    NetInput,
    LineFlow,
    Exchange,
    Ntc,
    Prosumer,
    ZonalMarketBalance,
    NodalMarketBalance,
    RedispatchMarketBalance,
}

impl TableKind {
    /// Table name used by sinks (file names, keys)
    pub fn name(&self) -> &'static str {
        match self {
            TableKind::Generation => "GEN",
            TableKind::Curtailment => "CURT",
            TableKind::Redispatch => "REDISP",
            TableKind::Charge => "CHARGE",
            TableKind::StorageLevel => "STO_LVL",
            TableKind::NetInput => "NETINPUT",
            TableKind::LineFlow => "LINEFLOW",
            TableKind::Exchange => "EXCHANGE",
            TableKind::Ntc => "NTC",
            TableKind::Prosumer => "PRS",
            TableKind::ZonalMarketBalance => "ZonalMarketBalance",
            TableKind::NodalMarketBalance => "NodalMarketBalance",
            TableKind::RedispatchMarketBalance => "RedispatchMarketBalance",
        }
    }

    /// Value columns, after `entity` and `period`
    pub fn columns(&self) -> &'static [&'static str] {
        match self {
            TableKind::Generation => &["generation"],
            TableKind::Curtailment => &["curtailment"],
            TableKind::Redispatch => &["up", "down"],
            TableKind::Charge => &["charge", "discharge"],
            TableKind::StorageLevel => &["level"],
            TableKind::NetInput => &["net_input"],
            TableKind::LineFlow => &["flow", "capacity"],
            TableKind::Exchange => &["exchange"],
            TableKind::Ntc => &["capacity"],
            TableKind::Prosumer => &["import", "export", "charge", "discharge", "level"],
            TableKind::ZonalMarketBalance
            | TableKind::NodalMarketBalance
            | TableKind::RedispatchMarketBalance => &["price", "lost_load", "curtailment"],
        }
    }
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub entity: String,
    pub period: usize,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultTable {
    pub kind: TableKind,
    pub rows: Vec<ResultRow>,
}

impl ResultTable {
    pub fn new(kind: TableKind) -> Self {
        Self {
            kind,
            rows: Vec::new(),
        }
    }

    /// Append a row. `values` must match the kind's column count.
    pub fn push(&mut self, entity: impl Into<String>, period: usize, values: Vec<f64>) {
        debug_assert_eq!(values.len(), self.kind.columns().len());
        self.rows.push(ResultRow {
            entity: entity.into(),
            period,
            values,
        });
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value of `column` for `(entity, period)`
    pub fn value(&self, entity: &str, period: usize, column: &str) -> Option<f64> {
        let col = self.kind.columns().iter().position(|c| *c == column)?;
        self.rows
            .iter()
            .find(|r| r.entity == entity && r.period == period)
            .and_then(|r| r.values.get(col).copied())
    }

    /// Sum of `column` over all rows
    pub fn column_sum(&self, column: &str) -> f64 {
        match self.kind.columns().iter().position(|c| *c == column) {
            Some(col) => self.rows.iter().map(|r| r.values[col]).sum(),
            None => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    DayAhead,
    Prosumer,
    Redispatch,
}

impl StageKind {
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::DayAhead => "day_ahead",
            StageKind::Prosumer => "prosumer",
            StageKind::Redispatch => "redispatch",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything one stage of one chunk produced.
#[derive(Debug, Clone)]
pub struct StageResults {
    pub stage: StageKind,
    pub status: SolveStatus,
    pub objective: Option<f64>,
    pub message: Option<String>,
    pub tables: BTreeMap<TableKind, ResultTable>,
}

impl StageResults {
    pub fn new(stage: StageKind, status: SolveStatus) -> Self {
        Self {
            stage,
            status,
            objective: None,
            message: None,
            tables: BTreeMap::new(),
        }
    }

    pub fn table(&self, kind: TableKind) -> Option<&ResultTable> {
        self.tables.get(&kind)
    }

    pub fn insert(&mut self, table: ResultTable) {
        self.tables.insert(table.kind, table);
    }
}

/// Optimised prosumer grid exchange, `net_injection[prosumer][k]` = export − import.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProsumerSchedule {
    pub net_injection: Vec<Vec<f64>>,
}

/// Day-ahead dispatch handed to redispatch as the baseline.
///
/// All vectors are indexed `[entity][k]` with `k` the step within the chunk;
/// entities follow the order of `MarketData::plants` and `MarketData::storages`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchSnapshot {
    pub generation: Vec<Vec<f64>>,
    pub curtailment: Vec<Vec<f64>>,
    pub charge: Vec<Vec<f64>>,
    pub discharge: Vec<Vec<f64>>,
    pub prosumer: Option<ProsumerSchedule>,
}

/// Outcome of one stage, as recorded in chunk reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: StageKind,
    pub status: SolveStatus,
    pub objective: Option<f64>,
}

/// Receives results as the orchestrator produces them.
///
/// Implementations for parallel runs must write every chunk to its own
/// destination; the orchestrator never shares a sink between chunks.
pub trait ResultSink {
    /// Static input data, written once per run
    fn write_snapshot(&mut self, data: &MarketData) -> anyhow::Result<()>;

    fn write_stage(&mut self, window: &TimeWindow, results: &StageResults) -> anyhow::Result<()>;

    /// Called after the last stage of a chunk, successful or not
    fn finish_chunk(&mut self, report: &super::orchestrator::ChunkReport) -> anyhow::Result<()> {
        let _ = report;
        Ok(())
    }
}

/// Keeps everything in memory. Used by tests and library callers.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub snapshot_written: bool,
    pub stages: Vec<(TimeWindow, StageResults)>,
    pub reports: Vec<super::orchestrator::ChunkReport>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(&self, chunk: usize, stage: StageKind) -> Option<&StageResults> {
        self.stages
            .iter()
            .find(|(w, r)| w.index == chunk && r.stage == stage)
            .map(|(_, r)| r)
    }
}

impl ResultSink for MemorySink {
    fn write_snapshot(&mut self, _data: &MarketData) -> anyhow::Result<()> {
        self.snapshot_written = true;
        Ok(())
    }

    fn write_stage(&mut self, window: &TimeWindow, results: &StageResults) -> anyhow::Result<()> {
        self.stages.push((*window, results.clone()));
        Ok(())
    }

    fn finish_chunk(&mut self, report: &super::orchestrator::ChunkReport) -> anyhow::Result<()> {
        self.reports.push(report.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_schema() {
        assert_eq!(TableKind::StorageLevel.name(), "STO_LVL");
        assert_eq!(TableKind::Prosumer.columns().len(), 5);
        assert_eq!(
            TableKind::NodalMarketBalance.columns(),
            &["price", "lost_load", "curtailment"]
        );
    }

    #[test]
    fn test_table_lookup() {
        let mut table = ResultTable::new(TableKind::Charge);
        table.push("battery", 1, vec![5.0, 0.0]);
        table.push("battery", 2, vec![0.0, 4.0]);
        assert_eq!(table.value("battery", 2, "discharge"), Some(4.0));
        assert_eq!(table.value("battery", 3, "discharge"), None);
        assert_eq!(table.value("battery", 1, "level"), None);
        assert_eq!(table.column_sum("charge"), 5.0);
    }

    #[test]
    fn test_memory_sink_lookup() {
        let mut sink = MemorySink::new();
        let window = TimeWindow {
            index: 1,
            first: 3,
            last: 4,
        };
        let results = StageResults::new(StageKind::DayAhead, SolveStatus::Optimal);
        sink.write_stage(&window, &results).unwrap();
        assert!(sink.stage(1, StageKind::DayAhead).is_some());
        assert!(sink.stage(0, StageKind::DayAhead).is_none());
        assert_eq!(StageKind::DayAhead.to_string(), "day_ahead");
    }
}
