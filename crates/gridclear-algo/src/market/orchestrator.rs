//! Stage state machine and chunk loop.
//!
//! ```text
//! DayAhead ──► Prosumer ──► Redispatch ──► Done
//!    │            │             ▲
//!    │            └─(no RD)─► Done
//!    └──────(no prosumers)──────┘
//! ```
//!
//! Each stage is persisted as soon as it is solved, including stages that
//! ended without an optimal solution. A non-optimal stage ends its chunk;
//! [`FailurePolicy`] decides whether the run carries on with the next chunk.

use super::config::{
    ClearingConfig, FailurePolicy, FlowFormulation, RetailPricing, Scope, TimeWindow,
};
use super::prosumer::ProsumerStage;
use super::results::{
    DispatchSnapshot, ProsumerSchedule, ResultSink, StageKind, StageOutcome, StageResults,
};
use super::scope::{NodalScope, SpatialScope, ZonalScope};
use super::solver::{LpBackend, LpSolution, SolveStatus};
use super::stage::{ProsumerInjection, StageBuilder, StageOutput};
use super::supply::{DayAheadSupply, RedispatchSupply, SupplyContext};
use super::ClearingError;
use crate::market::lp::LinearModel;
use crate::network::{NetworkModel, ZonalSensitivities};
use gridclear_core::{GridError, MarketData};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Position of a chunk in the stage sequence, with the data the next stage needs.
#[derive(Debug, Clone)]
pub enum StageState {
    DayAhead {
        window: TimeWindow,
    },
    Prosumer {
        window: TimeWindow,
        pricing: RetailPricing,
        /// Day-ahead balance prices, absent when the solver returned no duals
        reference_prices: Option<Vec<Vec<f64>>>,
        day_ahead: DispatchSnapshot,
    },
    Redispatch {
        window: TimeWindow,
        snapshot: DispatchSnapshot,
    },
    Done,
}

impl StageState {
    pub fn stage(&self) -> Option<StageKind> {
        match self {
            StageState::DayAhead { .. } => Some(StageKind::DayAhead),
            StageState::Prosumer { .. } => Some(StageKind::Prosumer),
            StageState::Redispatch { .. } => Some(StageKind::Redispatch),
            StageState::Done => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkReport {
    pub window: TimeWindow,
    pub stages: Vec<StageOutcome>,
    /// First stage that did not reach optimality
    pub failed: Option<StageKind>,
    /// Error that ended the chunk before its stage produced a status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl ChunkReport {
    fn new(window: TimeWindow) -> Self {
        Self {
            window,
            stages: Vec::new(),
            failed: None,
            reason: None,
        }
    }

    fn mark_failed(&mut self, stage: StageKind, reason: String) {
        if self.stages.last().map(|s| s.stage) != Some(stage) {
            self.stages.push(StageOutcome {
                stage,
                status: SolveStatus::Error,
                objective: None,
            });
        }
        self.failed = Some(stage);
        self.reason = Some(reason);
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub chunks: Vec<ChunkReport>,
}

impl RunReport {
    /// Indices of chunks with a failed stage
    pub fn failed_chunks(&self) -> Vec<usize> {
        self.chunks
            .iter()
            .filter(|c| !c.is_success())
            .map(|c| c.window.index)
            .collect()
    }
}

/// Runs the configured stages over every chunk of the horizon.
///
/// Construction validates the configuration and builds the network model
/// once; chunks share it read-only, so `run_chunk` may be called from several
/// threads at once as long as every call gets its own sink.
pub struct ClearingOrchestrator<'a, B: LpBackend + ?Sized> {
    data: &'a MarketData,
    config: &'a ClearingConfig,
    backend: &'a B,
    network: Option<NetworkModel>,
    zonal: Option<ZonalSensitivities>,
    penalty: f64,
}

impl<'a, B: LpBackend + ?Sized> ClearingOrchestrator<'a, B> {
    pub fn new(
        data: &'a MarketData,
        config: &'a ClearingConfig,
        backend: &'a B,
    ) -> Result<Self, ClearingError> {
        let diag = config.validate(data);
        if diag.has_errors() {
            return Err(ClearingError::Config(diag));
        }
        for issue in diag.warnings() {
            warn!(category = %issue.category, "{}", issue.message);
        }

        let setup = &config.setup;
        let network = if setup.needs_network() {
            let network = NetworkModel::build(&data.grid, setup.needs_ptdf())?;
            if network.diagnostics.has_warnings() {
                warn!(
                    warnings = network.diagnostics.warning_count(),
                    omitted = network.omitted.len(),
                    "network built with warnings"
                );
            }
            Some(network)
        } else {
            None
        };

        let zonal = match (&network, setup.zonal_line_limits) {
            (Some(network), true) => Some(network.zonal_sensitivities(
                &data.grid,
                &config.gsk.node_weights(data),
                config.gsk.normalize_empty,
            )?),
            _ => None,
        };

        let penalty = config.costs.penalty(data.max_marginal_cost());
        info!(
            backend = backend.id(),
            scope = ?setup.scope,
            redispatch = ?setup.redispatch,
            prosumer = setup.prosumer.is_some(),
            penalty,
            "clearing orchestrator ready"
        );

        Ok(Self {
            data,
            config,
            backend,
            network,
            zonal,
            penalty,
        })
    }

    pub fn chunks(&self) -> Vec<TimeWindow> {
        self.config.horizon.chunks()
    }

    pub fn network(&self) -> Option<&NetworkModel> {
        self.network.as_ref()
    }

    pub fn data(&self) -> &'a MarketData {
        self.data
    }

    pub fn config(&self) -> &'a ClearingConfig {
        self.config
    }

    /// Run every chunk in order into one sink, writing the data snapshot first.
    pub fn run(&self, sink: &mut dyn ResultSink) -> Result<RunReport, ClearingError> {
        sink.write_snapshot(self.data).map_err(persistence)?;
        let mut report = RunReport::default();
        for window in self.chunks() {
            report.chunks.push(self.run_chunk(&window, sink)?);
        }
        let failed = report.failed_chunks();
        if failed.is_empty() {
            info!(chunks = report.chunks.len(), "clearing finished");
        } else {
            warn!(
                chunks = report.chunks.len(),
                ?failed,
                "clearing finished with failed chunks"
            );
        }
        Ok(report)
    }

    /// Run all stages of one chunk.
    ///
    /// Returns `Err` for build and persistence errors, and for failed stages
    /// under [`FailurePolicy::Abort`]. Otherwise failures, including solver
    /// errors and missing prices, are in the report and the sink still gets
    /// `finish_chunk`.
    pub fn run_chunk(
        &self,
        window: &TimeWindow,
        sink: &mut dyn ResultSink,
    ) -> Result<ChunkReport, ClearingError> {
        info!(
            chunk = window.index,
            first = window.first,
            last = window.last,
            "clearing chunk"
        );
        let mut report = ChunkReport::new(*window);
        let mut state = StageState::DayAhead { window: *window };
        let mut cause = None;

        while let Some(stage) = state.stage() {
            match self.advance(state, &mut report, sink) {
                Ok(Some(next)) => state = next,
                Ok(None) => break,
                Err(err) if err.is_chunk_failure() => {
                    warn!(
                        chunk = window.index,
                        %stage,
                        error = %err,
                        "stage failed, skipping the rest of the chunk"
                    );
                    report.mark_failed(stage, err.to_string());
                    cause = Some(err);
                    break;
                }
                Err(err) => return Err(err),
            }
        }

        sink.finish_chunk(&report).map_err(persistence)?;
        if let Some(stage) = report.failed {
            if self.config.on_failure == FailurePolicy::Abort {
                if let Some(err) = cause {
                    return Err(err);
                }
                let status = report
                    .stages
                    .last()
                    .map(|s| s.status)
                    .unwrap_or(SolveStatus::Unknown);
                return Err(ClearingError::StageFailed {
                    chunk: window.index,
                    stage,
                    status,
                });
            }
        }
        Ok(report)
    }

    /// Solve and persist the stage `state` points at. Returns the next state,
    /// or `None` when the chunk ends early.
    fn advance(
        &self,
        state: StageState,
        report: &mut ChunkReport,
        sink: &mut dyn ResultSink,
    ) -> Result<Option<StageState>, ClearingError> {
        let next = match state {
            StageState::DayAhead { window } => {
                let output = self.day_ahead(window)?;
                if !self.record(&window, &output.results, report, sink)? {
                    return Ok(None);
                }
                let snapshot = solved_snapshot(output.snapshot, &window)?;
                self.after_day_ahead(window, snapshot, output.prices)
            }
            StageState::Prosumer {
                window,
                pricing,
                reference_prices,
                day_ahead,
            } => {
                let (results, schedule) =
                    self.prosumer(window, pricing, reference_prices.as_deref())?;
                if !self.record(&window, &results, report, sink)? {
                    return Ok(None);
                }
                let snapshot = DispatchSnapshot {
                    prosumer: schedule,
                    ..day_ahead
                };
                self.after_prosumer(window, snapshot)
            }
            StageState::Redispatch { window, snapshot } => {
                let output = self.redispatch(window, &snapshot)?;
                if !self.record(&window, &output.results, report, sink)? {
                    return Ok(None);
                }
                StageState::Done
            }
            StageState::Done => return Ok(None),
        };
        Ok(Some(next))
    }

    fn after_day_ahead(
        &self,
        window: TimeWindow,
        day_ahead: DispatchSnapshot,
        prices: Option<Vec<Vec<f64>>>,
    ) -> StageState {
        match self.config.setup.prosumer {
            Some(pricing) if !self.data.prosumers.is_empty() => StageState::Prosumer {
                window,
                pricing,
                reference_prices: prices,
                day_ahead,
            },
            _ => self.after_prosumer(window, day_ahead),
        }
    }

    fn after_prosumer(&self, window: TimeWindow, snapshot: DispatchSnapshot) -> StageState {
        if self.config.setup.redispatch.formulation().is_some() {
            StageState::Redispatch { window, snapshot }
        } else {
            StageState::Done
        }
    }

    fn network_model(&self) -> Result<&NetworkModel, ClearingError> {
        self.network.as_ref().ok_or_else(|| {
            ClearingError::Network(GridError::Config("network model was not built".into()))
        })
    }

    fn day_ahead_scope(&self) -> Result<Box<dyn SpatialScope + '_>, ClearingError> {
        Ok(match self.config.setup.scope {
            Scope::Zonal => {
                let scope = ZonalScope::new(self.data);
                match (&self.zonal, &self.network) {
                    (Some(zonal), Some(network)) => {
                        Box::new(scope.with_line_limits(&zonal.zone_to_zone, network))
                    }
                    _ => Box::new(scope),
                }
            }
            Scope::Nodal => Box::new(NodalScope::new(
                self.data,
                self.network_model()?,
                FlowFormulation::Ptdf,
            )),
        })
    }

    fn forecast_injection(&self) -> ProsumerInjection<'static> {
        if self.config.setup.prosumer.is_some() {
            ProsumerInjection::Forecast
        } else {
            ProsumerInjection::None
        }
    }

    fn day_ahead(&self, window: TimeWindow) -> Result<StageOutput, ClearingError> {
        let scope = self.day_ahead_scope()?;
        let stage = StageBuilder {
            data: self.data,
            window,
            scope: scope.as_ref(),
            supply: &DayAheadSupply,
            prosumer: self.forecast_injection(),
            penalty: self.penalty,
            continuity: self.config.storage_continuity,
        }
        .build()?;
        let solution = self.solve(&stage.model, StageKind::DayAhead, &window)?;
        Ok(stage.extract(self.data, &solution))
    }

    fn prosumer(
        &self,
        window: TimeWindow,
        pricing: RetailPricing,
        reference_prices: Option<&[Vec<f64>]>,
    ) -> Result<(StageResults, Option<ProsumerSchedule>), ClearingError> {
        // prices are indexed by the day-ahead balance units
        let scope = self.day_ahead_scope()?;
        let ctx = SupplyContext::new(
            self.data,
            window,
            self.config.storage_continuity,
            scope.as_ref(),
        );
        let units = self
            .data
            .prosumers
            .iter()
            .map(|p| ctx.unit_of(p.node, &format!("Prosumer {}", p.name)))
            .collect::<Result<Vec<_>, _>>()?;

        let stage = ProsumerStage {
            data: self.data,
            window,
            pricing,
            continuity: self.config.storage_continuity,
            units,
            reference_prices,
        }
        .build()?;
        let solution = self.solve(&stage.model, StageKind::Prosumer, &window)?;
        Ok(stage.extract(self.data, &solution))
    }

    fn redispatch(
        &self,
        window: TimeWindow,
        snapshot: &DispatchSnapshot,
    ) -> Result<StageOutput, ClearingError> {
        let formulation = self
            .config
            .setup
            .redispatch
            .formulation()
            .unwrap_or(FlowFormulation::Ptdf);
        let scope = NodalScope::new(self.data, self.network_model()?, formulation);
        let supply = RedispatchSupply {
            baseline: snapshot,
            redispatch_cost: self.config.costs.redispatch_cost,
        };
        let prosumer = match &snapshot.prosumer {
            Some(schedule) => ProsumerInjection::Scheduled(schedule),
            None => self.forecast_injection(),
        };
        let stage = StageBuilder {
            data: self.data,
            window,
            scope: &scope,
            supply: &supply,
            prosumer,
            penalty: self.penalty,
            continuity: self.config.storage_continuity,
        }
        .build()?;
        let solution = self.solve(&stage.model, StageKind::Redispatch, &window)?;
        Ok(stage.extract(self.data, &solution))
    }

    fn solve(
        &self,
        model: &LinearModel,
        stage: StageKind,
        window: &TimeWindow,
    ) -> Result<LpSolution, ClearingError> {
        debug!(
            %stage,
            chunk = window.index,
            vars = model.num_vars(),
            constraints = model.num_constraints(),
            "solving"
        );
        let solution = self
            .backend
            .solve(model, &self.config.solver)
            .map_err(|err| match err {
                ClearingError::Solver(_) => err,
                other => ClearingError::Solver(other.to_string()),
            })?;
        info!(
            %stage,
            chunk = window.index,
            status = %solution.status,
            objective = solution.objective,
            elapsed_ms = solution.solve_time.as_millis() as u64,
            "stage solved"
        );
        Ok(solution)
    }

    /// Persist a stage and add it to the report. Returns whether the chunk
    /// may continue.
    fn record(
        &self,
        window: &TimeWindow,
        results: &StageResults,
        report: &mut ChunkReport,
        sink: &mut dyn ResultSink,
    ) -> Result<bool, ClearingError> {
        sink.write_stage(window, results).map_err(persistence)?;
        report.stages.push(StageOutcome {
            stage: results.stage,
            status: results.status,
            objective: results.objective,
        });
        if results.status.is_success() {
            return Ok(true);
        }
        warn!(
            chunk = window.index,
            stage = %results.stage,
            status = %results.status,
            message = results.message.as_deref().unwrap_or(""),
            "stage did not reach optimality, skipping the rest of the chunk"
        );
        report.failed = Some(results.stage);
        Ok(false)
    }
}

fn persistence(err: anyhow::Error) -> ClearingError {
    ClearingError::Persistence(format!("{err:#}"))
}

fn solved_snapshot(
    snapshot: Option<DispatchSnapshot>,
    window: &TimeWindow,
) -> Result<DispatchSnapshot, ClearingError> {
    snapshot.ok_or_else(|| {
        ClearingError::Solver(format!(
            "chunk {}: optimal day-ahead solution carried no values",
            window.index
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::config::{MarketSetup, Redispatch, RetailPricing, TimeHorizon};
    use crate::market::results::MemorySink;
    use crate::market::solver::SolveStatus;
    use crate::test_utils::{
        prosumer_market, single_node_market, three_node_market, ScriptedBackend,
    };

    fn config(stop: usize, split: usize, setup: MarketSetup) -> ClearingConfig {
        ClearingConfig::new(TimeHorizon::new(1, stop, split), setup)
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let data = single_node_market(100.0, 80.0);
        let cfg = config(2, 0, MarketSetup::default());
        let backend = ScriptedBackend::optimal();
        assert!(matches!(
            ClearingOrchestrator::new(&data, &cfg, &backend),
            Err(ClearingError::Config(_))
        ));
    }

    #[test]
    fn test_day_ahead_only() {
        let data = single_node_market(100.0, 80.0);
        let cfg = config(2, 1, MarketSetup::default());
        let backend = ScriptedBackend::optimal();
        let orchestrator = ClearingOrchestrator::new(&data, &cfg, &backend).unwrap();
        assert!(orchestrator.network().is_none());

        let mut sink = MemorySink::new();
        let report = orchestrator.run(&mut sink).unwrap();
        assert!(sink.snapshot_written);
        assert_eq!(report.chunks.len(), 2);
        assert_eq!(sink.stages.len(), 2);
        assert_eq!(sink.reports.len(), 2);
        assert!(report.failed_chunks().is_empty());
        assert_eq!(backend.calls(), 2);
    }

    #[test]
    fn test_stage_sequence_with_prosumers_and_redispatch() {
        let data = prosumer_market();
        let setup = MarketSetup {
            redispatch: Redispatch::Ptdf,
            prosumer: Some(RetailPricing::Dynamic { markup: 0.0 }),
            ..MarketSetup::default()
        };
        let cfg = config(2, 2, setup);
        let backend = ScriptedBackend::optimal();
        let orchestrator = ClearingOrchestrator::new(&data, &cfg, &backend).unwrap();

        let mut sink = MemorySink::new();
        let window = orchestrator.chunks()[0];
        let report = orchestrator.run_chunk(&window, &mut sink).unwrap();
        let stages: Vec<StageKind> = report.stages.iter().map(|s| s.stage).collect();
        assert_eq!(
            stages,
            vec![StageKind::DayAhead, StageKind::Prosumer, StageKind::Redispatch]
        );
        assert!(sink.stage(0, StageKind::Prosumer).is_some());
    }

    #[test]
    fn test_failure_continues_with_next_chunk() {
        let data = three_node_market();
        let setup = MarketSetup {
            redispatch: Redispatch::Angles,
            ..MarketSetup::default()
        };
        let cfg = config(2, 1, setup);
        let backend = ScriptedBackend::new(vec![SolveStatus::Infeasible]);
        let orchestrator = ClearingOrchestrator::new(&data, &cfg, &backend).unwrap();

        let mut sink = MemorySink::new();
        let report = orchestrator.run(&mut sink).unwrap();
        assert_eq!(report.failed_chunks(), vec![0]);
        assert_eq!(report.chunks[0].stages.len(), 1);
        assert_eq!(report.chunks[1].stages.len(), 2);
        // the failed stage is still persisted
        let failed = sink.stage(0, StageKind::DayAhead).unwrap();
        assert_eq!(failed.status, SolveStatus::Infeasible);
        assert!(sink.stage(0, StageKind::Redispatch).is_none());
    }

    #[test]
    fn test_failure_aborts_when_configured() {
        let data = three_node_market();
        let mut cfg = config(2, 1, MarketSetup::default());
        cfg.on_failure = FailurePolicy::Abort;
        let backend = ScriptedBackend::new(vec![SolveStatus::Optimal, SolveStatus::Timeout]);
        let orchestrator = ClearingOrchestrator::new(&data, &cfg, &backend).unwrap();

        let mut sink = MemorySink::new();
        let err = orchestrator.run(&mut sink).unwrap_err();
        assert!(matches!(
            err,
            ClearingError::StageFailed {
                chunk: 1,
                stage: StageKind::DayAhead,
                status: SolveStatus::Timeout,
            }
        ));
        assert_eq!(sink.reports.len(), 2);
    }

    #[test]
    fn test_missing_prices_fail_only_their_chunk() {
        let data = prosumer_market();
        let setup = MarketSetup {
            prosumer: Some(RetailPricing::Dynamic { markup: 0.0 }),
            ..MarketSetup::default()
        };
        let cfg = config(2, 1, setup);
        let backend = ScriptedBackend::optimal().without_duals();
        let orchestrator = ClearingOrchestrator::new(&data, &cfg, &backend).unwrap();

        let mut sink = MemorySink::new();
        let report = orchestrator.run(&mut sink).unwrap();
        assert_eq!(report.failed_chunks(), vec![0, 1]);
        assert_eq!(backend.calls(), 2);
        assert_eq!(sink.reports.len(), 2);

        let first = &report.chunks[0];
        assert_eq!(first.failed, Some(StageKind::Prosumer));
        assert!(first.reason.as_deref().unwrap().contains("no balance prices"));
        let last = first.stages.last().unwrap();
        assert_eq!(
            (last.stage, last.status),
            (StageKind::Prosumer, SolveStatus::Error)
        );
        assert!(sink.stage(0, StageKind::DayAhead).is_some());
    }

    #[test]
    fn test_missing_prices_abort_with_their_error() {
        let data = prosumer_market();
        let setup = MarketSetup {
            prosumer: Some(RetailPricing::Dynamic { markup: 0.0 }),
            ..MarketSetup::default()
        };
        let mut cfg = config(2, 1, setup);
        cfg.on_failure = FailurePolicy::Abort;
        let backend = ScriptedBackend::optimal().without_duals();
        let orchestrator = ClearingOrchestrator::new(&data, &cfg, &backend).unwrap();

        let mut sink = MemorySink::new();
        assert!(matches!(
            orchestrator.run(&mut sink),
            Err(ClearingError::MissingPrices { chunk: 0 })
        ));
        assert_eq!(backend.calls(), 1);
        assert_eq!(sink.reports.len(), 1);
    }
}
