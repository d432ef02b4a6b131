//! # Multi-Stage Market Clearing
//!
//! Each horizon chunk is cleared in up to three stages:
//!
//! ```text
//! DayAhead(T) ──► Prosumer(T, prices) ──► Redispatch(T, day-ahead snapshot)
//!                  (if enabled)             (if enabled)
//! ```
//!
//! Every stage is one linear program assembled from independent parts:
//!
//! - a [`scope::SpatialScope`] (zonal or nodal) that decides the spatial units
//!   of the balance and adds the network to the model,
//! - a [`supply::SupplyModel`] (day-ahead dispatch or redispatch deviations)
//!   that adds generation and storage,
//! - an optional prosumer injection,
//!
//! tied together by one balance row per spatial unit and period
//! ([`balance::compose_balance`]). Adding a scope or stage variant never
//! touches the balance equation itself.
//!
//! ## Modules
//!
//! - [`config`]: Horizon, market setup, cost parameters, TOML loading
//! - [`lp`]: Solver-neutral linear model
//! - [`solver`]: Backend trait, Clarabel backend through `good_lp`
//! - [`scope`], [`supply`], [`balance`], [`stage`]: Model composition
//! - [`prosumer`]: Retail-price optimisation of behind-the-meter batteries
//! - [`results`]: Result tables, dispatch snapshots, result sinks
//! - [`orchestrator`]: Stage state machine and chunk loop

pub mod balance;
pub mod config;
pub mod lp;
pub mod orchestrator;
pub mod prosumer;
pub mod results;
pub mod scope;
pub mod solver;
pub mod stage;
pub mod supply;

pub use config::{
    ClearingConfig, CostParameters, FailurePolicy, FlowFormulation, GskConfig, GskWeights,
    MarketSetup, Redispatch, RetailPricing, Scope, StorageContinuity, TimeHorizon, TimeWindow,
};
pub use orchestrator::{ChunkReport, ClearingOrchestrator, RunReport, StageState};
pub use results::{
    DispatchSnapshot, MemorySink, ProsumerSchedule, ResultRow, ResultSink, ResultTable,
    StageKind, StageOutcome, StageResults, TableKind,
};
#[cfg(feature = "solver-clarabel")]
pub use solver::ClarabelBackend;
pub use solver::{LpBackend, LpSolution, SolveStatus, SolverSettings};

use gridclear_core::{Diagnostics, GridError};
use thiserror::Error;

/// Errors raised while configuring or running the clearing.
///
/// Non-optimal solver outcomes are not errors by themselves; they only become
/// [`ClearingError::StageFailed`] under [`FailurePolicy::Abort`].
#[derive(Debug, Error)]
pub enum ClearingError {
    /// Configuration checks failed. The full report is attached.
    #[error("Invalid configuration: {}", .0.summary())]
    Config(Diagnostics),

    #[error("Could not parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Topology or matrix failure while building the network model
    #[error(transparent)]
    Network(#[from] GridError),

    #[error("Solver failure: {0}")]
    Solver(String),

    #[error("Chunk {chunk}: day-ahead stage produced no balance prices")]
    MissingPrices { chunk: usize },

    #[error("Chunk {chunk}: {stage} stage ended with status {status}")]
    StageFailed {
        chunk: usize,
        stage: StageKind,
        status: SolveStatus,
    },

    #[error("Persisting results failed: {0}")]
    Persistence(String),
}

impl ClearingError {
    /// Failures confined to one chunk's solve, as opposed to defects in the
    /// data or configuration that every chunk would hit.
    pub fn is_chunk_failure(&self) -> bool {
        matches!(
            self,
            ClearingError::Solver(_) | ClearingError::MissingPrices { .. }
        )
    }
}

impl From<ClearingError> for GridError {
    fn from(err: ClearingError) -> Self {
        match err {
            ClearingError::Network(inner) => inner,
            ClearingError::Config(diag) => GridError::Config(diag.to_string()),
            ClearingError::Parse(inner) => GridError::Parse(inner.to_string()),
            ClearingError::Solver(msg) => GridError::Solver(msg),
            other @ ClearingError::StageFailed { .. } => GridError::Solver(other.to_string()),
            other => GridError::Other(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clearing_error_conversion() {
        let mut diag = Diagnostics::new();
        diag.add_error("config", "split must be positive");
        let err: GridError = ClearingError::Config(diag).into();
        assert!(matches!(err, GridError::Config(_)));
        assert!(err.to_string().contains("split must be positive"));

        let err: GridError = ClearingError::StageFailed {
            chunk: 2,
            stage: StageKind::Redispatch,
            status: SolveStatus::Infeasible,
        }
        .into();
        assert!(matches!(err, GridError::Solver(_)));
        assert!(err.to_string().contains("redispatch"));
    }
}
