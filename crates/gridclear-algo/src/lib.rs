//! # gridclear-algo: Network Sensitivities and Market Clearing
//!
//! Turns static grid and market data into cleared dispatch and prices.
//!
//! ## Pipeline
//!
//! 1. [`topology::validate_topology`] checks the grid and decides which nodes
//!    the PTDF must leave out.
//! 2. [`network::NetworkModel`] assembles incidence and susceptance matrices
//!    and, when needed, the node PTDF plus zonal sensitivities.
//! 3. [`market::ClearingOrchestrator`] splits the horizon into chunks and runs
//!    day-ahead, prosumer and redispatch stages for each of them.
//!
//! ## Quick Start
//!
//! ```ignore
//! use gridclear_algo::market::{
//!     ClarabelBackend, ClearingConfig, ClearingOrchestrator, MemorySink,
//! };
//!
//! let config = ClearingConfig::from_toml_file(Path::new("clearing.toml"))?;
//! let backend = ClarabelBackend;
//! let orchestrator = ClearingOrchestrator::new(&data, &config, &backend)?;
//!
//! let mut sink = MemorySink::new();
//! let report = orchestrator.run(&mut sink)?;
//! println!("failed chunks: {:?}", report.failed_chunks());
//! ```
//!
//! ## Modules
//!
//! - [`sparse`] - Susceptance, PTDF, generation shift keys
//! - [`topology`] - Structural grid validation
//! - [`network`] - Network model shared by all chunks
//! - [`market`] - Stage models, solver backends, orchestration
//! - [`test_utils`] - Fixture markets and a scripted backend

pub mod market;
pub mod network;
pub mod sparse;
pub mod test_utils;
pub mod topology;

pub use market::{
    ClearingConfig, ClearingError, ClearingOrchestrator, LpBackend, MarketSetup, ResultSink,
    RunReport, StageKind, StageResults, TableKind,
};
pub use network::{NetworkModel, ZonalSensitivities};
pub use sparse::{compute_ptdf, PtdfMatrix, SusceptanceMatrix};
pub use topology::{validate_topology, TopologyReport};
