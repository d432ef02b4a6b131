//! Parallel execution of clearing chunks.
//!
//! Chunks of the horizon are independent once the network model is built,
//! so [`run_parallel`] fans them out over a Rayon pool. [`run_batch`] adds
//! the CSV result directory and a run manifest around it.

pub mod manifest;
pub mod runner;

use anyhow::{anyhow, Context, Result};
use tracing_subscriber::EnvFilter;

pub use manifest::{load_run_manifest, write_run_manifest, RunManifest, RUN_MANIFEST_FILE};
pub use runner::{run_batch, run_parallel, BatchRunnerConfig, BatchSummary};

/// Install a fmt subscriber on stderr filtered by `RUST_LOG`, or by
/// `default_level` when `RUST_LOG` is unset.
pub fn init_tracing(default_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .with_context(|| format!("invalid log filter '{default_level}'"))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| anyhow!("installing tracing subscriber: {err}"))
}
