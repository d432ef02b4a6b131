use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use gridclear_algo::market::{ChunkReport, TimeHorizon};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const RUN_MANIFEST_FILE: &str = "run_manifest.json";

#[derive(Debug, Serialize, Deserialize)]
pub struct RunManifest {
    pub created_at: DateTime<Utc>,
    pub gridclear_version: String,
    pub horizon: TimeHorizon,
    pub threads: usize,
    pub num_chunks: usize,
    pub success: usize,
    pub failure: usize,
    pub chunks: Vec<ChunkReport>,
}

pub fn write_run_manifest(path: &Path, manifest: &RunManifest) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating manifest directory '{}'", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(manifest).context("serializing run manifest to JSON")?;
    fs::write(path, json).with_context(|| format!("writing run manifest '{}'", path.display()))?;
    Ok(())
}

pub fn load_run_manifest(path: &Path) -> Result<RunManifest> {
    let file = fs::File::open(path)
        .with_context(|| format!("opening run manifest '{}'", path.display()))?;
    serde_json::from_reader(file)
        .with_context(|| format!("parsing run manifest '{}'", path.display()))
}
