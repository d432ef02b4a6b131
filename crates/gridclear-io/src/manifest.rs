//! Snapshot manifest with schema version tracking.
//!
//! Every snapshot directory holds a `manifest.json` next to `data.json`. The
//! schema version decides how a snapshot is loaded:
//!
//! | Manifest version | Action |
//! |------------------|--------|
//! | missing | migrate, every filled field reported |
//! | older than current | migrate |
//! | same major, same or newer minor | load as-is |
//! | newer major | reject |

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use gridclear_core::MarketData;
use semver::Version;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Current snapshot schema version (semver)
pub const CURRENT_SCHEMA_VERSION: &str = "1.1.0";

pub const MANIFEST_FILE: &str = "manifest.json";

/// Number of elements of each kind, for quick inspection without loading the data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementCounts {
    pub nodes: usize,
    pub ac_lines: usize,
    pub dc_lines: usize,
    pub zones: usize,
    pub plants: usize,
    pub storages: usize,
    pub loads: usize,
    pub ntcs: usize,
    pub schedules: usize,
    pub prosumers: usize,
}

impl ElementCounts {
    pub fn of(data: &MarketData) -> Self {
        Self {
            nodes: data.grid.nodes.len(),
            ac_lines: data.grid.ac_lines.len(),
            dc_lines: data.grid.dc_lines.len(),
            zones: data.grid.zones.len(),
            plants: data.plants.len(),
            storages: data.storages.len(),
            loads: data.loads.len(),
            ntcs: data.ntcs.len(),
            schedules: data.schedules.len(),
            prosumers: data.prosumers.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub schema_version: String,
    pub created_at: DateTime<Utc>,
    /// gridclear version that wrote the snapshot
    pub gridclear_version: String,
    pub counts: ElementCounts,
}

impl SnapshotManifest {
    pub fn new(data: &MarketData) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION.to_string(),
            created_at: Utc::now(),
            gridclear_version: env!("CARGO_PKG_VERSION").to_string(),
            counts: ElementCounts::of(data),
        }
    }

    pub fn version(&self) -> Result<Version> {
        Version::parse(&self.schema_version)
            .map_err(|e| anyhow!("Invalid schema version in manifest: {}", e))
    }

    /// Reject snapshots written by a newer major schema.
    pub fn is_compatible(&self) -> Result<()> {
        let manifest_version = self.version()?;
        let current_version = Version::parse(CURRENT_SCHEMA_VERSION)?;
        if manifest_version.major > current_version.major {
            bail!(
                "Snapshot schema v{} is too new (this version supports up to v{})",
                self.schema_version,
                CURRENT_SCHEMA_VERSION
            );
        }
        Ok(())
    }

    /// Whether the data predates the current schema and needs default filling.
    pub fn needs_migration(&self) -> Result<bool> {
        Ok(self.version()? < Version::parse(CURRENT_SCHEMA_VERSION)?)
    }
}

pub fn write_manifest(dir: &Path, manifest: &SnapshotManifest) -> Result<()> {
    let path = dir.join(MANIFEST_FILE);
    let json = serde_json::to_string_pretty(manifest).context("serializing snapshot manifest")?;
    fs::write(&path, json).with_context(|| format!("writing manifest '{}'", path.display()))
}

/// Read `manifest.json` from `dir`, `None` when the snapshot has none.
pub fn read_manifest(dir: &Path) -> Result<Option<SnapshotManifest>> {
    let path = dir.join(MANIFEST_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let text = fs::read_to_string(&path)
        .with_context(|| format!("reading manifest '{}'", path.display()))?;
    let manifest = serde_json::from_str(&text)
        .with_context(|| format!("parsing manifest '{}'", path.display()))?;
    Ok(Some(manifest))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(version: &str) -> SnapshotManifest {
        SnapshotManifest {
            schema_version: version.to_string(),
            ..SnapshotManifest::new(&MarketData::default())
        }
    }

    #[test]
    fn test_manifest_creation() {
        let m = SnapshotManifest::new(&MarketData::default());
        assert_eq!(m.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(m.gridclear_version, env!("CARGO_PKG_VERSION"));
        assert_eq!(m.counts, ElementCounts::default());
    }

    #[test]
    fn test_version_policy() {
        assert!(manifest("1.0.0").is_compatible().is_ok());
        assert!(manifest("1.0.0").needs_migration().unwrap());
        assert!(!manifest("1.1.0").needs_migration().unwrap());
        assert!(!manifest("1.4.0").needs_migration().unwrap());
        assert!(manifest("1.4.0").is_compatible().is_ok());

        let err = manifest("2.0.0").is_compatible().unwrap_err();
        assert!(err.to_string().contains("too new"));
        assert!(manifest("not-a-version").is_compatible().is_err());
    }
}
