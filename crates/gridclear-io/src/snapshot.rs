//! JSON snapshots of the complete market input.
//!
//! A snapshot directory holds `data.json` (the serialized [`MarketData`]) and
//! `manifest.json`. Snapshots written before the current schema are migrated
//! on load: fields introduced since then are filled with their defaults and
//! every filled field is reported as a `migration` note, so nothing changes
//! silently.

use crate::manifest::{read_manifest, write_manifest, ElementCounts, SnapshotManifest};
use anyhow::{bail, Context, Result};
use gridclear_core::{Diagnostics, MarketData};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

pub const DATA_FILE: &str = "data.json";

/// Market data loaded from disk, with everything noticed on the way.
#[derive(Debug)]
pub struct LoadedSnapshot {
    pub data: MarketData,
    pub manifest: Option<SnapshotManifest>,
    pub diagnostics: Diagnostics,
}

pub struct DataSnapshot;

impl DataSnapshot {
    /// Write `data.json` and `manifest.json` into `dir`, creating it if needed.
    pub fn write(dir: &Path, data: &MarketData) -> Result<SnapshotManifest> {
        fs::create_dir_all(dir)
            .with_context(|| format!("creating snapshot directory '{}'", dir.display()))?;
        let path = dir.join(DATA_FILE);
        let json = serde_json::to_string_pretty(data).context("serializing market data")?;
        fs::write(&path, json).with_context(|| format!("writing '{}'", path.display()))?;

        let manifest = SnapshotManifest::new(data);
        write_manifest(dir, &manifest)?;
        info!(dir = %dir.display(), version = %manifest.schema_version, "snapshot written");
        Ok(manifest)
    }

    pub fn load(dir: &Path) -> Result<LoadedSnapshot> {
        let manifest = read_manifest(dir)?;
        let path = dir.join(DATA_FILE);
        let text =
            fs::read_to_string(&path).with_context(|| format!("reading '{}'", path.display()))?;
        let mut value: Value = serde_json::from_str(&text)
            .with_context(|| format!("parsing '{}'", path.display()))?;

        let mut diagnostics = Diagnostics::new();
        let migrate = match &manifest {
            Some(m) => {
                m.is_compatible()?;
                m.needs_migration()?
            }
            None => {
                diagnostics.add_note(
                    "migration",
                    "Snapshot has no manifest; treating it as a legacy snapshot",
                );
                true
            }
        };
        if migrate {
            migrate_market_value(&mut value, &mut diagnostics)?;
        }

        let data: MarketData = serde_json::from_value(value)
            .with_context(|| format!("decoding market data in '{}'", path.display()))?;

        if let Some(m) = &manifest {
            if m.counts != ElementCounts::of(&data) {
                diagnostics.add_warning(
                    "migration",
                    "Element counts differ from the manifest; the data file was edited after it was written",
                );
            }
        }
        if diagnostics.has_issues() {
            warn!(
                dir = %dir.display(),
                summary = %diagnostics.summary(),
                "snapshot loaded with findings"
            );
        }
        Ok(LoadedSnapshot {
            data,
            manifest,
            diagnostics,
        })
    }
}

/// Load market data from a snapshot directory or a bare JSON file.
///
/// Bare files carry no manifest, so they always pass through migration.
pub fn load_market_data(path: &Path) -> Result<LoadedSnapshot> {
    if path.is_dir() {
        return DataSnapshot::load(path);
    }
    let text = fs::read_to_string(path).with_context(|| format!("reading '{}'", path.display()))?;
    let mut value: Value =
        serde_json::from_str(&text).with_context(|| format!("parsing '{}'", path.display()))?;
    let mut diagnostics = Diagnostics::new();
    migrate_market_value(&mut value, &mut diagnostics)?;
    let data = serde_json::from_value(value)
        .with_context(|| format!("decoding market data in '{}'", path.display()))?;
    Ok(LoadedSnapshot {
        data,
        manifest: None,
        diagnostics,
    })
}

fn fill(
    obj: &mut Map<String, Value>,
    field: &str,
    default: Value,
    entity: &str,
    diag: &mut Diagnostics,
) {
    if obj.contains_key(field) {
        return;
    }
    diag.add_note_with_entity(
        "migration",
        &format!("Filled missing '{field}' with {default}"),
        entity,
    );
    obj.insert(field.to_string(), default);
}

fn entity_label(kind: &str, obj: &Map<String, Value>) -> String {
    match obj.get("name").and_then(Value::as_str) {
        Some(name) => format!("{kind} {name}"),
        None => kind.to_string(),
    }
}

fn for_each_object(
    parent: &mut Map<String, Value>,
    field: &str,
    mut f: impl FnMut(&mut Map<String, Value>),
) {
    if let Some(Value::Array(items)) = parent.get_mut(field) {
        for item in items.iter_mut() {
            if let Value::Object(obj) = item {
                f(obj);
            }
        }
    }
}

/// Fill fields added since the first schema with their defaults.
pub fn migrate_market_value(value: &mut Value, diag: &mut Diagnostics) -> Result<()> {
    let Value::Object(root) = value else {
        bail!("market data must be a JSON object");
    };

    for field in ["plants", "storages", "loads", "ntcs", "schedules", "prosumers"] {
        fill(root, field, Value::Array(Vec::new()), "MarketData", diag);
    }

    match root.get_mut("grid") {
        Some(Value::Object(grid)) => {
            for field in ["ac_lines", "dc_lines", "zones"] {
                fill(grid, field, Value::Array(Vec::new()), "Grid", diag);
            }
            for_each_object(grid, "nodes", |node| {
                let entity = entity_label("Node", node);
                fill(node, "is_slack", Value::Bool(false), &entity, diag);
            });
            for_each_object(grid, "ac_lines", |line| {
                let entity = entity_label("Line", line);
                fill(line, "circuits", Value::from(1), &entity, diag);
                fill(line, "capacity_mw", Value::Null, &entity, diag);
            });
        }
        Some(_) => bail!("'grid' must be a JSON object"),
        None => bail!("market data has no 'grid'"),
    }

    for_each_object(root, "storages", |storage| {
        let entity = entity_label("Storage", storage);
        fill(
            storage,
            "charge_efficiency",
            Value::from(1.0),
            &entity,
            diag,
        );
        fill(
            storage,
            "discharge_efficiency",
            Value::from(1.0),
            &entity,
            diag,
        );
        fill(
            storage,
            "initial_level_mwh",
            Value::from(0.0),
            &entity,
            diag,
        );
        fill(storage, "marginal_cost", Value::from(0.0), &entity, diag);
    });
    for_each_object(root, "prosumers", |prosumer| {
        let entity = entity_label("Prosumer", prosumer);
        fill(prosumer, "battery", Value::Null, &entity, diag);
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_migration_fills_and_reports() {
        let mut value = json!({
            "grid": {
                "nodes": [{"id": 1, "name": "n1", "zone": 1}],
                "ac_lines": [{
                    "id": 1, "name": "l12", "from_node": 1, "to_node": 2,
                    "resistance": 0.0, "reactance": 0.1
                }]
            },
            "loads": []
        });
        let mut diag = Diagnostics::new();
        migrate_market_value(&mut value, &mut diag).unwrap();

        assert_eq!(value["grid"]["nodes"][0]["is_slack"], json!(false));
        assert_eq!(value["grid"]["ac_lines"][0]["circuits"], json!(1));
        assert_eq!(value["prosumers"], json!([]));
        assert!(diag.notes().all(|n| n.category == "migration"));
        assert!(diag
            .notes()
            .any(|n| n.entity.as_deref() == Some("Line l12") && n.message.contains("circuits")));
        // loads was present and is not reported
        assert!(!diag.notes().any(|n| n.message.contains("'loads'")));
        assert!(!diag.has_errors());
    }

    #[test]
    fn test_migration_rejects_non_objects() {
        let mut diag = Diagnostics::new();
        assert!(migrate_market_value(&mut json!([1, 2]), &mut diag).is_err());
        assert!(migrate_market_value(&mut json!({"plants": []}), &mut diag).is_err());
    }

    #[test]
    fn test_complete_data_needs_no_notes() {
        let data = MarketData::default();
        let mut value = serde_json::to_value(&data).unwrap();
        let mut diag = Diagnostics::new();
        migrate_market_value(&mut value, &mut diag).unwrap();
        assert!(!diag.has_issues());
    }
}
