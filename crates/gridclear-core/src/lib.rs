//! # gridclear-core: Market Clearing Data Model
//!
//! Provides the data structures shared by every stage of the clearing pipeline.
//!
//! ## Design
//!
//! The transmission grid is a set of **nodes** connected by **AC lines** (part of
//! the phase-angle network) and **DC lines** (controllable links that take part
//! in nodal balance only). Nodes are grouped into **zones** through their zone
//! attribute. Market participants (plants, storages, loads, prosumers) sit on
//! nodes; zonal quantities are always aggregated from nodal ones.
//!
//! Every element has a typed ID (newtype wrapper around `usize`) so node IDs
//! cannot be confused with line IDs, plus a human-readable `name` used as the
//! entity label in result tables.
//!
//! Time is discrete: periods are 1-based (`t = 1..=T`) and every profile is
//! indexed by `t - 1`.
//!
//! ## Quick Start
//!
//! ```rust
//! use gridclear_core::*;
//!
//! let mut grid = Grid::new();
//! grid.zones.push(Zone::new(ZoneId::new(1), "DE"));
//! grid.nodes.push(Node::new(NodeId::new(1), "n1", ZoneId::new(1)).as_slack());
//! grid.nodes.push(Node::new(NodeId::new(2), "n2", ZoneId::new(1)));
//! grid.ac_lines.push(AcLine::new(
//!     LineId::new(1),
//!     "l12",
//!     NodeId::new(1),
//!     NodeId::new(2),
//!     0.01,
//!     0.1,
//! ).with_capacity(400.0));
//!
//! assert_eq!(grid.slack_nodes(), vec![NodeId::new(1)]);
//! ```
//!
//! ## Modules
//!
//! - [`diagnostics`] - Note/warning/error reporting
//! - [`graph_utils`] - Island labeling over the line adjacency graph
//! - [`market`] - Plants, storages, loads, exchanges and prosumers

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod diagnostics;
pub mod error;
pub mod graph_utils;
pub mod market;

pub use diagnostics::{DiagnosticIssue, Diagnostics, Severity};
pub use error::{GridError, GridResult};
pub use graph_utils::{find_islands, Island, IslandAnalysis};
pub use market::{
    ExchangeSchedule, Load, MarketData, Ntc, Plant, PlantKind, Prosumer, ProsumerBattery,
    Storage,
};

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(usize);

        impl $name {
            #[inline]
            pub fn new(value: usize) -> Self {
                $name(value)
            }
            #[inline]
            pub fn value(&self) -> usize {
                self.0
            }
        }
    };
}

id_type!(NodeId);
id_type!(LineId);
id_type!(DcLineId);
id_type!(ZoneId);
id_type!(PlantId);
id_type!(StorageId);
id_type!(LoadId);
id_type!(ProsumerId);

/// Base power for per-unit conversion (MVA)
pub const BASE_MVA: f64 = 500.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub zone: ZoneId,
    /// Reference bus for the phase-angle network
    #[serde(default)]
    pub is_slack: bool,
    /// Nominal voltage in kV, used when lines carry no per-unit data
    #[serde(default)]
    pub voltage_kv: Option<f64>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
}

impl Node {
    pub fn new(id: NodeId, name: impl Into<String>, zone: ZoneId) -> Self {
        Self {
            id,
            name: name.into(),
            zone,
            is_slack: false,
            voltage_kv: None,
            lat: None,
            lon: None,
        }
    }

    pub fn as_slack(mut self) -> Self {
        self.is_slack = true;
        self
    }

    pub fn with_voltage(mut self, kv: f64) -> Self {
        self.voltage_kv = Some(kv);
        self
    }
}

/// AC transmission line, part of the phase-angle network used for PTDF.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcLine {
    pub id: LineId,
    pub name: String,
    pub from_node: NodeId,
    pub to_node: NodeId,
    /// Series resistance (ohm, or per-unit when no voltage data exists)
    pub resistance: f64,
    /// Series reactance (ohm, or per-unit when no voltage data exists)
    pub reactance: f64,
    /// Precomputed per-unit resistance, takes precedence over `resistance`
    #[serde(default)]
    pub resistance_pu: Option<f64>,
    /// Precomputed per-unit reactance, takes precedence over `reactance`
    #[serde(default)]
    pub reactance_pu: Option<f64>,
    /// Explicit susceptance override, skips the r/x computation entirely
    #[serde(default)]
    pub susceptance_pu: Option<f64>,
    #[serde(default)]
    pub voltage_kv: Option<f64>,
    /// Thermal capacity (MW). Unlimited lines serialize as `null`.
    #[serde(default = "unbounded", deserialize_with = "null_as_unbounded")]
    pub capacity_mw: f64,
    #[serde(default = "default_circuits")]
    pub circuits: u32,
}

fn default_circuits() -> u32 {
    1
}

fn unbounded() -> f64 {
    f64::INFINITY
}

fn null_as_unbounded<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value: Option<f64> = Option::deserialize(deserializer)?;
    Ok(value.unwrap_or(f64::INFINITY))
}

impl AcLine {
    pub fn new(
        id: LineId,
        name: impl Into<String>,
        from_node: NodeId,
        to_node: NodeId,
        resistance: f64,
        reactance: f64,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            from_node,
            to_node,
            resistance,
            reactance,
            resistance_pu: None,
            reactance_pu: None,
            susceptance_pu: None,
            voltage_kv: None,
            capacity_mw: f64::INFINITY,
            circuits: 1,
        }
    }

    pub fn with_capacity(mut self, capacity_mw: f64) -> Self {
        self.capacity_mw = capacity_mw;
        self
    }

    pub fn with_circuits(mut self, circuits: u32) -> Self {
        self.circuits = circuits;
        self
    }

    pub fn with_voltage(mut self, kv: f64) -> Self {
        self.voltage_kv = Some(kv);
        self
    }

    pub fn with_susceptance(mut self, b_pu: f64) -> Self {
        self.susceptance_pu = Some(b_pu);
        self
    }
}

/// Controllable DC link. Takes part in nodal balance, never in the angle network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DcLine {
    pub id: DcLineId,
    pub name: String,
    pub from_node: NodeId,
    pub to_node: NodeId,
    pub capacity_mw: f64,
}

impl DcLine {
    pub fn new(
        id: DcLineId,
        name: impl Into<String>,
        from_node: NodeId,
        to_node: NodeId,
        capacity_mw: f64,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            from_node,
            to_node,
            capacity_mw,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub id: ZoneId,
    pub name: String,
}

impl Zone {
    pub fn new(id: ZoneId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// Static transmission topology. Rebuilt into matrices once per run, never mutated mid-run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Grid {
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub ac_lines: Vec<AcLine>,
    #[serde(default)]
    pub dc_lines: Vec<DcLine>,
    #[serde(default)]
    pub zones: Vec<Zone>,
}

impl Grid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Position of each node in `nodes`, which is also its matrix column.
    pub fn node_index(&self) -> HashMap<NodeId, usize> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| (node.id, idx))
            .collect()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn slack_nodes(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.is_slack)
            .map(|n| n.id)
            .collect()
    }

    /// Zones in declaration order. Zones referenced by nodes but never declared
    /// are appended in order of first appearance.
    pub fn zone_order(&self) -> Vec<ZoneId> {
        let mut order: Vec<ZoneId> = self.zones.iter().map(|z| z.id).collect();
        for node in &self.nodes {
            if !order.contains(&node.zone) {
                order.push(node.zone);
            }
        }
        order
    }

    pub fn zone_name(&self, id: ZoneId) -> String {
        self.zones
            .iter()
            .find(|z| z.id == id)
            .map(|z| z.name.clone())
            .unwrap_or_else(|| format!("zone{}", id.value()))
    }

    pub fn node_name(&self, id: NodeId) -> String {
        self.node(id)
            .map(|n| n.name.clone())
            .unwrap_or_else(|| format!("node{}", id.value()))
    }

    pub fn nodes_in_zone(&self, zone: ZoneId) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|n| n.zone == zone)
            .map(|n| n.id)
            .collect()
    }

    pub fn stats(&self) -> GridStats {
        GridStats {
            num_nodes: self.nodes.len(),
            num_ac_lines: self.ac_lines.len(),
            num_dc_lines: self.dc_lines.len(),
            num_zones: self.zone_order().len(),
            num_slack: self.nodes.iter().filter(|n| n.is_slack).count(),
        }
    }
}

/// Statistics about a grid's size
#[derive(Debug, Clone, Default)]
pub struct GridStats {
    pub num_nodes: usize,
    pub num_ac_lines: usize,
    pub num_dc_lines: usize,
    pub num_zones: usize,
    pub num_slack: usize,
}

impl std::fmt::Display for GridStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} nodes ({} slack), {} AC lines, {} DC lines, {} zones",
            self.num_nodes, self.num_slack, self.num_ac_lines, self.num_dc_lines, self.num_zones
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_zone_grid() -> Grid {
        let mut grid = Grid::new();
        grid.zones.push(Zone::new(ZoneId::new(1), "north"));
        grid.zones.push(Zone::new(ZoneId::new(2), "south"));
        grid.nodes
            .push(Node::new(NodeId::new(1), "n1", ZoneId::new(1)).as_slack());
        grid.nodes.push(Node::new(NodeId::new(2), "n2", ZoneId::new(1)));
        grid.nodes.push(Node::new(NodeId::new(3), "n3", ZoneId::new(2)));
        grid
    }

    #[test]
    fn test_node_index_follows_declaration_order() {
        let grid = two_zone_grid();
        let index = grid.node_index();
        assert_eq!(index[&NodeId::new(1)], 0);
        assert_eq!(index[&NodeId::new(3)], 2);
    }

    #[test]
    fn test_zone_order_appends_undeclared_zones() {
        let mut grid = two_zone_grid();
        grid.nodes.push(Node::new(NodeId::new(4), "n4", ZoneId::new(7)));
        assert_eq!(
            grid.zone_order(),
            vec![ZoneId::new(1), ZoneId::new(2), ZoneId::new(7)]
        );
        assert_eq!(grid.zone_name(ZoneId::new(7)), "zone7");
    }

    #[test]
    fn test_nodes_in_zone() {
        let grid = two_zone_grid();
        assert_eq!(
            grid.nodes_in_zone(ZoneId::new(1)),
            vec![NodeId::new(1), NodeId::new(2)]
        );
        assert!(grid.nodes_in_zone(ZoneId::new(9)).is_empty());
    }

    #[test]
    fn test_grid_stats() {
        let mut grid = two_zone_grid();
        grid.ac_lines.push(AcLine::new(
            LineId::new(1),
            "l12",
            NodeId::new(1),
            NodeId::new(2),
            0.0,
            0.1,
        ));
        grid.dc_lines.push(DcLine::new(
            DcLineId::new(1),
            "dc23",
            NodeId::new(2),
            NodeId::new(3),
            100.0,
        ));
        let stats = grid.stats();
        assert_eq!(stats.num_nodes, 3);
        assert_eq!(stats.num_slack, 1);
        assert_eq!(stats.num_zones, 2);
        assert!(stats.to_string().contains("1 DC lines"));
    }

    #[test]
    fn test_line_defaults() {
        let line = AcLine::new(
            LineId::new(1),
            "l",
            NodeId::new(1),
            NodeId::new(2),
            0.0,
            0.1,
        );
        assert_eq!(line.circuits, 1);
        assert!(line.capacity_mw.is_infinite());
        assert!(line.susceptance_pu.is_none());
    }
}
