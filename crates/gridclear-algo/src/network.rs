//! Network model: validated topology plus the matrices derived from it.
//!
//! Built once per run from static grid data and shared read-only by every
//! chunk afterwards. Construction is gated on the topology report: any
//! validation error aborts with the full diagnostics attached, before a
//! single matrix is assembled.

use crate::sparse::{
    build_gsk, compute_ptdf, zonal_ptdf, zone_to_zone_ptdf, EmptyZonePolicy, PtdfMatrix,
    SensitivityError, SusceptanceError, SusceptanceMatrix, ZonalPtdf, ZoneToZonePtdf,
};
use crate::topology::{validate_topology, TopologyReport};
use gridclear_core::{Diagnostics, Grid, GridError, GridResult, NodeId, ZoneId};
use tracing::{info, warn};

impl From<SusceptanceError> for GridError {
    fn from(err: SusceptanceError) -> Self {
        GridError::Numerical(err.to_string())
    }
}

impl From<SensitivityError> for GridError {
    fn from(err: SensitivityError) -> Self {
        GridError::Numerical(err.to_string())
    }
}

/// A DC line resolved to node indices.
#[derive(Debug, Clone)]
pub struct DcTerminals {
    pub name: String,
    pub from_idx: usize,
    pub to_idx: usize,
    pub capacity_mw: f64,
}

/// Zonal sensitivities derived from the node-level PTDF.
#[derive(Debug, Clone)]
pub struct ZonalSensitivities {
    pub zonal: ZonalPtdf,
    pub zone_to_zone: ZoneToZonePtdf,
}

#[derive(Debug, Clone)]
pub struct NetworkModel {
    pub report: TopologyReport,
    /// Validation findings plus per-unit conversion warnings
    pub diagnostics: Diagnostics,
    pub susceptance: SusceptanceMatrix,
    pub ptdf: Option<PtdfMatrix>,
    pub dc_lines: Vec<DcTerminals>,
    pub slack: Vec<NodeId>,
    pub omitted: Vec<NodeId>,
    pub line_names: Vec<String>,
    pub line_capacity: Vec<f64>,
}

impl NetworkModel {
    /// Validate the topology and build the network matrices.
    ///
    /// With `with_ptdf` the node-level PTDF is computed as well; the
    /// angle-based flow formulation does without it.
    pub fn build(grid: &Grid, with_ptdf: bool) -> GridResult<Self> {
        let report = validate_topology(grid);
        if !report.safe_for_ptdf() {
            warn!(summary = %report.diagnostics.summary(), "topology validation failed");
            return Err(GridError::Topology(report.diagnostics));
        }

        let susceptance = SusceptanceMatrix::from_grid(grid)?;
        let mut diagnostics = report.diagnostics.clone();
        for id in susceptance.assumed_per_unit() {
            if let Some(line) = grid.ac_lines.iter().find(|l| l.id == *id) {
                diagnostics.add_warning_with_entity(
                    "per-unit",
                    "No voltage data; impedance taken as per-unit",
                    &format!("Line {}", line.name),
                );
            }
        }

        let slack = grid.slack_nodes();
        let omitted = report.nodes_to_omit_for_ptdf();
        let ptdf = if with_ptdf {
            Some(compute_ptdf(&susceptance, &slack, &omitted)?)
        } else {
            None
        };

        let index = grid.node_index();
        let dc_lines = grid
            .dc_lines
            .iter()
            .filter_map(|line| {
                Some(DcTerminals {
                    name: line.name.clone(),
                    from_idx: *index.get(&line.from_node)?,
                    to_idx: *index.get(&line.to_node)?,
                    capacity_mw: line.capacity_mw,
                })
            })
            .collect();

        info!(
            grid = %grid.stats(),
            omitted = omitted.len(),
            ptdf = with_ptdf,
            "network model built"
        );

        Ok(Self {
            report,
            diagnostics,
            susceptance,
            ptdf,
            dc_lines,
            slack,
            omitted,
            line_names: grid.ac_lines.iter().map(|l| l.name.clone()).collect(),
            line_capacity: grid.ac_lines.iter().map(|l| l.capacity_mw).collect(),
        })
    }

    pub fn n_nodes(&self) -> usize {
        self.susceptance.n_nodes()
    }

    pub fn n_lines(&self) -> usize {
        self.susceptance.n_lines()
    }

    pub fn is_omitted(&self, node_idx: usize) -> bool {
        self.susceptance
            .node_order()
            .get(node_idx)
            .is_some_and(|id| self.omitted.contains(id))
    }

    pub fn is_slack(&self, node_idx: usize) -> bool {
        self.susceptance
            .node_order()
            .get(node_idx)
            .is_some_and(|id| self.slack.contains(id))
    }

    /// Zonal and zone-to-zone PTDF for the given shift-key weights (one per node).
    pub fn zonal_sensitivities(
        &self,
        grid: &Grid,
        weights: &[f64],
        policy: EmptyZonePolicy,
    ) -> GridResult<ZonalSensitivities> {
        let ptdf = self
            .ptdf
            .as_ref()
            .ok_or_else(|| GridError::Config("zonal sensitivities need the PTDF".into()))?;
        let zone_order: Vec<ZoneId> = grid.zone_order();
        let node_zone: Vec<ZoneId> = grid.nodes.iter().map(|n| n.zone).collect();
        let gsk = build_gsk(&node_zone, weights, &zone_order, policy)?;
        let zonal = zonal_ptdf(ptdf, &gsk)?;
        let zone_to_zone = zone_to_zone_ptdf(&zonal, &zone_order, true)?;
        Ok(ZonalSensitivities {
            zonal,
            zone_to_zone,
        })
    }
}
