//! Incidence and nodal susceptance matrices for the DC power-flow network.
//!
//! Only AC lines take part. With the incidence `A` (line × node, −1 at the
//! start node and +1 at the end node) and `H = diag(b) · A`:
//! ```text
//! B = Hᵀ · A        (node × node)
//!
//!   B[i,j] = -b_ij        for i ≠ j
//!   B[i,i] = Σ_k b_ik
//! ```
//! `B` is accumulated directly from per-line triplets, which yields the same
//! entries as the product without materialising `H`.

use gridclear_core::{AcLine, Grid, LineId, NodeId, BASE_MVA};
use sprs::{CsMat, CsMatView, TriMat};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Errors from susceptance matrix assembly
#[derive(Debug, Error)]
pub enum SusceptanceError {
    #[error("No nodes found in grid")]
    NoNodes,

    #[error("Line {0} has zero reactance")]
    ZeroReactance(String),

    #[error("Line {line} references unknown node {node}")]
    UnknownNode { line: String, node: usize },
}

/// Where a line's per-unit susceptance came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SusceptanceSource {
    /// Explicit `susceptance_pu` override
    Override,
    /// Precomputed `reactance_pu` / `resistance_pu`
    PerUnit,
    /// Converted from ohms with the line (or start node) voltage
    Converted,
    /// No voltage data; raw values taken as per-unit
    AssumedPerUnit,
}

/// Per-unit series susceptance of a line, `b = x / (x² + r²)`.
///
/// Without explicit per-unit data the impedance is converted with
/// `zbase = (kV · 1e3)² / (BASE_MVA · 1e6)` and divided by the circuit count.
pub fn line_susceptance(
    line: &AcLine,
    from_voltage_kv: Option<f64>,
) -> Result<(f64, SusceptanceSource), SusceptanceError> {
    if let Some(b) = line.susceptance_pu {
        return Ok((b, SusceptanceSource::Override));
    }

    let circuits = f64::from(line.circuits.max(1));
    let (r, x, source) = match (line.reactance_pu, line.voltage_kv.or(from_voltage_kv)) {
        (Some(x_pu), _) => (
            line.resistance_pu.unwrap_or(0.0),
            x_pu,
            SusceptanceSource::PerUnit,
        ),
        (None, Some(kv)) if kv > 0.0 => {
            let zbase = (kv * 1e3).powi(2) / (BASE_MVA * 1e6);
            (
                line.resistance / zbase / circuits,
                line.reactance / zbase / circuits,
                SusceptanceSource::Converted,
            )
        }
        _ => (
            line.resistance,
            line.reactance,
            SusceptanceSource::AssumedPerUnit,
        ),
    };

    let denom = x * x + r * r;
    if x.abs() < 1e-12 || denom == 0.0 {
        return Err(SusceptanceError::ZeroReactance(line.name.clone()));
    }
    Ok((x / denom, source))
}

/// Terminal indices and susceptance of one AC line.
#[derive(Debug, Clone, Copy)]
pub struct LineTerminals {
    pub from_idx: usize,
    pub to_idx: usize,
    pub susceptance: f64,
}

/// Sparse incidence and nodal susceptance matrices in CSR format.
#[derive(Debug, Clone)]
pub struct SusceptanceMatrix {
    /// Nodal susceptance B (node × node)
    matrix: CsMat<f64>,
    /// Incidence A (line × node)
    incidence: CsMat<f64>,
    node_order: Vec<NodeId>,
    node_to_idx: HashMap<NodeId, usize>,
    line_ids: Vec<LineId>,
    terminals: Vec<LineTerminals>,
    /// Lines whose raw values were taken as per-unit
    assumed_per_unit: Vec<LineId>,
}

impl SusceptanceMatrix {
    /// Build incidence and susceptance matrices. Node order follows `grid.nodes`,
    /// line order follows `grid.ac_lines`.
    pub fn from_grid(grid: &Grid) -> Result<Self, SusceptanceError> {
        let n = grid.nodes.len();
        if n == 0 {
            return Err(SusceptanceError::NoNodes);
        }
        let node_order: Vec<NodeId> = grid.nodes.iter().map(|node| node.id).collect();
        let node_to_idx = grid.node_index();

        let n_lines = grid.ac_lines.len();
        let mut b_triplets = TriMat::new((n, n));
        let mut a_triplets = TriMat::new((n_lines, n));
        let mut terminals = Vec::with_capacity(n_lines);
        let mut assumed_per_unit = Vec::new();

        for (l, line) in grid.ac_lines.iter().enumerate() {
            let lookup = |node: NodeId| {
                node_to_idx
                    .get(&node)
                    .copied()
                    .ok_or_else(|| SusceptanceError::UnknownNode {
                        line: line.name.clone(),
                        node: node.value(),
                    })
            };
            let i = lookup(line.from_node)?;
            let j = lookup(line.to_node)?;

            let (b, source) = line_susceptance(line, grid.nodes[i].voltage_kv)?;
            if source == SusceptanceSource::AssumedPerUnit {
                assumed_per_unit.push(line.id);
            }

            a_triplets.add_triplet(l, i, -1.0);
            a_triplets.add_triplet(l, j, 1.0);

            // Off-diagonal: B[i,j] = B[j,i] = -b
            b_triplets.add_triplet(i, j, -b);
            b_triplets.add_triplet(j, i, -b);
            b_triplets.add_triplet(i, i, b);
            b_triplets.add_triplet(j, j, b);

            terminals.push(LineTerminals {
                from_idx: i,
                to_idx: j,
                susceptance: b,
            });
        }

        Ok(Self {
            matrix: b_triplets.to_csr(),
            incidence: a_triplets.to_csr(),
            node_order,
            node_to_idx,
            line_ids: grid.ac_lines.iter().map(|l| l.id).collect(),
            terminals,
            assumed_per_unit,
        })
    }

    pub fn view(&self) -> CsMatView<'_, f64> {
        self.matrix.view()
    }

    /// Element B[i,j] by matrix indices.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.matrix.get(i, j).copied().unwrap_or(0.0)
    }

    /// Incidence entry A[l,n].
    pub fn incidence(&self, line_idx: usize, node_idx: usize) -> f64 {
        self.incidence.get(line_idx, node_idx).copied().unwrap_or(0.0)
    }

    /// Entry of `H = diag(b) · A`.
    pub fn h(&self, line_idx: usize, node_idx: usize) -> f64 {
        self.terminals
            .get(line_idx)
            .map(|t| t.susceptance * self.incidence(line_idx, node_idx))
            .unwrap_or(0.0)
    }

    pub fn n_nodes(&self) -> usize {
        self.node_order.len()
    }

    pub fn n_lines(&self) -> usize {
        self.line_ids.len()
    }

    pub fn nnz(&self) -> usize {
        self.matrix.nnz()
    }

    pub fn node_order(&self) -> &[NodeId] {
        &self.node_order
    }

    pub fn node_index(&self, id: NodeId) -> Option<usize> {
        self.node_to_idx.get(&id).copied()
    }

    pub fn line_ids(&self) -> &[LineId] {
        &self.line_ids
    }

    pub fn terminals(&self) -> &[LineTerminals] {
        &self.terminals
    }

    pub fn assumed_per_unit(&self) -> &[LineId] {
        &self.assumed_per_unit
    }

    /// Build the reduced matrix with the given node indices removed.
    ///
    /// Returns `(reduced_matrix, kept)` where `kept[r]` is the full index of
    /// reduced row/column `r`.
    pub fn reduced_matrix(&self, removed: &HashSet<usize>) -> (CsMat<f64>, Vec<usize>) {
        let n = self.n_nodes();
        let kept: Vec<usize> = (0..n).filter(|idx| !removed.contains(idx)).collect();
        let idx_map: HashMap<usize, usize> = kept
            .iter()
            .enumerate()
            .map(|(new_idx, &old_idx)| (old_idx, new_idx))
            .collect();

        let m = kept.len();
        let mut triplets = TriMat::new((m, m));
        for (new_i, &i) in kept.iter().enumerate() {
            if let Some(row) = self.matrix.outer_view(i) {
                for (j, &val) in row.iter() {
                    if let Some(&new_j) = idx_map.get(&j) {
                        triplets.add_triplet(new_i, new_j, val);
                    }
                }
            }
        }

        (triplets.to_csr(), kept)
    }
}
