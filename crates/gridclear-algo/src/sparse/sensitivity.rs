//! Node-level Power Transfer Distribution Factors.
//!
//! PTDF[ℓ,n] = sensitivity of the flow on line ℓ to a net injection at node n:
//! ```text
//! ΔP_ℓ = PTDF[ℓ,n] × ΔP_injection_n
//!
//! PTDF = H · B⁻¹        with B⁻¹ embedded back to full size
//! ```
//! The reduced system drops every slack node and every omitted node
//! (isolated or DC-only). Their PTDF columns are exactly zero.

use super::susceptance::{SusceptanceError, SusceptanceMatrix};
use gridclear_core::{LineId, NodeId};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::debug;

/// Pivots below this magnitude mark the reduced matrix as singular.
const PIVOT_TOLERANCE: f64 = 1e-12;

/// Errors from sensitivity matrix operations
#[derive(Debug, Error)]
pub enum SensitivityError {
    #[error("Susceptance matrix error: {0}")]
    Susceptance(#[from] SusceptanceError),

    #[error("No slack node declared; the angle reference is undefined")]
    NoSlack,

    #[error("Reduced susceptance matrix ({size}×{size}) is singular")]
    Singular { size: usize },

    #[error("Shape mismatch: expected {expected}, found {found}")]
    ShapeMismatch { expected: String, found: String },

    #[error("Unknown node {0}")]
    UnknownNode(usize),

    #[error("Unknown zone {0}")]
    UnknownZone(usize),
}

/// PTDF matrix: sensitivity of AC line flows to node injections.
///
/// Dense storage is used because PTDF matrices are typically dense
/// (every line is affected by injection at every node to some degree).
#[derive(Debug, Clone)]
pub struct PtdfMatrix {
    /// Row index → line ID
    pub line_ids: Vec<LineId>,
    /// Column index → node ID
    pub node_ids: Vec<NodeId>,
    /// PTDF values: ptdf[line_idx][node_idx]
    pub values: Vec<Vec<f64>>,
    line_to_idx: HashMap<LineId, usize>,
    node_to_idx: HashMap<NodeId, usize>,
}

impl PtdfMatrix {
    pub fn new(line_ids: Vec<LineId>, node_ids: Vec<NodeId>, values: Vec<Vec<f64>>) -> Self {
        let line_to_idx = line_ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        let node_to_idx = node_ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        Self {
            line_ids,
            node_ids,
            values,
            line_to_idx,
            node_to_idx,
        }
    }

    /// PTDF for line ℓ with respect to injection at node n.
    pub fn get(&self, line_id: LineId, node_id: NodeId) -> Option<f64> {
        let line_idx = self.line_to_idx.get(&line_id)?;
        let node_idx = self.node_to_idx.get(&node_id)?;
        Some(self.values[*line_idx][*node_idx])
    }

    pub fn get_by_idx(&self, line_idx: usize, node_idx: usize) -> f64 {
        self.values
            .get(line_idx)
            .and_then(|row| row.get(node_idx))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn num_lines(&self) -> usize {
        self.line_ids.len()
    }

    pub fn num_nodes(&self) -> usize {
        self.node_ids.len()
    }

    pub fn line_index(&self, id: LineId) -> Option<usize> {
        self.line_to_idx.get(&id).copied()
    }

    pub fn node_index(&self, id: NodeId) -> Option<usize> {
        self.node_to_idx.get(&id).copied()
    }

    /// Line flows for a vector of node net injections (MW).
    pub fn flows(&self, injections: &[f64]) -> Vec<f64> {
        self.values
            .iter()
            .map(|row| row.iter().zip(injections).map(|(p, inj)| p * inj).sum())
            .collect()
    }
}

/// Compute the node-level PTDF.
///
/// Algorithm:
/// 1. Remove slack and omitted nodes from B
/// 2. Compute X = (B_reduced)⁻¹ via LU factorization, embedded to full size
/// 3. For each line ℓ from node i to j:
///    PTDF[ℓ,n] = b_ℓ · (X[j,n] − X[i,n])
pub fn compute_ptdf(
    susceptance: &SusceptanceMatrix,
    slack: &[NodeId],
    omit: &[NodeId],
) -> Result<PtdfMatrix, SensitivityError> {
    if slack.is_empty() {
        return Err(SensitivityError::NoSlack);
    }
    let n_nodes = susceptance.n_nodes();

    let mut removed = HashSet::new();
    for id in slack.iter().chain(omit) {
        let idx = susceptance
            .node_index(*id)
            .ok_or(SensitivityError::UnknownNode(id.value()))?;
        removed.insert(idx);
    }

    let (reduced, kept) = susceptance.reduced_matrix(&removed);
    debug!(
        nodes = n_nodes,
        reduced = kept.len(),
        removed = removed.len(),
        "inverting reduced susceptance matrix"
    );

    let mut dense = vec![vec![0.0; kept.len()]; kept.len()];
    for (val, (i, j)) in reduced.iter() {
        dense[i][j] = *val;
    }
    let x_inv = embed_inverse(&lu_inverse(&dense)?, &kept, n_nodes);

    let values = susceptance
        .terminals()
        .iter()
        .map(|t| {
            (0..n_nodes)
                .map(|n| t.susceptance * (x_inv[t.to_idx][n] - x_inv[t.from_idx][n]))
                .collect()
        })
        .collect();

    Ok(PtdfMatrix::new(
        susceptance.line_ids().to_vec(),
        susceptance.node_order().to_vec(),
        values,
    ))
}

/// Extend a reduced inverse back to full size. Removed rows/columns stay zero.
fn embed_inverse(inv_reduced: &[Vec<f64>], kept: &[usize], full_size: usize) -> Vec<Vec<f64>> {
    let mut x = vec![vec![0.0; full_size]; full_size];
    for (ri, &fi) in kept.iter().enumerate() {
        for (rj, &fj) in kept.iter().enumerate() {
            x[fi][fj] = inv_reduced[ri][rj];
        }
    }
    x
}

/// LU decomposition-based matrix inverse with partial pivoting.
///
/// An empty matrix inverts to an empty matrix; a pivot below
/// [`PIVOT_TOLERANCE`] is reported as [`SensitivityError::Singular`].
pub fn lu_inverse(a: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, SensitivityError> {
    let n = a.len();
    if n == 0 {
        return Ok(vec![]);
    }

    let mut lu: Vec<Vec<f64>> = a.to_vec();
    let mut perm: Vec<usize> = (0..n).collect();

    for k in 0..n {
        let mut max_val = lu[k][k].abs();
        let mut max_row = k;
        for (i, row) in lu.iter().enumerate().skip(k + 1) {
            if row[k].abs() > max_val {
                max_val = row[k].abs();
                max_row = i;
            }
        }

        if !max_val.is_finite() || max_val < PIVOT_TOLERANCE {
            return Err(SensitivityError::Singular { size: n });
        }

        if max_row != k {
            lu.swap(k, max_row);
            perm.swap(k, max_row);
        }

        for i in (k + 1)..n {
            lu[i][k] /= lu[k][k];
            for j in (k + 1)..n {
                lu[i][j] -= lu[i][k] * lu[k][j];
            }
        }
    }

    let mut inv = vec![vec![0.0; n]; n];
    for col in 0..n {
        // P·A = L·U, so solve L·U·x = P·e_col
        let mut y = vec![0.0; n];
        for i in 0..n {
            y[i] = if perm[i] == col { 1.0 } else { 0.0 };
            for j in 0..i {
                y[i] -= lu[i][j] * y[j];
            }
        }

        let mut x = vec![0.0; n];
        for i in (0..n).rev() {
            x[i] = y[i];
            for j in (i + 1)..n {
                x[i] -= lu[i][j] * x[j];
            }
            x[i] /= lu[i][i];
        }

        for i in 0..n {
            inv[i][col] = x[i];
        }
    }

    Ok(inv)
}
