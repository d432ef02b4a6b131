//! Generation Shift Keys and zonal PTDF aggregation.
//!
//! A GSK matrix `G` (node × zone) distributes a zonal injection over the
//! zone's member nodes. Multiplying the node-level PTDF by `G` yields the
//! zonal PTDF, and differences of zonal columns give the sensitivity of every
//! line to an exchange between two zones.

use super::sensitivity::{PtdfMatrix, SensitivityError};
use gridclear_core::{LineId, ZoneId};
use serde::{Deserialize, Serialize};

/// What to do with a zone whose member weights sum to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmptyZonePolicy {
    /// Leave the column all-zero
    Zero,
    /// Split uniformly over the zone's members
    #[default]
    Flat,
}

/// Node × zone shift key matrix.
#[derive(Debug, Clone)]
pub struct GskMatrix {
    pub zone_ids: Vec<ZoneId>,
    /// `values[node_idx][zone_idx]`
    pub values: Vec<Vec<f64>>,
}

impl GskMatrix {
    pub fn column_sum(&self, zone_idx: usize) -> f64 {
        self.values.iter().map(|row| row[zone_idx]).sum()
    }

    pub fn num_nodes(&self) -> usize {
        self.values.len()
    }
}

/// Build the GSK from each node's zone and weight.
///
/// Column `z` sums to one over the nodes mapped to `z`; every other entry of
/// the column is exactly zero. Nodes whose zone is not in `zone_order` are
/// ignored.
pub fn build_gsk(
    node_zone: &[ZoneId],
    weights: &[f64],
    zone_order: &[ZoneId],
    policy: EmptyZonePolicy,
) -> Result<GskMatrix, SensitivityError> {
    if node_zone.len() != weights.len() {
        return Err(SensitivityError::ShapeMismatch {
            expected: format!("{} weights", node_zone.len()),
            found: format!("{} weights", weights.len()),
        });
    }

    let mut values = vec![vec![0.0; zone_order.len()]; node_zone.len()];
    for (z, zone) in zone_order.iter().enumerate() {
        let members: Vec<usize> = node_zone
            .iter()
            .enumerate()
            .filter(|(_, nz)| *nz == zone)
            .map(|(n, _)| n)
            .collect();
        let total: f64 = members.iter().map(|&n| weights[n]).sum();

        if total > 0.0 {
            for &n in &members {
                values[n][z] = weights[n] / total;
            }
        } else if policy == EmptyZonePolicy::Flat && !members.is_empty() {
            let share = 1.0 / members.len() as f64;
            for &n in &members {
                values[n][z] = share;
            }
        }
    }

    Ok(GskMatrix {
        zone_ids: zone_order.to_vec(),
        values,
    })
}

/// Line × zone sensitivity matrix.
#[derive(Debug, Clone)]
pub struct ZonalPtdf {
    pub line_ids: Vec<LineId>,
    pub zone_ids: Vec<ZoneId>,
    /// `values[line_idx][zone_idx]`
    pub values: Vec<Vec<f64>>,
}

impl ZonalPtdf {
    pub fn zone_index(&self, zone: ZoneId) -> Option<usize> {
        self.zone_ids.iter().position(|z| *z == zone)
    }
}

/// `PTDF · G`
pub fn zonal_ptdf(ptdf: &PtdfMatrix, gsk: &GskMatrix) -> Result<ZonalPtdf, SensitivityError> {
    if ptdf.num_nodes() != gsk.num_nodes() {
        return Err(SensitivityError::ShapeMismatch {
            expected: format!("GSK with {} nodes", ptdf.num_nodes()),
            found: format!("GSK with {} nodes", gsk.num_nodes()),
        });
    }

    let n_zones = gsk.zone_ids.len();
    let values = ptdf
        .values
        .iter()
        .map(|row| {
            (0..n_zones)
                .map(|z| {
                    row.iter()
                        .zip(&gsk.values)
                        .map(|(p, g)| p * g[z])
                        .sum()
                })
                .collect()
        })
        .collect();

    Ok(ZonalPtdf {
        line_ids: ptdf.line_ids.clone(),
        zone_ids: gsk.zone_ids.clone(),
        values,
    })
}

/// An ordered zone pair: power leaves `exporter` and arrives at `importer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ZonePair {
    pub exporter: ZoneId,
    pub importer: ZoneId,
}

/// Line × zone-pair sensitivity matrix.
#[derive(Debug, Clone)]
pub struct ZoneToZonePtdf {
    pub line_ids: Vec<LineId>,
    pub pairs: Vec<ZonePair>,
    /// `values[line_idx][pair_idx]`
    pub values: Vec<Vec<f64>>,
}

impl ZoneToZonePtdf {
    pub fn pair_index(&self, exporter: ZoneId, importer: ZoneId) -> Option<usize> {
        self.pairs
            .iter()
            .position(|p| p.exporter == exporter && p.importer == importer)
    }
}

/// Zone-to-zone PTDF, column `(exporter, importer)` = `PTDFz[:, importer] − PTDFz[:, exporter]`.
///
/// Pairs are importer-major: for each importer in `zone_order`, every exporter
/// in `zone_order`. With `exclude_self` the diagonal pairs are skipped.
pub fn zone_to_zone_ptdf(
    zonal: &ZonalPtdf,
    zone_order: &[ZoneId],
    exclude_self: bool,
) -> Result<ZoneToZonePtdf, SensitivityError> {
    let mut columns = Vec::new();
    let mut pairs = Vec::new();
    for &importer in zone_order {
        let imp = zonal
            .zone_index(importer)
            .ok_or(SensitivityError::UnknownZone(importer.value()))?;
        for &exporter in zone_order {
            if exclude_self && exporter == importer {
                continue;
            }
            let exp = zonal
                .zone_index(exporter)
                .ok_or(SensitivityError::UnknownZone(exporter.value()))?;
            pairs.push(ZonePair { exporter, importer });
            columns.push((exp, imp));
        }
    }

    let values = zonal
        .values
        .iter()
        .map(|row| columns.iter().map(|&(exp, imp)| row[imp] - row[exp]).collect())
        .collect();

    Ok(ZoneToZonePtdf {
        line_ids: zonal.line_ids.clone(),
        pairs,
        values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridclear_core::NodeId;

    fn zones() -> Vec<ZoneId> {
        vec![ZoneId::new(1), ZoneId::new(2)]
    }

    #[test]
    fn test_gsk_proportional_weights() {
        let node_zone = [ZoneId::new(1), ZoneId::new(1), ZoneId::new(2), ZoneId::new(2)];
        let gsk = build_gsk(
            &node_zone,
            &[10.0, 30.0, 50.0, 10.0],
            &zones(),
            EmptyZonePolicy::Flat,
        )
        .unwrap();
        let col = |z: usize| gsk.values.iter().map(|r| r[z]).collect::<Vec<_>>();
        let expected_1 = [0.25, 0.75, 0.0, 0.0];
        let expected_2 = [0.0, 0.0, 5.0 / 6.0, 1.0 / 6.0];
        for (got, want) in col(0).iter().zip(expected_1) {
            assert!((got - want).abs() < 1e-12);
        }
        for (got, want) in col(1).iter().zip(expected_2) {
            assert!((got - want).abs() < 1e-12);
        }
    }

    #[test]
    fn test_gsk_empty_zone_policies() {
        let node_zone = [ZoneId::new(1), ZoneId::new(2), ZoneId::new(2)];
        let weights = [5.0, 0.0, 0.0];

        let zero = build_gsk(&node_zone, &weights, &zones(), EmptyZonePolicy::Zero).unwrap();
        assert_eq!(zero.column_sum(1), 0.0);
        assert!((zero.column_sum(0) - 1.0).abs() < 1e-12);

        let flat = build_gsk(&node_zone, &weights, &zones(), EmptyZonePolicy::Flat).unwrap();
        assert!((flat.column_sum(1) - 1.0).abs() < 1e-12);
        assert_eq!(flat.values[1][1], 0.5);
        assert_eq!(flat.values[0][1], 0.0);
    }

    #[test]
    fn test_gsk_shape_mismatch() {
        let result = build_gsk(
            &[ZoneId::new(1)],
            &[1.0, 2.0],
            &zones(),
            EmptyZonePolicy::Flat,
        );
        assert!(matches!(result, Err(SensitivityError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_zonal_ptdf_is_matrix_product() {
        let ptdf = PtdfMatrix::new(
            vec![LineId::new(1), LineId::new(2)],
            vec![NodeId::new(1), NodeId::new(2), NodeId::new(3)],
            vec![vec![0.0, 0.5, -0.2], vec![0.0, -0.5, 0.8]],
        );
        let gsk = GskMatrix {
            zone_ids: zones(),
            values: vec![vec![1.0, 0.0], vec![0.0, 0.4], vec![0.0, 0.6]],
        };
        let z = zonal_ptdf(&ptdf, &gsk).unwrap();
        for l in 0..2 {
            for zi in 0..2 {
                let expected: f64 = (0..3).map(|n| ptdf.values[l][n] * gsk.values[n][zi]).sum();
                assert_eq!(z.values[l][zi], expected);
            }
        }
    }

    #[test]
    fn test_zone_to_zone_columns_and_order() {
        let zonal = ZonalPtdf {
            line_ids: vec![LineId::new(1)],
            zone_ids: vec![ZoneId::new(1), ZoneId::new(2), ZoneId::new(3)],
            values: vec![vec![0.1, 0.4, -0.3]],
        };
        let order = zonal.zone_ids.clone();
        let z2z = zone_to_zone_ptdf(&zonal, &order, true).unwrap();
        assert_eq!(z2z.pairs.len(), 6);
        assert!(z2z.pairs.iter().all(|p| p.exporter != p.importer));
        // importer-major ordering
        assert_eq!(
            z2z.pairs[0],
            ZonePair {
                exporter: ZoneId::new(2),
                importer: ZoneId::new(1)
            }
        );
        let idx = z2z.pair_index(ZoneId::new(1), ZoneId::new(2)).unwrap();
        assert!((z2z.values[0][idx] - (0.4 - 0.1)).abs() < 1e-12);

        let with_self = zone_to_zone_ptdf(&zonal, &order, false).unwrap();
        assert_eq!(with_self.pairs.len(), 9);
        let diag = with_self.pair_index(ZoneId::new(3), ZoneId::new(3)).unwrap();
        assert_eq!(with_self.values[0][diag], 0.0);
    }
}
