//! # Network Matrices for DC Power Flow
//!
//! Transmission grids are sparse, so the incidence and nodal susceptance
//! matrices are assembled as CSR matrices. The PTDF itself is dense (every
//! line reacts to injections everywhere) and is stored row-major.
//!
//! ## Module Organization
//!
//! - [`susceptance`]: Incidence matrix and nodal susceptance B
//! - [`sensitivity`]: Node-level PTDF via slack-reduced dense inversion
//! - [`gsk`]: Generation shift keys, zonal and zone-to-zone PTDF
//!
//! ## Usage
//!
//! ```ignore
//! use gridclear_algo::sparse::{compute_ptdf, SusceptanceMatrix};
//!
//! let b = SusceptanceMatrix::from_grid(&grid)?;
//! let ptdf = compute_ptdf(&b, &grid.slack_nodes(), &omitted)?;
//! println!("PTDF[l12, n2] = {:?}", ptdf.get(line_id, node_id));
//! ```

pub mod gsk;
pub mod sensitivity;
pub mod susceptance;

pub use gsk::{
    build_gsk, zonal_ptdf, zone_to_zone_ptdf, EmptyZonePolicy, GskMatrix, ZonalPtdf, ZonePair,
    ZoneToZonePtdf,
};
pub use sensitivity::{compute_ptdf, lu_inverse, PtdfMatrix, SensitivityError};
pub use susceptance::{
    line_susceptance, LineTerminals, SusceptanceError, SusceptanceMatrix, SusceptanceSource,
};
