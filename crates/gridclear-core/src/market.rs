//! Market participants and exchange data.
//!
//! Every participant is attached to a node. Profiles are per-period vectors
//! indexed by `t - 1`; values past the end of a profile read as zero, which is
//! why clearing configuration validates the horizon against
//! [`MarketData::horizon_len`] before any model is built.

use crate::{Grid, LoadId, NodeId, PlantId, ProsumerId, StorageId, ZoneId};
use serde::{Deserialize, Serialize};

/// Profile lookup for a 1-based period.
pub fn profile_value(profile: &[f64], t: usize) -> f64 {
    t.checked_sub(1)
        .and_then(|idx| profile.get(idx))
        .copied()
        .unwrap_or(0.0)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlantKind {
    /// Freely dispatchable between zero and capacity
    Dispatchable,
    /// Non-dispatchable feed-in; `availability` is a per-period capacity factor in [0, 1].
    /// Any available energy not absorbed is curtailed.
    Renewable { availability: Vec<f64> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plant {
    pub id: PlantId,
    pub name: String,
    pub node: NodeId,
    pub capacity_mw: f64,
    /// Marginal generation cost (currency per MWh)
    pub marginal_cost: f64,
    pub kind: PlantKind,
}

impl Plant {
    pub fn dispatchable(
        id: PlantId,
        name: impl Into<String>,
        node: NodeId,
        capacity_mw: f64,
        marginal_cost: f64,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            node,
            capacity_mw,
            marginal_cost,
            kind: PlantKind::Dispatchable,
        }
    }

    pub fn renewable(
        id: PlantId,
        name: impl Into<String>,
        node: NodeId,
        capacity_mw: f64,
        availability: Vec<f64>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            node,
            capacity_mw,
            marginal_cost: 0.0,
            kind: PlantKind::Renewable { availability },
        }
    }

    pub fn with_cost(mut self, marginal_cost: f64) -> Self {
        self.marginal_cost = marginal_cost;
        self
    }

    pub fn is_dispatchable(&self) -> bool {
        matches!(self.kind, PlantKind::Dispatchable)
    }

    /// Available output in period `t` (MW)
    pub fn available_mw(&self, t: usize) -> f64 {
        match &self.kind {
            PlantKind::Dispatchable => self.capacity_mw,
            PlantKind::Renewable { availability } => {
                self.capacity_mw * profile_value(availability, t).clamp(0.0, 1.0)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Storage {
    pub id: StorageId,
    pub name: String,
    pub node: NodeId,
    /// Symmetric charge/discharge power limit (MW)
    pub power_mw: f64,
    pub energy_mwh: f64,
    #[serde(default = "unit_efficiency")]
    pub charge_efficiency: f64,
    #[serde(default = "unit_efficiency")]
    pub discharge_efficiency: f64,
    /// Reference level for the first period under the initial-level continuity policy
    #[serde(default)]
    pub initial_level_mwh: f64,
    #[serde(default)]
    pub marginal_cost: f64,
}

fn unit_efficiency() -> f64 {
    1.0
}

impl Storage {
    pub fn new(
        id: StorageId,
        name: impl Into<String>,
        node: NodeId,
        power_mw: f64,
        energy_mwh: f64,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            node,
            power_mw,
            energy_mwh,
            charge_efficiency: 1.0,
            discharge_efficiency: 1.0,
            initial_level_mwh: 0.0,
            marginal_cost: 0.0,
        }
    }

    pub fn with_efficiency(mut self, charge: f64, discharge: f64) -> Self {
        self.charge_efficiency = charge;
        self.discharge_efficiency = discharge;
        self
    }

    pub fn with_initial_level(mut self, level_mwh: f64) -> Self {
        self.initial_level_mwh = level_mwh;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Load {
    pub id: LoadId,
    pub name: String,
    pub node: NodeId,
    pub profile_mw: Vec<f64>,
}

impl Load {
    pub fn new(id: LoadId, name: impl Into<String>, node: NodeId, profile_mw: Vec<f64>) -> Self {
        Self {
            id,
            name: name.into(),
            node,
            profile_mw,
        }
    }
}

/// Net transfer capacity from one zone to another (directional).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ntc {
    pub from_zone: ZoneId,
    pub to_zone: ZoneId,
    pub capacity_mw: f64,
}

/// Fixed exchange with a zone, e.g. with a neighbouring market outside the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeSchedule {
    pub from_zone: ZoneId,
    pub to_zone: ZoneId,
    pub profile_mw: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProsumerBattery {
    pub power_mw: f64,
    pub energy_mwh: f64,
    #[serde(default = "unit_efficiency")]
    pub efficiency: f64,
}

/// Behind-the-meter PV, demand and an optional battery at one connection point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prosumer {
    pub id: ProsumerId,
    pub name: String,
    pub node: NodeId,
    pub pv_mw: Vec<f64>,
    pub demand_mw: Vec<f64>,
    #[serde(default)]
    pub battery: Option<ProsumerBattery>,
}

impl Prosumer {
    /// Net injection before any battery optimisation (PV minus demand)
    pub fn forecast_injection(&self, t: usize) -> f64 {
        profile_value(&self.pv_mw, t) - profile_value(&self.demand_mw, t)
    }
}

/// Complete static input for a clearing run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketData {
    pub grid: Grid,
    #[serde(default)]
    pub plants: Vec<Plant>,
    #[serde(default)]
    pub storages: Vec<Storage>,
    #[serde(default)]
    pub loads: Vec<Load>,
    #[serde(default)]
    pub ntcs: Vec<Ntc>,
    #[serde(default)]
    pub schedules: Vec<ExchangeSchedule>,
    #[serde(default)]
    pub prosumers: Vec<Prosumer>,
}

impl MarketData {
    pub fn new(grid: Grid) -> Self {
        Self {
            grid,
            ..Self::default()
        }
    }

    /// Number of periods covered by every time series in the data.
    ///
    /// Returns `None` when there is no time series at all.
    pub fn horizon_len(&self) -> Option<usize> {
        let plant_profiles = self.plants.iter().filter_map(|p| match &p.kind {
            PlantKind::Renewable { availability } => Some(availability.len()),
            PlantKind::Dispatchable => None,
        });
        let prosumer_profiles = self
            .prosumers
            .iter()
            .flat_map(|p| [p.pv_mw.len(), p.demand_mw.len()]);

        self.loads
            .iter()
            .map(|l| l.profile_mw.len())
            .chain(self.schedules.iter().map(|s| s.profile_mw.len()))
            .chain(plant_profiles)
            .chain(prosumer_profiles)
            .min()
    }

    /// Total demand at a node in period `t` (MW)
    pub fn demand_at(&self, node: NodeId, t: usize) -> f64 {
        self.loads
            .iter()
            .filter(|l| l.node == node)
            .map(|l| profile_value(&l.profile_mw, t))
            .sum()
    }

    /// Highest marginal cost among plants and storages, used to scale slack penalties.
    pub fn max_marginal_cost(&self) -> f64 {
        self.plants
            .iter()
            .map(|p| p.marginal_cost)
            .chain(self.storages.iter().map(|s| s.marginal_cost))
            .fold(0.0, f64::max)
    }

    /// Capacity installed per node, the default generation shift key weight.
    pub fn capacity_by_node(&self) -> Vec<f64> {
        let index = self.grid.node_index();
        let mut weights = vec![0.0; self.grid.nodes.len()];
        for plant in &self.plants {
            if let Some(&idx) = index.get(&plant.node) {
                weights[idx] += plant.capacity_mw;
            }
        }
        weights
    }
}
