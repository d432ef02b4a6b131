//! Clearing configuration.
//!
//! A [`ClearingConfig`] is built once, validated against the market data with
//! [`ClearingConfig::validate`], and then shared read-only by every chunk.
//! Every field except the horizon has a default, so a minimal TOML file only
//! needs a `[horizon]` table.

use super::solver::SolverSettings;
use super::ClearingError;
use crate::sparse::EmptyZonePolicy;
use anyhow::{Context, Result};
use gridclear_core::{Diagnostics, MarketData};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Spatial resolution of the day-ahead balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// One balance per zone, exchanges limited by NTCs
    #[default]
    Zonal,
    /// One balance per node, DC power flow over the AC network
    Nodal,
}

/// How line flows are expressed in a nodal model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowFormulation {
    /// flow = PTDF · net input
    Ptdf,
    /// flow = b · (θ_end − θ_start), slack angles fixed to zero
    Angles,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Redispatch {
    #[default]
    Off,
    Ptdf,
    Angles,
}

impl Redispatch {
    pub fn formulation(&self) -> Option<FlowFormulation> {
        match self {
            Redispatch::Off => None,
            Redispatch::Ptdf => Some(FlowFormulation::Ptdf),
            Redispatch::Angles => Some(FlowFormulation::Angles),
        }
    }
}

/// Retail prices prosumers optimise against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum RetailPricing {
    /// Import at the day-ahead price plus `markup`, feed in at the day-ahead price
    Dynamic {
        #[serde(default)]
        markup: f64,
    },
    /// Constant tariffs
    Fixed {
        import_tariff: f64,
        feed_in_tariff: f64,
    },
}

impl RetailPricing {
    /// `(import price, feed-in price)` for a given wholesale price
    pub fn tariffs(&self, wholesale: f64) -> (f64, f64) {
        match *self {
            RetailPricing::Dynamic { markup } => (wholesale + markup, wholesale),
            RetailPricing::Fixed {
                import_tariff,
                feed_in_tariff,
            } => (import_tariff, feed_in_tariff),
        }
    }

    pub fn needs_prices(&self) -> bool {
        matches!(self, RetailPricing::Dynamic { .. })
    }
}

/// Scope × redispatch × prosumer participation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketSetup {
    pub scope: Scope,
    pub redispatch: Redispatch,
    /// `None` leaves prosumers out of the clearing entirely
    pub prosumer: Option<RetailPricing>,
    /// Bound AC line flows in the zonal day-ahead stage via zone-to-zone PTDF
    pub zonal_line_limits: bool,
}

impl MarketSetup {
    pub fn needs_network(&self) -> bool {
        self.scope == Scope::Nodal || self.redispatch != Redispatch::Off || self.zonal_line_limits
    }

    pub fn needs_ptdf(&self) -> bool {
        self.scope == Scope::Nodal
            || self.redispatch == Redispatch::Ptdf
            || self.zonal_line_limits
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostParameters {
    /// Slack penalty = factor × max(highest marginal cost, 1)
    pub penalty_factor: f64,
    /// Premium per MWh on every redispatch deviation, up or down
    pub redispatch_cost: f64,
}

impl Default for CostParameters {
    fn default() -> Self {
        Self {
            penalty_factor: 1000.0,
            redispatch_cost: 1.0,
        }
    }
}

impl CostParameters {
    pub fn penalty(&self, max_marginal_cost: f64) -> f64 {
        self.penalty_factor * max_marginal_cost.max(1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GskWeights {
    /// Installed plant capacity per node
    #[default]
    Capacity,
    Flat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GskConfig {
    pub weights: GskWeights,
    pub normalize_empty: EmptyZonePolicy,
}

impl GskConfig {
    /// Per-node shift key weights in `grid.nodes` order.
    pub fn node_weights(&self, data: &MarketData) -> Vec<f64> {
        match self.weights {
            GskWeights::Capacity => data.capacity_by_node(),
            GskWeights::Flat => vec![1.0; data.grid.nodes.len()],
        }
    }
}

/// Storage level the first period of a chunk refers back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StorageContinuity {
    /// The chunk's own last period (cyclic)
    #[default]
    Wrap,
    /// The storage's configured initial level
    InitialLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Record the failed chunk and move on
    #[default]
    Continue,
    Abort,
}

/// A contiguous range of 1-based periods, `first..=last`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Position of the chunk in the horizon, starting at 0
    pub index: usize,
    pub first: usize,
    pub last: usize,
}

impl TimeWindow {
    pub fn len(&self) -> usize {
        self.last + 1 - self.first
    }

    pub fn is_empty(&self) -> bool {
        self.last < self.first
    }

    /// Absolute period of the `k`-th step in the window
    pub fn period(&self, k: usize) -> usize {
        self.first + k
    }

    pub fn periods(&self) -> impl Iterator<Item = usize> {
        self.first..=self.last
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeHorizon {
    pub start: usize,
    pub stop: usize,
    /// Periods per chunk
    pub split: usize,
    /// Periods skipped after `start` before the first chunk begins
    #[serde(default)]
    pub offset: usize,
}

impl TimeHorizon {
    pub fn new(start: usize, stop: usize, split: usize) -> Self {
        Self {
            start,
            stop,
            split,
            offset: 0,
        }
    }

    /// Partition `[start + offset, stop]` into chunks of `split` periods. The
    /// last chunk is truncated at `stop`.
    pub fn chunks(&self) -> Vec<TimeWindow> {
        if self.split == 0 {
            return Vec::new();
        }
        let mut chunks = Vec::new();
        let mut first = self.start + self.offset;
        while first <= self.stop {
            let last = (first + self.split - 1).min(self.stop);
            chunks.push(TimeWindow {
                index: chunks.len(),
                first,
                last,
            });
            first = last + 1;
        }
        chunks
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearingConfig {
    pub horizon: TimeHorizon,
    #[serde(default)]
    pub setup: MarketSetup,
    #[serde(default)]
    pub costs: CostParameters,
    #[serde(default)]
    pub gsk: GskConfig,
    #[serde(default)]
    pub solver: SolverSettings,
    #[serde(default)]
    pub storage_continuity: StorageContinuity,
    #[serde(default)]
    pub on_failure: FailurePolicy,
    /// Worker threads for parallel chunk runs, 0 = one per CPU
    #[serde(default)]
    pub threads: usize,
}

impl ClearingConfig {
    pub fn new(horizon: TimeHorizon, setup: MarketSetup) -> Self {
        Self {
            horizon,
            setup,
            costs: CostParameters::default(),
            gsk: GskConfig::default(),
            solver: SolverSettings::default(),
            storage_continuity: StorageContinuity::default(),
            on_failure: FailurePolicy::default(),
            threads: 0,
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ClearingError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading clearing config '{}'", path.display()))?;
        Self::from_toml_str(&text)
            .with_context(|| format!("parsing clearing config '{}'", path.display()))
    }

    /// Check the configuration against the data before anything is built.
    ///
    /// All findings are collected; the caller decides what to do with them.
    pub fn validate(&self, data: &MarketData) -> Diagnostics {
        let mut diag = Diagnostics::new();
        let h = &self.horizon;

        if h.split == 0 {
            diag.add_error("config", "Horizon split must be at least one period");
        }
        if h.start == 0 {
            diag.add_error("config", "Periods are 1-based; start must be at least 1");
        }
        if h.start > h.stop {
            diag.add_error(
                "config",
                &format!("Horizon start {} lies after stop {}", h.start, h.stop),
            );
        } else if h.start + h.offset > h.stop {
            diag.add_error(
                "config",
                &format!("Offset {} skips the whole horizon", h.offset),
            );
        }
        if let Some(len) = data.horizon_len() {
            if h.stop > len {
                diag.add_error(
                    "config",
                    &format!(
                        "Horizon stop {} exceeds the {len} periods of the input profiles",
                        h.stop
                    ),
                );
            }
        }

        if self.costs.penalty_factor <= 0.0 || !self.costs.penalty_factor.is_finite() {
            diag.add_error("config", "Penalty factor must be positive and finite");
        }
        if self.costs.redispatch_cost < 0.0 {
            diag.add_error("config", "Redispatch cost must not be negative");
        }

        for storage in &data.storages {
            let effs = [storage.charge_efficiency, storage.discharge_efficiency];
            if effs.iter().any(|e| !(*e > 0.0 && *e <= 1.0)) {
                diag.add_error_with_entity(
                    "config",
                    "Efficiencies must lie in (0, 1]",
                    &format!("Storage {}", storage.name),
                );
            }
        }
        for prosumer in &data.prosumers {
            if let Some(battery) = &prosumer.battery {
                if !(battery.efficiency > 0.0 && battery.efficiency <= 1.0) {
                    diag.add_error_with_entity(
                        "config",
                        "Battery efficiency must lie in (0, 1]",
                        &format!("Prosumer {}", prosumer.name),
                    );
                }
            }
        }

        if data.grid.slack_nodes().is_empty() {
            diag.add_error("config", "No slack node declared");
        }
        if self.setup.needs_network()
            && data.grid.nodes.len() > 1
            && data.grid.ac_lines.is_empty()
        {
            diag.add_error(
                "config",
                "Nodal scope, redispatch or zonal line limits need at least one AC line",
            );
        }
        if self.setup.prosumer.is_some() && data.prosumers.is_empty() {
            diag.add_warning(
                "config",
                "Prosumer participation is enabled but the data contains no prosumers",
            );
        }

        let zones: HashSet<_> = data.grid.zone_order().into_iter().collect();
        for ntc in &data.ntcs {
            for zone in [ntc.from_zone, ntc.to_zone] {
                if !zones.contains(&zone) {
                    diag.add_error_with_entity(
                        "config",
                        &format!("References unknown zone {}", zone.value()),
                        &format!(
                            "NTC {}-{}",
                            ntc.from_zone.value(),
                            ntc.to_zone.value()
                        ),
                    );
                }
            }
        }
        for schedule in &data.schedules {
            if !zones.contains(&schedule.from_zone) && !zones.contains(&schedule.to_zone) {
                diag.add_error_with_entity(
                    "config",
                    "Neither end of the schedule is a modelled zone",
                    &format!(
                        "Schedule {}-{}",
                        schedule.from_zone.value(),
                        schedule.to_zone.value()
                    ),
                );
            }
        }

        diag
    }
}
