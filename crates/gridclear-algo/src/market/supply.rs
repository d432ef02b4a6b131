//! Supply side of a stage: plants and storages.
//!
//! [`DayAheadSupply`] dispatches every unit from scratch. [`RedispatchSupply`]
//! starts from a day-ahead snapshot and only allows deviations within each
//! unit's remaining headroom:
//!
//! ```text
//! output = baseline + up − down,   0 ≤ up ≤ capacity − baseline,   0 ≤ down ≤ baseline
//! ```
//!
//! Both expose unit outputs as affine expressions so result extraction does
//! not care which variant built them.

use super::balance::BalanceTerms;
use super::config::{StorageContinuity, TimeWindow};
use super::lp::{LinearExpr, LinearModel, Sense, VarId};
use super::results::{DispatchSnapshot, StageKind};
use super::scope::SpatialScope;
use super::ClearingError;
use gridclear_core::{GridError, MarketData, NodeId};
use std::collections::HashMap;

/// Shared inputs of the supply builders.
pub struct SupplyContext<'a> {
    pub data: &'a MarketData,
    pub window: TimeWindow,
    pub continuity: StorageContinuity,
    pub scope: &'a dyn SpatialScope,
    node_index: HashMap<NodeId, usize>,
}

impl<'a> SupplyContext<'a> {
    pub fn new(
        data: &'a MarketData,
        window: TimeWindow,
        continuity: StorageContinuity,
        scope: &'a dyn SpatialScope,
    ) -> Self {
        Self {
            data,
            window,
            continuity,
            scope,
            node_index: data.grid.node_index(),
        }
    }

    /// Balance unit a participant at `node` belongs to.
    pub fn unit_of(&self, node: NodeId, entity: &str) -> Result<usize, ClearingError> {
        self.node_index
            .get(&node)
            .map(|&idx| self.scope.unit_of_node(idx))
            .ok_or_else(|| {
                ClearingError::Network(GridError::Config(format!(
                    "{entity} is attached to unknown node {}",
                    node.value()
                )))
            })
    }
}

/// Deviation of one unit from its baseline, for the REDISP table.
#[derive(Debug, Clone)]
pub struct DeviationTerm {
    pub entity: String,
    pub up: Vec<LinearExpr>,
    pub down: Vec<LinearExpr>,
}

/// Supply parts of a stage model, all indexed `[entity][k]`.
#[derive(Debug, Clone, Default)]
pub struct SupplyTerms {
    pub generation: Vec<Vec<LinearExpr>>,
    pub available: Vec<Vec<f64>>,
    pub charge: Vec<Vec<LinearExpr>>,
    pub discharge: Vec<Vec<LinearExpr>>,
    pub level: Vec<Vec<VarId>>,
    pub deviations: Vec<DeviationTerm>,
}

pub trait SupplyModel: Send + Sync {
    fn stage(&self) -> StageKind;

    fn add_supply(
        &self,
        model: &mut LinearModel,
        ctx: &SupplyContext<'_>,
        balance: &mut BalanceTerms,
    ) -> Result<SupplyTerms, ClearingError>;
}

/// Storage charge/discharge expressions with a level variable per step.
///
/// level[k] = level[k−1] + η_c · charge[k] − discharge[k] / η_d
fn add_storage_levels(
    model: &mut LinearModel,
    ctx: &SupplyContext<'_>,
    charge: &[Vec<LinearExpr>],
    discharge: &[Vec<LinearExpr>],
) -> Vec<Vec<VarId>> {
    let mut levels = Vec::with_capacity(ctx.data.storages.len());
    for (s, storage) in ctx.data.storages.iter().enumerate() {
        let level: Vec<VarId> = ctx
            .window
            .periods()
            .map(|t| model.add_nonneg(format!("level_{}_{t}", storage.name), storage.energy_mwh))
            .collect();

        for (k, t) in ctx.window.periods().enumerate() {
            let mut expr = LinearExpr::from(level[k]);
            expr.add_scaled(&charge[s][k], -storage.charge_efficiency);
            expr.add_scaled(&discharge[s][k], 1.0 / storage.discharge_efficiency);
            match (k, ctx.continuity) {
                (0, StorageContinuity::Wrap) => expr.add_term(level[level.len() - 1], -1.0),
                (0, StorageContinuity::InitialLevel) => {
                    expr.add_constant(-storage.initial_level_mwh)
                }
                _ => expr.add_term(level[k - 1], -1.0),
            }
            model.add_constraint(
                format!("storage_{}_{t}", storage.name),
                expr,
                Sense::Eq,
                0.0,
            );
        }
        levels.push(level);
    }
    levels
}

/// Dispatch from scratch against marginal costs.
#[derive(Debug, Clone, Copy, Default)]
pub struct DayAheadSupply;

impl SupplyModel for DayAheadSupply {
    fn stage(&self) -> StageKind {
        StageKind::DayAhead
    }

    fn add_supply(
        &self,
        model: &mut LinearModel,
        ctx: &SupplyContext<'_>,
        balance: &mut BalanceTerms,
    ) -> Result<SupplyTerms, ClearingError> {
        let mut terms = SupplyTerms::default();

        for plant in &ctx.data.plants {
            let unit = ctx.unit_of(plant.node, &format!("Plant {}", plant.name))?;
            let mut generation = Vec::with_capacity(ctx.window.len());
            let mut available = Vec::with_capacity(ctx.window.len());
            for (k, t) in ctx.window.periods().enumerate() {
                let avail = plant.available_mw(t);
                let g = model.add_nonneg(format!("gen_{}_{t}", plant.name), avail);
                model.add_objective_term(g, plant.marginal_cost);
                balance.add_term(unit, k, g, 1.0);
                generation.push(LinearExpr::from(g));
                available.push(avail);
            }
            terms.generation.push(generation);
            terms.available.push(available);
        }

        for storage in &ctx.data.storages {
            let unit = ctx.unit_of(storage.node, &format!("Storage {}", storage.name))?;
            let mut charge = Vec::with_capacity(ctx.window.len());
            let mut discharge = Vec::with_capacity(ctx.window.len());
            for (k, t) in ctx.window.periods().enumerate() {
                let ch = model.add_nonneg(format!("charge_{}_{t}", storage.name), storage.power_mw);
                let dis =
                    model.add_nonneg(format!("discharge_{}_{t}", storage.name), storage.power_mw);
                model.add_objective_term(dis, storage.marginal_cost);
                balance.add_term(unit, k, dis, 1.0);
                balance.add_term(unit, k, ch, -1.0);
                charge.push(LinearExpr::from(ch));
                discharge.push(LinearExpr::from(dis));
            }
            terms.charge.push(charge);
            terms.discharge.push(discharge);
        }

        terms.level = add_storage_levels(model, ctx, &terms.charge, &terms.discharge);
        Ok(terms)
    }
}

/// Adjust a day-ahead dispatch within remaining headroom.
pub struct RedispatchSupply<'a> {
    pub baseline: &'a DispatchSnapshot,
    /// Premium on every deviation, on top of the marginal cost difference
    pub redispatch_cost: f64,
}

struct Deviation {
    expr: LinearExpr,
    up: VarId,
    down: VarId,
}

impl RedispatchSupply<'_> {
    /// `baseline + up − down` with headroom bounds; `cost` is the marginal
    /// cost of the quantity, `redispatch_cost` is added in both directions.
    fn deviation(
        &self,
        model: &mut LinearModel,
        name: &str,
        baseline: f64,
        capacity: f64,
        cost: f64,
    ) -> Deviation {
        let baseline = baseline.clamp(0.0, capacity.max(0.0));
        let up = model.add_nonneg(format!("{name}_up"), capacity - baseline);
        let down = model.add_nonneg(format!("{name}_down"), baseline);
        model.add_objective_term(up, cost + self.redispatch_cost);
        model.add_objective_term(down, self.redispatch_cost - cost);

        let mut expr = LinearExpr::constant(baseline);
        expr.add_term(up, 1.0);
        expr.add_term(down, -1.0);
        Deviation { expr, up, down }
    }
}

fn baseline_at(values: &[Vec<f64>], entity: usize, k: usize) -> f64 {
    values
        .get(entity)
        .and_then(|v| v.get(k))
        .copied()
        .unwrap_or(0.0)
}

impl SupplyModel for RedispatchSupply<'_> {
    fn stage(&self) -> StageKind {
        StageKind::Redispatch
    }

    fn add_supply(
        &self,
        model: &mut LinearModel,
        ctx: &SupplyContext<'_>,
        balance: &mut BalanceTerms,
    ) -> Result<SupplyTerms, ClearingError> {
        let mut terms = SupplyTerms::default();

        for (p, plant) in ctx.data.plants.iter().enumerate() {
            let unit = ctx.unit_of(plant.node, &format!("Plant {}", plant.name))?;
            let mut generation = Vec::with_capacity(ctx.window.len());
            let mut available = Vec::with_capacity(ctx.window.len());
            let mut dev = DeviationTerm {
                entity: plant.name.clone(),
                up: Vec::new(),
                down: Vec::new(),
            };
            for (k, t) in ctx.window.periods().enumerate() {
                let avail = plant.available_mw(t);
                let d = self.deviation(
                    model,
                    &format!("redispatch_{}_{t}", plant.name),
                    baseline_at(&self.baseline.generation, p, k),
                    avail,
                    plant.marginal_cost,
                );
                balance.add_expr(unit, k, &d.expr, 1.0);
                generation.push(d.expr);
                available.push(avail);
                dev.up.push(d.up.into());
                dev.down.push(d.down.into());
            }
            terms.generation.push(generation);
            terms.available.push(available);
            terms.deviations.push(dev);
        }

        for (s, storage) in ctx.data.storages.iter().enumerate() {
            let unit = ctx.unit_of(storage.node, &format!("Storage {}", storage.name))?;
            let mut charge = Vec::with_capacity(ctx.window.len());
            let mut discharge = Vec::with_capacity(ctx.window.len());
            let mut dev = DeviationTerm {
                entity: storage.name.clone(),
                up: Vec::new(),
                down: Vec::new(),
            };
            for (k, t) in ctx.window.periods().enumerate() {
                let ch = self.deviation(
                    model,
                    &format!("redispatch_charge_{}_{t}", storage.name),
                    baseline_at(&self.baseline.charge, s, k),
                    storage.power_mw,
                    0.0,
                );
                let dis = self.deviation(
                    model,
                    &format!("redispatch_discharge_{}_{t}", storage.name),
                    baseline_at(&self.baseline.discharge, s, k),
                    storage.power_mw,
                    storage.marginal_cost,
                );
                balance.add_expr(unit, k, &dis.expr, 1.0);
                balance.add_expr(unit, k, &ch.expr, -1.0);

                // Net injection moves up when discharging more or charging less.
                let mut up = LinearExpr::from(dis.up);
                up.add_term(ch.down, 1.0);
                let mut down = LinearExpr::from(dis.down);
                down.add_term(ch.up, 1.0);
                dev.up.push(up);
                dev.down.push(down);

                charge.push(ch.expr);
                discharge.push(dis.expr);
            }
            terms.charge.push(charge);
            terms.discharge.push(discharge);
            terms.deviations.push(dev);
        }

        terms.level = add_storage_levels(model, ctx, &terms.charge, &terms.discharge);
        Ok(terms)
    }
}
