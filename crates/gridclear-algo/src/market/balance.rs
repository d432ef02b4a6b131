//! The balance constraint.
//!
//! Scope, supply and prosumer parts never add balance rows themselves. They
//! contribute terms to a shared [`BalanceTerms`] grid (one affine expression
//! per spatial unit and period) and [`compose_balance`] turns the finished
//! grid into one row per cell:
//!
//! ```text
//! supply(u,t) + network(u,t) + prosumer(u,t) − excess(u,t) + lost_load(u,t) = demand(u,t)
//! ```
//!
//! `excess` (curtailment slack) and `lost_load` are penalised feasibility
//! slacks. The row's shadow price is the price of the unit in that period.

use super::lp::{ConstraintId, LinearExpr, LinearModel, Sense, VarId};
use super::solver::LpSolution;

/// Balance contributions, indexed by spatial unit and step within the chunk.
#[derive(Debug, Clone)]
pub struct BalanceTerms {
    units: usize,
    periods: usize,
    terms: Vec<LinearExpr>,
}

impl BalanceTerms {
    pub fn new(units: usize, periods: usize) -> Self {
        Self {
            units,
            periods,
            terms: vec![LinearExpr::new(); units * periods],
        }
    }

    pub fn units(&self) -> usize {
        self.units
    }

    pub fn periods(&self) -> usize {
        self.periods
    }

    fn cell(&mut self, unit: usize, k: usize) -> &mut LinearExpr {
        &mut self.terms[unit * self.periods + k]
    }

    pub fn add_term(&mut self, unit: usize, k: usize, var: VarId, coef: f64) {
        self.cell(unit, k).add_term(var, coef);
    }

    pub fn add_constant(&mut self, unit: usize, k: usize, value: f64) {
        self.cell(unit, k).add_constant(value);
    }

    pub fn add_expr(&mut self, unit: usize, k: usize, expr: &LinearExpr, scale: f64) {
        self.cell(unit, k).add_scaled(expr, scale);
    }

    pub fn get(&self, unit: usize, k: usize) -> &LinearExpr {
        &self.terms[unit * self.periods + k]
    }
}

/// Balance rows and slacks, all indexed `[unit][k]`.
#[derive(Debug, Clone, Default)]
pub struct BalanceRows {
    pub rows: Vec<Vec<ConstraintId>>,
    pub lost_load: Vec<Vec<VarId>>,
    pub excess: Vec<Vec<VarId>>,
}

impl BalanceRows {
    /// Shadow prices per unit and step, `None` when the solution has no duals.
    pub fn prices(&self, solution: &LpSolution) -> Option<Vec<Vec<f64>>> {
        if !solution.has_duals() {
            return None;
        }
        Some(
            self.rows
                .iter()
                .map(|unit| {
                    unit.iter()
                        .map(|&row| solution.dual(row).unwrap_or(f64::NAN))
                        .collect()
                })
                .collect(),
        )
    }
}

/// Add one balance row per cell of `terms`.
///
/// `demand` is indexed `[unit][k]`; `labels` names the units in row and
/// variable names.
pub fn compose_balance(
    model: &mut LinearModel,
    terms: BalanceTerms,
    demand: &[Vec<f64>],
    penalty: f64,
    labels: &[String],
    first_period: usize,
) -> BalanceRows {
    let mut out = BalanceRows::default();
    for unit in 0..terms.units() {
        let label = labels.get(unit).map(String::as_str).unwrap_or("unit");
        let mut rows = Vec::with_capacity(terms.periods());
        let mut lost = Vec::with_capacity(terms.periods());
        let mut excess = Vec::with_capacity(terms.periods());
        for k in 0..terms.periods() {
            let t = first_period + k;
            let ll = model.add_nonneg(format!("lost_load_{label}_{t}"), f64::INFINITY);
            let ex = model.add_nonneg(format!("excess_{label}_{t}"), f64::INFINITY);
            model.add_objective_term(ll, penalty);
            model.add_objective_term(ex, penalty);

            let mut expr = terms.get(unit, k).clone();
            expr.add_term(ll, 1.0);
            expr.add_term(ex, -1.0);
            let rhs = demand
                .get(unit)
                .and_then(|d| d.get(k))
                .copied()
                .unwrap_or(0.0);
            rows.push(model.add_constraint(format!("balance_{label}_{t}"), expr, Sense::Eq, rhs));
            lost.push(ll);
            excess.push(ex);
        }
        out.rows.push(rows);
        out.lost_load.push(lost);
        out.excess.push(excess);
    }
    out
}
