//! Prosumer stage.
//!
//! Every prosumer decides its grid import, export and battery use against
//! retail prices. Prosumers are independent of each other; they share one
//! model only so that a chunk needs a single solve. Per prosumer and step:
//!
//! ```text
//! pv − demand + discharge − charge + import − export = 0
//! level[k] = level[k−1] + η · charge[k] − discharge[k]
//! minimise Σ import_price · import − feed_in_price · export
//! ```

use super::config::{RetailPricing, StorageContinuity, TimeWindow};
use super::lp::{LinearExpr, LinearModel, Sense, VarId};
use super::results::{ProsumerSchedule, ResultTable, StageKind, StageResults, TableKind};
use super::solver::LpSolution;
use super::ClearingError;
use gridclear_core::market::profile_value;
use gridclear_core::MarketData;
use tracing::debug;

struct BatteryVars {
    charge: Vec<VarId>,
    discharge: Vec<VarId>,
    level: Vec<VarId>,
}

struct ProsumerVars {
    import: Vec<VarId>,
    export: Vec<VarId>,
    battery: Option<BatteryVars>,
}

/// Inputs of the prosumer stage for one chunk.
pub struct ProsumerStage<'a> {
    pub data: &'a MarketData,
    pub window: TimeWindow,
    pub pricing: RetailPricing,
    pub continuity: StorageContinuity,
    /// Balance unit of every prosumer, in `data.prosumers` order
    pub units: Vec<usize>,
    /// Day-ahead balance prices `[unit][k]`
    pub reference_prices: Option<&'a [Vec<f64>]>,
}

pub struct ProsumerModel {
    pub model: LinearModel,
    window: TimeWindow,
    vars: Vec<ProsumerVars>,
}

impl<'a> ProsumerStage<'a> {
    fn price(&self, unit: usize, k: usize) -> Result<f64, ClearingError> {
        if !self.pricing.needs_prices() {
            return Ok(0.0);
        }
        self.reference_prices
            .and_then(|p| p.get(unit))
            .and_then(|p| p.get(k))
            .copied()
            .filter(|p| p.is_finite())
            .ok_or(ClearingError::MissingPrices {
                chunk: self.window.index,
            })
    }

    pub fn build(&self) -> Result<ProsumerModel, ClearingError> {
        let mut model = LinearModel::new();
        let mut vars = Vec::with_capacity(self.data.prosumers.len());

        for (i, prosumer) in self.data.prosumers.iter().enumerate() {
            let unit = self.units.get(i).copied().unwrap_or(0);
            let power = prosumer.battery.as_ref().map_or(0.0, |b| b.power_mw);
            let name = &prosumer.name;

            let battery = prosumer.battery.as_ref().map(|b| {
                let charge: Vec<VarId> = self
                    .window
                    .periods()
                    .map(|t| model.add_nonneg(format!("prs_charge_{name}_{t}"), b.power_mw))
                    .collect();
                let discharge: Vec<VarId> = self
                    .window
                    .periods()
                    .map(|t| model.add_nonneg(format!("prs_discharge_{name}_{t}"), b.power_mw))
                    .collect();
                let level: Vec<VarId> = self
                    .window
                    .periods()
                    .map(|t| model.add_nonneg(format!("prs_level_{name}_{t}"), b.energy_mwh))
                    .collect();

                for (k, t) in self.window.periods().enumerate() {
                    let mut expr = LinearExpr::from(level[k]);
                    expr.add_term(charge[k], -b.efficiency);
                    expr.add_term(discharge[k], 1.0);
                    match (k, self.continuity) {
                        (0, StorageContinuity::Wrap) => expr.add_term(level[level.len() - 1], -1.0),
                        (0, StorageContinuity::InitialLevel) => {}
                        _ => expr.add_term(level[k - 1], -1.0),
                    }
                    model.add_constraint(format!("prs_storage_{name}_{t}"), expr, Sense::Eq, 0.0);
                }
                BatteryVars {
                    charge,
                    discharge,
                    level,
                }
            });

            let mut import = Vec::with_capacity(self.window.len());
            let mut export = Vec::with_capacity(self.window.len());
            for (k, t) in self.window.periods().enumerate() {
                let pv = profile_value(&prosumer.pv_mw, t).max(0.0);
                let demand = profile_value(&prosumer.demand_mw, t).max(0.0);
                let imp = model.add_nonneg(format!("prs_import_{name}_{t}"), demand + power);
                let exp = model.add_nonneg(format!("prs_export_{name}_{t}"), pv + power);

                let (import_price, feed_in_price) = self.pricing.tariffs(self.price(unit, k)?);
                model.add_objective_term(imp, import_price);
                model.add_objective_term(exp, -feed_in_price);

                let mut expr = LinearExpr::new();
                expr.add_term(imp, 1.0);
                expr.add_term(exp, -1.0);
                if let Some(b) = &battery {
                    expr.add_term(b.discharge[k], 1.0);
                    expr.add_term(b.charge[k], -1.0);
                }
                model.add_constraint(
                    format!("prs_balance_{name}_{t}"),
                    expr,
                    Sense::Eq,
                    demand - pv,
                );
                import.push(imp);
                export.push(exp);
            }

            vars.push(ProsumerVars {
                import,
                export,
                battery,
            });
        }

        debug!(
            chunk = self.window.index,
            prosumers = vars.len(),
            vars = model.num_vars(),
            "prosumer model built"
        );
        Ok(ProsumerModel {
            model,
            window: self.window,
            vars,
        })
    }
}

impl ProsumerModel {
    /// PRS table and the optimised grid exchange, when values exist.
    pub fn extract(
        &self,
        data: &MarketData,
        solution: &LpSolution,
    ) -> (StageResults, Option<ProsumerSchedule>) {
        let mut results = StageResults::new(StageKind::Prosumer, solution.status);
        results.objective = solution.objective;
        results.message = solution.message.clone();
        if !solution.has_values() {
            return (results, None);
        }

        let value = |var: VarId| solution.value(var).unwrap_or(f64::NAN);
        let mut table = ResultTable::new(TableKind::Prosumer);
        let mut schedule = ProsumerSchedule::default();
        for (prosumer, vars) in data.prosumers.iter().zip(&self.vars) {
            let mut injection = Vec::with_capacity(self.window.len());
            for (k, t) in self.window.periods().enumerate() {
                let (imp, exp) = (value(vars.import[k]), value(vars.export[k]));
                let (ch, dis, lvl) = match &vars.battery {
                    Some(b) => (value(b.charge[k]), value(b.discharge[k]), value(b.level[k])),
                    None => (0.0, 0.0, 0.0),
                };
                table.push(prosumer.name.as_str(), t, vec![imp, exp, ch, dis, lvl]);
                injection.push(exp - imp);
            }
            schedule.net_injection.push(injection);
        }
        results.insert(table);
        (results, Some(schedule))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::solver::SolveStatus;
    use crate::test_utils::prosumer_market;

    fn window() -> TimeWindow {
        TimeWindow {
            index: 3,
            first: 1,
            last: 2,
        }
    }

    #[test]
    fn test_dynamic_pricing_needs_prices() {
        let data = prosumer_market();
        let stage = ProsumerStage {
            data: &data,
            window: window(),
            pricing: RetailPricing::Dynamic { markup: 0.05 },
            continuity: StorageContinuity::Wrap,
            units: vec![0],
            reference_prices: None,
        };
        assert!(matches!(
            stage.build(),
            Err(ClearingError::MissingPrices { chunk: 3 })
        ));

        let nan_prices = vec![vec![f64::NAN, 30.0]];
        let stage = ProsumerStage {
            reference_prices: Some(&nan_prices),
            ..stage
        };
        assert!(stage.build().is_err());
    }

    #[test]
    fn test_model_structure_and_tariffs() {
        let data = prosumer_market();
        let prices = vec![vec![40.0, 60.0]];
        let stage = ProsumerStage {
            data: &data,
            window: window(),
            pricing: RetailPricing::Dynamic { markup: 5.0 },
            continuity: StorageContinuity::Wrap,
            units: vec![0],
            reference_prices: Some(&prices),
        };
        let built = stage.build().unwrap();
        // import, export, charge, discharge, level per step
        assert_eq!(built.model.num_vars(), 10);
        // balance and storage row per step
        assert_eq!(built.model.num_constraints(), 4);

        let imp = built.vars[0].import[1];
        let exp = built.vars[0].export[1];
        assert!(built.model.objective.terms.contains(&(imp, 65.0)));
        assert!(built.model.objective.terms.contains(&(exp, -60.0)));

        let balance = built
            .model
            .constraints
            .iter()
            .find(|c| c.name == "prs_balance_house_1")
            .unwrap();
        let pv = data.prosumers[0].pv_mw[0];
        let demand = data.prosumers[0].demand_mw[0];
        assert!((balance.rhs - (demand - pv)).abs() < 1e-12);
    }

    #[test]
    fn test_fixed_tariffs_ignore_prices() {
        let data = prosumer_market();
        let stage = ProsumerStage {
            data: &data,
            window: window(),
            pricing: RetailPricing::Fixed {
                import_tariff: 0.3,
                feed_in_tariff: 0.08,
            },
            continuity: StorageContinuity::InitialLevel,
            units: vec![0],
            reference_prices: None,
        };
        let built = stage.build().unwrap();
        let imp = built.vars[0].import[0];
        assert!(built.model.objective.terms.contains(&(imp, 0.3)));
    }

    #[test]
    fn test_extract_schedule() {
        let data = prosumer_market();
        let stage = ProsumerStage {
            data: &data,
            window: window(),
            pricing: RetailPricing::Fixed {
                import_tariff: 0.3,
                feed_in_tariff: 0.08,
            },
            continuity: StorageContinuity::Wrap,
            units: vec![0],
            reference_prices: None,
        };
        let built = stage.build().unwrap();
        let mut solution = LpSolution::without_values(SolveStatus::Optimal, "scripted");
        solution.primal = vec![0.0; built.model.num_vars()];
        solution.primal[built.vars[0].export[0].index()] = 0.004;
        solution.primal[built.vars[0].import[1].index()] = 0.001;

        let (results, schedule) = built.extract(&data, &solution);
        let schedule = schedule.unwrap();
        assert_eq!(schedule.net_injection, vec![vec![0.004, -0.001]]);
        let table = results.table(TableKind::Prosumer).unwrap();
        assert_eq!(table.value("house", 2, "import"), Some(0.001));
    }
}
