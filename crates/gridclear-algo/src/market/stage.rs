//! Stage builder: one linear model per stage and chunk.
//!
//! A stage is the composition of a [`SpatialScope`], a [`SupplyModel`] and a
//! [`ProsumerInjection`]. The builder asks each part to add its variables and
//! balance contributions, then closes the balance once. [`StageModel`] keeps
//! the handles needed to turn a solution back into result tables.

use super::balance::{compose_balance, BalanceRows, BalanceTerms};
use super::config::{StorageContinuity, TimeWindow};
use super::lp::{LinearExpr, LinearModel};
use super::results::{
    DispatchSnapshot, ProsumerSchedule, ResultTable, StageKind, StageResults, TableKind,
};
use super::scope::{NetworkTerms, SpatialScope};
use super::solver::LpSolution;
use super::supply::{SupplyContext, SupplyModel, SupplyTerms};
use super::ClearingError;
use gridclear_core::market::profile_value;
use gridclear_core::MarketData;
use tracing::debug;

/// Prosumer contribution to the balance.
#[derive(Debug, Clone, Copy)]
pub enum ProsumerInjection<'a> {
    /// Prosumers take no part in the clearing
    None,
    /// PV minus demand, before any battery optimisation
    Forecast,
    /// Grid exchange optimised by the prosumer stage
    Scheduled(&'a ProsumerSchedule),
}

pub struct StageBuilder<'a> {
    pub data: &'a MarketData,
    pub window: TimeWindow,
    pub scope: &'a dyn SpatialScope,
    pub supply: &'a dyn SupplyModel,
    pub prosumer: ProsumerInjection<'a>,
    /// Cost per MWh of lost load and excess energy
    pub penalty: f64,
    pub continuity: StorageContinuity,
}

impl<'a> StageBuilder<'a> {
    pub fn build(&self) -> Result<StageModel, ClearingError> {
        let labels = self.scope.unit_labels();
        let periods = self.window.len();
        let mut model = LinearModel::new();
        let mut balance = BalanceTerms::new(labels.len(), periods);

        let ctx = SupplyContext::new(self.data, self.window, self.continuity, self.scope);
        let supply = self.supply.add_supply(&mut model, &ctx, &mut balance)?;
        let network = self.scope.add_network(&mut model, &self.window, &mut balance)?;
        self.add_prosumers(&ctx, &mut balance)?;

        let node_index = self.data.grid.node_index();
        let mut demand = vec![vec![0.0; periods]; labels.len()];
        for load in &self.data.loads {
            let Some(&idx) = node_index.get(&load.node) else {
                continue;
            };
            let unit = self.scope.unit_of_node(idx);
            for (k, t) in self.window.periods().enumerate() {
                demand[unit][k] += profile_value(&load.profile_mw, t);
            }
        }

        let rows = compose_balance(
            &mut model,
            balance,
            &demand,
            self.penalty,
            &labels,
            self.window.first,
        );

        let stage = self.supply.stage();
        let balance_table = match stage {
            StageKind::Redispatch => TableKind::RedispatchMarketBalance,
            _ => self.scope.balance_table(),
        };
        debug!(
            %stage,
            scope = ?self.scope.scope(),
            chunk = self.window.index,
            vars = model.num_vars(),
            constraints = model.num_constraints(),
            "stage model built"
        );

        Ok(StageModel {
            stage,
            window: self.window,
            model,
            balance: rows,
            supply,
            network,
            unit_labels: labels,
            balance_table,
        })
    }

    fn add_prosumers(
        &self,
        ctx: &SupplyContext<'_>,
        balance: &mut BalanceTerms,
    ) -> Result<(), ClearingError> {
        if matches!(self.prosumer, ProsumerInjection::None) {
            return Ok(());
        }
        for (i, prosumer) in self.data.prosumers.iter().enumerate() {
            let unit = ctx.unit_of(prosumer.node, &format!("Prosumer {}", prosumer.name))?;
            for (k, t) in self.window.periods().enumerate() {
                let injection = match self.prosumer {
                    ProsumerInjection::Scheduled(schedule) => schedule
                        .net_injection
                        .get(i)
                        .and_then(|p| p.get(k))
                        .copied()
                        .unwrap_or_else(|| prosumer.forecast_injection(t)),
                    _ => prosumer.forecast_injection(t),
                };
                balance.add_constant(unit, k, injection);
            }
        }
        Ok(())
    }
}

/// A built stage, ready to be solved.
#[derive(Debug, Clone)]
pub struct StageModel {
    pub stage: StageKind,
    pub window: TimeWindow,
    pub model: LinearModel,
    pub balance: BalanceRows,
    pub supply: SupplyTerms,
    pub network: NetworkTerms,
    pub unit_labels: Vec<String>,
    pub balance_table: TableKind,
}

/// What a solved stage hands to persistence and to the next stage.
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub results: StageResults,
    /// Dispatch for the next stage, present when the solver returned values
    pub snapshot: Option<DispatchSnapshot>,
    /// Balance prices `[unit][k]`, present when the solver returned duals
    pub prices: Option<Vec<Vec<f64>>>,
}

impl StageModel {
    /// Turn a solution into result tables. Works on partial solutions: tables
    /// that need primal values stay empty without them, prices read as NaN
    /// without duals.
    pub fn extract(&self, data: &MarketData, solution: &LpSolution) -> StageOutput {
        let mut results = StageResults::new(self.stage, solution.status);
        results.objective = solution.objective;
        results.message = solution.message.clone();
        let prices = self.balance.prices(solution);

        self.add_static_tables(&mut results);
        if !solution.has_values() {
            return StageOutput {
                results,
                snapshot: None,
                prices,
            };
        }

        let x = &solution.primal;
        let periods: Vec<usize> = self.window.periods().collect();
        let eval = |series: &[LinearExpr]| -> Vec<f64> {
            series.iter().map(|e| e.evaluate(x)).collect()
        };

        let generation: Vec<Vec<f64>> = self.supply.generation.iter().map(|g| eval(g)).collect();
        let charge: Vec<Vec<f64>> = self.supply.charge.iter().map(|c| eval(c)).collect();
        let discharge: Vec<Vec<f64>> = self.supply.discharge.iter().map(|d| eval(d)).collect();
        let curtailment: Vec<Vec<f64>> = generation
            .iter()
            .zip(&self.supply.available)
            .map(|(g, a)| g.iter().zip(a).map(|(g, a)| (a - g).max(0.0)).collect())
            .collect();

        let mut gen_table = ResultTable::new(TableKind::Generation);
        let mut curt_table = ResultTable::new(TableKind::Curtailment);
        for (p, plant) in data.plants.iter().enumerate() {
            for (k, &t) in periods.iter().enumerate() {
                gen_table.push(plant.name.as_str(), t, vec![generation[p][k]]);
                if !plant.is_dispatchable() {
                    curt_table.push(plant.name.as_str(), t, vec![curtailment[p][k]]);
                }
            }
        }
        results.insert(gen_table);
        results.insert(curt_table);

        let mut charge_table = ResultTable::new(TableKind::Charge);
        let mut level_table = ResultTable::new(TableKind::StorageLevel);
        for (s, storage) in data.storages.iter().enumerate() {
            for (k, &t) in periods.iter().enumerate() {
                charge_table.push(
                    storage.name.as_str(),
                    t,
                    vec![charge[s][k], discharge[s][k]],
                );
                let level = self.supply.level[s][k];
                level_table.push(
                    storage.name.as_str(),
                    t,
                    vec![solution.value(level).unwrap_or(f64::NAN)],
                );
            }
        }
        results.insert(charge_table);
        results.insert(level_table);

        if self.stage == StageKind::Redispatch {
            let mut table = ResultTable::new(TableKind::Redispatch);
            for dev in &self.supply.deviations {
                let (up, down) = (eval(&dev.up), eval(&dev.down));
                for (k, &t) in periods.iter().enumerate() {
                    table.push(dev.entity.as_str(), t, vec![up[k], down[k]]);
                }
            }
            results.insert(table);
        }

        if !self.network.net_input.is_empty() {
            let mut table = ResultTable::new(TableKind::NetInput);
            for (node, series) in &self.network.net_input {
                for (k, value) in eval(series).into_iter().enumerate() {
                    table.push(node.as_str(), periods[k], vec![value]);
                }
            }
            results.insert(table);
        }

        if !self.network.line_flows.is_empty() {
            let mut table = ResultTable::new(TableKind::LineFlow);
            for line in &self.network.line_flows {
                for (k, value) in eval(&line.flow).into_iter().enumerate() {
                    table.push(line.entity.as_str(), periods[k], vec![value, line.capacity]);
                }
            }
            results.insert(table);
        }

        if !self.network.exchanges.is_empty() {
            let mut table = ResultTable::new(TableKind::Exchange);
            for ex in &self.network.exchanges {
                for (k, var) in ex.exchange.iter().enumerate() {
                    table.push(
                        ex.entity.as_str(),
                        periods[k],
                        vec![solution.value(*var).unwrap_or(f64::NAN)],
                    );
                }
            }
            results.insert(table);
        }

        let mut balance_table = ResultTable::new(self.balance_table);
        for (u, label) in self.unit_labels.iter().enumerate() {
            for (k, &t) in periods.iter().enumerate() {
                let price = prices
                    .as_ref()
                    .and_then(|p| p.get(u))
                    .and_then(|p| p.get(k))
                    .copied()
                    .unwrap_or(f64::NAN);
                let lost = solution.value(self.balance.lost_load[u][k]).unwrap_or(f64::NAN);
                let excess = solution.value(self.balance.excess[u][k]).unwrap_or(f64::NAN);
                balance_table.push(label.as_str(), t, vec![price, lost, excess]);
            }
        }
        results.insert(balance_table);

        StageOutput {
            results,
            snapshot: Some(DispatchSnapshot {
                generation,
                curtailment,
                charge,
                discharge,
                prosumer: None,
            }),
            prices,
        }
    }

    /// Tables that do not depend on the solution.
    fn add_static_tables(&self, results: &mut StageResults) {
        if self.network.exchanges.is_empty() {
            return;
        }
        let mut table = ResultTable::new(TableKind::Ntc);
        for ex in &self.network.exchanges {
            for t in self.window.periods() {
                table.push(ex.entity.as_str(), t, vec![ex.capacity]);
            }
        }
        results.insert(table);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::scope::ZonalScope;
    use crate::market::solver::SolveStatus;
    use crate::market::supply::DayAheadSupply;
    use crate::test_utils::two_zone_market;

    fn window() -> TimeWindow {
        TimeWindow {
            index: 0,
            first: 1,
            last: 2,
        }
    }

    #[test]
    fn test_zonal_day_ahead_structure() {
        let data = two_zone_market();
        let scope = ZonalScope::new(&data);
        let builder = StageBuilder {
            data: &data,
            window: window(),
            scope: &scope,
            supply: &DayAheadSupply,
            prosumer: ProsumerInjection::None,
            penalty: 1000.0,
            continuity: StorageContinuity::Wrap,
        };
        let stage = builder.build().unwrap();
        assert_eq!(stage.stage, StageKind::DayAhead);
        assert_eq!(stage.balance.rows.len(), 2);
        assert_eq!(stage.balance.rows[0].len(), 2);
        assert_eq!(stage.balance_table, TableKind::ZonalMarketBalance);

        // south demand sits on the right-hand side of its balance row
        let row = stage.model.constraint(stage.balance.rows[1][0]);
        assert_eq!(row.normalized_rhs(), 150.0);
    }

    #[test]
    fn test_prosumer_forecast_enters_as_constant() {
        let data = crate::test_utils::prosumer_market();
        let scope = ZonalScope::new(&data);
        let mut builder = StageBuilder {
            data: &data,
            window: window(),
            scope: &scope,
            supply: &DayAheadSupply,
            prosumer: ProsumerInjection::Forecast,
            penalty: 1000.0,
            continuity: StorageContinuity::Wrap,
        };
        let with_forecast = builder.build().unwrap();
        let rhs_forecast = with_forecast
            .model
            .constraint(with_forecast.balance.rows[0][0])
            .normalized_rhs();

        builder.prosumer = ProsumerInjection::None;
        let without = builder.build().unwrap();
        let rhs_without = without.model.constraint(without.balance.rows[0][0]).normalized_rhs();
        let forecast = data.prosumers[0].forecast_injection(1);
        assert!((rhs_without - rhs_forecast - forecast).abs() < 1e-12);

        let schedule = ProsumerSchedule {
            net_injection: vec![vec![2.5, 0.0]],
        };
        builder.prosumer = ProsumerInjection::Scheduled(&schedule);
        let scheduled = builder.build().unwrap();
        let rhs_scheduled = scheduled
            .model
            .constraint(scheduled.balance.rows[0][0])
            .normalized_rhs();
        assert!((rhs_without - rhs_scheduled - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_extract_without_values_keeps_status() {
        let data = two_zone_market();
        let scope = ZonalScope::new(&data);
        let builder = StageBuilder {
            data: &data,
            window: window(),
            scope: &scope,
            supply: &DayAheadSupply,
            prosumer: ProsumerInjection::None,
            penalty: 1000.0,
            continuity: StorageContinuity::Wrap,
        };
        let stage = builder.build().unwrap();
        let solution = LpSolution::without_values(SolveStatus::Timeout, "time limit");
        let output = stage.extract(&data, &solution);
        assert_eq!(output.results.status, SolveStatus::Timeout);
        assert!(output.snapshot.is_none());
        assert!(output.prices.is_none());
        assert!(output.results.table(TableKind::Generation).is_none());
        assert_eq!(
            output.results.table(TableKind::Ntc).map(|t| t.len()),
            Some(2)
        );
    }

    #[test]
    fn test_extract_partial_values_gives_nan_prices() {
        let data = two_zone_market();
        let scope = ZonalScope::new(&data);
        let builder = StageBuilder {
            data: &data,
            window: window(),
            scope: &scope,
            supply: &DayAheadSupply,
            prosumer: ProsumerInjection::None,
            penalty: 1000.0,
            continuity: StorageContinuity::Wrap,
        };
        let stage = builder.build().unwrap();
        let mut solution = LpSolution::without_values(SolveStatus::IterationLimit, "iterations");
        solution.primal = vec![1.0; stage.model.num_vars()];
        let output = stage.extract(&data, &solution);
        let balance = output.results.table(TableKind::ZonalMarketBalance).unwrap();
        assert_eq!(balance.len(), 4);
        assert!(balance.rows.iter().all(|r| r.values[0].is_nan()));
        assert!(output.snapshot.is_some());
    }
}
