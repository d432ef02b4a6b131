//! Spatial scopes: which units the balance runs over and how they are linked.
//!
//! | Scope | Units | Network term in the balance |
//! |-------|-------|-----------------------------|
//! | [`ZonalScope`] | zones | NTC exchanges (imports − exports) plus fixed schedules |
//! | [`NodalScope`] | nodes | minus the node's net input into AC and DC lines |
//!
//! Flow sign convention: flow_l = b_l · (θ_end − θ_start), and the net input
//! of node n is Σ_l A[l,n] · flow_l with A = −1 at the start and +1 at the
//! end of a line. PTDF = H · B⁻¹ maps net input to flow under the same
//! convention, so both nodal formulations produce identical flows.

use super::balance::BalanceTerms;
use super::config::{FlowFormulation, Scope, TimeWindow};
use super::lp::{LinearExpr, LinearModel, Sense, VarId};
use super::results::TableKind;
use super::ClearingError;
use crate::network::NetworkModel;
use crate::sparse::ZoneToZonePtdf;
use gridclear_core::market::profile_value;
use gridclear_core::{GridError, MarketData, ZoneId, BASE_MVA};

/// A flow expression with its thermal limit, one expression per step.
#[derive(Debug, Clone)]
pub struct FlowTerm {
    pub entity: String,
    pub capacity: f64,
    pub flow: Vec<LinearExpr>,
}

/// A zonal exchange variable bounded by its NTC.
#[derive(Debug, Clone)]
pub struct ExchangeTerm {
    pub entity: String,
    pub capacity: f64,
    pub exchange: Vec<VarId>,
}

/// Network parts of a stage model, kept for result extraction.
#[derive(Debug, Clone, Default)]
pub struct NetworkTerms {
    pub line_flows: Vec<FlowTerm>,
    /// Node label and net input per step (nodal scope only)
    pub net_input: Vec<(String, Vec<LinearExpr>)>,
    pub exchanges: Vec<ExchangeTerm>,
}

/// Capability lookups the balance composer dispatches on.
pub trait SpatialScope: Send + Sync {
    fn scope(&self) -> Scope;

    fn unit_labels(&self) -> Vec<String>;

    /// Balance unit of the node at `node_idx` (position in `grid.nodes`)
    fn unit_of_node(&self, node_idx: usize) -> usize;

    /// Table the day-ahead balance rows are reported in
    fn balance_table(&self) -> TableKind;

    /// Add network variables and constraints, and their balance contributions.
    fn add_network(
        &self,
        model: &mut LinearModel,
        window: &TimeWindow,
        balance: &mut BalanceTerms,
    ) -> Result<NetworkTerms, ClearingError>;
}

struct ZonalLineLimits<'a> {
    zone_to_zone: &'a ZoneToZonePtdf,
    network: &'a NetworkModel,
}

pub struct ZonalScope<'a> {
    data: &'a MarketData,
    zones: Vec<ZoneId>,
    node_unit: Vec<usize>,
    limits: Option<ZonalLineLimits<'a>>,
}

impl<'a> ZonalScope<'a> {
    pub fn new(data: &'a MarketData) -> Self {
        let zones = data.grid.zone_order();
        let node_unit = data
            .grid
            .nodes
            .iter()
            .map(|n| zones.iter().position(|z| *z == n.zone).unwrap_or(0))
            .collect();
        Self {
            data,
            zones,
            node_unit,
            limits: None,
        }
    }

    /// Bound AC line flows induced by zonal exchanges.
    pub fn with_line_limits(
        mut self,
        zone_to_zone: &'a ZoneToZonePtdf,
        network: &'a NetworkModel,
    ) -> Self {
        self.limits = Some(ZonalLineLimits {
            zone_to_zone,
            network,
        });
        self
    }

    fn unit_of_zone(&self, zone: ZoneId) -> Option<usize> {
        self.zones.iter().position(|z| *z == zone)
    }

    fn pair_name(&self, from: ZoneId, to: ZoneId) -> String {
        format!(
            "{}-{}",
            self.data.grid.zone_name(from),
            self.data.grid.zone_name(to)
        )
    }
}

impl SpatialScope for ZonalScope<'_> {
    fn scope(&self) -> Scope {
        Scope::Zonal
    }

    fn unit_labels(&self) -> Vec<String> {
        self.zones
            .iter()
            .map(|z| self.data.grid.zone_name(*z))
            .collect()
    }

    fn unit_of_node(&self, node_idx: usize) -> usize {
        self.node_unit.get(node_idx).copied().unwrap_or(0)
    }

    fn balance_table(&self) -> TableKind {
        TableKind::ZonalMarketBalance
    }

    fn add_network(
        &self,
        model: &mut LinearModel,
        window: &TimeWindow,
        balance: &mut BalanceTerms,
    ) -> Result<NetworkTerms, ClearingError> {
        let mut terms = NetworkTerms::default();

        for ntc in &self.data.ntcs {
            let (Some(from), Some(to)) = (
                self.unit_of_zone(ntc.from_zone),
                self.unit_of_zone(ntc.to_zone),
            ) else {
                continue;
            };
            let entity = self.pair_name(ntc.from_zone, ntc.to_zone);
            let mut exchange = Vec::with_capacity(window.len());
            for (k, t) in window.periods().enumerate() {
                let ex = model.add_nonneg(format!("exchange_{entity}_{t}"), ntc.capacity_mw);
                balance.add_term(to, k, ex, 1.0);
                balance.add_term(from, k, ex, -1.0);
                exchange.push(ex);
            }
            terms.exchanges.push(ExchangeTerm {
                entity,
                capacity: ntc.capacity_mw,
                exchange,
            });
        }

        for schedule in &self.data.schedules {
            for (k, t) in window.periods().enumerate() {
                let mw = profile_value(&schedule.profile_mw, t);
                if let Some(to) = self.unit_of_zone(schedule.to_zone) {
                    balance.add_constant(to, k, mw);
                }
                if let Some(from) = self.unit_of_zone(schedule.from_zone) {
                    balance.add_constant(from, k, -mw);
                }
            }
        }

        if let Some(limits) = &self.limits {
            let z2z = limits.zone_to_zone;
            for (l, row) in z2z.values.iter().enumerate() {
                let capacity = limits
                    .network
                    .line_capacity
                    .get(l)
                    .copied()
                    .unwrap_or(f64::INFINITY);
                let entity = limits
                    .network
                    .line_names
                    .get(l)
                    .cloned()
                    .unwrap_or_else(|| format!("line{l}"));
                let mut flow = vec![LinearExpr::new(); window.len()];

                for (ntc, ex) in self.data.ntcs.iter().zip(&terms.exchanges) {
                    if let Some(p) = z2z.pair_index(ntc.from_zone, ntc.to_zone) {
                        for (k, var) in ex.exchange.iter().enumerate() {
                            flow[k].add_term(*var, -row[p]);
                        }
                    }
                }
                for schedule in &self.data.schedules {
                    if let Some(p) = z2z.pair_index(schedule.from_zone, schedule.to_zone) {
                        for (k, t) in window.periods().enumerate() {
                            flow[k].add_constant(-row[p] * profile_value(&schedule.profile_mw, t));
                        }
                    }
                }

                for (k, t) in window.periods().enumerate() {
                    model.add_range(
                        &format!("zonal_flow_{entity}_{t}"),
                        flow[k].clone(),
                        -capacity,
                        capacity,
                    );
                }
                terms.line_flows.push(FlowTerm {
                    entity,
                    capacity,
                    flow,
                });
            }
        }

        Ok(terms)
    }
}

pub struct NodalScope<'a> {
    data: &'a MarketData,
    network: &'a NetworkModel,
    formulation: FlowFormulation,
}

impl<'a> NodalScope<'a> {
    pub fn new(
        data: &'a MarketData,
        network: &'a NetworkModel,
        formulation: FlowFormulation,
    ) -> Self {
        Self {
            data,
            network,
            formulation,
        }
    }

    /// AC flows and AC net input per node for one step.
    fn ac_network(
        &self,
        model: &mut LinearModel,
        t: usize,
        labels: &[String],
    ) -> Result<(Vec<LinearExpr>, Vec<LinearExpr>), ClearingError> {
        let n = self.network.n_nodes();
        let mut net_input = vec![LinearExpr::new(); n];

        let flows = match self.formulation {
            FlowFormulation::Ptdf => {
                let ptdf = self.network.ptdf.as_ref().ok_or_else(|| {
                    ClearingError::Network(GridError::Config(
                        "the PTDF flow formulation needs a network model built with PTDF".into(),
                    ))
                })?;
                let mut sum = LinearExpr::new();
                let mut injections: Vec<Option<VarId>> = vec![None; n];
                for (idx, label) in labels.iter().enumerate().take(n) {
                    if self.network.is_omitted(idx) {
                        continue;
                    }
                    let ni = model.add_free(format!("net_input_{label}_{t}"));
                    sum.add_term(ni, 1.0);
                    net_input[idx].add_term(ni, 1.0);
                    injections[idx] = Some(ni);
                }
                model.add_constraint(format!("net_input_sum_{t}"), sum, Sense::Eq, 0.0);

                ptdf.values
                    .iter()
                    .map(|row| {
                        let mut flow = LinearExpr::new();
                        for (coef, ni) in row.iter().zip(&injections) {
                            if let Some(ni) = ni {
                                flow.add_term(*ni, *coef);
                            }
                        }
                        flow
                    })
                    .collect()
            }
            FlowFormulation::Angles => {
                let mut angles: Vec<Option<VarId>> = vec![None; n];
                for (idx, label) in labels.iter().enumerate().take(n) {
                    if self.network.is_omitted(idx) {
                        continue;
                    }
                    let name = format!("theta_{label}_{t}");
                    angles[idx] = Some(if self.network.is_slack(idx) {
                        model.add_var(name, 0.0, 0.0)
                    } else {
                        model.add_free(name)
                    });
                }

                let mut flows = Vec::with_capacity(self.network.n_lines());
                for term in self.network.susceptance.terminals() {
                    let mut flow = LinearExpr::new();
                    if let (Some(from), Some(to)) = (angles[term.from_idx], angles[term.to_idx]) {
                        let scale = BASE_MVA * term.susceptance;
                        flow.add_term(to, scale);
                        flow.add_term(from, -scale);
                    }
                    net_input[term.to_idx].add_scaled(&flow, 1.0);
                    net_input[term.from_idx].add_scaled(&flow, -1.0);
                    flows.push(flow);
                }
                flows
            }
        };

        Ok((flows, net_input))
    }
}

impl SpatialScope for NodalScope<'_> {
    fn scope(&self) -> Scope {
        Scope::Nodal
    }

    fn unit_labels(&self) -> Vec<String> {
        self.data.grid.nodes.iter().map(|n| n.name.clone()).collect()
    }

    fn unit_of_node(&self, node_idx: usize) -> usize {
        node_idx
    }

    fn balance_table(&self) -> TableKind {
        TableKind::NodalMarketBalance
    }

    fn add_network(
        &self,
        model: &mut LinearModel,
        window: &TimeWindow,
        balance: &mut BalanceTerms,
    ) -> Result<NetworkTerms, ClearingError> {
        let labels = self.unit_labels();
        let n = self.network.n_nodes();
        let mut line_flows: Vec<FlowTerm> = self
            .network
            .line_names
            .iter()
            .zip(&self.network.line_capacity)
            .map(|(name, cap)| FlowTerm {
                entity: name.clone(),
                capacity: *cap,
                flow: Vec::with_capacity(window.len()),
            })
            .collect();
        let mut dc_flows: Vec<FlowTerm> = self
            .network
            .dc_lines
            .iter()
            .map(|dc| FlowTerm {
                entity: dc.name.clone(),
                capacity: dc.capacity_mw,
                flow: Vec::with_capacity(window.len()),
            })
            .collect();
        let mut net_input: Vec<(String, Vec<LinearExpr>)> = labels
            .iter()
            .take(n)
            .map(|l| (l.clone(), Vec::with_capacity(window.len())))
            .collect();

        for (k, t) in window.periods().enumerate() {
            let (flows, mut injection) = self.ac_network(model, t, &labels)?;

            for (l, flow) in flows.into_iter().enumerate() {
                let cap = line_flows[l].capacity;
                model.add_range(
                    &format!("flow_{}_{t}", line_flows[l].entity),
                    flow.clone(),
                    -cap,
                    cap,
                );
                line_flows[l].flow.push(flow);
            }

            for (dc, term) in self.network.dc_lines.iter().zip(dc_flows.iter_mut()) {
                let f = model.add_var(
                    format!("dc_flow_{}_{t}", dc.name),
                    -dc.capacity_mw,
                    dc.capacity_mw,
                );
                injection[dc.from_idx].add_term(f, -1.0);
                injection[dc.to_idx].add_term(f, 1.0);
                term.flow.push(LinearExpr::from(f));
            }

            for (idx, expr) in injection.into_iter().enumerate() {
                balance.add_expr(self.unit_of_node(idx), k, &expr, -1.0);
                net_input[idx].1.push(expr);
            }
        }

        line_flows.extend(dc_flows);
        Ok(NetworkTerms {
            line_flows,
            net_input,
            exchanges: Vec::new(),
        })
    }
}
