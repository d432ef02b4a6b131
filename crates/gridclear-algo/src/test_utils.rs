//! Small markets and a scripted solver for tests of the clearing pipeline.

use crate::market::lp::LinearModel;
use crate::market::solver::{LpBackend, LpSolution, SolveStatus, SolverSettings};
use crate::market::ClearingError;
use gridclear_core::{
    AcLine, Grid, LineId, Load, LoadId, MarketData, Node, NodeId, Ntc, Plant, PlantId, Prosumer,
    ProsumerBattery, ProsumerId, Zone, ZoneId,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Periods covered by every fixture profile.
pub const FIXTURE_PERIODS: usize = 4;

/// One slack node with a single 20/MWh plant and a flat load.
pub fn single_node_market(capacity_mw: f64, demand_mw: f64) -> MarketData {
    let mut grid = Grid::new();
    grid.zones.push(Zone::new(ZoneId::new(1), "market"));
    grid.nodes
        .push(Node::new(NodeId::new(1), "n1", ZoneId::new(1)).as_slack());

    let mut data = MarketData::new(grid);
    data.plants.push(Plant::dispatchable(
        PlantId::new(1),
        "plant",
        NodeId::new(1),
        capacity_mw,
        20.0,
    ));
    data.loads.push(Load::new(
        LoadId::new(1),
        "demand",
        NodeId::new(1),
        vec![demand_mw; FIXTURE_PERIODS],
    ));
    data
}

/// Zones north (n1, n2) and south (n3). Cheap supply sits in the north,
/// 150 MW of demand in the south, one 100 MW NTC north → south.
pub fn two_zone_market() -> MarketData {
    let mut grid = Grid::new();
    grid.zones.push(Zone::new(ZoneId::new(1), "north"));
    grid.zones.push(Zone::new(ZoneId::new(2), "south"));
    grid.nodes
        .push(Node::new(NodeId::new(1), "n1", ZoneId::new(1)).as_slack());
    grid.nodes.push(Node::new(NodeId::new(2), "n2", ZoneId::new(1)));
    grid.nodes.push(Node::new(NodeId::new(3), "n3", ZoneId::new(2)));
    grid.ac_lines.push(
        AcLine::new(
            LineId::new(1),
            "l12",
            NodeId::new(1),
            NodeId::new(2),
            0.0,
            0.1,
        )
        .with_capacity(200.0),
    );
    grid.ac_lines.push(
        AcLine::new(
            LineId::new(2),
            "l23",
            NodeId::new(2),
            NodeId::new(3),
            0.0,
            0.1,
        )
        .with_capacity(200.0),
    );

    let mut data = MarketData::new(grid);
    data.plants.push(Plant::dispatchable(
        PlantId::new(1),
        "hydro",
        NodeId::new(1),
        300.0,
        10.0,
    ));
    data.plants.push(Plant::dispatchable(
        PlantId::new(2),
        "gas",
        NodeId::new(3),
        200.0,
        60.0,
    ));
    data.loads.push(Load::new(
        LoadId::new(1),
        "north_load",
        NodeId::new(2),
        vec![50.0; FIXTURE_PERIODS],
    ));
    data.loads.push(Load::new(
        LoadId::new(2),
        "south_load",
        NodeId::new(3),
        vec![150.0, 120.0, 150.0, 120.0],
    ));
    data.ntcs.push(Ntc {
        from_zone: ZoneId::new(1),
        to_zone: ZoneId::new(2),
        capacity_mw: 100.0,
    });
    data
}

/// Meshed triangle in one zone: n1 (slack) – n2 – n3 – n1, all lines
/// limited, cheap plant at n1, expensive plant and load at n3.
pub fn three_node_market() -> MarketData {
    let mut grid = Grid::new();
    grid.zones.push(Zone::new(ZoneId::new(1), "market"));
    grid.nodes
        .push(Node::new(NodeId::new(1), "n1", ZoneId::new(1)).as_slack());
    grid.nodes.push(Node::new(NodeId::new(2), "n2", ZoneId::new(1)));
    grid.nodes.push(Node::new(NodeId::new(3), "n3", ZoneId::new(1)));
    for (id, name, from, to) in [(1, "l12", 1, 2), (2, "l23", 2, 3), (3, "l13", 1, 3)] {
        grid.ac_lines.push(
            AcLine::new(
                LineId::new(id),
                name,
                NodeId::new(from),
                NodeId::new(to),
                0.0,
                0.1,
            )
            .with_capacity(80.0),
        );
    }

    let mut data = MarketData::new(grid);
    data.plants.push(Plant::dispatchable(
        PlantId::new(1),
        "base",
        NodeId::new(1),
        300.0,
        20.0,
    ));
    data.plants.push(Plant::dispatchable(
        PlantId::new(2),
        "peak",
        NodeId::new(3),
        100.0,
        80.0,
    ));
    data.loads.push(Load::new(
        LoadId::new(1),
        "city",
        NodeId::new(3),
        vec![150.0; FIXTURE_PERIODS],
    ));
    data
}

/// One zone with two nodes; a household with PV and a battery at n2.
pub fn prosumer_market() -> MarketData {
    let mut grid = Grid::new();
    grid.zones.push(Zone::new(ZoneId::new(1), "market"));
    grid.nodes
        .push(Node::new(NodeId::new(1), "n1", ZoneId::new(1)).as_slack());
    grid.nodes.push(Node::new(NodeId::new(2), "n2", ZoneId::new(1)));
    grid.ac_lines.push(
        AcLine::new(
            LineId::new(1),
            "l12",
            NodeId::new(1),
            NodeId::new(2),
            0.0,
            0.1,
        )
        .with_capacity(100.0),
    );

    let mut data = MarketData::new(grid);
    data.plants.push(Plant::dispatchable(
        PlantId::new(1),
        "plant",
        NodeId::new(1),
        100.0,
        30.0,
    ));
    data.loads.push(Load::new(
        LoadId::new(1),
        "demand",
        NodeId::new(2),
        vec![40.0; FIXTURE_PERIODS],
    ));
    data.prosumers.push(Prosumer {
        id: ProsumerId::new(1),
        name: "house".to_string(),
        node: NodeId::new(2),
        pv_mw: vec![0.006, 0.001, 0.006, 0.001],
        demand_mw: vec![0.002, 0.004, 0.002, 0.004],
        battery: Some(ProsumerBattery {
            power_mw: 0.003,
            energy_mwh: 0.01,
            efficiency: 0.95,
        }),
    });
    data
}

/// Backend that replays a list of statuses instead of solving.
///
/// Optimal solves return all-zero primal and dual values. Other statuses
/// return no values, or all-zero primal values with
/// [`ScriptedBackend::with_partial_values`]. Once the script is used up,
/// every further solve is optimal.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    script: Mutex<VecDeque<SolveStatus>>,
    calls: AtomicUsize,
    partial_values: bool,
    no_duals: bool,
}

impl ScriptedBackend {
    pub fn new(script: Vec<SolveStatus>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Self::default()
        }
    }

    pub fn optimal() -> Self {
        Self::default()
    }

    pub fn with_partial_values(mut self) -> Self {
        self.partial_values = true;
        self
    }

    pub fn without_duals(mut self) -> Self {
        self.no_duals = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LpBackend for ScriptedBackend {
    fn id(&self) -> &str {
        "scripted"
    }

    fn solve(
        &self,
        model: &LinearModel,
        _settings: &SolverSettings,
    ) -> Result<LpSolution, ClearingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let status = self
            .script
            .lock()
            .map_err(|_| ClearingError::Solver("scripted backend lock poisoned".into()))?
            .pop_front()
            .unwrap_or(SolveStatus::Optimal);

        let mut solution = LpSolution::without_values(status, format!("scripted {status}"));
        solution.solve_time = Duration::from_millis(1);
        if status.is_success() {
            solution.objective = Some(0.0);
            solution.primal = vec![0.0; model.num_vars()];
            if !self.no_duals {
                solution.duals = vec![0.0; model.num_constraints()];
            }
        } else if self.partial_values {
            solution.primal = vec![0.0; model.num_vars()];
        }
        Ok(solution)
    }
}
