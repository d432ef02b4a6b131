//! Structural validation of the transmission topology.
//!
//! [`validate_topology`] never fails: every defect it finds is recorded in the
//! returned [`TopologyReport`], and the report decides whether a PTDF may be
//! computed. Checks and their severities:
//!
//! | Check | Category | Severity |
//! |-------|----------|----------|
//! | duplicate node/line ID, unknown end node | `reference` | error |
//! | line with identical start and end | `structure` | error |
//! | zero reactance / near-zero reactance | `reactance` | error / warning |
//! | node touched by no line | `isolated` | error |
//! | node touched only by DC lines | `dc-only` | warning |
//! | more than one island | `island` | error |
//! | lines sharing the same node pair | `parallel` | note |
//! | zero slack / several slack / slack off the AC network | `slack` | error / warning / error |

use gridclear_core::graph_utils::{find_islands, IslandAnalysis};
use gridclear_core::{Diagnostics, Grid, LineId, NodeId};
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

/// Reactance magnitudes below this are treated as numerically unsafe.
pub const NEAR_ZERO_REACTANCE: f64 = 1e-10;

/// Outcome of topology validation.
#[derive(Debug, Clone, Default)]
pub struct TopologyReport {
    pub diagnostics: Diagnostics,
    pub islands: IslandAnalysis,
    pub isolated: Vec<NodeId>,
    pub dc_only: Vec<NodeId>,
    /// Groups of AC lines sharing the same undirected node pair
    pub parallel_groups: Vec<Vec<LineId>>,
}

impl TopologyReport {
    /// A PTDF may only be computed when validation found no error.
    pub fn safe_for_ptdf(&self) -> bool {
        !self.diagnostics.has_errors()
    }

    /// Nodes excluded from the susceptance inversion: isolated ∪ DC-only.
    pub fn nodes_to_omit_for_ptdf(&self) -> Vec<NodeId> {
        let mut omit: Vec<NodeId> = self
            .isolated
            .iter()
            .chain(&self.dc_only)
            .copied()
            .collect();
        omit.sort();
        omit.dedup();
        omit
    }
}

/// Run every structural check over the grid.
pub fn validate_topology(grid: &Grid) -> TopologyReport {
    let mut diag = Diagnostics::new();
    let mut report = TopologyReport::default();

    let mut known = HashSet::new();
    for node in &grid.nodes {
        if !known.insert(node.id) {
            diag.add_error_with_entity(
                "reference",
                "Duplicate node ID",
                &format!("Node {}", node.name),
            );
        }
    }
    let mut line_ids = HashSet::new();
    for line in &grid.ac_lines {
        if !line_ids.insert(line.id) {
            diag.add_error_with_entity(
                "reference",
                "Duplicate line ID",
                &format!("Line {}", line.name),
            );
        }
    }

    let mut ac_touched = HashSet::new();
    let mut dc_touched = HashSet::new();
    let mut pairs: BTreeMap<(NodeId, NodeId), Vec<LineId>> = BTreeMap::new();

    for line in &grid.ac_lines {
        let entity = format!("Line {}", line.name);
        if !check_endpoints(&mut diag, &known, line.from_node, line.to_node, &entity) {
            continue;
        }

        let x = line.reactance_pu.unwrap_or(line.reactance);
        match line.susceptance_pu {
            Some(b) if b == 0.0 => {
                diag.add_error_with_entity("reactance", "Susceptance override is zero", &entity)
            }
            Some(_) => {}
            None if x == 0.0 => diag.add_error_with_entity(
                "reactance",
                "Zero reactance makes the susceptance undefined",
                &entity,
            ),
            None if x.abs() < NEAR_ZERO_REACTANCE => diag.add_warning_with_entity(
                "reactance",
                &format!("Near-zero reactance {x:e} makes the susceptance ill-conditioned"),
                &entity,
            ),
            None => {}
        }

        ac_touched.insert(line.from_node);
        ac_touched.insert(line.to_node);
        let key = if line.from_node <= line.to_node {
            (line.from_node, line.to_node)
        } else {
            (line.to_node, line.from_node)
        };
        pairs.entry(key).or_default().push(line.id);
    }

    for line in &grid.dc_lines {
        let entity = format!("DC line {}", line.name);
        if check_endpoints(&mut diag, &known, line.from_node, line.to_node, &entity) {
            dc_touched.insert(line.from_node);
            dc_touched.insert(line.to_node);
        }
    }

    let single_node = grid.nodes.len() == 1;
    for node in &grid.nodes {
        let entity = format!("Node {}", node.name);
        match (ac_touched.contains(&node.id), dc_touched.contains(&node.id)) {
            (false, false) if !single_node => {
                diag.add_error_with_entity(
                    "isolated",
                    "Node is not connected to any AC or DC line",
                    &entity,
                );
                report.isolated.push(node.id);
            }
            (false, true) => {
                diag.add_warning_with_entity(
                    "dc-only",
                    "Node is connected only through DC lines and is excluded from the PTDF",
                    &entity,
                );
                report.dc_only.push(node.id);
            }
            _ => {}
        }
    }

    report.islands = find_islands(grid);
    if report.islands.island_count() > 1 {
        diag.add_error(
            "island",
            &format!(
                "Network splits into {} islands",
                report.islands.island_count()
            ),
        );
        for island in &report.islands.islands {
            diag.add_error_with_entity(
                "island",
                &format!(
                    "{} nodes, {} slack nodes",
                    island.node_count, island.slack_count
                ),
                &format!("Island {}", island.island_id),
            );
        }
    }

    for (&(a, b), group) in &pairs {
        if group.len() > 1 {
            diag.add_note_with_entity(
                "parallel",
                &format!("{} parallel lines", group.len()),
                &format!("{}-{}", grid.node_name(a), grid.node_name(b)),
            );
            report.parallel_groups.push(group.clone());
        }
    }

    check_slack(&mut diag, grid, &ac_touched, single_node);

    debug!(
        nodes = grid.nodes.len(),
        islands = report.islands.island_count(),
        isolated = report.isolated.len(),
        dc_only = report.dc_only.len(),
        summary = %diag.summary(),
        "topology validated"
    );
    report.diagnostics = diag;
    report
}

fn check_endpoints(
    diag: &mut Diagnostics,
    known: &HashSet<NodeId>,
    from: NodeId,
    to: NodeId,
    entity: &str,
) -> bool {
    let mut ok = true;
    for end in [from, to] {
        if !known.contains(&end) {
            diag.add_error_with_entity(
                "reference",
                &format!("References unknown node {}", end.value()),
                entity,
            );
            ok = false;
        }
    }
    if ok && from == to {
        diag.add_error_with_entity("structure", "Start and end node are identical", entity);
        ok = false;
    }
    ok
}

fn check_slack(
    diag: &mut Diagnostics,
    grid: &Grid,
    ac_touched: &HashSet<NodeId>,
    single_node: bool,
) {
    let slack = grid.slack_nodes();
    match slack.len() {
        0 => diag.add_error("slack", "No slack node declared"),
        1 => {}
        n => diag.add_warning(
            "slack",
            &format!("{n} slack nodes declared; all are used as joint reference"),
        ),
    }

    if single_node {
        return;
    }
    for id in slack {
        if !ac_touched.contains(&id) {
            diag.add_error_with_entity(
                "slack",
                "Slack node is not part of the AC network",
                &format!("Node {}", grid.node_name(id)),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridclear_core::{AcLine, DcLine, DcLineId, Node, ZoneId};

    fn node(id: usize) -> Node {
        Node::new(NodeId::new(id), format!("n{id}"), ZoneId::new(1))
    }

    fn ac(id: usize, from: usize, to: usize) -> AcLine {
        AcLine::new(
            LineId::new(id),
            format!("l{from}{to}"),
            NodeId::new(from),
            NodeId::new(to),
            0.0,
            0.1,
        )
    }

    #[test]
    fn test_connected_grid_is_clean() {
        let mut grid = Grid::new();
        grid.nodes.push(node(1).as_slack());
        grid.nodes.push(node(2));
        grid.nodes.push(node(3));
        grid.ac_lines.push(ac(1, 1, 2));
        grid.ac_lines.push(ac(2, 2, 3));

        let report = validate_topology(&grid);
        assert!(!report.diagnostics.has_errors(), "{}", report.diagnostics);
        assert!(report.safe_for_ptdf());
        assert!(report.nodes_to_omit_for_ptdf().is_empty());
    }

    #[test]
    fn test_self_loop_and_unknown_endpoint() {
        let mut grid = Grid::new();
        grid.nodes.push(node(1).as_slack());
        grid.nodes.push(node(2));
        grid.ac_lines.push(ac(1, 1, 2));
        grid.ac_lines.push(ac(2, 2, 2));
        grid.ac_lines.push(ac(3, 2, 9));

        let report = validate_topology(&grid);
        assert_eq!(
            report.diagnostics.issues_by_category("structure").count(),
            1
        );
        assert_eq!(
            report.diagnostics.issues_by_category("reference").count(),
            1
        );
        assert!(!report.safe_for_ptdf());
    }

    #[test]
    fn test_reactance_checks() {
        let mut grid = Grid::new();
        grid.nodes.push(node(1).as_slack());
        grid.nodes.push(node(2));
        let mut zero = ac(1, 1, 2);
        zero.reactance = 0.0;
        let mut tiny = ac(2, 1, 2);
        tiny.reactance = 1e-12;
        grid.ac_lines.push(zero);
        grid.ac_lines.push(tiny);

        let report = validate_topology(&grid);
        let reactance: Vec<_> = report.diagnostics.issues_by_category("reactance").collect();
        assert_eq!(reactance.len(), 2);
        assert_eq!(report.diagnostics.error_count(), 1);
        assert_eq!(report.parallel_groups.len(), 1);
        assert_eq!(report.diagnostics.notes().count(), 1);
    }

    #[test]
    fn test_dc_only_and_isolated_nodes() {
        let mut grid = Grid::new();
        grid.nodes.push(node(1).as_slack());
        grid.nodes.push(node(2));
        grid.nodes.push(node(3));
        grid.nodes.push(node(4));
        grid.ac_lines.push(ac(1, 1, 2));
        grid.dc_lines.push(DcLine::new(
            DcLineId::new(1),
            "dc23",
            NodeId::new(2),
            NodeId::new(3),
            50.0,
        ));

        let report = validate_topology(&grid);
        assert_eq!(report.dc_only, vec![NodeId::new(3)]);
        assert_eq!(report.isolated, vec![NodeId::new(4)]);
        assert_eq!(
            report.nodes_to_omit_for_ptdf(),
            vec![NodeId::new(3), NodeId::new(4)]
        );
        assert_eq!(report.diagnostics.issues_by_category("dc-only").count(), 1);
        assert_eq!(report.diagnostics.issues_by_category("isolated").count(), 1);
        assert_eq!(report.islands.island_count(), 1);
    }

    #[test]
    fn test_slack_checks() {
        let mut grid = Grid::new();
        grid.nodes.push(node(1));
        grid.nodes.push(node(2));
        grid.ac_lines.push(ac(1, 1, 2));
        let report = validate_topology(&grid);
        assert_eq!(report.diagnostics.issues_by_category("slack").count(), 1);
        assert!(report.diagnostics.has_errors());

        grid.nodes[0].is_slack = true;
        grid.nodes[1].is_slack = true;
        let report = validate_topology(&grid);
        assert!(!report.diagnostics.has_errors());
        assert_eq!(report.diagnostics.warning_count(), 1);
    }

    #[test]
    fn test_single_node_copper_plate() {
        let mut grid = Grid::new();
        grid.nodes.push(node(1).as_slack());
        let report = validate_topology(&grid);
        assert!(report.safe_for_ptdf(), "{}", report.diagnostics);
        assert!(report.isolated.is_empty());
    }
}
