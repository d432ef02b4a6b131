//! Integration tests for topology validation, PTDF construction and zonal
//! aggregation on small hand-checked grids.

use gridclear_algo::network::NetworkModel;
use gridclear_algo::sparse::{build_gsk, compute_ptdf, EmptyZonePolicy, SusceptanceMatrix};
use gridclear_algo::topology::validate_topology;
use gridclear_core::{
    find_islands, AcLine, DcLine, DcLineId, Grid, GridError, LineId, Node, NodeId, ZoneId,
};

fn node(id: usize, zone: usize) -> Node {
    Node::new(NodeId::new(id), format!("n{id}"), ZoneId::new(zone))
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

/// n1 – n2 over AC, n2 – n3 over DC, n4 without any line.
fn mixed_grid() -> Grid {
    let mut grid = Grid::new();
    grid.nodes.push(node(1, 1).as_slack());
    grid.nodes.push(node(2, 1));
    grid.nodes.push(node(3, 2));
    grid.nodes.push(node(4, 2));
    grid.ac_lines.push(ac(1, 1, 2));
    grid.dc_lines.push(DcLine::new(
        DcLineId::new(1),
        "dc23",
        NodeId::new(2),
        NodeId::new(3),
        100.0,
    ));
    grid
}

#[test]
fn test_dc_only_and_isolated_nodes_are_omitted_from_ptdf() {
    let grid = mixed_grid();
    let report = validate_topology(&grid);

    assert_eq!(report.dc_only, vec![NodeId::new(3)]);
    assert_eq!(report.isolated, vec![NodeId::new(4)]);
    assert!(report
        .diagnostics
        .warnings()
        .any(|w| w.category == "dc-only"));
    assert!(report
        .diagnostics
        .errors()
        .any(|e| e.category == "isolated"));
    assert_eq!(
        report.nodes_to_omit_for_ptdf(),
        vec![NodeId::new(3), NodeId::new(4)]
    );

    let b = SusceptanceMatrix::from_grid(&grid).unwrap();
    let ptdf = compute_ptdf(&b, &grid.slack_nodes(), &report.nodes_to_omit_for_ptdf()).unwrap();
    assert_eq!(ptdf.get(LineId::new(1), NodeId::new(4)), Some(0.0));
    assert_eq!(ptdf.get(LineId::new(1), NodeId::new(3)), Some(0.0));
    assert!(ptdf.values.iter().flatten().all(|v| v.is_finite()));
}

#[test]
fn test_isolated_node_blocks_network_model() {
    let grid = mixed_grid();
    let err = NetworkModel::build(&grid, true).unwrap_err();
    assert!(matches!(err, GridError::Topology(_)));
}

#[test]
fn test_island_count_matches_components() {
    let mut grid = Grid::new();
    for id in 1..=7 {
        grid.nodes.push(node(id, 1));
    }
    grid.nodes[0].is_slack = true;
    // {n1, n2, n3}, {n4, n5}, {n6, n7}
    grid.ac_lines.push(ac(1, 1, 2));
    grid.ac_lines.push(ac(2, 2, 3));
    grid.ac_lines.push(ac(3, 4, 5));
    grid.ac_lines.push(ac(4, 6, 7));

    let islands = find_islands(&grid);
    assert_eq!(islands.island_count(), 3);
    let mut sizes: Vec<usize> = islands.islands.iter().map(|i| i.node_count).collect();
    sizes.sort();
    assert_eq!(sizes, vec![2, 2, 3]);
    let slack_total: usize = islands.islands.iter().map(|i| i.slack_count).sum();
    assert_eq!(slack_total, 1);

    let report = validate_topology(&grid);
    assert!(!report.safe_for_ptdf());
    assert!(report
        .diagnostics
        .errors()
        .any(|e| e.category == "island"));
}

#[test]
fn test_gsk_columns_from_capacity_weights() {
    let zones = [ZoneId::new(1), ZoneId::new(1), ZoneId::new(2), ZoneId::new(2)];
    let gsk = build_gsk(
        &zones,
        &[10.0, 30.0, 50.0, 10.0],
        &[ZoneId::new(1), ZoneId::new(2)],
        EmptyZonePolicy::Flat,
    )
    .unwrap();

    let expected = [[0.25, 0.0], [0.75, 0.0], [0.0, 5.0 / 6.0], [0.0, 1.0 / 6.0]];
    for (row, want) in gsk.values.iter().zip(expected) {
        for (got, want) in row.iter().zip(want) {
            assert!((got - want).abs() < 1e-12, "got {got}, want {want}");
        }
    }
    assert!((gsk.column_sum(0) - 1.0).abs() < 1e-12);
    assert!((gsk.column_sum(1) - 1.0).abs() < 1e-12);
}

#[test]
fn test_zone_to_zone_sensitivity_on_meshed_grid() {
    // triangle n1-n2-n3 plus n4 hanging off n3; zones {n1, n2} and {n3, n4}
    let mut grid = Grid::new();
    grid.nodes.push(node(1, 1).as_slack());
    grid.nodes.push(node(2, 1));
    grid.nodes.push(node(3, 2));
    grid.nodes.push(node(4, 2));
    grid.ac_lines.push(ac(1, 1, 2));
    grid.ac_lines.push(ac(2, 2, 3));
    grid.ac_lines.push(ac(3, 1, 3));
    grid.ac_lines.push(ac(4, 3, 4));

    let model = NetworkModel::build(&grid, true).unwrap();
    let sens = model
        .zonal_sensitivities(&grid, &[1.0, 1.0, 1.0, 1.0], EmptyZonePolicy::Flat)
        .unwrap();

    let pair = sens
        .zone_to_zone
        .pair_index(ZoneId::new(1), ZoneId::new(2))
        .unwrap();
    let reverse = sens
        .zone_to_zone
        .pair_index(ZoneId::new(2), ZoneId::new(1))
        .unwrap();
    for line in 0..grid.ac_lines.len() {
        let forward = sens.zone_to_zone.values[line][pair];
        let backward = sens.zone_to_zone.values[line][reverse];
        assert!((forward + backward).abs() < 1e-12);
    }
    // half of the south shift lands on n4 and must cross the radial n3-n4 line
    assert!((sens.zone_to_zone.values[3][pair].abs() - 0.5).abs() < 1e-9);
}
