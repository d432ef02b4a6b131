use crate::{Grid, NodeId};
use petgraph::graph::{NodeIndex, UnGraph};
use std::collections::{HashMap, HashSet};

/// One connected component of the line graph.
#[derive(Debug, Clone)]
pub struct Island {
    pub island_id: usize,
    pub node_count: usize,
    pub slack_count: usize,
    pub members: Vec<NodeId>,
}

/// Island labeling over every node touched by at least one AC or DC line.
///
/// Nodes touched by no line at all are reported separately as `untouched`;
/// they are not islands of their own.
#[derive(Debug, Clone, Default)]
pub struct IslandAnalysis {
    pub islands: Vec<Island>,
    pub untouched: Vec<NodeId>,
}

impl IslandAnalysis {
    pub fn island_count(&self) -> usize {
        self.islands.len()
    }

    pub fn island_of(&self, node: NodeId) -> Option<usize> {
        self.islands
            .iter()
            .find(|island| island.members.contains(&node))
            .map(|island| island.island_id)
    }
}

/// Undirected adjacency of the grid. AC and DC lines both count as edges;
/// lines with an unknown end node are skipped.
pub fn line_graph(grid: &Grid) -> (UnGraph<NodeId, ()>, HashMap<NodeId, NodeIndex>) {
    let mut graph = UnGraph::new_undirected();
    let mut index = HashMap::new();
    for node in &grid.nodes {
        index.insert(node.id, graph.add_node(node.id));
    }

    let endpoints = grid
        .ac_lines
        .iter()
        .map(|l| (l.from_node, l.to_node))
        .chain(grid.dc_lines.iter().map(|l| (l.from_node, l.to_node)));
    for (from, to) in endpoints {
        if let (Some(&a), Some(&b)) = (index.get(&from), index.get(&to)) {
            graph.add_edge(a, b, ());
        }
    }
    (graph, index)
}

/// Labels connected components with an explicit-stack depth-first search so
/// deep chains of nodes cannot overflow the call stack.
pub fn find_islands(grid: &Grid) -> IslandAnalysis {
    let (graph, _) = line_graph(grid);
    let slack: HashSet<NodeId> = grid.slack_nodes().into_iter().collect();

    let mut visited = HashSet::new();
    let mut analysis = IslandAnalysis::default();

    for start in graph.node_indices() {
        if visited.contains(&start) {
            continue;
        }
        if graph.neighbors(start).next().is_none() {
            visited.insert(start);
            analysis.untouched.push(graph[start]);
            continue;
        }

        let mut stack = vec![start];
        let mut members = Vec::new();
        while let Some(node) = stack.pop() {
            if !visited.insert(node) {
                continue;
            }
            members.push(graph[node]);
            stack.extend(graph.neighbors(node).filter(|n| !visited.contains(n)));
        }

        members.sort();
        analysis.islands.push(Island {
            island_id: analysis.islands.len(),
            node_count: members.len(),
            slack_count: members.iter().filter(|n| slack.contains(n)).count(),
            members,
        });
    }
    analysis
}
