//! Column evaluation scheduling
//!
//! Expression cells reference sibling columns through `self.*`; evaluation
//! order is topological over those references, with ties broken by header
//! order. Cycles are reported, never guessed around.

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::BinaryHeap;

/// Topologically order columns given each column's dependency list
/// (`deps[i]` holds the column indices column `i` reads).
///
/// Returns the evaluation order, or `Err` with the columns stuck in cycles.
pub fn evaluation_order(deps: &[Vec<usize>]) -> Result<Vec<usize>, Vec<usize>> {
    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let nodes: Vec<NodeIndex> = (0..deps.len()).map(|i| graph.add_node(i)).collect();
    for (col, col_deps) in deps.iter().enumerate() {
        for &dep in col_deps {
            if dep < deps.len() && dep != col {
                graph.add_edge(nodes[dep], nodes[col], ());
            }
        }
    }

    // Kahn's algorithm with a min-heap so ties resolve in header order
    let mut indegree: Vec<usize> = nodes
        .iter()
        .map(|&n| graph.neighbors_directed(n, Direction::Incoming).count())
        .collect();
    let mut ready: BinaryHeap<std::cmp::Reverse<usize>> = indegree
        .iter()
        .enumerate()
        .filter(|(_, &d)| d == 0)
        .map(|(i, _)| std::cmp::Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(deps.len());
    while let Some(std::cmp::Reverse(col)) = ready.pop() {
        order.push(col);
        for next in graph.neighbors_directed(nodes[col], Direction::Outgoing) {
            let i = graph[next];
            indegree[i] -= 1;
            if indegree[i] == 0 {
                ready.push(std::cmp::Reverse(i));
            }
        }
    }

    if order.len() == deps.len() {
        Ok(order)
    } else {
        let stuck: Vec<usize> = (0..deps.len()).filter(|i| !order.contains(i)).collect();
        Err(stuck)
    }
}
