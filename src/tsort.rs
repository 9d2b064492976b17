//! Stable topological sort used to linearize seed inheritance.

use std::collections::HashMap;

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    White,
    Grey,
    Black,
}

/// Sort string nodes so that predecessors come first.
///
/// `graph` maps each node to its predecessors, in insertion order.  The
/// result is stable with respect to that order: nodes are visited
/// depth-first in input order, emitting each node after its predecessors.
/// Cycles are tolerated; the edges that close them are skipped and
/// returned as `(node, predecessor)` pairs so the caller can warn.
/// Predecessors that are not themselves nodes impose no ordering.
pub fn topo_sort(graph: &[(String, Vec<String>)]) -> (Vec<String>, Vec<(String, String)>) {
    let mut index: HashMap<&str, usize> = HashMap::new();
    for (i, (name, _)) in graph.iter().enumerate() {
        index.entry(name.as_str()).or_insert(i);
    }

    let mut mark = vec![Mark::White; graph.len()];
    let mut order = Vec::with_capacity(graph.len());
    let mut cycles = Vec::new();

    for root in 0..graph.len() {
        if index[graph[root].0.as_str()] != root || mark[root] != Mark::White {
            continue;
        }
        mark[root] = Mark::Grey;
        let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
        while let Some(frame) = stack.last_mut() {
            let (n, pi) = *frame;
            let preds = &graph[n].1;
            if pi < preds.len() {
                frame.1 += 1;
                if let Some(&p) = index.get(preds[pi].as_str()) {
                    match mark[p] {
                        Mark::White => {
                            mark[p] = Mark::Grey;
                            stack.push((p, 0));
                        }
                        Mark::Grey => cycles.push((graph[n].0.clone(), preds[pi].clone())),
                        Mark::Black => {}
                    }
                }
            } else {
                mark[n] = Mark::Black;
                order.push(graph[n].0.clone());
                stack.pop();
            }
        }
    }

    (order, cycles)
}
