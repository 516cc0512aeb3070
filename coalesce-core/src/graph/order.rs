//! Topological Ordering
//!
//! Stable topological sorting over dense vertex indices.
//!
//! # Algorithm
//!
//! Kahn's algorithm, with the ready set kept as a min-heap so that whenever
//! several vertices are ready the smallest index goes first. An input that is
//! already in topological order therefore comes back unchanged, and every
//! other input gets a reproducible order.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use indexmap::IndexSet;

/// Sort `count` vertices so that every vertex comes after its dependencies.
///
/// `dependencies(v)` yields the vertices `v` depends on; duplicates are
/// ignored. On success returns the vertices in order. If the dependencies
/// contain a cycle, returns the vertices that could not be scheduled.
pub(crate) fn topological_order<F, I>(count: usize, mut dependencies: F) -> Result<Vec<usize>, Vec<usize>>
where
    F: FnMut(usize) -> I,
    I: IntoIterator<Item = usize>,
{
    let mut in_degree = vec![0usize; count];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];

    // Calculate in-degrees, counting each distinct dependency once
    for vertex in 0..count {
        let deps: IndexSet<usize> = dependencies(vertex).into_iter().collect();
        in_degree[vertex] = deps.len();
        for dep in deps {
            dependents[dep].push(vertex);
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = (0..count)
        .filter(|&v| in_degree[v] == 0)
        .map(Reverse)
        .collect();
    let mut order = Vec::with_capacity(count);

    while let Some(Reverse(vertex)) = ready.pop() {
        order.push(vertex);
        for &dependent in &dependents[vertex] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.push(Reverse(dependent));
            }
        }
    }

    if order.len() != count {
        let stuck = (0..count).filter(|&v| in_degree[v] > 0).collect();
        return Err(stuck);
    }

    Ok(order)
}
