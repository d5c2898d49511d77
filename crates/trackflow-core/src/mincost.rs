//! Reference solver: plain max-flow value, then min-cost routing of exactly
//! that supply. Serves as a baseline for the constrained tracking loop on
//! inputs whose cost vectors are single scalars.

use std::collections::VecDeque;

use tracing::info;

use crate::error::{Result, TrackingError};
use crate::flowgraph::FlowGraph;
use crate::F;

#[derive(Clone, Debug)]
struct Edge {
    to: usize,
    capacity: i64,
    cost: F,
    flow: i64,
    rev: usize,
}

impl Edge {
    fn residual(&self) -> i64 {
        self.capacity - self.flow
    }
}

/// Residual network with twin-paired edges.
#[derive(Clone)]
struct ReferenceNetwork {
    graph: Vec<Vec<Edge>>,
}

impl ReferenceNetwork {
    fn new(num_nodes: usize) -> Self {
        Self {
            graph: vec![Vec::new(); num_nodes],
        }
    }

    /// Adds a forward edge and its zero-capacity twin; returns the slot of
    /// the forward edge.
    fn add_edge(&mut self, from: usize, to: usize, capacity: i64, cost: F) -> (usize, usize) {
        let forward_slot = self.graph[from].len();
        let backward_slot = self.graph[to].len();
        self.graph[from].push(Edge {
            to,
            capacity,
            cost,
            flow: 0,
            rev: backward_slot,
        });
        self.graph[to].push(Edge {
            to: from,
            capacity: 0,
            cost: -cost,
            flow: 0,
            rev: forward_slot,
        });
        (from, forward_slot)
    }

    /// Maximum flow value from `source` to `target`, blocking-flow style.
    fn max_flow(&mut self, source: usize, target: usize) -> i64 {
        let n = self.graph.len();
        let mut total = 0;
        let mut level = vec![-1i64; n];
        while self.level_bfs(source, target, &mut level) {
            let mut next = vec![0usize; n];
            loop {
                let pushed = self.blocking_dfs(source, target, i64::MAX, &level, &mut next);
                if pushed == 0 {
                    break;
                }
                total += pushed;
            }
        }
        total
    }

    fn level_bfs(&self, source: usize, target: usize, level: &mut [i64]) -> bool {
        level.fill(-1);
        level[source] = 0;
        let mut queue = VecDeque::new();
        queue.push_back(source);
        while let Some(u) = queue.pop_front() {
            for edge in &self.graph[u] {
                if edge.residual() > 0 && level[edge.to] == -1 {
                    level[edge.to] = level[u] + 1;
                    queue.push_back(edge.to);
                }
            }
        }
        level[target] != -1
    }

    fn blocking_dfs(
        &mut self,
        u: usize,
        target: usize,
        limit: i64,
        level: &[i64],
        next: &mut [usize],
    ) -> i64 {
        if u == target {
            return limit;
        }
        while next[u] < self.graph[u].len() {
            let slot = next[u];
            let (residual, to, rev) = {
                let edge = &self.graph[u][slot];
                (edge.residual(), edge.to, edge.rev)
            };
            if residual > 0 && level[to] == level[u] + 1 {
                let pushed = self.blocking_dfs(to, target, limit.min(residual), level, next);
                if pushed > 0 {
                    self.graph[u][slot].flow += pushed;
                    self.graph[to][rev].flow -= pushed;
                    return pushed;
                }
            }
            next[u] += 1;
        }
        0
    }

    /// Routes exactly `supply` units at minimum cost via successive shortest
    /// paths; errors out if the supply cannot be met.
    fn min_cost_route(&mut self, source: usize, target: usize, supply: i64) -> Result<F> {
        let n = self.graph.len();
        let mut total_cost = 0.0;
        let mut remaining = supply;

        while remaining > 0 {
            // queue-based Bellman-Ford; the base graph is acyclic and the
            // residual stays free of negative cycles along shortest paths
            let mut dist = vec![F::INFINITY; n];
            let mut prev: Vec<Option<(usize, usize)>> = vec![None; n];
            let mut in_queue = vec![false; n];
            let mut queue = VecDeque::new();
            dist[source] = 0.0;
            queue.push_back(source);
            in_queue[source] = true;

            while let Some(u) = queue.pop_front() {
                in_queue[u] = false;
                for (slot, edge) in self.graph[u].iter().enumerate() {
                    if edge.residual() > 0 && dist[u] + edge.cost < dist[edge.to] {
                        dist[edge.to] = dist[u] + edge.cost;
                        prev[edge.to] = Some((u, slot));
                        if !in_queue[edge.to] {
                            queue.push_back(edge.to);
                            in_queue[edge.to] = true;
                        }
                    }
                }
            }

            if prev[target].is_none() {
                return Err(TrackingError::Infeasible {
                    supply,
                    missing: remaining,
                });
            }

            let mut bottleneck = remaining;
            let mut node = target;
            while let Some((u, slot)) = prev[node] {
                bottleneck = bottleneck.min(self.graph[u][slot].residual());
                node = u;
            }

            let mut node = target;
            while let Some((u, slot)) = prev[node] {
                let rev = self.graph[u][slot].rev;
                self.graph[u][slot].flow += bottleneck;
                let to = self.graph[u][slot].to;
                self.graph[to][rev].flow -= bottleneck;
                node = u;
            }

            total_cost += bottleneck as F * dist[target];
            remaining -= bottleneck;
        }

        Ok(total_cost)
    }
}

impl FlowGraph {
    /// Max-flow-then-min-cost reference solve.
    ///
    /// Requires every cost vector to be a single scalar. Finds the maximum
    /// flow value from source to target, routes exactly that supply at
    /// minimum cost, writes the resulting per-arc flows into the store and
    /// returns the total cost. Ignores division coupling and the
    /// (dis)appearance side constraints; see `synchronize_division_flows`
    /// for repairing duplicate arcs afterwards.
    pub fn max_flow(&mut self) -> Result<F> {
        for arc in 0..self.store().num_arcs() {
            let entries = self.store().arc(arc).costs().len();
            if entries != 1 {
                return Err(TrackingError::NonUnitCosts { arc, entries });
            }
        }

        self.reset_flows();

        let num_nodes = self.store().num_nodes();
        let mut network = ReferenceNetwork::new(num_nodes);
        let mut slots = Vec::with_capacity(self.store().num_arcs());
        for arc in 0..self.store().num_arcs() {
            let entry = self.store().arc(arc);
            slots.push(network.add_edge(
                entry.source,
                entry.target,
                entry.capacity(),
                entry.costs()[0],
            ));
        }

        let source = self.source();
        let target = self.targets()[0];

        let value = network.clone().max_flow(source, target);
        info!(value, "max flow value found");

        let total_cost = network.min_cost_route(source, target, value)?;

        for (arc, (from, slot)) in slots.into_iter().enumerate() {
            self.store_mut().set_flow(arc, network.graph[from][slot].flow);
        }

        info!(total_cost, "min cost routing finished");
        Ok(total_cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_flow_value_diamond() {
        let mut network = ReferenceNetwork::new(4);
        network.add_edge(0, 1, 2, 0.0);
        network.add_edge(0, 2, 1, 0.0);
        network.add_edge(1, 3, 1, 0.0);
        network.add_edge(2, 3, 2, 0.0);
        assert_eq!(network.max_flow(0, 3), 2);
    }

    #[test]
    fn test_min_cost_prefers_cheap_path() {
        let mut network = ReferenceNetwork::new(4);
        network.add_edge(0, 1, 1, 1.0);
        network.add_edge(0, 2, 1, 4.0);
        network.add_edge(1, 3, 1, 1.0);
        network.add_edge(2, 3, 1, 1.0);

        let cost = network.min_cost_route(0, 3, 1).unwrap();
        assert_eq!(cost, 2.0);
    }

    #[test]
    fn test_min_cost_infeasible_supply() {
        let mut network = ReferenceNetwork::new(2);
        network.add_edge(0, 1, 1, 1.0);
        let err = network.min_cost_route(0, 1, 2).unwrap_err();
        assert_eq!(
            err,
            TrackingError::Infeasible {
                supply: 2,
                missing: 1
            }
        );
    }

    #[test]
    fn test_negative_costs_route_cheapest_first() {
        let mut network = ReferenceNetwork::new(3);
        network.add_edge(0, 1, 2, -2.0);
        network.add_edge(1, 2, 1, -3.0);
        network.add_edge(1, 2, 1, 5.0);

        let cost = network.min_cost_route(0, 2, 2).unwrap();
        assert_eq!(cost, (-2.0 - 3.0) + (-2.0 + 5.0));
    }
}
