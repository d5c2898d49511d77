use std::collections::VecDeque;

use crate::graph::{ArcId, NodeId};
use crate::residual::{base_arc, direction, Direction, ResArcId, ResidualGraph, TokenSet};
use crate::F;

/// One step of an augmenting path: base arc plus the flow delta it receives
/// (`+1` along a forward residual arc, `-1` along a backward one).
pub type PathStep = (ArcId, i64);

/// Outcome of one search: the lowest-cost valid source-to-target path, or a
/// negative cycle, or an empty path with infinite distance when neither
/// exists.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchResult {
    pub path: Vec<PathStep>,
    pub distance: F,
}

impl SearchResult {
    fn none() -> Self {
        Self {
            path: Vec::new(),
            distance: F::INFINITY,
        }
    }
}

/// Bellman-Ford over enabled residual arcs, with token propagation.
///
/// Every node carries one distance label, one predecessor residual arc and
/// the token set provided by the best known path reaching it. An arc whose
/// forbidden tokens intersect the tail's token set never relaxes. Ties keep
/// the earlier predecessor, so results are deterministic in arc id order.
///
/// Buffers persist across searches; with partial updates enabled, labels do
/// too, and only the region downstream of touched nodes is recomputed.
#[derive(Debug)]
pub struct ShortestPathFinder {
    dist: Vec<F>,
    pred: Vec<Option<ResArcId>>,
    tokens: Vec<TokenSet>,
    seeded: bool,
}

impl ShortestPathFinder {
    pub fn new(num_nodes: usize) -> Self {
        Self {
            dist: vec![F::INFINITY; num_nodes],
            pred: vec![None; num_nodes],
            tokens: vec![TokenSet::new(); num_nodes],
            seeded: false,
        }
    }

    /// Finds the cheapest valid path from `source` to any of `targets`.
    ///
    /// `touched` lists the nodes whose incident residual state changed since
    /// the previous search; it is only consulted when `partial` is set.
    pub fn find(
        &mut self,
        res: &ResidualGraph,
        source: NodeId,
        targets: &[NodeId],
        partial: bool,
        touched: &[NodeId],
    ) -> SearchResult {
        self.ensure_size(res.num_nodes());

        let cycle = if partial && self.seeded {
            self.incremental_pass(res, source, touched)
        } else {
            self.full_pass(res, source)
        };
        self.seeded = true;

        if let Some(result) = cycle {
            return result;
        }
        self.best_target_path(res, source, targets)
    }

    /// Drops all persisted labels; the next search starts from scratch.
    pub fn invalidate(&mut self) {
        self.seeded = false;
    }

    fn ensure_size(&mut self, num_nodes: usize) {
        if self.dist.len() != num_nodes {
            self.dist = vec![F::INFINITY; num_nodes];
            self.pred = vec![None; num_nodes];
            self.tokens = vec![TokenSet::new(); num_nodes];
            self.seeded = false;
        }
    }

    /// Round-based relaxation from a clean slate. Returns a negative cycle
    /// if one is found.
    fn full_pass(&mut self, res: &ResidualGraph, source: NodeId) -> Option<SearchResult> {
        let n = res.num_nodes();
        self.dist.fill(F::INFINITY);
        self.pred.fill(None);
        for tokens in &mut self.tokens {
            tokens.clear();
        }
        self.dist[source] = 0.0;

        // With the ordered schedule the acyclic forward structure converges
        // in a single round; the bound only matters once back arcs are in.
        for _round in 0..n.saturating_sub(1) {
            if !self.sweep(res) {
                return None;
            }
        }

        // still relaxable after |V|-1 rounds: some arc closes a negative cycle
        for &u in res.node_order() {
            if !self.dist[u].is_finite() {
                continue;
            }
            for &r in res.out(u) {
                if let Some(v) = self.try_relax(res, r) {
                    return self.extract_cycle(res, v);
                }
            }
        }
        None
    }

    /// One relaxation round over all nodes; true when anything changed.
    fn sweep(&mut self, res: &ResidualGraph) -> bool {
        let mut changed = false;
        if res.use_ordered_nodes() {
            for i in 0..res.node_order().len() {
                let u = res.node_order()[i];
                changed |= self.relax_out_arcs(res, u);
            }
        } else {
            for u in 0..res.num_nodes() {
                changed |= self.relax_out_arcs(res, u);
            }
        }
        changed
    }

    fn relax_out_arcs(&mut self, res: &ResidualGraph, u: NodeId) -> bool {
        if !self.dist[u].is_finite() {
            return false;
        }
        let mut changed = false;
        for &r in res.out(u) {
            changed |= self.try_relax(res, r).is_some();
        }
        changed
    }

    /// Queue-based relaxation seeded from the labels of the previous search.
    ///
    /// Labels whose predecessor chain runs through a touched node are stale
    /// either way (cheaper or dearer), so the whole downstream region is
    /// reset and recomputed from the surviving frontier.
    fn incremental_pass(
        &mut self,
        res: &ResidualGraph,
        source: NodeId,
        touched: &[NodeId],
    ) -> Option<SearchResult> {
        let n = res.num_nodes();

        let mut children: Vec<Vec<NodeId>> = vec![Vec::new(); n];
        for v in 0..n {
            if let Some(r) = self.pred[v] {
                children[res.tail(r)].push(v);
            }
        }

        let mut invalid = vec![false; n];
        let mut stack: Vec<NodeId> = touched.iter().copied().filter(|&v| v != source).collect();
        while let Some(v) = stack.pop() {
            if invalid[v] {
                continue;
            }
            invalid[v] = true;
            stack.extend(children[v].iter().copied().filter(|&c| c != source));
        }
        for v in 0..n {
            if invalid[v] {
                self.dist[v] = F::INFINITY;
                self.pred[v] = None;
                self.tokens[v].clear();
            }
        }
        self.dist[source] = 0.0;
        self.pred[source] = None;
        self.tokens[source].clear();

        let mut queue: VecDeque<NodeId> = VecDeque::new();
        let mut in_queue = vec![false; n];
        let mut relax_count = vec![0u32; n];
        for &u in res.node_order() {
            if self.dist[u].is_finite() {
                queue.push_back(u);
                in_queue[u] = true;
            }
        }

        while let Some(u) = queue.pop_front() {
            in_queue[u] = false;
            if !self.dist[u].is_finite() {
                continue;
            }
            for &r in res.out(u) {
                if let Some(v) = self.try_relax(res, r) {
                    relax_count[v] += 1;
                    if relax_count[v] as usize >= n {
                        if let Some(cycle) = self.extract_cycle(res, v) {
                            return Some(cycle);
                        }
                    }
                    if !in_queue[v] {
                        queue.push_back(v);
                        in_queue[v] = true;
                    }
                }
            }
        }
        None
    }

    /// Relaxes one residual arc; returns its head when the label improved.
    fn try_relax(&mut self, res: &ResidualGraph, r: ResArcId) -> Option<NodeId> {
        if !res.traversable(r) {
            return None;
        }
        let u = res.tail(r);
        if !self.dist[u].is_finite() {
            return None;
        }
        if res.forbidden(r).intersects(&self.tokens[u]) {
            return None;
        }
        let v = res.head(r);
        let candidate = self.dist[u] + res.cost(r);
        if candidate < self.dist[v] {
            self.dist[v] = candidate;
            self.pred[v] = Some(r);
            let mut carried = self.tokens[u].clone();
            carried.union_with(res.provided(r));
            self.tokens[v] = carried;
            Some(v)
        } else {
            None
        }
    }

    fn best_target_path(
        &self,
        res: &ResidualGraph,
        source: NodeId,
        targets: &[NodeId],
    ) -> SearchResult {
        let mut best: Option<NodeId> = None;
        for &t in targets {
            if self.dist[t].is_finite() && best.map_or(true, |b| self.dist[t] < self.dist[b]) {
                best = Some(t);
            }
        }
        let Some(target) = best else {
            return SearchResult::none();
        };

        let mut path = Vec::new();
        let mut node = target;
        let mut steps = 0usize;
        while node != source {
            let Some(r) = self.pred[node] else {
                return SearchResult::none();
            };
            path.push(step_for(r));
            node = res.tail(r);
            steps += 1;
            if steps > res.num_res_arcs() {
                // inconsistent predecessor chain, treat as no path
                return SearchResult::none();
            }
        }
        path.reverse();
        SearchResult {
            path,
            distance: self.dist[target],
        }
    }

    /// Walks predecessors from a node known to sit downstream of a cycle and
    /// returns the cycle, provided its total cost is negative.
    fn extract_cycle(&self, res: &ResidualGraph, from: NodeId) -> Option<SearchResult> {
        let n = res.num_nodes();
        let mut node = from;
        for _ in 0..n {
            node = res.tail(self.pred[node]?);
        }

        let start = node;
        let mut path = Vec::new();
        let mut distance = 0.0;
        loop {
            let r = self.pred[node]?;
            path.push(step_for(r));
            distance += res.cost(r);
            node = res.tail(r);
            if node == start {
                break;
            }
            if path.len() > n {
                return None;
            }
        }
        path.reverse();
        if distance < 0.0 {
            Some(SearchResult { path, distance })
        } else {
            None
        }
    }
}

fn step_for(r: ResArcId) -> PathStep {
    let delta = match direction(r) {
        Direction::Forward => 1,
        Direction::Backward => -1,
    };
    (base_arc(r), delta)
}
