use crate::graph::{ArcId, GraphStore, NodeId};
use crate::F;

/// Orientation of a residual arc relative to its base arc.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Residual arc identifier: base arc id interleaved with the direction.
pub type ResArcId = usize;

pub fn res_arc(arc: ArcId, direction: Direction) -> ResArcId {
    arc * 2
        + match direction {
            Direction::Forward => 0,
            Direction::Backward => 1,
        }
}

pub fn base_arc(res: ResArcId) -> ArcId {
    res / 2
}

pub fn direction(res: ResArcId) -> Direction {
    if res % 2 == 0 {
        Direction::Forward
    } else {
        Direction::Backward
    }
}

/// Sorted set of token ids carried along a path.
///
/// Tokens are base-node ids; the sets stay tiny (one entry per division a
/// path commits to), so a sorted vector beats a hash set here.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TokenSet {
    items: Vec<u32>,
}

impl TokenSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn insert(&mut self, token: u32) {
        if let Err(pos) = self.items.binary_search(&token) {
            self.items.insert(pos, token);
        }
    }

    pub fn contains(&self, token: u32) -> bool {
        self.items.binary_search(&token).is_ok()
    }

    /// True when the two sets share at least one token.
    pub fn intersects(&self, other: &TokenSet) -> bool {
        let (mut i, mut j) = (0, 0);
        while i < self.items.len() && j < other.items.len() {
            match self.items[i].cmp(&other.items[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => return true,
            }
        }
        false
    }

    pub fn union_with(&mut self, other: &TokenSet) {
        for &token in &other.items {
            self.insert(token);
        }
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[derive(Clone, Debug)]
struct ResidualArc {
    cost: F,
    capacity: i64,
    enabled: bool,
    provided: TokenSet,
    forbidden: TokenSet,
}

/// Mirror of the base graph with a forward and a backward residual arc per
/// base arc.
///
/// Costs and capacities are refreshed from the outside whenever base flow
/// changes; the enabled bits implement the tracking side constraints. Nodes
/// touched by any refresh or toggle are recorded so a later search can update
/// only the affected region.
#[derive(Debug)]
pub struct ResidualGraph {
    arcs: Vec<ResidualArc>,
    tail: Vec<NodeId>,
    head: Vec<NodeId>,
    out: Vec<Vec<ResArcId>>,
    node_order: Vec<NodeId>,
    use_back_arcs: bool,
    use_ordered_nodes: bool,
    touched: Vec<NodeId>,
}

impl ResidualGraph {
    /// Builds the mirror structure; all residual arcs start disabled with no
    /// capacity until the first refresh.
    pub fn new(store: &GraphStore, use_back_arcs: bool, use_ordered_nodes: bool) -> Self {
        let num_nodes = store.num_nodes();
        let num_res = store.num_arcs() * 2;

        let mut arcs = Vec::with_capacity(num_res);
        let mut tail = Vec::with_capacity(num_res);
        let mut head = Vec::with_capacity(num_res);
        let mut out: Vec<Vec<ResArcId>> = vec![Vec::new(); num_nodes];

        for a in 0..store.num_arcs() {
            let arc = store.arc(a);
            for dir in [Direction::Forward, Direction::Backward] {
                let (t, h) = match dir {
                    Direction::Forward => (arc.source, arc.target),
                    Direction::Backward => (arc.target, arc.source),
                };
                let id = res_arc(a, dir);
                arcs.push(ResidualArc {
                    cost: 0.0,
                    capacity: 0,
                    enabled: false,
                    provided: TokenSet::new(),
                    forbidden: TokenSet::new(),
                });
                tail.push(t);
                head.push(h);
                out[t].push(id);
            }
        }

        let mut node_order: Vec<NodeId> = (0..num_nodes).collect();
        node_order.sort_by_key(|&n| (store.node(n).timestep, n));

        Self {
            arcs,
            tail,
            head,
            out,
            node_order,
            use_back_arcs,
            use_ordered_nodes,
            touched: Vec::new(),
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.out.len()
    }

    pub fn num_res_arcs(&self) -> usize {
        self.arcs.len()
    }

    pub fn tail(&self, res: ResArcId) -> NodeId {
        self.tail[res]
    }

    pub fn head(&self, res: ResArcId) -> NodeId {
        self.head[res]
    }

    pub fn cost(&self, res: ResArcId) -> F {
        self.arcs[res].cost
    }

    pub fn capacity(&self, res: ResArcId) -> i64 {
        self.arcs[res].capacity
    }

    pub fn is_enabled(&self, arc: ArcId, direction: Direction) -> bool {
        self.arcs[res_arc(arc, direction)].enabled
    }

    pub fn provided(&self, res: ResArcId) -> &TokenSet {
        &self.arcs[res].provided
    }

    pub fn forbidden(&self, res: ResArcId) -> &TokenSet {
        &self.arcs[res].forbidden
    }

    /// Outgoing residual arcs of a node, base-arc insertion order.
    pub fn out(&self, node: NodeId) -> &[ResArcId] {
        &self.out[node]
    }

    /// Nodes in the order the search relaxes them each round.
    pub fn node_order(&self) -> &[NodeId] {
        &self.node_order
    }

    pub fn use_ordered_nodes(&self) -> bool {
        self.use_ordered_nodes
    }

    /// Whether the search may traverse this residual arc at all.
    pub fn traversable(&self, res: ResArcId) -> bool {
        let arc = &self.arcs[res];
        if !arc.enabled || arc.capacity <= 0 {
            return false;
        }
        self.use_back_arcs || direction(res) == Direction::Forward
    }

    /// Refreshes residual cost and capacity of one direction of a base arc.
    pub fn update_arc(&mut self, arc: ArcId, direction: Direction, cost: F, capacity: i64) {
        let id = res_arc(arc, direction);
        let entry = &mut self.arcs[id];
        if entry.cost != cost || entry.capacity != capacity {
            entry.cost = cost;
            entry.capacity = capacity;
            self.mark_touched(id);
        }
    }

    pub fn set_enabled(&mut self, arc: ArcId, direction: Direction, enabled: bool) {
        let id = res_arc(arc, direction);
        if self.arcs[id].enabled != enabled {
            self.arcs[id].enabled = enabled;
            self.mark_touched(id);
        }
    }

    /// Enables or disables both directions of a base arc.
    pub fn enable_arc(&mut self, arc: ArcId, enabled: bool) {
        self.set_enabled(arc, Direction::Forward, enabled);
        self.set_enabled(arc, Direction::Backward, enabled);
    }

    pub fn add_provided_token(&mut self, arc: ArcId, direction: Direction, token: u32) {
        self.arcs[res_arc(arc, direction)].provided.insert(token);
    }

    pub fn add_forbidden_token(&mut self, arc: ArcId, direction: Direction, token: u32) {
        self.arcs[res_arc(arc, direction)].forbidden.insert(token);
    }

    /// Endpoints whose incident residual state changed since the last call.
    pub fn take_touched(&mut self) -> Vec<NodeId> {
        let mut nodes = std::mem::take(&mut self.touched);
        nodes.sort_unstable();
        nodes.dedup();
        nodes
    }

    fn mark_touched(&mut self, res: ResArcId) {
        self.touched.push(self.tail[res]);
        self.touched.push(self.head[res]);
    }
}
