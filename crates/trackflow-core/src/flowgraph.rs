use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, TrackingError};
use crate::graph::{ArcId, CostVector, GraphStore, NodeId, NodeRole};
use crate::residual::{Direction, ResidualGraph};
use crate::search::{PathStep, ShortestPathFinder};
use crate::F;

/// Paths costing more than this are not worth augmenting.
const TERMINATION_TOLERANCE: F = 1e-8;

/// Entry and exit node of one detection, joined by its detection arc.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FullNode {
    pub entry: NodeId,
    pub exit: NodeId,
    pub arc: ArcId,
}

/// Knobs for the successive-shortest-paths tracking loop.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Energy of the empty assignment; path costs accumulate on top of it.
    pub initial_energy: F,
    /// Allow the search to traverse backward residual arcs.
    pub use_back_arcs: bool,
    /// Hard cap on augmentation iterations, 0 means unlimited.
    pub max_num_paths: usize,
    /// Relax nodes in timestep order each round.
    pub use_ordered_nodes: bool,
    /// Reuse distance labels across iterations, recomputing only the region
    /// the previous augmentation touched.
    pub partial_updates: bool,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            initial_energy: 0.0,
            use_back_arcs: true,
            max_num_paths: 0,
            use_ordered_nodes: true,
            partial_updates: false,
        }
    }
}

/// What came out of a tracking run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackingOutcome {
    pub energy: F,
    pub iterations: usize,
    /// The iteration cap cut the loop short while improving paths remained.
    pub bound_exhausted: bool,
}

/// Time-expanded flow graph for cell tracking.
///
/// Owns the base graph, the source and target terminals, the set of
/// detection arcs and the parent/duplicate bijection for divisions, plus the
/// residual mirror and search buffers reused across solver iterations.
#[derive(Debug)]
pub struct FlowGraph {
    store: GraphStore,
    source: NodeId,
    targets: Vec<NodeId>,
    intermediate_arcs: BTreeSet<ArcId>,
    parent_to_duplicate: BTreeMap<NodeId, NodeId>,
    duplicate_to_parent: BTreeMap<NodeId, NodeId>,
    residual: Option<ResidualGraph>,
    finder: Option<ShortestPathFinder>,
}

impl Default for FlowGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowGraph {
    pub fn new() -> Self {
        let mut store = GraphStore::new();
        let source = store.add_node(0, NodeRole::Source);
        let target = store.add_node(1, NodeRole::Target);
        Self {
            store,
            source,
            targets: vec![target],
            intermediate_arcs: BTreeSet::new(),
            parent_to_duplicate: BTreeMap::new(),
            duplicate_to_parent: BTreeMap::new(),
            residual: None,
            finder: None,
        }
    }

    pub fn source(&self) -> NodeId {
        self.source
    }

    pub fn targets(&self) -> &[NodeId] {
        &self.targets
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    pub(crate) fn store_mut(&mut self) -> &mut GraphStore {
        &mut self.store
    }

    pub fn is_target(&self, node: NodeId) -> bool {
        self.store.node(node).role == NodeRole::Target
    }

    pub fn duplicate_of(&self, parent_exit: NodeId) -> Option<NodeId> {
        self.parent_to_duplicate.get(&parent_exit).copied()
    }

    pub fn parent_of(&self, duplicate: NodeId) -> Option<NodeId> {
        self.duplicate_to_parent.get(&duplicate).copied()
    }

    pub fn is_intermediate(&self, arc: ArcId) -> bool {
        self.intermediate_arcs.contains(&arc)
    }

    pub fn arc_flow(&self, arc: ArcId) -> i64 {
        self.store.arc(arc).flow()
    }

    /// Per-arc `(source, target, flow)` rows in arc insertion order.
    pub fn arc_flows(&self) -> impl Iterator<Item = (NodeId, NodeId, i64)> + '_ {
        (0..self.store.num_arcs()).map(|a| {
            let arc = self.store.arc(a);
            (arc.source, arc.target, arc.flow())
        })
    }

    /// Clears all flow and solver state, keeping the graph structure.
    pub fn reset_flows(&mut self) {
        self.store.reset_flows();
        self.residual = None;
        self.finder = None;
    }

    /// Adds one detection at `timestep` with the given cost vector.
    pub fn add_node(&mut self, costs: CostVector, timestep: usize) -> Result<FullNode> {
        if costs.is_empty() {
            return Err(TrackingError::EmptyCostVector);
        }
        let entry = self.store.add_node(timestep * 2 + 1, NodeRole::DetectionEntry);
        let exit = self.store.add_node(timestep * 2 + 2, NodeRole::DetectionExit);
        let arc = self.store.add_arc(entry, exit, costs)?;
        self.intermediate_arcs.insert(arc);

        // terminals stay strictly later than every detection node
        if timestep * 2 + 2 >= self.store.node(self.targets[0]).timestep {
            for i in 0..self.targets.len() {
                let t = self.targets[i];
                self.store.set_timestep(t, timestep * 2 + 3);
            }
        }

        Ok(FullNode { entry, exit, arc })
    }

    /// Adds a transition arc between two detections.
    pub fn add_arc(&mut self, from: FullNode, to: FullNode, costs: CostVector) -> Result<ArcId> {
        self.store.add_arc(from.exit, to.entry, costs)
    }

    /// Adds an appearance arc, letting `node` start a track.
    pub fn add_appearance_arc(&mut self, node: FullNode, costs: CostVector) -> Result<ArcId> {
        self.store.add_arc(self.source, node.entry, costs)
    }

    /// Adds a disappearance arc, letting `node` end a track.
    pub fn add_disappearance_arc(&mut self, node: FullNode, costs: CostVector) -> Result<ArcId> {
        self.store.add_arc(node.exit, self.targets[0], costs)
    }

    /// Sets up the division duplicate for `parent` and returns the division
    /// arc.
    ///
    /// The duplicate mirrors the non-terminal out-arcs present right now at
    /// unit capacity, so every transition of the parent must be added before
    /// this call; calling too early is rejected.
    pub fn allow_mitosis(&mut self, parent: FullNode, division_cost: F) -> Result<ArcId> {
        let mirrored: Vec<(NodeId, F)> = self
            .store
            .out_arcs(parent.exit)
            .iter()
            .map(|&a| self.store.arc(a))
            .filter(|arc| !self.is_target(arc.target))
            .map(|arc| (arc.target, arc.costs()[0]))
            .collect();
        if mirrored.is_empty() {
            return Err(TrackingError::MitosisWithoutOutArcs(parent.exit));
        }

        let timestep = self.store.node(parent.exit).timestep;
        let duplicate = self.store.add_node(timestep, NodeRole::DivisionDuplicate);
        let division_arc = self
            .store
            .add_arc(self.source, duplicate, vec![division_cost])?;
        for (target, first_cost) in mirrored {
            self.store.add_arc(duplicate, target, vec![first_cost])?;
        }

        self.parent_to_duplicate.insert(parent.exit, duplicate);
        self.duplicate_to_parent.insert(duplicate, parent.exit);
        Ok(division_arc)
    }

    /// Runs the constrained successive-shortest-paths loop.
    ///
    /// Each iteration finds the most negative valid path (or cycle) in the
    /// residual graph, pushes one unit of flow along it and refreshes the
    /// side-constraint state, until no improving path remains or the
    /// iteration cap is hit.
    pub fn max_flow_min_cost_tracking(&mut self, config: &TrackingConfig) -> Result<TrackingOutcome> {
        let mut residual = match self.residual.take() {
            Some(residual) => residual,
            None => self.build_residual(config)?,
        };
        let mut finder = self
            .finder
            .take()
            .unwrap_or_else(|| ShortestPathFinder::new(self.store.num_nodes()));

        info!(
            nodes = self.store.num_nodes(),
            arcs = self.store.num_arcs(),
            "starting tracking"
        );

        let mut energy = config.initial_energy;
        let mut iterations = 0usize;
        let mut bound_exhausted = false;

        loop {
            let touched = residual.take_touched();
            let result = finder.find(
                &residual,
                self.source,
                &self.targets,
                config.partial_updates,
                &touched,
            );
            if result.path.is_empty() || result.distance > -TERMINATION_TOLERANCE {
                break;
            }

            self.augment_unit_flow(&mut residual, &result.path)?;
            self.update_enabled_arcs(&mut residual, &result.path);
            energy += result.distance;
            iterations += 1;
            debug!(
                iteration = iterations,
                path_len = result.path.len(),
                path_cost = result.distance,
                energy,
                "augmented one unit of flow"
            );

            if config.max_num_paths > 0 && iterations >= config.max_num_paths {
                let touched = residual.take_touched();
                let probe = finder.find(
                    &residual,
                    self.source,
                    &self.targets,
                    config.partial_updates,
                    &touched,
                );
                bound_exhausted =
                    !probe.path.is_empty() && probe.distance < -TERMINATION_TOLERANCE;
                break;
            }
        }

        info!(iterations, energy, bound_exhausted, "tracking finished");

        self.residual = Some(residual);
        self.finder = Some(finder);
        Ok(TrackingOutcome {
            energy,
            iterations,
            bound_exhausted,
        })
    }

    /// Builds the residual mirror, seeds division tokens and applies the
    /// initial enablement pass.
    fn build_residual(&mut self, config: &TrackingConfig) -> Result<ResidualGraph> {
        let mut residual =
            ResidualGraph::new(&self.store, config.use_back_arcs, config.use_ordered_nodes);

        for a in 0..self.store.num_arcs() {
            self.refresh_arc(&mut residual, a)?;
            residual.enable_arc(a, true);

            let target = self.store.arc(a).target;
            if let Some(&parent) = self.duplicate_to_parent.get(&target) {
                // taking a division arc commits the path to dividing the parent
                residual.add_provided_token(a, Direction::Forward, parent as u32);
            } else if self.parent_to_duplicate.contains_key(&target) {
                // a committed division must not undo the mother's own flow
                residual.add_forbidden_token(a, Direction::Backward, target as u32);
            }
        }

        // initial enablement, divisions start closed
        for a in 0..self.store.num_arcs() {
            self.update_enabled_arc(&mut residual, a);
        }

        self.finder = None;
        Ok(residual)
    }

    /// Re-derives both residual arcs of `arc` from its current flow.
    fn refresh_arc(&self, residual: &mut ResidualGraph, arc: ArcId) -> Result<()> {
        let entry = self.store.arc(arc);
        let flow = entry.flow();
        let capacity = entry.capacity();
        if flow < 0 {
            return Err(TrackingError::NegativeFlow { arc, flow });
        }
        if flow > capacity {
            return Err(TrackingError::CapacityExceeded {
                arc,
                flow,
                capacity,
            });
        }

        residual.update_arc(
            arc,
            Direction::Forward,
            self.store.arc_cost(arc, flow),
            capacity - flow,
        );
        residual.update_arc(
            arc,
            Direction::Backward,
            -self.store.arc_cost(arc, flow - 1),
            flow,
        );
        Ok(())
    }

    /// First out-arc of `node` ending at `target`, if any.
    fn matching_out_arc(&self, node: NodeId, target: NodeId) -> Option<ArcId> {
        self.store
            .out_arcs(node)
            .iter()
            .copied()
            .find(|&a| self.store.arc(a).target == target)
    }

    /// Pushes one unit of flow along a path or cycle, keeping parent and
    /// duplicate arc flows coupled.
    fn augment_unit_flow(&mut self, residual: &mut ResidualGraph, path: &[PathStep]) -> Result<()> {
        for &(arc, delta) in path {
            self.store.add_flow(arc, delta);
            self.refresh_arc(residual, arc)?;

            let source = self.store.arc(arc).source;
            let target = self.store.arc(arc).target;

            if let Some(&parent) = self.duplicate_to_parent.get(&source) {
                // flow through the duplicate also counts on the mother's arc
                if let Some(mate) = self.matching_out_arc(parent, target) {
                    self.store.add_flow(mate, delta);
                    self.refresh_arc(residual, mate)?;
                }
                continue;
            }

            if let Some(&duplicate) = self.parent_to_duplicate.get(&source) {
                if let Some(mate) = self.matching_out_arc(duplicate, target) {
                    // mirror the mother's flow, capped at the duplicate's unit
                    let coupled = self.store.arc(arc).flow().min(1);
                    self.store.set_flow(mate, coupled);
                    self.refresh_arc(residual, mate)?;
                }
            }
        }
        Ok(())
    }

    fn update_enabled_arcs(&self, residual: &mut ResidualGraph, path: &[PathStep]) {
        for &(arc, _) in path {
            self.update_enabled_arc(residual, arc);
        }
    }

    /// Applies the side-constraint state machine to one arc after its flow
    /// (or a neighbour's) changed.
    fn update_enabled_arc(&self, residual: &mut ResidualGraph, arc: ArcId) {
        let source = self.store.arc(arc).source;
        let target = self.store.arc(arc).target;

        if self.parent_to_duplicate.contains_key(&source) && !self.is_target(target) {
            // a division opens up only while the mother carries exactly one unit
            let duplicate = self.parent_to_duplicate[&source];
            let open = self.store.sum_in_flow(source) == 1;
            self.toggle_division(residual, duplicate, open);
        } else if let Some(&parent) = self.duplicate_to_parent.get(&target) {
            if self.store.arc(arc).flow() == 1 {
                // active division locks the mother in place
                self.toggle_out_arcs(residual, parent, false);
            } else {
                // division undone, the mother may move again but not vanish
                self.toggle_out_arcs_but_targets(residual, parent, true);
            }
        } else if source == self.source {
            // appearance in use shuts every other way into the detection
            self.toggle_in_arcs_but(residual, target, source, self.store.arc(arc).flow() == 0);
        } else if self.is_target(target) {
            // disappearance in use shuts every other way out of the detection
            self.toggle_out_arcs_but(residual, source, target, self.store.arc(arc).flow() == 0);
        }

        if source != self.source && !self.is_target(target) && !self.intermediate_arcs.contains(&arc)
        {
            // transition arcs control whether their endpoints may still
            // appear or disappear
            self.toggle_disappearance_arc(residual, source, self.store.sum_out_flow(source) == 0);
            self.toggle_appearance_arc(residual, target, self.store.sum_in_flow(target) == 0);
        }
    }

    /// Opens or closes a division by toggling the duplicate's mirror arcs.
    ///
    /// The division arc itself stays enabled throughout: with every mirror
    /// closed the duplicate is a dead end no path can cross, and while a
    /// division carries flow its backward arc must stay available for
    /// undoing it.
    fn toggle_division(&self, residual: &mut ResidualGraph, duplicate: NodeId, enabled: bool) {
        for &a in self.store.out_arcs(duplicate) {
            residual.enable_arc(a, enabled);
        }
    }

    fn toggle_out_arcs(&self, residual: &mut ResidualGraph, node: NodeId, enabled: bool) {
        for &a in self.store.out_arcs(node) {
            residual.enable_arc(a, enabled);
        }
    }

    fn toggle_out_arcs_but_targets(&self, residual: &mut ResidualGraph, node: NodeId, enabled: bool) {
        for &a in self.store.out_arcs(node) {
            if !self.is_target(self.store.arc(a).target) {
                residual.enable_arc(a, enabled);
            }
        }
    }

    fn toggle_out_arcs_but(
        &self,
        residual: &mut ResidualGraph,
        node: NodeId,
        excluded_target: NodeId,
        enabled: bool,
    ) {
        for &a in self.store.out_arcs(node) {
            if self.store.arc(a).target != excluded_target {
                residual.enable_arc(a, enabled);
            }
        }
    }

    fn toggle_in_arcs_but(
        &self,
        residual: &mut ResidualGraph,
        node: NodeId,
        excluded_source: NodeId,
        enabled: bool,
    ) {
        for &a in self.store.in_arcs(node) {
            if self.store.arc(a).source != excluded_source {
                residual.enable_arc(a, enabled);
            }
        }
    }

    fn toggle_appearance_arc(&self, residual: &mut ResidualGraph, node: NodeId, enabled: bool) {
        for &a in self.store.in_arcs(node) {
            if self.store.arc(a).source == self.source {
                residual.enable_arc(a, enabled);
            }
        }
    }

    fn toggle_disappearance_arc(&self, residual: &mut ResidualGraph, node: NodeId, enabled: bool) {
        for &a in self.store.out_arcs(node) {
            if self.is_target(self.store.arc(a).target) {
                residual.enable_arc(a, enabled);
            }
        }
    }

    /// Forces every duplicate mirror arc to `min(parent flow, 1)`.
    ///
    /// Callers of the reference solver run this over its raw output; the
    /// tracking loop keeps the coupling intact on its own and never needs it.
    pub fn synchronize_division_flows(&mut self) {
        let pairs: Vec<(NodeId, NodeId)> = self
            .parent_to_duplicate
            .iter()
            .map(|(&parent, &duplicate)| (parent, duplicate))
            .collect();
        for (parent, duplicate) in pairs {
            let parent_arcs: Vec<ArcId> = self.store.out_arcs(parent).to_vec();
            for arc in parent_arcs {
                let target = self.store.arc(arc).target;
                if let Some(mate) = self.matching_out_arc(duplicate, target) {
                    let flow = self.store.arc(arc).flow().max(self.store.arc(mate).flow());
                    self.store.set_flow(mate, flow.min(1));
                    self.store.set_flow(arc, flow);
                }
            }
        }
    }
}
