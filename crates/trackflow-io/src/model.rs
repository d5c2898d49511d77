use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use trackflow_core::{ArcId, FlowGraph, FullNode, TrackingOutcome, F};

/// One cell detection hypothesis.
///
/// `costs` is the per-unit cost vector of the detection itself; appearance,
/// disappearance and division are optional per hypothesis.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Detection {
    pub id: u64,
    pub timestep: usize,
    pub costs: Vec<F>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appearance: Option<Vec<F>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disappearance: Option<Vec<F>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub division: Option<F>,
}

/// One linking hypothesis between two detections.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Link {
    pub from: u64,
    pub to: u64,
    pub costs: Vec<F>,
}

/// A whole tracking problem as read from disk.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Problem {
    pub detections: Vec<Detection>,
    pub links: Vec<Link>,
}

/// Flow assigned to one hypothesis, keyed by its problem id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowValue {
    pub id: u64,
    pub value: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkFlow {
    pub from: u64,
    pub to: u64,
    pub value: i64,
}

/// Solver result mapped back onto the problem's hypothesis ids.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Solution {
    pub energy: F,
    pub iterations: usize,
    pub bound_exhausted: bool,
    pub detections: Vec<FlowValue>,
    pub links: Vec<LinkFlow>,
    pub appearances: Vec<FlowValue>,
    pub disappearances: Vec<FlowValue>,
    pub divisions: Vec<FlowValue>,
}

/// A flow graph together with the arc bookkeeping needed to report the
/// solution in terms of the original hypotheses.
#[derive(Debug)]
pub struct BuiltGraph {
    pub graph: FlowGraph,
    nodes: BTreeMap<u64, FullNode>,
    links: Vec<(u64, u64, ArcId)>,
    appearances: BTreeMap<u64, ArcId>,
    disappearances: BTreeMap<u64, ArcId>,
    divisions: BTreeMap<u64, ArcId>,
}

/// Translates a problem document into a flow graph.
///
/// Divisions are wired only after every link is in place, as the engine
/// mirrors the parent's transitions present at that moment.
pub fn build_graph(problem: &Problem) -> Result<BuiltGraph> {
    let mut graph = FlowGraph::new();
    let mut nodes = BTreeMap::new();
    let mut appearances = BTreeMap::new();
    let mut disappearances = BTreeMap::new();
    let mut divisions = BTreeMap::new();
    let mut links = Vec::with_capacity(problem.links.len());

    for detection in &problem.detections {
        if nodes.contains_key(&detection.id) {
            bail!("duplicate detection id {}", detection.id);
        }
        let node = graph
            .add_node(detection.costs.clone(), detection.timestep)
            .with_context(|| format!("detection {}", detection.id))?;
        if let Some(costs) = &detection.appearance {
            let arc = graph
                .add_appearance_arc(node, costs.clone())
                .with_context(|| format!("appearance of detection {}", detection.id))?;
            appearances.insert(detection.id, arc);
        }
        if let Some(costs) = &detection.disappearance {
            let arc = graph
                .add_disappearance_arc(node, costs.clone())
                .with_context(|| format!("disappearance of detection {}", detection.id))?;
            disappearances.insert(detection.id, arc);
        }
        nodes.insert(detection.id, node);
    }

    for link in &problem.links {
        let from = *nodes
            .get(&link.from)
            .with_context(|| format!("link references unknown detection {}", link.from))?;
        let to = *nodes
            .get(&link.to)
            .with_context(|| format!("link references unknown detection {}", link.to))?;
        let arc = graph
            .add_arc(from, to, link.costs.clone())
            .with_context(|| format!("link {} -> {}", link.from, link.to))?;
        links.push((link.from, link.to, arc));
    }

    for detection in &problem.detections {
        if let Some(cost) = detection.division {
            let node = nodes[&detection.id];
            let arc = graph
                .allow_mitosis(node, cost)
                .with_context(|| format!("division of detection {}", detection.id))?;
            divisions.insert(detection.id, arc);
        }
    }

    Ok(BuiltGraph {
        graph,
        nodes,
        links,
        appearances,
        disappearances,
        divisions,
    })
}

impl BuiltGraph {
    /// Maps the solved per-arc flows back onto hypothesis ids.
    pub fn solution(&self, outcome: &TrackingOutcome) -> Solution {
        let flow = |arc: ArcId| self.graph.arc_flow(arc);
        Solution {
            energy: outcome.energy,
            iterations: outcome.iterations,
            bound_exhausted: outcome.bound_exhausted,
            detections: self
                .nodes
                .iter()
                .map(|(&id, node)| FlowValue {
                    id,
                    value: flow(node.arc),
                })
                .collect(),
            links: self
                .links
                .iter()
                .map(|&(from, to, arc)| LinkFlow {
                    from,
                    to,
                    value: flow(arc),
                })
                .collect(),
            appearances: map_flows(&self.appearances, flow),
            disappearances: map_flows(&self.disappearances, flow),
            divisions: map_flows(&self.divisions, flow),
        }
    }
}

fn map_flows(arcs: &BTreeMap<u64, ArcId>, flow: impl Fn(ArcId) -> i64) -> Vec<FlowValue> {
    arcs.iter()
        .map(|(&id, &arc)| FlowValue {
            id,
            value: flow(arc),
        })
        .collect()
}

pub fn load_problem(path: &Path) -> Result<Problem> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading problem from {}", path.display()))?;
    let problem = serde_json::from_str(&json)
        .with_context(|| format!("parsing problem from {}", path.display()))?;
    Ok(problem)
}

pub fn save_solution(path: &Path, solution: &Solution) -> Result<()> {
    let json = serde_json::to_string_pretty(solution)?;
    std::fs::write(path, json)
        .with_context(|| format!("writing solution to {}", path.display()))?;
    Ok(())
}
