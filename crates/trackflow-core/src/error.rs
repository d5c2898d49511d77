use thiserror::Error;

use crate::graph::{ArcId, NodeId};

/// Errors raised while building a tracking graph or running a solver.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum TrackingError {
    #[error("cost vector must hold at least one entry")]
    EmptyCostVector,

    #[error("node {0} has no outgoing transition arcs yet, add them before allowing mitosis")]
    MitosisWithoutOutArcs(NodeId),

    #[error("arc {arc} carries negative flow {flow}")]
    NegativeFlow { arc: ArcId, flow: i64 },

    #[error("arc {arc} carries {flow} units but its capacity is {capacity}")]
    CapacityExceeded { arc: ArcId, flow: i64, capacity: i64 },

    #[error("reference solver requires unit cost vectors, arc {arc} has {entries} entries")]
    NonUnitCosts { arc: ArcId, entries: usize },

    #[error("could not route {missing} of {supply} supply units to the target")]
    Infeasible { supply: i64, missing: i64 },
}

pub type Result<T, E = TrackingError> = std::result::Result<T, E>;
