pub mod error;
pub mod graph;
pub mod residual;
pub mod search;
pub mod flowgraph;
pub mod mincost;

// Core types
pub type F = f64;

pub use error::{Result, TrackingError};
pub use graph::{Arc, ArcId, CostVector, GraphStore, NodeId, NodeRole};
pub use residual::{Direction, ResArcId, ResidualGraph, TokenSet};
pub use search::{PathStep, SearchResult, ShortestPathFinder};
pub use flowgraph::{FlowGraph, FullNode, TrackingConfig, TrackingOutcome};
