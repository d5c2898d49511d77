pub mod cli;
pub mod model;

pub use model::{
    build_graph, load_problem, save_solution, BuiltGraph, Detection, FlowValue, Link, LinkFlow,
    Problem, Solution,
};
