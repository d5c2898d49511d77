use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use trackflow_core::TrackingConfig;

use crate::model::{build_graph, load_problem, save_solution};

#[derive(Parser)]
#[command(name = "trackflow")]
#[command(about = "Cell tracking as constrained successive-shortest-paths min-cost flow")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Solve a tracking problem with the constrained tracking loop
    Track {
        /// Problem document (JSON)
        #[arg(long)]
        graph: PathBuf,

        /// Where to write the solution document; stdout if omitted
        #[arg(long)]
        out: Option<PathBuf>,

        /// Energy of the empty assignment
        #[arg(long, default_value_t = 0.0)]
        initial_energy: f64,

        /// Cap on augmentation iterations, 0 means unlimited
        #[arg(long, default_value_t = 0)]
        max_num_paths: usize,

        /// Restrict the search to forward residual arcs
        #[arg(long)]
        no_back_arcs: bool,

        /// Relax nodes in plain id order instead of timestep order
        #[arg(long)]
        no_ordered_nodes: bool,

        /// Reuse shortest-path labels across iterations
        #[arg(long)]
        partial_updates: bool,
    },

    /// Cross-check a problem with the plain max-flow-then-min-cost solver
    Check {
        /// Problem document (JSON); all cost vectors must be single scalars
        #[arg(long)]
        graph: PathBuf,
    },
}

pub fn run_track_command(
    graph: PathBuf,
    out: Option<PathBuf>,
    config: TrackingConfig,
) -> Result<()> {
    let problem = load_problem(&graph)?;
    let mut built = build_graph(&problem)?;
    let outcome = built.graph.max_flow_min_cost_tracking(&config)?;

    info!(
        energy = outcome.energy,
        iterations = outcome.iterations,
        bound_exhausted = outcome.bound_exhausted,
        "tracking done"
    );

    let solution = built.solution(&outcome);
    match out {
        Some(path) => save_solution(&path, &solution)?,
        None => println!("{}", serde_json::to_string_pretty(&solution)?),
    }
    Ok(())
}

pub fn run_check_command(graph: PathBuf) -> Result<()> {
    let problem = load_problem(&graph)?;
    let mut built = build_graph(&problem)?;
    let total_cost = built.graph.max_flow()?;
    built.graph.synchronize_division_flows();

    println!("total cost: {total_cost}");
    Ok(())
}
