use clap::Parser;
use trackflow_core::TrackingConfig;
use trackflow_io::cli::{run_check_command, run_track_command, Cli, Commands};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Track {
            graph,
            out,
            initial_energy,
            max_num_paths,
            no_back_arcs,
            no_ordered_nodes,
            partial_updates,
        } => {
            let config = TrackingConfig {
                initial_energy,
                use_back_arcs: !no_back_arcs,
                max_num_paths,
                use_ordered_nodes: !no_ordered_nodes,
                partial_updates,
            };
            run_track_command(graph, out, config)?;
        }
        Commands::Check { graph } => {
            run_check_command(graph)?;
        }
    }
    Ok(())
}
