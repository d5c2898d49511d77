use approx::assert_relative_eq;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use trackflow_core::{FlowGraph, FullNode, NodeRole, TrackingConfig};

/// Checks every structural flow invariant on a solved graph.
fn check_invariants(graph: &FlowGraph) {
    let store = graph.store();

    for a in 0..store.num_arcs() {
        let arc = store.arc(a);
        assert!(
            arc.flow() >= 0 && arc.flow() <= arc.capacity(),
            "arc {a} flow {} out of [0, {}]",
            arc.flow(),
            arc.capacity()
        );
    }

    for n in 0..store.num_nodes() {
        let role = store.node(n).role;
        if matches!(
            role,
            NodeRole::Source | NodeRole::Target | NodeRole::DivisionDuplicate
        ) {
            continue;
        }

        // mirror arcs carry bookkeeping copies of the mother's flow, so they
        // are excluded from what actually arrives at a node
        let real_in: i64 = store
            .in_arcs(n)
            .iter()
            .map(|&a| store.arc(a))
            .filter(|arc| graph.parent_of(arc.source).is_none())
            .map(|arc| arc.flow())
            .sum();
        let out = store.sum_out_flow(n);

        if let Some(duplicate) = graph.duplicate_of(n) {
            // a dividing exit node drains both its own and its duplicate's supply
            let division_in = store.sum_in_flow(duplicate);
            assert_eq!(
                real_in + division_in,
                out,
                "coupled conservation violated at parent {n}"
            );
        } else {
            assert_eq!(real_in, out, "conservation violated at node {n}");
        }
    }

    // duplicate arcs mirror the mother's, capped at one unit
    for n in 0..store.num_nodes() {
        let Some(parent) = graph.parent_of(n) else {
            continue;
        };
        for &mirror in store.out_arcs(n) {
            let target = store.arc(mirror).target;
            let mate = store
                .out_arcs(parent)
                .iter()
                .copied()
                .find(|&a| store.arc(a).target == target)
                .expect("mirror arc without a parent counterpart");
            assert_eq!(
                store.arc(mirror).flow(),
                store.arc(mate).flow().min(1),
                "division coupling violated between arcs {mirror} and {mate}"
            );
        }
    }

    // appearance and disappearance exclusivity
    for n in 0..store.num_nodes() {
        match store.node(n).role {
            NodeRole::DetectionEntry => {
                let appearance: i64 = store
                    .in_arcs(n)
                    .iter()
                    .map(|&a| store.arc(a))
                    .filter(|arc| arc.source == graph.source())
                    .map(|arc| arc.flow())
                    .sum();
                let others: i64 = store
                    .in_arcs(n)
                    .iter()
                    .map(|&a| store.arc(a))
                    .filter(|arc| arc.source != graph.source())
                    .map(|arc| arc.flow())
                    .sum();
                assert!(
                    appearance == 0 || others == 0,
                    "partial appearance at node {n}"
                );
            }
            NodeRole::DetectionExit => {
                let disappearance: i64 = store
                    .out_arcs(n)
                    .iter()
                    .map(|&a| store.arc(a))
                    .filter(|arc| graph.is_target(arc.target))
                    .map(|arc| arc.flow())
                    .sum();
                let others: i64 = store
                    .out_arcs(n)
                    .iter()
                    .map(|&a| store.arc(a))
                    .filter(|arc| !graph.is_target(arc.target))
                    .map(|arc| arc.flow())
                    .sum();
                assert!(
                    disappearance == 0 || others == 0,
                    "partial disappearance at node {n}"
                );
            }
            _ => {}
        }
    }
}

/// Total assignment cost recomputed from the per-arc flows; duplicate mirror
/// arcs are skipped because the matching parent arc already carries their
/// units.
fn flow_cost(graph: &FlowGraph) -> f64 {
    let store = graph.store();
    (0..store.num_arcs())
        .filter(|&a| graph.parent_of(store.arc(a).source).is_none())
        .map(|a| {
            let arc = store.arc(a);
            (0..arc.flow()).map(|unit| store.arc_cost(a, unit)).sum::<f64>()
        })
        .sum()
}

fn division_scenario() -> FlowGraph {
    let mut graph = FlowGraph::new();
    let parent = graph.add_node(vec![-2.0], 0).unwrap();
    let first = graph.add_node(vec![-3.0], 1).unwrap();
    let second = graph.add_node(vec![-3.0], 1).unwrap();
    graph.add_appearance_arc(parent, vec![1.0]).unwrap();
    graph.add_disappearance_arc(first, vec![1.0]).unwrap();
    graph.add_disappearance_arc(second, vec![1.0]).unwrap();
    graph.add_arc(parent, first, vec![0.0]).unwrap();
    graph.add_arc(parent, second, vec![0.0]).unwrap();
    graph.allow_mitosis(parent, -4.0).unwrap();
    graph
}

fn random_tracking_graph(seed: u64, timesteps: usize, per_step: usize) -> FlowGraph {
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let mut graph = FlowGraph::new();

    let mut layers: Vec<Vec<FullNode>> = Vec::new();
    for t in 0..timesteps {
        let mut layer = Vec::new();
        for _ in 0..per_step {
            let cell = graph
                .add_node(vec![rng.gen_range(-8.0..2.0)], t)
                .unwrap();
            graph
                .add_appearance_arc(cell, vec![rng.gen_range(0.5..2.0)])
                .unwrap();
            graph
                .add_disappearance_arc(cell, vec![rng.gen_range(0.5..2.0)])
                .unwrap();
            layer.push(cell);
        }
        layers.push(layer);
    }

    for t in 0..timesteps.saturating_sub(1) {
        for i in 0..layers[t].len() {
            for j in 0..layers[t + 1].len() {
                if rng.gen_bool(0.6) {
                    graph
                        .add_arc(layers[t][i], layers[t + 1][j], vec![rng.gen_range(-4.0..1.0)])
                        .unwrap();
                }
            }
        }
    }

    // divisions only after all transitions of the parent are in place
    for t in 0..timesteps.saturating_sub(1) {
        for i in 0..layers[t].len() {
            let cell = layers[t][i];
            let has_transition = graph
                .store()
                .out_arcs(cell.exit)
                .iter()
                .any(|&a| !graph.is_target(graph.store().arc(a).target));
            if has_transition && rng.gen_bool(0.4) {
                graph
                    .allow_mitosis(cell, rng.gen_range(-3.0..0.5))
                    .unwrap();
            }
        }
    }

    graph
}

#[test]
fn invariants_hold_after_division_solve() {
    let mut graph = division_scenario();
    let outcome = graph
        .max_flow_min_cost_tracking(&TrackingConfig::default())
        .unwrap();
    check_invariants(&graph);
    assert_relative_eq!(outcome.energy, flow_cost(&graph), epsilon = 1e-9);
}

#[test]
fn invariants_hold_on_random_graphs() {
    for seed in 1..=6u64 {
        let mut graph = random_tracking_graph(seed, 4, 3);
        let outcome = graph
            .max_flow_min_cost_tracking(&TrackingConfig::default())
            .unwrap();
        check_invariants(&graph);
        assert_relative_eq!(outcome.energy, flow_cost(&graph), epsilon = 1e-9);
        // augmenting paths only ever carry negative cost
        assert!(outcome.energy <= 1e-12, "seed {seed}");
    }
}

#[test]
fn invariants_hold_without_back_arcs() {
    for seed in 1..=4u64 {
        let mut graph = random_tracking_graph(seed, 3, 3);
        let config = TrackingConfig {
            use_back_arcs: false,
            ..TrackingConfig::default()
        };
        let outcome = graph.max_flow_min_cost_tracking(&config).unwrap();
        check_invariants(&graph);
        assert_relative_eq!(outcome.energy, flow_cost(&graph), epsilon = 1e-9);
    }
}

#[test]
fn invariants_hold_with_partial_updates() {
    for seed in 1..=4u64 {
        let mut graph = random_tracking_graph(seed, 4, 3);
        let config = TrackingConfig {
            partial_updates: true,
            ..TrackingConfig::default()
        };
        let outcome = graph.max_flow_min_cost_tracking(&config).unwrap();
        check_invariants(&graph);
        assert_relative_eq!(outcome.energy, flow_cost(&graph), epsilon = 1e-9);
    }
}

#[test]
fn energy_monotone_under_growing_iteration_cap() {
    let mut previous = f64::INFINITY;
    for cap in 1..=8usize {
        let mut graph = random_tracking_graph(11, 4, 3);
        let config = TrackingConfig {
            max_num_paths: cap,
            ..TrackingConfig::default()
        };
        let outcome = graph.max_flow_min_cost_tracking(&config).unwrap();
        assert!(
            outcome.energy <= previous + 1e-12,
            "energy rose from {previous} to {} at cap {cap}",
            outcome.energy
        );
        previous = outcome.energy;
    }
}

#[test]
fn resolving_after_reset_reproduces_the_solution() {
    let mut graph = random_tracking_graph(7, 4, 3);
    let config = TrackingConfig::default();

    let first = graph.max_flow_min_cost_tracking(&config).unwrap();
    let flows: Vec<_> = graph.arc_flows().collect();

    graph.reset_flows();
    let second = graph.max_flow_min_cost_tracking(&config).unwrap();

    assert_eq!(first, second);
    assert_eq!(flows, graph.arc_flows().collect::<Vec<_>>());
}

#[test]
fn solving_twice_without_reset_changes_nothing() {
    let mut graph = division_scenario();
    let config = TrackingConfig::default();

    let first = graph.max_flow_min_cost_tracking(&config).unwrap();
    let flows: Vec<_> = graph.arc_flows().collect();

    let _ = first;
    let again = graph.max_flow_min_cost_tracking(&config).unwrap();
    assert_eq!(again.iterations, 0);
    assert_relative_eq!(again.energy, 0.0);
    assert_eq!(flows, graph.arc_flows().collect::<Vec<_>>());
}
